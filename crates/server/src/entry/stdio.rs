#![forbid(unsafe_code)]

use crate::entry::framing::{
    TransportMode, detect_mode_from_first_line, parse_request, read_content_length_frame,
    request_expects_response, write_json,
};
use crate::{SessionLog, TaskServer, subscribe};
use std::io::{BufRead, BufReader};

pub(crate) fn run_stdio(
    server: &mut TaskServer,
    session_log: &mut SessionLog,
    poll_ms: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let stdin = std::io::stdin();
    let mut reader = BufReader::new(stdin.lock());
    let mut stdout = std::io::stdout().lock();

    // Framing is detected once per process and never mixed afterwards.
    let mut mode: Option<TransportMode> = None;

    loop {
        if !stdin_ready(&mut reader, poll_ms) {
            // Idle tick: push deltas committed by other connections.
            if let Some(effective) = mode {
                flush_deltas(server, effective, &mut stdout, session_log)?;
            }
            continue;
        }

        let effective_mode = match mode {
            Some(v) => v,
            None => {
                let mut peek = String::new();
                let read = reader.read_line(&mut peek)?;
                if read == 0 {
                    session_log.note_exit("stdin_eof_before_mode");
                    break;
                }
                let Some(detected) = detect_mode_from_first_line(&peek) else {
                    continue;
                };
                mode = Some(detected);
                match detected {
                    TransportMode::NewlineJson => {
                        session_log.note_mode("newline_json", &peek);
                        let raw = peek.trim();
                        if !raw.is_empty() {
                            handle_body(server, raw.as_bytes(), detected, &mut stdout, session_log)?;
                        }
                    }
                    TransportMode::ContentLength => {
                        session_log.note_mode("content_length", &peek);
                        let Some(body) = read_content_length_frame(&mut reader, Some(peek))? else {
                            session_log.note_exit("stdin_eof_during_first_frame");
                            break;
                        };
                        handle_body(server, &body, detected, &mut stdout, session_log)?;
                    }
                }
                continue;
            }
        };

        match effective_mode {
            TransportMode::NewlineJson => {
                let mut line = String::new();
                let read = reader.read_line(&mut line)?;
                if read == 0 {
                    session_log.note_exit("stdin_eof");
                    break;
                }
                let raw = line.trim();
                if raw.is_empty() {
                    continue;
                }
                handle_body(server, raw.as_bytes(), effective_mode, &mut stdout, session_log)?;
            }
            TransportMode::ContentLength => {
                let mut first_header = String::new();
                let read = reader.read_line(&mut first_header)?;
                if read == 0 {
                    session_log.note_exit("stdin_eof");
                    break;
                }
                if first_header.trim().is_empty() {
                    continue;
                }
                let Some(body) = read_content_length_frame(&mut reader, Some(first_header))?
                else {
                    session_log.note_exit("stdin_eof_during_frame");
                    break;
                };
                handle_body(server, &body, effective_mode, &mut stdout, session_log)?;
            }
        }
    }

    Ok(())
}

fn stdin_ready(reader: &mut BufReader<std::io::StdinLock<'_>>, poll_ms: u64) -> bool {
    // Buffered bytes win over the poll: a whole frame may already be in memory.
    if !reader.buffer().is_empty() {
        return true;
    }
    #[cfg(unix)]
    {
        use std::os::unix::io::AsFd as _;
        crate::entry::poll::wait_fd_readable(
            reader.get_ref().as_fd(),
            std::time::Duration::from_millis(poll_ms),
        )
    }
    #[cfg(not(unix))]
    {
        let _ = poll_ms;
        true
    }
}

fn handle_body(
    server: &mut TaskServer,
    body: &[u8],
    mode: TransportMode,
    stdout: &mut std::io::StdoutLock<'_>,
    session_log: &mut SessionLog,
) -> Result<(), Box<dyn std::error::Error>> {
    let expects_response = request_expects_response(body);
    match parse_request(body) {
        Ok(request) => {
            session_log.note_method(&request.method);
            let response = server.handle(request);
            if expects_response {
                write_json(mode, stdout, &response)?;
            }
        }
        Err(error_response) => {
            write_json(mode, stdout, &error_response)?;
        }
    }

    // Deltas the request just produced for this subscriber ride the same flush.
    flush_deltas(server, mode, stdout, session_log)
}

fn flush_deltas(
    server: &mut TaskServer,
    mode: TransportMode,
    stdout: &mut std::io::StdoutLock<'_>,
    session_log: &mut SessionLog,
) -> Result<(), Box<dyn std::error::Error>> {
    let notifications = match subscribe::pump(server) {
        Ok(notifications) => notifications,
        Err(err) => {
            session_log.note_error(&format!("pump: {err}"));
            return Ok(());
        }
    };
    for notification in &notifications {
        write_json(mode, stdout, notification)?;
    }
    Ok(())
}
