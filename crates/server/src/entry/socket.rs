#![forbid(unsafe_code)]

use crate::entry::framing::{
    TransportMode, detect_mode_from_first_line, parse_request, read_content_length_frame,
    request_expects_response, write_json,
};
use crate::{SessionLog, TaskServer, subscribe};
use std::io::{BufRead, BufReader, BufWriter};
use std::os::unix::io::AsFd as _;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Clone)]
pub(crate) struct DaemonConfig {
    pub(crate) storage_dir: PathBuf,
    pub(crate) socket_path: PathBuf,
    pub(crate) poll_ms: u64,
}

pub(crate) fn run_socket_daemon(
    config: DaemonConfig,
    mut session_log: SessionLog,
) -> Result<(), Box<dyn std::error::Error>> {
    // A live daemon on this path wins; the newcomer bows out quietly.
    if UnixStream::connect(&config.socket_path).is_ok() {
        session_log.note_exit("daemon_already_running");
        return Ok(());
    }

    if config.socket_path.exists() {
        let _ = std::fs::remove_file(&config.socket_path);
    }

    let listener = match UnixListener::bind(&config.socket_path) {
        Ok(listener) => listener,
        Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
            if UnixStream::connect(&config.socket_path).is_ok() {
                session_log.note_exit("daemon_already_running");
                return Ok(());
            }
            return Err(err.into());
        }
        Err(err) => return Err(err.into()),
    };
    let _ = listener.set_nonblocking(true);
    session_log.note_mode("socket", &config.socket_path.to_string_lossy());

    let config = Arc::new(config);

    loop {
        match listener.accept() {
            Ok((stream, _addr)) => {
                let config = Arc::clone(&config);
                thread::spawn(move || {
                    let _ = handle_connection(stream, config);
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                // Unlinking the socket file asks the daemon to exit.
                if !config.socket_path.exists() {
                    session_log.note_exit("socket_unlinked");
                    return Ok(());
                }
                thread::sleep(Duration::from_millis(50));
            }
            Err(_) => continue,
        }
    }
}

fn handle_connection(
    stream: UnixStream,
    config: Arc<DaemonConfig>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = BufWriter::new(stream);

    // Each connection carries its own store handle and its own identity.
    let store = tl_storage::SqliteStore::open(&config.storage_dir)?;
    let mut server = TaskServer::new(store);

    let mut mode: Option<TransportMode> = None;

    loop {
        // Buffered bytes win over the poll: a whole frame may already be in memory.
        if reader.buffer().is_empty()
            && !crate::entry::poll::wait_fd_readable(
                reader.get_ref().as_fd(),
                Duration::from_millis(config.poll_ms),
            )
        {
            // Idle tick: push deltas committed by other connections.
            if let Some(effective) = mode {
                flush_deltas(&mut server, effective, &mut writer)?;
            }
            continue;
        }

        let effective_mode = match mode {
            Some(v) => v,
            None => {
                let mut peek = String::new();
                let read = reader.read_line(&mut peek)?;
                if read == 0 {
                    break;
                }
                let Some(detected) = detect_mode_from_first_line(&peek) else {
                    continue;
                };
                mode = Some(detected);
                match detected {
                    TransportMode::NewlineJson => {
                        let raw = peek.trim();
                        if !raw.is_empty() {
                            handle_body(&mut server, raw.as_bytes(), detected, &mut writer)?;
                        }
                    }
                    TransportMode::ContentLength => {
                        let Some(body) = read_content_length_frame(&mut reader, Some(peek))? else {
                            break;
                        };
                        handle_body(&mut server, &body, detected, &mut writer)?;
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
                    break;
                }
                let raw = line.trim();
                if raw.is_empty() {
                    continue;
                }
                handle_body(&mut server, raw.as_bytes(), effective_mode, &mut writer)?;
            }
            TransportMode::ContentLength => {
                let mut first_header = String::new();
                let read = reader.read_line(&mut first_header)?;
                if read == 0 {
                    break;
                }
                if first_header.trim().is_empty() {
                    continue;
                }
                let Some(body) = read_content_length_frame(&mut reader, Some(first_header))?
                else {
                    break;
                };
                handle_body(&mut server, &body, effective_mode, &mut writer)?;
            }
        }
    }

    Ok(())
}

fn handle_body(
    server: &mut TaskServer,
    body: &[u8],
    mode: TransportMode,
    writer: &mut BufWriter<UnixStream>,
) -> Result<(), Box<dyn std::error::Error>> {
    let expects_response = request_expects_response(body);
    match parse_request(body) {
        Ok(request) => {
            let response = server.handle(request);
            if expects_response {
                write_json(mode, writer, &response)?;
            }
        }
        Err(error_response) => {
            write_json(mode, writer, &error_response)?;
        }
    }

    flush_deltas(server, mode, writer)
}

fn flush_deltas(
    server: &mut TaskServer,
    mode: TransportMode,
    writer: &mut BufWriter<UnixStream>,
) -> Result<(), Box<dyn std::error::Error>> {
    for notification in &subscribe::pump(server)? {
        write_json(mode, writer, notification)?;
    }
    Ok(())
}
