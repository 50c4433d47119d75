#![forbid(unsafe_code)]

mod accounts;
mod auth;
mod commands;
mod entry;
mod server;
mod subscribe;
mod support;

pub(crate) use support::*;

use std::fmt::Write as _;
use tl_storage::SqliteStore;

const SERVER_NAME: &str = "tasklist-server";
const SERVER_VERSION: &str = "0.1.0";
const PROTOCOL_NAME: &str = "tasklist/1";

pub(crate) struct TaskServer {
    store: SqliteStore,
    caller: auth::Caller,
    session_token_hash: Option<String>,
    subscription: Option<subscribe::Subscription>,
}

fn write_last_crash(storage_dir: &std::path::Path, kind: &str, detail: &str) {
    // Best-effort crash report; never logs request bodies.
    let _ = std::fs::create_dir_all(storage_dir);
    let path = storage_dir.join("tasklist_last_crash.txt");

    let mut out = String::new();
    let _ = writeln!(out, "ts={}", crate::support::now_rfc3339());
    let _ = writeln!(out, "pid={}", std::process::id());
    let _ = writeln!(out, "kind={kind}");
    let cwd = std::env::current_dir().unwrap_or_else(|_| std::path::PathBuf::from("."));
    let _ = writeln!(out, "cwd={}", cwd.to_string_lossy());
    let _ = writeln!(out, "args={:?}", std::env::args().collect::<Vec<_>>());
    let _ = writeln!(out, "detail={detail}");

    let _ = std::fs::write(path, out);
}

fn install_crash_reporter(storage_dir: std::path::PathBuf) {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let mut detail = info.to_string();
        let backtrace = std::backtrace::Backtrace::force_capture();
        let _ = write!(&mut detail, "\nbacktrace:\n{backtrace}");
        write_last_crash(&storage_dir, "panic", &detail);
        default_hook(info);
    }));
}

fn usage() -> &'static str {
    "tl_server — multi-user to-do service over JSON-RPC (stdio or unix socket)\n\n\
USAGE:\n\
  tl_server [--storage-dir DIR] [--daemon] [--socket PATH] [--poll-ms MS]\n\
\n\
FLAGS:\n\
  -h, --help       Print this help and exit\n\
  -V, --version    Print version and exit\n\
\n\
NOTES:\n\
  - Store default: ./.tasklist/\n\
  - Env fallbacks: TL_STORAGE_DIR, TL_SOCKET, TL_DAEMON, TL_POLL_MS\n"
}

fn version_line() -> String {
    format!("tl_server {SERVER_VERSION}")
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = std::env::args().collect::<Vec<_>>();
    if args
        .iter()
        .any(|arg| matches!(arg.as_str(), "-h" | "--help"))
    {
        print!("{}", usage());
        return Ok(());
    }
    if args
        .iter()
        .any(|arg| matches!(arg.as_str(), "-V" | "--version"))
    {
        println!("{}", version_line());
        return Ok(());
    }

    let storage_dir = parse_storage_dir();
    install_crash_reporter(storage_dir.clone());
    let mut session_log = SessionLog::new(&storage_dir);
    let storage_dir_for_errors = storage_dir.clone();
    let poll_ms = parse_poll_ms();
    let daemon_mode = parse_daemon_mode();

    if daemon_mode {
        #[cfg(unix)]
        {
            let socket_path = parse_socket_path(&storage_dir);
            let config = entry::DaemonConfig {
                storage_dir,
                socket_path,
                poll_ms,
            };
            let result = entry::run_socket_daemon(config, session_log);
            if let Err(err) = &result {
                write_last_crash(&storage_dir_for_errors, "error", &format!("{err:?}"));
            }
            return result;
        }

        #[cfg(not(unix))]
        {
            return Err("daemon mode is only supported on unix targets".into());
        }
    }

    let store = SqliteStore::open(&storage_dir)?;
    let mut server = TaskServer::new(store);
    let result = entry::run_stdio(&mut server, &mut session_log, poll_ms);
    if let Err(err) = &result {
        write_last_crash(&storage_dir_for_errors, "error", &format!("{err:?}"));
    }
    result
}
