#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

const DEFAULT_POLL_MS: u64 = 50;
const MIN_POLL_MS: u64 = 10;

pub(crate) fn parse_storage_dir() -> PathBuf {
    let mut args = std::env::args().skip(1);
    let mut storage_dir: Option<PathBuf> = None;
    while let Some(arg) = args.next() {
        if arg.as_str() == "--storage-dir"
            && let Some(value) = args.next()
        {
            storage_dir = Some(PathBuf::from(value));
        }
    }
    storage_dir
        .or_else(|| std::env::var("TL_STORAGE_DIR").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(".tasklist"))
}

pub(crate) fn parse_daemon_mode() -> bool {
    for arg in std::env::args().skip(1) {
        if arg.as_str() == "--daemon" {
            return true;
        }
    }
    parse_bool_env("TL_DAEMON")
}

pub(crate) fn parse_socket_path(storage_dir: &Path) -> PathBuf {
    let mut args = std::env::args().skip(1);
    let mut cli: Option<PathBuf> = None;
    while let Some(arg) = args.next() {
        if arg.as_str() == "--socket"
            && let Some(value) = args.next()
        {
            cli = Some(PathBuf::from(value));
            break;
        }
    }

    cli.or_else(|| std::env::var("TL_SOCKET").ok().map(PathBuf::from))
        .unwrap_or_else(|| storage_dir.join("tasklist.sock"))
}

pub(crate) fn parse_poll_ms() -> u64 {
    let mut args = std::env::args().skip(1);
    let mut cli: Option<u64> = None;
    while let Some(arg) = args.next() {
        if arg.as_str() == "--poll-ms"
            && let Some(value) = args.next()
        {
            cli = value.trim().parse::<u64>().ok();
            break;
        }
    }

    cli.or_else(|| {
        std::env::var("TL_POLL_MS")
            .ok()
            .and_then(|value| value.trim().parse::<u64>().ok())
    })
    .unwrap_or(DEFAULT_POLL_MS)
    .max(MIN_POLL_MS)
}

fn parse_bool_env(key: &str) -> bool {
    let Ok(value) = std::env::var(key) else {
        return false;
    };
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
