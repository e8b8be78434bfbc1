use std::path::{Path, PathBuf};

/// Default directory for the UNIX-socket bus, overridable via `LVA_IPC_DIR`.
pub const DEFAULT_IPC_DIR: &str = "/tmp/lva-ipc";

pub const CONTROL_SOCK: &str = "control.sock";
pub const GPIO_EVENTS_SOCK: &str = "gpio-events.sock";
pub const VISD_SOCK: &str = "visd.sock";

/// Oversize frames are dropped rather than buffered without bound.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Resolves the socket directory, honoring `LVA_IPC_DIR` when the caller didn't
/// already pin one down (e.g. from a `--socket-dir` CLI flag).
pub fn ipc_dir(override_dir: Option<&Path>) -> PathBuf {
    if let Some(dir) = override_dir {
        return dir.to_path_buf();
    }
    std::env::var_os("LVA_IPC_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_IPC_DIR))
}

pub fn control_sock(dir: &Path) -> PathBuf {
    dir.join(CONTROL_SOCK)
}

pub fn gpio_events_sock(dir: &Path) -> PathBuf {
    dir.join(GPIO_EVENTS_SOCK)
}

pub fn visd_sock(dir: &Path) -> PathBuf {
    dir.join(VISD_SOCK)
}

/// Removes a socket file this process owns, ignoring "not found" — idempotent
/// cleanup on shutdown per the envelope layer's contract.
pub fn remove_socket_file(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
