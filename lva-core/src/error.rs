use thiserror::Error;

pub type Result<T> = std::result::Result<T, EdgeError>;

/// Error taxonomy for `lva-core`. Most variants are non-fatal and logged by
/// the caller; only errors surfaced through `main` via `anyhow` cause a
/// non-zero exit.
#[derive(Error, Debug)]
pub enum EdgeError {
    #[error("audio device error: {0}")]
    Audio(String),

    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("model load error: {0}")]
    ModelLoad(String),

    #[error("hub protocol error: {0}")]
    Hub(String),

    #[error("vision client error: {0}")]
    Vision(String),

    #[error("IPC error: {0}")]
    Ipc(#[from] lva_ipc::IpcError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
