use thiserror::Error;

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("ipc error: {0}")]
    Ipc(#[from] lva_ipc::IpcError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, VisionError>;
