use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrontPanelError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("ipc error: {0}")]
    Ipc(#[from] lva_ipc::IpcError),
}

pub type Result<T> = std::result::Result<T, FrontPanelError>;
