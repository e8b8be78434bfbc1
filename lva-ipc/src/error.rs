use thiserror::Error;

pub type Result<T> = std::result::Result<T, IpcError>;

/// Everything that can go wrong while framing or routing an [`crate::envelope::Envelope`].
#[derive(Error, Debug)]
pub enum IpcError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed envelope: {0}")]
    Malformed(String),

    #[error("frame exceeds {limit} bytes ({actual} bytes)")]
    OversizeFrame { limit: usize, actual: usize },

    #[error("connection closed")]
    Closed,
}
