use thiserror::Error;

pub type Result<T, E = TransportError> = core::result::Result<T, E>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("interface not found: {0}")]
    InterfaceNotFound(String),
    #[error("operation not supported on this backend: {0}")]
    Unsupported(&'static str),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("timeout")]
    Timeout,
    #[error("buffer length mismatch: tx {tx} words, rx {rx} words")]
    LengthMismatch { tx: usize, rx: usize },
    #[error("malformed bridge reply: {0}")]
    BadReply(&'static str),
}
