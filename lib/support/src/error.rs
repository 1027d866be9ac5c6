use std::io;
use thiserror::Error;

/// Crate-wide error taxonomy.
///
/// Generalizes `flux::shared::{NetworkError, ErrorType}`'s two-level
/// `{Wait, Fatal(ErrorType)}` split into a flatter, `std::error::Error`
/// compatible enum better suited to `?`-propagation. The retryable/fatal
/// distinction survives as [`IpcError::is_transient`].
#[derive(Debug, Error)]
pub enum IpcError {
    #[error("config error: {0}")]
    Config(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("transport error: {0}")]
    Transport(#[source] io::Error),

    #[error("os error: {0}")]
    Os(String),
}

impl IpcError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        IpcError::Protocol(msg.into())
    }

    pub fn codec(msg: impl Into<String>) -> Self {
        IpcError::Codec(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        IpcError::Config(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        IpcError::Timeout(msg.into())
    }

    /// True for errors a reconnect loop or retrying caller may reasonably
    /// ignore and retry on (mirrors `ErrorUtils::has_failed` being false
    /// for `NetworkError::Wait`).
    pub fn is_transient(&self) -> bool {
        match self {
            IpcError::Transport(err) => err.kind() == io::ErrorKind::WouldBlock,
            _ => false,
        }
    }
}

impl From<io::Error> for IpcError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut => IpcError::Timeout(err.to_string()),
            _ => IpcError::Transport(err),
        }
    }
}

pub type IpcResult<T> = Result<T, IpcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn would_block_is_transient() {
        let err = IpcError::from(io::Error::from(io::ErrorKind::WouldBlock));
        assert!(err.is_transient());
    }

    #[test]
    fn broken_pipe_is_not_transient() {
        let err = IpcError::from(io::Error::from(io::ErrorKind::BrokenPipe));
        assert!(!err.is_transient());
    }

    #[test]
    fn timed_out_io_error_becomes_timeout_variant() {
        let err = IpcError::from(io::Error::from(io::ErrorKind::TimedOut));
        assert!(matches!(err, IpcError::Timeout(_)));
    }
}
