use std::path::PathBuf;

/// Errors that can occur on channels and remote links.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The operation would block; try again on a later tick.
    #[error("operation would block")]
    WouldBlock,

    /// The peer closed its end.
    #[error("peer closed the connection")]
    Closed,

    /// Only part of a packet could be written.
    #[error("short write ({written} of {expected} bytes)")]
    ShortWrite { written: usize, expected: usize },

    /// Failed to bind a listening endpoint.
    #[error("failed to bind to {endpoint}: {source}")]
    Bind {
        endpoint: String,
        source: std::io::Error,
    },

    /// Failed to connect to a remote endpoint.
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        source: std::io::Error,
    },

    /// Failed to open or configure a serial device.
    #[error("serial device {path}: {source}")]
    Serial {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Any other I/O error.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Routine flow control rather than a fault.
    pub fn is_would_block(&self) -> bool {
        matches!(self, TransportError::WouldBlock)
    }

    /// Map an I/O error from a non-blocking descriptor.
    pub(crate) fn from_io(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::WouldBlock => TransportError::WouldBlock,
            std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::UnexpectedEof => TransportError::Closed,
            _ => TransportError::Io(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
