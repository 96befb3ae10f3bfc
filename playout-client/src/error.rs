//! Client error types.

use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] playout_protocol::ProtocolError),

    #[error("encoding error: {0}")]
    Encoding(#[from] playout_protocol::EncodingError),

    #[error("not connected")]
    NotConnected,

    /// The link went down while the command was outstanding.
    #[error("connection dropped")]
    Dropped,

    /// The connection was closed by `disconnect`.
    #[error("connection closed")]
    ConnectionClosed,

    #[error("request timeout")]
    Timeout,

    #[error("server error: {code} - {message}")]
    ServerError { code: u16, message: String },

    #[error("unknown device: {0}")]
    UnknownDevice(String),
}

impl ClientError {
    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Io(_) => true,
            ClientError::NotConnected => true,
            ClientError::Dropped => true,
            ClientError::Timeout => true,
            // 5xx means the server failed, not the request.
            ClientError::ServerError { code, .. } => *code >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(ClientError::Dropped.is_retryable());
        assert!(ClientError::NotConnected.is_retryable());
        assert!(ClientError::Timeout.is_retryable());
        assert!(!ClientError::ConnectionClosed.is_retryable());
        assert!(!ClientError::UnknownDevice("main".into()).is_retryable());
        assert!(ClientError::ServerError {
            code: 501,
            message: "PLAY FAILED".into()
        }
        .is_retryable());
        assert!(!ClientError::ServerError {
            code: 404,
            message: "LOAD ERROR".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_display() {
        let err = ClientError::ServerError {
            code: 404,
            message: "LOAD FILE NOT FOUND".into(),
        };
        assert_eq!(err.to_string(), "server error: 404 - LOAD FILE NOT FOUND");
    }
}
