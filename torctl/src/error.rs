//! Error types for control-port operations

use thiserror::Error;

/// Errors that can occur while talking to a control port
#[derive(Debug, Error)]
pub enum ControlError {
    /// The peer violated the wire protocol; framing can no longer be trusted
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The peer rejected a command with a well-formed error reply
    #[error("Error reply {code}: {message}")]
    ErrorReply { code: u16, message: String },

    /// I/O error on the control-port stream
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The connection is closed, or closed before a reply arrived
    #[error("Connection closed")]
    ConnectionClosed,

    /// Waiting for the peer took longer than allowed
    #[error("Request timeout")]
    Timeout,

    /// Control-port address could not be parsed
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// The negotiated dialect cannot express the request
    #[error("Unsupported by this dialect: {0}")]
    Unsupported(String),
}

impl ControlError {
    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Returns `true` if the error leaves the connection unusable
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Protocol(_) | Self::Transport(_) | Self::ConnectionClosed
        )
    }
}

/// Result type for control operations
pub type Result<T> = std::result::Result<T, ControlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ControlError::ErrorReply {
            code: 515,
            message: "Authentication failed".to_string(),
        };
        assert_eq!(err.to_string(), "Error reply 515: Authentication failed");

        let err = ControlError::protocol("BANDWIDTH event too short");
        assert_eq!(err.to_string(), "Protocol error: BANDWIDTH event too short");
    }

    #[test]
    fn test_error_classification() {
        assert!(ControlError::protocol("bad frame").is_fatal());
        assert!(ControlError::ConnectionClosed.is_fatal());
        assert!(
            ControlError::Transport(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "gone"
            ))
            .is_fatal()
        );

        assert!(
            !ControlError::ErrorReply {
                code: 552,
                message: "Unrecognized key".to_string()
            }
            .is_fatal()
        );
        assert!(!ControlError::Timeout.is_fatal());
        assert!(!ControlError::Unsupported("ADDRMAP".to_string()).is_fatal());
    }
}
