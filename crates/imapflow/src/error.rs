//! Error types for the IMAP library.

use std::time::Duration;

use thiserror::Error;

use crate::types::Status;

/// Errors that can occur during IMAP operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error during network operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS handshake or encryption error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Invalid DNS name for TLS.
    #[error("Invalid DNS name: {0}")]
    InvalidDnsName(#[from] rustls::pki_types::InvalidDnsNameError),

    /// Malformed token stream: bad literal marker, unterminated quoted string,
    /// unbalanced parentheses.
    #[error("Protocol error at position {position}: {message}")]
    Parse {
        /// Byte offset, counted across every chunk of the response.
        position: usize,
        /// Description of what went wrong.
        message: String,
    },

    /// Protocol violation that has no byte offset, such as a malformed FETCH
    /// record or a missing continuation.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Modified UTF-7 decoding failed.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// The server completed the command with NO or BAD.
    #[error("{command} rejected with {status}: {text}")]
    CommandRejected {
        /// Command name as sent.
        command: String,
        /// Tagged status (NO or BAD).
        status: Status,
        /// Server response text, verbatim.
        text: String,
    },

    /// Server sent BYE (disconnecting).
    #[error("Server sent BYE: {0}")]
    Bye(String),

    /// Operation timed out.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Invalid state for the requested operation.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A capability-gated operation was attempted without the capability.
    #[error(transparent)]
    Capability(#[from] CapabilityError),
}

impl Error {
    /// Creates a positional parse error.
    pub(crate) fn parse(position: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            position,
            message: message.into(),
        }
    }

    /// Returns true if the error leaves the connection unusable.
    ///
    /// Transport failures during a blocking read or write mean the position
    /// in the response stream is unknown; the caller must reconnect.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Tls(_) | Self::Timeout(_) | Self::Bye(_)
        )
    }
}

/// The server does not advertise a capability an operation depends on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Server does not support {capability}")]
pub struct CapabilityError {
    /// The missing capability name.
    pub capability: String,
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_reports_position() {
        let err = Error::parse(17, "unexpected ')'");
        assert_eq!(err.to_string(), "Protocol error at position 17: unexpected ')'");
        assert!(matches!(err, Error::Parse { position: 17, .. }));
        assert!(!err.is_transport());
    }

    #[test]
    fn rejected_command_keeps_server_text() {
        let err = Error::CommandRejected {
            command: "SELECT".to_string(),
            status: Status::No,
            text: "[NONEXISTENT] Unknown Mailbox: Foo".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "SELECT rejected with NO: [NONEXISTENT] Unknown Mailbox: Foo"
        );
    }

    #[test]
    fn timeouts_are_fatal() {
        assert!(Error::Timeout(Duration::from_secs(5)).is_transport());
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(Error::from(io).is_transport());
    }

    #[test]
    fn capability_error_converts() {
        let err: Error = CapabilityError {
            capability: "IDLE".to_string(),
        }
        .into();
        assert_eq!(err.to_string(), "Server does not support IDLE");
    }
}
