//! Error types for the call-control library

use std::time::Duration;

use thiserror::Error;

/// Result type for call-control operations
pub type Result<T> = std::result::Result<T, CallControlError>;

/// Failure reported by an underlying media collaborator.
///
/// This is the "native" error of the media subsystem; it is carried verbatim
/// inside [`CallControlError::Media`] and inside failed completion events.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} failed: {reason}")]
pub struct MediaError {
    /// Media operation that failed (join, unjoin, release, ...)
    pub operation: String,
    /// Collaborator supplied reason
    pub reason: String,
}

impl MediaError {
    pub fn new(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            reason: reason.into(),
        }
    }
}

/// Errors that can occur in call control
#[derive(Debug, Clone, Error)]
pub enum CallControlError {
    /// Operating on a released or uninitialized resource
    #[error("Illegal state: {message}")]
    IllegalState { message: String },

    /// Peer not connectable, malformed configuration value, ...
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Media offer/answer negotiation failed
    #[error("Negotiation failed: {message}")]
    Negotiate { message: String },

    /// Signaling send failed or the call left the answered state
    #[error("Signaling error: {message}")]
    Signal { message: String },

    /// The remote side answered a re-offer with a non-2xx status
    #[error("Renegotiation rejected with status {status}")]
    Rejected { status: u16 },

    /// Generic underlying media subsystem failure
    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    /// A wait exceeded its deadline
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Invalid configuration
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl CallControlError {
    /// Create an illegal state error
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState {
            message: message.into(),
        }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a negotiation error
    pub fn negotiate(message: impl Into<String>) -> Self {
        Self::Negotiate {
            message: message.into(),
        }
    }

    /// Create a signaling error
    pub fn signal(message: impl Into<String>) -> Self {
        Self::Signal {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// True for the recoverable outcome of a re-offer the peer declined.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}
