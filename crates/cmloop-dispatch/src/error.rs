#![forbid(unsafe_code)]

use thiserror::Error;

use crate::handle::HandleKind;

pub type Result<T> = std::result::Result<T, DispatchError>;

/// Failures reported by the dispatcher.
///
/// Every variant is also emitted through [`cmloop_core::report!`] at the point
/// of detection; the dispatcher stays usable for all other registrations.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// The handle never existed, already fired, or was already removed.
    #[error("stale {kind} handle #{id}")]
    StaleHandle { kind: HandleKind, id: u64 },

    #[error("{kind} registry is full ({limit} registrations)")]
    CapacityExceeded { kind: HandleKind, limit: usize },

    #[error("dispatcher has been destroyed")]
    Destroyed,

    #[error("poll failed: {0}")]
    Poll(#[from] std::io::Error),

    #[error("registration rejected: {message}")]
    Registration { message: String },
}

impl DispatchError {
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn stale(kind: HandleKind, id: u64) -> Self {
        Self::StaleHandle { kind, id }
    }

    /// Whether this error means the handle is no longer registered.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::StaleHandle { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_handle_message_names_kind_and_id() {
        let err = DispatchError::stale(HandleKind::Timeout, 7);
        assert_eq!(err.to_string(), "stale timeout handle #7");
        assert!(err.is_stale());
    }

    #[test]
    fn capacity_message_includes_limit() {
        let err = DispatchError::CapacityExceeded {
            kind: HandleKind::Idle,
            limit: 4,
        };
        assert_eq!(err.to_string(), "idle registry is full (4 registrations)");
        assert!(!err.is_stale());
    }
}
