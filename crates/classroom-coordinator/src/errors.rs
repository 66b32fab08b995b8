//! Classroom coordinator error types.
//!
//! Only initialization failures abort a coordinator. Everything else is
//! logged at the call site and the coordinator keeps running.

use crate::config::ConfigError;
use common::types::UserId;
use thiserror::Error;

/// Coordinator error type.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// No class session matches the requested name.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Media session provider failure.
    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    /// Directory / session service failure.
    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    /// Event target did not match the event kind.
    #[error("Malformed event payload: {0}")]
    Payload(#[from] PayloadError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Operation is not available to the local role.
    #[error("Not permitted: {0}")]
    NotPermitted(&'static str),

    /// No roster record for the given user.
    #[error("Participant not found: {0}")]
    ParticipantNotFound(UserId),

    /// The coordinator has already been torn down.
    #[error("Coordinator destroyed")]
    Destroyed,
}

impl CoordinatorError {
    /// Short stable code used for metrics labels and logs.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            CoordinatorError::SessionNotFound(_) => "session_not_found",
            CoordinatorError::Media(_) => "media",
            CoordinatorError::Service(_) => "service",
            CoordinatorError::Payload(_) => "payload",
            CoordinatorError::Config(_) => "config",
            CoordinatorError::NotPermitted(_) => "not_permitted",
            CoordinatorError::ParticipantNotFound(_) => "participant_not_found",
            CoordinatorError::Destroyed => "destroyed",
        }
    }

    /// Whether this error ends the coordinator instance. Only failures
    /// while starting up are fatal.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CoordinatorError::SessionNotFound(_)
                | CoordinatorError::Media(MediaError::JoinFailed(_))
                | CoordinatorError::Config(_)
        )
    }
}

/// Errors raised by the media session provider and its tracks.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MediaError {
    #[error("join failed: {0}")]
    JoinFailed(String),

    #[error("device unavailable: {0}")]
    Device(String),

    #[error("track operation failed: {0}")]
    Track(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("not connected")]
    NotConnected,
}

/// Errors raised by the directory, session API and persistence collaborators.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("request rejected: {0}")]
    Rejected(String),
}

/// Event target shape did not match what the event kind requires.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("{kind} expects {expected}, got {found}")]
    UnexpectedShape {
        kind: &'static str,
        expected: &'static str,
        found: String,
    },

    #[error("unknown {field} value: {value}")]
    UnknownValue { field: &'static str, value: String },
}
