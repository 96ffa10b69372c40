//! Error types for the civic portal client
//!
//! Provides error handling for:
//! - Transport failures (connection refused, timeouts)
//! - Non-2xx responses carrying a server message
//! - Expired sessions that force re-authentication
//! - Session storage and configuration problems

use crate::config::ConfigError;
use crate::refresh::TransitionError;
use crate::storage::StorageError;

/// Main client error type
///
/// `Clone` so that a single refresh failure can be handed to every request
/// queued behind it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// Transport failure before any response arrived
    #[error("network error: {0}")]
    Network(String),

    /// Non-2xx response
    #[error("HTTP {status}: {message}")]
    Http {
        /// Response status code
        status: u16,
        /// Server-provided message, or a generic one
        message: String,
    },

    /// No usable refresh token, or the refresh call failed
    #[error("session expired: {0}")]
    SessionExpired(String),

    /// Response body could not be decoded into the requested type
    #[error("decode error: {0}")]
    Decode(String),

    /// Response decoded but is missing required fields
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Session storage failure
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration failure
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Refresh coordinator refused an event
    #[error(transparent)]
    Refresh(#[from] TransitionError),
}

impl ClientError {
    /// Build an HTTP error with the generic status-coded message
    #[inline]
    #[must_use]
    pub fn http_status(status: u16) -> Self {
        Self::Http {
            status,
            message: format!("Error {status}"),
        }
    }

    /// Status code, if this is an HTTP error
    #[inline]
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Check if the error means the user has to log in again
    #[inline]
    #[must_use]
    pub fn requires_login(&self) -> bool {
        matches!(self, Self::SessionExpired(_))
    }

    /// Check if the caller could reasonably retry the same call later
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
