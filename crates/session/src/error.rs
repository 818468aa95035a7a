//! Gateway error types

use thiserror::Error;

use crate::store::StoreError;

/// Errors surfaced to callers of the session gateway
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Network failure or timeout before any response arrived
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The backend answered with a non-success envelope code
    #[error("Server error {code}: {message}")]
    Application { code: i32, message: String },

    /// The request was still rejected after a refreshed retry
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// The refresh exchange failed and the session was terminated
    #[error("Session refresh failed: {0}")]
    Refresh(#[from] RefreshError),

    /// The session was ended by a logout while this request was waiting
    #[error("Session ended before the request could be replayed")]
    SessionEnded,

    /// Credential store failure
    #[error("Credential store error: {0}")]
    Store(#[from] StoreError),

    /// The stored credential cannot be sent as a header value
    #[error("Invalid credential header: {0}")]
    InvalidHeader(#[from] http::header::InvalidHeaderValue),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Configuration(String),
}

impl GatewayError {
    /// Envelope or HTTP code carried by the error, if any
    pub const fn code(&self) -> Option<i32> {
        match self {
            Self::Application { code, .. } => Some(*code),
            Self::Authentication { .. } => Some(401),
            _ => None,
        }
    }

    /// Whether the error ended the current session
    pub const fn is_session_terminated(&self) -> bool {
        match self {
            Self::Refresh(RefreshError::Abandoned) => false,
            Self::Refresh(_) | Self::SessionEnded => true,
            _ => false,
        }
    }
}

/// Why a refresh exchange failed.
///
/// Cloneable so one outcome can be handed to every queued request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshError {
    #[error("No refresh token available")]
    MissingRefreshToken,

    #[error("refresh request failed: {0}")]
    Transport(String),

    #[error("refresh rejected with code {code}: {message}")]
    Rejected { code: i32, message: String },

    #[error("Invalid refresh token response: {0}")]
    Malformed(String),

    #[error("failed to persist refreshed tokens: {0}")]
    Store(String),

    #[error("session ended by logout")]
    LoggedOut,

    /// The request that started the exchange was dropped before it settled
    #[error("refresh abandoned before completion")]
    Abandoned,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes() {
        let err = GatewayError::Application {
            code: 404,
            message: "Not Found".into(),
        };
        assert_eq!(err.code(), Some(404));
        assert_eq!(
            GatewayError::Authentication {
                message: String::new()
            }
            .code(),
            Some(401)
        );
        assert_eq!(GatewayError::SessionEnded.code(), None);
    }

    #[test]
    fn session_termination() {
        assert!(GatewayError::Refresh(RefreshError::MissingRefreshToken).is_session_terminated());
        assert!(GatewayError::SessionEnded.is_session_terminated());
        assert!(!GatewayError::Refresh(RefreshError::Abandoned).is_session_terminated());
        assert!(!GatewayError::Configuration("x".into()).is_session_terminated());
    }
}
