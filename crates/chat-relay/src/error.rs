//! Error types for the relay.
//!
//! Nothing in here is fatal to the process: every variant is scoped to a
//! single event on a single connection.

use thiserror::Error;

/// Result type for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Failures reported by the external message/group stores.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("write rejected: {0}")]
    Rejected(String),
}

/// Token verification failures at handshake.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("no token supplied")]
    MissingToken,

    #[error("invalid or expired token")]
    InvalidToken,

    #[error("identity {0:?} cannot be routed")]
    UnroutableIdentity(String),
}

/// Errors produced while handling a client event.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RelayError {
    #[error("connection is not authenticated")]
    Unauthenticated,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl RelayError {
    /// Stable numeric code sent to clients in `eventError`.
    pub fn code(&self) -> u32 {
        match self {
            RelayError::Unauthenticated => 1001,
            RelayError::Auth(_) => 1002,
            RelayError::Forbidden(_) => 1003,
            RelayError::NotFound(_) => 1004,
            RelayError::InvalidEvent(_) => 1005,
            RelayError::Store(_) => 1006,
        }
    }

    /// Short machine-readable kind.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::Unauthenticated => "unauthenticated",
            RelayError::Auth(_) => "auth",
            RelayError::Forbidden(_) => "forbidden",
            RelayError::NotFound(_) => "not_found",
            RelayError::InvalidEvent(_) => "invalid_event",
            RelayError::Store(_) => "store",
        }
    }

    pub fn forbidden<T: Into<String>>(msg: T) -> Self {
        RelayError::Forbidden(msg.into())
    }

    pub fn not_found<T: Into<String>>(msg: T) -> Self {
        RelayError::NotFound(msg.into())
    }

    pub fn invalid_event<T: Into<String>>(msg: T) -> Self {
        RelayError::InvalidEvent(msg.into())
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        RelayError::InvalidEvent(err.to_string())
    }
}
