//! Error types shared by every store in the crate.
//!
//! Store adapters report failures as [`StoreError`]; the higher-level stores wrap those in
//! [`Error`] alongside their own domain failures. Callers that need to map errors onto a
//! transport (HTTP status codes and so on) should match on [`Error::kind`] rather than on
//! individual variants.

use thiserror::Error;

/// Failures raised by a [`KeyValueStore`](crate::store::KeyValueStore) implementation.
///
/// These never carry a backend-specific error type so callers do not need to know which
/// store is in use.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached, or the connection dropped mid-request.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The request did not complete within the configured timeout. The operation may or may
    /// not have been applied.
    #[error("store operation timed out: {0}")]
    Timeout(String),

    /// The store answered with an error (wrong value type, script failure, ...).
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Broad classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The store is unreachable or rejected the request. Safe to retry idempotent reads.
    StoreUnavailable,
    /// The outcome of the request is unknown. Check resulting state before retrying writes.
    StoreTimeout,
    /// The entity is not in a state that allows the operation.
    InvalidState,
    /// A payload could not be encoded or decoded.
    Serialization,
    /// The write conflicts with existing data.
    ValidationConflict,
}

/// Every failure a store or the [`Rollcall`](crate::Rollcall) facade can report.
#[derive(Debug, Error)]
pub enum Error {
    /// The key-value store failed; see [`StoreError`].
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The session is closed, expired or unknown.
    #[error("session `{session_id}` is closed or does not exist")]
    SessionNotOpen { session_id: String },

    /// The token is unknown, expired or already redeemed.
    #[error("access token is invalid, expired, or has already been used")]
    TokenInvalid,

    /// The token was issued for a different session. It is spent all the same.
    #[error("access token does not belong to session `{session_id}`")]
    TokenMismatch { session_id: String },

    /// The participant already has a record in this session.
    #[error("participant `{participant_id}` already submitted attendance for session `{session_id}`")]
    DuplicateRecord {
        session_id: String,
        participant_id: String,
    },

    /// A payload could not be serialized.
    #[error("failed to encode payload: {0}")]
    Encode(String),

    /// Stored bytes could not be deserialized.
    #[error("failed to decode payload: {0}")]
    Decode(String),

    /// Settings could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl Error {
    /// Returns the [`ErrorKind`] this error belongs to.
    ///
    /// Configuration errors only occur before any store is built and are reported as
    /// [`ErrorKind::InvalidState`].
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Store(StoreError::Timeout(_)) => ErrorKind::StoreTimeout,
            Error::Store(_) => ErrorKind::StoreUnavailable,
            Error::SessionNotOpen { .. }
            | Error::TokenInvalid
            | Error::TokenMismatch { .. }
            | Error::Config(_) => ErrorKind::InvalidState,
            Error::Encode(_) | Error::Decode(_) => ErrorKind::Serialization,
            Error::DuplicateRecord { .. } => ErrorKind::ValidationConflict,
        }
    }

    /// Whether retrying the same call could reasonably succeed.
    ///
    /// Timeouts are excluded: the first attempt may already have been applied.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::StoreUnavailable
    }
}

/// Result alias defaulting to this crate's [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;
