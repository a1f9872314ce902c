//! Error types for the relay core.

use thiserror::Error;

use crate::types::AccountId;

/// Failure to hand a message to one listener connection.
#[derive(Debug, Error)]
pub enum SendError {
    /// The remote end is gone
    #[error("connection closed")]
    Closed,

    /// The outbound buffer is full (backpressure)
    #[error("outbound buffer full")]
    Full,

    /// Transport-level write failure
    #[error("transport error: {0}")]
    Transport(String),
}

impl SendError {
    /// Whether the handle that produced this error should be evicted.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SendError::Full)
    }
}

/// Identity token verification failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("unsupported token algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("invalid token signature")]
    BadSignature,

    #[error("token expired")]
    Expired,

    #[error("token has no subject")]
    MissingSubject,
}

/// Account store backend failures.
#[derive(Debug, Error)]
pub enum AccountStoreError {
    #[error("account store unavailable: {0}")]
    Backend(String),
}

/// Registry refused an operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("registry is shutting down")]
    ShuttingDown,
}

/// Rejected inbound push requests.
#[derive(Debug, Error)]
pub enum PushError {
    #[error("invalid account: {0}")]
    UnknownAccount(AccountId),

    #[error("code is required")]
    CodeRequired,

    #[error("account lookup failed: {0}")]
    AccountLookup(#[from] AccountStoreError),
}

/// Reasons a listener connection was not admitted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    #[error("identity token missing")]
    MissingToken,

    #[error("identity token rejected: {0}")]
    InvalidToken(#[from] VerifyError),

    #[error("registry is shutting down")]
    ShuttingDown,

    #[error("session already left the pending state")]
    NotPending,
}

impl From<RegistryError> for AdmissionError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::ShuttingDown => AdmissionError::ShuttingDown,
        }
    }
}
