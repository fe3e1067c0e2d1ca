//! Error types for the dispatch pipeline.

use thiserror::Error;

/// Errors raised while admitting or routing jobs.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("malformed notification payload: {0}")]
    MalformedPayload(String),

    #[error("dispatcher is not running")]
    Closed,
}

impl DispatchError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedPayload(reason.into())
    }
}

/// Failure of a single outbound call. The display text becomes the `error`
/// column of the failed request row.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("{0}")]
    Other(String),
}

/// Failure of a statement batch submitted to the store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error("statement rejected: {0}")]
    Rejected(String),

    #[error("failed to decode result: {0}")]
    Decode(String),
}
