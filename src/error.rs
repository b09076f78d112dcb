//! Error types shared by the reputation cache, risk gate and stores.

use thiserror::Error;

/// Failure of a reputation lookup.
///
/// Neither variant is ever cached; a later lookup retries the provider.
#[derive(Debug, Error)]
pub enum LookupError {
    /// The provider could not be reached or refused the request
    /// (network error, timeout, non-2xx, rate limit, missing credential).
    #[error("reputation lookup unavailable: {0}")]
    Unavailable(String),

    /// The provider answered but the expected fields were absent.
    #[error("malformed reputation response: {0}")]
    MalformedResponse(String),
}

impl From<reqwest::Error> for LookupError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LookupError::Unavailable("request timed out".to_string())
        } else {
            LookupError::Unavailable(format!("HTTP error: {}", e))
        }
    }
}

/// Failure of the event log or report store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("abuse report {0} not found")]
    NotFound(i64),

    #[error("abuse report {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: i64,
        from: String,
        to: String,
    },

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Failure of a risk evaluation.
#[derive(Debug, Error)]
pub enum EvaluationError {
    /// The event log could not be queried. Callers decide whether to
    /// fail open or closed.
    #[error("risk evaluation unavailable: {0}")]
    Unavailable(#[from] StoreError),
}
