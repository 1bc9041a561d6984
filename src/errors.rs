use axum::http::StatusCode;
use thiserror::Error;

/// Failure taxonomy for ledger operations. `Conflict` is the only variant
/// that is safe to retry immediately; `NotFound` ticks are deferred to the
/// next scheduled run, and `Consistency` needs manual remediation of the
/// referral data.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("document {collection}/{id} not found")]
    NotFound { collection: String, id: String },

    #[error("referral data inconsistent: {0}")]
    Consistency(String),

    #[error("transaction conflict")]
    Conflict,

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl LedgerError {
    pub fn not_found(collection: &str, id: &str) -> LedgerError {
        LedgerError::NotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            LedgerError::Validation(_) => StatusCode::BAD_REQUEST,
            LedgerError::NotFound { .. } => StatusCode::NOT_FOUND,
            LedgerError::Consistency(_) => StatusCode::CONFLICT,
            LedgerError::Conflict | LedgerError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> LedgerError {
        LedgerError::Backend(err.to_string())
    }
}

impl From<mysql::Error> for LedgerError {
    fn from(err: mysql::Error) -> LedgerError {
        LedgerError::Backend(err.to_string())
    }
}
