//! Failure taxonomy shared by the combat engine, battle map and chat paths.

use axum::http::StatusCode;

use crate::store::StoreError;

/// Structured failure reported to the immediate caller. None of these are
/// retried automatically; state already broadcast to other clients is never
/// rolled back by a later local failure.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    /// Malformed or out-of-range input; the caller must correct and retry.
    #[error("validation: {0}")]
    Validation(String),
    /// The caller lacks permission for the requested mutation.
    #[error("not allowed: {0}")]
    Authorization(String),
    /// Operation not valid in the current state, e.g. advancing a turn while
    /// no combat is active. The caller should re-sync before retrying.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Persistence layer failure; safe to retry.
    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl EngineError {
    pub fn status(&self) -> StatusCode {
        match self {
            EngineError::Validation(_) => StatusCode::BAD_REQUEST,
            EngineError::Authorization(_) => StatusCode::FORBIDDEN,
            EngineError::InvalidState(_) => StatusCode::CONFLICT,
            EngineError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
