//! Engine error types

use thiserror::Error;
use uuid::Uuid;

use crate::persistence::StoreError;

/// Errors from engine operations
///
/// These surface only for infrastructure problems and misuse of the
/// engine's API. Step-level failures never appear here: the runner
/// converts them into failed step results and terminal run states.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Store error
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Referenced step id does not exist in the definition
    #[error("unknown step: {0}")]
    UnknownStep(String),

    /// Condition definition cannot be evaluated
    #[error("malformed condition: {0}")]
    MalformedCondition(String),

    /// Approval signal sent to a run with no outstanding approval wait
    #[error("run {0} has no pending approval")]
    NoPendingApproval(Uuid),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
