//! Error taxonomy for the inspection core.
//!
//! The storage layer works in `anyhow::Result` like the rest of `db/`. Domain
//! errors raised inside a database task travel through `anyhow` and are
//! recovered here by downcasting, so callers always match on `HseqError`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HseqError {
    /// Malformed input, rejected before any write.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("inspection {control_id} has {unevaluated} unevaluated checkpoint(s)")]
    IncompleteInspection {
        control_id: String,
        unevaluated: usize,
    },

    #[error("invalid non-conformity transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Item materialization failed after the session row was written. The
    /// session row has been rolled back.
    #[error("control {control_id} could not be created with its checklist: {reason}")]
    PartialCreationFailure { control_id: String, reason: String },

    #[error("sync failure: {0}")]
    SyncFailure(String),

    /// The history append failed; the triggering change was rolled back.
    #[error("audit write failed for non-conformity {nc_id}: {reason}")]
    AuditWriteFailure { nc_id: String, reason: String },

    #[error("control {0} is already finalized")]
    SessionClosed(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("{operation} timed out")]
    Timeout { operation: &'static str },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Store(anyhow::Error),
}

impl HseqError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Failures that a later attempt may not hit again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HseqError::Timeout { .. } | HseqError::Store(_) | HseqError::SyncFailure(_)
        )
    }
}

impl From<anyhow::Error> for HseqError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<HseqError>() {
            Ok(domain) => domain,
            Err(other) => HseqError::Store(other),
        }
    }
}

pub type HseqResult<T> = std::result::Result<T, HseqError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_survive_anyhow_round_trip() {
        let wrapped: anyhow::Error = HseqError::SessionClosed("c-1".into()).into();
        match HseqError::from(wrapped) {
            HseqError::SessionClosed(id) => assert_eq!(id, "c-1"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn foreign_errors_become_store_errors() {
        let err = HseqError::from(anyhow::anyhow!("disk full"));
        assert!(matches!(err, HseqError::Store(_)));
        assert!(err.is_retryable());
        assert!(!HseqError::Validation("x".into()).is_retryable());
    }
}
