use insights_model::ModelError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InsightsError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    /// An optimistic concurrency check failed or the entity already exists.
    #[error("Concurrency conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The referenced record has not been written yet.
    #[error("Not ready: {0}")]
    NotReady(String),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("{failed} of {total} leaves failed")]
    LeafFailures { failed: usize, total: usize },

    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Invalid driver parameters: {0}")]
    InvalidParameters(String),

    #[error("Too many attempts: {0}")]
    TooManyAttempts(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl InsightsError {
    /// Whether redelivering the message that produced this error can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            InsightsError::Conflict(_)
                | InsightsError::NotReady(_)
                | InsightsError::Transient(_)
                | InsightsError::LeafFailures { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, InsightsError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, InsightsError::Conflict(_))
    }
}

pub type Result<T> = std::result::Result<T, InsightsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_matches_retry_policy() {
        assert!(InsightsError::Conflict("etag".into()).is_retryable());
        assert!(InsightsError::NotReady("scan".into()).is_retryable());
        assert!(
            InsightsError::LeafFailures {
                failed: 1,
                total: 3
            }
            .is_retryable()
        );
        assert!(!InsightsError::Invariant("extra page".into()).is_retryable());
        assert!(!InsightsError::Unsupported("driver".into()).is_retryable());
        assert!(
            !InsightsError::Model(ModelError::InvalidVersion("x".into()))
                .is_retryable()
        );
    }
}
