//! Stage-level error types
//!
//! Record-level problems never surface here: the validator turns them into
//! rejected rows. What reaches a caller is either a fatal abort (retries
//! exhausted, permanent delivery failure), a missing artifact, or an
//! unexpected collaborator error.

use thiserror::Error;
use uuid::Uuid;

pub type StageResult<T> = std::result::Result<T, StageError>;

#[derive(Debug, Error)]
pub enum StageError {
    /// Stage aborted; no event was published
    #[error("{stage} aborted: {reason}")]
    Fatal {
        stage: &'static str,
        correlation_id: Option<Uuid>,
        reason: String,
    },

    /// Artifact referenced by an event does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// sdp-common error
    #[error("Common error: {0}")]
    Common(#[from] sdp_common::Error),
}

impl StageError {
    pub fn fatal(stage: &'static str, correlation_id: Option<Uuid>, reason: impl Into<String>) -> Self {
        StageError::Fatal {
            stage,
            correlation_id,
            reason: reason.into(),
        }
    }

    /// Whether the stage gave up and needs operator attention
    pub fn is_fatal(&self) -> bool {
        match self {
            StageError::Fatal { .. } => true,
            StageError::Common(err) => matches!(
                err,
                sdp_common::Error::RetriesExhausted { .. } | sdp_common::Error::Permanent(_)
            ),
            StageError::NotFound(_) => false,
        }
    }
}

impl From<sqlx::Error> for StageError {
    fn from(err: sqlx::Error) -> Self {
        StageError::Common(sdp_common::Error::Database(err))
    }
}
