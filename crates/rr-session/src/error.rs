use rr_core::core::{AnnotatorId, RangeError, UnitKey, ValidationError};
use rr_store::StoreError;

/// Fatal errors raised while starting a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("annotator name must not be empty")]
    InvalidAnnotator,
    #[error("no more work available for {annotator}")]
    NoWork { annotator: AnnotatorId },
    #[error("unit of work {key} not found")]
    UnitNotFound { key: UnitKey },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Rejected judgment entry. The session stays usable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JudgmentError {
    #[error("annotation is finished")]
    Finished,
    #[error("enough context is implied while no rewrite is required")]
    ContextImplied,
    #[error(transparent)]
    Range(#[from] RangeError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}
