use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoopgateError {
    #[error("invalid name '{0}': use letters, digits, '.', '_' or '-' and do not start with '.'")]
    InvalidName(String),

    #[error("phase '{phase}': context summary exceeds {limit} token limit (actual: {actual} tokens)")]
    SummaryTooLong {
        phase: String,
        actual: usize,
        limit: usize,
    },

    #[error("checkpoint not found: {0}")]
    CheckpointNotFound(String),

    #[error("no review state found: run 'loopgate run' first")]
    NoReviewState,

    #[error("reviewer loop is not awaiting output ({0}): run 'loopgate run --claude' first")]
    ReviewNotPending(String),

    #[error("git command failed: {0}")]
    Git(String),

    #[error("invalid scope: {0}")]
    InvalidScope(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LoopgateError>;
