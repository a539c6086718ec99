use thiserror::Error;

use crate::pipeline::Stage;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("invalid timestamp: {0}")]
    Timestamp(String),
    #[error("unsupported schema version {found}; this build supports up to {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
    #[error("no story matches id prefix `{prefix}`")]
    NotFound { prefix: String },
    #[error("id prefix `{prefix}` is ambiguous ({} matches)", matches.len())]
    Ambiguous { prefix: String, matches: Vec<String> },
    #[error("story {id} does not exist")]
    MissingStory { id: String },
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Outcome of a failed stage call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StageError {
    /// External hiccup; the job stays at its last completed stage.
    #[error("{stage} failed (transient): {message}")]
    Transient { stage: Stage, message: String },
    /// Bad input or permanent rejection; the job moves to FAILED.
    #[error("{stage} failed (fatal): {message}")]
    Fatal { stage: Stage, message: String },
}

impl StageError {
    pub fn transient(stage: Stage, message: impl Into<String>) -> Self {
        StageError::Transient {
            stage,
            message: message.into(),
        }
    }

    pub fn fatal(stage: Stage, message: impl Into<String>) -> Self {
        StageError::Fatal {
            stage,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, StageError::Transient { .. })
    }

    pub fn stage(&self) -> Stage {
        match self {
            StageError::Transient { stage, .. } | StageError::Fatal { stage, .. } => *stage,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            StageError::Transient { message, .. } | StageError::Fatal { message, .. } => message,
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("cannot advance to {0}")]
    InvalidTarget(Stage),
    #[error(transparent)]
    Stage(#[from] StageError),
}
