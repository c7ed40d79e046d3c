//! Error types for checkpoint operations

use thiserror::Error;

/// Result type for checkpoint operations
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors raised by checkpoint savers
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// No checkpoint was ever written for this workflow
    #[error("No checkpoint stored for workflow {workflow_id}")]
    NoCheckpoints { workflow_id: String },

    /// Workflow id that cannot name a checkpoint directory
    #[error("Invalid workflow id '{0}': cannot be used as a directory name")]
    InvalidWorkflowId(String),

    #[error("JSON encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Binary encoding error: {0}")]
    Binary(#[from] bincode::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CheckpointError {
    pub fn no_checkpoints(workflow_id: impl Into<String>) -> Self {
        Self::NoCheckpoints {
            workflow_id: workflow_id.into(),
        }
    }
}
