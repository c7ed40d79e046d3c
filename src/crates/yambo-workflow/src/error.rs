//! Error types for the workflow state machine

use crate::provenance::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type for workflow operations
pub type Result<T> = std::result::Result<T, WorkflowError>;

/// Errors raised while planning or driving a workflow
#[derive(Error, Debug)]
pub enum WorkflowError {
    /// Configuration could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Inputs are missing or inconsistent
    #[error("Invalid inputs: {0}")]
    InvalidInputs(String),

    /// The host does not know the node
    #[error("Node {0} not found")]
    NodeNotFound(NodeId),

    /// Walking the parent chain did not reach the wanted ancestor
    #[error("No {wanted} ancestor of node {from}")]
    AncestorNotFound { from: NodeId, wanted: String },

    /// The energy window search ran out of attempts
    #[error("No quasiparticle window found after {attempts} attempts (last tolerance {tolerance:.3} eV)")]
    NoQpWindow { attempts: u32, tolerance: f64 },

    /// A node lacks an output the step needs
    #[error("Node {node} has no {output} output")]
    MissingOutput { node: NodeId, output: String },

    /// The host runtime failed
    #[error("Host error: {0}")]
    Host(String),

    /// The QP merge utility failed
    #[error("QP merge failed: {0}")]
    Merge(String),

    /// A step was invoked in a state that does not allow it
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] yambo_checkpoint::CheckpointError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkflowError {
    pub fn ancestor(from: NodeId, wanted: impl Into<String>) -> Self {
        Self::AncestorNotFound {
            from,
            wanted: wanted.into(),
        }
    }

    pub fn missing_output(node: NodeId, output: impl Into<String>) -> Self {
        Self::MissingOutput {
            node,
            output: output.into(),
        }
    }
}

/// Exit codes reported by a workflow that could not complete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowExitCode {
    ErrorWorkchainFailed,
}

impl WorkflowExitCode {
    pub fn code(&self) -> u32 {
        match self {
            Self::ErrorWorkchainFailed => 300,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::ErrorWorkchainFailed => "The workchain failed with an unrecoverable error.",
        }
    }
}

impl fmt::Display for WorkflowExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message())
    }
}
