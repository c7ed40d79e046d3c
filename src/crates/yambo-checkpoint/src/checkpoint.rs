//! Checkpoint data structures
//!
//! A checkpoint is a snapshot of a workflow context taken at a suspension point.
//! Ids are built from a zero-padded nanosecond timestamp followed by a random
//! suffix, so lexicographic order equals creation order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Checkpoint ID type
pub type CheckpointId = String;

/// What produced the checkpoint
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointSource {
    /// Written after the start-up decision (before any submission)
    Start,
    /// Written after a step handler submitted and awaited its calculations
    Step,
    /// Written after merging split quasiparticle databases
    PostProcess,
    /// Written after the BSE-on-GW run returned
    Bse,
    /// Written once the workflow reached a terminal state
    Final,
}

/// Metadata associated with a checkpoint
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CheckpointMetadata {
    /// The source of the checkpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<CheckpointSource>,

    /// Step counter of the workflow when the checkpoint was taken
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<u32>,

    /// Human readable label (the step that will run next)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Additional custom metadata
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl CheckpointMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: CheckpointSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_step(mut self, step: u32) -> Self {
        self.step = Some(step);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// State snapshot at a given point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// The version of the checkpoint format
    pub v: i32,

    /// The ID of the checkpoint (unique and monotonically increasing)
    pub id: CheckpointId,

    /// The timestamp of the checkpoint
    pub ts: DateTime<Utc>,

    /// Serialized workflow context
    pub state: serde_json::Value,
}

impl Checkpoint {
    /// Current checkpoint format version
    pub const CURRENT_VERSION: i32 = 1;

    /// Create a checkpoint holding `state`
    pub fn new(state: serde_json::Value) -> Self {
        let ts = Utc::now();
        Self {
            v: Self::CURRENT_VERSION,
            id: Self::next_id(ts),
            ts,
            state,
        }
    }

    fn next_id(ts: DateTime<Utc>) -> CheckpointId {
        let nanos = ts.timestamp_nanos_opt().unwrap_or_default().max(0);
        let suffix = Uuid::new_v4().simple().to_string();
        format!("{:020}-{}", nanos, &suffix[..8])
    }
}

/// Addresses one workflow's checkpoints, or one checkpoint within it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckpointConfig {
    /// Workflow the checkpoints belong to
    pub workflow_id: String,

    /// Specific checkpoint ID (latest when absent)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<CheckpointId>,
}

impl CheckpointConfig {
    pub fn new(workflow_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            checkpoint_id: None,
        }
    }

    pub fn with_checkpoint_id(mut self, checkpoint_id: CheckpointId) -> Self {
        self.checkpoint_id = Some(checkpoint_id);
        self
    }
}

/// A checkpoint together with its addressing and metadata
#[derive(Debug, Clone)]
pub struct CheckpointTuple {
    pub config: CheckpointConfig,
    pub checkpoint: Checkpoint,
    pub metadata: CheckpointMetadata,
    /// Checkpoint that was the latest one when this one was written
    pub parent_config: Option<CheckpointConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_sort_by_creation() {
        let first = Checkpoint::new(serde_json::json!(1));
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = Checkpoint::new(serde_json::json!(2));

        assert!(first.id < second.id);
        assert_eq!(first.v, Checkpoint::CURRENT_VERSION);
    }

    #[test]
    fn test_checkpoint_metadata() {
        let metadata = CheckpointMetadata::new()
            .with_source(CheckpointSource::Step)
            .with_step(3)
            .with_label("QP splitter")
            .with_extra("parallel_runs", serde_json::json!(4));

        assert_eq!(metadata.source, Some(CheckpointSource::Step));
        assert_eq!(metadata.step, Some(3));
        assert_eq!(metadata.label.as_deref(), Some("QP splitter"));
        assert_eq!(metadata.extra.get("parallel_runs"), Some(&serde_json::json!(4)));
    }
}
