//! Storage backend trait for workflow checkpoints

use crate::{
    checkpoint::{Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointTuple},
    error::Result,
};
use async_trait::async_trait;
use futures::stream::Stream;
use std::pin::Pin;

/// Type alias for async stream of checkpoint tuples
pub type CheckpointStream =
    Pin<Box<dyn Stream<Item = Result<CheckpointTuple>> + Send + 'static>>;

/// Core trait for implementing checkpoint storage backends
///
/// Implementations must be `Send + Sync`; every workflow instance owns its own
/// `workflow_id` namespace, so backends never need cross-workflow coordination.
#[async_trait]
pub trait CheckpointSaver: Send + Sync {
    /// Fetch a checkpoint using the given configuration
    async fn get(&self, config: &CheckpointConfig) -> Result<Option<Checkpoint>> {
        Ok(self.get_tuple(config).await?.map(|tuple| tuple.checkpoint))
    }

    /// Fetch a checkpoint tuple
    ///
    /// Returns the checkpoint named by `config.checkpoint_id`, or the latest
    /// checkpoint of `config.workflow_id` when no id is given.
    async fn get_tuple(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>>;

    /// Latest checkpoint of a workflow
    async fn latest(&self, workflow_id: &str) -> Result<Option<CheckpointTuple>> {
        self.get_tuple(&CheckpointConfig::new(workflow_id)).await
    }

    /// List checkpoints, newest first
    ///
    /// * `workflow_id` - restrict to one workflow, or all workflows when `None`
    /// * `limit` - maximum number of tuples to yield
    async fn list(&self, workflow_id: Option<&str>, limit: Option<usize>)
        -> Result<CheckpointStream>;

    /// Store a checkpoint and return the config addressing it
    async fn put(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
    ) -> Result<CheckpointConfig>;

    /// Delete all checkpoints of a workflow
    async fn delete_workflow(&self, workflow_id: &str) -> Result<()> {
        let _ = workflow_id;
        Ok(())
    }
}
