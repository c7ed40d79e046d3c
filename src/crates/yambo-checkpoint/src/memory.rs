//! In-memory checkpoint storage for development and testing
//!
//! [`InMemoryCheckpointSaver`] keeps every checkpoint in an
//! `Arc<RwLock<HashMap<workflow_id, Vec<entry>>>>`. Entries are kept in insertion
//! order, so the latest checkpoint of a workflow is the last entry. Clones share
//! the same storage. Data is lost when the process exits.

use crate::{
    checkpoint::{Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointTuple},
    error::Result,
    traits::{CheckpointSaver, CheckpointStream},
};
use async_trait::async_trait;
use futures::stream;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Storage entry for in-memory checkpoints
#[derive(Debug, Clone)]
struct CheckpointEntry {
    checkpoint: Checkpoint,
    metadata: CheckpointMetadata,
    config: CheckpointConfig,
    parent_config: Option<CheckpointConfig>,
}

impl CheckpointEntry {
    fn to_tuple(&self) -> CheckpointTuple {
        CheckpointTuple {
            config: self.config.clone(),
            checkpoint: self.checkpoint.clone(),
            metadata: self.metadata.clone(),
            parent_config: self.parent_config.clone(),
        }
    }
}

/// Thread-safe in-memory checkpoint storage
type CheckpointStorage = Arc<RwLock<HashMap<String, Vec<CheckpointEntry>>>>;

/// In-memory checkpoint saver implementation
#[derive(Debug, Clone)]
pub struct InMemoryCheckpointSaver {
    storage: CheckpointStorage,
}

impl InMemoryCheckpointSaver {
    /// Create a new in-memory checkpoint saver
    pub fn new() -> Self {
        Self {
            storage: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Get the number of workflows being tracked
    pub async fn workflow_count(&self) -> usize {
        self.storage.read().await.len()
    }

    /// Get the total number of checkpoints across all workflows
    pub async fn checkpoint_count(&self) -> usize {
        self.storage
            .read()
            .await
            .values()
            .map(|entries| entries.len())
            .sum()
    }

    /// Clear all checkpoints (useful for testing)
    pub async fn clear(&self) {
        self.storage.write().await.clear();
    }
}

impl Default for InMemoryCheckpointSaver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CheckpointSaver for InMemoryCheckpointSaver {
    async fn get_tuple(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>> {
        let storage = self.storage.read().await;

        let Some(entries) = storage.get(&config.workflow_id) else {
            return Ok(None);
        };

        let entry = match &config.checkpoint_id {
            Some(checkpoint_id) => entries.iter().find(|e| &e.checkpoint.id == checkpoint_id),
            None => entries.last(),
        };

        Ok(entry.map(CheckpointEntry::to_tuple))
    }

    async fn list(
        &self,
        workflow_id: Option<&str>,
        limit: Option<usize>,
    ) -> Result<CheckpointStream> {
        let storage = self.storage.read().await;

        let mut entries: Vec<&CheckpointEntry> = match workflow_id {
            Some(id) => storage.get(id).map(|e| e.iter().collect()).unwrap_or_default(),
            None => storage.values().flatten().collect(),
        };
        entries.sort_by(|a, b| b.checkpoint.id.cmp(&a.checkpoint.id));

        let results: Vec<Result<CheckpointTuple>> = entries
            .into_iter()
            .take(limit.unwrap_or(usize::MAX))
            .map(|entry| Ok(entry.to_tuple()))
            .collect();

        Ok(Box::pin(stream::iter(results)))
    }

    async fn put(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
    ) -> Result<CheckpointConfig> {
        let mut storage = self.storage.write().await;
        let entries = storage
            .entry(config.workflow_id.clone())
            .or_insert_with(Vec::new);

        let parent_config = entries.last().map(|entry| entry.config.clone());
        let checkpoint_config =
            CheckpointConfig::new(config.workflow_id.clone()).with_checkpoint_id(checkpoint.id.clone());

        entries.push(CheckpointEntry {
            checkpoint,
            metadata,
            config: checkpoint_config.clone(),
            parent_config,
        });

        Ok(checkpoint_config)
    }

    async fn delete_workflow(&self, workflow_id: &str) -> Result<()> {
        self.storage.write().await.remove(workflow_id);
        Ok(())
    }
}
