//! Filesystem checkpoint storage
//!
//! Layout: `<root>/<workflow_id>/<checkpoint_id>.<ext>`, one record per file.
//! Since checkpoint ids sort by creation time, the latest checkpoint is the
//! lexicographically greatest file name in the workflow directory.

use crate::{
    checkpoint::{Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointTuple},
    error::{CheckpointError, Result},
    serializer::{JsonSerializer, SerializerProtocol},
    traits::{CheckpointSaver, CheckpointStream},
};
use async_trait::async_trait;
use futures::stream;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

/// On-disk record
#[derive(Debug, Serialize, Deserialize)]
struct CheckpointRecord {
    config: CheckpointConfig,
    checkpoint: Checkpoint,
    metadata: CheckpointMetadata,
    parent_config: Option<CheckpointConfig>,
}

impl From<CheckpointRecord> for CheckpointTuple {
    fn from(record: CheckpointRecord) -> Self {
        CheckpointTuple {
            config: record.config,
            checkpoint: record.checkpoint,
            metadata: record.metadata,
            parent_config: record.parent_config,
        }
    }
}

/// Checkpoint saver writing one file per checkpoint
#[derive(Debug)]
pub struct FileCheckpointSaver<S: SerializerProtocol = JsonSerializer> {
    root: PathBuf,
    serializer: S,
    // serializes put() so parent links stay consistent
    write_lock: Mutex<()>,
}

impl FileCheckpointSaver<JsonSerializer> {
    /// Create a JSON-backed saver rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_serializer(root, JsonSerializer::new())
    }
}

impl<S: SerializerProtocol> FileCheckpointSaver<S> {
    pub fn with_serializer(root: impl Into<PathBuf>, serializer: S) -> Self {
        Self {
            root: root.into(),
            serializer,
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn workflow_dir(&self, workflow_id: &str) -> Result<PathBuf> {
        if workflow_id.is_empty()
            || workflow_id == "."
            || workflow_id == ".."
            || workflow_id.contains(['/', '\\'])
        {
            return Err(CheckpointError::InvalidWorkflowId(workflow_id.to_string()));
        }
        Ok(self.root.join(workflow_id))
    }

    fn record_path(&self, workflow_id: &str, checkpoint_id: &str) -> Result<PathBuf> {
        Ok(self
            .workflow_dir(workflow_id)?
            .join(format!("{}.{}", checkpoint_id, self.serializer.extension())))
    }

    /// Checkpoint ids stored for a workflow, oldest first
    async fn checkpoint_ids(&self, workflow_id: &str) -> Result<Vec<String>> {
        let dir = self.workflow_dir(workflow_id)?;
        if !tokio::fs::try_exists(&dir).await? {
            return Ok(Vec::new());
        }

        let suffix = format!(".{}", self.serializer.extension());
        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(id) = name.strip_suffix(&suffix) {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn workflow_ids(&self) -> Result<Vec<String>> {
        if !tokio::fs::try_exists(&self.root).await? {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                ids.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        Ok(ids)
    }

    async fn read_record(&self, workflow_id: &str, checkpoint_id: &str) -> Result<CheckpointRecord> {
        let path = self.record_path(workflow_id, checkpoint_id)?;
        let bytes = tokio::fs::read(&path).await?;
        self.serializer.loads(&bytes)
    }
}

#[async_trait]
impl<S: SerializerProtocol + 'static> CheckpointSaver for FileCheckpointSaver<S> {
    async fn get_tuple(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>> {
        let checkpoint_id = match &config.checkpoint_id {
            Some(id) => {
                if !tokio::fs::try_exists(self.record_path(&config.workflow_id, id)?).await? {
                    return Ok(None);
                }
                id.clone()
            }
            None => match self.checkpoint_ids(&config.workflow_id).await?.pop() {
                Some(id) => id,
                None => return Ok(None),
            },
        };

        let record = self.read_record(&config.workflow_id, &checkpoint_id).await?;
        Ok(Some(record.into()))
    }

    async fn list(
        &self,
        workflow_id: Option<&str>,
        limit: Option<usize>,
    ) -> Result<CheckpointStream> {
        let workflows = match workflow_id {
            Some(id) => vec![id.to_string()],
            None => self.workflow_ids().await?,
        };

        let mut addressed = Vec::new();
        for workflow in workflows {
            for id in self.checkpoint_ids(&workflow).await? {
                addressed.push((workflow.clone(), id));
            }
        }
        addressed.sort_by(|a, b| b.1.cmp(&a.1));
        addressed.truncate(limit.unwrap_or(usize::MAX));

        let mut results = Vec::with_capacity(addressed.len());
        for (workflow, id) in addressed {
            results.push(self.read_record(&workflow, &id).await.map(CheckpointTuple::from));
        }

        Ok(Box::pin(stream::iter(results)))
    }

    async fn put(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
    ) -> Result<CheckpointConfig> {
        let _guard = self.write_lock.lock().await;

        let dir = self.workflow_dir(&config.workflow_id)?;
        tokio::fs::create_dir_all(&dir).await?;

        let parent_config = self
            .checkpoint_ids(&config.workflow_id)
            .await?
            .pop()
            .map(|id| CheckpointConfig::new(config.workflow_id.clone()).with_checkpoint_id(id));

        let checkpoint_config = CheckpointConfig::new(config.workflow_id.clone())
            .with_checkpoint_id(checkpoint.id.clone());
        let path = self.record_path(&config.workflow_id, &checkpoint.id)?;

        let record = CheckpointRecord {
            config: checkpoint_config.clone(),
            checkpoint,
            metadata,
            parent_config,
        };
        let bytes = self.serializer.dumps(&record)?;

        // write-then-rename so a crash never leaves a truncated latest record
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(path = %path.display(), bytes = bytes.len(), "Checkpoint written");
        Ok(checkpoint_config)
    }

    async fn delete_workflow(&self, workflow_id: &str) -> Result<()> {
        let dir = self.workflow_dir(workflow_id)?;
        if tokio::fs::try_exists(&dir).await? {
            tokio::fs::remove_dir_all(&dir).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::CheckpointSource;
    use crate::serializer::BincodeSerializer;
    use futures::StreamExt;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_saver_resumes_latest() {
        let dir = TempDir::new().unwrap();
        let saver = FileCheckpointSaver::new(dir.path());
        let config = CheckpointConfig::new("ywfl-7");

        saver
            .put(&config, Checkpoint::new(serde_json::json!({"step": "scf"})), CheckpointMetadata::new())
            .await
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        saver
            .put(
                &config,
                Checkpoint::new(serde_json::json!({"step": "gw"})),
                CheckpointMetadata::new().with_source(CheckpointSource::Step),
            )
            .await
            .unwrap();

        // a fresh saver over the same directory sees the same history
        let reopened = FileCheckpointSaver::new(dir.path());
        let latest = reopened.latest("ywfl-7").await.unwrap().unwrap();
        assert_eq!(latest.checkpoint.state["step"], "gw");
        assert_eq!(latest.metadata.source, Some(CheckpointSource::Step));
        assert!(latest.parent_config.is_some());

        let all: Vec<_> = reopened.list(None, None).await.unwrap().collect().await;
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_bincode_file_saver() {
        let dir = TempDir::new().unwrap();
        let saver = FileCheckpointSaver::with_serializer(dir.path(), BincodeSerializer::new());
        let config = CheckpointConfig::new("bin");

        saver
            .put(&config, Checkpoint::new(serde_json::json!([1, 2, 3])), CheckpointMetadata::new())
            .await
            .unwrap();

        let latest = saver.latest("bin").await.unwrap().unwrap();
        assert_eq!(latest.checkpoint.state, serde_json::json!([1, 2, 3]));

        saver.delete_workflow("bin").await.unwrap();
        assert!(saver.latest("bin").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejects_path_like_workflow_id() {
        let dir = TempDir::new().unwrap();
        let saver = FileCheckpointSaver::new(dir.path());

        let err = saver
            .put(&CheckpointConfig::new("../escape"), Checkpoint::new(serde_json::json!(0)), CheckpointMetadata::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CheckpointError::InvalidWorkflowId(_)));
    }
}
