//! Merging the partial `ndb.QP` databases of split runs

use crate::config::MergeConfig;
use crate::error::{Result, WorkflowError};
use crate::provenance::CalculationNode;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info};
use yambo_parser::links;

/// Combines quasiparticle databases into one file
#[async_trait]
pub trait QpMerger: Send + Sync {
    /// Merge `inputs` into `output` and return the path of the merged file
    async fn merge(&self, inputs: &[PathBuf], output: &Path) -> Result<PathBuf>;
}

/// Runs `<program> <subcommand> <dbs...> -o <output>`, `yambopy mergeqp` by default
#[derive(Debug, Clone)]
pub struct YambopyMerger {
    program: String,
    subcommand: String,
}

impl YambopyMerger {
    pub fn new(program: impl Into<String>, subcommand: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            subcommand: subcommand.into(),
        }
    }

    pub fn from_config(config: &MergeConfig) -> Self {
        Self::new(&config.program, &config.subcommand)
    }
}

impl Default for YambopyMerger {
    fn default() -> Self {
        Self::from_config(&MergeConfig::default())
    }
}

#[async_trait]
impl QpMerger for YambopyMerger {
    async fn merge(&self, inputs: &[PathBuf], output: &Path) -> Result<PathBuf> {
        if inputs.is_empty() {
            return Err(WorkflowError::Merge("no databases to merge".to_string()));
        }

        let mut cmd = Command::new(&self.program);
        if !self.subcommand.is_empty() {
            cmd.arg(&self.subcommand);
        }
        cmd.args(inputs)
            .arg("-o")
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(program = %self.program, inputs = inputs.len(), output = %output.display(), "Running QP merge");
        let result = cmd
            .output()
            .await
            .map_err(|e| WorkflowError::Merge(format!("cannot run {}: {}", self.program, e)))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(WorkflowError::Merge(match result.status.code() {
                Some(code) => format!("{} exited with {}: {}", self.program, code, stderr.trim()),
                None => format!("{} was killed", self.program),
            }));
        }
        if fs::metadata(output).await.is_err() {
            return Err(WorkflowError::Merge(format!(
                "{} did not write {}",
                self.program,
                output.display()
            )));
        }

        info!(output = %output.display(), inputs = inputs.len(), "QP databases merged");
        Ok(output.to_path_buf())
    }
}

/// Write the `QP_db` output of every node to `<dir>/<node-id>/ndb.QP`
pub async fn stage_qp_databases(nodes: &[CalculationNode], dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::with_capacity(nodes.len());
    for node in nodes {
        let (filename, content) = node
            .dataset(links::QP_DB)
            .and_then(|d| d.as_single_file())
            .ok_or_else(|| WorkflowError::missing_output(node.id, links::QP_DB))?;

        let node_dir = dir.join(node.id.to_string());
        fs::create_dir_all(&node_dir).await?;
        let path = node_dir.join(filename);
        fs::write(&path, content).await?;
        paths.push(path);
    }
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provenance::{NodeId, ProcessType};
    use tempfile::TempDir;
    use yambo_parser::Dataset;

    fn qp_node(id: u64, content: &[u8]) -> CalculationNode {
        let mut node = CalculationNode::new(NodeId(id), ProcessType::YamboRestart);
        node.outputs.datasets.insert(
            links::QP_DB.to_string(),
            Dataset::SingleFile {
                filename: "ndb.QP".to_string(),
                content: content.to_vec(),
            },
        );
        node
    }

    #[tokio::test]
    async fn test_stage_writes_one_file_per_node() {
        let dir = TempDir::new().unwrap();
        let paths = stage_qp_databases(&[qp_node(4, b"a"), qp_node(9, b"b")], dir.path())
            .await
            .unwrap();

        assert_eq!(paths[1], dir.path().join("9").join("ndb.QP"));
        assert_eq!(std::fs::read(&paths[0]).unwrap(), b"a");
    }

    #[tokio::test]
    async fn test_stage_requires_qp_db() {
        let dir = TempDir::new().unwrap();
        let node = CalculationNode::new(NodeId(1), ProcessType::YamboRestart);
        assert!(matches!(
            stage_qp_databases(&[node], dir.path()).await,
            Err(WorkflowError::MissingOutput { .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_merge_runs_program_with_output_flag() {
        let dir = TempDir::new().unwrap();
        // keeps the last database before `-o`
        let script = dir.path().join("mergeqp.sh");
        std::fs::write(
            &script,
            "while [ \"$1\" != \"-o\" ]; do last=\"$1\"; shift; done; cp \"$last\" \"$2\"\n",
        )
        .unwrap();
        let inputs = stage_qp_databases(&[qp_node(1, b"one"), qp_node(2, b"two")], dir.path())
            .await
            .unwrap();

        let merger = YambopyMerger::new("sh", script.to_string_lossy());
        let output = dir.path().join("ndb.QP_merged");
        let merged = merger.merge(&inputs, &output).await.unwrap();
        assert_eq!(std::fs::read(merged).unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_merge_reports_missing_program() {
        let merger = YambopyMerger::new("yambopy-does-not-exist", "mergeqp");
        let err = merger
            .merge(&[PathBuf::from("ndb.QP")], Path::new("out"))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Merge(_)));
    }
}
