//! Configuration loader with dual-location support
//!
//! Loads configuration from:
//! 1. Default values
//! 2. User-level config: ~/.yambo-flow/config.toml
//! 3. Project-level config: ./.yambo-flow/config.toml
//! 4. `YAMBO_FLOW_*` environment variables
//!
//! Later sources override earlier ones key by key. Files ending in `.yaml`
//! or `.yml` are read as YAML, everything else as TOML.

use crate::config::schema::FlowConfig;
use crate::error::{Result, WorkflowError};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

const CONFIG_DIR: &str = ".yambo-flow";
const CONFIG_FILE: &str = "config.toml";

/// Configuration loader that handles both user and project configs
pub struct ConfigLoader {
    user_config_path: PathBuf,
    project_config_path: PathBuf,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            user_config_path: Self::user_config_path(),
            project_config_path: Self::project_config_path(),
        }
    }

    /// Loader reading two explicit files
    pub fn with_paths(user: impl Into<PathBuf>, project: impl Into<PathBuf>) -> Self {
        Self {
            user_config_path: user.into(),
            project_config_path: project.into(),
        }
    }

    fn user_config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(CONFIG_DIR)
            .join(CONFIG_FILE)
    }

    fn project_config_path() -> PathBuf {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(CONFIG_DIR)
            .join(CONFIG_FILE)
    }

    /// Load configuration from both locations with project taking precedence
    pub async fn load(&self) -> Result<FlowConfig> {
        let mut merged = serde_json::to_value(FlowConfig::default())?;
        info!("Loading configuration with defaults");

        for (scope, path) in [
            ("user", &self.user_config_path),
            ("project", &self.project_config_path),
        ] {
            if !path.exists() {
                debug!(scope, path = %path.display(), "Config file not found");
                continue;
            }
            let layer = Self::read_value(path).await?;
            merge_values(&mut merged, layer);
            debug!(scope, path = %path.display(), "Loaded config");
        }

        let mut config: FlowConfig = serde_json::from_value(merged)
            .map_err(|e| WorkflowError::Config(format!("Invalid configuration: {}", e)))?;
        config.apply_env_overrides();

        info!("Configuration loaded successfully");
        Ok(config)
    }

    /// Load a single file on top of the defaults
    pub async fn load_from_path(&self, path: &Path) -> Result<FlowConfig> {
        let mut merged = serde_json::to_value(FlowConfig::default())?;
        merge_values(&mut merged, Self::read_value(path).await?);
        serde_json::from_value(merged)
            .map_err(|e| WorkflowError::Config(format!("Invalid configuration: {}", e)))
    }

    async fn read_value(path: &Path) -> Result<Value> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| WorkflowError::Config(format!("Failed to read {}: {}", path.display(), e)))?;

        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        let parsed = if is_yaml {
            serde_yaml::from_str::<Value>(&content).map_err(|e| e.to_string())
        } else {
            toml::from_str::<Value>(&content).map_err(|e| e.to_string())
        };
        parsed.map_err(|e| WorkflowError::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }

    pub fn get_user_config_path(&self) -> &PathBuf {
        &self.user_config_path
    }

    pub fn get_project_config_path(&self) -> &PathBuf {
        &self.project_config_path
    }

    pub fn user_config_exists(&self) -> bool {
        self.user_config_path.exists()
    }

    pub fn project_config_exists(&self) -> bool {
        self.project_config_path.exists()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Recursive merge of tables; any other value in `overlay` replaces `base`
fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (_, Value::Null) => {}
        (base, overlay) => *base = overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_paths() {
        let loader = ConfigLoader::new();
        assert!(loader.get_user_config_path().ends_with(".yambo-flow/config.toml"));
        assert!(loader.get_project_config_path().ends_with(".yambo-flow/config.toml"));
    }

    #[tokio::test]
    async fn test_load_returns_defaults_when_no_files() {
        let loader = ConfigLoader::with_paths("/nonexistent/user.toml", "/nonexistent/project.toml");
        let config = loader.load().await.unwrap();
        assert_eq!(config.merge.subcommand, "mergeqp");
        assert_eq!(config.workflow.tolerance_growth, 1.5);
    }

    #[tokio::test]
    async fn test_project_overrides_user_key_by_key() {
        let temp_dir = TempDir::new().unwrap();
        let user = temp_dir.path().join("user.toml");
        let project = temp_dir.path().join("project.yaml");

        fs::write(
            &user,
            "[workflow]\nmapper_max_attempts = 10\ntolerance_growth = 2.0\n\n[merge]\nprogram = \"/usr/bin/yambopy\"\n",
        )
        .await
        .unwrap();
        fs::write(&project, "workflow:\n  mapper_max_attempts: 20\nparser:\n  keep_scratch: true\n")
            .await
            .unwrap();

        let config = ConfigLoader::with_paths(&user, &project).load().await.unwrap();
        assert_eq!(config.workflow.mapper_max_attempts, 20);
        assert_eq!(config.workflow.tolerance_growth, 2.0);
        assert!(config.parser.keep_scratch);
        assert_eq!(config.parser.near_timeout_lower, -2.0);
        assert_eq!(config.logging.level, "info");
    }

    #[tokio::test]
    async fn test_invalid_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let user = temp_dir.path().join("user.toml");
        fs::write(&user, "[workflow\nbroken").await.unwrap();

        let loader = ConfigLoader::with_paths(&user, "/nonexistent/project.toml");
        assert!(matches!(loader.load().await, Err(WorkflowError::Config(_))));
    }

    #[test]
    fn test_merge_values_recurses() {
        let mut base = serde_json::json!({"a": {"x": 1, "y": 2}, "b": 3});
        merge_values(&mut base, serde_json::json!({"a": {"y": 5}, "c": 4}));
        assert_eq!(base, serde_json::json!({"a": {"x": 1, "y": 5}, "b": 3, "c": 4}));
    }
}
