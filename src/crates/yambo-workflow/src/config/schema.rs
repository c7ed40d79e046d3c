//! Configuration schema

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use yambo_parser::{ParserOptions, YamboParser};

/// Environment variable overriding `logging.level`
pub const ENV_LOG_LEVEL: &str = "YAMBO_FLOW_LOG_LEVEL";
/// Environment variable overriding `merge.program`
pub const ENV_MERGE_PROGRAM: &str = "YAMBO_FLOW_MERGE_PROGRAM";

/// Main configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FlowConfig {
    pub workflow: WorkflowConfig,
    pub merge: MergeConfig,
    /// Options handed to the result parser
    pub parser: ParserOptions,
    pub logging: LoggingConfig,
}

/// State machine tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Attempts of the energy-window QP search before giving up
    pub mapper_max_attempts: u32,

    /// Factor applied to the window tolerance after each failed attempt
    pub tolerance_growth: f64,

    /// Upper bound on split runs submitted in one batch
    pub max_parallel_runs: Option<usize>,

    /// Directory for staged QP databases (system temp dir when unset)
    pub scratch_dir: Option<PathBuf>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            mapper_max_attempts: 64,
            tolerance_growth: 1.5,
            max_parallel_runs: None,
            scratch_dir: None,
        }
    }
}

/// External QP merge utility
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    pub program: String,
    pub subcommand: String,
    /// File name of the merged database
    pub output_name: String,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            program: "yambopy".to_string(),
            subcommand: "mergeqp".to_string(),
            output_name: "ndb.QP_merged".to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    pub level: String,

    /// Log format: "compact", "pretty", "json"
    pub format: String,

    /// Enable colored output
    pub colored: bool,

    /// Show timestamps
    pub timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
            colored: true,
            timestamps: true,
        }
    }
}

impl FlowConfig {
    /// Result parser configured from the `parser` section, for hosts that parse retrieved folders
    pub fn parser(&self) -> YamboParser {
        YamboParser::new().with_options(self.parser.clone())
    }

    /// Apply `YAMBO_FLOW_*` overrides from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    /// Apply overrides from any variable lookup
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(level) = lookup(ENV_LOG_LEVEL).filter(|v| !v.is_empty()) {
            self.logging.level = level;
        }
        if let Some(program) = lookup(ENV_MERGE_PROGRAM).filter(|v| !v.is_empty()) {
            self.merge.program = program;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FlowConfig::default();
        assert_eq!(config.workflow.mapper_max_attempts, 64);
        assert_eq!(config.merge.program, "yambopy");
        assert_eq!(config.parser.near_timeout_upper, 0.16);
        assert_eq!(config.logging.format, "compact");
    }

    #[test]
    fn test_partial_sections_keep_defaults() {
        let config: FlowConfig = toml::from_str("[merge]\nprogram = \"/opt/yambopy\"\n").unwrap();
        assert_eq!(config.merge.program, "/opt/yambopy");
        assert_eq!(config.merge.subcommand, "mergeqp");
        assert_eq!(config.workflow, WorkflowConfig::default());
    }

    #[test]
    fn test_parser_uses_configured_window() {
        let mut config = FlowConfig::default();
        config.parser.near_timeout_upper = 0.3;
        assert_eq!(config.parser().options().near_timeout_upper, 0.3);
    }

    #[test]
    fn test_overrides() {
        let mut config = FlowConfig::default();
        config.apply_overrides_from(|name| match name {
            ENV_LOG_LEVEL => Some("debug".to_string()),
            ENV_MERGE_PROGRAM => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.merge.program, "yambopy");
    }
}
