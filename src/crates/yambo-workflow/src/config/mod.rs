//! Configuration for yambo-flow
//!
//! Defaults, then `~/.yambo-flow/config.toml`, then `./.yambo-flow/config.toml`,
//! then `YAMBO_FLOW_*` environment variables.

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::{FlowConfig, LoggingConfig, MergeConfig, WorkflowConfig};
