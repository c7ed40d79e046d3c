//! # yambo-checkpoint - Context Persistence for Workflow Steps
//!
//! Trait-based checkpoint abstractions for persisting and restoring the context of
//! a running yambo workflow. A workflow writes one checkpoint after every step
//! (cold-start decision, each submission batch, post-processing, BSE) so that a
//! driver which lost its process can pick up at the last suspension point.
//!
//! ## Core Concepts
//!
//! ### 1. CheckpointSaver Trait
//!
//! The [`CheckpointSaver`] trait defines the interface for persistence backends:
//!
//! - **`put()`** - Save a checkpoint for a workflow
//! - **`get_tuple()`** - Retrieve a checkpoint by config (latest when no id is given)
//! - **`list()`** - Query the checkpoint history of one or all workflows
//! - **`delete_workflow()`** - Drop all checkpoints of a workflow
//!
//! ### 2. Checkpoint Structure
//!
//! A [`Checkpoint`] holds a format version, a monotonically increasing id, a
//! timestamp and the serialized workflow state as a JSON value. The workflow
//! crate owns the state schema; this crate never interprets it.
//!
//! ### 3. Backends
//!
//! - [`InMemoryCheckpointSaver`] - reference implementation for tests and short runs
//! - [`FileCheckpointSaver`] - one directory per workflow on local disk, encoded
//!   through a [`SerializerProtocol`] (JSON or bincode)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use yambo_checkpoint::{
//!     Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointSaver,
//!     InMemoryCheckpointSaver,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let saver = InMemoryCheckpointSaver::new();
//!
//!     let config = CheckpointConfig::new("ywfl-1");
//!     let checkpoint = Checkpoint::new(serde_json::json!({"step": "nscf"}));
//!     let saved = saver.put(&config, checkpoint, CheckpointMetadata::default()).await?;
//!
//!     if let Some(tuple) = saver.get_tuple(&saved).await? {
//!         println!("restored: {}", tuple.checkpoint.state);
//!     }
//!     Ok(())
//! }
//! ```

pub mod checkpoint;
pub mod error;
pub mod file;
pub mod memory;
pub mod serializer;
pub mod traits;

pub use checkpoint::{
    Checkpoint, CheckpointConfig, CheckpointId, CheckpointMetadata, CheckpointSource,
    CheckpointTuple,
};
pub use error::{CheckpointError, Result};
pub use file::FileCheckpointSaver;
pub use memory::InMemoryCheckpointSaver;
pub use serializer::{BincodeSerializer, JsonSerializer, SerializerProtocol};
pub use traits::{CheckpointSaver, CheckpointStream};
