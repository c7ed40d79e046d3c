//! # yambo-workflow - GW/BSE Workflow State Machine
//!
//! Plans and drives the chain of Quantum ESPRESSO and Yambo calculations
//! needed for a quasiparticle (GW) result, and optionally a Bethe-Salpeter
//! run on top of it:
//!
//! - **Restart from any parent**: an scf, nscf or yambo folder is resolved
//!   through its provenance and the workflow starts at the first step still
//!   missing
//! - **QP splitting**: large quasiparticle sets are cut into subsets run in
//!   parallel batches, then merged into one database
//! - **BSE on GW**: the merged database feeds a BSE run whose band window is
//!   derived from the computed states
//! - **Additional parsing**: gaps, band edges, excitons and a scissor fit
//! - **Checkpoints**: the context is saved after every step and
//!   [`YamboWorkflow::resume`] continues from the latest one
//!
//! Calculations are never run here. They are submitted to a
//! [`CalculationHost`], which owns the nodes and the scheduler;
//! [`InMemoryHost`] is a scripted host for tests and local use.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use yambo_workflow::{ConfigLoader, InMemoryHost, WorkflowInputs, YamboWorkflow};
//!
//! let config = ConfigLoader::new().load().await?;
//! yambo_workflow::logging::init_logging(&config.logging)?;
//!
//! let inputs = WorkflowInputs::new().with_scf(scf).with_nscf(nscf).with_yres(gw);
//! let mut workflow = YamboWorkflow::new(inputs, Arc::new(InMemoryHost::succeeding()))
//!     .with_config(config);
//! let outputs = workflow.run().await?;
//! ```

pub mod config;
pub mod corrections;
pub mod error;
pub mod host;
pub mod inputs;
pub mod logging;
pub mod merge;
pub mod outputs;
pub mod provenance;
pub mod qp;
pub mod state;
pub mod workflow;

pub use config::{ConfigLoader, FlowConfig, LoggingConfig, MergeConfig, WorkflowConfig};
pub use corrections::{AdditionalQuantity, QpStates, ScissorFit};
pub use error::{Result, WorkflowError, WorkflowExitCode};
pub use host::{CalculationHost, InMemoryHost, ScriptedResult, SubmitKind, SubmitRequest};
pub use inputs::{PwInputs, WorkflowInputs, YamboInputs};
pub use merge::{QpMerger, YambopyMerger};
pub use outputs::{ExposedOutputs, WorkflowOutputs};
pub use provenance::{
    CalculationNode, NodeId, ProcessType, PwCalculationType, PwOutputs, PwParameters, RemoteFolder,
};
pub use qp::{NscfMapping, QpMapper, QpRange, QpSubset, QpSubsetSpec};
pub use state::{AwaitPurpose, Awaiting, Transition, WorkflowContext, WorkflowStep};
pub use workflow::YamboWorkflow;
