//! The runtime that owns nodes and executes calculations
//!
//! The state machine never schedules anything itself. It submits requests
//! through [`CalculationHost`] and suspends on [`CalculationHost::await_all`].

pub mod memory;

use crate::error::Result;
use crate::inputs::{PwInputs, YamboInputs};
use crate::provenance::{CalculationNode, NodeId, ProcessType, RemoteFolder};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use memory::{InMemoryHost, ScriptedResult};

/// A calculation to launch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitRequest {
    /// Call link label, e.g. `nscf` or `yambo_QP_splitted_3`
    pub label: String,
    pub kind: SubmitKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "process", rename_all = "snake_case")]
pub enum SubmitKind {
    PwBase(PwInputs),
    YamboRestart(YamboInputs),
}

impl SubmitRequest {
    pub fn pw(label: impl Into<String>, inputs: PwInputs) -> Self {
        Self {
            label: label.into(),
            kind: SubmitKind::PwBase(inputs),
        }
    }

    pub fn yambo(label: impl Into<String>, inputs: YamboInputs) -> Self {
        Self {
            label: label.into(),
            kind: SubmitKind::YamboRestart(inputs),
        }
    }

    pub fn process_type(&self) -> ProcessType {
        match self.kind {
            SubmitKind::PwBase(_) => ProcessType::PwBaseWorkflow,
            SubmitKind::YamboRestart(_) => ProcessType::YamboRestart,
        }
    }

    pub fn parent_folder(&self) -> Option<&RemoteFolder> {
        match &self.kind {
            SubmitKind::PwBase(inputs) => inputs.parent_folder.as_ref(),
            SubmitKind::YamboRestart(inputs) => inputs.parent_folder.as_ref(),
        }
    }

    pub fn as_yambo(&self) -> Option<&YamboInputs> {
        match &self.kind {
            SubmitKind::YamboRestart(inputs) => Some(inputs),
            SubmitKind::PwBase(_) => None,
        }
    }

    pub fn as_pw(&self) -> Option<&PwInputs> {
        match &self.kind {
            SubmitKind::PwBase(inputs) => Some(inputs),
            SubmitKind::YamboRestart(_) => None,
        }
    }
}

/// Provenance store and process launcher
#[async_trait]
pub trait CalculationHost: Send + Sync {
    /// Look up a node by id
    async fn node(&self, id: NodeId) -> Result<CalculationNode>;

    /// The node that produced a remote folder
    async fn creator(&self, folder: &RemoteFolder) -> Result<Option<CalculationNode>>;

    /// The process that called `id`, if any
    async fn caller(&self, id: NodeId) -> Result<Option<CalculationNode>>;

    /// Launch a calculation and return its node id without waiting
    async fn submit(&self, request: SubmitRequest) -> Result<NodeId>;

    /// Wait until every listed calculation terminated, in order
    async fn await_all(&self, ids: &[NodeId]) -> Result<Vec<CalculationNode>>;
}
