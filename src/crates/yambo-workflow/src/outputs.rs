//! What a finished workflow exposes

use crate::corrections::ScissorFit;
use crate::error::WorkflowExitCode;
use crate::provenance::{CalculationNode, NodeId, RemoteFolder};
use crate::qp::NscfMapping;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use yambo_parser::{Dataset, OutputParameters};

/// Outputs forwarded from the calculation that represents the workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposedOutputs {
    pub node: NodeId,
    pub remote_folder: Option<RemoteFolder>,
    pub output_parameters: Option<OutputParameters>,
    pub datasets: BTreeMap<String, Dataset>,
}

impl From<&CalculationNode> for ExposedOutputs {
    fn from(node: &CalculationNode) -> Self {
        Self {
            node: node.id,
            remote_folder: node.outputs.remote_folder.clone(),
            output_parameters: node.outputs.output_parameters.clone(),
            datasets: node.outputs.datasets.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowOutputs {
    pub workflow_id: String,
    /// `None` when the workflow completed successfully
    pub exit_code: Option<WorkflowExitCode>,
    pub exposed: Option<ExposedOutputs>,
    #[serde(rename = "output_ywfl_parameters")]
    pub parsed: Option<BTreeMap<String, f64>>,
    pub nscf_mapping: Option<NscfMapping>,
    #[serde(rename = "splitted_QP_calculations")]
    pub splitted_qp_calculations: Vec<NodeId>,
    #[serde(rename = "merged_QP")]
    pub merged_qp: Option<PathBuf>,
    pub scissor: Option<ScissorFit>,
    pub completed_at: DateTime<Utc>,
}

impl WorkflowOutputs {
    pub fn new(workflow_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            exit_code: None,
            exposed: None,
            parsed: None,
            nscf_mapping: None,
            splitted_qp_calculations: Vec::new(),
            merged_qp: None,
            scissor: None,
            completed_at: Utc::now(),
        }
    }

    pub fn failed(workflow_id: impl Into<String>, code: WorkflowExitCode) -> Self {
        Self {
            exit_code: Some(code),
            ..Self::new(workflow_id)
        }
    }

    pub fn is_ok(&self) -> bool {
        self.exit_code.is_none()
    }
}
