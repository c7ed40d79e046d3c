//! Serializable state of a running workflow

use crate::error::WorkflowExitCode;
use crate::inputs::{PwInputs, YamboInputs};
use crate::provenance::NodeId;
use crate::qp::{NscfMapping, QpSubset, QpSubsetSpec};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Next calculation the main loop submits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStep {
    #[default]
    Scf,
    Nscf,
    Yambo,
    QpSplitter,
    Finished,
}

impl fmt::Display for WorkflowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Scf => "scf",
            Self::Nscf => "nscf",
            Self::Yambo => "yambo",
            Self::QpSplitter => "QP splitter",
            Self::Finished => "workflow is finished",
        })
    }
}

/// What the awaited nodes become once they return
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AwaitPurpose {
    /// The new reference calculation
    Calculation,
    /// One batch of split QP runs, checked together
    QpBatch,
    Bse,
}

/// Calculations submitted by a step, to be awaited by the driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Awaiting {
    pub ids: Vec<NodeId>,
    pub purpose: AwaitPurpose,
}

impl Awaiting {
    pub fn calculation(id: NodeId) -> Self {
        Self {
            ids: vec![id],
            purpose: AwaitPurpose::Calculation,
        }
    }

    pub fn batch(ids: Vec<NodeId>) -> Self {
        Self {
            ids,
            purpose: AwaitPurpose::QpBatch,
        }
    }

    pub fn bse(id: NodeId) -> Self {
        Self {
            ids: vec![id],
            purpose: AwaitPurpose::Bse,
        }
    }
}

/// Result of [`crate::YamboWorkflow::perform_next`]
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Await(Awaiting),
    Exit(WorkflowExitCode),
}

/// Everything the workflow has decided so far
///
/// Written to the checkpoint after every step; a resumed workflow continues
/// from here without re-submitting anything already submitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowContext {
    pub step: WorkflowStep,
    /// Start-up decision taken
    pub started: bool,
    /// Reference calculation: the parent, then the last scf, nscf or yambo run
    pub calc: Option<NodeId>,
    /// Bands the yambo run needs from nscf
    pub gwbands: u32,
    pub redo_nscf: bool,

    pub scf_inputs: Option<PwInputs>,
    pub nscf_inputs: Option<PwInputs>,
    pub yambo_inputs: Option<YamboInputs>,

    pub qp_subsets: Option<QpSubsetSpec>,
    pub subsets_materialized: bool,
    /// Subsets not yet submitted; popped from the end
    pub subset_queue: Vec<QpSubset>,
    pub submitted_subsets: Vec<QpSubset>,
    /// Split runs launched so far, counting whole batches
    pub qp_splitter: usize,
    pub splitted_qp: Vec<NodeId>,
    pub last_batch: Vec<NodeId>,

    pub mapping: Option<NscfMapping>,
    pub merged_qp: Option<PathBuf>,
    pub post_processed: bool,
    pub bse_checked: bool,
    pub bse: Option<NodeId>,

    /// Submitted but not yet collected
    pub pending: Option<Awaiting>,
    pub exit_code: Option<WorkflowExitCode>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_names() {
        assert_eq!(WorkflowStep::QpSplitter.to_string(), "QP splitter");
        assert_eq!(
            serde_json::to_value(WorkflowStep::QpSplitter).unwrap(),
            "qp_splitter"
        );
    }

    #[test]
    fn test_context_roundtrip_with_pending_batch() {
        let ctx = WorkflowContext {
            step: WorkflowStep::QpSplitter,
            started: true,
            subset_queue: vec![vec![[1, 2, 4, 5]]],
            pending: Some(Awaiting::batch(vec![NodeId(4), NodeId(5)])),
            ..Default::default()
        };
        let json = serde_json::to_value(&ctx).unwrap();
        let back: WorkflowContext = serde_json::from_value(json).unwrap();
        assert_eq!(back, ctx);
    }
}
