//! Calculation nodes and the parent chain that links them
//!
//! A node is produced by the host and only read here. Nodes are connected by
//! remote folders: a calculation consumes its parent's folder through
//! `inputs.parent_folder` and publishes its own as `outputs.remote_folder`.
//! The lookups below walk that chain backwards with a hard depth cap.

use crate::error::{Result, WorkflowError};
use crate::host::CalculationHost;
use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use yambo_parser::{Dataset, OutputParameters, YamboParameters, YamboSettings};

/// Maximum number of hops for any parent-chain walk
pub const MAX_PARENT_DEPTH: usize = 32;

/// Host-assigned primary key of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What produced a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessType {
    /// A single pw.x run
    PwCalculation,
    /// The restarting wrapper around pw.x
    PwBaseWorkflow,
    /// A single yambo (or p2y) run
    YamboCalculation,
    /// The restarting wrapper around yambo
    YamboRestart,
    /// A full GW/BSE workflow
    YamboWorkflow,
    Other(String),
}

impl ProcessType {
    pub fn is_pw(&self) -> bool {
        matches!(self, Self::PwCalculation | Self::PwBaseWorkflow)
    }

    pub fn is_yambo(&self) -> bool {
        matches!(
            self,
            Self::YamboCalculation | Self::YamboRestart | Self::YamboWorkflow
        )
    }

    pub fn is_workflow(&self) -> bool {
        matches!(
            self,
            Self::PwBaseWorkflow | Self::YamboRestart | Self::YamboWorkflow
        )
    }
}

/// `CONTROL.calculation` of a pw.x run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PwCalculationType {
    Scf,
    Nscf,
    Bands,
    Relax,
    VcRelax,
    Md,
}

impl PwCalculationType {
    /// Runs whose charge density can seed an NSCF step
    pub fn is_ground_state(&self) -> bool {
        matches!(self, Self::Scf | Self::Relax | Self::VcRelax)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scf => "scf",
            Self::Nscf => "nscf",
            Self::Bands => "bands",
            Self::Relax => "relax",
            Self::VcRelax => "vc-relax",
            Self::Md => "md",
        }
    }
}

impl FromStr for PwCalculationType {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scf" => Ok(Self::Scf),
            "nscf" => Ok(Self::Nscf),
            "bands" => Ok(Self::Bands),
            "relax" => Ok(Self::Relax),
            "vc-relax" => Ok(Self::VcRelax),
            "md" => Ok(Self::Md),
            other => Err(WorkflowError::InvalidInputs(format!(
                "unknown pw calculation type {}",
                other
            ))),
        }
    }
}

impl fmt::Display for PwCalculationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// pw.x input namelists, `namelist -> key -> value`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PwParameters(BTreeMap<String, BTreeMap<String, Value>>);

impl PwParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, namelist: &str, key: &str, value: impl Into<Value>) -> Self {
        self.set(namelist, key, value);
        self
    }

    pub fn get(&self, namelist: &str, key: &str) -> Option<&Value> {
        self.0.get(namelist).and_then(|n| n.get(key))
    }

    pub fn set(&mut self, namelist: &str, key: &str, value: impl Into<Value>) {
        self.0
            .entry(namelist.to_string())
            .or_default()
            .insert(key.to_string(), value.into());
    }

    pub fn remove(&mut self, namelist: &str, key: &str) -> Option<Value> {
        self.0.get_mut(namelist).and_then(|n| n.remove(key))
    }

    /// `CONTROL.calculation`, `scf` when unset as in pw.x
    pub fn calculation(&self) -> Result<PwCalculationType> {
        match self.get("CONTROL", "calculation").and_then(Value::as_str) {
            Some(kind) => kind.parse(),
            None => Ok(PwCalculationType::Scf),
        }
    }

    pub fn nbnd(&self) -> Option<u32> {
        self.get("SYSTEM", "nbnd")
            .and_then(Value::as_u64)
            .map(|n| n as u32)
    }

    pub fn ecutwfc(&self) -> Option<f64> {
        self.get("SYSTEM", "ecutwfc").and_then(Value::as_f64)
    }
}

/// Parsed outputs of a pw.x run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PwOutputs {
    /// eV
    pub fermi_energy: f64,
    pub spin_orbit_calculation: bool,
    pub number_of_electrons: f64,
    /// Crystal coordinates
    pub kpoints: Vec<[f64; 3]>,
    /// Kohn-Sham eigenvalues in eV, `[k-point, band]`
    pub bands: Array2<f64>,
}

/// Working directory a calculation left on the compute resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteFolder {
    pub uuid: Uuid,
    pub path: String,
    /// The directory was cleaned after the run
    #[serde(default)]
    pub is_empty: bool,
}

impl RemoteFolder {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            path: path.into(),
            is_empty: false,
        }
    }

    pub fn cleaned(mut self) -> Self {
        self.is_empty = true;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeInputs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pw_parameters: Option<PwParameters>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yambo_parameters: Option<YamboParameters>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yambo_settings: Option<YamboSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_folder: Option<RemoteFolder>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeOutputs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_folder: Option<RemoteFolder>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pw: Option<PwOutputs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_parameters: Option<OutputParameters>,
    /// Parser datasets keyed by output link
    #[serde(default)]
    pub datasets: BTreeMap<String, Dataset>,
}

/// Provenance record of one process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationNode {
    pub id: NodeId,
    pub uuid: Uuid,
    pub process_type: ProcessType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub ctime: DateTime<Utc>,
    pub inputs: NodeInputs,
    pub outputs: NodeOutputs,
    /// `None` while the process is still running
    pub exit_status: Option<i32>,
    pub finished_ok: bool,
}

impl CalculationNode {
    pub fn new(id: NodeId, process_type: ProcessType) -> Self {
        Self {
            id,
            uuid: Uuid::new_v4(),
            process_type,
            label: None,
            ctime: Utc::now(),
            inputs: NodeInputs::default(),
            outputs: NodeOutputs::default(),
            exit_status: None,
            finished_ok: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.exit_status.is_some()
    }

    pub fn is_finished_ok(&self) -> bool {
        self.finished_ok
    }

    /// `CONTROL.calculation` for pw nodes
    pub fn pw_calculation(&self) -> Option<PwCalculationType> {
        if !self.process_type.is_pw() {
            return None;
        }
        self.inputs
            .pw_parameters
            .as_ref()
            .and_then(|p| p.calculation().ok())
    }

    pub fn nbnd(&self) -> Option<u32> {
        self.inputs.pw_parameters.as_ref().and_then(PwParameters::nbnd)
    }

    pub fn remote_folder(&self) -> Result<&RemoteFolder> {
        self.outputs
            .remote_folder
            .as_ref()
            .ok_or_else(|| WorkflowError::missing_output(self.id, "remote_folder"))
    }

    pub fn pw_outputs(&self) -> Result<&PwOutputs> {
        self.outputs
            .pw
            .as_ref()
            .ok_or_else(|| WorkflowError::missing_output(self.id, "output_band"))
    }

    pub fn dataset(&self, link: &str) -> Option<&Dataset> {
        self.outputs.datasets.get(link)
    }
}

/// Follow `caller` links up to the top-level process
pub async fn outermost_caller(
    host: &dyn CalculationHost,
    node: CalculationNode,
) -> Result<CalculationNode> {
    let mut current = node;
    for _ in 0..MAX_PARENT_DEPTH {
        match host.caller(current.id).await? {
            Some(caller) => current = caller,
            None => return Ok(current),
        }
    }
    Err(WorkflowError::ancestor(current.id, "top-level caller"))
}

/// The top-level process that produced a remote folder
pub async fn take_calc_from_remote(
    host: &dyn CalculationHost,
    folder: &RemoteFolder,
) -> Result<CalculationNode> {
    let creator = host.creator(folder).await?.ok_or_else(|| {
        WorkflowError::Host(format!("remote folder {} has no creator", folder.uuid))
    })?;
    outermost_caller(host, creator).await
}

/// One hop up the chain
///
/// Wrapper processes descend to the calculation that created their remote
/// folder; everything else follows its input parent folder.
pub async fn upstream(
    host: &dyn CalculationHost,
    node: &CalculationNode,
) -> Result<Option<CalculationNode>> {
    if node.process_type.is_workflow() {
        if let Some(folder) = &node.outputs.remote_folder {
            if let Some(inner) = host.creator(folder).await? {
                if inner.id != node.id {
                    return Ok(Some(inner));
                }
            }
        }
    }
    match &node.inputs.parent_folder {
        Some(folder) => host.creator(folder).await,
        None => Ok(None),
    }
}

/// Nearest successful pw.x ancestor (or the node itself) of one of `calc_types`
pub async fn find_pw_parent(
    host: &dyn CalculationHost,
    node: &CalculationNode,
    calc_types: &[PwCalculationType],
) -> Result<CalculationNode> {
    let wanted = || {
        calc_types
            .iter()
            .map(PwCalculationType::as_str)
            .collect::<Vec<_>>()
            .join("|")
    };

    let mut current = node.clone();
    for _ in 0..MAX_PARENT_DEPTH {
        if let Some(kind) = current.pw_calculation() {
            if calc_types.contains(&kind) && current.is_finished_ok() {
                return Ok(current);
            }
        }
        match upstream(host, &current).await? {
            Some(parent) => current = parent,
            None => return Err(WorkflowError::ancestor(node.id, wanted())),
        }
    }
    Err(WorkflowError::ancestor(node.id, wanted()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pw_parameters_accessors() {
        let params = PwParameters::new()
            .with("CONTROL", "calculation", "nscf")
            .with("SYSTEM", "nbnd", 120)
            .with("SYSTEM", "ecutwfc", 60.0);

        assert_eq!(params.calculation().unwrap(), PwCalculationType::Nscf);
        assert_eq!(params.nbnd(), Some(120));
        assert_eq!(params.ecutwfc(), Some(60.0));
        assert_eq!(PwParameters::new().calculation().unwrap(), PwCalculationType::Scf);
    }

    #[test]
    fn test_calculation_type_parsing() {
        assert_eq!("vc-relax".parse::<PwCalculationType>().unwrap(), PwCalculationType::VcRelax);
        assert!(PwCalculationType::Relax.is_ground_state());
        assert!(!PwCalculationType::Nscf.is_ground_state());
        assert!("phonon".parse::<PwCalculationType>().is_err());
    }

    #[test]
    fn test_node_serde_roundtrip_keeps_datasets() {
        let mut node = CalculationNode::new(NodeId(3), ProcessType::YamboCalculation);
        node.outputs.datasets.insert(
            "QP_db".to_string(),
            Dataset::SingleFile {
                filename: "ndb.QP".to_string(),
                content: vec![1, 2, 3],
            },
        );
        let json = serde_json::to_string(&node).unwrap();
        let back: CalculationNode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, node);
    }
}
