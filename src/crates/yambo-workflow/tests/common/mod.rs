//! Common test utilities and fixtures

#![allow(dead_code)]

use async_trait::async_trait;
use ndarray::array;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tempfile::TempDir;
use yambo_parser::{links, ArrayData, Dataset, VariableValue, YamboParameters};
use yambo_workflow::host::CalculationHost;
use yambo_workflow::provenance::NodeInputs;
use yambo_workflow::{
    CalculationNode, FlowConfig, InMemoryHost, NodeId, ProcessType, PwInputs, PwOutputs,
    PwParameters, QpMerger, RemoteFolder, Result, ScriptedResult, SubmitRequest, WorkflowError,
    YamboInputs,
};

/// Scratch directory plus a config pointing the merge staging into it
pub fn test_config() -> (TempDir, FlowConfig) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let mut config = FlowConfig::default();
    config.workflow.scratch_dir = Some(temp_dir.path().to_path_buf());
    (temp_dir, config)
}

/// Two k-points, eight bands, eight electrons
///
/// Valence top 0.0 eV at k1, conduction bottom 1.5 eV at k2.
pub fn insulator() -> PwOutputs {
    PwOutputs {
        fermi_energy: 0.5,
        spin_orbit_calculation: false,
        number_of_electrons: 8.0,
        kpoints: vec![[0.0, 0.0, 0.0], [0.5, 0.0, 0.0]],
        bands: array![
            [-6.0, -4.0, -2.0, 0.0, 2.0, 4.0, 6.0, 8.0],
            [-6.2, -4.2, -2.3, -0.3, 1.5, 3.5, 5.5, 7.5],
        ],
    }
}

/// Correction applied by the scripted GW runs
pub fn qp_shift(band: i64, eo: f64) -> f64 {
    if band <= 4 {
        -0.3
    } else {
        0.5 + 0.05 * eo
    }
}

pub fn scf_parameters() -> PwParameters {
    PwParameters::new()
        .with("CONTROL", "calculation", "scf")
        .with("SYSTEM", "ecutwfc", 60.0)
}

pub fn nscf_parameters(nbnd: u32) -> PwParameters {
    PwParameters::new()
        .with("CONTROL", "calculation", "nscf")
        .with("SYSTEM", "nbnd", nbnd)
}

pub fn gw_parameters(bands: u32) -> YamboParameters {
    let range = VariableValue::List(vec![1.0, bands as f64]);
    YamboParameters::new()
        .with_argument("gw0")
        .with_argument("ppa")
        .with_variable("BndsRnXp", range.clone(), "")
        .with_variable("GbndRnge", range, "")
        .with_variable(
            "QPkrange",
            VariableValue::Table(vec![vec![1.0, 2.0, 4.0, 5.0]]),
            "",
        )
}

pub fn bse_parameters() -> YamboParameters {
    YamboParameters::new()
        .with_argument("optics")
        .with_argument("bse")
        .with_argument("bss")
        .with_variable("BSENGexx", VariableValue::Scalar(10.0), "Ry")
}

pub fn scf_inputs() -> PwInputs {
    PwInputs::new(scf_parameters())
}

/// nscf inputs without a band count, raised by the workflow
pub fn nscf_inputs() -> PwInputs {
    PwInputs::new(PwParameters::new().with("CONTROL", "calculation", "nscf"))
}

pub fn gw_inputs(bands: u32) -> YamboInputs {
    YamboInputs::new(gw_parameters(bands))
}

pub fn bse_inputs() -> YamboInputs {
    YamboInputs::new(bse_parameters())
}

/// `array_ndb` dataset with every state of `ranges`
pub fn qp_dataset(ranges: &[[i64; 4]]) -> Dataset {
    let bands = insulator().bands;
    let (mut k, mut b, mut e, mut eo) = (Vec::new(), Vec::new(), Vec::new(), Vec::new());
    for range in ranges {
        for kp in range[0]..=range[1] {
            for band in range[2]..=range[3] {
                let Some(energy) = bands.get(((kp - 1) as usize, (band - 1) as usize)) else {
                    continue;
                };
                k.push(kp as f64);
                b.push(band as f64);
                eo.push(*energy);
                e.push(energy + qp_shift(band, *energy));
            }
        }
    }

    let mut array = ArrayData::new();
    array.set_vector("kpoint", k);
    array.set_vector("band", b);
    array.set_vector("E", e);
    array.set_vector("Eo", eo);
    Dataset::Array(array)
}

pub fn exciton_dataset() -> Dataset {
    let mut array = ArrayData::new();
    array.set_vector("energies", vec![1.9, 2.3, 2.8]);
    array.set_vector("intensities", vec![0.1, 5.0, 1.2]);
    Dataset::Array(array)
}

/// Result of a scripted calculation, by call label
pub fn script(request: &SubmitRequest) -> ScriptedResult {
    match request.label.as_str() {
        "scf" => ScriptedResult::ok(),
        "nscf" => ScriptedResult::ok().with_pw(insulator()),
        "bse" => ScriptedResult::ok().with_dataset(links::ARRAY_EXCITONIC_STATES, exciton_dataset()),
        _ => {
            let ranges = request
                .as_yambo()
                .map(|inputs| inputs.parameters.qp_ranges())
                .unwrap_or_default();
            ScriptedResult::ok()
                .with_dataset(links::ARRAY_NDB, qp_dataset(&ranges))
                .with_dataset(
                    links::QP_DB,
                    Dataset::SingleFile {
                        filename: "ndb.QP".to_string(),
                        content: format!("{:?}\n", ranges).into_bytes(),
                    },
                )
        }
    }
}

/// Host running [`script`]
pub fn scripted_host() -> InMemoryHost {
    InMemoryHost::new(script)
}

/// Host running [`script`] except for one label, which fails
pub fn host_failing_on(label: &'static str) -> InMemoryHost {
    InMemoryHost::new(move |request| {
        if request.label == label {
            ScriptedResult::failed(302)
        } else {
            script(request)
        }
    })
}

pub fn folder_of(node: &CalculationNode) -> RemoteFolder {
    node.outputs.remote_folder.clone().expect("node has a remote folder")
}

pub async fn add_scf(host: &InMemoryHost) -> CalculationNode {
    let inputs = NodeInputs {
        pw_parameters: Some(scf_parameters()),
        ..Default::default()
    };
    host.add_node(ProcessType::PwCalculation, inputs, ScriptedResult::ok())
        .await
}

pub async fn add_nscf(host: &InMemoryHost, scf: &CalculationNode, nbnd: u32) -> CalculationNode {
    let inputs = NodeInputs {
        pw_parameters: Some(nscf_parameters(nbnd)),
        parent_folder: Some(folder_of(scf)),
        ..Default::default()
    };
    host.add_node(
        ProcessType::PwCalculation,
        inputs,
        ScriptedResult::ok().with_pw(insulator()),
    )
    .await
}

pub async fn add_cleaned_nscf(host: &InMemoryHost, scf: &CalculationNode, nbnd: u32) -> CalculationNode {
    let inputs = NodeInputs {
        pw_parameters: Some(nscf_parameters(nbnd)),
        parent_folder: Some(folder_of(scf)),
        ..Default::default()
    };
    host.add_node(
        ProcessType::PwCalculation,
        inputs,
        ScriptedResult::ok().with_pw(insulator()).with_clean_remote(),
    )
    .await
}

pub async fn add_gw(host: &InMemoryHost, nscf: &CalculationNode, bands: u32) -> CalculationNode {
    let parameters = gw_parameters(bands);
    let inputs = NodeInputs {
        yambo_parameters: Some(parameters.clone()),
        parent_folder: Some(folder_of(nscf)),
        ..Default::default()
    };
    host.add_node(
        ProcessType::YamboCalculation,
        inputs,
        ScriptedResult::ok().with_dataset(links::ARRAY_NDB, qp_dataset(&parameters.qp_ranges())),
    )
    .await
}

/// Labels of every submission, in order
pub async fn labels(host: &InMemoryHost) -> Vec<String> {
    host.submissions()
        .await
        .into_iter()
        .map(|(_, request)| request.label)
        .collect()
}

pub async fn submission(host: &InMemoryHost, label: &str) -> SubmitRequest {
    host.submissions()
        .await
        .into_iter()
        .find(|(_, request)| request.label == label)
        .map(|(_, request)| request)
        .unwrap_or_else(|| panic!("no submission labelled {}", label))
}

/// Merger concatenating its inputs and recording every call
#[derive(Default)]
pub struct RecordingMerger {
    pub calls: Mutex<Vec<Vec<PathBuf>>>,
}

impl RecordingMerger {
    pub fn calls(&self) -> Vec<Vec<PathBuf>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl QpMerger for RecordingMerger {
    async fn merge(&self, inputs: &[PathBuf], output: &Path) -> Result<PathBuf> {
        self.calls.lock().unwrap().push(inputs.to_vec());
        let mut merged = Vec::new();
        for input in inputs {
            merged.extend(tokio::fs::read(input).await?);
        }
        tokio::fs::write(output, merged).await?;
        Ok(output.to_path_buf())
    }
}

/// Host whose first wait on `label` fails, as if the connection dropped
pub struct InterruptingHost {
    pub inner: InMemoryHost,
    label: String,
    tripped: AtomicBool,
}

impl InterruptingHost {
    pub fn new(inner: InMemoryHost, label: impl Into<String>) -> Self {
        Self {
            inner,
            label: label.into(),
            tripped: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl CalculationHost for InterruptingHost {
    async fn node(&self, id: NodeId) -> Result<CalculationNode> {
        self.inner.node(id).await
    }

    async fn creator(&self, folder: &RemoteFolder) -> Result<Option<CalculationNode>> {
        self.inner.creator(folder).await
    }

    async fn caller(&self, id: NodeId) -> Result<Option<CalculationNode>> {
        self.inner.caller(id).await
    }

    async fn submit(&self, request: SubmitRequest) -> Result<NodeId> {
        self.inner.submit(request).await
    }

    async fn await_all(&self, ids: &[NodeId]) -> Result<Vec<CalculationNode>> {
        for id in ids {
            let node = self.inner.node(*id).await?;
            if node.label.as_deref() == Some(self.label.as_str())
                && !self.tripped.swap(true, Ordering::SeqCst)
            {
                return Err(WorkflowError::Host("connection to the scheduler lost".to_string()));
            }
        }
        self.inner.await_all(ids).await
    }
}
