//! The GW/BSE workflow state machine
//!
//! A [`YamboWorkflow`] drives Quantum ESPRESSO and Yambo calculations
//! from whatever parent it is given up to a converged quasiparticle (and
//! optionally excitonic) result.
//!
//! # Steps
//!
//! ```text
//!  parent folder ─► start_workflow ─┬─► Scf ─► Nscf ─► Yambo ─┬─────────────► Finished
//!                                   │           ▲       ▲     └─► QpSplitter ─┘  ▲ │
//!                                   └───────────┴───────┴──────────┘   │  ▲      │ │
//!                                                                      └──┘      │ ▼
//!                                                   post-processing ─► BSE gate ─► report_wf
//! ```
//!
//! [`YamboWorkflow::perform_next`] submits the calculations of one step and
//! returns what to wait for. [`YamboWorkflow::run`] is the driver: it awaits
//! through the [`CalculationHost`], checks the returned nodes on the next
//! entry and writes the [`WorkflowContext`] to the checkpoint saver after
//! every step, so [`YamboWorkflow::resume`] never re-submits work.
//!
//! # Failure
//!
//! A calculation that did not finish ok at a transition point ends the
//! workflow with [`WorkflowExitCode::ErrorWorkchainFailed`]; restarts are the
//! job of the layer below. Additional parsing and the scissor fit fail soft.

use crate::config::FlowConfig;
use crate::corrections::{
    add_corrections, additional_parsed, fit_scissor, AdditionalQuantity, QpStates, ScissorFit,
};
use crate::error::{Result, WorkflowError, WorkflowExitCode};
use crate::host::{CalculationHost, SubmitRequest};
use crate::inputs::{WorkflowInputs, YamboInputs};
use crate::logging::timed;
use crate::merge::{stage_qp_databases, QpMerger, YambopyMerger};
use crate::outputs::{ExposedOutputs, WorkflowOutputs};
use crate::provenance::{
    find_pw_parent, take_calc_from_remote, upstream, CalculationNode, NodeId, ProcessType,
    PwCalculationType, PwOutputs, RemoteFolder,
};
use crate::qp::{NscfMapping, QpAnalyzer, QpMapper};
use crate::state::{AwaitPurpose, Awaiting, Transition, WorkflowContext, WorkflowStep};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use yambo_checkpoint::{
    Checkpoint, CheckpointConfig, CheckpointError, CheckpointMetadata, CheckpointSaver,
    CheckpointSource,
};
use yambo_parser::VariableValue;

/// Ancestors tried when a parent's remote folder was cleaned
const MAX_EMPTY_UNWRAP: usize = 2;

/// Runs whose density can seed a new nscf step
const GROUND_STATE: &[PwCalculationType] = &[
    PwCalculationType::Scf,
    PwCalculationType::Relax,
    PwCalculationType::VcRelax,
];

const FAILED: WorkflowExitCode = WorkflowExitCode::ErrorWorkchainFailed;

/// Checkpointed state
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SavedState {
    inputs: WorkflowInputs,
    context: WorkflowContext,
    #[serde(default)]
    config: FlowConfig,
}

/// GW/BSE workflow over a [`CalculationHost`]
///
/// # Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use yambo_workflow::{InMemoryHost, WorkflowInputs, YamboWorkflow};
///
/// let host = Arc::new(InMemoryHost::succeeding());
/// let mut workflow = YamboWorkflow::new(inputs, host);
/// let outputs = workflow.run().await?;
/// assert!(outputs.is_ok());
/// ```
pub struct YamboWorkflow {
    id: String,
    inputs: WorkflowInputs,
    ctx: WorkflowContext,
    config: FlowConfig,
    host: Arc<dyn CalculationHost>,
    merger: Option<Arc<dyn QpMerger>>,
    saver: Option<Arc<dyn CheckpointSaver>>,
    saved_steps: u32,
}

impl YamboWorkflow {
    pub fn new(inputs: WorkflowInputs, host: Arc<dyn CalculationHost>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            inputs,
            ctx: WorkflowContext::default(),
            config: FlowConfig::default(),
            host,
            merger: None,
            saver: None,
            saved_steps: 0,
        }
    }

    /// Use a fixed workflow id (the checkpoint namespace)
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_config(mut self, config: FlowConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the `yambopy` merge utility built from the config
    pub fn with_merger(mut self, merger: Arc<dyn QpMerger>) -> Self {
        self.merger = Some(merger);
        self
    }

    pub fn with_checkpointer(mut self, saver: Arc<dyn CheckpointSaver>) -> Self {
        self.saver = Some(saver);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn inputs(&self) -> &WorkflowInputs {
        &self.inputs
    }

    pub fn context(&self) -> &WorkflowContext {
        &self.ctx
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    /// Rebuild a workflow from the latest checkpoint of `workflow_id`
    ///
    /// The saved [`FlowConfig`] is restored. A custom merger is not part of the
    /// checkpoint: chain [`with_merger`](Self::with_merger) again, or the
    /// merge program from the config is used.
    pub async fn resume(
        workflow_id: &str,
        host: Arc<dyn CalculationHost>,
        saver: Arc<dyn CheckpointSaver>,
    ) -> Result<Self> {
        let tuple = saver
            .latest(workflow_id)
            .await?
            .ok_or_else(|| CheckpointError::no_checkpoints(workflow_id))?;
        let saved: SavedState = serde_json::from_value(tuple.checkpoint.state)?;

        info!(
            workflow = workflow_id,
            checkpoint = %tuple.checkpoint.id,
            step = %saved.context.step,
            "Resuming workflow"
        );
        Ok(Self {
            id: workflow_id.to_string(),
            inputs: saved.inputs,
            ctx: saved.context,
            config: saved.config,
            host,
            merger: None,
            saver: Some(saver),
            saved_steps: tuple.metadata.step.map_or(0, |s| s + 1),
        })
    }

    /// Derive the per-step inputs from the workflow inputs
    pub fn validate_parameters(&mut self) -> Result<()> {
        let yambo = self
            .inputs
            .qp
            .clone()
            .or_else(|| self.inputs.yres.clone())
            .ok_or_else(|| {
                WorkflowError::InvalidInputs("either `qp` or `yres` inputs are required".to_string())
            })?;
        let gwbands = yambo.gw_bands();

        let mut nscf = self.inputs.nscf.clone();
        if let Some(nscf) = nscf.as_mut() {
            nscf.parameters.set("CONTROL", "calculation", "nscf");
            if nscf.parameters.nbnd().unwrap_or(0) < gwbands {
                debug!(nbnd = gwbands, "Raising nscf bands to the GW requirement");
                nscf.parameters.set("SYSTEM", "nbnd", gwbands);
            }
        }

        self.ctx.gwbands = gwbands;
        self.ctx.redo_nscf = self.inputs.redo_nscf;
        self.ctx.scf_inputs = self.inputs.scf.clone();
        self.ctx.nscf_inputs = nscf;
        self.ctx.yambo_inputs = Some(yambo);
        self.ctx.qp_subsets = self.inputs.qp_subset_dict.clone();
        Ok(())
    }

    /// Pick the first step from the parent folder
    ///
    /// Never fails: a parent that cannot be resolved means a cold start.
    pub async fn start_workflow(&mut self) {
        let resolved = match &self.inputs.parent_folder {
            Some(folder) => self.resolve_parent(folder).await,
            None => Err(WorkflowError::InvalidInputs("no parent folder".to_string())),
        };

        match resolved {
            Ok((calc, step)) => {
                info!(parent = %calc.id, process = ?calc.process_type, step = %step, "Starting from parent calculation");
                self.ctx.calc = (step != WorkflowStep::Scf).then_some(calc.id);
                self.ctx.step = step;
            }
            Err(err) => {
                info!(reason = %err, "Starting from scratch");
                self.ctx.calc = None;
                self.ctx.step = WorkflowStep::Scf;
            }
        }

        if self.ctx.step == WorkflowStep::Nscf {
            self.ctx.redo_nscf = false;
        }
        self.ctx.qp_splitter = 0;
        self.ctx.splitted_qp.clear();
        self.ctx.started = true;
    }

    async fn resolve_parent(&self, folder: &RemoteFolder) -> Result<(CalculationNode, WorkflowStep)> {
        let host = self.host.as_ref();
        let mut parent = take_calc_from_remote(host, folder).await?;

        if parent.process_type == ProcessType::PwBaseWorkflow {
            let inner = host.creator(parent.remote_folder()?).await?;
            if let Some(inner) = inner {
                parent = inner;
            }
        }

        let mut unwrapped = 0;
        while parent.remote_folder()?.is_empty {
            if unwrapped == MAX_EMPTY_UNWRAP {
                return Err(WorkflowError::InvalidState(format!(
                    "remote folder of node {} is empty",
                    parent.id
                )));
            }
            let above = upstream(host, &parent)
                .await?
                .ok_or_else(|| WorkflowError::ancestor(parent.id, "non-empty"))?;
            parent = find_pw_parent(host, &above, &[PwCalculationType::Scf, PwCalculationType::Nscf]).await?;
            unwrapped += 1;
            debug!(node = %parent.id, "Parent folder was cleaned, moved one ancestor up");
        }

        self.classify(parent).await
    }

    async fn classify(&self, parent: CalculationNode) -> Result<(CalculationNode, WorkflowStep)> {
        let host = self.host.as_ref();
        let enough_bands = |node: &CalculationNode| {
            !self.ctx.redo_nscf && node.nbnd().unwrap_or(0) >= self.ctx.gwbands
        };

        if parent.process_type.is_pw() {
            return match parent.pw_calculation() {
                Some(kind) if kind.is_ground_state() => Ok((parent, WorkflowStep::Nscf)),
                Some(PwCalculationType::Nscf) if enough_bands(&parent) => {
                    Ok((parent, WorkflowStep::Yambo))
                }
                Some(PwCalculationType::Nscf) => {
                    info!(nbnd = ?parent.nbnd(), gwbands = self.ctx.gwbands, "Recomputing nscf");
                    let scf = find_pw_parent(host, &parent, GROUND_STATE).await?;
                    Ok((scf, WorkflowStep::Nscf))
                }
                _ => Ok((parent, WorkflowStep::Scf)),
            };
        }

        if parent.process_type.is_yambo() {
            let nscf = find_pw_parent(host, &parent, &[PwCalculationType::Nscf]).await?;
            if !enough_bands(&nscf) {
                info!(nbnd = ?nscf.nbnd(), gwbands = self.ctx.gwbands, "Recomputing nscf");
                let scf = find_pw_parent(host, &nscf, GROUND_STATE).await?;
                return Ok((scf, WorkflowStep::Nscf));
            }

            // the reference is the calculation that holds the databases
            let mut reference = parent;
            if reference.process_type.is_workflow() {
                let inner = host.creator(reference.remote_folder()?).await?;
                if let Some(inner) = inner {
                    reference = inner;
                }
            }
            let step = if self.ctx.qp_subsets.is_some() {
                WorkflowStep::QpSplitter
            } else {
                WorkflowStep::Yambo
            };
            return Ok((reference, step));
        }

        Ok((parent, WorkflowStep::Scf))
    }

    pub fn can_continue(&self) -> bool {
        self.ctx.step != WorkflowStep::Finished && self.ctx.exit_code.is_none()
    }

    /// Check the last results and submit the next step
    pub async fn perform_next(&mut self) -> Result<Transition> {
        if let Some(id) = self.ctx.calc {
            let calc = self.host.node(id).await?;
            if !calc.is_finished_ok() {
                error!(node = %id, exit_status = ?calc.exit_status, "Last calculation failed, exiting the workflow");
                return Ok(Transition::Exit(FAILED));
            }
        }
        if let Some(failed) = self.failed_batch_member().await? {
            error!(node = %failed, "Split QP calculation failed, exiting the workflow");
            return Ok(Transition::Exit(FAILED));
        }

        info!(step = %self.ctx.step, "Performing next step");
        match self.ctx.step {
            WorkflowStep::Scf => self.submit_scf().await,
            WorkflowStep::Nscf => self.submit_nscf().await,
            WorkflowStep::Yambo => self.submit_yambo().await,
            WorkflowStep::QpSplitter => self.submit_qp_batch().await,
            WorkflowStep::Finished => Err(WorkflowError::InvalidState(
                "no step left to perform".to_string(),
            )),
        }
    }

    async fn submit_scf(&mut self) -> Result<Transition> {
        let inputs = self.ctx.scf_inputs.clone().ok_or_else(|| {
            WorkflowError::InvalidInputs("scf inputs are required to start from scratch".to_string())
        })?;
        let id = self.host.submit(SubmitRequest::pw("scf", inputs)).await?;
        info!(node = %id, "Submitted scf");

        self.ctx.step = WorkflowStep::Nscf;
        Ok(Transition::Await(Awaiting::calculation(id)))
    }

    async fn submit_nscf(&mut self) -> Result<Transition> {
        let parent = self.reference().await?;
        let mut inputs = self.ctx.nscf_inputs.clone().ok_or_else(|| {
            WorkflowError::InvalidInputs("nscf inputs are required to compute the bands".to_string())
        })?;
        inputs.parent_folder = Some(parent.remote_folder()?.clone());

        let id = self.host.submit(SubmitRequest::pw("nscf", inputs)).await?;
        info!(node = %id, parent = %parent.id, "Submitted nscf");

        self.ctx.step = WorkflowStep::Yambo;
        Ok(Transition::Await(Awaiting::calculation(id)))
    }

    async fn submit_yambo(&mut self) -> Result<Transition> {
        let parent = self.reference().await?;
        let mut inputs = self.yambo_inputs()?;
        inputs.parent_folder = Some(parent.remote_folder()?.clone());

        if !self.inputs.additional_parsing.is_empty() {
            let mapping = NscfMapping::from_pw(&self.nscf_outputs(&parent).await?)?;
            inputs.parameters =
                add_corrections(&inputs.parameters, &self.inputs.additional_parsing, &mapping);
            if let Some(stored) = self.ctx.yambo_inputs.as_mut() {
                stored.parameters = inputs.parameters.clone();
            }
            self.ctx.mapping = Some(mapping);
        }

        let id = self.host.submit(SubmitRequest::yambo("yambo", inputs)).await?;
        info!(node = %id, parent = %parent.id, "Submitted yambo");

        self.ctx.step = if self.ctx.qp_subsets.is_some() {
            WorkflowStep::QpSplitter
        } else {
            WorkflowStep::Finished
        };
        Ok(Transition::Await(Awaiting::calculation(id)))
    }

    async fn submit_qp_batch(&mut self) -> Result<Transition> {
        let spec = self
            .ctx
            .qp_subsets
            .clone()
            .ok_or_else(|| WorkflowError::InvalidState("QP splitter without subsets".to_string()))?;

        if !self.ctx.subsets_materialized {
            let calc = self.reference().await?;
            let mut inputs = self.yambo_inputs()?;
            if let Some(prior) = &calc.inputs.yambo_parameters {
                inputs.parameters = prior.clone();
            }
            inputs.parent_folder = Some(calc.remote_folder()?.clone());
            inputs.settings.copy_dbs = true;
            inputs.clean_workdir = true;

            let pw = self.nscf_outputs(&calc).await?;
            let mapping = NscfMapping::from_pw(&pw)?;
            let mapper = QpMapper::new(
                self.config.workflow.tolerance_growth,
                self.config.workflow.mapper_max_attempts,
            );
            let subsets = spec.materialize(&mapping, &pw, &mapper)?;
            info!(subsets = subsets.len(), per_subset = spec.qp_per_subset, "QP subsets ready");

            self.ctx.subset_queue = subsets;
            self.ctx.mapping = Some(mapping);
            self.ctx.yambo_inputs = Some(inputs);
            self.ctx.subsets_materialized = true;
        }

        let mut runs = spec.parallel_runs.max(1);
        if let Some(cap) = self.config.workflow.max_parallel_runs {
            runs = runs.min(cap.max(1));
        }

        let template = self.yambo_inputs()?;
        let mut ids = Vec::with_capacity(runs);
        for i in 1..=runs {
            let Some(subset) = self.ctx.subset_queue.pop() else {
                break;
            };
            let mut inputs = template.clone();
            inputs.parameters.set_qp_ranges(&subset);

            let label = format!("yambo_QP_splitted_{}", i + self.ctx.qp_splitter);
            let id = self.host.submit(SubmitRequest::yambo(&label, inputs)).await?;
            debug!(node = %id, label = %label, ranges = subset.len(), "Submitted split QP run");

            ids.push(id);
            self.ctx.splitted_qp.push(id);
            self.ctx.submitted_subsets.push(subset);
        }
        self.ctx.qp_splitter += runs;
        info!(batch = ids.len(), left = self.ctx.subset_queue.len(), "Submitted QP batch");

        if self.ctx.subset_queue.is_empty() {
            self.ctx.step = WorkflowStep::Finished;
        }
        Ok(Transition::Await(Awaiting::batch(ids)))
    }

    /// Wait for submitted calculations and record them in the context
    pub async fn collect(&mut self, awaiting: &Awaiting) -> Result<Vec<CalculationNode>> {
        let nodes = timed("await calculations", self.host.await_all(&awaiting.ids)).await?;
        for node in &nodes {
            info!(node = %node.id, label = ?node.label, ok = node.is_finished_ok(), "Calculation returned");
        }

        match awaiting.purpose {
            AwaitPurpose::Calculation => {
                if let Some(node) = nodes.last() {
                    self.ctx.calc = Some(node.id);
                }
            }
            AwaitPurpose::QpBatch => self.ctx.last_batch = awaiting.ids.clone(),
            AwaitPurpose::Bse => self.ctx.bse = nodes.last().map(|n| n.id),
        }
        Ok(nodes)
    }

    pub fn post_processing_needed(&self) -> bool {
        !self.ctx.splitted_qp.is_empty() && !self.is_initialise()
    }

    /// Merge the databases of the split runs into `merged_QP`
    ///
    /// Returns the exit code when a split run failed or the merge did.
    pub async fn run_post_process(&mut self) -> Result<Option<WorkflowExitCode>> {
        let mut nodes = Vec::with_capacity(self.ctx.splitted_qp.len());
        for id in &self.ctx.splitted_qp {
            let node = self.host.node(*id).await?;
            if !node.is_finished_ok() {
                error!(node = %id, "Split QP calculation failed, nothing to merge");
                return Ok(Some(FAILED));
            }
            nodes.push(node);
        }

        match self.merge_split_databases(&nodes).await {
            Ok(merged) => {
                info!(merged = %merged.display(), runs = nodes.len(), "Split QP databases merged");
                self.ctx.merged_qp = Some(merged);
                Ok(None)
            }
            Err(err) => {
                error!(error = %err, "Cannot merge split QP databases");
                Ok(Some(FAILED))
            }
        }
    }

    async fn merge_split_databases(&self, nodes: &[CalculationNode]) -> Result<PathBuf> {
        let dir = self
            .config
            .workflow
            .scratch_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
            .join(format!("yambo-flow-{}", self.id));
        fs::create_dir_all(&dir).await?;

        let staged = stage_qp_databases(nodes, &dir.join("split")).await?;
        let merger = self
            .merger
            .clone()
            .unwrap_or_else(|| Arc::new(YambopyMerger::from_config(&self.config.merge)));
        merger.merge(&staged, &dir.join(&self.config.merge.output_name)).await
    }

    pub fn should_run_bse(&self) -> bool {
        self.inputs.qp.is_some() && self.ctx.merged_qp.is_some() && !self.is_initialise()
    }

    /// Submit the BSE run on top of the merged quasiparticles
    pub async fn prepare_and_run_bse(&mut self) -> Result<Awaiting> {
        let calc = self.reference().await?;
        let merged = self
            .ctx
            .merged_qp
            .clone()
            .ok_or_else(|| WorkflowError::InvalidState("BSE without merged QP database".to_string()))?;
        let mut inputs = self.inputs.yres.clone().ok_or_else(|| {
            WorkflowError::InvalidInputs("`yres` inputs are required for BSE on top of GW".to_string())
        })?;

        let mapping = match &self.ctx.mapping {
            Some(mapping) => mapping.clone(),
            None => NscfMapping::from_pw(&self.nscf_outputs(&calc).await?)?,
        };
        let window = QpAnalyzer::analyze(&self.ctx.submitted_subsets, &mapping);
        let [v_min, c_max] = window.bands();

        let params = &mut inputs.parameters;
        params.set_variable("KfnQPdb", VariableValue::Text("E < ./ndb.QP".to_string()), "");
        params.set_variable(
            "BSEBands",
            VariableValue::List(vec![v_min as f64, c_max as f64]),
            "",
        );
        if !params.contains("BSEQptR") {
            let [q_i, q_f] = window.q_range();
            params.set_variable("BSEQptR", VariableValue::List(vec![q_i as f64, q_f as f64]), "");
        }
        inputs.qp_corrections = Some(merged);
        inputs.parent_folder = Some(calc.remote_folder()?.clone());

        let id = self.host.submit(SubmitRequest::yambo("bse", inputs)).await?;
        info!(node = %id, v_min, c_max, q_ind = window.q_ind, "Submitted BSE on top of merged QP");
        Ok(Awaiting::bse(id))
    }

    /// Collect the outputs of the finished workflow
    pub async fn report_wf(&mut self) -> Result<WorkflowOutputs> {
        let calc = self.reference().await?;
        if !calc.is_finished_ok() {
            error!(node = %calc.id, "Final calculation failed");
            return Ok(WorkflowOutputs::failed(&self.id, FAILED));
        }
        let bse = match self.ctx.bse {
            Some(id) => {
                let node = self.host.node(id).await?;
                if !node.is_finished_ok() {
                    error!(node = %id, "BSE calculation failed");
                    return Ok(WorkflowOutputs::failed(&self.id, FAILED));
                }
                Some(node)
            }
            None => None,
        };

        let mut outputs = WorkflowOutputs::new(&self.id);
        outputs.splitted_qp_calculations = self.ctx.splitted_qp.clone();
        outputs.merged_qp = self.ctx.merged_qp.clone();

        let quantities = &self.inputs.additional_parsing;
        if !quantities.is_empty() {
            match self.report_mapping(&calc).await {
                Ok(mapping) => {
                    let mut parsed = additional_parsed(&calc, quantities, &mapping);
                    if let Some(bse) = &bse {
                        let excitonic: Vec<_> =
                            quantities.iter().filter(|q| q.is_excitonic()).cloned().collect();
                        parsed.extend(additional_parsed(bse, &excitonic, &mapping));
                    }
                    if quantities.contains(&AdditionalQuantity::Scissor) {
                        outputs.scissor = self.scissor(&calc, &mapping).await;
                    }
                    info!(quantities = parsed.len(), "Additional quantities parsed");
                    outputs.parsed = Some(parsed);
                    outputs.nscf_mapping = Some(mapping);
                }
                Err(err) => warn!(error = %err, "Cannot map the nscf band edges, skipping additional parsing"),
            }
        }

        let exposed = bse.as_ref().unwrap_or(&calc);
        outputs.exposed = Some(ExposedOutputs::from(exposed));
        info!(workflow = %self.id, node = %exposed.id, "Workflow completed successfully");
        Ok(outputs)
    }

    async fn report_mapping(&self, calc: &CalculationNode) -> Result<NscfMapping> {
        match &self.ctx.mapping {
            Some(mapping) => Ok(mapping.clone()),
            None => NscfMapping::from_pw(&self.nscf_outputs(calc).await?),
        }
    }

    async fn scissor(&self, calc: &CalculationNode, mapping: &NscfMapping) -> Option<ScissorFit> {
        let mut nodes = vec![calc.clone()];
        for id in &self.ctx.splitted_qp {
            match self.host.node(*id).await {
                Ok(node) => nodes.push(node),
                Err(err) => warn!(node = %id, error = %err, "Split QP calculation not available for the scissor"),
            }
        }

        let fitted = QpStates::from_nodes(&nodes)
            .ok_or_else(|| WorkflowError::missing_output(calc.id, "quasiparticle energies"))
            .and_then(|states| fit_scissor(&states, mapping));
        match fitted {
            Ok(fit) => {
                debug!(gap_shift = fit.gap_shift(mapping), "Scissor fitted");
                Some(fit)
            }
            Err(err) => {
                warn!(error = %err, "Scissor evaluation failed");
                None
            }
        }
    }

    /// Drive the workflow to completion
    ///
    /// Picks up where the context left off, so it also finishes a resumed
    /// workflow.
    pub async fn run(&mut self) -> Result<WorkflowOutputs> {
        if let Some(code) = self.ctx.exit_code {
            return Ok(self.failed_outputs(code));
        }
        if !self.ctx.started {
            self.validate_parameters()?;
            self.start_workflow().await;
            self.save(CheckpointSource::Start).await?;
        }

        loop {
            if let Some(awaiting) = self.ctx.pending.clone() {
                self.collect(&awaiting).await?;
                self.ctx.pending = None;
                let source = match awaiting.purpose {
                    AwaitPurpose::Bse => CheckpointSource::Bse,
                    _ => CheckpointSource::Step,
                };
                self.save(source).await?;
            }
            if !self.can_continue() {
                break;
            }
            match self.perform_next().await? {
                Transition::Await(awaiting) => {
                    self.ctx.pending = Some(awaiting);
                    self.save(CheckpointSource::Step).await?;
                }
                Transition::Exit(code) => return self.finish_failed(code).await,
            }
        }

        if let Some(failed) = self.failed_batch_member().await? {
            error!(node = %failed, "Split QP calculation failed, exiting the workflow");
            return self.finish_failed(FAILED).await;
        }

        if !self.ctx.post_processed {
            if self.post_processing_needed() {
                if let Some(code) = self.run_post_process().await? {
                    return self.finish_failed(code).await;
                }
            }
            self.ctx.post_processed = true;
            self.save(CheckpointSource::PostProcess).await?;
        }

        if !self.ctx.bse_checked {
            self.ctx.bse_checked = true;
            if self.should_run_bse() {
                let awaiting = self.prepare_and_run_bse().await?;
                self.ctx.pending = Some(awaiting.clone());
                self.save(CheckpointSource::Step).await?;

                self.collect(&awaiting).await?;
                self.ctx.pending = None;
                self.save(CheckpointSource::Bse).await?;
            }
        }

        let outputs = self.report_wf().await?;
        self.ctx.exit_code = outputs.exit_code;
        self.save(CheckpointSource::Final).await?;
        Ok(outputs)
    }

    async fn finish_failed(&mut self, code: WorkflowExitCode) -> Result<WorkflowOutputs> {
        self.ctx.exit_code = Some(code);
        self.save(CheckpointSource::Final).await?;
        Ok(self.failed_outputs(code))
    }

    fn failed_outputs(&self, code: WorkflowExitCode) -> WorkflowOutputs {
        let mut outputs = WorkflowOutputs::failed(&self.id, code);
        outputs.splitted_qp_calculations = self.ctx.splitted_qp.clone();
        outputs
    }

    async fn save(&mut self, source: CheckpointSource) -> Result<()> {
        let Some(saver) = &self.saver else {
            return Ok(());
        };
        let state = serde_json::to_value(SavedState {
            inputs: self.inputs.clone(),
            context: self.ctx.clone(),
            config: self.config.clone(),
        })?;
        let metadata = CheckpointMetadata::new()
            .with_source(source)
            .with_step(self.saved_steps)
            .with_label(self.ctx.step.to_string());

        let config = saver
            .put(&CheckpointConfig::new(&self.id), Checkpoint::new(state), metadata)
            .await?;
        debug!(workflow = %self.id, checkpoint = ?config.checkpoint_id, step = self.saved_steps, "Checkpoint written");
        self.saved_steps += 1;
        Ok(())
    }

    async fn reference(&self) -> Result<CalculationNode> {
        let id = self
            .ctx
            .calc
            .ok_or_else(|| WorkflowError::InvalidState("no reference calculation".to_string()))?;
        self.host.node(id).await
    }

    async fn failed_batch_member(&self) -> Result<Option<NodeId>> {
        for id in &self.ctx.last_batch {
            if !self.host.node(*id).await?.is_finished_ok() {
                return Ok(Some(*id));
            }
        }
        Ok(None)
    }

    async fn nscf_outputs(&self, node: &CalculationNode) -> Result<PwOutputs> {
        let nscf = find_pw_parent(self.host.as_ref(), node, &[PwCalculationType::Nscf]).await?;
        Ok(nscf.pw_outputs()?.clone())
    }

    fn yambo_inputs(&self) -> Result<YamboInputs> {
        self.ctx.yambo_inputs.clone().ok_or_else(|| {
            WorkflowError::InvalidState("parameters were not validated".to_string())
        })
    }

    fn is_initialise(&self) -> bool {
        self.ctx
            .yambo_inputs
            .as_ref()
            .is_some_and(|inputs| inputs.settings.is_initialise())
    }
}
