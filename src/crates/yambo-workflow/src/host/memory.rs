//! In-memory host driven by a scripted runner
//!
//! [`InMemoryHost`] keeps every node in an `Arc<RwLock<..>>` and "executes" a
//! submitted calculation when it is awaited, by asking the runner closure for
//! its result. Clones share the same state.

use super::{CalculationHost, SubmitKind, SubmitRequest};
use crate::error::{Result, WorkflowError};
use crate::provenance::{
    CalculationNode, NodeId, NodeInputs, NodeOutputs, ProcessType, PwOutputs, RemoteFolder,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;
use yambo_parser::{Dataset, OutputParameters};

/// What a scripted calculation returns
#[derive(Debug, Clone, Default)]
pub struct ScriptedResult {
    pub finished_ok: bool,
    pub exit_status: i32,
    pub pw: Option<PwOutputs>,
    pub output_parameters: Option<OutputParameters>,
    pub datasets: BTreeMap<String, Dataset>,
    /// Leave an emptied remote folder behind
    pub clean_remote: bool,
}

impl ScriptedResult {
    pub fn ok() -> Self {
        Self {
            finished_ok: true,
            ..Default::default()
        }
    }

    pub fn failed(exit_status: i32) -> Self {
        Self {
            finished_ok: false,
            exit_status,
            ..Default::default()
        }
    }

    pub fn with_pw(mut self, pw: PwOutputs) -> Self {
        self.pw = Some(pw);
        self
    }

    pub fn with_output_parameters(mut self, params: OutputParameters) -> Self {
        self.output_parameters = Some(params);
        self
    }

    pub fn with_dataset(mut self, link: impl Into<String>, dataset: Dataset) -> Self {
        self.datasets.insert(link.into(), dataset);
        self
    }

    pub fn with_clean_remote(mut self) -> Self {
        self.clean_remote = true;
        self
    }
}

type Runner = Arc<dyn Fn(&SubmitRequest) -> ScriptedResult + Send + Sync>;

#[derive(Default)]
struct HostState {
    next_id: u64,
    nodes: HashMap<NodeId, CalculationNode>,
    creators: HashMap<Uuid, NodeId>,
    callers: HashMap<NodeId, NodeId>,
    pending: HashMap<NodeId, SubmitRequest>,
    submissions: Vec<(NodeId, SubmitRequest)>,
}

impl HostState {
    fn allocate(&mut self) -> NodeId {
        self.next_id += 1;
        NodeId(self.next_id)
    }

    fn finish(&mut self, node: &mut CalculationNode, result: ScriptedResult) {
        let mut folder = RemoteFolder::new(format!("memory://{}", node.uuid));
        if result.clean_remote {
            folder = folder.cleaned();
        }
        self.creators.insert(folder.uuid, node.id);

        node.exit_status = Some(result.exit_status);
        node.finished_ok = result.finished_ok;
        node.outputs = NodeOutputs {
            remote_folder: Some(folder),
            pw: result.pw,
            output_parameters: result.output_parameters,
            datasets: result.datasets,
        };
    }
}

/// Reference [`CalculationHost`] for tests and local runs
#[derive(Clone)]
pub struct InMemoryHost {
    state: Arc<RwLock<HostState>>,
    runner: Runner,
}

impl InMemoryHost {
    pub fn new<F>(runner: F) -> Self
    where
        F: Fn(&SubmitRequest) -> ScriptedResult + Send + Sync + 'static,
    {
        Self {
            state: Arc::new(RwLock::new(HostState::default())),
            runner: Arc::new(runner),
        }
    }

    /// Host on which every submission succeeds without outputs
    pub fn succeeding() -> Self {
        Self::new(|_| ScriptedResult::ok())
    }

    /// Record an already finished node, e.g. a parent from an earlier run
    pub async fn add_node(
        &self,
        process_type: ProcessType,
        inputs: NodeInputs,
        result: ScriptedResult,
    ) -> CalculationNode {
        let mut state = self.state.write().await;
        let id = state.allocate();
        let mut node = CalculationNode::new(id, process_type);
        node.inputs = inputs;
        state.finish(&mut node, result);
        state.nodes.insert(id, node.clone());
        node
    }

    /// Mark `caller` as the process that called `node`
    pub async fn link_caller(&self, node: NodeId, caller: NodeId) {
        self.state.write().await.callers.insert(node, caller);
    }

    /// Every submission so far, in order
    pub async fn submissions(&self) -> Vec<(NodeId, SubmitRequest)> {
        self.state.read().await.submissions.clone()
    }

    pub async fn node_count(&self) -> usize {
        self.state.read().await.nodes.len()
    }

    async fn complete(&self, id: NodeId) -> Result<CalculationNode> {
        let mut state = self.state.write().await;
        let Some(request) = state.pending.remove(&id) else {
            return state
                .nodes
                .get(&id)
                .cloned()
                .ok_or(WorkflowError::NodeNotFound(id));
        };

        let result = (self.runner)(&request);
        let mut node = state
            .nodes
            .get(&id)
            .cloned()
            .ok_or(WorkflowError::NodeNotFound(id))?;
        state.finish(&mut node, result);
        state.nodes.insert(id, node.clone());

        debug!(node = %id, label = %request.label, ok = node.finished_ok, "Calculation finished");
        Ok(node)
    }
}

#[async_trait]
impl CalculationHost for InMemoryHost {
    async fn node(&self, id: NodeId) -> Result<CalculationNode> {
        self.state
            .read()
            .await
            .nodes
            .get(&id)
            .cloned()
            .ok_or(WorkflowError::NodeNotFound(id))
    }

    async fn creator(&self, folder: &RemoteFolder) -> Result<Option<CalculationNode>> {
        let state = self.state.read().await;
        Ok(state
            .creators
            .get(&folder.uuid)
            .and_then(|id| state.nodes.get(id))
            .cloned())
    }

    async fn caller(&self, id: NodeId) -> Result<Option<CalculationNode>> {
        let state = self.state.read().await;
        Ok(state
            .callers
            .get(&id)
            .and_then(|caller| state.nodes.get(caller))
            .cloned())
    }

    async fn submit(&self, request: SubmitRequest) -> Result<NodeId> {
        let mut state = self.state.write().await;
        let id = state.allocate();

        let mut node = CalculationNode::new(id, request.process_type());
        node.label = Some(request.label.clone());
        node.inputs = match &request.kind {
            SubmitKind::PwBase(pw) => NodeInputs {
                pw_parameters: Some(pw.parameters.clone()),
                parent_folder: pw.parent_folder.clone(),
                ..Default::default()
            },
            SubmitKind::YamboRestart(yambo) => NodeInputs {
                yambo_parameters: Some(yambo.parameters.clone()),
                yambo_settings: Some(yambo.settings.clone()),
                parent_folder: yambo.parent_folder.clone(),
                ..Default::default()
            },
        };

        debug!(node = %id, label = %request.label, "Calculation submitted");
        state.nodes.insert(id, node);
        state.pending.insert(id, request.clone());
        state.submissions.push((id, request));
        Ok(id)
    }

    async fn await_all(&self, ids: &[NodeId]) -> Result<Vec<CalculationNode>> {
        futures::future::try_join_all(ids.iter().map(|id| self.complete(*id))).await
    }
}
