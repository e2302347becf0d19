// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Run registry (§4.4): compilation, container frames, ready-set
//! collection, and the six named state transitions. One mutex guards the
//! whole `runs` table (§5) — every transition below takes it once, mutates,
//! and releases; event publication happens after the lock is dropped.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;
use serde_json::Value;

use wf_core::workflow::ResolvedPort;
use wf_core::{
    normalize_status, Artifact, EdgeBinding, ExecError, FrameDefinition, FrameRuntimeState,
    NodeId, NodeRole, NodeState, NodeStatus, RunId, TaskId, Tenant, WorkerInstanceId, Workflow,
};

use crate::error::SchedulerError;
use crate::events::{EventBus, SchedulerEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

/// One node level: either the run's root graph or one active frame.
pub struct GraphLevel {
    pub nodes: HashMap<NodeId, NodeState>,
    pub edge_bindings: Vec<EdgeBinding>,
}

impl GraphLevel {
    /// A level is complete once every node is terminal, with one exception
    /// (§3 data model invariant): a middleware node that succeeded flips
    /// back to `queued` so it can be re-entered by a later `next()` call.
    /// Idle-and-queued counts as done for completeness — only a middleware
    /// still blocked on a pending invocation holds the level open.
    fn is_complete(&self) -> bool {
        self.nodes.values().all(|n| n.is_terminal() || (n.role == Some(NodeRole::Middleware) && n.status == NodeStatus::Queued))
    }

    fn has_failure(&self) -> bool {
        self.nodes.values().any(|n| n.status == NodeStatus::Failed)
    }
}

/// A mutable view over either the root graph or one frame, so the
/// transition functions below don't need to duplicate logic per level kind.
pub(crate) struct LevelMut<'a> {
    pub(crate) nodes: &'a mut HashMap<NodeId, NodeState>,
    pub(crate) edge_bindings: &'a [EdgeBinding],
}

/// Action produced by ready-set collection for one dispatchable node. Carries
/// the level it was collected from, since the caller only receives the flat
/// action list and has no other way to know which frame (or the root) a
/// node id resolves against.
#[derive(Debug, Clone)]
pub enum ReadyAction {
    /// Dispatch this node to a worker.
    Dispatch { frame_id: Option<wf_core::FrameId>, node_id: NodeId },
    /// Activate the nested frame for this container node.
    ActivateFrame { frame_id: Option<wf_core::FrameId>, node_id: NodeId },
}

/// A queued dispatch, handed off to the orchestrator (§3 `DispatchRequest`).
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub run_id: RunId,
    pub tenant: Tenant,
    pub frame_id: Option<wf_core::FrameId>,
    pub node_id: NodeId,
    pub task_id: TaskId,
    pub node_type: String,
    pub package_name: String,
    pub package_version: String,
    pub parameters: Value,
    pub concurrency_key: String,
    pub resource_refs: Vec<wf_core::ResourceRef>,
    pub affinity: Option<String>,
    pub preferred_worker_id: Option<WorkerInstanceId>,
    pub seq: u64,
    pub attempts: u32,
    pub dispatch_id: wf_core::DispatchId,
    pub ack_deadline: std::time::Duration,
    pub host_node_id: Option<NodeId>,
    pub middleware_chain: Option<Vec<NodeId>>,
    pub chain_index: Option<usize>,
}

/// Address of a single node instance within a run: either the root graph or
/// one of its active frames.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct TaskLocation {
    pub(crate) frame_id: Option<wf_core::FrameId>,
    pub(crate) node_id: NodeId,
}

pub struct RunRecord {
    pub run_id: RunId,
    pub definition_hash: String,
    pub client_id: String,
    pub tenant: Tenant,
    pub status: RunStatus,
    pub created_at: Instant,
    pub error: Option<ExecError>,
    pub workflow: Workflow,
    root: GraphLevel,
    frames: HashMap<wf_core::FrameId, FrameRuntimeState>,
    frame_stack: Vec<wf_core::FrameId>,
    /// The workflow snapshot each active frame was compiled from, needed to
    /// look up node type/package when (re)building a `DispatchRequest` for
    /// a node inside that frame.
    frame_workflows: HashMap<wf_core::FrameId, Workflow>,
    frame_defs: HashMap<(Option<wf_core::FrameId>, NodeId), FrameDefinition>,
    task_index: HashMap<TaskId, TaskLocation>,
    dispatch_index: HashMap<wf_core::DispatchId, TaskLocation>,
    pub next_seq: u64,
}

impl RunRecord {
    pub(crate) fn level_mut(&mut self, frame_id: Option<&wf_core::FrameId>) -> Option<LevelMut<'_>> {
        match frame_id {
            None => Some(LevelMut { nodes: &mut self.root.nodes, edge_bindings: &self.root.edge_bindings }),
            Some(id) => self.frames.get_mut(id).map(|f| LevelMut { nodes: &mut f.nodes, edge_bindings: &f.edge_bindings }),
        }
    }

    pub(crate) fn node(&self, frame_id: Option<&wf_core::FrameId>, node_id: &NodeId) -> Option<&NodeState> {
        match frame_id {
            None => self.root.nodes.get(node_id),
            Some(id) => self.frames.get(id)?.nodes.get(node_id),
        }
    }

    pub(crate) fn topmost_frame(&self) -> Option<wf_core::FrameId> {
        self.frame_stack.last().cloned()
    }

    /// Resolve a task id to its node location, searching root and frames
    /// alike (§4.8, used by feedback handling which only carries a task id).
    pub(crate) fn locate(&self, task_id: &TaskId) -> Option<TaskLocation> {
        self.task_index.get(task_id).cloned()
    }

    /// The workflow snapshot that compiled the given level: the run's root
    /// workflow, or the definition a frame was activated from.
    pub(crate) fn workflow_for(&self, frame_id: Option<&wf_core::FrameId>) -> &Workflow {
        match frame_id {
            None => &self.workflow,
            Some(id) => self.frame_workflows.get(id).unwrap_or(&self.workflow),
        }
    }

    pub fn get_node(&self, frame_id: Option<&wf_core::FrameId>, node_id: &NodeId) -> Option<&NodeState> {
        self.node(frame_id, node_id)
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self.status, RunStatus::Running)
    }

    /// Resolve a host node's chain and return `(chain, host_node)` by
    /// scanning for the node whose `middlewares` contain `middleware_id`
    /// (§4.5 `handle_next_request`). Searches the topmost active frame
    /// first, then the root.
    pub fn find_host_of(&self, middleware_id: &NodeId) -> Option<(Option<wf_core::FrameId>, NodeId)> {
        if let Some(fid) = self.topmost_frame() {
            if let Some(frame) = self.frames.get(&fid) {
                if let Some(n) = frame.nodes.values().find(|n| n.middlewares.contains(middleware_id)) {
                    return Some((Some(fid), n.node_id.clone()));
                }
            }
        }
        self.root.nodes.values().find(|n| n.middlewares.contains(middleware_id)).map(|n| (None, n.node_id.clone()))
    }
}

/// Compile a workflow snapshot into a fresh node map + edge-binding table
/// (§4.4 "Compilation"). `frame_id` is the frame this graph belongs to
/// (`None` for the root graph); it namespaces task ids.
fn compile(
    workflow: &Workflow,
    frame_id: Option<&wf_core::FrameId>,
) -> (HashMap<NodeId, NodeState>, Vec<EdgeBinding>, Vec<(NodeId, String)>) {
    let mut nodes: HashMap<NodeId, NodeState> = HashMap::new();
    let mut containers = Vec::new();

    for wn in &workflow.nodes {
        let task_id = match frame_id {
            Some(f) => TaskId::namespaced(f, &wn.id),
            None => TaskId::root(&wn.id),
        };
        let mut state = NodeState::new(wn.id.clone(), task_id, wn.parameters.clone());
        if let Some(sub) = wn.subgraph_id() {
            containers.push((wn.id.clone(), sub.to_string()));
            state.role = Some(NodeRole::Container);
        }
        if !wn.middlewares.is_empty() {
            state.role = Some(NodeRole::Host);
            state.middleware_defs = wn.middlewares.clone();
            state.middlewares = wn.middlewares.iter().map(|m| m.id.clone()).collect();
            // The host itself never auto-dispatches; it only runs once the
            // outermost middleware re-enters it via `next()` (§4.5).
            state.chain_blocked = true;
        }
        nodes.insert(wn.id.clone(), state);

        for (i, mw) in wn.middlewares.iter().enumerate() {
            let mw_task_id = match frame_id {
                Some(f) => TaskId::namespaced(f, &mw.id),
                None => TaskId::root(&mw.id),
            };
            let mut mw_state = NodeState::new(mw.id.clone(), mw_task_id, mw.parameters.clone());
            mw_state.role = Some(NodeRole::Middleware);
            mw_state.host_node_id = Some(wn.id.clone());
            mw_state.chain_index = Some(i);
            // Only the first middleware is released by the host's upstream;
            // the rest wait on `next()`.
            mw_state.chain_blocked = i > 0;
            nodes.insert(mw.id.clone(), mw_state);
        }
    }

    // Dependency wiring: a dependency targeting a host with a chain is
    // redirected to the host's first middleware, which "inherits the host's
    // upstream dependencies" (§4.4). Chain ordering past that is never
    // encoded in dependencies.
    let effective_target = |nodes: &HashMap<NodeId, NodeState>, raw: &NodeId| -> NodeId {
        match nodes.get(raw) {
            Some(ns) if !ns.middlewares.is_empty() => ns.middlewares[0].clone(),
            _ => raw.clone(),
        }
    };

    for edge in &workflow.edges {
        let source = edge.source.node.clone();
        let target = effective_target(&nodes, &edge.target.node);
        if !nodes.contains_key(&source) || !nodes.contains_key(&target) {
            continue;
        }
        if let Some(t) = nodes.get_mut(&target) {
            t.pending_dependencies += 1;
            t.dependencies.push(source.clone());
        }
        if let Some(s) = nodes.get_mut(&source) {
            s.dependents.push(target);
        }
    }

    // Edge bindings: resolve each side's port (plain node or
    // `mw:{id}:{dir}:{port}`), keep only pairs that encode a
    // `/parameters/...` or `/results/...` binding path.
    let mut edge_bindings = Vec::new();
    for edge in &workflow.edges {
        let source_resolved = wf_core::workflow::resolve_port(&edge.source.node, &edge.source.port);
        let target_resolved = wf_core::workflow::resolve_port(&edge.target.node, &edge.target.port);
        let (source_node, source_port_str) = match source_resolved {
            ResolvedPort::Node { node, port } => (node, port),
            ResolvedPort::Middleware { middleware, port, .. } => (middleware, port),
        };
        let (target_node, target_port_str) = match target_resolved {
            ResolvedPort::Node { node, port } => (node, port),
            ResolvedPort::Middleware { middleware, port, .. } => (middleware, port),
        };
        let Some((source_root, source_path)) = wf_core::edge_binding::parse_binding(&source_port_str) else {
            continue;
        };
        let Some((target_root, target_path)) = wf_core::edge_binding::parse_binding(&target_port_str) else {
            continue;
        };
        edge_bindings.push(EdgeBinding { source_node, source_root, source_path, target_node, target_root, target_path });
    }

    (nodes, edge_bindings, containers)
}

/// The run registry (§4.4, §5). Shared across the scheduler session server
/// and the dispatch orchestrator.
pub struct RunRegistry {
    runs: Mutex<HashMap<RunId, RunRecord>>,
    events: EventBus,
}

impl RunRegistry {
    pub fn new(events: EventBus) -> Self {
        Self { runs: Mutex::new(HashMap::new()), events }
    }

    /// Create a run from a workflow snapshot, compiling the root graph and
    /// collecting the first ready set.
    pub fn create_run(
        &self,
        run_id: RunId,
        client_id: String,
        tenant: Tenant,
        workflow: Workflow,
    ) -> Result<Vec<ReadyAction>, SchedulerError> {
        let definition_hash = workflow.definition_hash()?;
        let (nodes, edge_bindings, containers) = compile(&workflow, None);

        let mut frame_defs = HashMap::new();
        for (container_node_id, subgraph_id) in containers {
            if let Some(sub) = workflow.subgraph(&subgraph_id) {
                frame_defs.insert(
                    (None, container_node_id.clone()),
                    FrameDefinition { container_node_id, subgraph_id, workflow: sub.workflow.clone() },
                );
            }
        }

        let mut task_index = HashMap::new();
        for node in nodes.values() {
            task_index.insert(node.task_id.clone(), TaskLocation { frame_id: None, node_id: node.node_id.clone() });
        }

        let record = RunRecord {
            run_id: run_id.clone(),
            definition_hash,
            client_id,
            tenant,
            status: RunStatus::Running,
            created_at: Instant::now(),
            error: None,
            workflow,
            root: GraphLevel { nodes, edge_bindings },
            frames: HashMap::new(),
            frame_stack: Vec::new(),
            frame_workflows: HashMap::new(),
            frame_defs,
            task_index,
            dispatch_index: HashMap::new(),
            next_seq: 0,
        };

        let mut runs = self.runs.lock();
        runs.insert(run_id.clone(), record);
        // The line above just inserted this key into the same locked map.
        #[allow(clippy::expect_used)]
        let ready = collect_ready(runs.get_mut(&run_id).expect("just inserted"));
        Ok(ready)
    }

    /// Activate the frame for a ready container node (§4.4 "Container
    /// frames"). Clones the nested workflow, rebuilds node states with
    /// task-id namespacing, pushes the frame on the run's stack.
    pub fn activate_frame(&self, run_id: &RunId, container_node_id: &NodeId) -> Result<Vec<ReadyAction>, SchedulerError> {
        let mut runs = self.runs.lock();
        let run = runs.get_mut(run_id).ok_or_else(|| SchedulerError::UnknownRun(run_id.clone()))?;

        let parent_frame_id = run.topmost_frame();
        let key = (parent_frame_id.clone(), container_node_id.clone());
        let def = run
            .frame_defs
            .get(&key)
            .ok_or_else(|| SchedulerError::UnknownNode { run: run_id.clone(), node: container_node_id.clone() })?
            .clone();

        let frame_id = wf_core::FrameId::new(uuid::Uuid::new_v4().to_string());
        let (nodes, edge_bindings, containers) = compile(&def.workflow, Some(&frame_id));

        for (nested_container, subgraph_id) in containers {
            if let Some(sub) = def.workflow.subgraph(&subgraph_id) {
                run.frame_defs.insert(
                    (Some(frame_id.clone()), nested_container.clone()),
                    FrameDefinition { container_node_id: nested_container, subgraph_id, workflow: sub.workflow.clone() },
                );
            }
        }

        for node in nodes.values() {
            run.task_index
                .insert(node.task_id.clone(), TaskLocation { frame_id: Some(frame_id.clone()), node_id: node.node_id.clone() });
        }

        run.frames.insert(
            frame_id.clone(),
            FrameRuntimeState {
                frame_id: frame_id.clone(),
                parent_frame_id: parent_frame_id.clone(),
                container_node_id: container_node_id.clone(),
                nodes,
                edge_bindings,
            },
        );
        run.frame_workflows.insert(frame_id.clone(), def.workflow.clone());
        run.frame_stack.push(frame_id.clone());

        if let Some(level) = run.level_mut(parent_frame_id.as_ref()) {
            if let Some(container) = level.nodes.get_mut(container_node_id) {
                container.status = NodeStatus::Running;
                container.frame_id = Some(frame_id);
            }
        }

        Ok(collect_ready(run))
    }

    /// `mark_dispatched` (§4.4).
    pub fn mark_dispatched(
        &self,
        run_id: &RunId,
        frame_id: Option<&wf_core::FrameId>,
        node_id: &NodeId,
        worker_id: WorkerInstanceId,
        dispatch_id: wf_core::DispatchId,
        seq: u64,
        ack_deadline: std::time::Instant,
    ) -> Result<(), SchedulerError> {
        let mut runs = self.runs.lock();
        let run = runs.get_mut(run_id).ok_or_else(|| SchedulerError::UnknownRun(run_id.clone()))?;
        let location = TaskLocation { frame_id: frame_id.cloned(), node_id: node_id.clone() };
        run.dispatch_index.insert(dispatch_id.clone(), location);
        let node = run
            .level_mut(frame_id)
            .and_then(|l| l.nodes.get_mut(node_id))
            .ok_or_else(|| SchedulerError::UnknownNode { run: run_id.clone(), node: node_id.clone() })?;
        node.status = NodeStatus::Running;
        node.worker_id = Some(worker_id);
        node.seq = Some(seq);
        node.dispatch_id = Some(dispatch_id);
        node.pending_ack = true;
        node.ack_deadline = Some(ack_deadline);
        node.attempts += 1;
        Ok(())
    }

    /// `mark_acknowledged` (§4.4).
    pub fn mark_acknowledged(&self, run_id: &RunId, dispatch_id: &wf_core::DispatchId) -> Result<(), SchedulerError> {
        let mut runs = self.runs.lock();
        let run = runs.get_mut(run_id).ok_or_else(|| SchedulerError::UnknownRun(run_id.clone()))?;
        let location = run
            .dispatch_index
            .get(dispatch_id)
            .cloned()
            .ok_or_else(|| SchedulerError::UnknownDispatch(dispatch_id.clone()))?;
        if let Some(node) = run.level_mut(location.frame_id.as_ref()).and_then(|l| l.nodes.get_mut(&location.node_id)) {
            node.pending_ack = false;
            node.ack_deadline = None;
        }
        Ok(())
    }

    /// `reset_after_ack_timeout` (§4.4, §4.6 step 3): returns the node to
    /// queued so the orchestrator can re-enqueue it. A no-op if the dispatch
    /// was already acknowledged (`control.ack` raced the watchdog) — the
    /// index entry is cleaned up either way.
    pub fn reset_after_ack_timeout(&self, run_id: &RunId, dispatch_id: &wf_core::DispatchId) -> Result<Option<DispatchRequest>, SchedulerError> {
        let mut runs = self.runs.lock();
        let run = runs.get_mut(run_id).ok_or_else(|| SchedulerError::UnknownRun(run_id.clone()))?;
        let location = run
            .dispatch_index
            .remove(dispatch_id)
            .ok_or_else(|| SchedulerError::UnknownDispatch(dispatch_id.clone()))?;
        let tenant = run.tenant.clone();
        let workflow = run.workflow_for(location.frame_id.as_ref()).clone();
        let attempts;
        {
            let Some(node) = run.level_mut(location.frame_id.as_ref()).and_then(|l| l.nodes.get_mut(&location.node_id)) else {
                return Ok(None);
            };
            if !node.pending_ack {
                return Ok(None);
            }
            node.status = NodeStatus::Queued;
            node.worker_id = None;
            node.seq = None;
            node.dispatch_id = None;
            node.pending_ack = false;
            node.ack_deadline = None;
            attempts = node.attempts;
        }
        // The node was just mutated in the block above under the same lock;
        // nodes are never removed from a level once compiled.
        #[allow(clippy::expect_used)]
        let node = run.node(location.frame_id.as_ref(), &location.node_id).expect("just touched");
        let request = build_dispatch_request(&workflow, node, &tenant, run_id.clone(), location.frame_id.clone(), attempts);
        Ok(request)
    }

    /// `record_result` (§4.4, §4.5).
    pub fn record_result(
        &self,
        run_id: &RunId,
        task_id: &TaskId,
        status: &str,
        result: Value,
        metadata: Value,
        artifacts: Vec<Artifact>,
    ) -> Result<Vec<ReadyAction>, SchedulerError> {
        let mut runs = self.runs.lock();
        let run = runs.get_mut(run_id).ok_or_else(|| SchedulerError::UnknownRun(run_id.clone()))?;
        let location = run
            .task_index
            .get(task_id)
            .cloned()
            .ok_or_else(|| SchedulerError::UnknownNode { run: run_id.clone(), node: NodeId::new(task_id.as_str()) })?;

        let normalized = normalize_status(status);
        let is_middleware;
        let chain_index;
        let host_node_id;
        let has_chain;
        {
            let level = run
                .level_mut(location.frame_id.as_ref())
                .ok_or_else(|| SchedulerError::UnknownNode { run: run_id.clone(), node: location.node_id.clone() })?;
            let node = level
                .nodes
                .get_mut(&location.node_id)
                .ok_or_else(|| SchedulerError::UnknownNode { run: run_id.clone(), node: location.node_id.clone() })?;
            node.status = normalized;
            merge_json(&mut node.result, result);
            merge_json(&mut node.metadata, metadata);
            node.artifacts.extend(artifacts);
            node.pending_ack = false;
            node.ack_deadline = None;
            is_middleware = node.role == Some(NodeRole::Middleware);
            chain_index = node.chain_index;
            host_node_id = node.host_node_id.clone();
            has_chain = !node.middlewares.is_empty();
        }

        if is_middleware && normalized == NodeStatus::Succeeded {
            // A middleware success flips it back to queued (reusable); only
            // the outermost middleware finalizes its host.
            if let Some(level) = run.level_mut(location.frame_id.as_ref()) {
                if let Some(node) = level.nodes.get_mut(&location.node_id) {
                    node.status = NodeStatus::Queued;
                    node.chain_blocked = true;
                }
            }
            if chain_index == Some(0) {
                if let Some(host_id) = host_node_id {
                    apply_bindings_and_release(run, location.frame_id.as_ref(), &host_id);
                }
            }
        } else if !is_middleware && !has_chain {
            // A host with a middleware chain never releases dependents on
            // its own completion — only the outermost middleware does, above.
            apply_bindings_and_release(run, location.frame_id.as_ref(), &location.node_id);
        }

        if normalized.is_terminal() {
            if let Some(node) = run.node(location.frame_id.as_ref(), &location.node_id) {
                self.events.publish(SchedulerEvent::NodeResultSnapshot {
                    run_id: run_id.clone(),
                    task_id: task_id.clone(),
                    result: node.result.clone(),
                });
            }
        }

        if let Some(fid) = location.frame_id.clone() {
            maybe_finalize_frame_on_completion(run, &fid);
        }

        if run.root.is_complete() && run.status == RunStatus::Running {
            run.status = if run.root.has_failure() { RunStatus::Failed } else { RunStatus::Succeeded };
            self.events.publish(SchedulerEvent::RunFinished {
                run_id: run_id.clone(),
                status: if run.status == RunStatus::Failed { "failed".into() } else { "succeeded".into() },
            });
        }

        Ok(collect_ready(run))
    }

    /// `record_command_error` (§4.4).
    pub fn record_command_error(&self, run_id: &RunId, task_id: &TaskId, error: ExecError) -> Result<(), SchedulerError> {
        let mut runs = self.runs.lock();
        let run = runs.get_mut(run_id).ok_or_else(|| SchedulerError::UnknownRun(run_id.clone()))?;
        let location = run
            .task_index
            .get(task_id)
            .cloned()
            .ok_or_else(|| SchedulerError::UnknownNode { run: run_id.clone(), node: NodeId::new(task_id.as_str()) })?;
        if let Some(level) = run.level_mut(location.frame_id.as_ref()) {
            if let Some(node) = level.nodes.get_mut(&location.node_id) {
                node.status = NodeStatus::Failed;
            }
        }
        run.status = RunStatus::Failed;
        run.error = Some(error);
        if let Some(fid) = location.frame_id.clone() {
            finalize_frame(run, &fid);
        }
        self.events.publish(SchedulerEvent::RunFinished { run_id: run_id.clone(), status: "failed".into() });
        Ok(())
    }

    /// `cancel_run` (§4.4): cancels every non-terminal node in the run and
    /// in every active frame. Pending `next()` waiters for the run are
    /// failed by the middleware bridge, which holds its own table keyed by
    /// run id.
    pub fn cancel_run(&self, run_id: &RunId) -> Result<(), SchedulerError> {
        let mut runs = self.runs.lock();
        let run = runs.get_mut(run_id).ok_or_else(|| SchedulerError::UnknownRun(run_id.clone()))?;
        for node in run.root.nodes.values_mut() {
            if !node.is_terminal() {
                node.status = NodeStatus::Cancelled;
            }
        }
        for frame in run.frames.values_mut() {
            for node in frame.nodes.values_mut() {
                if !node.is_terminal() {
                    node.status = NodeStatus::Cancelled;
                }
            }
        }
        run.status = RunStatus::Cancelled;
        self.events.publish(SchedulerEvent::RunFinished { run_id: run_id.clone(), status: "cancelled".into() });
        Ok(())
    }

    pub fn status(&self, run_id: &RunId) -> Option<RunStatus> {
        self.runs.lock().get(run_id).map(|r| r.status)
    }

    pub fn definition_hash(&self, run_id: &RunId) -> Option<String> {
        self.runs.lock().get(run_id).map(|r| r.definition_hash.clone())
    }

    pub fn with_run<R>(&self, run_id: &RunId, f: impl FnOnce(&mut RunRecord) -> R) -> Option<R> {
        self.runs.lock().get_mut(run_id).map(f)
    }

    /// Locate the run owning an in-flight dispatch, for the `control.ack`
    /// handler which only has the dispatch id (§4.6 step 3).
    pub fn find_run_for_dispatch(&self, dispatch_id: &wf_core::DispatchId) -> Option<RunId> {
        let runs = self.runs.lock();
        runs.iter().find(|(_, r)| r.dispatch_index.contains_key(dispatch_id)).map(|(id, _)| id.clone())
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }
}

/// Apply a JSON merge: objects merge key-wise, everything else replaces.
fn merge_json(target: &mut Value, incoming: Value) {
    if incoming.is_null() {
        return;
    }
    match (target.as_object_mut(), incoming) {
        (Some(existing), Value::Object(incoming_map)) => {
            for (k, v) in incoming_map {
                existing.insert(k, v);
            }
        }
        (_, incoming) => *target = incoming,
    }
}

/// Apply every edge binding whose source is `source_node`, then decrement
/// `pending_dependencies` on its dependents.
fn apply_bindings_and_release(run: &mut RunRecord, frame_id: Option<&wf_core::FrameId>, source_node: &NodeId) {
    let Some(level) = run.level_mut(frame_id) else { return };
    let (source_parameters, source_result) = match level.nodes.get(source_node) {
        Some(n) => (n.parameters.clone(), n.result.clone()),
        None => return,
    };
    let bindings: Vec<EdgeBinding> = level.edge_bindings.iter().filter(|b| &b.source_node == source_node).cloned().collect();
    for binding in &bindings {
        if let Some(target) = level.nodes.get_mut(&binding.target_node) {
            let mut target_params = target.parameters.clone();
            let mut target_result = target.result.clone();
            binding.apply(&source_parameters, &source_result, &mut target_params, &mut target_result);
            target.parameters = target_params;
            target.result = target_result;
        }
    }
    let dependents = level.nodes.get(source_node).map(|n| n.dependents.clone()).unwrap_or_default();
    for dep in dependents {
        if let Some(d) = level.nodes.get_mut(&dep) {
            d.pending_dependencies = (d.pending_dependencies - 1).max(0);
        }
    }
}

/// A frame is complete once every node in it reached a terminal status.
/// Finalizing mirrors the result onto the container node and, on failure,
/// cancels any still-queued frame nodes (§4.4 "Container frames").
fn maybe_finalize_frame_on_completion(run: &mut RunRecord, frame_id: &wf_core::FrameId) {
    let complete = run.frames.get(frame_id).map(|f| f.is_complete()).unwrap_or(false);
    if complete {
        finalize_frame(run, frame_id);
    }
}

fn finalize_frame(run: &mut RunRecord, frame_id: &wf_core::FrameId) {
    let Some(frame) = run.frames.get(frame_id) else { return };
    let has_failure = frame.has_failure();
    let container_node_id = frame.container_node_id.clone();
    let parent_frame_id = frame.parent_frame_id.clone();
    // Mirror the frame's surface result onto the container node: the node
    // with no dependents inside the frame is its terminal output.
    let surface_result = frame.nodes.values().filter(|n| n.dependents.is_empty()).map(|n| n.result.clone()).next();

    if has_failure {
        if let Some(frame) = run.frames.get_mut(frame_id) {
            for node in frame.nodes.values_mut() {
                if node.status == NodeStatus::Queued {
                    node.status = NodeStatus::Cancelled;
                }
            }
        }
    }

    if let Some(level) = run.level_mut(parent_frame_id.as_ref()) {
        if let Some(container) = level.nodes.get_mut(&container_node_id) {
            container.status = if has_failure { NodeStatus::Failed } else { NodeStatus::Succeeded };
            container.result = surface_result.unwrap_or(Value::Null);
        }
    }

    if run.frame_stack.last() == Some(frame_id) {
        run.frame_stack.pop();
    }

    if has_failure {
        run.status = RunStatus::Failed;
    } else {
        apply_bindings_and_release(run, parent_frame_id.as_ref(), &container_node_id);
    }
}

/// Ready-set collection (§4.4): for the topmost active frame (or root if
/// none), collect every dispatchable node. Containers become
/// `ActivateFrame`; everything else becomes `Dispatch`.
fn collect_ready(run: &mut RunRecord) -> Vec<ReadyAction> {
    let frame_id = run.topmost_frame();
    let Some(level) = run.level_mut(frame_id.as_ref()) else { return Vec::new() };
    let mut ready = Vec::new();
    for node in level.nodes.values_mut() {
        if node.is_dispatchable() {
            node.enqueued = true;
            if node.role == Some(NodeRole::Container) {
                ready.push(ReadyAction::ActivateFrame { frame_id: frame_id.clone(), node_id: node.node_id.clone() });
            } else {
                ready.push(ReadyAction::Dispatch { frame_id: frame_id.clone(), node_id: node.node_id.clone() });
            }
        }
    }
    ready
}

/// Build a [`DispatchRequest`] for a node that is ready to run (used both by
/// ready-set dispatch and by `next()` target resolution). Returns `None`
/// only if the node id can't be resolved against the workflow snapshot,
/// which would indicate a compiled node with no backing definition.
pub fn build_dispatch_request(
    workflow: &Workflow,
    node: &NodeState,
    tenant: &Tenant,
    run_id: RunId,
    frame_id: Option<wf_core::FrameId>,
    attempts: u32,
) -> Option<DispatchRequest> {
    let (node_type, package_name, package_version) = if let Some(wn) = workflow.node(&node.node_id) {
        (wn.node_type.clone(), wn.package.name.clone(), wn.package.version.clone())
    } else if let Some(host_id) = &node.host_node_id {
        let host = workflow.node(host_id)?;
        let def = host.middlewares.iter().find(|m| m.id == node.node_id)?;
        (def.middleware_type.clone(), def.package.name.clone(), def.package.version.clone())
    } else {
        return None;
    };

    Some(DispatchRequest {
        run_id,
        tenant: tenant.clone(),
        frame_id,
        node_id: node.node_id.clone(),
        task_id: node.task_id.clone(),
        node_type,
        package_name,
        package_version,
        parameters: node.parameters.clone(),
        concurrency_key: String::new(),
        resource_refs: Vec::new(),
        affinity: None,
        preferred_worker_id: None,
        seq: 0,
        attempts,
        dispatch_id: wf_core::DispatchId::new(uuid::Uuid::new_v4().to_string()),
        ack_deadline: wf_session::DEFAULT_ACK_DEADLINE,
        host_node_id: node.host_node_id.clone(),
        middleware_chain: if node.middlewares.is_empty() { None } else { Some(node.middlewares.clone()) },
        chain_index: node.chain_index,
    })
}
