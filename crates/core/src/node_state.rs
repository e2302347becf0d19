// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `NodeState`: the runtime record for one node instance (§3).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::{DispatchId, FrameId, NodeId, TaskId, WorkerInstanceId};
use crate::workflow::MiddlewareDef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    Skipped,
}

impl NodeStatus {
    /// Terminal statuses end a node's lifecycle, except middleware hosts
    /// (§3 invariant) which may be reset back to `Queued` by `next()`.
    pub fn is_terminal(self) -> bool {
        matches!(self, NodeStatus::Succeeded | NodeStatus::Failed | NodeStatus::Cancelled)
    }
}

/// Normalize a worker-reported status string into the canonical vocabulary
/// (§4.7: `SUCCEEDED | FAILED | CANCELLED | SKIPPED`).
pub fn normalize_status(raw: &str) -> NodeStatus {
    match raw.to_ascii_uppercase().as_str() {
        "SUCCEEDED" => NodeStatus::Succeeded,
        "FAILED" => NodeStatus::Failed,
        "CANCELLED" => NodeStatus::Cancelled,
        "SKIPPED" => NodeStatus::Skipped,
        _ => NodeStatus::Failed,
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone)]
pub struct NodeState {
    pub node_id: NodeId,
    pub task_id: TaskId,
    pub status: NodeStatus,
    pub parameters: Value,
    pub result: Value,
    pub metadata: Value,
    pub artifacts: Vec<Artifact>,
    pub dependencies: Vec<NodeId>,
    pub dependents: Vec<NodeId>,
    pub pending_dependencies: i64,
    pub enqueued: bool,
    pub worker_id: Option<WorkerInstanceId>,
    pub seq: Option<u64>,
    pub dispatch_id: Option<DispatchId>,
    pub pending_ack: bool,
    pub ack_deadline: Option<std::time::Instant>,
    pub frame_id: Option<FrameId>,
    pub middlewares: Vec<NodeId>,
    pub middleware_defs: Vec<MiddlewareDef>,
    pub chain_blocked: bool,
    pub role: Option<crate::workflow::NodeRole>,
    pub host_node_id: Option<NodeId>,
    pub chain_index: Option<usize>,
    pub attempts: u32,
    pub result_sequence: u64,
}

impl NodeState {
    pub fn new(node_id: NodeId, task_id: TaskId, parameters: Value) -> Self {
        Self {
            node_id,
            task_id,
            status: NodeStatus::Queued,
            parameters,
            result: Value::Null,
            metadata: Value::Object(Default::default()),
            artifacts: Vec::new(),
            dependencies: Vec::new(),
            dependents: Vec::new(),
            pending_dependencies: 0,
            enqueued: false,
            worker_id: None,
            seq: None,
            dispatch_id: None,
            pending_ack: false,
            ack_deadline: None,
            frame_id: None,
            middlewares: Vec::new(),
            middleware_defs: Vec::new(),
            chain_blocked: false,
            role: None,
            host_node_id: None,
            chain_index: None,
            attempts: 0,
            result_sequence: 0,
        }
    }

    /// §3 dispatchability invariant.
    pub fn is_dispatchable(&self) -> bool {
        self.status == NodeStatus::Queued
            && self.pending_dependencies == 0
            && !self.enqueued
            && !self.chain_blocked
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
#[path = "node_state_tests.rs"]
mod tests;
