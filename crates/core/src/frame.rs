// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Container frames: runtime instantiation of a subgraph (§3, §4.4).

use crate::edge_binding::EdgeBinding;
use crate::id::{FrameId, NodeId};
use crate::node_state::NodeState;
use crate::workflow::Workflow;
use std::collections::HashMap;

/// Static definition of a frame, registered the first time a container node
/// with a given `subgraphId` is compiled. Keyed by `(parent_frame_id,
/// container_node_id)` by the run registry.
#[derive(Debug, Clone)]
pub struct FrameDefinition {
    pub container_node_id: NodeId,
    pub subgraph_id: String,
    pub workflow: Workflow,
}

/// Live instantiation of a [`FrameDefinition`] within a run.
pub struct FrameRuntimeState {
    pub frame_id: FrameId,
    pub parent_frame_id: Option<FrameId>,
    pub container_node_id: NodeId,
    pub nodes: HashMap<NodeId, NodeState>,
    pub edge_bindings: Vec<EdgeBinding>,
}

impl FrameRuntimeState {
    /// A frame is complete once every node in it reached a terminal status,
    /// except a middleware node that succeeded and flipped back to `queued`
    /// to await reuse — idle-and-queued counts as done here too.
    pub fn is_complete(&self) -> bool {
        self.nodes.values().all(|n| {
            n.is_terminal() || (n.role == Some(crate::workflow::NodeRole::Middleware) && n.status == crate::node_state::NodeStatus::Queued)
        })
    }

    pub fn has_failure(&self) -> bool {
        self.nodes.values().any(|n| n.status == crate::node_state::NodeStatus::Failed)
    }
}
