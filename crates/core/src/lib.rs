// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! wf-core: shared domain types for the workflow scheduler/worker core —
//! identifiers, the dynamic parameter/result value tree, the workflow
//! snapshot model, node runtime state, frames, edge bindings, the wire
//! envelope, and the stable cross-boundary error taxonomy.

pub mod biz;
pub mod edge_binding;
pub mod envelope;
pub mod error;
pub mod frame;
pub mod id;
pub mod node_state;
pub mod value;
pub mod workflow;

pub use biz::{
    DispatchPayload, FeedbackChunk, FeedbackPayload, NextRequestPayload, NextResponsePayload,
    ResourceRef, ResultPayload,
};
pub use edge_binding::{BindingRoot, EdgeBinding};
pub use envelope::{Ack, Envelope, EnvelopeSender, Role};
pub use error::{CoreError, ExecError, ExecErrorContext};
pub use frame::{FrameDefinition, FrameRuntimeState};
pub use id::{
    DispatchId, FrameId, NodeId, RequestId, RunId, SessionId, TaskId, Tenant, WorkerInstanceId,
};
pub use node_state::{normalize_status, Artifact, NodeState, NodeStatus};
pub use workflow::{
    MiddlewareDef, MiddlewareDir, NodeRole, PackageRef, PortHandle, ResolvedPort, Subgraph,
    Workflow, WorkflowEdge, WorkflowNode,
};
