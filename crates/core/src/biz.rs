// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Business payload DTOs carried inside `biz.*` envelopes (§6). The session
//! layer never inspects these — they are defined here, not in `wf-session`,
//! so a payload schema change never touches the transport crate.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ExecError;
use crate::id::{NodeId, RequestId, RunId, TaskId};
use crate::workflow::PackageRef;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRef {
    pub id: String,
    #[serde(default)]
    pub scope: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchPayload {
    pub run_id: RunId,
    pub task_id: TaskId,
    pub node_id: NodeId,
    pub node_type: String,
    pub package_name: String,
    pub package_version: String,
    #[serde(default)]
    pub parameters: Value,
    #[serde(default)]
    pub constraints: Value,
    #[serde(default)]
    pub concurrency_key: String,
    #[serde(default)]
    pub resource_refs: Vec<ResourceRef>,
    #[serde(default)]
    pub affinity: Option<String>,
    #[serde(default)]
    pub host_node_id: Option<NodeId>,
    #[serde(default)]
    pub middleware_chain: Option<Vec<NodeId>>,
    #[serde(default)]
    pub chain_index: Option<usize>,
}

impl DispatchPayload {
    pub fn package(&self) -> PackageRef {
        PackageRef { name: self.package_name.clone(), version: self.package_version.clone() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultPayload {
    pub run_id: RunId,
    pub task_id: TaskId,
    pub status: String,
    #[serde(default)]
    pub result: Value,
    pub duration_ms: u64,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub artifacts: Vec<crate::node_state::Artifact>,
    #[serde(default)]
    pub error: Option<ExecError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackChunk {
    pub channel: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub data_base64: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackPayload {
    pub run_id: RunId,
    pub task_id: TaskId,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub chunks: Vec<FeedbackChunk>,
    #[serde(default)]
    pub metrics: Value,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NextRequestPayload {
    pub request_id: RequestId,
    pub run_id: RunId,
    pub node_id: NodeId,
    pub middleware_id: NodeId,
    #[serde(default)]
    pub chain_index: Option<usize>,
    #[serde(default)]
    pub host_ctx: Value,
    #[serde(default)]
    pub middleware_ctx: Value,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NextResponsePayload {
    pub request_id: RequestId,
    pub run_id: RunId,
    pub node_id: NodeId,
    pub middleware_id: NodeId,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<ExecError>,
    #[serde(default)]
    pub trace: Value,
}
