// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control message payload shapes (§6). These are interpreted by the
//! session layer itself, never forwarded to the business layer (§4.2).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    Token,
    Mtls,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeAuth {
    pub mode: AuthMode,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub fingerprint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeWorker {
    pub name: String,
    #[serde(default)]
    pub instance_id: Option<String>,
    pub version: String,
    pub hostname: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakePayload {
    pub protocol: u32,
    pub auth: HandshakeAuth,
    pub worker: HandshakeWorker,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Concurrency {
    pub max_parallel: u32,
    #[serde(default)]
    pub per_node_limits: Option<std::collections::HashMap<String, u32>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Capabilities {
    pub concurrency: Concurrency,
    #[serde(default)]
    pub runtimes: Vec<String>,
    #[serde(default)]
    pub features: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageStatus {
    Installed,
    Installing,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageSnapshotEntry {
    pub name: String,
    pub version: String,
    pub status: PackageStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterPayload {
    pub capabilities: Capabilities,
    #[serde(default)]
    pub payload_types: Vec<String>,
    #[serde(default)]
    pub packages: Vec<PackageSnapshotEntry>,
    #[serde(default)]
    pub manifests: Vec<serde_json::Value>,
    #[serde(default)]
    pub channels: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metrics {
    pub inflight: u32,
    #[serde(default)]
    pub cpu_pct: Option<f64>,
    #[serde(default)]
    pub mem_pct: Option<f64>,
    #[serde(default)]
    pub disk_pct: Option<f64>,
    #[serde(default)]
    pub latency_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackagesDrift {
    #[serde(default)]
    pub drift: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    pub healthy: bool,
    pub metrics: Metrics,
    #[serde(default)]
    pub packages: Option<PackagesDrift>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AckPayload {
    pub ok: bool,
    #[serde(default)]
    #[serde(rename = "for")]
    pub for_id: Option<String>,
    #[serde(default)]
    pub ack_seq: Option<u64>,
    #[serde(default)]
    pub ack_bitmap: Option<u64>,
    #[serde(default)]
    pub recv_window: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionAcceptPayload {
    pub session_id: String,
    pub session_token: String,
    pub expires_at: u64,
    pub resumed: bool,
    pub worker_instance_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResumePayload {
    pub session_id: String,
    pub session_token: String,
    #[serde(default)]
    pub last_seen_seq: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResetPayload {
    pub code: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionDrainPayload {}
