// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workflow input snapshot: nodes, edges, subgraphs (§3 "Workflow").

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::id::NodeId;

/// Role a node plays in the middleware chain model (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    Middleware,
    Container,
    Host,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRef {
    pub name: String,
    pub version: String,
}

/// A middleware entry inside a host node's ordered chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiddlewareDef {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub middleware_type: String,
    pub package: PackageRef,
    #[serde(default)]
    pub parameters: Value,
}

/// A workflow node (§3). Subgraphs are referenced indirectly: a
/// `workflow.container` node stores `parameters.__container.subgraphId`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: String,
    pub package: PackageRef,
    #[serde(default)]
    pub parameters: Value,
    #[serde(default)]
    pub role: Option<NodeRole>,
    #[serde(default)]
    pub middlewares: Vec<MiddlewareDef>,
}

impl WorkflowNode {
    pub fn is_container(&self) -> bool {
        self.node_type == "workflow.container"
    }

    /// The nested subgraph id, if this node is a container with one bound.
    pub fn subgraph_id(&self) -> Option<&str> {
        self.parameters
            .get("__container")
            .and_then(|c| c.get("subgraphId"))
            .and_then(|v| v.as_str())
    }
}

/// An edge endpoint: a node id plus a named port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortHandle {
    pub node: NodeId,
    pub port: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEdge {
    pub source: PortHandle,
    pub target: PortHandle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subgraph {
    pub id: String,
    pub workflow: Workflow,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub schema_version: u32,
    pub nodes: Vec<WorkflowNode>,
    pub edges: Vec<WorkflowEdge>,
    #[serde(default)]
    pub subgraphs: Vec<Subgraph>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl Workflow {
    pub fn node(&self, id: &NodeId) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    pub fn subgraph(&self, id: &str) -> Option<&Subgraph> {
        self.subgraphs.iter().find(|s| s.id == id)
    }

    /// Canonical JSON: sorted keys, no insignificant whitespace. Used as the
    /// input to the definition hash (§4.4, §9 open question — resolved here
    /// to match byte-for-byte across equal snapshots).
    pub fn canonical_json(&self) -> Result<String, serde_json::Error> {
        let value = serde_json::to_value(self)?;
        Ok(canonicalize(&value))
    }

    /// SHA-256 of [`Workflow::canonical_json`], hex-encoded.
    pub fn definition_hash(&self) -> Result<String, serde_json::Error> {
        use sha2::{Digest, Sha256};
        let canon = self.canonical_json()?;
        let mut hasher = Sha256::new();
        hasher.update(canon.as_bytes());
        Ok(hex_encode(&hasher.finalize()))
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

/// Re-serialize a [`Value`] with object keys sorted, matching the wire form
/// `serde_json` already produces for arrays/scalars (no insignificant
/// whitespace either way since we don't pretty-print).
fn canonicalize(value: &Value) -> String {
    fn sort(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut entries: Vec<_> = map.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                let mut sorted = serde_json::Map::new();
                for (k, v) in entries {
                    sorted.insert(k.clone(), sort(v));
                }
                Value::Object(sorted)
            }
            Value::Array(items) => Value::Array(items.iter().map(sort).collect()),
            other => other.clone(),
        }
    }
    serde_json::to_string(&sort(value)).unwrap_or_default()
}

/// Encoding for a port handle that may target a middleware instead of the
/// node directly: `mw:{middleware_id}:{dir}:{port}` where `dir` is `in` or
/// `out`. Plain node ports have no prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedPort {
    Node { node: NodeId, port: String },
    Middleware { middleware: NodeId, dir: MiddlewareDir, port: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MiddlewareDir {
    In,
    Out,
}

/// Parse a raw port string, applying the `mw:{id}:{dir}:{port}` encoding
/// when present.
pub fn resolve_port(node: &NodeId, raw_port: &str) -> ResolvedPort {
    if let Some(rest) = raw_port.strip_prefix("mw:") {
        let mut parts = rest.splitn(3, ':');
        if let (Some(mw_id), Some(dir), Some(port)) = (parts.next(), parts.next(), parts.next()) {
            let dir = if dir == "out" { MiddlewareDir::Out } else { MiddlewareDir::In };
            return ResolvedPort::Middleware {
                middleware: NodeId::new(mw_id),
                dir,
                port: port.to_string(),
            };
        }
    }
    ResolvedPort::Node { node: node.clone(), port: raw_port.to_string() }
}

#[cfg(test)]
#[path = "workflow_tests.rs"]
mod tests;
