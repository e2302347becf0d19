// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Compiled source→target data-propagation rules derived from workflow
//! edges whose ports carry `/parameters/...` or `/results/...` bindings
//! (§3, §4.4).

use serde_json::Value;

use crate::id::NodeId;
use crate::value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingRoot {
    Parameters,
    Results,
}

impl BindingRoot {
    pub fn parse(root: &str) -> Option<Self> {
        match root {
            "parameters" => Some(Self::Parameters),
            "results" => Some(Self::Results),
            _ => None,
        }
    }
}

/// Split a binding string of the form `<root>/<path...>` (e.g.
/// `parameters/foo/bar`) into its root and remaining pointer path.
pub fn parse_binding(binding: &str) -> Option<(BindingRoot, String)> {
    let binding = binding.trim_start_matches('/');
    let mut parts = binding.splitn(2, '/');
    let root = BindingRoot::parse(parts.next()?)?;
    let rest = parts.next().unwrap_or("");
    Some((root, format!("/{rest}")))
}

#[derive(Debug, Clone)]
pub struct EdgeBinding {
    pub source_node: NodeId,
    pub source_root: BindingRoot,
    pub source_path: String,
    pub target_node: NodeId,
    pub target_root: BindingRoot,
    pub target_path: String,
}

impl EdgeBinding {
    /// Apply this binding: read `source_value` (the resolved parameters or
    /// result tree of the source node) and copy it into `target_parameters`
    /// / `target_result` as declared. Idempotent: applying the same
    /// binding twice with the same source value is a no-op on the second
    /// call (§8 round-trip law).
    pub fn apply(&self, source_parameters: &Value, source_result: &Value, target_parameters: &mut Value, target_result: &mut Value) {
        let source_tree = match self.source_root {
            BindingRoot::Parameters => source_parameters,
            BindingRoot::Results => source_result,
        };
        let Some(v) = value::get(source_tree, &self.source_path) else {
            return;
        };
        let v = v.clone();
        let target_tree = match self.target_root {
            BindingRoot::Parameters => &mut *target_parameters,
            BindingRoot::Results => &mut *target_result,
        };
        value::set(target_tree, &self.target_path, v);
    }
}

#[cfg(test)]
#[path = "edge_binding_tests.rs"]
mod tests;
