// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dynamic value tree used for node `parameters` and `result`.
//!
//! Parameters and results are an arbitrary tree of scalar/mapping/sequence
//! values. We reuse `serde_json::Value` as the wire representation (it
//! already has exactly this shape) and add a pointer-style (`/a/b/0`) path
//! accessor/merge routine on top, mirroring the port-binding paths used by
//! edge bindings.

use serde_json::Value;

/// Split a `/`-separated pointer path into segments. A leading `/` is
/// optional; an empty path addresses the whole document.
fn segments(path: &str) -> Vec<&str> {
    path.trim_start_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect()
}

/// Read a value at `path` (RFC-6901-ish, array indices are decimal).
pub fn get<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut cur = root;
    for seg in segments(path) {
        cur = match cur {
            Value::Object(map) => map.get(seg)?,
            Value::Array(arr) => arr.get(seg.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(cur)
}

/// Write `value` at `path`, creating intermediate objects as needed.
/// Array segments must address an existing index; arrays are not
/// auto-extended (parameters/results are not append-by-path targets here —
/// `append` chunks are handled separately in feedback streaming).
pub fn set(root: &mut Value, path: &str, value: Value) {
    let segs = segments(path);
    if segs.is_empty() {
        *root = value;
        return;
    }
    let mut cur = root;
    for seg in &segs[..segs.len() - 1] {
        if !cur.is_object() {
            *cur = Value::Object(serde_json::Map::new());
        }
        // The branch above just replaced `*cur` with an object if it wasn't one.
        #[allow(clippy::expect_used)]
        let map = cur.as_object_mut().expect("just coerced to object");
        cur = map.entry(seg.to_string()).or_insert_with(|| Value::Object(serde_json::Map::new()));
    }
    let last = segs[segs.len() - 1];
    if !cur.is_object() {
        *cur = Value::Object(serde_json::Map::new());
    }
    // Same invariant: `cur` was just forced into an object above.
    #[allow(clippy::expect_used)]
    cur.as_object_mut()
        .expect("just coerced to object")
        .insert(last.to_string(), value);
}

/// Remove the value at `path`, returning it if present.
pub fn remove(root: &mut Value, path: &str) -> Option<Value> {
    let segs = segments(path);
    if segs.is_empty() {
        return None;
    }
    let mut cur = root;
    for seg in &segs[..segs.len() - 1] {
        cur = cur.as_object_mut()?.get_mut(*seg)?;
    }
    cur.as_object_mut()?.remove(segs[segs.len() - 1])
}

/// One structural diff entry produced while merging feedback results into a
/// node's result tree (§4.8). `sequence` and `revision` are stamped by the
/// caller, not by the diff routine itself.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaOp {
    Replace,
    Remove,
    Append,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Delta {
    pub operation: DeltaOp,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// Structurally diff `incoming` against `existing` at `base_path`, emitting
/// one [`Delta`] per leaf that changed, was removed, or was appended to an
/// array. Scalars and differently-typed nodes are always replaced wholesale
/// rather than diffed further.
pub fn diff_merge(existing: &Value, incoming: &Value, base_path: &str) -> Vec<Delta> {
    let mut out = Vec::new();
    diff_into(existing, incoming, base_path, &mut out);
    out
}

fn join(base: &str, seg: &str) -> String {
    if base.is_empty() {
        format!("/{seg}")
    } else {
        format!("{base}/{seg}")
    }
}

fn diff_into(existing: &Value, incoming: &Value, path: &str, out: &mut Vec<Delta>) {
    match (existing, incoming) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            for (k, v) in new_map {
                let child_path = join(path, k);
                match old_map.get(k) {
                    Some(old_v) if old_v == v => {}
                    Some(old_v) => diff_into(old_v, v, &child_path, out),
                    None => out.push(Delta {
                        operation: DeltaOp::Replace,
                        path: child_path,
                        value: Some(v.clone()),
                    }),
                }
            }
            for k in old_map.keys() {
                if !new_map.contains_key(k) {
                    out.push(Delta {
                        operation: DeltaOp::Remove,
                        path: join(path, k),
                        value: None,
                    });
                }
            }
        }
        (Value::Array(old_arr), Value::Array(new_arr)) if new_arr.len() >= old_arr.len() => {
            if old_arr[..] != new_arr[..old_arr.len()] {
                out.push(Delta {
                    operation: DeltaOp::Replace,
                    path: path.to_string(),
                    value: Some(incoming.clone()),
                });
                return;
            }
            for appended in &new_arr[old_arr.len()..] {
                out.push(Delta {
                    operation: DeltaOp::Append,
                    path: path.to_string(),
                    value: Some(appended.clone()),
                });
            }
        }
        (old, new) if old == new => {}
        (_, new) => out.push(Delta {
            operation: DeltaOp::Replace,
            path: path.to_string(),
            value: Some(new.clone()),
        }),
    }
}

/// Apply a batch of deltas to `root`, in order. Used by tests and by any
/// downstream consumer that wants to reconstruct state from a delta stream
/// rather than snapshots.
pub fn apply_deltas(root: &mut Value, deltas: &[Delta]) {
    for d in deltas {
        match d.operation {
            DeltaOp::Replace => {
                if let Some(v) = &d.value {
                    set(root, &d.path, v.clone());
                }
            }
            DeltaOp::Remove => {
                remove(root, &d.path);
            }
            DeltaOp::Append => {
                if let Some(v) = &d.value {
                    let entry = get_or_insert_array(root, &d.path);
                    entry.push(v.clone());
                }
            }
        }
    }
}

fn get_or_insert_array<'a>(root: &'a mut Value, path: &str) -> &'a mut Vec<Value> {
    let segs = segments(path);
    if segs.is_empty() {
        if !root.is_array() {
            *root = Value::Array(Vec::new());
        }
        // `root` was just forced into an array above.
        #[allow(clippy::expect_used)]
        return root.as_array_mut().expect("just coerced to array");
    }
    let mut cur = root;
    for seg in &segs[..segs.len() - 1] {
        if !cur.is_object() {
            *cur = Value::Object(serde_json::Map::new());
        }
        // `cur` was just forced into an object above.
        #[allow(clippy::expect_used)]
        let map = cur.as_object_mut().expect("just coerced to object");
        cur = map.entry(seg.to_string()).or_insert_with(|| Value::Object(serde_json::Map::new()));
    }
    let last = segs[segs.len() - 1];
    if !cur.is_object() {
        *cur = Value::Object(serde_json::Map::new());
    }
    // `cur` was just forced into an object above.
    #[allow(clippy::expect_used)]
    let entry = cur
        .as_object_mut()
        .expect("just coerced to object")
        .entry(last.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    if !entry.is_array() {
        *entry = Value::Array(Vec::new());
    }
    // `entry` was just forced into an array above.
    #[allow(clippy::expect_used)]
    let entry = entry.as_array_mut().expect("just coerced to array");
    entry
}

#[cfg(test)]
#[path = "value_tests.rs"]
mod tests;
