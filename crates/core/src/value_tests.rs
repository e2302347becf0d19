// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

#[test]
fn get_nested_path() {
    let root = json!({"a": {"b": [1, 2, {"c": "x"}]}});
    assert_eq!(get(&root, "/a/b/2/c"), Some(&json!("x")));
    assert_eq!(get(&root, "/a/missing"), None);
}

#[test]
fn set_creates_intermediate_objects() {
    let mut root = json!({});
    set(&mut root, "/a/b/c", json!(42));
    assert_eq!(root, json!({"a": {"b": {"c": 42}}}));
}

#[test]
fn set_whole_document_on_empty_path() {
    let mut root = json!({"a": 1});
    set(&mut root, "", json!({"b": 2}));
    assert_eq!(root, json!({"b": 2}));
}

#[test]
fn diff_detects_replace_remove_append() {
    let old = json!({"x": 1, "y": [1, 2], "z": "old"});
    let new = json!({"x": 1, "y": [1, 2, 3], "z": "new"});
    let deltas = diff_merge(&old, &new, "");
    assert!(deltas.iter().any(|d| d.operation == DeltaOp::Append && d.path == "/y"));
    assert!(deltas.iter().any(|d| d.operation == DeltaOp::Replace && d.path == "/z"));
}

#[test]
fn diff_detects_key_removal() {
    let old = json!({"x": 1, "y": 2});
    let new = json!({"x": 1});
    let deltas = diff_merge(&old, &new, "");
    assert_eq!(deltas.len(), 1);
    assert_eq!(deltas[0].operation, DeltaOp::Remove);
    assert_eq!(deltas[0].path, "/y");
}

#[test]
fn apply_deltas_reconstructs_target() {
    let old = json!({"a": {"b": 1}, "c": [1]});
    let new = json!({"a": {"b": 2}, "c": [1, 2]});
    let deltas = diff_merge(&old, &new, "");
    let mut reconstructed = old.clone();
    apply_deltas(&mut reconstructed, &deltas);
    assert_eq!(reconstructed, new);
}

#[test]
fn binding_idempotence_applying_twice_is_a_noop() {
    let mut target = json!({"parameters": {}});
    set(&mut target, "/parameters/x", json!("v"));
    let snapshot = target.clone();
    set(&mut target, "/parameters/x", json!("v"));
    assert_eq!(target, snapshot);
}

#[test]
fn diff_then_apply_reconstructs_arbitrary_flat_objects() {
    use proptest::prelude::*;

    fn flat_object() -> impl Strategy<Value = Value> {
        proptest::collection::hash_map("[a-e]", any::<i32>(), 0..6)
            .prop_map(|m| Value::Object(m.into_iter().map(|(k, v)| (k, json!(v))).collect()))
    }

    proptest!(|(old in flat_object(), new in flat_object())| {
        let deltas = diff_merge(&old, &new, "");
        let mut reconstructed = old.clone();
        apply_deltas(&mut reconstructed, &deltas);
        prop_assert_eq!(reconstructed, new);
    });
}
