// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

#[test]
fn parse_binding_splits_root_and_path() {
    let (root, path) = parse_binding("parameters/foo/bar").unwrap();
    assert_eq!(root, BindingRoot::Parameters);
    assert_eq!(path, "/foo/bar");
}

#[test]
fn apply_copies_source_into_target() {
    let binding = EdgeBinding {
        source_node: NodeId::new("a"),
        source_root: BindingRoot::Results,
        source_path: "/value".into(),
        target_node: NodeId::new("b"),
        target_root: BindingRoot::Parameters,
        target_path: "/input".into(),
    };
    let src_params = json!({});
    let src_result = json!({"value": 42});
    let mut target_params = json!({});
    let mut target_result = json!({});
    binding.apply(&src_params, &src_result, &mut target_params, &mut target_result);
    assert_eq!(target_params, json!({"input": 42}));
}

#[test]
fn apply_twice_with_same_source_is_idempotent() {
    let binding = EdgeBinding {
        source_node: NodeId::new("a"),
        source_root: BindingRoot::Results,
        source_path: "/value".into(),
        target_node: NodeId::new("b"),
        target_root: BindingRoot::Parameters,
        target_path: "/input".into(),
    };
    let src_params = json!({});
    let src_result = json!({"value": 42});
    let mut target_params = json!({});
    let mut target_result = json!({});
    binding.apply(&src_params, &src_result, &mut target_params, &mut target_result);
    let after_first = target_params.clone();
    binding.apply(&src_params, &src_result, &mut target_params, &mut target_result);
    assert_eq!(target_params, after_first);
}

#[test]
fn apply_is_noop_when_source_path_missing() {
    let binding = EdgeBinding {
        source_node: NodeId::new("a"),
        source_root: BindingRoot::Results,
        source_path: "/missing".into(),
        target_node: NodeId::new("b"),
        target_root: BindingRoot::Parameters,
        target_path: "/input".into(),
    };
    let mut target_params = json!({"input": "untouched"});
    let mut target_result = json!({});
    binding.apply(&json!({}), &json!({}), &mut target_params, &mut target_result);
    assert_eq!(target_params, json!({"input": "untouched"}));
}
