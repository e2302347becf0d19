// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn sample() -> Workflow {
    Workflow {
        id: "wf-1".into(),
        schema_version: 1,
        nodes: vec![
            WorkflowNode {
                id: NodeId::new("a"),
                node_type: "demo".into(),
                package: PackageRef { name: "demo".into(), version: "1".into() },
                parameters: serde_json::json!({"x": 1}),
                role: None,
                middlewares: vec![],
            },
            WorkflowNode {
                id: NodeId::new("b"),
                node_type: "demo".into(),
                package: PackageRef { name: "demo".into(), version: "1".into() },
                parameters: serde_json::json!({"y": 2}),
                role: None,
                middlewares: vec![],
            },
        ],
        edges: vec![WorkflowEdge {
            source: PortHandle { node: NodeId::new("a"), port: "out".into() },
            target: PortHandle { node: NodeId::new("b"), port: "in".into() },
        }],
        subgraphs: vec![],
        metadata: Default::default(),
    }
}

#[test]
fn definition_hash_is_a_pure_function_of_content() {
    let wf1 = sample();
    let wf2 = sample();
    assert_eq!(wf1.definition_hash().unwrap(), wf2.definition_hash().unwrap());
}

#[test]
fn definition_hash_changes_with_content() {
    let wf1 = sample();
    let mut wf2 = sample();
    wf2.nodes[0].parameters = serde_json::json!({"x": 2});
    assert_ne!(wf1.definition_hash().unwrap(), wf2.definition_hash().unwrap());
}

#[test]
fn canonical_json_sorts_keys_regardless_of_insertion_order() {
    let v1 = serde_json::json!({"b": 1, "a": 2});
    let v2 = serde_json::json!({"a": 2, "b": 1});
    assert_eq!(canonicalize(&v1), canonicalize(&v2));
}

#[test]
fn resolve_port_parses_middleware_encoding() {
    let node = NodeId::new("host");
    match resolve_port(&node, "mw:mid-1:out:result") {
        ResolvedPort::Middleware { middleware, dir, port } => {
            assert_eq!(middleware.as_str(), "mid-1");
            assert_eq!(dir, MiddlewareDir::Out);
            assert_eq!(port, "result");
        }
        other => panic!("expected middleware port, got {other:?}"),
    }
}

#[test]
fn resolve_port_defaults_to_plain_node_port() {
    let node = NodeId::new("a");
    match resolve_port(&node, "out") {
        ResolvedPort::Node { node: n, port } => {
            assert_eq!(n, node);
            assert_eq!(port, "out");
        }
        other => panic!("expected node port, got {other:?}"),
    }
}
