// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[yare::parameterized(
    succeeded        = { "SUCCEEDED", NodeStatus::Succeeded },
    failed           = { "FAILED", NodeStatus::Failed },
    cancelled        = { "CANCELLED", NodeStatus::Cancelled },
    skipped          = { "SKIPPED", NodeStatus::Skipped },
    lowercase        = { "succeeded", NodeStatus::Succeeded },
    mixed_case       = { "CanCelled", NodeStatus::Cancelled },
    unknown_defaults = { "WEIRD", NodeStatus::Failed },
    empty_defaults   = { "", NodeStatus::Failed },
)]
fn normalizes_worker_reported_status(raw: &str, expected: NodeStatus) {
    assert_eq!(normalize_status(raw), expected);
}

#[test]
fn terminal_statuses_exclude_queued_and_running() {
    assert!(!NodeStatus::Queued.is_terminal());
    assert!(!NodeStatus::Running.is_terminal());
    assert!(NodeStatus::Succeeded.is_terminal());
    assert!(NodeStatus::Failed.is_terminal());
    assert!(NodeStatus::Cancelled.is_terminal());
}

#[test]
fn fresh_node_is_dispatchable() {
    let node = NodeState::new(NodeId::new("a"), TaskId::root(&NodeId::new("a")), Value::Null);
    assert!(node.is_dispatchable());
}

#[test]
fn enqueued_node_is_not_dispatchable() {
    let mut node = NodeState::new(NodeId::new("a"), TaskId::root(&NodeId::new("a")), Value::Null);
    node.enqueued = true;
    assert!(!node.is_dispatchable());
}
