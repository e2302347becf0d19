// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn sender() -> EnvelopeSender {
    EnvelopeSender { role: Role::Worker, id: "w-1".into() }
}

#[test]
fn session_layer_frame_classification() {
    let e = Envelope::new("control.handshake", "t1", sender(), Value::Null);
    assert!(e.is_session_layer_frame());
    assert!(e.is_control());

    let biz = Envelope::new("biz.exec.dispatch", "t1", sender(), Value::Null);
    assert!(!biz.is_session_layer_frame());
    assert!(!biz.is_control());
}

#[test]
fn new_envelope_has_unique_ids() {
    let a = Envelope::new("biz.exec.feedback", "t1", sender(), Value::Null);
    let b = Envelope::new("biz.exec.feedback", "t1", sender(), Value::Null);
    assert_ne!(a.id, b.id);
}

#[test]
fn round_trips_through_json() {
    let e = Envelope::new("biz.exec.result", "tenant-a", sender(), serde_json::json!({"status": "SUCCEEDED"}))
        .with_corr("task-1")
        .with_ack_request();
    let json = serde_json::to_string(&e).unwrap();
    let back: Envelope = serde_json::from_str(&json).unwrap();
    assert_eq!(back.kind, "biz.exec.result");
    assert_eq!(back.corr.as_deref(), Some("task-1"));
    assert_eq!(back.ack.unwrap().request, Some(true));
}

#[test]
fn timestamp_is_well_formed_iso8601() {
    let e = Envelope::new("control.heartbeat", "t1", sender(), Value::Null);
    assert_eq!(e.ts.len(), 20);
    assert!(e.ts.ends_with('Z'));
}
