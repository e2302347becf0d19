// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use wf_core::{Envelope, EnvelopeSender, Role};

fn sample_envelope() -> Envelope {
    Envelope::new(
        "biz.exec.dispatch",
        "tenant-a",
        EnvelopeSender { role: Role::Scheduler, id: "sched-1".into() },
        serde_json::json!({"task_id": "t-1"}),
    )
}

#[tokio::test]
async fn round_trips_over_an_in_memory_duplex() {
    let (mut client, mut server) = tokio::io::duplex(4096);
    let envelope = sample_envelope();

    write_envelope(&mut client, &envelope, std::time::Duration::from_secs(1))
        .await
        .unwrap();
    let received = read_envelope(&mut server, std::time::Duration::from_secs(1))
        .await
        .unwrap();

    assert_eq!(received.kind, envelope.kind);
    assert_eq!(received.id, envelope.id);
}

#[tokio::test]
async fn read_times_out_when_nothing_arrives() {
    let (_client, mut server) = tokio::io::duplex(4096);
    let result = read_envelope(&mut server, std::time::Duration::from_millis(20)).await;
    assert!(matches!(result, Err(SessionError::Timeout)));
}

#[test]
fn encode_rejects_oversized_payload() {
    let huge = "x".repeat(MAX_MESSAGE_SIZE + 1);
    let result = encode(&huge);
    assert!(matches!(result, Err(SessionError::MessageTooLarge { .. })));
}
