// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire-level round trip for the worker session protocol: a bare TCP client
//! speaks `control.handshake` / `control.register` / `control.ack` /
//! `biz.exec.result` directly against a real `SchedulerServer`, exercising
//! the handshake, dispatch, ack, and result path end to end rather than
//! through the run registry's in-process API alone.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};

use wf_core::biz::ResultPayload;
use wf_core::envelope::{Envelope, EnvelopeSender, Role};
use wf_core::workflow::{PackageRef, WorkflowEdge, WorkflowNode};
use wf_core::{NodeId, RunId, TaskId, Tenant, Workflow};
use wf_scheduler::dispatch::DispatchRetryPolicy;
use wf_scheduler::session_server::AuthConfig;
use wf_scheduler::{DispatchOrchestrator, EventBus, MiddlewareBridge, RunRegistry, SchedulerServer, WorkerSessionRegistry};
use wf_session::control::{
    AckPayload, AuthMode, Capabilities, Concurrency, HandshakeAuth, HandshakePayload, HandshakeWorker,
    PackageSnapshotEntry, PackageStatus, RegisterPayload, SessionAcceptPayload, SessionResumePayload,
};
use wf_session::wire;

const WORKER_TOKEN: &str = "test-worker-token";

fn node(id: &str) -> WorkflowNode {
    WorkflowNode {
        id: NodeId::new(id),
        node_type: "demo.task".to_string(),
        package: PackageRef { name: "demo".to_string(), version: "1".to_string() },
        parameters: serde_json::Value::Null,
        role: None,
        middlewares: Vec::new(),
    }
}

fn single_node_workflow() -> Workflow {
    Workflow {
        id: "wf".to_string(),
        schema_version: 1,
        nodes: vec![node("a")],
        edges: Vec::<WorkflowEdge>::new(),
        subgraphs: Vec::new(),
        metadata: Default::default(),
    }
}

async fn send(stream: &mut TcpStream, envelope: &Envelope) {
    wire::write_envelope(stream, envelope, Duration::from_secs(5)).await.expect("write envelope");
}

async fn recv(stream: &mut TcpStream) -> Envelope {
    wire::read_envelope(stream, Duration::from_secs(5)).await.expect("read envelope")
}

fn worker_sender() -> EnvelopeSender {
    EnvelopeSender { role: Role::Worker, id: "worker-1".to_string() }
}

#[tokio::test]
async fn handshake_register_dispatch_ack_result_round_trip() {
    let events = EventBus::default();
    let registry = Arc::new(RunRegistry::new(events.clone()));
    let workers = Arc::new(WorkerSessionRegistry::new());
    let middleware = Arc::new(MiddlewareBridge::new());
    let dispatch = DispatchOrchestrator::spawn(registry.clone(), workers.clone(), events.clone(), DispatchRetryPolicy::default());
    let auth = AuthConfig { token_secret: b"unit-test-secret".to_vec(), allowed_tokens: vec![WORKER_TOKEN.to_string()], session_ttl: Duration::from_secs(3600) };
    let server = Arc::new(SchedulerServer { registry: registry.clone(), workers, events, dispatch: dispatch.clone(), middleware, auth });

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(server.clone().serve(listener));

    let mut client = TcpStream::connect(addr).await.expect("connect");

    let handshake = HandshakePayload {
        protocol: 1,
        auth: HandshakeAuth { mode: AuthMode::Token, token: Some(WORKER_TOKEN.to_string()), fingerprint: None },
        worker: HandshakeWorker { name: "worker-1".to_string(), instance_id: Some("inst-1".to_string()), version: "0.1.0".to_string(), hostname: "test-host".to_string() },
    };
    let envelope = Envelope::new("control.handshake", "tenant-a", worker_sender(), serde_json::to_value(&handshake).expect("encode"));
    send(&mut client, &envelope).await;

    let accept = recv(&mut client).await;
    assert_eq!(accept.kind, "control.session.accept");

    let register = RegisterPayload {
        capabilities: Capabilities { concurrency: Concurrency { max_parallel: 4, per_node_limits: None }, runtimes: Vec::new(), features: Vec::new() },
        payload_types: Vec::new(),
        packages: vec![PackageSnapshotEntry { name: "demo".to_string(), version: "1".to_string(), status: PackageStatus::Installed }],
        manifests: Vec::new(),
        channels: Vec::new(),
    };
    let envelope = Envelope::new("control.register", "tenant-a", worker_sender(), serde_json::to_value(&register).expect("encode"));
    send(&mut client, &envelope).await;

    // Give the read loop a beat to apply the registration before a run is created,
    // since worker selection filters on `registered`.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let run_id = RunId::new("run-1");
    let ready = registry.create_run(run_id.clone(), "client-a".to_string(), Tenant::new("tenant-a"), single_node_workflow()).expect("compiles");
    dispatch.enqueue_ready(&run_id, ready);

    let dispatch_envelope = recv(&mut client).await;
    assert_eq!(dispatch_envelope.kind, "biz.exec.dispatch");
    let payload: wf_core::biz::DispatchPayload = serde_json::from_value(dispatch_envelope.payload).expect("decode dispatch payload");
    assert_eq!(payload.node_id, NodeId::new("a"));
    assert_eq!(payload.package_name, "demo");

    let ack = AckPayload { ok: true, for_id: Some(dispatch_envelope.id.clone()), ack_seq: None, ack_bitmap: None, recv_window: None };
    let envelope = Envelope::new("control.ack", "tenant-a", worker_sender(), serde_json::to_value(&ack).expect("encode"));
    send(&mut client, &envelope).await;

    // Let the ack land before asserting on it through the registry.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let pending_ack = registry.with_run(&run_id, |run| run.get_node(None, &NodeId::new("a")).expect("node exists").pending_ack);
    assert_eq!(pending_ack, Some(false));

    let result = ResultPayload {
        run_id: run_id.clone(),
        task_id: TaskId::root(&NodeId::new("a")),
        status: "SUCCEEDED".to_string(),
        result: serde_json::json!({"ok": true}),
        duration_ms: 12,
        metadata: serde_json::Value::Null,
        artifacts: Vec::new(),
        error: None,
    };
    let envelope = Envelope::new("biz.exec.result", "tenant-a", worker_sender(), serde_json::to_value(&result).expect("encode"));
    send(&mut client, &envelope).await;

    let result_ack = recv(&mut client).await;
    assert_eq!(result_ack.kind, "control.ack");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(registry.status(&run_id), Some(wf_scheduler::run_registry::RunStatus::Succeeded));
}

/// A worker that drops its TCP connection and reconnects presents its prior
/// `session_id`/`session_token` via `control.session.resume` instead of a
/// fresh handshake, and is accepted under the same worker identity.
#[tokio::test]
async fn disconnect_then_resume_reuses_the_worker_identity() {
    let events = EventBus::default();
    let registry = Arc::new(RunRegistry::new(events.clone()));
    let workers = Arc::new(WorkerSessionRegistry::new());
    let middleware = Arc::new(MiddlewareBridge::new());
    let dispatch = DispatchOrchestrator::spawn(registry.clone(), workers.clone(), events.clone(), DispatchRetryPolicy::default());
    let auth = AuthConfig { token_secret: b"unit-test-secret".to_vec(), allowed_tokens: vec![WORKER_TOKEN.to_string()], session_ttl: Duration::from_secs(3600) };
    let server = Arc::new(SchedulerServer { registry, workers, events, dispatch, middleware, auth });

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(server.clone().serve(listener));

    let mut first = TcpStream::connect(addr).await.expect("connect");
    let handshake = HandshakePayload {
        protocol: 1,
        auth: HandshakeAuth { mode: AuthMode::Token, token: Some(WORKER_TOKEN.to_string()), fingerprint: None },
        worker: HandshakeWorker { name: "worker-1".to_string(), instance_id: Some("inst-1".to_string()), version: "0.1.0".to_string(), hostname: "test-host".to_string() },
    };
    let envelope = Envelope::new("control.handshake", "tenant-a", worker_sender(), serde_json::to_value(&handshake).expect("encode"));
    send(&mut first, &envelope).await;

    let accept: SessionAcceptPayload = serde_json::from_value(recv(&mut first).await.payload).expect("decode accept");
    assert!(!accept.resumed);
    assert_eq!(accept.worker_instance_id, "inst-1");

    // Simulate a dropped connection: close the socket without a graceful
    // session teardown, then reconnect.
    drop(first);

    let mut second = TcpStream::connect(addr).await.expect("reconnect");
    let resumer = EnvelopeSender { role: Role::Worker, id: "inst-1".to_string() };
    let resume = SessionResumePayload { session_id: accept.session_id.clone(), session_token: accept.session_token.clone(), last_seen_seq: None };
    let envelope = Envelope::new("control.session.resume", "tenant-a", resumer, serde_json::to_value(&resume).expect("encode"));
    send(&mut second, &envelope).await;

    let resumed_accept: SessionAcceptPayload = serde_json::from_value(recv(&mut second).await.payload).expect("decode accept");
    assert!(resumed_accept.resumed);
    assert_eq!(resumed_accept.worker_instance_id, "inst-1");
    // A fresh session is still minted; resume re-establishes identity, not
    // the literal prior session.
    assert_ne!(resumed_accept.session_id, accept.session_id);
}
