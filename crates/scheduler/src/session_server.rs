// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scheduler session server (§4.3): accepts worker TCP connections, drives
//! the handshake/register/resume/heartbeat/drain control plane, and
//! forwards in-order business envelopes to the run registry, middleware
//! bridge, and feedback handler.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncRead, AsyncWrite, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use wf_core::biz::{FeedbackPayload, NextRequestPayload, NextResponsePayload, ResultPayload};
use wf_core::envelope::{Envelope, EnvelopeSender, Role};
use wf_core::error::code;
use wf_core::{ExecError, WorkerInstanceId};
use wf_session::control::{
    AckPayload, AuthMode, HandshakePayload, HeartbeatPayload, RegisterPayload,
    SessionAcceptPayload, SessionResetPayload, SessionResumePayload,
};
use wf_session::{wire, ReceiveWindow, SendWindow};

use crate::dispatch::DispatchOrchestrator;
use crate::events::{EventBus, SchedulerEvent};
use crate::feedback;
use crate::middleware::{MiddlewareBridge, NextOutcome};
use crate::run_registry::RunRegistry;
use crate::worker_session::{SessionStatus, WorkerSession, WorkerSessionRegistry};

/// Scheduler-side configuration needed to validate a handshake and mint
/// session tokens; separate from `config.rs` so it can be unit-constructed
/// in tests without touching the environment.
#[derive(Clone)]
pub struct AuthConfig {
    pub token_secret: Vec<u8>,
    pub allowed_tokens: Vec<String>,
    pub session_ttl: Duration,
}

#[derive(Clone)]
pub struct SchedulerServer {
    pub registry: Arc<RunRegistry>,
    pub workers: Arc<WorkerSessionRegistry>,
    pub events: EventBus,
    pub dispatch: Arc<DispatchOrchestrator>,
    pub middleware: Arc<MiddlewareBridge>,
    pub auth: AuthConfig,
}

impl SchedulerServer {
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> std::io::Result<()> {
        loop {
            let (stream, peer) = listener.accept().await?;
            let this = self.clone();
            tokio::spawn(async move {
                if let Err(err) = this.handle_connection(stream).await {
                    tracing::info!(peer = %peer, error = %err, "worker connection closed");
                }
            });
        }
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream) -> Result<(), wf_session::SessionError> {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let handshake_timeout = Duration::from_secs(10);

        let first = wire::read_envelope(&mut reader, handshake_timeout).await?;
        let (worker_instance_id, worker_name, tenant, resumed) = match first.kind.as_str() {
            "control.handshake" => {
                let payload: HandshakePayload = wire::decode(&serde_json::to_vec(&first.payload)?)?;
                self.authenticate(&payload)?;
                let instance_id = payload.worker.instance_id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                (instance_id, payload.worker.name.clone(), first.tenant.clone(), false)
            }
            "control.session.resume" => {
                let payload: SessionResumePayload = wire::decode(&serde_json::to_vec(&first.payload)?)?;
                match self.validate_resume(&first.sender.id, &first.tenant, &payload) {
                    Some(()) => (first.sender.id.clone(), first.sender.id.clone(), first.tenant.clone(), true),
                    None => {
                        self.send_reset(&mut writer, &first.tenant, code::SESSION_INVALID_TOKEN, "resume rejected").await?;
                        return Ok(());
                    }
                }
            }
            other => return Err(wf_session::SessionError::Protocol(format!("expected handshake, got {other}"))),
        };

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        let session_id = uuid::Uuid::new_v4().to_string();
        let (session_token, expires_at) = wf_session::token::issue(
            &self.auth.token_secret,
            &session_id,
            &worker_instance_id,
            &tenant,
            self.auth.session_ttl.as_secs(),
            now,
        );

        let previous = self.workers.insert(WorkerSession {
            worker_name: worker_name.clone(),
            worker_instance_id: WorkerInstanceId::new(worker_instance_id.clone()),
            tenant: tenant.clone(),
            session_id: session_id.clone(),
            session_token: session_token.clone(),
            session_expires_at: expires_at,
            authenticated: true,
            registered: false,
            status: SessionStatus::Connected,
            capabilities: Default::default(),
            packages: Vec::new(),
            manifests: Vec::new(),
            channels: Vec::new(),
            payload_types: Vec::new(),
            last_heartbeat: None,
            last_metrics: None,
            recv_window: ReceiveWindow::new(wf_session::DEFAULT_WINDOW_SIZE),
            send_window: SendWindow::new(wf_session::DEFAULT_WINDOW_SIZE),
            send_next_seq: 0,
            session_seq_to_envelope_id: Default::default(),
            outbound: outbound_tx,
        });
        if previous.is_some() {
            tracing::info!(worker = %worker_name, "handshake superseded a prior session");
        }

        spawn_writer(writer, outbound_rx);

        let accept = SessionAcceptPayload {
            session_id: session_id.clone(),
            session_token: session_token.clone(),
            expires_at,
            resumed,
            worker_instance_id: worker_instance_id.clone(),
        };
        self.send_to(&worker_instance_id, &worker_name, "control.session.accept", &tenant, serde_json::to_value(accept)?);

        self.read_loop(&mut reader, worker_instance_id, worker_name, tenant).await
    }

    fn authenticate(&self, payload: &HandshakePayload) -> Result<(), wf_session::SessionError> {
        match payload.auth.mode {
            AuthMode::Token => {
                let token = payload.auth.token.as_deref().unwrap_or_default();
                if self.auth.allowed_tokens.iter().any(|t| t == token) {
                    Ok(())
                } else {
                    Err(wf_session::SessionError::InvalidToken)
                }
            }
            AuthMode::Mtls => {
                if payload.auth.fingerprint.is_some() {
                    Ok(())
                } else {
                    Err(wf_session::SessionError::InvalidToken)
                }
            }
        }
    }

    fn validate_resume(&self, worker_instance_id: &str, tenant: &str, payload: &SessionResumePayload) -> Option<()> {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).ok()?.as_secs();
        wf_session::token::validate(&payload.session_token, &self.auth.token_secret, &payload.session_id, worker_instance_id, tenant, now).ok()?;
        Some(())
    }

    async fn send_reset<W: AsyncWrite + Unpin>(&self, writer: &mut W, tenant: &str, code: &str, reason: &str) -> Result<(), wf_session::SessionError> {
        let sender = EnvelopeSender { role: Role::Scheduler, id: "scheduler".into() };
        let payload = SessionResetPayload { code: code.to_string(), reason: reason.to_string() };
        let envelope = Envelope::new("control.session.reset", tenant, sender, serde_json::to_value(payload)?);
        wire::write_envelope(writer, &envelope, Duration::from_secs(5)).await
    }

    fn send_to(&self, worker_instance_id: &str, worker_name: &str, kind: &str, tenant: &str, payload: serde_json::Value) {
        let sender = EnvelopeSender { role: Role::Scheduler, id: "scheduler".into() };
        let envelope = Envelope::new(kind, tenant, sender, payload);
        self.workers.with_session(worker_instance_id, worker_name, |s| {
            let _ = s.outbound.send(envelope);
        });
    }

    async fn read_loop<R: AsyncRead + Unpin>(
        &self,
        reader: &mut R,
        worker_instance_id: String,
        worker_name: String,
        tenant: String,
    ) -> Result<(), wf_session::SessionError> {
        loop {
            let envelope = wire::read_envelope(reader, Duration::from_secs(120)).await?;
            match envelope.kind.as_str() {
                "control.register" => {
                    let payload: RegisterPayload = wire::decode(&serde_json::to_vec(&envelope.payload)?)?;
                    if let Some(drift) =
                        self.workers
                            .register(&worker_instance_id, &worker_name, payload.capabilities, payload.payload_types, payload.packages, payload.manifests, payload.channels)
                    {
                        for p in drift.added {
                            self.events.publish(SchedulerEvent::PackageAdded { worker_instance_id: worker_instance_id.clone(), tenant: tenant.clone(), package: p });
                        }
                        for p in drift.removed {
                            self.events.publish(SchedulerEvent::PackageRemoved { worker_instance_id: worker_instance_id.clone(), tenant: tenant.clone(), package: p });
                        }
                    }
                }
                "control.heartbeat" => {
                    let payload: HeartbeatPayload = wire::decode(&serde_json::to_vec(&envelope.payload)?)?;
                    self.workers.heartbeat(&worker_instance_id, &worker_name, payload.healthy, payload.metrics, std::time::Instant::now());
                }
                "control.ack" => {
                    let payload: AckPayload = wire::decode(&serde_json::to_vec(&envelope.payload)?)?;
                    self.handle_ack(payload);
                }
                "control.session.drain" => {
                    self.workers.drain(&worker_instance_id, &worker_name);
                }
                _ if envelope.is_control() => {
                    tracing::debug!(kind = %envelope.kind, "ignoring unexpected session-layer frame mid-stream");
                }
                _ => self.handle_business(envelope, &worker_instance_id, &worker_name, &tenant),
            }
        }
    }

    /// A `control.ack{for}` confirms the dispatch envelope whose id equals
    /// `for` (dispatch ids are used as envelope ids, see `dispatch.rs`).
    fn handle_ack(&self, payload: AckPayload) {
        let Some(for_id) = payload.for_id else { return };
        let dispatch_id = wf_core::DispatchId::new(for_id);
        if let Some(run_id) = self.registry.find_run_for_dispatch(&dispatch_id) {
            let _ = self.registry.mark_acknowledged(&run_id, &dispatch_id);
        }
    }

    fn handle_business(&self, envelope: Envelope, worker_instance_id: &str, worker_name: &str, tenant: &str) {
        match envelope.kind.as_str() {
            "biz.exec.result" => {
                let Ok(payload) = serde_json::from_value::<ResultPayload>(envelope.payload) else { return };
                self.handle_result(payload);
                self.ack_envelope(&envelope.id, worker_instance_id, worker_name, tenant);
            }
            "biz.exec.feedback" => {
                let Ok(payload) = serde_json::from_value::<FeedbackPayload>(envelope.payload) else { return };
                if let Err(err) = feedback::handle_feedback(&self.registry, &self.events, payload) {
                    tracing::warn!(error = %err, "feedback handling failed");
                }
            }
            "biz.exec.next.request" => {
                let Ok(payload) = serde_json::from_value::<NextRequestPayload>(envelope.payload) else { return };
                self.handle_next_request(payload);
            }
            other => tracing::debug!(kind = other, "ignoring unrecognized business envelope"),
        }
    }

    fn ack_envelope(&self, envelope_id: &str, worker_instance_id: &str, worker_name: &str, tenant: &str) {
        let payload = AckPayload { ok: true, for_id: Some(envelope_id.to_string()), ack_seq: None, ack_bitmap: None, recv_window: None };
        if let Ok(v) = serde_json::to_value(payload) {
            self.send_to(worker_instance_id, worker_name, "control.ack", tenant, v);
        }
    }

    fn handle_result(&self, payload: ResultPayload) {
        let error = payload.error.clone();
        let result = payload.result.clone();
        match self.registry.record_result(&payload.run_id, &payload.task_id, &payload.status, payload.result, payload.metadata, payload.artifacts) {
            Ok(ready) => self.dispatch.enqueue_ready(&payload.run_id, ready),
            Err(err) => tracing::warn!(run = %payload.run_id, task = %payload.task_id, error = %err, "record_result failed"),
        }

        let normalized = wf_core::normalize_status(&payload.status);
        if let Some(resolution) = self.middleware.resolve_by_target_task(&payload.task_id, normalized, result) {
            self.deliver_next_response(resolution, error);
        }
    }

    fn deliver_next_response(&self, resolution: crate::middleware::NextResolution, error: Option<ExecError>) {
        let response = NextResponsePayload {
            request_id: resolution.request_id,
            run_id: resolution.run_id,
            node_id: resolution.calling_node,
            middleware_id: resolution.calling_middleware,
            result: resolution.result,
            error: error.or(resolution.error),
            trace: serde_json::Value::Null,
        };
        self.workers.with_session_by_instance(&resolution.worker_id, |session| {
            if let Ok(v) = serde_json::to_value(&response) {
                let sender = EnvelopeSender { role: Role::Scheduler, id: "scheduler".into() };
                let envelope = Envelope::new("biz.exec.next.response", session.tenant.clone(), sender, v);
                let _ = session.outbound.send(envelope);
            }
        });
    }

    fn handle_next_request(&self, payload: NextRequestPayload) {
        match self.middleware.handle_next_request(&self.registry, &payload.run_id, &payload.middleware_id, payload.timeout_ms) {
            Ok((_, NextOutcome::Dispatch(request))) => self.dispatch.enqueue(request),
            Ok((_, NextOutcome::FrameActivated(ready))) => self.dispatch.enqueue_ready(&payload.run_id, ready),
            Err(err) => tracing::warn!(run = %payload.run_id, middleware = %payload.middleware_id, error = %err, "next() request failed"),
        }
    }
}

fn spawn_writer(mut writer: WriteHalf<TcpStream>, mut outbound_rx: mpsc::UnboundedReceiver<Envelope>) {
    tokio::spawn(async move {
        while let Some(envelope) = outbound_rx.recv().await {
            if wire::write_envelope(&mut writer, &envelope, Duration::from_secs(10)).await.is_err() {
                break;
            }
        }
    });
}
