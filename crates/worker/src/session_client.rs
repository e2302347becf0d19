// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker-side session client (§4.2, §4.3): handshake/register/resume
//! against the scheduler, heartbeat, per-envelope ack retry for results, and
//! forwarding of inbound dispatches to the dispatch pipeline. Symmetric to
//! `wf_scheduler::session_server`, grounded in the same wire/control
//! primitives from `wf-session`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};

use wf_core::biz::DispatchPayload;
use wf_core::envelope::{Envelope, EnvelopeSender, Role};
use wf_core::error::code;
use wf_core::{ExecError, FeedbackPayload, ResultPayload};
use wf_session::ack_retry::{AckOutcome, AckTracker, RetryPolicy};
use wf_session::control::{
    AckPayload, AuthMode, Capabilities, HandshakeAuth, HandshakePayload, HandshakeWorker,
    HeartbeatPayload, Metrics, PackageSnapshotEntry, RegisterPayload, SessionAcceptPayload,
    SessionResumePayload,
};
use wf_session::wire;

use crate::dispatch_pipeline::{DispatchedResult, DispatchPipeline, NextCaller};
use crate::error::WorkerError;

#[derive(Clone)]
pub struct WorkerIdentity {
    pub instance_id: String,
    pub name: String,
    pub version: String,
    pub hostname: String,
}

#[derive(Clone)]
pub struct AuthConfig {
    pub mode: AuthMode,
    pub token: Option<String>,
}

pub struct SessionClientConfig {
    pub addr: String,
    pub tenant: String,
    pub identity: WorkerIdentity,
    pub auth: AuthConfig,
    pub capabilities: Capabilities,
    pub packages: Vec<PackageSnapshotEntry>,
    pub heartbeat_interval: Duration,
}

struct SessionState {
    session_id: String,
    session_token: String,
}

type PendingNext = Arc<Mutex<HashMap<String, oneshot::Sender<Result<serde_json::Value, ExecError>>>>>;

/// Sends `biz.exec.next.request` and resolves when the matching
/// `biz.exec.next.response` arrives, correlated by `request_id` (§4.5).
struct WorkerNextCaller {
    run_id: wf_core::RunId,
    node_id: wf_core::NodeId,
    tenant: String,
    outbound: mpsc::UnboundedSender<Envelope>,
    pending: PendingNext,
}

#[async_trait]
impl NextCaller for WorkerNextCaller {
    async fn call_next(&self, payload: serde_json::Value, timeout: Option<Duration>) -> Result<serde_json::Value, ExecError> {
        let request_id = wf_core::RequestId::new(uuid::Uuid::new_v4().to_string());
        let request = wf_core::NextRequestPayload {
            request_id: request_id.clone(),
            run_id: self.run_id.clone(),
            node_id: self.node_id.clone(),
            middleware_id: self.node_id.clone(),
            chain_index: None,
            host_ctx: serde_json::Value::Null,
            middleware_ctx: serde_json::Value::Null,
            payload,
            timeout_ms: timeout.map(|t| t.as_millis() as u64),
        };

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(request_id.as_str().to_string(), tx);

        let sender = EnvelopeSender { role: Role::Worker, id: "worker".into() };
        let value = serde_json::to_value(&request).map_err(|e| ExecError::new(code::NEXT_FAILED, e.to_string(), "worker.next"))?;
        let envelope = Envelope::new("biz.exec.next.request", self.tenant.clone(), sender, value);
        if self.outbound.send(envelope).is_err() {
            self.pending.lock().remove(request_id.as_str());
            return Err(ExecError::new(code::NEXT_UNAVAILABLE, "session disconnected", "worker.next"));
        }

        let wait = timeout.unwrap_or(Duration::from_secs(300));
        match tokio::time::timeout(wait, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ExecError::new(code::NEXT_UNAVAILABLE, "session disconnected", "worker.next")),
            Err(_) => {
                self.pending.lock().remove(request_id.as_str());
                Err(ExecError::new(code::NEXT_TIMEOUT, "next() timed out", "worker.next"))
            }
        }
    }
}

pub struct SessionClient {
    config: SessionClientConfig,
    pipeline: Arc<DispatchPipeline>,
    results_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<DispatchedResult>>,
}

impl SessionClient {
    pub fn new(config: SessionClientConfig, pipeline: Arc<DispatchPipeline>, results_rx: mpsc::UnboundedReceiver<DispatchedResult>) -> Self {
        Self { config, pipeline, results_rx: tokio::sync::Mutex::new(results_rx) }
    }

    /// Connect, run the session until it drops, then back off and retry
    /// forever — the reconnect loop the teacher's adapters reconnect with
    /// exponential backoff for transient transport failures.
    pub async fn run(self: Arc<Self>) {
        let mut backoff = Duration::from_millis(500);
        let max_backoff = Duration::from_secs(30);
        let resumable: Arc<Mutex<Option<SessionState>>> = Arc::new(Mutex::new(None));

        loop {
            match self.clone().connect_once(resumable.clone()).await {
                Ok(()) => {
                    backoff = Duration::from_millis(500);
                }
                Err(err) => {
                    tracing::warn!(error = %err, "session connection failed, retrying");
                }
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(max_backoff);
        }
    }

    async fn connect_once(self: Arc<Self>, resumable: Arc<Mutex<Option<SessionState>>>) -> Result<(), WorkerError> {
        let stream = TcpStream::connect(&self.config.addr).await?;
        let (mut reader, mut writer) = tokio::io::split(stream);

        let prior = resumable.lock().take();
        let sender = EnvelopeSender { role: Role::Worker, id: self.config.identity.instance_id.clone() };

        let accept = if let Some(prior) = prior {
            let payload = SessionResumePayload { session_id: prior.session_id.clone(), session_token: prior.session_token.clone(), last_seen_seq: None };
            let envelope = Envelope::new("control.session.resume", self.config.tenant.clone(), sender.clone(), serde_json::to_value(payload)?);
            wire::write_envelope(&mut writer, &envelope, Duration::from_secs(5)).await?;
            match self.await_accept(&mut reader).await {
                Ok(accept) => accept,
                Err(_) => self.handshake(&mut reader, &mut writer, sender.clone()).await?,
            }
        } else {
            self.handshake(&mut reader, &mut writer, sender.clone()).await?
        };

        *resumable.lock() = Some(SessionState { session_id: accept.session_id.clone(), session_token: accept.session_token.clone() });

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let pending_next: PendingNext = Arc::new(Mutex::new(HashMap::new()));
        let ack_tracker = Arc::new(AckTracker::<Envelope>::new(RetryPolicy::default()));

        spawn_writer(writer, outbound_rx);
        self.send_register(&outbound_tx)?;
        self.spawn_heartbeat(outbound_tx.clone());
        self.spawn_ack_retry(ack_tracker.clone(), outbound_tx.clone());

        self.read_loop(&mut reader, outbound_tx, pending_next, ack_tracker).await
    }

    /// Take a completed dispatch off the pipeline's result channel and
    /// publish it as `biz.exec.result` with ack tracking.
    async fn drain_one_result(&self, outbound: &mpsc::UnboundedSender<Envelope>, ack_tracker: &AckTracker<Envelope>) -> Option<()> {
        let result = self.results_rx.lock().await.recv().await?;
        let payload = ResultPayload {
            run_id: result.run_id,
            task_id: result.task_id,
            status: result.outcome.status.as_str().to_string(),
            result: result.outcome.result,
            duration_ms: result.duration_ms,
            metadata: result.outcome.metadata,
            artifacts: result.outcome.artifacts,
            error: result.outcome.error,
        };
        if let Err(err) = self.send_result(outbound, ack_tracker, payload) {
            tracing::warn!(error = %err, "failed to publish dispatch result");
        }
        Some(())
    }

    async fn handshake<R: AsyncRead + Unpin, W: AsyncWrite + Unpin>(
        &self,
        reader: &mut R,
        writer: &mut W,
        sender: EnvelopeSender,
    ) -> Result<SessionAcceptPayload, WorkerError> {
        let payload = HandshakePayload {
            protocol: 1,
            auth: HandshakeAuth {
                mode: self.config.auth.mode,
                token: self.config.auth.token.clone(),
                fingerprint: None,
            },
            worker: HandshakeWorker {
                name: self.config.identity.name.clone(),
                instance_id: Some(self.config.identity.instance_id.clone()),
                version: self.config.identity.version.clone(),
                hostname: self.config.identity.hostname.clone(),
            },
        };
        let envelope = Envelope::new("control.handshake", self.config.tenant.clone(), sender, serde_json::to_value(payload)?);
        wire::write_envelope(writer, &envelope, Duration::from_secs(10)).await?;
        self.await_accept(reader).await
    }

    async fn await_accept<R: AsyncRead + Unpin>(&self, reader: &mut R) -> Result<SessionAcceptPayload, WorkerError> {
        let envelope = wire::read_envelope(reader, Duration::from_secs(10)).await?;
        if envelope.kind != "control.session.accept" {
            return Err(WorkerError::Session(wf_session::SessionError::Protocol(format!("expected session.accept, got {}", envelope.kind))));
        }
        Ok(wire::decode(&serde_json::to_vec(&envelope.payload)?)?)
    }

    fn send_register(&self, outbound: &mpsc::UnboundedSender<Envelope>) -> Result<(), WorkerError> {
        let payload = RegisterPayload {
            capabilities: self.config.capabilities.clone(),
            payload_types: Vec::new(),
            packages: self.config.packages.clone(),
            manifests: Vec::new(),
            channels: Vec::new(),
        };
        let sender = EnvelopeSender { role: Role::Worker, id: self.config.identity.instance_id.clone() };
        let envelope = Envelope::new("control.register", self.config.tenant.clone(), sender, serde_json::to_value(payload)?);
        outbound.send(envelope).map_err(|_| WorkerError::Session(wf_session::SessionError::ConnectionClosed))
    }

    fn spawn_heartbeat(&self, outbound: mpsc::UnboundedSender<Envelope>) {
        let interval = self.config.heartbeat_interval;
        let tenant = self.config.tenant.clone();
        let instance_id = self.config.identity.instance_id.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let payload = HeartbeatPayload { healthy: true, metrics: Metrics::default(), packages: None };
                let sender = EnvelopeSender { role: Role::Worker, id: instance_id.clone() };
                let Ok(value) = serde_json::to_value(payload) else { continue };
                let envelope = Envelope::new("control.heartbeat", tenant.clone(), sender, value);
                if outbound.send(envelope).is_err() {
                    break;
                }
            }
        });
    }

    /// Resend envelopes whose ack has not arrived within their backoff
    /// window; drop waiters once `AckTracker` reports retries exhausted.
    fn spawn_ack_retry(&self, tracker: Arc<AckTracker<Envelope>>, outbound: mpsc::UnboundedSender<Envelope>) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(200));
            loop {
                ticker.tick().await;
                for (_, envelope) in tracker.poll_due(Instant::now()) {
                    if outbound.send(envelope).is_err() {
                        return;
                    }
                }
            }
        });
    }

    async fn read_loop<R: AsyncRead + Unpin>(
        &self,
        reader: &mut R,
        outbound: mpsc::UnboundedSender<Envelope>,
        pending_next: PendingNext,
        ack_tracker: Arc<AckTracker<Envelope>>,
    ) -> Result<(), WorkerError> {
        loop {
            let envelope = tokio::select! {
                envelope = wire::read_envelope(reader, Duration::from_secs(120)) => envelope?,
                _ = self.drain_one_result(&outbound, &ack_tracker) => continue,
            };
            match envelope.kind.as_str() {
                "control.ack" => {
                    let payload: AckPayload = wire::decode(&serde_json::to_vec(&envelope.payload)?)?;
                    if let Some(for_id) = payload.for_id {
                        ack_tracker.ack(&for_id);
                    }
                }
                "control.session.reset" => {
                    return Err(WorkerError::Session(wf_session::SessionError::Reset));
                }
                "control.session.drain" => {
                    tracing::info!("scheduler requested drain");
                }
                "biz.exec.dispatch" => {
                    let envelope_id = envelope.id.clone();
                    let Ok(payload) = serde_json::from_value::<DispatchPayload>(envelope.payload) else { continue };
                    self.ack_control(&outbound, &envelope_id);
                    self.handle_dispatch(payload, outbound.clone(), pending_next.clone());
                }
                "biz.exec.next.response" => {
                    let Ok(payload) = serde_json::from_value::<wf_core::NextResponsePayload>(envelope.payload) else { continue };
                    if let Some(tx) = pending_next.lock().remove(payload.request_id.as_str()) {
                        let result = match payload.error {
                            Some(err) => Err(err),
                            None => Ok(payload.result.unwrap_or(serde_json::Value::Null)),
                        };
                        let _ = tx.send(result);
                    }
                }
                other => tracing::debug!(kind = other, "ignoring unrecognized envelope"),
            }
        }
    }

    fn ack_control(&self, outbound: &mpsc::UnboundedSender<Envelope>, envelope_id: &str) {
        let payload = AckPayload { ok: true, for_id: Some(envelope_id.to_string()), ack_seq: None, ack_bitmap: None, recv_window: None };
        let sender = EnvelopeSender { role: Role::Worker, id: self.config.identity.instance_id.clone() };
        if let Ok(v) = serde_json::to_value(payload) {
            let envelope = Envelope::new("control.ack", self.config.tenant.clone(), sender, v);
            let _ = outbound.send(envelope);
        }
    }

    fn handle_dispatch(&self, payload: DispatchPayload, outbound: mpsc::UnboundedSender<Envelope>, pending_next: PendingNext) {
        let pipeline = self.pipeline.clone();
        let tenant = self.config.tenant.clone();
        let identity_id = self.config.identity.instance_id.clone();

        let (feedback_tx, mut feedback_rx) = mpsc::unbounded_channel::<FeedbackPayload>();
        let feedback_outbound = outbound.clone();
        let feedback_tenant = tenant.clone();
        let feedback_sender_id = identity_id.clone();
        tokio::spawn(async move {
            while let Some(payload) = feedback_rx.recv().await {
                let sender = EnvelopeSender { role: Role::Worker, id: feedback_sender_id.clone() };
                if let Ok(v) = serde_json::to_value(&payload) {
                    let envelope = Envelope::new("biz.exec.feedback", feedback_tenant.clone(), sender, v);
                    let _ = feedback_outbound.send(envelope);
                }
            }
        });

        let next_caller: Option<Arc<dyn NextCaller>> = Some(Arc::new(WorkerNextCaller {
            run_id: payload.run_id.clone(),
            node_id: payload.node_id.clone(),
            tenant: tenant.clone(),
            outbound: outbound.clone(),
            pending: pending_next,
        }));

        tokio::spawn(async move {
            if let Err(err) = pipeline.submit(payload, feedback_tx, next_caller).await {
                tracing::warn!(error = %err, "failed to submit dispatch to pipeline");
            }
        });
    }

    /// Publish a `biz.exec.result` with ack-request, tracked for retry until
    /// the scheduler's `control.ack` confirms it.
    pub fn send_result(&self, outbound: &mpsc::UnboundedSender<Envelope>, ack_tracker: &AckTracker<Envelope>, payload: ResultPayload) -> Result<(), WorkerError> {
        let sender = EnvelopeSender { role: Role::Worker, id: self.config.identity.instance_id.clone() };
        let envelope = Envelope::new("biz.exec.result", self.config.tenant.clone(), sender, serde_json::to_value(payload)?).with_ack_request();
        let id = envelope.id.clone();
        outbound.send(envelope.clone()).map_err(|_| WorkerError::Session(wf_session::SessionError::ConnectionClosed))?;
        let waiter = ack_tracker.track(id.clone(), envelope, Instant::now());
        tokio::spawn(async move {
            if let Ok(AckOutcome::RetriesExceeded) = waiter.await {
                tracing::warn!(envelope_id = %id, "result went unacked after exhausting retries");
            }
        });
        Ok(())
    }
}

fn spawn_writer<W: AsyncWrite + Unpin + Send + 'static>(mut writer: W, mut outbound_rx: mpsc::UnboundedReceiver<Envelope>) {
    tokio::spawn(async move {
        while let Some(envelope) = outbound_rx.recv().await {
            if wire::write_envelope(&mut writer, &envelope, Duration::from_secs(10)).await.is_err() {
                break;
            }
        }
    });
}

