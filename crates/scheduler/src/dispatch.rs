// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dispatch orchestrator (§4.6): a single consumer task that drains the
//! ready-action queue, selects a worker, sends `biz.exec.dispatch`, and
//! tracks the ack deadline. Retries transient send failures with backoff;
//! after the attempt cap it fails the node with `E.DISPATCH.UNAVAILABLE`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use wf_core::envelope::{Envelope, EnvelopeSender, Role};
use wf_core::error::code;
use wf_core::{biz, ExecError};

use crate::events::{EventBus, SchedulerEvent};
use crate::run_registry::{DispatchRequest, ReadyAction, RunRegistry};
use crate::worker_session::WorkerSessionRegistry;

/// Backoff for transient send failures (no worker available, channel full).
/// Separate from the per-envelope ack retry in `wf_session::AckTracker`,
/// which only starts once a send actually lands.
#[derive(Debug, Clone, Copy)]
pub struct DispatchRetryPolicy {
    pub base: Duration,
    pub max: Duration,
    pub max_attempts: u32,
}

impl Default for DispatchRetryPolicy {
    fn default() -> Self {
        Self { base: Duration::from_millis(200), max: Duration::from_secs(5), max_attempts: 5 }
    }
}

impl DispatchRetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.base.saturating_mul(1u32.checked_shl(shift).unwrap_or(u32::MAX)).min(self.max)
    }
}

/// A single queued dispatch attempt, carrying its own retry count so the
/// orchestrator can re-enqueue it without consulting the run registry again.
struct Attempt {
    request: DispatchRequest,
    send_attempt: u32,
}

/// Shared dependencies for the dispatch loop, cloned into the task.
pub struct DispatchOrchestrator {
    registry: Arc<RunRegistry>,
    workers: Arc<WorkerSessionRegistry>,
    events: EventBus,
    retry: DispatchRetryPolicy,
    queue_tx: tokio::sync::mpsc::UnboundedSender<Attempt>,
}

impl DispatchOrchestrator {
    /// Spawn the consumer task and return a handle for enqueuing
    /// `ReadyAction`s (§4.6 "Ready-set dispatch").
    pub fn spawn(registry: Arc<RunRegistry>, workers: Arc<WorkerSessionRegistry>, events: EventBus, retry: DispatchRetryPolicy) -> Arc<Self> {
        let (queue_tx, queue_rx) = tokio::sync::mpsc::unbounded_channel();
        let orchestrator = Arc::new(Self { registry, workers, events, retry, queue_tx });
        spawn_consumer(orchestrator.clone(), queue_rx);
        orchestrator
    }

    /// Enqueue the ready actions produced by a run-registry transition.
    /// Container activations recurse into `RunRegistry::activate_frame`,
    /// whose own ready set is enqueued in turn.
    pub fn enqueue_ready(&self, run_id: &wf_core::RunId, actions: Vec<ReadyAction>) {
        for action in actions {
            match action {
                ReadyAction::Dispatch { frame_id, node_id } => {
                    let built = self.registry.with_run(run_id, |run| {
                        let tenant = run.tenant.clone();
                        let workflow = run.workflow_for(frame_id.as_ref()).clone();
                        let node = run.get_node(frame_id.as_ref(), &node_id)?.clone();
                        crate::run_registry::build_dispatch_request(&workflow, &node, &tenant, run_id.clone(), frame_id, node.attempts)
                    });
                    if let Some(Some(request)) = built {
                        self.enqueue(request);
                    }
                }
                ReadyAction::ActivateFrame { node_id, .. } => match self.registry.activate_frame(run_id, &node_id) {
                    Ok(nested) => self.enqueue_ready(run_id, nested),
                    Err(err) => tracing::warn!(run = %run_id, node = %node_id, error = %err, "frame activation failed"),
                },
            }
        }
    }

    pub fn enqueue(&self, request: DispatchRequest) {
        let _ = self.queue_tx.send(Attempt { request, send_attempt: 0 });
    }

    fn requeue_later(self: &Arc<Self>, attempt: Attempt) {
        let delay = self.retry.backoff(attempt.send_attempt);
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = this.queue_tx.send(attempt);
        });
    }
}

fn spawn_consumer(orchestrator: Arc<DispatchOrchestrator>, mut queue_rx: tokio::sync::mpsc::UnboundedReceiver<Attempt>) {
    tokio::spawn(async move {
        while let Some(attempt) = queue_rx.recv().await {
            orchestrator.clone().try_dispatch(attempt).await;
        }
    });
}

impl DispatchOrchestrator {
    async fn try_dispatch(self: Arc<Self>, mut attempt: Attempt) {
        let request = &attempt.request;
        let worker_id = self.workers.select_worker(
            request.tenant.as_str(),
            &request.package_name,
            &request.package_version,
            request.preferred_worker_id.as_ref(),
        );

        let Some(worker_id) = worker_id else {
            attempt.send_attempt += 1;
            if attempt.send_attempt > self.retry.max_attempts {
                self.fail_unavailable(&attempt.request, &format!("no worker carries {}:{}", request.package_name, request.package_version));
            } else {
                tracing::debug!(run = %request.run_id, node = %request.node_id, attempt = attempt.send_attempt, "no worker available, retrying");
                self.requeue_later(attempt);
            }
            return;
        };

        let payload = biz::DispatchPayload {
            run_id: request.run_id.clone(),
            task_id: request.task_id.clone(),
            node_id: request.node_id.clone(),
            node_type: request.node_type.clone(),
            package_name: request.package_name.clone(),
            package_version: request.package_version.clone(),
            parameters: request.parameters.clone(),
            constraints: serde_json::Value::Null,
            concurrency_key: request.concurrency_key.clone(),
            resource_refs: request.resource_refs.clone(),
            affinity: request.affinity.clone(),
            host_node_id: request.host_node_id.clone(),
            middleware_chain: request.middleware_chain.clone(),
            chain_index: request.chain_index,
        };
        let payload_value = match serde_json::to_value(&payload) {
            Ok(v) => v,
            Err(err) => {
                self.fail_unavailable(&attempt.request, &format!("failed to encode dispatch payload: {err}"));
                return;
            }
        };

        let sent = self.workers.with_session_by_instance(&worker_id, |session| {
            let tenant = request.tenant.as_str().to_string();
            let sender = EnvelopeSender { role: Role::Scheduler, id: "scheduler".into() };
            let mut envelope = Envelope::new("biz.exec.dispatch", tenant, sender, payload_value.clone()).with_ack_request();
            // The envelope id doubles as the dispatch id, so a `control.ack`
            // referencing it correlates directly back to this dispatch.
            envelope.id = request.dispatch_id.to_string();
            session.outbound.send(envelope).is_ok()
        });

        match sent {
            Some(true) => {
                let ack_deadline = Instant::now() + request.ack_deadline;
                if let Err(err) = self.registry.mark_dispatched(
                    &request.run_id,
                    request.frame_id.as_ref(),
                    &request.node_id,
                    worker_id.clone(),
                    request.dispatch_id.clone(),
                    request.seq,
                    ack_deadline,
                ) {
                    tracing::warn!(run = %request.run_id, node = %request.node_id, error = %err, "mark_dispatched failed after send");
                    return;
                }
                self.events.publish(SchedulerEvent::NodeState {
                    run_id: request.run_id.clone(),
                    task_id: request.task_id.clone(),
                    node_id: request.node_id.clone(),
                    stage: Some("dispatched".into()),
                    progress: None,
                    message: None,
                });
                self.schedule_ack_watchdog(request.run_id.clone(), request.dispatch_id.clone(), request.ack_deadline);
            }
            Some(false) | None => {
                attempt.send_attempt += 1;
                if attempt.send_attempt > self.retry.max_attempts {
                    self.fail_unavailable(&attempt.request, &format!("worker {worker_id} unreachable"));
                } else {
                    tracing::debug!(run = %request.run_id, node = %request.node_id, worker = %worker_id, attempt = attempt.send_attempt, "send failed, retrying");
                    self.requeue_later(attempt);
                }
            }
        }
    }

    /// Watch a single dispatch's ack deadline; on expiry, reset the node to
    /// queued and re-enqueue it (§4.4 `reset_after_ack_timeout`, §5 "Timeouts").
    fn schedule_ack_watchdog(self: &Arc<Self>, run_id: wf_core::RunId, dispatch_id: wf_core::DispatchId, ack_deadline: Duration) {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(ack_deadline).await;
            match this.registry.reset_after_ack_timeout(&run_id, &dispatch_id) {
                Ok(Some(request)) => {
                    tracing::warn!(run = %run_id, dispatch = %dispatch_id, "ack deadline expired, redispatching");
                    this.enqueue(request);
                }
                Ok(None) => {
                    // Already acknowledged or the node moved on; nothing to do.
                }
                Err(err) => {
                    tracing::debug!(run = %run_id, dispatch = %dispatch_id, error = %err, "ack watchdog found no matching dispatch");
                }
            }
        });
    }

    fn fail_unavailable(&self, request: &DispatchRequest, detail: &str) {
        tracing::error!(run = %request.run_id, node = %request.node_id, detail, "dispatch unavailable");
        let error = ExecError::new(code::DISPATCH_UNAVAILABLE, detail, "scheduler.dispatch");
        let _ = self.registry.record_command_error(&request.run_id, &request.task_id, error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wf_core::workflow::{PackageRef, WorkflowEdge, WorkflowNode};
    use wf_core::{NodeId, RunId, Tenant, Workflow};
    use wf_session::control::Capabilities;
    use wf_session::{ReceiveWindow, SendWindow};

    use crate::run_registry::RunStatus;
    use crate::worker_session::{SessionStatus, WorkerSession};

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

    fn connect_worker(workers: &WorkerSessionRegistry, instance_id: &str) -> tokio::sync::mpsc::UnboundedReceiver<Envelope> {
        let (outbound, rx) = tokio::sync::mpsc::unbounded_channel();
        workers.insert(WorkerSession {
            worker_name: "worker".to_string(),
            worker_instance_id: wf_core::WorkerInstanceId::new(instance_id),
            tenant: "t1".to_string(),
            session_id: "s1".to_string(),
            session_token: "tok".to_string(),
            session_expires_at: 0,
            authenticated: true,
            registered: true,
            status: SessionStatus::Connected,
            capabilities: Capabilities::default(),
            packages: vec![wf_session::control::PackageSnapshotEntry {
                name: "demo".to_string(),
                version: "1".to_string(),
                status: wf_session::control::PackageStatus::Installed,
            }],
            manifests: Vec::new(),
            channels: Vec::new(),
            payload_types: Vec::new(),
            last_heartbeat: None,
            last_metrics: None,
            recv_window: ReceiveWindow::new(64),
            send_window: SendWindow::new(64),
            send_next_seq: 0,
            session_seq_to_envelope_id: std::collections::HashMap::new(),
            outbound,
        });
        rx
    }

    #[tokio::test]
    async fn ack_timeout_redispatches_to_another_selectable_worker() {
        let events = EventBus::default();
        let registry = Arc::new(RunRegistry::new(events.clone()));
        let workers = Arc::new(WorkerSessionRegistry::new());
        let mut inbox = connect_worker(&workers, "w1");

        let retry = DispatchRetryPolicy { base: Duration::from_millis(5), max: Duration::from_millis(20), max_attempts: 3 };
        let orchestrator = DispatchOrchestrator::spawn(registry.clone(), workers.clone(), events, retry);

        let run_id = RunId::new("run-1");
        let ready = registry.create_run(run_id.clone(), "client".to_string(), Tenant::new("t1"), single_node_workflow()).expect("compiles");
        orchestrator.enqueue_ready(&run_id, ready);

        let dispatched = inbox.recv().await.expect("first dispatch lands");
        assert_eq!(dispatched.kind, "biz.exec.dispatch");

        // Ack deadline on the request is the session default (seconds), far
        // longer than this test should wait, so force the timeout path
        // directly rather than sleeping it out in real time.
        let dispatch_id = registry
            .with_run(&run_id, |run| run.get_node(None, &NodeId::new("a")).expect("dispatched above").dispatch_id.clone())
            .flatten()
            .expect("dispatch_id recorded by mark_dispatched");
        let redispatch = registry.reset_after_ack_timeout(&run_id, &dispatch_id).expect("dispatch is known").expect("node still pending");
        orchestrator.enqueue(redispatch);

        let retried = inbox.recv().await.expect("redispatch lands on the same (only) worker");
        assert_eq!(retried.kind, "biz.exec.dispatch");
        assert_ne!(retried.id, dispatched.id, "redispatch mints a fresh dispatch id");
    }

    #[tokio::test]
    async fn exhausting_retries_with_no_worker_fails_the_node() {
        let events = EventBus::default();
        let registry = Arc::new(RunRegistry::new(events.clone()));
        let workers = Arc::new(WorkerSessionRegistry::new());

        let retry = DispatchRetryPolicy { base: Duration::from_millis(1), max: Duration::from_millis(2), max_attempts: 1 };
        let orchestrator = DispatchOrchestrator::spawn(registry.clone(), workers, events, retry);

        let run_id = RunId::new("run-1");
        let ready = registry.create_run(run_id.clone(), "client".to_string(), Tenant::new("t1"), single_node_workflow()).expect("compiles");
        orchestrator.enqueue_ready(&run_id, ready);

        for _ in 0..50 {
            if registry.status(&run_id) == Some(RunStatus::Failed) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(registry.status(&run_id), Some(RunStatus::Failed));
    }
}
