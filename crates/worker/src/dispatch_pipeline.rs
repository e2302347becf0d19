// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker dispatch pipeline (§4.7): per-type bounded queues with overflow
//! policy, a global inflight semaphore, per-type handler cooldown after
//! consecutive failures, and the concurrency-key single-flight lock.
//! Grounded in the teacher's `engine::runtime::handlers::worker::dispatch`
//! queue-and-dispatch shape, adapted from a polling queue-item model to a
//! pushed-envelope model.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Semaphore};

use wf_core::biz::DispatchPayload;
use wf_core::error::code;
use wf_core::{ExecError, NodeId, RunId, TaskId};

use crate::error::WorkerError;
use crate::resource_registry::ResourceRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    Block,
    DropNew,
    DropOldest,
}

#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    pub capacity: usize,
    pub overflow: OverflowPolicy,
    pub idle_timeout: Duration,
}

/// Everything a runner needs to execute one dispatch (§4.7 "ExecutionContext").
pub struct ExecutionContext {
    pub run_id: RunId,
    pub task_id: TaskId,
    pub node_id: NodeId,
    pub node_type: String,
    pub parameters: serde_json::Value,
    pub middleware_chain: Option<Vec<NodeId>>,
    pub chain_index: Option<usize>,
    pub feedback: FeedbackPublisher,
    pub next: Option<Arc<dyn NextCaller>>,
}

/// Publishes `biz.exec.feedback` without waiting for an ack (§4.8).
#[derive(Clone)]
pub struct FeedbackPublisher {
    tx: mpsc::UnboundedSender<wf_core::FeedbackPayload>,
}

impl FeedbackPublisher {
    pub fn new(tx: mpsc::UnboundedSender<wf_core::FeedbackPayload>) -> Self {
        Self { tx }
    }

    pub fn send(&self, payload: wf_core::FeedbackPayload) {
        let _ = self.tx.send(payload);
    }
}

/// Client-side `next()` handoff to the scheduler's middleware bridge (§4.5).
#[async_trait]
pub trait NextCaller: Send + Sync {
    async fn call_next(&self, payload: serde_json::Value, timeout: Option<Duration>) -> Result<serde_json::Value, ExecError>;
}

#[derive(Debug, Clone)]
pub enum HandlerStatus {
    Succeeded,
    Failed,
    Cancelled,
    Skipped,
}

impl HandlerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerStatus::Succeeded => "SUCCEEDED",
            HandlerStatus::Failed => "FAILED",
            HandlerStatus::Cancelled => "CANCELLED",
            HandlerStatus::Skipped => "SKIPPED",
        }
    }
}

pub struct HandlerOutcome {
    pub status: HandlerStatus,
    pub result: serde_json::Value,
    pub metadata: serde_json::Value,
    pub artifacts: Vec<wf_core::Artifact>,
    pub error: Option<ExecError>,
}

impl HandlerOutcome {
    pub fn success(result: serde_json::Value) -> Self {
        Self { status: HandlerStatus::Succeeded, result, metadata: serde_json::Value::Null, artifacts: Vec::new(), error: None }
    }

    pub fn failure(error: ExecError) -> Self {
        Self { status: HandlerStatus::Failed, result: serde_json::Value::Null, metadata: serde_json::Value::Null, artifacts: Vec::new(), error: Some(error) }
    }
}

/// A package-provided runner for one node type (§4.7 "the runner is invoked").
#[async_trait]
pub trait Handler: Send + Sync {
    async fn run(&self, ctx: ExecutionContext) -> HandlerOutcome;
}

pub struct DispatchedResult {
    pub run_id: RunId,
    pub task_id: TaskId,
    pub duration_ms: u64,
    pub outcome: HandlerOutcome,
}

struct CooldownState {
    consecutive_failures: u32,
    cooling_until: Option<Instant>,
}

impl Default for CooldownState {
    fn default() -> Self {
        Self { consecutive_failures: 0, cooling_until: None }
    }
}

struct TypeQueue {
    tx: mpsc::Sender<QueuedDispatch>,
    inflight: Arc<Mutex<usize>>,
}

struct QueuedDispatch {
    payload: DispatchPayload,
    feedback_tx: mpsc::UnboundedSender<wf_core::FeedbackPayload>,
    next: Option<Arc<dyn NextCaller>>,
}

/// Drives per-type queues, the global inflight cap, handler cooldown, and
/// the concurrency-key single-flight lock. Results are delivered on
/// `results_rx`.
pub struct DispatchPipeline {
    handlers: Arc<Mutex<HashMap<String, Arc<dyn Handler>>>>,
    queues: Mutex<HashMap<String, TypeQueue>>,
    queue_config: QueueConfig,
    resources: Arc<ResourceRegistry>,
    global_inflight: Arc<Semaphore>,
    in_flight_keys: Arc<Mutex<HashSet<String>>>,
    cooldown: Arc<Mutex<HashMap<String, CooldownState>>>,
    cooldown_threshold: u32,
    cooldown_duration: Duration,
    results_tx: mpsc::UnboundedSender<DispatchedResult>,
}

impl DispatchPipeline {
    pub fn new(
        resources: Arc<ResourceRegistry>,
        global_inflight_cap: usize,
        queue_config: QueueConfig,
        cooldown_threshold: u32,
        cooldown_duration: Duration,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<DispatchedResult>) {
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let pipeline = Arc::new(Self {
            handlers: Arc::new(Mutex::new(HashMap::new())),
            queues: Mutex::new(HashMap::new()),
            queue_config,
            resources,
            global_inflight: Arc::new(Semaphore::new(global_inflight_cap)),
            in_flight_keys: Arc::new(Mutex::new(HashSet::new())),
            cooldown: Arc::new(Mutex::new(HashMap::new())),
            cooldown_threshold,
            cooldown_duration,
            results_tx,
        });
        (pipeline, results_rx)
    }

    pub fn register_handler(&self, node_type: impl Into<String>, handler: Arc<dyn Handler>) {
        self.handlers.lock().insert(node_type.into(), handler);
    }

    /// Place a dispatch on its type's queue, creating the queue (and its
    /// consumer task) lazily if this is the first dispatch of that type.
    pub async fn submit(
        &self,
        payload: DispatchPayload,
        feedback_tx: mpsc::UnboundedSender<wf_core::FeedbackPayload>,
        next: Option<Arc<dyn NextCaller>>,
    ) -> Result<(), WorkerError> {
        let node_type = payload.node_type.clone();
        let item = QueuedDispatch { payload, feedback_tx, next };

        let tx = {
            let mut queues = self.queues.lock();
            if !queues.contains_key(&node_type) {
                queues.insert(node_type.clone(), self.spawn_type_queue(node_type.clone()));
            }
            // The block above just ensured this key exists, under the same lock.
            #[allow(clippy::expect_used)]
            let tx = queues.get(&node_type).expect("just inserted").tx.clone();
            tx
        };

        match self.queue_config.overflow {
            OverflowPolicy::Block => tx.send(item).await.map_err(|_| WorkerError::QueueFull(node_type)),
            OverflowPolicy::DropNew => tx.try_send(item).map_err(|_| WorkerError::QueueFull(node_type)),
            OverflowPolicy::DropOldest => match tx.try_send(item) {
                Ok(()) => Ok(()),
                Err(mpsc::error::TrySendError::Full(item)) => {
                    // Queue is a bounded mpsc without peek/pop-front, so "drop
                    // oldest" is approximated by retrying the send once the
                    // consumer has made room, rather than a true ring buffer.
                    tx.send(item).await.map_err(|_| WorkerError::QueueFull(node_type))
                }
                Err(mpsc::error::TrySendError::Closed(_)) => Err(WorkerError::QueueFull(node_type)),
            },
        }
    }

    fn spawn_type_queue(&self, node_type: String) -> TypeQueue {
        let (tx, mut rx) = mpsc::channel::<QueuedDispatch>(self.queue_config.capacity);
        let inflight = Arc::new(Mutex::new(0usize));

        let handlers = self.handlers.clone();
        let resources = self.resources.clone();
        let global_inflight = self.global_inflight.clone();
        let in_flight_keys = self.in_flight_keys.clone();
        let cooldown = self.cooldown.clone();
        let cooldown_threshold = self.cooldown_threshold;
        let cooldown_duration = self.cooldown_duration;
        let results_tx = self.results_tx.clone();
        let idle_timeout = self.queue_config.idle_timeout;
        let inflight_counter = inflight.clone();
        let type_for_task = node_type.clone();

        tokio::spawn(async move {
            loop {
                let item = match tokio::time::timeout(idle_timeout, rx.recv()).await {
                    Ok(Some(item)) => item,
                    Ok(None) => break,
                    Err(_) => {
                        if *inflight_counter.lock() == 0 {
                            break;
                        }
                        continue;
                    }
                };

                if is_cooling_down(&cooldown, &type_for_task) {
                    let error = ExecError::new(code::RUNNER_FAILURE, format!("handler for {type_for_task} is cooling down"), "worker.dispatch");
                    emit_result(&results_tx, &item, 0, HandlerOutcome::failure(error));
                    continue;
                }

                let key = item.payload.concurrency_key.clone();
                if !key.is_empty() && !in_flight_keys.lock().insert(key.clone()) {
                    let error = ExecError::new(code::CMD_CONCURRENCY_VIOLATION, format!("concurrency key {key} already in flight"), "worker.dispatch");
                    emit_result(&results_tx, &item, 0, HandlerOutcome::failure(error));
                    continue;
                }

                let Ok(permit) = global_inflight.clone().acquire_owned().await else { break };
                *inflight_counter.lock() += 1;

                let handler = handlers.lock().get(&item.payload.node_type).cloned();
                let resources = resources.clone();
                let cooldown = cooldown.clone();
                let in_flight_keys = in_flight_keys.clone();
                let results_tx = results_tx.clone();
                let inflight_counter = inflight_counter.clone();
                let node_type = item.payload.node_type.clone();

                tokio::spawn(async move {
                    let _permit = permit;
                    let leased: Vec<String> = item.payload.resource_refs.iter().map(|r| r.id.clone()).collect();
                    let lease_result: Result<(), ExecError> = (|| {
                        for r in &item.payload.resource_refs {
                            resources.lease(&r.id).map_err(|_| ExecError::new(code::RESOURCE_MISSING, format!("resource {} missing", r.id), "worker.dispatch"))?;
                        }
                        Ok(())
                    })();

                    let started = Instant::now();
                    let outcome = match (handler, lease_result) {
                        (_, Err(err)) => HandlerOutcome::failure(err),
                        (None, Ok(())) => HandlerOutcome::failure(ExecError::new(code::RUNNER_FAILURE, format!("no handler for {node_type}"), "worker.dispatch")),
                        (Some(handler), Ok(())) => {
                            let ctx = ExecutionContext {
                                run_id: item.payload.run_id.clone(),
                                task_id: item.payload.task_id.clone(),
                                node_id: item.payload.node_id.clone(),
                                node_type: item.payload.node_type.clone(),
                                parameters: item.payload.parameters.clone(),
                                middleware_chain: item.payload.middleware_chain.clone(),
                                chain_index: item.payload.chain_index,
                                feedback: FeedbackPublisher::new(item.feedback_tx.clone()),
                                next: item.next.clone(),
                            };
                            handler.run(ctx).await
                        }
                    };

                    for id in &leased {
                        resources.release(id);
                    }

                    record_cooldown_outcome(&cooldown, &node_type, &outcome, cooldown_threshold, cooldown_duration);

                    if !item.payload.concurrency_key.is_empty() {
                        in_flight_keys.lock().remove(&item.payload.concurrency_key);
                    }

                    let duration_ms = started.elapsed().as_millis() as u64;
                    emit_result(&results_tx, &item, duration_ms, outcome);
                    *inflight_counter.lock() -= 1;
                });
            }
        });

        TypeQueue { tx, inflight }
    }
}

fn is_cooling_down(cooldown: &Mutex<HashMap<String, CooldownState>>, node_type: &str) -> bool {
    let mut states = cooldown.lock();
    let Some(state) = states.get_mut(node_type) else { return false };
    match state.cooling_until {
        Some(until) if Instant::now() < until => true,
        Some(_) => {
            state.cooling_until = None;
            state.consecutive_failures = 0;
            false
        }
        None => false,
    }
}

fn record_cooldown_outcome(cooldown: &Mutex<HashMap<String, CooldownState>>, node_type: &str, outcome: &HandlerOutcome, threshold: u32, duration: Duration) {
    let mut states = cooldown.lock();
    let state = states.entry(node_type.to_string()).or_default();
    match outcome.status {
        HandlerStatus::Succeeded | HandlerStatus::Skipped => {
            state.consecutive_failures = 0;
            state.cooling_until = None;
        }
        HandlerStatus::Failed | HandlerStatus::Cancelled => {
            state.consecutive_failures += 1;
            if state.consecutive_failures >= threshold {
                state.cooling_until = Some(Instant::now() + duration);
            }
        }
    }
}

fn emit_result(results_tx: &mpsc::UnboundedSender<DispatchedResult>, item: &QueuedDispatch, duration_ms: u64, outcome: HandlerOutcome) {
    let _ = results_tx.send(DispatchedResult {
        run_id: item.payload.run_id.clone(),
        task_id: item.payload.task_id.clone(),
        duration_ms,
        outcome,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use wf_core::biz::ResourceRef;

    fn payload(node_type: &str, concurrency_key: &str) -> DispatchPayload {
        DispatchPayload {
            run_id: RunId::new("run-1"),
            task_id: TaskId::root(&NodeId::new("a")),
            node_id: NodeId::new("a"),
            node_type: node_type.to_string(),
            package_name: "demo".to_string(),
            package_version: "1".to_string(),
            parameters: serde_json::Value::Null,
            constraints: serde_json::Value::Null,
            concurrency_key: concurrency_key.to_string(),
            resource_refs: Vec::new(),
            affinity: None,
            host_node_id: None,
            middleware_chain: None,
            chain_index: None,
        }
    }

    fn default_queue_config() -> QueueConfig {
        QueueConfig { capacity: 8, overflow: OverflowPolicy::Block, idle_timeout: Duration::from_secs(5) }
    }

    struct EchoHandler;

    #[async_trait]
    impl Handler for EchoHandler {
        async fn run(&self, ctx: ExecutionContext) -> HandlerOutcome {
            HandlerOutcome::success(ctx.parameters)
        }
    }

    struct AlwaysFailsHandler;

    #[async_trait]
    impl Handler for AlwaysFailsHandler {
        async fn run(&self, _ctx: ExecutionContext) -> HandlerOutcome {
            HandlerOutcome::failure(ExecError::new(code::RUNNER_FAILURE, "boom", "test"))
        }
    }

    #[tokio::test]
    async fn submit_routes_to_handler_and_emits_result() {
        let (pipeline, mut results_rx) = DispatchPipeline::new(Arc::new(ResourceRegistry::new()), 4, default_queue_config(), 5, Duration::from_secs(30));
        pipeline.register_handler("demo.task", Arc::new(EchoHandler));

        let (feedback_tx, _feedback_rx) = mpsc::unbounded_channel();
        pipeline.submit(payload("demo.task", ""), feedback_tx, None).await.expect("submit succeeds");

        let result = results_rx.recv().await.expect("a result is emitted");
        assert!(matches!(result.outcome.status, HandlerStatus::Succeeded));
    }

    #[tokio::test]
    async fn missing_resource_fails_before_the_handler_runs() {
        let (pipeline, mut results_rx) = DispatchPipeline::new(Arc::new(ResourceRegistry::new()), 4, default_queue_config(), 5, Duration::from_secs(30));
        pipeline.register_handler("demo.task", Arc::new(EchoHandler));

        let mut dispatch = payload("demo.task", "");
        dispatch.resource_refs = vec![ResourceRef { id: "missing".to_string(), scope: None }];

        let (feedback_tx, _feedback_rx) = mpsc::unbounded_channel();
        pipeline.submit(dispatch, feedback_tx, None).await.expect("submit succeeds");

        let result = results_rx.recv().await.expect("a result is emitted");
        assert!(matches!(result.outcome.status, HandlerStatus::Failed));
        assert_eq!(result.outcome.error.expect("has error").code, code::RESOURCE_MISSING);
    }

    #[tokio::test]
    async fn concurrency_key_rejects_a_second_in_flight_dispatch() {
        let (pipeline, mut results_rx) = DispatchPipeline::new(Arc::new(ResourceRegistry::new()), 1, default_queue_config(), 5, Duration::from_secs(30));
        pipeline.register_handler("demo.task", Arc::new(EchoHandler));

        // Manually hold the key to simulate an in-flight dispatch, since a
        // real handler would finish before a second submit could race it.
        pipeline.in_flight_keys.lock().insert("shared".to_string());

        let (feedback_tx, _feedback_rx) = mpsc::unbounded_channel();
        pipeline.submit(payload("demo.task", "shared"), feedback_tx, None).await.expect("submit succeeds");

        let result = results_rx.recv().await.expect("a result is emitted");
        assert!(matches!(result.outcome.status, HandlerStatus::Failed));
        assert_eq!(result.outcome.error.expect("has error").code, code::CMD_CONCURRENCY_VIOLATION);
    }

    #[tokio::test]
    async fn repeated_failures_trip_cooldown_for_the_node_type() {
        let (pipeline, mut results_rx) = DispatchPipeline::new(Arc::new(ResourceRegistry::new()), 4, default_queue_config(), 2, Duration::from_secs(30));
        pipeline.register_handler("flaky.task", Arc::new(AlwaysFailsHandler));

        for _ in 0..2 {
            let (feedback_tx, _feedback_rx) = mpsc::unbounded_channel();
            pipeline.submit(payload("flaky.task", ""), feedback_tx, None).await.expect("submit succeeds");
            let result = results_rx.recv().await.expect("a result is emitted");
            assert!(matches!(result.outcome.status, HandlerStatus::Failed));
        }

        let (feedback_tx, _feedback_rx) = mpsc::unbounded_channel();
        pipeline.submit(payload("flaky.task", ""), feedback_tx, None).await.expect("submit succeeds");
        let result = results_rx.recv().await.expect("a result is emitted");
        assert_eq!(result.outcome.error.expect("has error").message, "handler for flaky.task is cooling down");
    }
}
