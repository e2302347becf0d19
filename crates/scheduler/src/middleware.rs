// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Middleware chain protocol, scheduler side (§4.5): resolves `next()`
//! requests to a dispatch target, and a pending-next table that resolves
//! waiters when their target completes, times out, or is cancelled.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use wf_core::error::code;
use wf_core::{ExecError, NodeId, NodeStatus, RequestId, RunId, TaskId, WorkerInstanceId};

use crate::error::SchedulerError;
use crate::run_registry::{build_dispatch_request, DispatchRequest, ReadyAction, RunRegistry};

/// Outcome of resolving a `next()` call to a concrete action.
pub enum NextOutcome {
    Dispatch(DispatchRequest),
    FrameActivated(Vec<ReadyAction>),
}

/// A response delivered to the worker that is waiting on a `next()` call.
pub struct NextResolution {
    pub request_id: RequestId,
    pub worker_id: WorkerInstanceId,
    pub run_id: RunId,
    pub calling_node: NodeId,
    pub calling_middleware: NodeId,
    pub result: Option<serde_json::Value>,
    pub error: Option<ExecError>,
}

struct PendingNext {
    run_id: RunId,
    worker_id: WorkerInstanceId,
    calling_node: NodeId,
    calling_middleware: NodeId,
    target_task_id: TaskId,
    deadline: Instant,
}

/// Pending `biz.exec.next.request`s, keyed by `request_id` (§4.5).
#[derive(Default)]
pub struct MiddlewareBridge {
    pending: Mutex<HashMap<RequestId, PendingNext>>,
}

impl MiddlewareBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// `handle_next_request` (§4.5): resolve the host and chain for
    /// `calling_middleware`, pick the next target (`middleware[i+1]` or the
    /// host), reset a terminal target to queued, and build a dispatch (or
    /// frame activation) for it.
    pub fn handle_next_request(
        &self,
        registry: &RunRegistry,
        run_id: &RunId,
        calling_middleware: &NodeId,
        timeout_ms: Option<u64>,
    ) -> Result<(RequestId, NextOutcome), SchedulerError> {
        let request_id = RequestId::new(uuid::Uuid::new_v4().to_string());
        let timeout = Duration::from_millis(timeout_ms.unwrap_or(30_000));

        let outcome = registry
            .with_run(run_id, |run| -> Result<_, SchedulerError> {
                let (frame_id, host_id) = run
                    .find_host_of(calling_middleware)
                    .ok_or_else(|| SchedulerError::InvalidChain(format!("no host for middleware {calling_middleware}")))?;

                let calling = run
                    .node(frame_id.as_ref(), calling_middleware)
                    .ok_or_else(|| SchedulerError::UnknownNode { run: run_id.clone(), node: calling_middleware.clone() })?;
                let chain_index = calling
                    .chain_index
                    .ok_or_else(|| SchedulerError::InvalidChain(format!("{calling_middleware} has no chain_index")))?;
                let worker_id = calling
                    .worker_id
                    .clone()
                    .ok_or_else(|| SchedulerError::InvalidChain(format!("{calling_middleware} is not dispatched")))?;

                let host = run
                    .node(frame_id.as_ref(), &host_id)
                    .ok_or_else(|| SchedulerError::UnknownNode { run: run_id.clone(), node: host_id.clone() })?;
                let target_id = host.middlewares.get(chain_index + 1).cloned().unwrap_or_else(|| host_id.clone());

                let target_task_id;
                let is_container;
                {
                    let level = run
                        .level_mut(frame_id.as_ref())
                        .ok_or_else(|| SchedulerError::UnknownNode { run: run_id.clone(), node: host_id.clone() })?;
                    let target = level
                        .nodes
                        .get_mut(&target_id)
                        .ok_or_else(|| SchedulerError::UnknownNode { run: run_id.clone(), node: target_id.clone() })?;
                    if target.is_terminal() {
                        target.status = NodeStatus::Queued;
                        target.worker_id = None;
                        target.dispatch_id = None;
                        target.pending_ack = false;
                        target.ack_deadline = None;
                    }
                    target.chain_blocked = false;
                    target_task_id = target.task_id.clone();
                    is_container = target.role == Some(wf_core::NodeRole::Container);
                }

                let pending = PendingNext {
                    run_id: run_id.clone(),
                    worker_id,
                    calling_node: host_id.clone(),
                    calling_middleware: calling_middleware.clone(),
                    target_task_id,
                    deadline: Instant::now() + timeout,
                };

                Ok((frame_id, target_id, is_container, pending))
            })
            .ok_or_else(|| SchedulerError::UnknownRun(run_id.clone()))??;

        let (frame_id, target_id, is_container, pending) = outcome;
        self.pending.lock().insert(request_id.clone(), pending);

        if is_container {
            let ready = registry.activate_frame(run_id, &target_id)?;
            return Ok((request_id, NextOutcome::FrameActivated(ready)));
        }

        let request = registry
            .with_run(run_id, |run| {
                let tenant = run.tenant.clone();
                let workflow = run.workflow_for(frame_id.as_ref()).clone();
                let node = run.node(frame_id.as_ref(), &target_id)?.clone();
                build_dispatch_request(&workflow, &node, &tenant, run_id.clone(), frame_id.clone(), node.attempts)
            })
            .flatten()
            .ok_or_else(|| SchedulerError::NotDispatchable { run: run_id.clone(), node: target_id })?;

        Ok((request_id, NextOutcome::Dispatch(request)))
    }

    /// Resolve any pending `next()` request whose target is `task_id`,
    /// returning the response to deliver to the waiting worker. A terminal
    /// status always resolves the waiter: success carries `result`, any
    /// other status carries an error with code `next_<status>` (§4.5).
    pub fn resolve_by_target_task(&self, task_id: &TaskId, status: NodeStatus, result: serde_json::Value) -> Option<NextResolution> {
        let request_id = {
            let pending = self.pending.lock();
            pending.iter().find(|(_, p)| &p.target_task_id == task_id).map(|(id, _)| id.clone())?
        };
        let entry = self.pending.lock().remove(&request_id)?;
        let (result, error) = if status == NodeStatus::Succeeded {
            (Some(result), None)
        } else {
            let status_name = format!("{status:?}");
            (None, Some(ExecError::new(code::next_status(&status_name), format!("next target ended {status_name}"), "middleware.next")))
        };
        Some(NextResolution {
            request_id,
            worker_id: entry.worker_id,
            run_id: entry.run_id,
            calling_node: entry.calling_node,
            calling_middleware: entry.calling_middleware,
            result,
            error,
        })
    }

    /// Fail every pending request for `run_id` with `next_cancelled` (run
    /// cancel) or the given code, returning the responses to deliver.
    pub fn fail_all_for_run(&self, run_id: &RunId, code: &str, message: &str) -> Vec<NextResolution> {
        let mut pending = self.pending.lock();
        let ids: Vec<RequestId> = pending.iter().filter(|(_, p)| &p.run_id == run_id).map(|(id, _)| id.clone()).collect();
        ids.into_iter()
            .filter_map(|id| pending.remove(&id).map(|entry| (id, entry)))
            .map(|(request_id, entry)| NextResolution {
                request_id,
                worker_id: entry.worker_id,
                run_id: entry.run_id,
                calling_node: entry.calling_node,
                calling_middleware: entry.calling_middleware,
                result: None,
                error: Some(ExecError::new(code, message, "middleware.next")),
            })
            .collect()
    }

    /// Sweep expired waiters, resolving each with `next_timeout` (§4.5,
    /// §5 "Timeouts").
    pub fn sweep_expired(&self, now: Instant) -> Vec<NextResolution> {
        let mut pending = self.pending.lock();
        let expired: Vec<RequestId> = pending.iter().filter(|(_, p)| p.deadline <= now).map(|(id, _)| id.clone()).collect();
        expired
            .into_iter()
            .filter_map(|id| pending.remove(&id).map(|entry| (id, entry)))
            .map(|(request_id, entry)| NextResolution {
                request_id,
                worker_id: entry.worker_id,
                run_id: entry.run_id,
                calling_node: entry.calling_node,
                calling_middleware: entry.calling_middleware,
                result: None,
                error: Some(ExecError::new(code::NEXT_TIMEOUT, "next() request timed out", "middleware.next")),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wf_core::workflow::{MiddlewareDef, PackageRef, PortHandle, WorkflowEdge, WorkflowNode};
    use wf_core::{DispatchId, NodeStatus, Tenant, Workflow};

    use crate::events::EventBus;
    use crate::run_registry::RunRegistry;

    fn plain_node(id: &str) -> WorkflowNode {
        WorkflowNode {
            id: NodeId::new(id),
            node_type: "demo.task".to_string(),
            package: PackageRef { name: "demo".to_string(), version: "1".to_string() },
            parameters: serde_json::Value::Null,
            role: None,
            middlewares: Vec::new(),
        }
    }

    /// Host "a" wraps a single middleware "mw", with plain node "b"
    /// downstream of the host.
    fn u_shaped_workflow() -> Workflow {
        let mut host = plain_node("a");
        host.middlewares = vec![MiddlewareDef {
            id: NodeId::new("mw"),
            middleware_type: "demo.middleware".to_string(),
            package: PackageRef { name: "demo-mw".to_string(), version: "1".to_string() },
            parameters: serde_json::Value::Null,
        }];
        Workflow {
            id: "wf".to_string(),
            schema_version: 1,
            nodes: vec![host, plain_node("b")],
            edges: vec![WorkflowEdge {
                source: PortHandle { node: NodeId::new("a"), port: "/results/out".to_string() },
                target: PortHandle { node: NodeId::new("b"), port: "/parameters/in".to_string() },
            }],
            subgraphs: Vec::new(),
            metadata: Default::default(),
        }
    }

    #[test]
    fn outermost_middleware_next_call_releases_host_and_its_dependents() {
        let registry = RunRegistry::new(EventBus::default());
        let bridge = MiddlewareBridge::new();
        let run_id = RunId::new("run-1");

        let ready = registry.create_run(run_id.clone(), "client".to_string(), Tenant::new("t1"), u_shaped_workflow()).expect("compiles");
        // Only the chain's first middleware auto-dispatches; the host never does.
        assert!(matches!(&ready[..], [ReadyAction::Dispatch { node_id, .. }] if node_id.as_str() == "mw"));

        registry
            .mark_dispatched(&run_id, None, &NodeId::new("mw"), WorkerInstanceId::new("w1"), DispatchId::new("d-mw"), 1, Instant::now() + Duration::from_secs(30))
            .expect("mw is known");

        let (request_id, outcome) = bridge.handle_next_request(&registry, &run_id, &NodeId::new("mw"), None).expect("mw is dispatched");
        let NextOutcome::Dispatch(host_request) = outcome else { panic!("host has no middleware chain of its own, expected a dispatch") };
        assert_eq!(host_request.node_id, NodeId::new("a"));

        // Host "a" runs and finishes; nothing downstream of it is released
        // yet because only the outermost middleware's own completion does that.
        let ready = registry
            .record_result(&run_id, &TaskId::root(&NodeId::new("a")), "SUCCEEDED", serde_json::json!({"out": 1}), serde_json::Value::Null, Vec::new())
            .expect("a is known");
        assert!(ready.is_empty());

        let resolution = bridge.resolve_by_target_task(&TaskId::root(&NodeId::new("a")), NodeStatus::Succeeded, serde_json::json!({"out": 1})).expect("mw is waiting on a");
        assert_eq!(resolution.request_id, request_id);
        assert_eq!(resolution.calling_middleware, NodeId::new("mw"));
        assert_eq!(resolution.result, Some(serde_json::json!({"out": 1})));

        // mw finishes its own post-host work; as chain_index 0 this finally
        // releases "a"'s dependents.
        let ready = registry
            .record_result(&run_id, &TaskId::root(&NodeId::new("mw")), "SUCCEEDED", serde_json::Value::Null, serde_json::Value::Null, Vec::new())
            .expect("mw is known");
        assert!(matches!(&ready[..], [ReadyAction::Dispatch { node_id, .. }] if node_id.as_str() == "b"));

        registry
            .record_result(&run_id, &TaskId::root(&NodeId::new("b")), "SUCCEEDED", serde_json::Value::Null, serde_json::Value::Null, Vec::new())
            .expect("b is known");
        // "mw" looped back to queued (reusable) rather than staying terminal;
        // the run still completes because idle middlewares don't block it.
        assert_eq!(registry.status(&run_id), Some(crate::run_registry::RunStatus::Succeeded));
    }

    #[test]
    fn cancelling_a_run_mid_chain_fails_the_waiting_next_call() {
        let registry = RunRegistry::new(EventBus::default());
        let bridge = MiddlewareBridge::new();
        let run_id = RunId::new("run-1");

        registry.create_run(run_id.clone(), "client".to_string(), Tenant::new("t1"), u_shaped_workflow()).expect("compiles");
        registry
            .mark_dispatched(&run_id, None, &NodeId::new("mw"), WorkerInstanceId::new("w1"), DispatchId::new("d-mw"), 1, Instant::now() + Duration::from_secs(30))
            .expect("mw is known");
        let (request_id, _outcome) = bridge.handle_next_request(&registry, &run_id, &NodeId::new("mw"), None).expect("mw is dispatched");

        registry.cancel_run(&run_id).expect("run is known");
        let failures = bridge.fail_all_for_run(&run_id, code::NEXT_CANCELLED, "run cancelled");

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].request_id, request_id);
        assert!(failures[0].result.is_none());
        assert_eq!(failures[0].error.as_ref().expect("cancelled").code, code::NEXT_CANCELLED);
        assert!(bridge.is_empty(), "the pending table drains once its waiters are failed");
        assert_eq!(registry.status(&run_id), Some(crate::run_registry::RunStatus::Cancelled));
    }
}
