// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event bus (§4.3, §4.8): package drift and node-state/result publications.
//! A thin wrapper over `tokio::sync::broadcast`, matching the teacher's
//! fan-out-to-subscribers style for status updates.

use serde_json::Value;
use tokio::sync::broadcast;
use wf_core::{NodeId, RunId, TaskId};

use crate::worker_session::WorkerPackage;

#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    PackageAdded { worker_instance_id: String, tenant: String, package: WorkerPackage },
    PackageRemoved { worker_instance_id: String, tenant: String, package: WorkerPackage },
    NodeState {
        run_id: RunId,
        task_id: TaskId,
        node_id: NodeId,
        stage: Option<String>,
        progress: Option<f64>,
        message: Option<String>,
    },
    NodeResultSnapshot { run_id: RunId, task_id: TaskId, result: Value },
    NodeResultDelta { run_id: RunId, task_id: TaskId, sequence: u64, delta: wf_core::value::Delta },
    RunFinished { run_id: RunId, status: String },
}

/// Broadcast event bus. Cloning is cheap (shares the underlying channel).
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SchedulerEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event. Dropped silently if there are no subscribers, which
    /// is the normal case when nothing is watching a given run.
    pub fn publish(&self, event: SchedulerEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
