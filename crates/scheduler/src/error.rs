// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scheduler-side error enum (§7).

use thiserror::Error;
use wf_core::{DispatchId, NodeId, RunId};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("unknown run: {0}")]
    UnknownRun(RunId),
    #[error("unknown node {node} in run {run}")]
    UnknownNode { run: RunId, node: NodeId },
    #[error("unknown dispatch: {0}")]
    UnknownDispatch(DispatchId),
    #[error("no worker available for tenant {tenant} package {package}:{version}")]
    NoWorkerAvailable { tenant: String, package: String, version: String },
    #[error("node {node} in run {run} is not dispatchable")]
    NotDispatchable { run: RunId, node: NodeId },
    #[error("middleware chain error: {0}")]
    InvalidChain(String),
    #[error("session error: {0}")]
    Session(#[from] wf_session::SessionError),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("core error: {0}")]
    Core(#[from] wf_core::CoreError),
}
