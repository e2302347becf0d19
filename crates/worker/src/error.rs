// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker-side error enum (§7).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("session error: {0}")]
    Session(#[from] wf_session::SessionError),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unknown resource: {0}")]
    UnknownResource(String),
    #[error("resource {0} pinned to another worker")]
    ResourcePinned(String),
    #[error("concurrency key {0} already in flight")]
    ConcurrencyViolation(String),
    #[error("handler for node type {0} is cooling down")]
    HandlerCoolingDown(String),
    #[error("dispatch queue for node type {0} is full")]
    QueueFull(String),
    #[error("no handler registered for node type {0}")]
    NoHandler(String),
}
