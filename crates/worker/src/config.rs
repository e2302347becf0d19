// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the worker binary, mirroring
//! the scheduler crate's `config.rs` (itself grounded in the daemon crate's
//! `env.rs` one-function-per-setting convention).

use std::path::PathBuf;
use std::time::Duration;

/// `WF_WORKER_SCHEDULER_ADDR` > `127.0.0.1:7420`.
pub fn scheduler_addr() -> String {
    std::env::var("WF_WORKER_SCHEDULER_ADDR").unwrap_or_else(|_| "127.0.0.1:7420".to_string())
}

pub fn worker_name() -> String {
    std::env::var("WF_WORKER_NAME").unwrap_or_else(|_| "wf-worker".to_string())
}

pub fn tenant() -> String {
    std::env::var("WF_WORKER_TENANT").unwrap_or_else(|_| "default".to_string())
}

/// Bearer token presented at handshake when auth mode is `token`.
pub fn auth_token() -> Option<String> {
    std::env::var("WF_WORKER_AUTH_TOKEN").ok()
}

/// Directory holding the persisted `worker_instance_id` file (§6).
pub fn data_dir() -> PathBuf {
    std::env::var("WF_WORKER_DATA_DIR").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("./wf-worker-data"))
}

/// Global inflight handler cap (§4.7 "global inflight cap").
pub fn max_inflight() -> usize {
    std::env::var("WF_WORKER_MAX_INFLIGHT").ok().and_then(|s| s.parse().ok()).unwrap_or(16)
}

/// Per-type queue bound before the overflow policy kicks in.
pub fn queue_capacity() -> usize {
    std::env::var("WF_WORKER_QUEUE_CAPACITY").ok().and_then(|s| s.parse().ok()).unwrap_or(64)
}

/// Consecutive handler failures before a node type enters cooldown.
pub fn cooldown_failure_threshold() -> u32 {
    std::env::var("WF_WORKER_COOLDOWN_THRESHOLD").ok().and_then(|s| s.parse().ok()).unwrap_or(5)
}

pub fn cooldown_duration() -> Duration {
    std::env::var("WF_WORKER_COOLDOWN_SECS").ok().and_then(|s| s.parse::<u64>().ok()).map(Duration::from_secs).unwrap_or(Duration::from_secs(30))
}

/// How long an idle per-type queue (no in-flight dispatches) survives before
/// its janitor task tears it down.
pub fn queue_idle_timeout() -> Duration {
    std::env::var("WF_WORKER_QUEUE_IDLE_SECS").ok().and_then(|s| s.parse::<u64>().ok()).map(Duration::from_secs).unwrap_or(Duration::from_secs(120))
}

pub fn heartbeat_interval() -> Duration {
    std::env::var("WF_WORKER_HEARTBEAT_SECS").ok().and_then(|s| s.parse::<u64>().ok()).map(Duration::from_secs).unwrap_or(Duration::from_secs(15))
}
