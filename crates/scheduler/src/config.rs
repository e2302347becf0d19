// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the scheduler binary,
//! following the daemon crate's `env.rs` convention of one function per
//! setting rather than a struct built by a config-file parser.

use std::net::SocketAddr;
use std::time::Duration;

/// `WF_SCHEDULER_BIND` > `127.0.0.1:7420`.
pub fn bind_addr() -> SocketAddr {
    std::env::var("WF_SCHEDULER_BIND").ok().and_then(|s| s.parse().ok()).unwrap_or_else(|| {
        // Constant literal, not user/environment input.
        #[allow(clippy::expect_used)]
        let default: SocketAddr = "127.0.0.1:7420".parse().expect("valid default addr");
        default
    })
}

/// HMAC secret used to sign session tokens. Required in production; falls
/// back to a fixed development value so the binary still starts locally.
pub fn session_token_secret() -> Vec<u8> {
    std::env::var("WF_SCHEDULER_TOKEN_SECRET")
        .unwrap_or_else(|_| "dev-only-session-token-secret".to_string())
        .into_bytes()
}

/// Comma-separated list of bearer tokens accepted at handshake when
/// `auth.mode == token` (§4.3 "token against a configured allow-list").
pub fn allowed_worker_tokens() -> Vec<String> {
    std::env::var("WF_SCHEDULER_WORKER_TOKENS")
        .map(|s| s.split(',').map(|t| t.trim().to_string()).filter(|t| !t.is_empty()).collect())
        .unwrap_or_default()
}

/// Session token lifetime.
pub fn session_ttl() -> Duration {
    std::env::var("WF_SCHEDULER_SESSION_TTL_SECS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(3600))
}
