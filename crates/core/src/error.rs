// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stable error taxonomy (§6, §7) and the core crate's own error type.

use thiserror::Error;

/// Stable string codes emitted across the scheduler/worker boundary.
/// These are transported as `biz.exec.error.code` / `control.session.reset.code`
/// and must never be renamed once published.
pub mod code {
    pub const AUTH_MISSING_TOKEN: &str = "E.AUTH.MISSING_TOKEN";
    pub const AUTH_INVALID_TOKEN: &str = "E.AUTH.INVALID_TOKEN";
    pub const AUTH_MTLS_REQUIRED: &str = "E.AUTH.MTLS_REQUIRED";
    pub const AUTH_MODE_UNSUPPORTED: &str = "E.AUTH.MODE_UNSUPPORTED";
    pub const AUTH_HANDSHAKE_REQUIRED: &str = "E.AUTH.HANDSHAKE_REQUIRED";
    pub const AUTH_UNAUTHENTICATED: &str = "E.AUTH.UNAUTHENTICATED";
    pub const SESSION_UNKNOWN: &str = "E.SESSION.UNKNOWN";
    pub const SESSION_TENANT_MISMATCH: &str = "E.SESSION.TENANT_MISMATCH";
    pub const SESSION_NOT_REGISTERED: &str = "E.SESSION.NOT_REGISTERED";
    pub const SESSION_MISMATCH: &str = "E.SESSION.MISMATCH";
    pub const SESSION_INVALID_TOKEN: &str = "E.SESSION.INVALID_TOKEN";
    pub const CMD_CONCURRENCY_VIOLATION: &str = "E.CMD.CONCURRENCY_VIOLATION";
    pub const RESOURCE_MISSING: &str = "E.RESOURCE.MISSING";
    pub const RUNNER_CANCELLED: &str = "E.RUNNER.CANCELLED";
    pub const RUNNER_FAILURE: &str = "E.RUNNER.FAILURE";
    pub const DISPATCH_UNAVAILABLE: &str = "E.DISPATCH.UNAVAILABLE";

    pub const NEXT_TIMEOUT: &str = "next_timeout";
    pub const NEXT_CANCELLED: &str = "next_cancelled";
    pub const NEXT_DUPLICATE: &str = "next_duplicate";
    pub const NEXT_RUN_FINALISED: &str = "next_run_finalised";
    pub const NEXT_NO_CHAIN: &str = "next_no_chain";
    pub const NEXT_INVALID_CHAIN: &str = "next_invalid_chain";
    pub const NEXT_TARGET_NOT_READY: &str = "next_target_not_ready";
    pub const NEXT_UNAVAILABLE: &str = "next_unavailable";
    pub const NEXT_FAILED: &str = "next_failed";

    /// `next_<status>` pseudo-code for a terminal status other than success
    /// (§4.5: "any other status emits an error with code `next_<status>`").
    pub fn next_status(status: &str) -> String {
        format!("next_{}", status.to_ascii_lowercase())
    }
}

/// A `biz.exec.error` payload (§6).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ExecError {
    pub code: String,
    pub message: String,
    pub context: ExecErrorContext,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ExecErrorContext {
    pub where_: String,
    #[serde(default)]
    pub details: serde_json::Value,
}

impl ExecError {
    pub fn new(code: impl Into<String>, message: impl Into<String>, where_: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: ExecErrorContext { where_: where_.into(), details: serde_json::Value::Null },
        }
    }
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid binding path: {0}")]
    InvalidBinding(String),
    #[error("definition hash mismatch")]
    DefinitionHashMismatch,
}
