// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire envelope shape (§6). The session layer builds/parses these; it
//! never inspects `payload` itself (§4.2).

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Scheduler,
    Worker,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeSender {
    pub role: Role,
    pub id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ack {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde(rename = "for")]
    pub for_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub ts: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_seq: Option<u64>,
    pub tenant: String,
    pub sender: EnvelopeSender,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack: Option<Ack>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, tenant: impl Into<String>, sender: EnvelopeSender, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            id: uuid::Uuid::new_v4().to_string(),
            ts: now_iso8601(),
            corr: None,
            seq: None,
            session_seq: None,
            tenant: tenant.into(),
            sender,
            ack: None,
            flags: Vec::new(),
            payload,
        }
    }

    pub fn with_corr(mut self, corr: impl Into<String>) -> Self {
        self.corr = Some(corr.into());
        self
    }

    pub fn with_ack_request(mut self) -> Self {
        self.ack = Some(Ack { request: Some(true), for_id: None });
        self
    }

    pub fn is_control(&self) -> bool {
        self.kind.starts_with("control.")
    }

    /// Whether this message type is interpreted by the session layer itself
    /// rather than forwarded to the business layer (§4.2).
    pub fn is_session_layer_frame(&self) -> bool {
        matches!(
            self.kind.as_str(),
            "control.handshake"
                | "control.register"
                | "control.heartbeat"
                | "control.ack"
                | "control.session.accept"
                | "control.session.resume"
                | "control.session.reset"
                | "control.session.drain"
        )
    }
}

/// Minimal RFC-3339 timestamp without pulling in a datetime crate beyond
/// what the workspace already needs — seconds resolution is sufficient for
/// the envelope's `ts` field, which is advisory (ordering is via `seq`).
fn now_iso8601() -> String {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let secs = now.as_secs();
    let (days, rem) = (secs / 86_400, secs % 86_400);
    let (h, m, s) = (rem / 3600, (rem % 3600) / 60, rem % 60);
    let (y, mo, d) = civil_from_days(days as i64);
    format!("{y:04}-{mo:02}-{d:02}T{h:02}:{m:02}:{s:02}Z")
}

/// Howard Hinnant's `civil_from_days` algorithm (days since epoch -> y/m/d).
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
