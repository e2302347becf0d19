// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scheduler-side worker session table (§4.3): one entry per connected
//! worker, keyed by `(worker_instance_id, worker_name)`. Held under the
//! server's own mutex — mutations here are synchronous and never suspend
//! (§5).

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use wf_core::{Envelope, WorkerInstanceId};
use wf_session::control::{Capabilities, Metrics, PackageSnapshotEntry, PackageStatus};
use wf_session::{ReceiveWindow, SendWindow};

pub type WorkerPackage = PackageSnapshotEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Connected,
    Draining,
}

/// One connected worker (§3 `WorkerSession`).
pub struct WorkerSession {
    pub worker_name: String,
    pub worker_instance_id: WorkerInstanceId,
    pub tenant: String,
    pub session_id: String,
    pub session_token: String,
    pub session_expires_at: u64,
    pub authenticated: bool,
    pub registered: bool,
    pub status: SessionStatus,
    pub capabilities: Capabilities,
    pub packages: Vec<PackageSnapshotEntry>,
    pub manifests: Vec<serde_json::Value>,
    pub channels: Vec<String>,
    pub payload_types: Vec<String>,
    pub last_heartbeat: Option<Instant>,
    pub last_metrics: Option<Metrics>,
    pub recv_window: ReceiveWindow<Envelope>,
    pub send_window: SendWindow<Envelope>,
    pub send_next_seq: u64,
    pub session_seq_to_envelope_id: HashMap<u64, String>,
    pub outbound: mpsc::UnboundedSender<Envelope>,
}

impl WorkerSession {
    pub fn is_selectable(&self) -> bool {
        self.authenticated && self.registered && self.status == SessionStatus::Connected
    }

    pub fn carries_package(&self, name: &str, version: &str) -> bool {
        self.packages
            .iter()
            .any(|p| p.name == name && p.version == version && p.status == PackageStatus::Installed)
    }
}

/// Package-snapshot drift between a worker's previous and new package list
/// (§4.3: "an update of the package snapshot is published to the event bus").
pub struct PackageDrift {
    pub added: Vec<PackageSnapshotEntry>,
    pub removed: Vec<PackageSnapshotEntry>,
}

fn diff_packages(old: &[PackageSnapshotEntry], new: &[PackageSnapshotEntry]) -> PackageDrift {
    let added = new
        .iter()
        .filter(|p| !old.iter().any(|o| o.name == p.name && o.version == p.version))
        .cloned()
        .collect();
    let removed = old
        .iter()
        .filter(|p| !new.iter().any(|n| n.name == p.name && n.version == p.version))
        .cloned()
        .collect();
    PackageDrift { added, removed }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SessionKey {
    worker_instance_id: String,
    worker_name: String,
}

/// The scheduler's table of connected workers (§4.3, §5: one lock, no
/// suspension while held).
#[derive(Default)]
pub struct WorkerSessionRegistry {
    sessions: Mutex<HashMap<SessionKey, WorkerSession>>,
}

impl WorkerSessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly handshaken session, returning the superseded
    /// session (if the same key was already present) so its transport can be
    /// closed with reason "superseded".
    pub fn insert(&self, session: WorkerSession) -> Option<WorkerSession> {
        let key = SessionKey {
            worker_instance_id: session.worker_instance_id.as_str().to_string(),
            worker_name: session.worker_name.clone(),
        };
        self.sessions.lock().insert(key, session)
    }

    pub fn with_session<R>(&self, instance_id: &str, worker_name: &str, f: impl FnOnce(&mut WorkerSession) -> R) -> Option<R> {
        let key = SessionKey { worker_instance_id: instance_id.to_string(), worker_name: worker_name.to_string() };
        self.sessions.lock().get_mut(&key).map(f)
    }

    /// Find a session by instance id alone (used once a session is
    /// established and the caller only has the stable instance id, e.g. a
    /// dispatch target).
    pub fn with_session_by_instance<R>(&self, instance_id: &WorkerInstanceId, f: impl FnOnce(&mut WorkerSession) -> R) -> Option<R> {
        let mut sessions = self.sessions.lock();
        sessions.values_mut().find(|s| &s.worker_instance_id == instance_id).map(f)
    }

    pub fn register(
        &self,
        instance_id: &str,
        worker_name: &str,
        capabilities: Capabilities,
        payload_types: Vec<String>,
        packages: Vec<PackageSnapshotEntry>,
        manifests: Vec<serde_json::Value>,
        channels: Vec<String>,
    ) -> Option<PackageDrift> {
        self.with_session(instance_id, worker_name, |s| {
            let drift = diff_packages(&s.packages, &packages);
            s.capabilities = capabilities;
            s.payload_types = payload_types;
            s.packages = packages;
            s.manifests = manifests;
            s.channels = channels;
            s.registered = true;
            drift
        })
    }

    pub fn heartbeat(&self, instance_id: &str, worker_name: &str, healthy: bool, metrics: Metrics, now: Instant) {
        self.with_session(instance_id, worker_name, |s| {
            s.last_heartbeat = Some(now);
            s.last_metrics = Some(metrics);
            if !healthy {
                s.status = SessionStatus::Draining;
            }
        });
    }

    pub fn drain(&self, instance_id: &str, worker_name: &str) {
        self.with_session(instance_id, worker_name, |s| {
            s.status = SessionStatus::Draining;
        });
    }

    /// Worker selection (§4.3): tenant match, connected+registered,
    /// carries the package, optional preferred-worker pin, tie-break by
    /// instance id for a stable order.
    pub fn select_worker(
        &self,
        tenant: &str,
        package_name: &str,
        package_version: &str,
        preferred_worker_id: Option<&WorkerInstanceId>,
    ) -> Option<WorkerInstanceId> {
        let sessions = self.sessions.lock();
        let mut candidates: Vec<&WorkerInstanceId> = sessions
            .values()
            .filter(|s| s.tenant == tenant)
            .filter(|s| s.is_selectable())
            .filter(|s| s.carries_package(package_name, package_version))
            .map(|s| &s.worker_instance_id)
            .collect();
        if let Some(preferred) = preferred_worker_id {
            if candidates.iter().any(|id| *id == preferred) {
                return Some(preferred.clone());
            }
        }
        candidates.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        candidates.into_iter().next().cloned()
    }

    pub fn remove(&self, instance_id: &str, worker_name: &str) -> Option<WorkerSession> {
        let key = SessionKey { worker_instance_id: instance_id.to_string(), worker_name: worker_name.to_string() };
        self.sessions.lock().remove(&key)
    }
}
