// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker resource registry (§4.9): tracks file/session/model handles
//! leased during dispatch handling. Grounded in the original worker's
//! `resource_registry.py`, translated to `parking_lot::Mutex` discipline
//! matching the scheduler's single-lock run registry.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;

use crate::error::WorkerError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceState {
    Active,
    Evicted,
}

#[derive(Debug, Clone)]
pub struct ResourceHandle {
    pub id: String,
    pub resource_type: String,
    pub scope: Option<String>,
    pub path: Option<String>,
    pub size_bytes: Option<u64>,
    pub metadata: serde_json::Value,
    pub created_at: SystemTime,
    pub expires_at: Option<SystemTime>,
    pub in_use: u32,
    pub state: ResourceState,
}

impl ResourceHandle {
    fn is_expired(&self, now: SystemTime) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }
}

#[derive(Debug, Default, Clone)]
pub struct RegisterOptions {
    pub scope: Option<String>,
    pub path: Option<String>,
    pub metadata: serde_json::Value,
    pub size_bytes: Option<u64>,
    pub ttl: Option<Duration>,
}

struct Inner {
    handles: HashMap<String, ResourceHandle>,
    scope_index: HashMap<String, HashSet<String>>,
}

pub struct ResourceRegistry {
    inner: Mutex<Inner>,
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self { inner: Mutex::new(Inner { handles: HashMap::new(), scope_index: HashMap::new() }) }
    }

    pub fn register(&self, id: impl Into<String>, resource_type: impl Into<String>, options: RegisterOptions) -> ResourceHandle {
        let id = id.into();
        let now = SystemTime::now();
        let handle = ResourceHandle {
            id: id.clone(),
            resource_type: resource_type.into(),
            scope: options.scope.clone(),
            path: options.path,
            size_bytes: options.size_bytes,
            metadata: options.metadata,
            created_at: now,
            expires_at: options.ttl.map(|ttl| now + ttl),
            in_use: 0,
            state: ResourceState::Active,
        };
        let mut inner = self.inner.lock();
        if let Some(scope) = &options.scope {
            inner.scope_index.entry(scope.clone()).or_default().insert(id.clone());
        }
        inner.handles.insert(id, handle.clone());
        handle
    }

    /// Increment the in-use count and return the handle. Fails if the
    /// resource is unknown (§4.7 `E.RESOURCE.MISSING`).
    pub fn lease(&self, id: &str) -> Result<ResourceHandle, WorkerError> {
        let mut inner = self.inner.lock();
        let handle = inner.handles.get_mut(id).ok_or_else(|| WorkerError::UnknownResource(id.to_string()))?;
        handle.in_use += 1;
        Ok(handle.clone())
    }

    pub fn release(&self, id: &str) {
        let mut inner = self.inner.lock();
        if let Some(handle) = inner.handles.get_mut(id) {
            handle.in_use = handle.in_use.saturating_sub(1);
        }
    }

    /// Release every lease owned by a scope and drop the handles (§4.9
    /// "release_scope drops every handle in a scope").
    pub fn release_scope(&self, scope: &str) {
        let mut inner = self.inner.lock();
        if let Some(ids) = inner.scope_index.remove(scope) {
            for id in ids {
                inner.handles.remove(&id);
            }
        }
    }

    /// Remove idle (`in_use == 0`), expired handles. Returns the removed ids.
    pub fn gc(&self) -> Vec<String> {
        let now = SystemTime::now();
        let mut inner = self.inner.lock();
        let expired: Vec<String> = inner
            .handles
            .values()
            .filter(|h| h.in_use == 0 && h.is_expired(now))
            .map(|h| h.id.clone())
            .collect();
        for id in &expired {
            if let Some(handle) = inner.handles.remove(id) {
                if let Some(scope) = &handle.scope {
                    if let Some(scoped) = inner.scope_index.get_mut(scope) {
                        scoped.remove(id);
                        if scoped.is_empty() {
                            inner.scope_index.remove(scope);
                        }
                    }
                }
            }
        }
        expired
    }

    pub fn get(&self, id: &str) -> Option<ResourceHandle> {
        self.inner.lock().handles.get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_and_release_tracks_in_use() {
        let registry = ResourceRegistry::new();
        registry.register("r1", "file", RegisterOptions::default());
        let leased = registry.lease("r1").expect("lease succeeds");
        assert_eq!(leased.in_use, 1);
        registry.release("r1");
        assert_eq!(registry.get("r1").expect("exists").in_use, 0);
    }

    #[test]
    fn lease_unknown_resource_fails() {
        let registry = ResourceRegistry::new();
        assert!(matches!(registry.lease("missing"), Err(WorkerError::UnknownResource(_))));
    }

    #[test]
    fn release_scope_drops_every_handle() {
        let registry = ResourceRegistry::new();
        registry.register("r1", "file", RegisterOptions { scope: Some("s".into()), ..Default::default() });
        registry.register("r2", "file", RegisterOptions { scope: Some("s".into()), ..Default::default() });
        registry.release_scope("s");
        assert!(registry.get("r1").is_none());
        assert!(registry.get("r2").is_none());
    }

    #[test]
    fn gc_only_removes_expired_idle_handles() {
        let registry = ResourceRegistry::new();
        registry.register("fresh", "file", RegisterOptions { ttl: Some(Duration::from_secs(3600)), ..Default::default() });
        registry.register("stale", "file", RegisterOptions { ttl: Some(Duration::from_millis(0)), ..Default::default() });
        std::thread::sleep(Duration::from_millis(5));
        let removed = registry.gc();
        assert_eq!(removed, vec!["stale".to_string()]);
        assert!(registry.get("fresh").is_some());
    }
}
