// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-envelope ack retry (§4.2): a pending-ack entry with an attempt
//! counter and next-retry timestamp, exponential backoff capped at `max`,
//! and a hard attempt cap that fails the waiter with
//! [`SessionError::AckRetriesExceeded`].

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::oneshot;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { base: Duration::from_millis(250), max: Duration::from_secs(10), max_attempts: 6 }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempts: u32) -> Duration {
        let shift = attempts.saturating_sub(1).min(20);
        let scaled = self.base.saturating_mul(1u32.checked_shl(shift).unwrap_or(u32::MAX));
        scaled.min(self.max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    Acked,
    RetriesExceeded,
}

struct Pending<E> {
    envelope: E,
    attempts: u32,
    next_retry: Instant,
    notify: Option<oneshot::Sender<AckOutcome>>,
}

/// Tracks every envelope sent with `ack.request = true`. One tracker per
/// session direction. `E` is the envelope type (left generic for tests).
pub struct AckTracker<E> {
    policy: RetryPolicy,
    pending: Mutex<HashMap<String, Pending<E>>>,
}

impl<E: Clone> AckTracker<E> {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, pending: Mutex::new(HashMap::new()) }
    }

    /// Register an envelope that was just sent for the first time. Returns a
    /// receiver that resolves with [`AckOutcome`] once the ack arrives or
    /// retries are exhausted.
    pub fn track(&self, id: String, envelope: E, now: Instant) -> oneshot::Receiver<AckOutcome> {
        let (tx, rx) = oneshot::channel();
        let next_retry = now + self.policy.base;
        self.pending.lock().insert(
            id,
            Pending { envelope, attempts: 0, next_retry, notify: Some(tx) },
        );
        rx
    }

    /// Acknowledge `id`, resolving its waiter with `Acked` and removing the
    /// entry. Returns `true` if `id` was pending.
    pub fn ack(&self, id: &str) -> bool {
        if let Some(mut p) = self.pending.lock().remove(id) {
            if let Some(tx) = p.notify.take() {
                let _ = tx.send(AckOutcome::Acked);
            }
            true
        } else {
            false
        }
    }

    /// Advance the clock to `now`, returning `(id, envelope)` pairs due for
    /// resend. Entries that exceed `max_attempts` are removed and their
    /// waiters resolved with `RetriesExceeded` rather than returned here.
    pub fn poll_due(&self, now: Instant) -> Vec<(String, E)> {
        let mut pending = self.pending.lock();
        let due_ids: Vec<String> = pending
            .iter()
            .filter(|(_, p)| p.next_retry <= now)
            .map(|(id, _)| id.clone())
            .collect();

        let mut resend = Vec::new();
        for id in due_ids {
            // `id` was just read from this same map under the lock held here.
            #[allow(clippy::expect_used)]
            let exceeded = {
                let p = pending.get_mut(&id).expect("id came from this map");
                p.attempts += 1;
                p.attempts > self.policy.max_attempts
            };
            if exceeded {
                if let Some(mut p) = pending.remove(&id) {
                    if let Some(tx) = p.notify.take() {
                        let _ = tx.send(AckOutcome::RetriesExceeded);
                    }
                }
            } else {
                // Same invariant: `id` came from this map, still under the same lock.
                #[allow(clippy::expect_used)]
                let p = pending.get_mut(&id).expect("id came from this map");
                p.next_retry = now + self.policy.backoff(p.attempts);
                resend.push((id, p.envelope.clone()));
            }
        }
        resend
    }

    pub fn earliest_deadline(&self) -> Option<Instant> {
        self.pending.lock().values().map(|p| p.next_retry).min()
    }

    /// Remove every pending entry without notifying (used on session reset,
    /// where the send window itself already fails the waiters via its own
    /// epoch bump).
    pub fn clear(&self) {
        self.pending.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[path = "ack_retry_tests.rs"]
mod tests;
