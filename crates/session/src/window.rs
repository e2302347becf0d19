// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-direction sliding window (§4.1): in-order delivery with a
//! selective-ack bitmap on the receive side, and send credits + in-flight
//! bookkeeping on the send side.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::error::SessionError;

/// Receive-side half of the window, parameterized over the buffered item
/// type `T` (an [`wf_core::Envelope`] in practice, left generic here so the
/// property tests can use plain integers).
pub struct ReceiveWindow<T> {
    size: u64,
    base_seq: u64,
    bitmap: u64,
    buffer: HashMap<u64, T>,
}

impl<T> ReceiveWindow<T> {
    /// `size` must be in `1..=64` — the bitmap is a single `u64`.
    pub fn new(size: u64) -> Self {
        assert!((1..=64).contains(&size), "window size must be in 1..=64, got {size}");
        Self { size, base_seq: 0, bitmap: 0, buffer: HashMap::new() }
    }

    /// Record a received `seq`. Returns the in-order-ready prefix drained by
    /// this call (possibly empty) and whether the item was newly accepted
    /// (`false` for stale, out-of-window, or duplicate).
    pub fn record(&mut self, seq: u64, item: T) -> (Vec<T>, bool) {
        if seq <= self.base_seq || seq > self.base_seq + self.size {
            return (Vec::new(), false);
        }
        let offset = seq - self.base_seq - 1;
        if self.buffer.contains_key(&seq) {
            return (Vec::new(), false);
        }
        self.buffer.insert(seq, item);
        self.bitmap |= 1 << offset;

        let mut ready = Vec::new();
        while self.bitmap & 1 == 1 {
            let next_seq = self.base_seq + 1;
            match self.buffer.remove(&next_seq) {
                Some(entry) => {
                    ready.push(entry);
                    self.base_seq += 1;
                    self.bitmap >>= 1;
                }
                None => break,
            }
        }
        (ready, true)
    }

    /// `(base_seq, bitmap, window_size)` for the next `control.ack`.
    pub fn ack_state(&self) -> (u64, u64, u64) {
        (self.base_seq, self.bitmap, self.size)
    }

    pub fn reset(&mut self) {
        self.base_seq = 0;
        self.bitmap = 0;
        self.buffer.clear();
    }
}

/// Is `seq` covered by an ack (either `<= ack_seq` or set in the relative
/// bitmap)? Used by the sender to decide which in-flight entries an
/// incoming `control.ack` clears.
pub fn is_seq_acked(seq: u64, ack_seq: u64, ack_bitmap: u64, window_size: u64) -> bool {
    if seq <= ack_seq {
        return true;
    }
    let offset = seq - ack_seq - 1;
    if offset >= window_size {
        return false;
    }
    ack_bitmap & (1 << offset) != 0
}

struct SendState<E> {
    next_seq: u64,
    in_flight: HashMap<u64, E>,
}

/// Send-side half of the window: a credit semaphore bounding in-flight
/// envelopes to `W`, a monotonic sequence counter, and the in-flight map
/// keyed by session seq.
pub struct SendWindow<E> {
    size: u64,
    credits: Arc<Semaphore>,
    state: Mutex<SendState<E>>,
    epoch: AtomicU64,
}

impl<E> SendWindow<E> {
    pub fn new(size: u64) -> Self {
        Self {
            size,
            credits: Arc::new(Semaphore::new(size as usize)),
            state: Mutex::new(SendState { next_seq: 0, in_flight: HashMap::new() }),
            epoch: AtomicU64::new(0),
        }
    }

    /// Acquire a send credit and assign the next monotonic seq, recording
    /// `envelope` as in-flight. Suspends until a credit is available or the
    /// window is reset (in which case it fails with `SessionError::Reset`).
    pub async fn assign_seq(&self, envelope: E) -> Result<u64, SessionError> {
        let epoch_at_acquire = self.epoch.load(Ordering::SeqCst);
        let permit = self
            .credits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| SessionError::Reset)?;
        if self.epoch.load(Ordering::SeqCst) != epoch_at_acquire {
            // A reset happened between acquire and now; don't hand out a
            // seq against a window that no longer exists.
            permit.forget();
            return Err(SessionError::Reset);
        }
        permit.forget();
        let mut state = self.state.lock();
        state.next_seq += 1;
        let seq = state.next_seq;
        state.in_flight.insert(seq, envelope);
        Ok(seq)
    }

    /// Apply an incoming `control.ack`, releasing one credit per in-flight
    /// seq it covers and returning the envelopes that were released.
    pub fn apply_ack(&self, ack_seq: u64, ack_bitmap: u64, recv_window: u64) -> Vec<E> {
        let mut state = self.state.lock();
        let covered: Vec<u64> = state
            .in_flight
            .keys()
            .copied()
            .filter(|&seq| is_seq_acked(seq, ack_seq, ack_bitmap, recv_window))
            .collect();
        let mut released = Vec::with_capacity(covered.len());
        for seq in covered {
            if let Some(e) = state.in_flight.remove(&seq) {
                released.push(e);
                self.credits.add_permits(1);
            }
        }
        released
    }

    /// Release a single in-flight seq without an ack (retry exhaustion).
    pub fn fail_seq(&self, seq: u64) -> Option<E> {
        let mut state = self.state.lock();
        let entry = state.in_flight.remove(&seq);
        if entry.is_some() {
            self.credits.add_permits(1);
        }
        entry
    }

    /// Session reset (§4.1, §5): cancel outstanding credit waiters by
    /// closing the credit semaphore (any pending or future `acquire` fails)
    /// and bumping the epoch, so a waiter that already held a stale permit
    /// observes the epoch mismatch and fails with `SessionError::Reset`
    /// rather than handing out a seq. Clears in-flight bookkeeping and the
    /// sequence counter. The owning session layer must construct a fresh
    /// `SendWindow` for the next epoch — this one is permanently spent.
    pub fn reset(&self) -> Vec<E> {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.credits.close();
        let mut state = self.state.lock();
        let drained: Vec<E> = state.in_flight.drain().map(|(_, v)| v).collect();
        state.next_seq = 0;
        drained
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
#[path = "window_tests.rs"]
mod tests;
