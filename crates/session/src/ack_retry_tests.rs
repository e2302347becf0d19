// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::time::Duration;

fn policy() -> RetryPolicy {
    RetryPolicy { base: Duration::from_millis(10), max: Duration::from_millis(40), max_attempts: 3 }
}

#[tokio::test]
async fn ack_resolves_waiter_and_removes_entry() {
    let tracker: AckTracker<&'static str> = AckTracker::new(policy());
    let now = Instant::now();
    let rx = tracker.track("env-1".into(), "payload", now);
    assert!(tracker.ack("env-1"));
    assert_eq!(rx.await.unwrap(), AckOutcome::Acked);
    assert!(tracker.is_empty());
}

#[test]
fn poll_due_backs_off_exponentially_and_caps_at_max() {
    let tracker: AckTracker<&'static str> = AckTracker::new(policy());
    let t0 = Instant::now();
    tracker.track("env-1".into(), "payload", t0);

    // First resend at t0 + base (10ms); next retry scheduled for +10ms more.
    let due = tracker.poll_due(t0 + Duration::from_millis(10));
    assert_eq!(due.len(), 1);

    // Not due yet — only 5ms elapsed since the first resend (needs 10ms).
    let due = tracker.poll_due(t0 + Duration::from_millis(15));
    assert!(due.is_empty());

    // Due once the doubled backoff (20ms total) has elapsed.
    let due = tracker.poll_due(t0 + Duration::from_millis(20));
    assert_eq!(due.len(), 1);
}

#[tokio::test]
async fn exceeding_attempt_cap_fails_the_waiter() {
    let tracker: AckTracker<&'static str> = AckTracker::new(policy());
    let t0 = Instant::now();
    let rx = tracker.track("env-1".into(), "payload", t0);

    let mut now = t0;
    for _ in 0..policy().max_attempts {
        now += Duration::from_secs(1);
        tracker.poll_due(now);
    }
    now += Duration::from_secs(1);
    let due = tracker.poll_due(now);
    assert!(due.is_empty());
    assert_eq!(rx.await.unwrap(), AckOutcome::RetriesExceeded);
    assert!(tracker.is_empty());
}
