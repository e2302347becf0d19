// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn out_of_order_window_scenario() {
    // spec.md §8 scenario 4: sender emits 1..5, receiver records 2,1,4,3,5.
    let mut w: ReceiveWindow<u64> = ReceiveWindow::new(8);
    let (ready, _) = w.record(2, 2);
    assert_eq!(ready, Vec::<u64>::new());
    assert_eq!(w.ack_state().0, 0);

    let (ready, _) = w.record(1, 1);
    assert_eq!(ready, vec![1, 2]);
    assert_eq!(w.ack_state().0, 2);

    let (ready, _) = w.record(4, 4);
    assert_eq!(ready, Vec::<u64>::new());
    assert_eq!(w.ack_state().0, 2);

    let (ready, _) = w.record(3, 3);
    assert_eq!(ready, vec![3, 4]);
    assert_eq!(w.ack_state().0, 4);

    let (ready, _) = w.record(5, 5);
    assert_eq!(ready, vec![5]);
    assert_eq!(w.ack_state().0, 5);
}

#[test]
fn stale_and_out_of_window_are_rejected() {
    let mut w: ReceiveWindow<u64> = ReceiveWindow::new(4);
    w.record(1, 1);
    let (ready, accepted) = w.record(1, 1);
    assert!(!accepted);
    assert!(ready.is_empty());

    let (ready, accepted) = w.record(100, 100);
    assert!(!accepted);
    assert!(ready.is_empty());
}

#[test]
fn duplicate_buffered_seq_is_rejected() {
    let mut w: ReceiveWindow<u64> = ReceiveWindow::new(4);
    w.record(3, 3);
    let (ready, accepted) = w.record(3, 99);
    assert!(!accepted);
    assert!(ready.is_empty());
}

#[test]
fn round_trip_any_permutation_drains_fully() {
    use proptest::prelude::*;
    proptest!(|(mut perm in proptest::collection::vec(1u64..=12, 12))| {
        // Build a permutation of 1..=12 deterministically from the sampled
        // values by ranking them (avoids needing a shuffle dependency).
        let mut indexed: Vec<(u64, usize)> = perm.drain(..).enumerate().map(|(i, v)| (v, i)).collect();
        indexed.sort();
        let order: Vec<u64> = (1..=12).collect();
        let mut permuted = order.clone();
        for (rank, (_, orig_idx)) in indexed.into_iter().enumerate() {
            permuted[orig_idx] = order[rank];
        }

        let mut w: ReceiveWindow<u64> = ReceiveWindow::new(16);
        let mut all_ready = Vec::new();
        for seq in &permuted {
            let (ready, _) = w.record(*seq, *seq);
            all_ready.extend(ready);
        }
        prop_assert_eq!(w.ack_state().0, 12);
        prop_assert_eq!(w.ack_state().1, 0);
        prop_assert_eq!(all_ready, (1..=12).collect::<Vec<_>>());
    });
}

#[test]
fn is_seq_acked_covers_cumulative_and_bitmap() {
    assert!(is_seq_acked(3, 5, 0, 8));
    assert!(!is_seq_acked(7, 5, 0, 8));
    assert!(is_seq_acked(7, 5, 0b10, 8)); // offset 1 -> bit 1
    assert!(!is_seq_acked(100, 5, 0xFF, 8));
}

#[tokio::test]
async fn send_window_assigns_and_releases_on_ack() {
    let sw: SendWindow<String> = SendWindow::new(4);
    let seq1 = sw.assign_seq("one".into()).await.unwrap();
    let seq2 = sw.assign_seq("two".into()).await.unwrap();
    assert_eq!((seq1, seq2), (1, 2));

    let released = sw.apply_ack(1, 0, 4);
    assert_eq!(released, vec!["one".to_string()]);

    let released = sw.apply_ack(2, 0, 4);
    assert_eq!(released, vec!["two".to_string()]);
}

#[tokio::test]
async fn send_window_blocks_past_capacity_until_credit_frees() {
    let sw: SendWindow<u64> = SendWindow::new(1);
    sw.assign_seq(1).await.unwrap();

    let sw = std::sync::Arc::new(sw);
    let sw2 = sw.clone();
    let handle = tokio::spawn(async move { sw2.assign_seq(2).await });

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert!(!handle.is_finished());

    sw.apply_ack(1, 0, 1);
    let seq = handle.await.unwrap().unwrap();
    assert_eq!(seq, 2);
}

#[tokio::test]
async fn reset_fails_pending_waiters_with_session_reset() {
    let sw: SendWindow<u64> = SendWindow::new(1);
    sw.assign_seq(1).await.unwrap();

    let sw = std::sync::Arc::new(sw);
    let sw2 = sw.clone();
    let handle = tokio::spawn(async move { sw2.assign_seq(2).await });

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let drained = sw.reset();
    assert_eq!(drained, vec![1]);

    let err = handle.await.unwrap().unwrap_err();
    assert!(matches!(err, SessionError::Reset));
}
