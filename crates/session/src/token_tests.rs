// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

const SECRET: &[u8] = b"test-secret";

#[test]
fn issue_then_validate_round_trips() {
    let (token, exp) = issue(SECRET, "sess-1", "worker-1", "tenant-a", 3600, 1_000);
    assert_eq!(exp, 4_600);
    let payload = validate(&token, SECRET, "sess-1", "worker-1", "tenant-a", 1_500).unwrap();
    assert_eq!(payload.sid, "sess-1");
    assert_eq!(payload.exp, 4_600);
}

#[test]
fn validate_rejects_expired_token() {
    let (token, _) = issue(SECRET, "sess-1", "worker-1", "tenant-a", 10, 1_000);
    let result = validate(&token, SECRET, "sess-1", "worker-1", "tenant-a", 2_000);
    assert!(matches!(result, Err(SessionError::InvalidToken)));
}

#[test]
fn validate_rejects_wrong_secret() {
    let (token, _) = issue(SECRET, "sess-1", "worker-1", "tenant-a", 3600, 1_000);
    let result = validate(&token, b"other-secret", "sess-1", "worker-1", "tenant-a", 1_100);
    assert!(matches!(result, Err(SessionError::InvalidToken)));
}

#[test]
fn validate_rejects_field_mismatch() {
    let (token, _) = issue(SECRET, "sess-1", "worker-1", "tenant-a", 3600, 1_000);
    assert!(validate(&token, SECRET, "sess-2", "worker-1", "tenant-a", 1_100).is_err());
    assert!(validate(&token, SECRET, "sess-1", "worker-2", "tenant-a", 1_100).is_err());
    assert!(validate(&token, SECRET, "sess-1", "worker-1", "tenant-b", 1_100).is_err());
}

#[test]
fn validate_rejects_malformed_token() {
    assert!(validate("not-a-token", SECRET, "sess-1", "worker-1", "tenant-a", 0).is_err());
    assert!(validate("a.b", SECRET, "sess-1", "worker-1", "tenant-a", 0).is_err());
}
