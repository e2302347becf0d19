// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! wf-session: the reliable bidirectional session/framing protocol (§4.1,
//! §4.2) shared by the scheduler session server and the worker session
//! client — sliding window, envelope wire codec, ack retry, and the
//! session token.

pub mod ack_retry;
pub mod control;
pub mod error;
pub mod token;
pub mod wire;
pub mod window;

pub use ack_retry::{AckOutcome, AckTracker, RetryPolicy};
pub use error::{SessionError, TransportErrorKind};
pub use window::{is_seq_acked, ReceiveWindow, SendWindow};

/// Default window size (receive + send). 64 keeps the bitmap a single
/// `u64` as required by [`window::ReceiveWindow`].
pub const DEFAULT_WINDOW_SIZE: u64 = 64;

/// Default dispatch ack deadline (§5).
pub const DEFAULT_ACK_DEADLINE: std::time::Duration = std::time::Duration::from_secs(5);
