// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session/transport error classification (§7).

use thiserror::Error;

/// Transport error classification used to decide whether to reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Network,
    Auth,
    Protocol,
    Unknown,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session reset")]
    Reset,
    #[error("ack retries exceeded")]
    AckRetriesExceeded,
    #[error("unknown session")]
    UnknownSession,
    #[error("tenant mismatch")]
    TenantMismatch,
    #[error("worker not registered")]
    NotRegistered,
    #[error("session token invalid")]
    InvalidToken,
    #[error("transport error ({kind:?}): {message}")]
    Transport { kind: TransportErrorKind, message: String },
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },
    #[error("connection closed")]
    ConnectionClosed,
    #[error("timeout")]
    Timeout,
}

impl SessionError {
    pub fn classify(&self) -> TransportErrorKind {
        match self {
            SessionError::Transport { kind, .. } => *kind,
            SessionError::Io(_) | SessionError::ConnectionClosed | SessionError::Timeout => {
                TransportErrorKind::Network
            }
            SessionError::InvalidToken
            | SessionError::UnknownSession
            | SessionError::TenantMismatch
            | SessionError::NotRegistered => TransportErrorKind::Auth,
            SessionError::Protocol(_) | SessionError::MessageTooLarge { .. } => {
                TransportErrorKind::Protocol
            }
            _ => TransportErrorKind::Unknown,
        }
    }
}
