// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Newtype identifiers used throughout the run registry and session layer.

use std::borrow::Borrow;
use std::fmt;

/// Truncate an identifier to a short display prefix (logs, CLI tables).
pub trait ShortId {
    fn short(&self, n: usize) -> &str;
}

impl ShortId for str {
    fn short(&self, n: usize) -> &str {
        if self.len() <= n {
            self
        } else {
            &self[..n]
        }
    }
}

/// Define a newtype ID wrapper around `String`.
///
/// Generates `new()`, `as_str()`, `short()`, `Display`, `From<String>`,
/// `From<&str>`, `PartialEq<str>` and `Borrow<str>` impls.
#[macro_export]
macro_rules! define_id {
    ($(#[$meta:meta])* pub struct $name:ident;) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn short(&self, n: usize) -> &str {
                $crate::id::ShortId::short(self.0.as_str(), n)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

define_id! {
    /// Identifier of one execution of a workflow.
    pub struct RunId;
}

define_id! {
    /// Identifier of a node within a workflow snapshot (local to its frame).
    pub struct NodeId;
}

define_id! {
    /// Per-run identifier of a node instance, namespaced `frame_id::node_id`
    /// for nodes inside a subgraph frame.
    pub struct TaskId;
}

define_id! {
    /// Identifier of a frame instantiation (container node activation).
    pub struct FrameId;
}

define_id! {
    /// Scheduler-assigned identifier correlating a dispatch send with its ack.
    pub struct DispatchId;
}

define_id! {
    /// Identity of a connected worker process (stable across reconnects).
    pub struct WorkerInstanceId;
}

define_id! {
    /// Session identifier assigned at handshake/register time.
    pub struct SessionId;
}

define_id! {
    /// Identifier of a `biz.exec.next` request/response pair.
    pub struct RequestId;
}

define_id! {
    /// Tenant namespace.
    pub struct Tenant;
}

impl TaskId {
    /// Build a task id namespaced under a frame: `frame_id::node_id`.
    pub fn namespaced(frame: &FrameId, node: &NodeId) -> Self {
        Self(format!("{}::{}", frame.as_str(), node.as_str()))
    }

    /// Build a root (frame-less) task id.
    pub fn root(node: &NodeId) -> Self {
        Self(node.as_str().to_string())
    }
}
