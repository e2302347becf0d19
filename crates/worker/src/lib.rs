// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! wf-worker: the dispatch pipeline, resource registry, and session client
//! that together implement the worker half of the execution protocol.

pub mod config;
pub mod dispatch_pipeline;
pub mod error;
pub mod instance_id;
pub mod resource_registry;
pub mod session_client;

pub use dispatch_pipeline::{
    DispatchPipeline, DispatchedResult, ExecutionContext, FeedbackPublisher, Handler,
    HandlerOutcome, HandlerStatus, NextCaller, OverflowPolicy, QueueConfig,
};
pub use error::WorkerError;
pub use resource_registry::{RegisterOptions, ResourceHandle, ResourceRegistry};
pub use session_client::{AuthConfig, SessionClient, SessionClientConfig, WorkerIdentity};
