// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! wf-scheduler binary: binds the worker-facing TCP listener and runs the
//! session server until terminated.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;

use wf_scheduler::config;
use wf_scheduler::dispatch::DispatchRetryPolicy;
use wf_scheduler::{DispatchOrchestrator, EventBus, MiddlewareBridge, RunRegistry, SchedulerServer, WorkerSessionRegistry};
use wf_scheduler::session_server::AuthConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    setup_logging();

    let auth = AuthConfig {
        token_secret: config::session_token_secret(),
        allowed_tokens: config::allowed_worker_tokens(),
        session_ttl: config::session_ttl(),
    };

    let events = EventBus::default();
    let registry = Arc::new(RunRegistry::new(events.clone()));
    let workers = Arc::new(WorkerSessionRegistry::new());
    let middleware = Arc::new(MiddlewareBridge::new());
    let dispatch = DispatchOrchestrator::spawn(registry.clone(), workers.clone(), events.clone(), DispatchRetryPolicy::default());

    let server = Arc::new(SchedulerServer { registry, workers, events, dispatch, middleware, auth });

    let bind_addr = config::bind_addr();
    let listener = TcpListener::bind(bind_addr).await?;
    info!(addr = %bind_addr, "scheduler listening");

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        result = server.serve(listener) => {
            result?;
        }
        _ = sigterm.recv() => {
            info!("received SIGTERM, shutting down");
        }
        _ = sigint.recv() => {
            info!("received SIGINT, shutting down");
        }
    }

    Ok(())
}

fn setup_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry().with(filter).with(fmt::layer()).init();
}
