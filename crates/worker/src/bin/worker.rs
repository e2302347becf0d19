// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! wf-worker binary: connects to the scheduler and runs dispatches handed
//! back over the session until terminated. Runner adapters are loaded from
//! packages at a layer this binary does not own; `DispatchPipeline::register_handler`
//! is the extension point a package loader would call into.

use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tracing::info;

use wf_session::control::{AuthMode, Capabilities, Concurrency};

use wf_worker::config;
use wf_worker::dispatch_pipeline::QueueConfig;
use wf_worker::session_client::{AuthConfig, SessionClientConfig, WorkerIdentity};
use wf_worker::{DispatchPipeline, ResourceRegistry, SessionClient};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    setup_logging();

    let instance_id = wf_worker::instance_id::load_or_create(&config::data_dir())?;
    info!(instance_id = %instance_id, "worker starting");

    let resources = Arc::new(ResourceRegistry::new());
    let queue_config = QueueConfig {
        capacity: config::queue_capacity(),
        overflow: wf_worker::dispatch_pipeline::OverflowPolicy::Block,
        idle_timeout: config::queue_idle_timeout(),
    };
    let (pipeline, results_rx) = DispatchPipeline::new(
        resources,
        config::max_inflight(),
        queue_config,
        config::cooldown_failure_threshold(),
        config::cooldown_duration(),
    );

    let identity = WorkerIdentity {
        instance_id,
        name: config::worker_name(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        hostname: hostname(),
    };

    let client_config = SessionClientConfig {
        addr: config::scheduler_addr(),
        tenant: config::tenant(),
        identity,
        auth: AuthConfig { mode: AuthMode::Token, token: config::auth_token() },
        capabilities: Capabilities {
            concurrency: Concurrency { max_parallel: config::max_inflight() as u32, per_node_limits: None },
            runtimes: Vec::new(),
            features: Vec::new(),
        },
        packages: Vec::new(),
        heartbeat_interval: config::heartbeat_interval(),
    };

    let client = Arc::new(SessionClient::new(client_config, pipeline, results_rx));

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = client.run() => {}
        _ = sigterm.recv() => {
            info!("received SIGTERM, shutting down");
        }
        _ = sigint.recv() => {
            info!("received SIGINT, shutting down");
        }
    }

    Ok(())
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

fn setup_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry().with(filter).with(fmt::layer()).init();
}
