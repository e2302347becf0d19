// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Feedback and result streaming (§4.8): merges a worker's
//! `biz.exec.feedback` into node metadata/result, stamps each resulting
//! delta with a per-node monotonic sequence, and publishes the events.

use wf_core::biz::FeedbackPayload;
use wf_core::value::{apply_deltas, diff_merge, Delta};
use wf_core::NodeId;

use crate::error::SchedulerError;
use crate::events::{EventBus, SchedulerEvent};
use crate::run_registry::RunRegistry;

/// Clamp `progress` into `[0, 1]`, dropping it if it is NaN (§4.8).
fn sanitize_progress(progress: Option<f64>) -> Option<f64> {
    progress.filter(|p| !p.is_nan()).map(|p| p.clamp(0.0, 1.0))
}

struct MergeOutcome {
    node_id: NodeId,
    deltas: Vec<(u64, Delta)>,
}

pub fn handle_feedback(registry: &RunRegistry, events: &EventBus, payload: FeedbackPayload) -> Result<(), SchedulerError> {
    let progress = sanitize_progress(payload.progress);
    let results_patch = payload.metadata.get("results").cloned();

    let outcome = registry
        .with_run(&payload.run_id, |run| -> Result<MergeOutcome, SchedulerError> {
            let location = run.locate(&payload.task_id).ok_or_else(|| SchedulerError::UnknownNode {
                run: payload.run_id.clone(),
                node: NodeId::new(payload.task_id.as_str()),
            })?;
            let level = run
                .level_mut(location.frame_id.as_ref())
                .ok_or_else(|| SchedulerError::UnknownNode { run: payload.run_id.clone(), node: location.node_id.clone() })?;
            let node = level
                .nodes
                .get_mut(&location.node_id)
                .ok_or_else(|| SchedulerError::UnknownNode { run: payload.run_id.clone(), node: location.node_id.clone() })?;

            if let Some(stage) = &payload.stage {
                wf_core::value::set(&mut node.metadata, "/stage", serde_json::Value::String(stage.clone()));
            }
            if let Some(p) = progress {
                wf_core::value::set(&mut node.metadata, "/progress", serde_json::json!(p));
            }
            if let Some(message) = &payload.message {
                wf_core::value::set(&mut node.metadata, "/message", serde_json::Value::String(message.clone()));
            }
            if !payload.metrics.is_null() {
                wf_core::value::set(&mut node.metadata, "/metrics", payload.metrics.clone());
            }

            // Each streamed chunk consumes one tick of the node's monotonic
            // sequence, same as a result delta (§8: "strictly monotonic,
            // starts at 1").
            for _ in 0..payload.chunks.len() {
                node.result_sequence += 1;
            }

            let mut deltas = Vec::new();
            if let Some(patch) = &results_patch {
                let diffs = diff_merge(&node.result, patch, "");
                if !diffs.is_empty() {
                    apply_deltas(&mut node.result, &diffs);
                    for delta in diffs {
                        node.result_sequence += 1;
                        deltas.push((node.result_sequence, delta));
                    }
                }
            }

            Ok(MergeOutcome { node_id: location.node_id.clone(), deltas })
        })
        .ok_or_else(|| SchedulerError::UnknownRun(payload.run_id.clone()))??;

    events.publish(SchedulerEvent::NodeState {
        run_id: payload.run_id.clone(),
        task_id: payload.task_id.clone(),
        node_id: outcome.node_id,
        stage: payload.stage.clone(),
        progress,
        message: payload.message.clone(),
    });

    for (sequence, delta) in outcome.deltas {
        events.publish(SchedulerEvent::NodeResultDelta { run_id: payload.run_id.clone(), task_id: payload.task_id.clone(), sequence, delta });
    }

    Ok(())
}
