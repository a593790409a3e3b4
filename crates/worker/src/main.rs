mod config;
mod demo;
mod telemetry;

use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::json;
use waypoint_engine::dispatch::InProcessDispatcher;
use waypoint_engine::engine::{RequestContext, TriggerMeta, TriggerService, WorkflowLoop};
use waypoint_engine::persistence::{InMemoryInstanceService, InMemoryPayloadStore};

use crate::config::WorkerConfig;
use crate::telemetry::{init_telemetry, TelemetryConfig};

#[tokio::main]
async fn main() -> Result<()> {
    if let Ok(path) = dotenvy::dotenv() {
        eprintln!("Loaded environment from {}", path.display());
    }

    // Configure via RUST_LOG, or LOG_LEVEL for the waypoint crates only
    let telemetry_config = TelemetryConfig::from_env();
    init_telemetry(&telemetry_config);

    tracing::info!(service = %telemetry_config.service_name, "waypoint-worker starting...");

    let config = WorkerConfig::from_env();

    tracing::info!(
        workflow = %config.demo_workflow,
        max_steps_per_run = config.engine.max_steps_per_run,
        max_decisions_per_step = config.engine.max_decisions_per_step,
        "Starting in-process engine"
    );

    let instances = Arc::new(InMemoryInstanceService::new());
    let payloads = Arc::new(InMemoryPayloadStore::new());
    let registry = Arc::new(demo::registry());
    tracing::debug!(?registry, "Step logic registered");

    let engine = WorkflowLoop::new(instances.clone(), payloads, registry)
        .with_config(config.engine.clone());
    let dispatcher = InProcessDispatcher::new(engine);
    let trigger = TriggerService::new(
        Arc::new(demo::catalog()),
        instances,
        Arc::new(dispatcher.clone()),
    );

    let summary = trigger
        .trigger_workflow(
            &RequestContext::new(config.trigger_user.clone()),
            TriggerMeta::latest(config.demo_workflow.clone())
                .with_meta(json!({ "source": "waypoint-worker" })),
            json!({ "ref": "main" }),
        )
        .await
        .context("Failed to trigger demo workflow")?;

    tracing::info!(instance_id = %summary.id, "Demo workflow triggered");

    // Run until the triggered instance settles, the timeout hits, or ctrl-c
    tokio::select! {
        result = tokio::time::timeout(config.run_timeout, dispatcher.drain()) => {
            if result.is_err() {
                tracing::warn!(timeout_secs = config.run_timeout.as_secs(), "Run timeout reached");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal");
        }
    }

    match dispatcher.last_outcome(summary.id) {
        Some(outcome) => tracing::info!(instance_id = %summary.id, ?outcome, "Instance settled"),
        None => tracing::info!(instance_id = %summary.id, "Instance still running"),
    }

    dispatcher
        .shutdown(config.shutdown_timeout)
        .await
        .context("Dispatcher did not stop cleanly")?;

    tracing::info!("Worker shutdown complete");
    Ok(())
}
