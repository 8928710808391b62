//! Standalone REST API server binary.
//!
//! ## Purpose
//! Runs the REST API server with an in-process worker pool, but without
//! the periodic schedule.
//!
//! ## Intended use
//! This binary is useful for development and debugging when you only want
//! the HTTP surface (with OpenAPI/Swagger UI) and on-demand tasks. The
//! workspace's main `carelink-run` binary adds the periodic scheduler.

use api_rest::{build_state, router};
use carelink_core::config::{
    duration_secs_from_env_value, DEFAULT_HEARTBEAT, DEFAULT_MAX_RETRIES,
    DEFAULT_NOTIFICATION_RETENTION_DAYS, DEFAULT_RETRY_DELAY, DEFAULT_VITALS_WINDOW,
};
use carelink_core::CoreConfig;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the CareLink REST API server
///
/// Starts the REST API server on the configured address (default:
/// 0.0.0.0:3000) with a worker pool draining the task queue.
///
/// # Environment Variables
/// - `CARELINK_REST_ADDR`: Server address (default: "0.0.0.0:3000")
/// - `CARELINK_HEARTBEAT_SECS`: SSE heartbeat interval
/// - `CARELINK_VITALS_WINDOW_SECS`: vitals monitoring lookback window
/// - `CARELINK_NOTIFICATION_RETENTION_DAYS`: cleanup retention window
/// - `CARELINK_MAX_RETRIES` / `CARELINK_RETRY_DELAY_SECS`: task retry policy
/// - `CARELINK_ARTEFACT_BASE_URL`: base URL for generated case sheets
/// - `CARELINK_WORKERS`: worker pool size (default: 4)
///
/// # Errors
/// Returns an error if:
/// - the logging/tracing configuration cannot be initialised,
/// - the configuration values are invalid,
/// - the server address cannot be bound, or
/// - the HTTP server fails while running.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("api_rest=info".parse()?)
                .add_directive("carelink=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let addr = std::env::var("CARELINK_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());

    tracing::info!("-- Starting CareLink REST API on {}", addr);

    let heartbeat = duration_secs_from_env_value(
        std::env::var("CARELINK_HEARTBEAT_SECS").ok(),
        DEFAULT_HEARTBEAT,
    )?;
    let vitals_window = duration_secs_from_env_value(
        std::env::var("CARELINK_VITALS_WINDOW_SECS").ok(),
        DEFAULT_VITALS_WINDOW,
    )?;
    let retention_days = match std::env::var("CARELINK_NOTIFICATION_RETENTION_DAYS") {
        Ok(v) => v.trim().parse()?,
        Err(_) => DEFAULT_NOTIFICATION_RETENTION_DAYS,
    };
    let max_retries = match std::env::var("CARELINK_MAX_RETRIES") {
        Ok(v) => v.trim().parse()?,
        Err(_) => DEFAULT_MAX_RETRIES,
    };
    let retry_delay = duration_secs_from_env_value(
        std::env::var("CARELINK_RETRY_DELAY_SECS").ok(),
        DEFAULT_RETRY_DELAY,
    )?;
    let cfg = Arc::new(CoreConfig::new(
        heartbeat,
        vitals_window,
        retention_days,
        max_retries,
        retry_delay,
    )?);

    let artefact_base_url = std::env::var("CARELINK_ARTEFACT_BASE_URL")
        .unwrap_or_else(|_| "https://files.carelink.local".into());
    let workers: usize = match std::env::var("CARELINK_WORKERS") {
        Ok(v) => v.trim().parse()?,
        Err(_) => 4,
    };

    let (state, env) = build_state(cfg, &artefact_base_url)?;
    state.queue.spawn_workers(workers, env);

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
