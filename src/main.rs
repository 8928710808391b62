//! Main entry point for the CareLink backend.
//!
//! Runs the whole single-binary deployment: the REST API (with the SSE
//! event stream and Swagger UI), the task queue worker pool, and the
//! periodic schedule driving vitals monitoring, the pending-notification
//! sweep and the retention cleanup.

use api_rest::{build_state, router};
use carelink_core::config::{
    duration_secs_from_env_value, DEFAULT_HEARTBEAT, DEFAULT_MAX_RETRIES,
    DEFAULT_NOTIFICATION_RETENTION_DAYS, DEFAULT_RETRY_DELAY, DEFAULT_VITALS_WINDOW,
};
use carelink_core::CoreConfig;
use carelink_tasks::{run_scheduler, Schedule};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the CareLink application
///
/// Starts the REST server (default: 0.0.0.0:3000), the task worker pool
/// and the periodic scheduler in one process.
///
/// # Environment Variables
/// - `CARELINK_REST_ADDR`: REST server address (default: "0.0.0.0:3000")
/// - `CARELINK_HEARTBEAT_SECS`: SSE heartbeat interval
/// - `CARELINK_VITALS_WINDOW_SECS`: vitals monitoring lookback window
/// - `CARELINK_NOTIFICATION_RETENTION_DAYS`: cleanup retention window
/// - `CARELINK_MAX_RETRIES` / `CARELINK_RETRY_DELAY_SECS`: task retry policy
/// - `CARELINK_ARTEFACT_BASE_URL`: base URL for generated case sheets
/// - `CARELINK_WORKERS`: worker pool size (default: 4)
///
/// # Returns
/// * `Ok(())` - If the server starts and runs successfully
/// * `Err(anyhow::Error)` - If startup or runtime fails
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("carelink=info".parse()?)
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let rest_addr = std::env::var("CARELINK_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());

    tracing::info!("++ Starting CareLink REST on {}", rest_addr);

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
    tokio::spawn(run_scheduler(state.queue.clone(), Schedule::standard()));

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&rest_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
