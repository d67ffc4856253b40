//! HTTP surface and process wiring.

use std::sync::Arc;

use anyhow::Context;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use formrelay_job::{JobRunner, JobSpec, ReqwestTransport};
use formrelay_protocol::{StartedResponse, UploadRequest};
use formrelay_telemetry::MemorySampler;
use tokio::net::TcpListener;

use crate::config::Config;

#[derive(Clone)]
struct AppState {
    runner: JobRunner,
}

/// Builds the router: `POST /upload` and `GET /health`.
pub fn router(runner: JobRunner) -> Router {
    Router::new()
        .route("/upload", post(handle_upload))
        .route("/health", get(health))
        .with_state(AppState { runner })
}

/// Runs the server until Ctrl-C, then drains in-flight jobs.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let transport = ReqwestTransport::new(config.timeouts())?;
    let runner = JobRunner::new(Arc::new(transport), config.job_defaults());

    let sampler = MemorySampler::new();
    if config.telemetry_enabled {
        sampler.start(config.telemetry_interval()).await;
    }

    let listener = TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("binding {}", config.listen_addr()))?;
    tracing::info!(addr = %listener.local_addr()?, "HTTP server listening");

    axum::serve(listener, router(runner.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if !runner.shutdown().await {
        tracing::warn!("exiting with unfinished jobs");
    }
    sampler.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

async fn handle_upload(
    State(state): State<AppState>,
    Json(request): Json<UploadRequest>,
) -> Response {
    let spec = match JobSpec::from_request(request) {
        Ok(spec) => spec,
        Err(e) => {
            tracing::warn!(error = %e, "upload request rejected");
            return (StatusCode::BAD_REQUEST, Json(e.report())).into_response();
        }
    };

    let handle = state.runner.start(spec);
    tracing::info!(job = %handle.id(), "upload accepted");

    Json(StartedResponse {
        started_at: handle.started_at_rfc3339(),
        job_id: handle.id().to_string(),
    })
    .into_response()
}

async fn health() -> &'static str {
    "ok"
}
