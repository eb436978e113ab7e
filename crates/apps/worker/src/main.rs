mod config;
mod download;
mod error;
mod job;
mod notify;
mod raster;
mod request;
mod storage;

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use foundation::SystemClock;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::WorkerConfig;
use crate::job::{run_job, WorkerContext};
use crate::request::{JobRequest, RawRequest};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = WorkerConfig::from_env()?;
    if let Err(err) = tokio::fs::create_dir_all(&config.work_dir).await {
        warn!("failed to create work dir: {err}");
    }
    let addr = config.addr;
    let ctx = WorkerContext::new(config, Arc::new(SystemClock));

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/jobs", post(submit))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx);

    info!("subdivision worker listening on http://{addr}");
    axum::serve(tokio::net::TcpListener::bind(addr).await?, app).await?;
    Ok(())
}

async fn healthz() -> Response {
    (StatusCode::OK, "ok").into_response()
}

/// Parameters may come from the query string, a JSON body, or both.
async fn submit(
    State(ctx): State<WorkerContext>,
    Query(query): Query<RawRequest>,
    body: Option<Json<RawRequest>>,
) -> Response {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let req = match JobRequest::from_parts(query, body) {
        Ok(req) => req,
        Err(e) => return e.into_response(),
    };
    match run_job(&ctx, req).await {
        Ok(resp) => (StatusCode::OK, Json(resp)).into_response(),
        Err(e) => e.into_response(),
    }
}
