//! Probe endpoints
//!
//! - GET /healthcheck - memory and load report
//! - GET /ready - whether to keep routing new traffic here
//! - GET /live - whether the process is still worth keeping

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;

use crate::admission::HealthReport;
use crate::state::AppState;

#[derive(Serialize)]
struct ReadyResponse {
    ready: bool,
}

#[derive(Serialize)]
struct LiveResponse {
    live: bool,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/healthcheck", get(healthcheck))
        .route("/ready", get(ready))
        .route("/live", get(live))
}

fn probe_status(ok: bool) -> StatusCode {
    if ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn healthcheck(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let report = state.gate().health();
    (probe_status(report.is_healthy()), Json(report))
}

async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let ready = state.gate().ready();
    (probe_status(ready), Json(ReadyResponse { ready }))
}

async fn live(State(state): State<AppState>) -> (StatusCode, Json<LiveResponse>) {
    let live = state.gate().live();
    (probe_status(live), Json(LiveResponse { live }))
}
