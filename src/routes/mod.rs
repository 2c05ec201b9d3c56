//! Route modules for the partition gateway

pub mod general;
pub mod health;

use axum::{extract::DefaultBodyLimit, http::HeaderValue, Router};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Full application router.
///
/// Probes sit outside the trace layer so health polling stays out of the
/// request log.
pub fn router(state: AppState) -> Router {
    let server = &state.config().server;

    let api = general::router()
        .layer(DefaultBodyLimit::max(server.max_upload_bytes))
        .layer(TraceLayer::new_for_http());

    let mut app = Router::new().merge(api).merge(health::router());
    if let Some(origins) = &server.allowed_origins {
        app = app.layer(cors_layer(origins));
    }

    app.with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(origins.iter().filter_map(|o| HeaderValue::from_str(o).ok()))
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
}
