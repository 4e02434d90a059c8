//! HTTP front end wiring (component G plus the ambient liveness/debug
//! surface, spec §6/§9): router assembly, the ingest handler, and the
//! `/healthz`, `/version`, `/loglevel`, `/debug/channels` auxiliary
//! endpoints the teacher always ships alongside its media routes.

pub mod middleware;
pub mod receiver;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::{header, Method, StatusCode},
    middleware as axum_middleware,
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub use receiver::ingest_handler;

/// Assemble the full router: the ingest wildcard plus liveness, version,
/// metrics, runtime log-level, and debug-introspection endpoints, CORS'd
/// and traced the way the teacher's `create_router` wires its own (spec
/// §9 "the logger is process-wide with a dynamic level").
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::PUT,
            Method::POST,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::ACCEPT, header::CONTENT_TYPE, header::AUTHORIZATION])
        .max_age(Duration::from_secs(3600));

    Router::new()
        .route("/healthz", get(health_check))
        .route("/version", get(version_check))
        .route("/metrics", get(crate::metrics::metrics_handler))
        .route("/loglevel", get(get_log_level).post(set_log_level))
        .route("/debug/channels", get(debug_channels))
        .route(
            &format!("{}/{{*path}}", state.config.url_prefix),
            any(ingest_handler),
        )
        .layer(axum_middleware::from_fn(middleware::request_logger))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// `GET /healthz` — liveness probe.
async fn health_check() -> &'static str {
    "OK"
}

/// `GET /version`.
async fn version_check() -> &'static str {
    concat!("cmaf-ingest-server v", env!("CARGO_PKG_VERSION"))
}

/// `GET /loglevel` — current `tracing_subscriber::EnvFilter` directive.
async fn get_log_level(State(state): State<Arc<AppState>>) -> Response {
    match &state.log_filter_handle {
        Some(handle) => match handle.with_current(|f| f.to_string()) {
            Ok(level) => (StatusCode::OK, level).into_response(),
            Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
        },
        None => (StatusCode::OK, state.config.log_level.clone()).into_response(),
    }
}

/// `POST /loglevel` — body is the bare new filter directive (e.g. `debug`,
/// `cmaf_ingest_server=trace,cmaf_ingest_core=debug`).
async fn set_log_level(State(state): State<Arc<AppState>>, body: String) -> Response {
    let Some(handle) = &state.log_filter_handle else {
        return (StatusCode::SERVICE_UNAVAILABLE, "log filter reload not configured").into_response();
    };

    let directive = body.trim();
    let filter = match directive.parse::<tracing_subscriber::EnvFilter>() {
        Ok(f) => f,
        Err(err) => return (StatusCode::BAD_REQUEST, format!("invalid filter: {err}")).into_response(),
    };

    match handle.reload(filter) {
        Ok(()) => {
            tracing::info!(directive, "log filter reloaded");
            (StatusCode::OK, directive.to_string()).into_response()
        }
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

/// `GET /debug/channels` — introspection into live in-memory channel state:
/// names, tracks, latest emitted sequence number, window depth. Adapted
/// from the teacher's `active_streams`/`cache_stats` debug endpoints (spec
/// §9: the non-goals exclude features, not observability).
async fn debug_channels(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let channels: Vec<_> = state
        .channels
        .channel_names()
        .into_iter()
        .filter_map(|name| state.channels.get(&name))
        .map(|channel| {
            serde_json::json!({
                "name": channel.name,
                "tracks": channel.track_names(),
                "latest_emitted_seq_nr": channel.latest_emitted_seq_nr(),
                "max_buf_segments": channel.max_buf_segments(),
                "ignored": channel.is_ignored(),
            })
        })
        .collect();

    Json(serde_json::json!({
        "count": channels.len(),
        "channels": channels,
    }))
}
