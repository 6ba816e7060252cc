//! HTTP surface: publishing, membership management, history and the SSE
//! stream endpoint.

pub mod errors;
pub mod handlers;
pub mod streaming;

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;

use crate::core::EventHub;
use crate::logging::{self, LogConfig};

pub use errors::{ApiError, ApiResult, ErrorType};

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<EventHub>,
    pub log: Arc<LogConfig>,
}

impl AppState {
    pub fn new(hub: Arc<EventHub>, log: LogConfig) -> Self {
        Self {
            hub,
            log: Arc::new(log),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let events = Router::new()
        .route("/publish", post(handlers::publish))
        .route("/channels/subscribe", post(handlers::subscribe_channel))
        .route("/channels/unsubscribe", post(handlers::unsubscribe_channel))
        .route("/channels/list", get(handlers::list_channels))
        .route("/active-connections", get(handlers::active_connections))
        .route("/stream", get(handlers::stream))
        .route("/history", get(handlers::history));

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api/events", events)
        .layer(middleware::from_fn_with_state(state.clone(), log_requests))
        .with_state(state)
}

async fn log_requests(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let request_id = logging::request_id();
    logging::log_request(&state.log, method.as_str(), &path, &request_id);

    let started = Instant::now();
    let response = next.run(request).await;

    // For streams this is time to headers, not stream lifetime.
    let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
    logging::log_response(
        &state.log,
        method.as_str(),
        &path,
        response.status().as_u16(),
        duration_ms,
        &request_id,
    );
    response
}
