//! HTTP route handlers.
//!
//! Request tracing is enabled via middleware that generates a unique request ID
//! for each incoming request, allowing correlation of all logs within a request.

pub mod ping;

use axum::{middleware, routing::get, Router};
use http::header::{HeaderValue, CACHE_CONTROL};
use tower_http::set_header::SetResponseHeaderLayer;

use crate::config::CACHE_CONTROL_PING;
use crate::middleware::request_id_layer;

/// Path of the ping endpoint
pub const PING_PATH: &str = "/api/ping";

/// Creates the Axum router with all routes and cache headers.
pub fn create_router() -> Router {
    // Ping - never cached, probes want a live answer
    let ping_routes = Router::new()
        .route(PING_PATH, get(ping::ping))
        .layer(SetResponseHeaderLayer::overriding(
            CACHE_CONTROL,
            HeaderValue::from_static(CACHE_CONTROL_PING),
        ));

    Router::new()
        .merge(ping_routes)
        // Request ID middleware - creates root span with request_id for correlation
        .layer(middleware::from_fn(request_id_layer))
}
