//! Ping endpoint.
//!
//! Always answers `{"ping": "pong"}`. Nothing from the request is read and
//! nothing is mutated, so repeated calls are identical.

use axum::Json;
use serde::Serialize;

/// Body returned by `GET /api/ping`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pong {
    pub ping: &'static str,
}

/// The only body the ping endpoint ever returns.
pub const PONG: Pong = Pong { ping: "pong" };

/// Ping handler. Takes no extractors, so no part of the request is consulted.
pub async fn ping() -> Json<Pong> {
    Json(PONG)
}
