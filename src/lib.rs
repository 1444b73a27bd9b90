//! dingo: a ping service and a database race-condition harness.
//!
//! The HTTP side serves a single `GET /api/ping` route. The `race` module runs
//! concurrent workers against Postgres or SQLite to show that a read-then-write
//! sequence outside one atomic step lets workers overwrite each other.

pub mod config;
pub mod http;
pub mod middleware;
pub mod race;
pub mod routes;
