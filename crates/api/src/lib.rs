//! GeoEngine job queue service.
//!
//! Exposes the building blocks (config, state, error handling, routes, job
//! engine) so the `geoengine-api` binary, the CLI's `serve` command and the
//! integration tests share one implementation.

pub mod config;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod router;
pub mod routes;
pub mod server;
pub mod state;
