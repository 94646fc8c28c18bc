//! GeoEngine core: worker manifests, build decisions, input mapping and
//! container execution.
//!
//! Nothing here knows about HTTP or the command line; the `geoengine-api`
//! and `geoengine-cli` crates drive these modules.

pub mod build;
pub mod build_record;
pub mod error;
pub mod executor;
pub mod hashing;
pub mod job;
pub mod manifest;
pub mod mapping;
pub mod paths;
pub mod runtime;
pub mod settings;
pub mod store;
pub mod types;
pub mod version;
