//! Command handlers.
//!
//! Each command has a function that does the work and returns data (used
//! by tests) and a thin wrapper that prints it and picks the exit code.

pub mod build;
pub mod image;
pub mod run;
pub mod serve;
pub mod worker;

use serde::Serialize;

/// Print `value` as a single line of JSON on stdout.
pub(crate) fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

/// First 12 characters of a digest, for display.
pub(crate) fn short_hash(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}
