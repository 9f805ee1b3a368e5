// src/observability.rs
//! Tracing initialisation for the node binary

use crate::utils::errors::{NodeError, Result};
use tracing_subscriber::EnvFilter;

/// Initialise the global tracing subscriber.
///
/// Honours `RUST_LOG`; falls back to `info` when unset. Safe to call only
/// once per process.
pub fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| NodeError::Observability(e.to_string()))
}
