// src/lib.rs
//! Acqnode Runtime Engine Library
//!
//! This library is the runtime substrate of a sensor-data acquisition
//! node: sensors sample in the background while a control channel accepts
//! textual commands and returns results.
//!
//! # Architecture
//!
//! The engine is structured into several key modules:
//!
//! - **runtime**: worker lifecycle, registry, mailboxes, namespace
//! - **pipes**: graph-routed channels with a graceful-close handshake
//! - **wire**: length-prefixed request/response protocol over TCP
//! - **sampling**: sensor drivers, buffering readers, sampler loops
//! - **observability**: tracing setup
//! - **utils**: configuration and errors

// Public module exports
pub mod observability;
pub mod pipes;
pub mod protocol;
pub mod runtime;
pub mod sampling;
pub mod utils;
pub mod wire;

// Re-export commonly used types
pub use pipes::{PipeEndpoint, PipeNetwork};
pub use runtime::{Registry, SharedWorker, Worker};
pub use utils::config::NodeConfig;
pub use utils::errors::{NodeError, Result};
pub use wire::{CommandClient, CommandServer};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
