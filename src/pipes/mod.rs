// src/pipes/mod.rs
//! Graph-routed pipes between workers
//!
//! - **network**: directed graph of named nodes and pipe edges
//! - **endpoint**: one side of a pipe, with capability checks and the
//!   graceful-close handshake

pub mod endpoint;
pub mod network;

pub use endpoint::{AttachedPipe, PipeEndpoint};
pub use network::{PipeEdge, PipeNetwork};
