// src/runtime/mod.rs
//! Worker execution runtime
//!
//! This module provides the unified task-lifecycle abstraction:
//!
//! - **worker**: the contract shared by every worker kind
//! - **shared**: workers running inside the controller's address space
//! - **isolated**: workers running as their own OS processes
//! - **registry**: the controller's name-keyed worker collection
//! - **mailbox**: in-memory messaging between shared workers
//! - **namespace**: shared mutable state for isolated workers
//! - **remote**: the worker-process side of the stdio pipe bridge
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Controller                                              │
//! │   Registry ──┬── SharedWorker   (tokio task + mailbox)  │
//! │              ├── SharedWorker                           │
//! │              └── IsolatedWorker (OS process)            │
//! │                        │  stdio bridge                  │
//! │   PipeNetwork ─────────┤  (routed envelopes)            │
//! │   NamespaceHost ───────┘  (framed get/set)              │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod isolated;
pub mod mailbox;
pub mod namespace;
pub mod registry;
pub mod remote;
pub mod shared;
pub mod worker;

// Re-export commonly used types
pub use isolated::{IsolatedWorker, SpawnSpec};
pub use mailbox::{Courier, Mailboxes, Message};
pub use namespace::{NamespaceHost, NamespaceProxy};
pub use registry::Registry;
pub use remote::{PeerEvent, RemoteLink};
pub use shared::{task_body, LoopHandle, SharedContext, SharedWorker, TaskBody};
pub use worker::{BindContext, WaitOutcome, Worker, WorkerIdentity};
