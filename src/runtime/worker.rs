// src/runtime/worker.rs
//! Unified worker lifecycle contract
//!
//! Shared-memory and isolated-memory workers implement the same contract,
//! differing only in how the entry point is launched and how inter-worker
//! communication is wired. Registry logic stays implementation-agnostic.

use crate::pipes::PipeEdge;
use crate::protocol::is_reserved_name;
use crate::runtime::mailbox::Mailboxes;
use crate::utils::errors::{NodeError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Result of joining a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Still running when the timeout elapsed
    TimedOut,
    /// Exited cleanly
    Success,
    /// Exited with an error; carries the exit code when the OS provides one
    Failed(Option<i32>),
}

/// Name and lifecycle flags common to every worker kind
pub struct WorkerIdentity {
    name: String,
    is_daemon: Option<bool>,
    has_begun: AtomicBool,
    managed: AtomicBool,
}

impl WorkerIdentity {
    /// Create an identity, rejecting the reserved controller name.
    pub fn new(name: impl Into<String>, is_daemon: Option<bool>) -> Result<Self> {
        let name = name.into();
        if is_reserved_name(&name) {
            return Err(NodeError::ReservedWorker(name));
        }

        Ok(Self {
            name,
            is_daemon,
            has_begun: AtomicBool::new(false),
            managed: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Daemon flag; an error when it was never set.
    pub fn is_daemon(&self) -> Result<bool> {
        self.is_daemon
            .ok_or_else(|| NodeError::DaemonUnset(self.name.clone()))
    }

    /// True from the first `start()` on, never reverting.
    pub fn has_begun(&self) -> bool {
        self.has_begun.load(Ordering::SeqCst)
    }

    pub(crate) fn set_daemon(&mut self, is_daemon: bool) {
        self.is_daemon = Some(is_daemon);
    }

    /// Flip `has_begun`; fails on the second attempt.
    pub(crate) fn mark_begun(&self) -> Result<()> {
        if self.has_begun.swap(true, Ordering::SeqCst) {
            return Err(NodeError::AlreadyStarted(self.name.clone()));
        }
        Ok(())
    }

    /// Record the exclusive registry association; set once, never
    /// reassigned.
    pub(crate) fn mark_managed(&self) -> Result<()> {
        if self.managed.swap(true, Ordering::SeqCst) {
            return Err(NodeError::AlreadyManaged(self.name.clone()));
        }
        Ok(())
    }
}

/// Wiring handed to a worker when it joins a registry
pub struct BindContext {
    /// Inbox table shared by all workers of the registry
    pub mailboxes: Arc<Mailboxes>,

    /// Pipe endpoints reachable from this worker, keyed by destination
    pub pipes: HashMap<String, PipeEdge>,

    /// Address of the shared namespace service, when enabled
    pub namespace_addr: Option<SocketAddr>,
}

/// One schedulable unit of background work
#[async_trait]
pub trait Worker: Send {
    fn identity(&self) -> &WorkerIdentity;

    fn name(&self) -> &str {
        self.identity().name()
    }

    fn has_begun(&self) -> bool {
        self.identity().has_begun()
    }

    fn is_daemon(&self) -> Result<bool> {
        self.identity().is_daemon()
    }

    /// Poll the underlying execution primitive.
    ///
    /// May keep reporting true after the primitive has logically finished
    /// until the worker is reaped with `wait()`.
    fn is_running(&self) -> bool;

    /// Receive registry wiring. Called exactly once, at registration.
    fn bind(&mut self, ctx: BindContext) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    /// Launch the entry point. Fails if the worker has already begun.
    async fn start(&mut self) -> Result<()>;

    /// Join the worker, blocking up to `timeout` (forever when `None`).
    async fn wait(&mut self, timeout: Option<Duration>) -> Result<WaitOutcome>;
}
