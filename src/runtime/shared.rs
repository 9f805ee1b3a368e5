// src/runtime/shared.rs
//! Shared-memory workers
//!
//! A shared worker executes inside the controller's address space as an
//! async task. It may own a private inbox and message other shared
//! workers directly through the registry's mailbox table. Loop workers
//! run their body repeatedly, sleeping the configured interval between
//! iterations, until stopped; the stop flag is only observed between
//! iterations, so an in-flight iteration always runs to completion.

use crate::runtime::mailbox::{Courier, Message};
use crate::runtime::worker::{BindContext, WaitOutcome, Worker, WorkerIdentity};
use crate::utils::errors::{NodeError, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Entry point of a shared worker
pub type TaskBody = Arc<dyn Fn(SharedContext) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Wrap an async closure into a [`TaskBody`].
pub fn task_body<F, Fut>(f: F) -> TaskBody
where
    F: Fn(SharedContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |ctx| -> BoxFuture<'static, Result<()>> { Box::pin(f(ctx)) })
}

/// Execution context handed to a shared worker's body
#[derive(Clone)]
pub struct SharedContext {
    name: String,
    inbox: Option<Arc<tokio::sync::Mutex<UnboundedReceiver<Message>>>>,
    courier: Option<Courier>,
}

impl SharedContext {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Receive the next inbox message; `None` when the worker has no
    /// inbox or every sender is gone.
    pub async fn recv(&self) -> Option<Message> {
        match &self.inbox {
            Some(inbox) => inbox.lock().await.recv().await,
            None => None,
        }
    }

    /// Non-blocking inbox poll
    pub fn try_recv(&self) -> Option<Message> {
        match &self.inbox {
            Some(inbox) => inbox.try_lock().ok()?.try_recv().ok(),
            None => None,
        }
    }

    /// Construct a message and deposit it into `receiver`'s inbox.
    pub fn message(&self, content: serde_json::Value, receiver: &str) -> Result<()> {
        let courier = self
            .courier
            .as_ref()
            .ok_or_else(|| NodeError::NoMailbox(self.name.clone()))?;
        courier.message(content, receiver)
    }
}

/// Stop flag handle for a loop worker, clonable across tasks
#[derive(Clone)]
pub struct LoopHandle {
    name: String,
    cont: Arc<AtomicBool>,
}

impl LoopHandle {
    /// Clear the continue flag. Warns when the loop was already stopped.
    pub fn stop(&self) {
        if !self.cont.swap(false, Ordering::SeqCst) {
            warn!("loop worker '{}' has already been stopped", self.name);
        }
    }

    pub fn is_stopped(&self) -> bool {
        !self.cont.load(Ordering::SeqCst)
    }
}

struct LoopSettings {
    interval: Duration,
    cont: Arc<AtomicBool>,
}

/// A worker running as an async task in the controller's address space
pub struct SharedWorker {
    identity: WorkerIdentity,
    body: TaskBody,
    loop_settings: Option<LoopSettings>,
    handle: Option<JoinHandle<Result<()>>>,
    outcome: Option<WaitOutcome>,
    inbox: Option<Arc<tokio::sync::Mutex<UnboundedReceiver<Message>>>>,
    courier: Option<Courier>,
}

impl SharedWorker {
    /// Create a one-shot worker. Shared workers default to daemon, like
    /// the sampling loops built on top of them.
    pub fn new(name: impl Into<String>, body: TaskBody) -> Result<Self> {
        Ok(Self {
            identity: WorkerIdentity::new(name, Some(true))?,
            body,
            loop_settings: None,
            handle: None,
            outcome: None,
            inbox: None,
            courier: None,
        })
    }

    /// Create a loop worker running `body` every `interval` until stopped.
    pub fn new_loop(name: impl Into<String>, interval: Duration, body: TaskBody) -> Result<Self> {
        let mut worker = Self::new(name, body)?;
        worker.loop_settings = Some(LoopSettings {
            interval,
            cont: Arc::new(AtomicBool::new(true)),
        });
        Ok(worker)
    }

    /// Convenience over [`task_body`]
    pub fn from_fn<F, Fut>(name: impl Into<String>, f: F) -> Result<Self>
    where
        F: Fn(SharedContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self::new(name, task_body(f))
    }

    /// Override the daemon flag
    pub fn with_daemon(mut self, is_daemon: bool) -> Self {
        self.identity.set_daemon(is_daemon);
        self
    }

    /// Loop continue flag; `None` for one-shot workers
    pub fn continue_flag(&self) -> Option<bool> {
        self.loop_settings
            .as_ref()
            .map(|s| s.cont.load(Ordering::SeqCst))
    }

    /// Clonable stop handle; fails for one-shot workers.
    pub fn loop_handle(&self) -> Result<LoopHandle> {
        let settings = self
            .loop_settings
            .as_ref()
            .ok_or_else(|| NodeError::NotALoop(self.identity.name().to_string()))?;
        Ok(LoopHandle {
            name: self.identity.name().to_string(),
            cont: settings.cont.clone(),
        })
    }

    /// Clear the loop continue flag; the loop exits after the in-flight
    /// iteration. Fails for one-shot workers.
    pub fn stop(&self) -> Result<()> {
        self.loop_handle()?.stop();
        Ok(())
    }

    fn context(&mut self) -> SharedContext {
        SharedContext {
            name: self.identity.name().to_string(),
            inbox: self.inbox.clone(),
            courier: self.courier.clone(),
        }
    }
}

#[async_trait]
impl Worker for SharedWorker {
    fn identity(&self) -> &WorkerIdentity {
        &self.identity
    }

    fn is_running(&self) -> bool {
        self.outcome.is_none()
            && self
                .handle
                .as_ref()
                .map(|h| !h.is_finished())
                .unwrap_or(false)
    }

    fn bind(&mut self, ctx: BindContext) -> Result<()> {
        let inbox = ctx.mailboxes.register(self.identity.name());
        self.inbox = Some(Arc::new(tokio::sync::Mutex::new(inbox)));
        self.courier = Some(Courier::new(self.identity.name(), ctx.mailboxes));
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        self.identity.mark_begun()?;

        let ctx = self.context();
        let body = self.body.clone();
        let name = self.identity.name().to_string();

        let handle = match &self.loop_settings {
            Some(settings) => {
                let interval = settings.interval;
                let cont = settings.cont.clone();
                tokio::spawn(async move {
                    debug!("loop worker '{}' entering its loop", name);
                    while cont.load(Ordering::SeqCst) {
                        body(ctx.clone()).await?;
                        tokio::time::sleep(interval).await;
                    }
                    debug!("loop worker '{}' observed its stop flag", name);
                    Ok(())
                })
            }
            None => tokio::spawn(async move { body(ctx).await }),
        };

        self.handle = Some(handle);
        Ok(())
    }

    async fn wait(&mut self, timeout: Option<Duration>) -> Result<WaitOutcome> {
        if let Some(outcome) = self.outcome {
            return Ok(outcome);
        }

        let handle = self
            .handle
            .as_mut()
            .ok_or_else(|| NodeError::NotStarted(self.identity.name().to_string()))?;

        let joined = match timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut *handle).await {
                Ok(joined) => joined,
                Err(_) => return Ok(WaitOutcome::TimedOut),
            },
            None => (&mut *handle).await,
        };

        let outcome = match joined {
            Ok(Ok(())) => WaitOutcome::Success,
            Ok(Err(e)) => {
                warn!("worker '{}' exited with error: {}", self.identity.name(), e);
                WaitOutcome::Failed(None)
            }
            Err(e) => {
                warn!("worker '{}' join failed: {}", self.identity.name(), e);
                WaitOutcome::Failed(None)
            }
        };

        self.handle = None;
        self.outcome = Some(outcome);
        Ok(outcome)
    }
}
