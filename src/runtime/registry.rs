// src/runtime/registry.rs
//! Name-keyed collection of workers owned by a controller
//!
//! The registry enforces name uniqueness, rejects re-registration of a
//! worker that died without being reaped, and can start every registered
//! worker. It also owns the resources workers are wired with at
//! registration: the mailbox table, the pipe graph and, optionally, the
//! shared namespace service.

use crate::pipes::PipeNetwork;
use crate::runtime::mailbox::{Mailboxes, Message};
use crate::runtime::namespace::NamespaceHost;
use crate::runtime::worker::{BindContext, Worker};
use crate::utils::errors::{NodeError, Result};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info};

/// Controller-owned worker registry
pub struct Registry {
    workers: HashMap<String, Box<dyn Worker>>,
    mailboxes: Arc<Mailboxes>,
    pipes: PipeNetwork,
    namespace: Option<NamespaceHost>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            workers: HashMap::new(),
            mailboxes: Mailboxes::new(),
            pipes: PipeNetwork::new(),
            namespace: None,
        }
    }

    /// The pipe graph routing channels between registered workers
    pub fn pipes(&self) -> &PipeNetwork {
        &self.pipes
    }

    /// Mutable access to the pipe graph, for wiring before workers start
    pub fn pipes_mut(&mut self) -> &mut PipeNetwork {
        &mut self.pipes
    }

    /// Start the shared namespace service. Isolated workers registered
    /// afterwards receive its address.
    pub async fn enable_namespace(&mut self) -> Result<SocketAddr> {
        let host = NamespaceHost::bind().await?;
        let addr = host.addr();
        self.namespace = Some(host);
        Ok(addr)
    }

    pub fn namespace_addr(&self) -> Option<SocketAddr> {
        self.namespace.as_ref().map(|h| h.addr())
    }

    /// Register a worker under its name.
    ///
    /// Fails on a duplicate name, on a worker that has begun and finished
    /// (dead), and on a worker already managed by some registry.
    pub fn add(&mut self, mut worker: Box<dyn Worker>) -> Result<()> {
        let name = worker.name().to_string();

        if self.workers.contains_key(&name) {
            return Err(NodeError::DuplicateWorker(name));
        }
        if worker.has_begun() && !worker.is_running() {
            return Err(NodeError::DeadWorker(name));
        }

        worker.identity().mark_managed()?;
        worker.bind(BindContext {
            mailboxes: self.mailboxes.clone(),
            pipes: self.pipes.get_pipes(&name),
            namespace_addr: self.namespace_addr(),
        })?;

        debug!("registered worker '{}'", name);
        self.workers.insert(name, worker);
        Ok(())
    }

    /// Register a whole collection at once.
    pub fn propagate(&mut self, workers: Vec<Box<dyn Worker>>) -> Result<()> {
        for worker in workers {
            self.add(worker)?;
        }
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.workers.contains_key(name)
    }

    /// Registered worker names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.workers.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    pub fn get(&self, name: &str) -> Option<&dyn Worker> {
        self.workers.get(name).map(|w| w.as_ref())
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Box<dyn Worker>> {
        self.workers.get_mut(name)
    }

    /// Start every registered worker.
    pub async fn start_all(&mut self) -> Result<()> {
        for (name, worker) in self.workers.iter_mut() {
            debug!("starting worker '{}'", name);
            worker.start().await?;
        }
        Ok(())
    }

    /// Deposit a message into its receiver's inbox.
    pub fn communicate(&self, message: Message) -> Result<()> {
        self.mailboxes.deliver(message)
    }

    /// Remove workers that have begun and finished, returning their
    /// names. Reclaiming entries is always explicit, never silent.
    pub fn reap(&mut self) -> Vec<String> {
        let dead: Vec<String> = self
            .workers
            .iter()
            .filter(|(_, worker)| worker.has_begun() && !worker.is_running())
            .map(|(name, _)| name.clone())
            .collect();

        for name in &dead {
            self.workers.remove(name);
            info!("reaped finished worker '{}'", name);
        }
        dead
    }

    /// Shut down controller-owned services.
    pub async fn close(self) {
        if let Some(namespace) = self.namespace {
            namespace.close().await;
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::shared::SharedWorker;
    use crate::runtime::worker::WaitOutcome;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn idle_worker(name: &str) -> Box<dyn Worker> {
        Box::new(SharedWorker::from_fn(name, |_ctx| async { Ok(()) }).unwrap())
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut registry = Registry::new();
        registry.add(idle_worker("alpha")).unwrap();

        assert!(matches!(
            registry.add(idle_worker("alpha")),
            Err(NodeError::DuplicateWorker(_))
        ));
    }

    #[test]
    fn test_worker_belongs_to_one_registry() {
        let mut first = Registry::new();
        let mut second = Registry::new();

        let worker = idle_worker("alpha");
        first.add(worker).unwrap();

        // a fresh worker under the same name is fine elsewhere
        second.add(idle_worker("alpha")).unwrap();
    }

    #[tokio::test]
    async fn test_dead_worker_rejected() {
        let mut worker = SharedWorker::from_fn("spent", |_ctx| async { Ok(()) }).unwrap();
        worker.start().await.unwrap();
        assert_eq!(worker.wait(None).await.unwrap(), WaitOutcome::Success);

        let mut registry = Registry::new();
        assert!(matches!(
            registry.add(Box::new(worker)),
            Err(NodeError::DeadWorker(_))
        ));
    }

    #[tokio::test]
    async fn test_propagate_and_start_all() {
        let mut registry = Registry::new();
        registry
            .propagate(vec![idle_worker("one"), idle_worker("two")])
            .unwrap();

        assert_eq!(registry.names(), vec!["one".to_string(), "two".to_string()]);
        registry.start_all().await.unwrap();

        for name in ["one", "two"] {
            let worker = registry.get_mut(name).unwrap();
            assert!(worker.has_begun());
            assert_eq!(worker.wait(None).await.unwrap(), WaitOutcome::Success);
        }
    }

    #[tokio::test]
    async fn test_message_between_shared_workers() {
        let delivered = Arc::new(AtomicBool::new(false));
        let saw = delivered.clone();

        let speaker = SharedWorker::from_fn("speaker", |ctx| async move {
            ctx.message(json!("ping"), "listener")
        })
        .unwrap();

        let listener = SharedWorker::from_fn("listener", move |ctx| {
            let saw = saw.clone();
            async move {
                let message = ctx.recv().await.expect("inbox closed early");
                assert_eq!(message.sender(), "speaker");
                assert_eq!(message.content(), &json!("ping"));
                saw.store(true, Ordering::SeqCst);
                Ok(())
            }
        })
        .unwrap();

        let mut registry = Registry::new();
        registry
            .propagate(vec![Box::new(listener), Box::new(speaker)])
            .unwrap();
        registry.start_all().await.unwrap();

        for name in ["speaker", "listener"] {
            let worker = registry.get_mut(name).unwrap();
            assert_eq!(
                worker.wait(Some(Duration::from_secs(2))).await.unwrap(),
                WaitOutcome::Success
            );
        }
        assert!(delivered.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_reap_removes_only_finished_workers() {
        let mut registry = Registry::new();
        registry.add(idle_worker("short")).unwrap();
        registry
            .add(Box::new(
                SharedWorker::from_fn("long", |_ctx| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                })
                .unwrap(),
            ))
            .unwrap();

        registry.start_all().await.unwrap();

        registry
            .get_mut("short")
            .unwrap()
            .wait(Some(Duration::from_secs(2)))
            .await
            .unwrap();

        let reaped = registry.reap();
        assert_eq!(reaped, vec!["short".to_string()]);
        assert!(registry.contains("long"));
        assert!(!registry.contains("short"));
    }
}
