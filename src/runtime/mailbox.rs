// src/runtime/mailbox.rs
//! In-memory message passing between shared-memory workers
//!
//! Every shared worker registered with a registry owns a private inbox.
//! Messages are immutable records that can be chained into a response
//! thread. Isolated workers cannot hold a live back-reference into
//! another process, so this module is shared-memory only; cross-process
//! traffic goes through pipes instead.

use crate::utils::errors::{NodeError, Result};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// A message between two shared-memory workers
#[derive(Debug, Clone)]
pub struct Message {
    content: Value,
    sender: String,
    receiver: String,
    previous: Option<Box<Message>>,
}

impl Message {
    /// Create a fresh message with no history
    pub fn new(content: Value, sender: impl Into<String>, receiver: impl Into<String>) -> Self {
        Self {
            content,
            sender: sender.into(),
            receiver: receiver.into(),
            previous: None,
        }
    }

    /// Build the reply to this message: sender and receiver swap, and the
    /// original is kept as the previous link of the chain.
    pub fn response(&self, content: Value) -> Message {
        Message {
            content,
            sender: self.receiver.clone(),
            receiver: self.sender.clone(),
            previous: Some(Box::new(self.clone())),
        }
    }

    pub fn content(&self) -> &Value {
        &self.content
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn receiver(&self) -> &str {
        &self.receiver
    }

    /// The message this one answers, if any
    pub fn previous(&self) -> Option<&Message> {
        self.previous.as_deref()
    }
}

/// Name-keyed inbox senders for every registered shared worker
#[derive(Default)]
pub struct Mailboxes {
    slots: RwLock<HashMap<String, UnboundedSender<Message>>>,
}

impl Mailboxes {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create (or replace) the inbox for `name`, returning its receiving
    /// half.
    pub fn register(&self, name: &str) -> UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.slots.write().insert(name.to_string(), tx);
        rx
    }

    /// Whether a worker has an inbox
    pub fn contains(&self, name: &str) -> bool {
        self.slots.read().contains_key(name)
    }

    /// Deposit a message into its receiver's inbox.
    ///
    /// Fails when the receiver is not a registered shared worker.
    pub fn deliver(&self, message: Message) -> Result<()> {
        let slots = self.slots.read();
        let tx = slots
            .get(message.receiver())
            .ok_or_else(|| NodeError::NoMailbox(message.receiver().to_string()))?;
        tx.send(message)
            .map_err(|e| NodeError::NoMailbox(e.0.receiver().to_string()))
    }
}

/// Sending handle given to a shared worker's context.
///
/// Knows who it speaks for, so workers only ever address peers by name.
#[derive(Clone)]
pub struct Courier {
    sender_name: String,
    mailboxes: Arc<Mailboxes>,
}

impl Courier {
    pub fn new(sender_name: impl Into<String>, mailboxes: Arc<Mailboxes>) -> Self {
        Self {
            sender_name: sender_name.into(),
            mailboxes,
        }
    }

    /// Construct a message from this worker and deposit it into the
    /// receiver's inbox.
    pub fn message(&self, content: Value, receiver: &str) -> Result<()> {
        let message = Message::new(content, self.sender_name.clone(), receiver);
        self.mailboxes.deliver(message)
    }
}
