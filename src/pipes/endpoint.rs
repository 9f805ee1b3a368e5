// src/pipes/endpoint.rs
//! One side of a point-to-point worker channel
//!
//! Every pipe endpoint wraps two linked channel handles: the local handle
//! it operates, and a foreign handle belonging to the opposite side. The
//! foreign handle is dropped the moment the endpoint is attached, so a
//! stray sender clone can never keep the channel alive after the true
//! owner has closed it.
//!
//! # Close handshake
//!
//! A peer blocked in `receive()` only observes a close once every sender
//! for its channel is gone. Closing therefore always transmits the
//! reserved closing flag first; the reading side treats receipt of the
//! flag as an orderly end-of-stream, never as an error. [`AttachedPipe`]
//! performs the handshake automatically when dropped.

use crate::protocol::CLOSING_FLAG;
use crate::utils::errors::{NodeError, Result};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

/// One side of a pipe created by the pipe network
pub struct PipeEndpoint {
    duplex: bool,
    readable: bool,
    writable: bool,

    /// Local handles, operated by this endpoint's holder
    tx: Mutex<Option<UnboundedSender<Bytes>>>,
    rx: tokio::sync::Mutex<Option<UnboundedReceiver<Bytes>>>,

    /// Send half of the foreign handle, dropped on attach
    foreign_tx: Mutex<Option<UnboundedSender<Bytes>>>,

    closed: AtomicBool,
    close_received: AtomicBool,
}

impl PipeEndpoint {
    /// Create a linked pair of endpoints.
    ///
    /// If `duplex` is false the pipe is unidirectional: the first endpoint
    /// can only receive and the second can only send.
    pub fn pair(duplex: bool) -> (Arc<PipeEndpoint>, Arc<PipeEndpoint>) {
        if duplex {
            let (tx_a, rx_a) = mpsc::unbounded_channel();
            let (tx_b, rx_b) = mpsc::unbounded_channel();

            let first = PipeEndpoint::new(true, true, true, Some(tx_a.clone()), Some(rx_b), Some(tx_b.clone()));
            let second = PipeEndpoint::new(true, true, true, Some(tx_b), Some(rx_a), Some(tx_a));
            (Arc::new(first), Arc::new(second))
        } else {
            let (tx, rx) = mpsc::unbounded_channel();

            let first = PipeEndpoint::new(false, true, false, None, Some(rx), Some(tx.clone()));
            let second = PipeEndpoint::new(false, false, true, Some(tx), None, None);
            (Arc::new(first), Arc::new(second))
        }
    }

    fn new(
        duplex: bool,
        readable: bool,
        writable: bool,
        tx: Option<UnboundedSender<Bytes>>,
        rx: Option<UnboundedReceiver<Bytes>>,
        foreign_tx: Option<UnboundedSender<Bytes>>,
    ) -> Self {
        Self {
            duplex,
            readable,
            writable,
            tx: Mutex::new(tx),
            rx: tokio::sync::Mutex::new(rx),
            foreign_tx: Mutex::new(foreign_tx),
            closed: AtomicBool::new(false),
            close_received: AtomicBool::new(false),
        }
    }

    /// Whether this endpoint was created as one side of a duplex pipe
    pub fn is_duplex(&self) -> bool {
        self.duplex
    }

    /// Whether this endpoint can receive
    pub fn readable(&self) -> bool {
        self.readable
    }

    /// Whether this endpoint can send
    pub fn writable(&self) -> bool {
        self.writable
    }

    /// Whether the endpoint has been closed locally
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Send a payload to the peer.
    ///
    /// The reserved closing flag is not a valid payload: closing must go
    /// through [`PipeEndpoint::close`] so the handshake stays unambiguous.
    pub fn send(&self, payload: impl Into<Bytes>) -> Result<()> {
        if !self.writable {
            return Err(NodeError::PipeNotWritable);
        }

        let payload = payload.into();
        if payload.as_ref() == CLOSING_FLAG {
            return Err(NodeError::ReservedPayload);
        }

        if self.closed.load(Ordering::SeqCst) {
            return Err(NodeError::PipeClosed);
        }

        let guard = self.tx.lock();
        let tx = guard.as_ref().ok_or(NodeError::PipeClosed)?;
        tx.send(payload).map_err(|_| NodeError::PipeClosed)
    }

    /// Receive the next payload from the peer.
    ///
    /// Returns `Ok(None)` once the peer has closed its side; receipt of
    /// the closing flag is an orderly end-of-stream, not an error.
    pub async fn receive(&self) -> Result<Option<Bytes>> {
        if !self.readable {
            return Err(NodeError::PipeNotReadable);
        }

        if self.closed.load(Ordering::SeqCst) {
            return Err(NodeError::PipeClosed);
        }

        let mut guard = self.rx.lock().await;
        let rx = guard.as_mut().ok_or(NodeError::PipeClosed)?;

        match rx.recv().await {
            Some(payload) if payload.as_ref() == CLOSING_FLAG => {
                debug!("pipe endpoint received closing flag");
                self.close_received.store(true, Ordering::SeqCst);
                Ok(None)
            }
            Some(payload) => Ok(Some(payload)),
            None => Ok(None),
        }
    }

    /// Attach the endpoint for scoped use.
    ///
    /// Dropping the foreign handle here guarantees the peer observes our
    /// eventual close; the returned guard completes the handshake when it
    /// goes out of scope.
    pub fn attach(self: Arc<Self>) -> AttachedPipe {
        self.foreign_tx.lock().take();
        AttachedPipe { endpoint: self }
    }

    /// Close the endpoint.
    ///
    /// Transmits the closing flag first unless the close was itself
    /// triggered by receiving one, then drops the local handles.
    /// Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if !self.close_received.load(Ordering::SeqCst) {
            if let Some(tx) = self.tx.lock().as_ref() {
                // The peer may already be gone; that is fine.
                let _ = tx.send(Bytes::from_static(CLOSING_FLAG));
            }
        }

        self.tx.lock().take();
        self.foreign_tx.lock().take();
        if let Ok(mut guard) = self.rx.try_lock() {
            guard.take();
        }
    }
}

/// Scoped handle to an attached endpoint.
///
/// The required usage pattern for any pipe consumer: attach, exchange
/// payloads, and let the guard close the endpoint on drop.
pub struct AttachedPipe {
    endpoint: Arc<PipeEndpoint>,
}

impl AttachedPipe {
    /// See [`PipeEndpoint::readable`]
    pub fn readable(&self) -> bool {
        self.endpoint.readable()
    }

    /// See [`PipeEndpoint::writable`]
    pub fn writable(&self) -> bool {
        self.endpoint.writable()
    }

    /// See [`PipeEndpoint::send`]
    pub fn send(&self, payload: impl Into<Bytes>) -> Result<()> {
        self.endpoint.send(payload)
    }

    /// See [`PipeEndpoint::receive`]
    pub async fn receive(&self) -> Result<Option<Bytes>> {
        self.endpoint.receive().await
    }

    /// Close early, before the guard is dropped
    pub fn close(&self) {
        self.endpoint.close();
    }
}

impl Drop for AttachedPipe {
    fn drop(&mut self) {
        self.endpoint.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_duplex_roundtrip_in_order() {
        let (a, b) = PipeEndpoint::pair(true);

        for i in 0..5u8 {
            a.send(vec![i]).unwrap();
        }

        for i in 0..5u8 {
            let got = b.receive().await.unwrap().unwrap();
            assert_eq!(got.as_ref(), &[i]);
        }

        b.send(Bytes::from_static(b"reply")).unwrap();
        assert_eq!(a.receive().await.unwrap().unwrap().as_ref(), b"reply");
    }

    #[tokio::test]
    async fn test_simplex_capabilities() {
        let (reader, writer) = PipeEndpoint::pair(false);

        assert!(reader.readable() && !reader.writable());
        assert!(writer.writable() && !writer.readable());

        assert!(matches!(
            reader.send(Bytes::from_static(b"x")),
            Err(NodeError::PipeNotWritable)
        ));
        assert!(matches!(writer.receive().await, Err(NodeError::PipeNotReadable)));

        writer.send(Bytes::from_static(b"one-way")).unwrap();
        assert_eq!(reader.receive().await.unwrap().unwrap().as_ref(), b"one-way");
    }

    #[tokio::test]
    async fn test_closing_flag_rejected_as_payload() {
        let (a, _b) = PipeEndpoint::pair(true);
        assert!(matches!(
            a.send(Bytes::from_static(CLOSING_FLAG)),
            Err(NodeError::ReservedPayload)
        ));
    }

    #[tokio::test]
    async fn test_scoped_close_terminates_reader() {
        let (a, b) = PipeEndpoint::pair(true);

        let reader = tokio::spawn(async move {
            let pipe = b.attach();
            let mut received = Vec::new();
            while let Some(payload) = pipe.receive().await.unwrap() {
                received.push(payload);
            }
            received
        });

        {
            let pipe = a.attach();
            for i in 0..3u8 {
                pipe.send(vec![i]).unwrap();
            }
            // guard drops here, completing the handshake
        }

        let received = reader.await.unwrap();
        assert_eq!(received.len(), 3);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (a, b) = PipeEndpoint::pair(true);
        a.close();
        a.close();
        assert!(a.is_closed());

        // peer sees exactly one orderly close
        assert!(b.receive().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (a, _b) = PipeEndpoint::pair(true);
        a.close();
        assert!(matches!(
            a.send(Bytes::from_static(b"late")),
            Err(NodeError::PipeClosed)
        ));
    }
}
