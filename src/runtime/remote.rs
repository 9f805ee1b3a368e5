// src/runtime/remote.rs
//! Worker-process side of the pipe bridge
//!
//! An isolated worker exchanges length-prefixed envelopes with its
//! controller over stdio. Each envelope routes one payload to or from a
//! named peer: a one-byte name length, the peer name, then the payload.
//! The reserved closing flag travels inside envelopes and marks a
//! per-peer orderly close, mirroring the pipe endpoint handshake.

use crate::protocol::CLOSING_FLAG;
use crate::runtime::isolated::{ENV_PEERS, ENV_WORKER_NAME};
use crate::utils::errors::{NodeError, Result};
use crate::wire::frame::FrameCodec;
use bytes::{BufMut, Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, Stdin, Stdout};
use tokio_util::codec::{FramedRead, FramedWrite};

/// Pack a routed payload into an envelope frame.
pub(crate) fn encode_route(peer: &str, payload: &[u8]) -> Result<Bytes> {
    let name = peer.as_bytes();
    let len = u8::try_from(name.len()).map_err(|_| NodeError::BadEnvelope)?;

    let mut buf = BytesMut::with_capacity(1 + name.len() + payload.len());
    buf.put_u8(len);
    buf.put(name);
    buf.put(payload);
    Ok(buf.freeze())
}

/// Split an envelope frame back into peer name and payload.
pub(crate) fn decode_route(frame: &[u8]) -> Result<(String, Bytes)> {
    let (&len, rest) = frame.split_first().ok_or(NodeError::BadEnvelope)?;
    let len = len as usize;
    if rest.len() < len {
        return Err(NodeError::BadEnvelope);
    }

    let name = std::str::from_utf8(&rest[..len])
        .map_err(|_| NodeError::BadEnvelope)?
        .to_string();
    Ok((name, Bytes::copy_from_slice(&rest[len..])))
}

/// Something that arrived from a peer
#[derive(Debug)]
pub enum PeerEvent {
    /// A regular payload
    Payload { from: String, data: Bytes },
    /// The peer closed its side of the pipe
    Closed { from: String },
}

/// The controller link available inside an isolated worker process
pub struct RemoteLink<R, W> {
    name: String,
    peers: Vec<String>,
    reader: FramedRead<R, FrameCodec>,
    writer: FramedWrite<W, FrameCodec>,
}

impl RemoteLink<Stdin, Stdout> {
    /// Build the link from the environment the controller prepared and
    /// the process's own stdio.
    pub fn from_env() -> Result<Self> {
        let name = std::env::var(ENV_WORKER_NAME)
            .map_err(|_| NodeError::WorkerEnv(format!("{} is not set", ENV_WORKER_NAME)))?;
        let peers = std::env::var(ENV_PEERS)
            .map(|raw| {
                raw.split(',')
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self::new(name, peers, tokio::io::stdin(), tokio::io::stdout()))
    }
}

impl<R, W> RemoteLink<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(name: impl Into<String>, peers: Vec<String>, reader: R, writer: W) -> Self {
        Self {
            name: name.into(),
            peers,
            reader: FramedRead::new(reader, FrameCodec),
            writer: FramedWrite::new(writer, FrameCodec),
        }
    }

    /// This worker's name in the pipe graph
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Peers reachable from this worker
    pub fn peers(&self) -> &[String] {
        &self.peers
    }

    /// Send a payload to a peer.
    pub async fn send(&mut self, peer: &str, payload: impl Into<Bytes>) -> Result<()> {
        let payload = payload.into();
        if payload.as_ref() == CLOSING_FLAG {
            return Err(NodeError::ReservedPayload);
        }
        self.writer.send(encode_route(peer, &payload)?).await
    }

    /// Announce an orderly close of the pipe towards `peer`.
    pub async fn close_peer(&mut self, peer: &str) -> Result<()> {
        self.writer.send(encode_route(peer, CLOSING_FLAG)?).await
    }

    /// Receive the next event from any peer; `None` once the controller
    /// has gone away.
    pub async fn recv(&mut self) -> Result<Option<PeerEvent>> {
        match self.reader.next().await {
            None => Ok(None),
            Some(Err(e)) => Err(e),
            Some(Ok(frame)) => {
                let (from, payload) = decode_route(&frame)?;
                if payload.as_ref() == CLOSING_FLAG {
                    Ok(Some(PeerEvent::Closed { from }))
                } else {
                    Ok(Some(PeerEvent::Payload { from, data: payload }))
                }
            }
        }
    }
}
