// src/runtime/namespace.rs
//! Shared namespace service for isolated workers
//!
//! Isolated workers cannot share memory with the controller, so shared
//! mutable state lives in a small framed TCP service on loopback. The
//! host serialises every access through its single serving task; workers
//! reach it through [`NamespaceProxy`], one connection per request.

use crate::utils::errors::{NodeError, Result};
use crate::wire::frame::FrameCodec;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum NamespaceRequest {
    Get { key: String },
    Set { key: String, value: Value },
    Remove { key: String },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum NamespaceReply {
    Ok { value: Option<Value> },
    Err { message: String },
}

/// Controller-side host of the shared namespace
pub struct NamespaceHost {
    addr: SocketAddr,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl NamespaceHost {
    /// Bind the service on an ephemeral loopback port and start serving.
    pub async fn bind() -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(serve(listener, shutdown.clone()));

        info!("namespace service listening on {}", addr);
        Ok(Self {
            addr,
            shutdown,
            handle,
        })
    }

    /// Address workers use to reach the service
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop serving and join the serving task.
    pub async fn close(self) {
        self.shutdown.cancel();
        let _ = self.handle.await;
    }
}

async fn serve(listener: TcpListener, shutdown: CancellationToken) {
    let mut store: HashMap<String, Value> = HashMap::new();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("namespace request from {}", peer);
                    if let Err(e) = answer(stream, &mut store).await {
                        warn!("namespace request from {} failed: {}", peer, e);
                    }
                }
                Err(e) => warn!("namespace accept failed: {}", e),
            }
        }
    }
}

async fn answer(stream: TcpStream, store: &mut HashMap<String, Value>) -> Result<()> {
    let mut framed = Framed::new(stream, FrameCodec);

    let Some(frame) = framed.next().await.transpose()? else {
        return Ok(());
    };

    let reply = match serde_json::from_slice::<NamespaceRequest>(&frame) {
        Ok(NamespaceRequest::Get { key }) => NamespaceReply::Ok {
            value: store.get(&key).cloned(),
        },
        Ok(NamespaceRequest::Set { key, value }) => {
            store.insert(key, value);
            NamespaceReply::Ok { value: None }
        }
        Ok(NamespaceRequest::Remove { key }) => NamespaceReply::Ok {
            value: store.remove(&key),
        },
        Err(e) => NamespaceReply::Err {
            message: e.to_string(),
        },
    };

    framed.send(Bytes::from(serde_json::to_vec(&reply)?)).await?;
    Ok(())
}

/// Worker-side handle to the shared namespace
#[derive(Debug, Clone)]
pub struct NamespaceProxy {
    addr: SocketAddr,
}

impl NamespaceProxy {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    /// Build a proxy from the address the controller placed in the
    /// worker's environment.
    pub fn from_env() -> Result<Self> {
        let raw = std::env::var(crate::runtime::isolated::ENV_NAMESPACE_ADDR)
            .map_err(|_| NodeError::Namespace("namespace address not in environment".into()))?;
        let addr = raw
            .parse()
            .map_err(|_| NodeError::Namespace(format!("bad namespace address '{}'", raw)))?;
        Ok(Self::new(addr))
    }

    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.call(NamespaceRequest::Get { key: key.to_string() }).await
    }

    pub async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.call(NamespaceRequest::Set {
            key: key.to_string(),
            value,
        })
        .await
        .map(|_| ())
    }

    pub async fn remove(&self, key: &str) -> Result<Option<Value>> {
        self.call(NamespaceRequest::Remove { key: key.to_string() })
            .await
    }

    async fn call(&self, request: NamespaceRequest) -> Result<Option<Value>> {
        let stream = TcpStream::connect(self.addr).await?;
        let mut framed = Framed::new(stream, FrameCodec);

        framed
            .send(Bytes::from(serde_json::to_vec(&request)?))
            .await?;

        let Some(frame) = framed.next().await.transpose()? else {
            return Err(NodeError::Namespace("no reply from host".into()));
        };

        match serde_json::from_slice::<NamespaceReply>(&frame)? {
            NamespaceReply::Ok { value } => Ok(value),
            NamespaceReply::Err { message } => Err(NodeError::Namespace(message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_get_set_remove_roundtrip() {
        let host = NamespaceHost::bind().await.unwrap();
        let proxy = NamespaceProxy::new(host.addr());

        assert_eq!(proxy.get("counter").await.unwrap(), None);

        proxy.set("counter", json!(3)).await.unwrap();
        assert_eq!(proxy.get("counter").await.unwrap(), Some(json!(3)));

        assert_eq!(proxy.remove("counter").await.unwrap(), Some(json!(3)));
        assert_eq!(proxy.get("counter").await.unwrap(), None);

        host.close().await;
    }

    #[tokio::test]
    async fn test_concurrent_writers_serialise() {
        let host = NamespaceHost::bind().await.unwrap();
        let addr = host.addr();

        let mut tasks = Vec::new();
        for i in 0..8 {
            let proxy = NamespaceProxy::new(addr);
            tasks.push(tokio::spawn(async move {
                proxy.set(&format!("k{}", i), json!(i)).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let proxy = NamespaceProxy::new(addr);
        for i in 0..8 {
            assert_eq!(proxy.get(&format!("k{}", i)).await.unwrap(), Some(json!(i)));
        }

        host.close().await;
    }
}
