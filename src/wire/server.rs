// src/wire/server.rs
//! Wire protocol server
//!
//! Binds at construction, then serves request/response exchanges from a
//! dedicated non-daemon background worker. Each connection carries one
//! framed request; the response is three frames on success
//! (`exec_ok:1`, `data_type:<name>`, payload) or two on evaluation
//! failure (`exec_ok:0`, `<ErrorKind>:<message>`).
//!
//! # Shutdown
//!
//! Setting the close flag is not enough on its own: the accept loop sits
//! blocked inside `accept()`. Closing therefore sets the flag, probes the
//! worker with a short join, and if it is still alive connects a
//! throwaway client carrying the reserved wakeup token to unblock the
//! loop before joining with the full timeout.

use crate::protocol::{DATA_TYPE_PREFIX, EXEC_FAIL, EXEC_OK, WAKEUP_FLAG};
use crate::runtime::shared::SharedWorker;
use crate::runtime::worker::{WaitOutcome, Worker};
use crate::utils::errors::{NodeError, Result};
use crate::wire::frame::FrameCodec;
use crate::wire::interpreter::CommandInterpreter;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Short join used to probe whether the accept loop noticed the close
/// flag on its own before the wakeup connection is attempted.
const CLOSE_PROBE: Duration = Duration::from_millis(200);

/// Request/response command server
pub struct CommandServer {
    interpreter: Arc<dyn CommandInterpreter>,
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    close_flag: CancellationToken,
    accept_worker: Option<SharedWorker>,
    max_inflight: usize,
}

impl CommandServer {
    /// Bind the listening socket. Fails fast when the port is occupied.
    pub async fn bind(
        host: &str,
        port: u16,
        interpreter: Arc<dyn CommandInterpreter>,
    ) -> Result<Self> {
        let listener = TcpListener::bind((host, port)).await?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            interpreter,
            listener: Some(listener),
            local_addr,
            close_flag: CancellationToken::new(),
            accept_worker: None,
            max_inflight: 1,
        })
    }

    /// Bound on concurrently served connections. The default of 1 keeps
    /// the accept loop strictly sequential.
    pub fn with_max_inflight(mut self, max_inflight: usize) -> Self {
        self.max_inflight = max_inflight.max(1);
        self
    }

    /// Address the server is listening on
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Start the accept loop as a background worker.
    pub async fn run(&mut self) -> Result<()> {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| NodeError::AlreadyStarted("command-server-loop".to_string()))?;

        let slot = Arc::new(Mutex::new(Some(listener)));
        let interpreter = self.interpreter.clone();
        let close_flag = self.close_flag.clone();
        let max_inflight = self.max_inflight;

        let mut worker = SharedWorker::from_fn("command-server-loop", move |_ctx| {
            let slot = slot.clone();
            let interpreter = interpreter.clone();
            let close_flag = close_flag.clone();
            async move {
                let listener = slot
                    .lock()
                    .take()
                    .ok_or_else(|| NodeError::AlreadyStarted("command-server-loop".to_string()))?;
                accept_loop(listener, interpreter, close_flag, max_inflight).await;
                Ok(())
            }
        })?
        .with_daemon(false);

        worker.start().await?;
        self.accept_worker = Some(worker);

        info!("command server listening on {}", self.local_addr);
        Ok(())
    }

    /// Stop the server, joining the accept loop within `timeout`.
    pub async fn close(&mut self, timeout: Duration) -> Result<()> {
        self.close_flag.cancel();

        let Some(worker) = self.accept_worker.as_mut() else {
            return Ok(());
        };

        let probe = CLOSE_PROBE.min(timeout);
        if worker.wait(Some(probe)).await? == WaitOutcome::TimedOut {
            debug!("accept loop still blocked; sending wakeup connection");
            if let Err(e) = send_wakeup(self.local_addr).await {
                warn!("wakeup connection failed: {}", e);
            }

            if worker.wait(Some(timeout)).await? == WaitOutcome::TimedOut {
                warn!("accept loop did not stop within {:?}", timeout);
            }
        }

        info!("command server on {} closed", self.local_addr);
        Ok(())
    }
}

/// Connect to our own listener and deliver the wakeup token.
async fn send_wakeup(addr: SocketAddr) -> Result<()> {
    let stream = TcpStream::connect(addr).await?;
    let mut framed = Framed::new(stream, FrameCodec);
    framed.send(Bytes::from_static(WAKEUP_FLAG)).await
}

async fn accept_loop(
    listener: TcpListener,
    interpreter: Arc<dyn CommandInterpreter>,
    close_flag: CancellationToken,
    max_inflight: usize,
) {
    let slots = Arc::new(Semaphore::new(max_inflight));

    loop {
        if close_flag.is_cancelled() {
            break;
        }

        // with one slot the next accept waits for the previous handler
        let permit = match slots.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };

        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("accept failed: {}", e);
                continue;
            }
        };
        info!("new incoming connection at {}", peer);

        let interpreter = interpreter.clone();
        tokio::spawn(async move {
            serve_connection(stream, peer, interpreter).await;
            drop(permit);
        });
    }

    // dropping the listener closes the socket
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    interpreter: Arc<dyn CommandInterpreter>,
) {
    let mut framed = Framed::new(stream, FrameCodec);

    let frame = match framed.next().await {
        None => {
            debug!("{} closed without a request", peer);
            return;
        }
        Some(Err(e)) => {
            warn!("{} request failed: {}", peer, e);
            return;
        }
        Some(Ok(frame)) => frame,
    };

    if frame.as_ref() == WAKEUP_FLAG {
        debug!("{} wakeup connection", peer);
        return;
    }

    let message = match std::str::from_utf8(&frame) {
        Ok(text) => text.to_string(),
        Err(e) => {
            warn!("{} sent a non-text request: {}", peer, e);
            return;
        }
    };
    info!("{} sent: \"{}\"", peer, message);

    let outcome: Result<()> = async {
        match interpreter.interpret(&message).await {
            Ok(output) => {
                let type_name = output.type_name();
                framed.send(Bytes::from_static(EXEC_OK)).await?;
                framed
                    .send(Bytes::from(format!("{}{}", DATA_TYPE_PREFIX, type_name)))
                    .await?;
                framed.send(output.to_payload()?).await?;
                info!("{} request responded with data_type {}", peer, type_name);
            }
            Err(e) => {
                framed.send(Bytes::from_static(EXEC_FAIL)).await?;
                framed
                    .send(Bytes::from(format!("{}:{}", e.kind(), e)))
                    .await?;
                warn!("{} evaluation failed: {}", peer, e);
            }
        }
        Ok(())
    }
    .await;

    if let Err(e) = outcome {
        warn!("{} connection error: {}", peer, e);
    }

    // the connection closes when the framed stream drops
    debug!("{} connection closed", peer);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::client::{CommandClient, ConnStatus, ResponseData};
    use crate::wire::interpreter::{CommandOutput, EvaluationError};
    use async_trait::async_trait;
    use serde_json::json;

    struct ProbeInterpreter;

    #[async_trait]
    impl CommandInterpreter for ProbeInterpreter {
        async fn interpret(
            &self,
            command: &str,
        ) -> std::result::Result<CommandOutput, EvaluationError> {
            match command {
                "ping" => Ok(CommandOutput::Text("pong".to_string())),
                "blob" => Ok(CommandOutput::Bytes(vec![0, 159, 146, 150])),
                "stats" => Ok(CommandOutput::Json(json!({"sampled": 42}))),
                _ => Err(EvaluationError::UnrecognizedCommand),
            }
        }
    }

    async fn running_server() -> (CommandServer, CommandClient) {
        let mut server = CommandServer::bind("127.0.0.1", 0, Arc::new(ProbeInterpreter))
            .await
            .unwrap();
        server.run().await.unwrap();
        let client = CommandClient::new("127.0.0.1", server.local_addr().port());
        (server, client)
    }

    #[tokio::test]
    async fn test_text_roundtrip() {
        let (mut server, client) = running_server().await;

        let (status, data) = client.message("ping").await;
        assert_eq!(status, ConnStatus::ConnOk);
        assert_eq!(data, ResponseData::Text("pong".to_string()));

        server.close(Duration::from_secs(2)).await.unwrap();
    }

    #[tokio::test]
    async fn test_binary_and_json_roundtrips() {
        let (mut server, client) = running_server().await;

        let (status, data) = client.message("blob").await;
        assert_eq!(status, ConnStatus::ConnOk);
        assert_eq!(data, ResponseData::Bytes(vec![0, 159, 146, 150]));

        let (status, data) = client.message("stats").await;
        assert_eq!(status, ConnStatus::ConnOk);
        assert_eq!(data, ResponseData::Json(json!({"sampled": 42})));

        server.close(Duration::from_secs(2)).await.unwrap();
    }

    #[tokio::test]
    async fn test_evaluation_failure_roundtrip() {
        let (mut server, client) = running_server().await;

        let (status, data) = client.message("bogus").await;
        assert_eq!(status, ConnStatus::KnownErr);
        match data {
            ResponseData::Error { kind, message } => {
                assert_eq!(kind, "UnrecognizedCommandError");
                assert!(message.contains("not been recognized"));
            }
            other => panic!("unexpected payload: {:?}", other),
        }

        // the accept loop survives the failed evaluation
        let (status, _) = client.message("ping").await;
        assert_eq!(status, ConnStatus::ConnOk);

        server.close(Duration::from_secs(2)).await.unwrap();
    }

    #[tokio::test]
    async fn test_sequential_requests_over_fresh_connections() {
        let (mut server, client) = running_server().await;

        for _ in 0..5 {
            let (status, data) = client.message("ping").await;
            assert_eq!(status, ConnStatus::ConnOk);
            assert_eq!(data, ResponseData::Text("pong".to_string()));
        }

        server.close(Duration::from_secs(2)).await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_unblocks_idle_accept_loop() {
        let (mut server, _client) = running_server().await;

        // no traffic at all: the loop is parked inside accept()
        let started = tokio::time::Instant::now();
        server.close(Duration::from_secs(2)).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));

        // a request after shutdown no longer succeeds
        let client = CommandClient::new("127.0.0.1", server.local_addr().port());
        let (status, _) = client.message("ping").await;
        assert_ne!(status, ConnStatus::ConnOk);
    }
}
