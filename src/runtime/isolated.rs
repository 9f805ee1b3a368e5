// src/runtime/isolated.rs
//! Isolated-memory workers
//!
//! An isolated worker runs as its own OS process with a private address
//! space. It cannot hold references into the controller, so its wiring is
//! passed through the environment: its own name, the peers it can reach,
//! and the namespace service address. Pipe traffic is bridged between the
//! worker's graph endpoints and the child's stdio as routed envelope
//! frames (see [`crate::runtime::remote`]).

use crate::pipes::{AttachedPipe, PipeEdge};
use crate::protocol::CLOSING_FLAG;
use crate::runtime::remote::{decode_route, encode_route};
use crate::runtime::worker::{BindContext, WaitOutcome, Worker, WorkerIdentity};
use crate::utils::errors::{NodeError, Result};
use crate::wire::frame::FrameCodec;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, warn};

/// Environment key carrying the worker's own name
pub const ENV_WORKER_NAME: &str = "ACQNODE_WORKER_NAME";

/// Environment key carrying the namespace service address
pub const ENV_NAMESPACE_ADDR: &str = "ACQNODE_NAMESPACE_ADDR";

/// Environment key carrying the comma-separated peer list
pub const ENV_PEERS: &str = "ACQNODE_PEERS";

/// Configuration for spawning a worker process
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    /// Executable to run
    pub program: PathBuf,

    /// Arguments
    pub args: Vec<String>,

    /// Extra environment variables
    pub env: Vec<(String, String)>,

    /// Working directory
    pub work_dir: Option<PathBuf>,
}

impl SpawnSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            work_dir: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }
}

/// A worker running as its own OS process
pub struct IsolatedWorker {
    identity: WorkerIdentity,
    spec: SpawnSpec,
    pipes: HashMap<String, PipeEdge>,
    namespace_addr: Option<SocketAddr>,
    child: Option<Child>,
    pid: Option<u32>,
    bridge: Option<JoinHandle<()>>,
    outcome: Option<WaitOutcome>,
}

impl IsolatedWorker {
    /// Create an isolated worker. Worker processes default to non-daemon:
    /// they are left running when the controller exits.
    pub fn new(name: impl Into<String>, spec: SpawnSpec) -> Result<Self> {
        Ok(Self {
            identity: WorkerIdentity::new(name, Some(false))?,
            spec,
            pipes: HashMap::new(),
            namespace_addr: None,
            child: None,
            pid: None,
            bridge: None,
            outcome: None,
        })
    }

    /// Override the daemon flag. Daemon worker processes are killed when
    /// their handle is dropped.
    pub fn with_daemon(mut self, is_daemon: bool) -> Self {
        self.identity.set_daemon(is_daemon);
        self
    }

    /// OS process id, once started
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Ask the process to stop: SIGTERM, then SIGKILL after `grace` if it
    /// is still alive.
    pub async fn terminate(&mut self, grace: Duration) -> Result<()> {
        let pid = self
            .pid
            .ok_or_else(|| NodeError::NotStarted(self.identity.name().to_string()))?;
        let pid = Pid::from_raw(pid as i32);

        debug!("sending SIGTERM to PID {}", pid);
        kill(pid, Signal::SIGTERM).map_err(|e| NodeError::SignalFailed(e.to_string()))?;

        tokio::time::sleep(grace).await;

        if kill(pid, None).is_ok() {
            debug!("process still alive, sending SIGKILL to PID {}", pid);
            kill(pid, Signal::SIGKILL).map_err(|e| NodeError::SignalFailed(e.to_string()))?;
        }

        Ok(())
    }
}

#[async_trait]
impl Worker for IsolatedWorker {
    fn identity(&self) -> &WorkerIdentity {
        &self.identity
    }

    fn is_running(&self) -> bool {
        if self.outcome.is_some() {
            return false;
        }
        match self.pid {
            Some(pid) => kill(Pid::from_raw(pid as i32), None).is_ok(),
            None => false,
        }
    }

    fn bind(&mut self, ctx: BindContext) -> Result<()> {
        self.pipes = ctx.pipes;
        self.namespace_addr = ctx.namespace_addr;
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        self.identity.mark_begun()?;

        let mut command = Command::new(&self.spec.program);
        command.args(&self.spec.args);
        for (key, value) in &self.spec.env {
            command.env(key, value);
        }
        if let Some(dir) = &self.spec.work_dir {
            command.current_dir(dir);
        }

        command.env(ENV_WORKER_NAME, self.identity.name());
        if let Some(addr) = self.namespace_addr {
            command.env(ENV_NAMESPACE_ADDR, addr.to_string());
        }
        let peers: Vec<&str> = self.pipes.keys().map(String::as_str).collect();
        command.env(ENV_PEERS, peers.join(","));

        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(self.identity.is_daemon().unwrap_or(false));

        debug!("spawning worker '{}': {:?}", self.identity.name(), self.spec.program);
        let mut child = command
            .spawn()
            .map_err(|e| NodeError::SpawnFailed(e.to_string()))?;

        self.pid = child.id();

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| NodeError::SpawnFailed("failed to capture stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| NodeError::SpawnFailed("failed to capture stdout".into()))?;

        self.bridge = Some(tokio::spawn(run_bridge(
            self.identity.name().to_string(),
            stdout,
            stdin,
            self.pipes.clone(),
        )));
        self.child = Some(child);

        debug!("worker '{}' spawned with PID {:?}", self.identity.name(), self.pid);
        Ok(())
    }

    async fn wait(&mut self, timeout: Option<Duration>) -> Result<WaitOutcome> {
        if let Some(outcome) = self.outcome {
            return Ok(outcome);
        }

        let child = self
            .child
            .as_mut()
            .ok_or_else(|| NodeError::NotStarted(self.identity.name().to_string()))?;

        let status = match timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => status?,
                Err(_) => return Ok(WaitOutcome::TimedOut),
            },
            None => child.wait().await?,
        };

        let outcome = match status.code() {
            Some(0) => WaitOutcome::Success,
            Some(code) => WaitOutcome::Failed(Some(code)),
            None => WaitOutcome::Failed(None),
        };

        self.child = None;
        self.outcome = Some(outcome);

        // stdout EOF ends the bridge; joining here keeps the handshake
        // towards peers ahead of the reap result.
        if let Some(bridge) = self.bridge.take() {
            let _ = bridge.await;
        }

        Ok(outcome)
    }
}

/// Pump routed envelopes between the child's stdio and the worker's pipe
/// endpoints.
async fn run_bridge<R, W>(worker: String, from_child: R, to_child: W, pipes: HashMap<String, PipeEdge>)
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let attached: HashMap<String, Arc<AttachedPipe>> = pipes
        .iter()
        .map(|(dest, edge)| (dest.clone(), Arc::new(edge.endpoint.clone().attach())))
        .collect();

    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
    let mut writer = FramedWrite::new(to_child, FrameCodec);
    let writer_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if writer.send(frame).await.is_err() {
                break;
            }
        }
    });

    // one forwarder per readable endpoint: peer traffic -> child stdin
    let mut forwarders = Vec::new();
    for (dest, pipe) in &attached {
        if !pipe.readable() {
            continue;
        }
        let pipe = pipe.clone();
        let tx = tx.clone();
        let dest = dest.clone();
        forwarders.push(tokio::spawn(async move {
            loop {
                match pipe.receive().await {
                    Ok(Some(payload)) => match encode_route(&dest, &payload) {
                        Ok(frame) => {
                            if tx.send(frame).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!("dropping unroutable payload for '{}': {}", dest, e);
                            break;
                        }
                    },
                    Ok(None) => {
                        if let Ok(frame) = encode_route(&dest, CLOSING_FLAG) {
                            let _ = tx.send(frame);
                        }
                        break;
                    }
                    Err(_) => break,
                }
            }
        }));
    }
    drop(tx);

    // child stdout -> peer endpoints
    let mut reader = FramedRead::new(from_child, FrameCodec);
    while let Some(next) = reader.next().await {
        match next {
            Ok(frame) => match decode_route(&frame) {
                Ok((dest, payload)) => match attached.get(&dest) {
                    Some(pipe) if payload.as_ref() == CLOSING_FLAG => pipe.close(),
                    Some(pipe) => {
                        if let Err(e) = pipe.send(payload) {
                            warn!("worker '{}' write towards '{}' failed: {}", worker, dest, e);
                        }
                    }
                    None => warn!("worker '{}' addressed unknown peer '{}'", worker, dest),
                },
                Err(e) => warn!("worker '{}' sent a malformed envelope: {}", worker, e),
            },
            Err(e) => {
                warn!("reading from worker '{}' failed: {}", worker, e);
                break;
            }
        }
    }

    // child went away: complete the close handshake towards every peer
    for pipe in attached.values() {
        pipe.close();
    }
    for task in forwarders {
        task.abort();
    }
    let _ = writer_task.await;
    debug!("pipe bridge for worker '{}' ended", worker);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipes::PipeNetwork;
    use crate::runtime::remote::{PeerEvent, RemoteLink};

    fn shell(script: &str) -> SpawnSpec {
        SpawnSpec::new("/bin/sh").with_args(["-c", script])
    }

    #[tokio::test]
    async fn test_clean_exit_reports_success() {
        let mut worker = IsolatedWorker::new("quick", shell("exit 0")).unwrap();
        worker.start().await.unwrap();
        assert!(worker.has_begun());
        assert_eq!(worker.wait(None).await.unwrap(), WaitOutcome::Success);
        assert!(!worker.is_running());
    }

    #[tokio::test]
    async fn test_exit_code_is_reported() {
        let mut worker = IsolatedWorker::new("failing", shell("exit 3")).unwrap();
        worker.start().await.unwrap();
        assert_eq!(
            worker.wait(None).await.unwrap(),
            WaitOutcome::Failed(Some(3))
        );
    }

    #[tokio::test]
    async fn test_wait_times_out_then_joins() {
        let mut worker = IsolatedWorker::new("napper", shell("sleep 0.4")).unwrap();
        worker.start().await.unwrap();

        assert_eq!(
            worker.wait(Some(Duration::from_millis(50))).await.unwrap(),
            WaitOutcome::TimedOut
        );
        assert!(worker.is_running());

        assert_eq!(worker.wait(None).await.unwrap(), WaitOutcome::Success);
    }

    #[tokio::test]
    async fn test_worker_name_in_environment() {
        let mut worker = IsolatedWorker::new(
            "probe",
            shell("test \"$ACQNODE_WORKER_NAME\" = probe"),
        )
        .unwrap();
        worker.start().await.unwrap();
        assert_eq!(worker.wait(None).await.unwrap(), WaitOutcome::Success);
    }

    #[tokio::test]
    async fn test_terminate_escalates() {
        let mut worker = IsolatedWorker::new("stuck", shell("sleep 30")).unwrap();
        worker.start().await.unwrap();

        worker.terminate(Duration::from_millis(100)).await.unwrap();
        assert_eq!(
            worker.wait(Some(Duration::from_secs(2))).await.unwrap(),
            WaitOutcome::Failed(None)
        );
    }

    #[tokio::test]
    async fn test_bridge_routes_both_directions() {
        let mut net = PipeNetwork::new();
        net.populate(["probe", "collector"]);
        net.insert_pipe(("collector", "probe"), true).unwrap();

        // controller side of the child's stdio
        let (worker_in, controller_out) = tokio::io::duplex(4096);
        let (controller_in, worker_out) = tokio::io::duplex(4096);

        let bridge = tokio::spawn(run_bridge(
            "probe".to_string(),
            controller_in,
            controller_out,
            net.get_pipes("probe"),
        ));

        let collector = net.get_pipes("collector").remove("probe").unwrap();
        let collector = collector.endpoint.attach();

        let mut link = RemoteLink::new(
            "probe",
            vec!["collector".to_string()],
            worker_in,
            worker_out,
        );

        // child -> peer
        link.send("collector", Bytes::from_static(b"reading"))
            .await
            .unwrap();
        assert_eq!(
            collector.receive().await.unwrap().unwrap().as_ref(),
            b"reading"
        );

        // peer -> child
        collector.send(Bytes::from_static(b"ack")).unwrap();
        match link.recv().await.unwrap().unwrap() {
            PeerEvent::Payload { from, data } => {
                assert_eq!(from, "collector");
                assert_eq!(data.as_ref(), b"ack");
            }
            other => panic!("unexpected event: {:?}", other),
        }

        // peer closes; the child observes it as an orderly close
        collector.close();
        assert!(matches!(
            link.recv().await.unwrap(),
            Some(PeerEvent::Closed { .. })
        ));

        // child goes away; the bridge completes the handshake
        drop(link);
        bridge.await.unwrap();
    }
}
