// src/utils/errors.rs
//! Crate-wide error type and result alias

use thiserror::Error;

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, NodeError>;

/// Errors produced by the node runtime
///
/// Configuration and resource errors surface directly to the caller at the
/// call that requested the resource. Evaluation errors are contained at the
/// wire service boundary and never reach this type unconverted.
#[derive(Debug, Error)]
pub enum NodeError {
    // --- worker / registry lifecycle ---
    #[error("worker name '{0}' already exists in the registry")]
    DuplicateWorker(String),

    #[error("worker name '{0}' is reserved for the controller")]
    ReservedWorker(String),

    #[error("worker '{0}' is already managed by a registry")]
    AlreadyManaged(String),

    #[error("worker '{0}' has already been started")]
    AlreadyStarted(String),

    #[error("worker '{0}' has not been started")]
    NotStarted(String),

    #[error("worker '{0}' has finished and cannot be reused")]
    DeadWorker(String),

    #[error("worker '{0}' has no daemon flag set")]
    DaemonUnset(String),

    #[error("worker '{0}' is not registered for mailbox delivery")]
    NoMailbox(String),

    #[error("worker '{0}' is not a loop worker")]
    NotALoop(String),

    #[error("failed to spawn worker process: {0}")]
    SpawnFailed(String),

    #[error("worker environment is incomplete: {0}")]
    WorkerEnv(String),

    #[error("failed to signal worker process: {0}")]
    SignalFailed(String),

    // --- pipe network ---
    #[error("a pipe already exists between '{0}' and '{1}'")]
    DuplicatePipe(String, String),

    #[error("no pipe exists between '{0}' and '{1}'")]
    UnknownPipe(String, String),

    #[error("pipe endpoint is not readable")]
    PipeNotReadable,

    #[error("pipe endpoint is not writable")]
    PipeNotWritable,

    #[error("payload is reserved for pipe control; close the endpoint instead")]
    ReservedPayload,

    #[error("pipe endpoint has been closed")]
    PipeClosed,

    // --- wire protocol ---
    #[error("frame payload of {0} bytes exceeds the 8-digit length header")]
    FrameTooLarge(usize),

    #[error("malformed frame length header")]
    BadFrameHeader,

    #[error("malformed routed pipe envelope")]
    BadEnvelope,

    // --- namespace service ---
    #[error("namespace request failed: {0}")]
    Namespace(String),

    // --- sampling ---
    #[error("sensor port is not open")]
    PortNotOpen,

    #[error("sampling frequency {got} is outside the interval (0, {max}]")]
    InvalidFrequency { got: f64, max: f64 },

    // --- ambient ---
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("failed to initialise tracing: {0}")]
    Observability(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
