// src/wire/mod.rs
//! Wire protocol: length-prefixed framing over TCP
//!
//! - **frame**: the 8-digit length-prefixed codec
//! - **server**: accept loop, dispatch, and the wakeup shutdown path
//! - **client**: one-request-per-connection client with status codes
//! - **interpreter**: the pluggable command evaluation boundary

pub mod client;
pub mod frame;
pub mod interpreter;
pub mod server;

pub use client::{CommandClient, ConnStatus, ResponseData};
pub use frame::FrameCodec;
pub use interpreter::{
    build_command, parse_command, CommandInterpreter, CommandOutput, EvaluationError,
};
pub use server::CommandServer;
