// src/wire/client.rs
//! Wire protocol client
//!
//! One request per connection: every call opens a fresh socket, sends the
//! framed request and reads the three-part response. Connection and
//! decoding problems never raise; they come back as a status code, so a
//! failure on either side cannot propagate to the other.

use crate::protocol::DATA_TYPE_PREFIX;
use crate::utils::errors::NodeError;
use crate::wire::frame::FrameCodec;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::io::ErrorKind;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::debug;

/// Connection status of a request/response exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnStatus {
    /// Round-trip succeeded
    ConnOk = 100,
    /// Server actively refused the connection
    ConnRefused = 200,
    /// Other connection-level failure
    ConnUnknownErr = 300,
    /// Connected but no usable response arrived
    ServerUnknownErr = 400,
    /// Response payload failed to deserialise
    ResponseDataErr = 500,
    /// Server reported an evaluation failure
    KnownErr = 600,
}

/// Response payload accompanying a [`ConnStatus`]
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseData {
    None,
    Text(String),
    Bytes(Vec<u8>),
    Json(Value),
    /// Evaluation failure: `(error_kind, message)`
    Error { kind: String, message: String },
}

/// Client for the node's command service
#[derive(Debug, Clone)]
pub struct CommandClient {
    host: String,
    port: u16,
}

impl CommandClient {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Send one command and read the response.
    pub async fn message(&self, content: &str) -> (ConnStatus, ResponseData) {
        let stream = match TcpStream::connect((self.host.as_str(), self.port)).await {
            Ok(stream) => stream,
            Err(e) if e.kind() == ErrorKind::ConnectionRefused => {
                return (ConnStatus::ConnRefused, ResponseData::None);
            }
            Err(e) => {
                debug!("connection to {}:{} failed: {}", self.host, self.port, e);
                return (ConnStatus::ConnUnknownErr, ResponseData::None);
            }
        };

        let mut framed = Framed::new(stream, FrameCodec);

        if framed
            .send(Bytes::copy_from_slice(content.as_bytes()))
            .await
            .is_err()
        {
            return (ConnStatus::ConnUnknownErr, ResponseData::None);
        }

        let exec_frame = match self.next_frame(&mut framed).await {
            Ok(Some(frame)) => frame,
            Ok(None) => return (ConnStatus::ServerUnknownErr, ResponseData::None),
            Err(status) => return (status, ResponseData::None),
        };

        let exec_ok = match Self::parse_exec_flag(&exec_frame) {
            Some(flag) => flag,
            None => return (ConnStatus::ServerUnknownErr, ResponseData::None),
        };

        if exec_ok {
            self.read_success(&mut framed).await
        } else {
            self.read_failure(&mut framed).await
        }
    }

    async fn read_success(
        &self,
        framed: &mut Framed<TcpStream, FrameCodec>,
    ) -> (ConnStatus, ResponseData) {
        let type_frame = match self.next_frame(framed).await {
            Ok(Some(frame)) => frame,
            Ok(None) => return (ConnStatus::ServerUnknownErr, ResponseData::None),
            Err(status) => return (status, ResponseData::None),
        };
        let payload = match self.next_frame(framed).await {
            Ok(Some(frame)) => frame,
            Ok(None) => return (ConnStatus::ServerUnknownErr, ResponseData::None),
            Err(status) => return (status, ResponseData::None),
        };

        let type_name = match std::str::from_utf8(&type_frame)
            .ok()
            .and_then(|t| t.strip_prefix(DATA_TYPE_PREFIX))
        {
            Some(name) => name,
            None => return (ConnStatus::ResponseDataErr, ResponseData::None),
        };

        match type_name {
            "str" => match String::from_utf8(payload.to_vec()) {
                Ok(text) => (ConnStatus::ConnOk, ResponseData::Text(text)),
                Err(_) => (ConnStatus::ResponseDataErr, ResponseData::None),
            },
            "bytes" => (ConnStatus::ConnOk, ResponseData::Bytes(payload.to_vec())),
            "json" => match serde_json::from_slice(&payload) {
                Ok(value) => (ConnStatus::ConnOk, ResponseData::Json(value)),
                Err(_) => (ConnStatus::ResponseDataErr, ResponseData::None),
            },
            _ => (ConnStatus::ResponseDataErr, ResponseData::None),
        }
    }

    async fn read_failure(
        &self,
        framed: &mut Framed<TcpStream, FrameCodec>,
    ) -> (ConnStatus, ResponseData) {
        let error_frame = match self.next_frame(framed).await {
            Ok(Some(frame)) => frame,
            Ok(None) => return (ConnStatus::ServerUnknownErr, ResponseData::None),
            Err(status) => return (status, ResponseData::None),
        };

        let text = match String::from_utf8(error_frame.to_vec()) {
            Ok(text) => text,
            Err(_) => return (ConnStatus::ResponseDataErr, ResponseData::None),
        };

        match text.split_once(':') {
            Some((kind, message)) => (
                ConnStatus::KnownErr,
                ResponseData::Error {
                    kind: kind.to_string(),
                    message: message.to_string(),
                },
            ),
            None => (ConnStatus::ServerUnknownErr, ResponseData::None),
        }
    }

    async fn next_frame(
        &self,
        framed: &mut Framed<TcpStream, FrameCodec>,
    ) -> std::result::Result<Option<Bytes>, ConnStatus> {
        match framed.next().await {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(NodeError::Io(_))) => Err(ConnStatus::ConnUnknownErr),
            Some(Err(_)) => Err(ConnStatus::ResponseDataErr),
            None => Ok(None),
        }
    }

    fn parse_exec_flag(frame: &[u8]) -> Option<bool> {
        let text = std::str::from_utf8(frame).ok()?;
        match text.split_once(':') {
            Some(("exec_ok", "1")) => Some(true),
            Some(("exec_ok", "0")) => Some(false),
            _ => None,
        }
    }
}
