// src/wire/frame.rs
//! Length-prefixed wire framing
//!
//! Every message on the wire is preceded by an 8-byte, zero-padded,
//! base-10 ASCII length field, followed by exactly that many payload
//! bytes. Payloads longer than eight decimal digits cannot be framed.

use crate::protocol::{FRAME_HEADER_LEN, MAX_FRAME_PAYLOAD};
use crate::utils::errors::NodeError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Codec for the 8-digit length-prefixed frame format
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = NodeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, NodeError> {
        if src.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }

        let header =
            std::str::from_utf8(&src[..FRAME_HEADER_LEN]).map_err(|_| NodeError::BadFrameHeader)?;
        let length: usize = header.parse().map_err(|_| NodeError::BadFrameHeader)?;

        if src.len() < FRAME_HEADER_LEN + length {
            src.reserve(FRAME_HEADER_LEN + length - src.len());
            return Ok(None);
        }

        src.advance(FRAME_HEADER_LEN);
        Ok(Some(src.split_to(length).freeze()))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = NodeError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), NodeError> {
        if item.len() > MAX_FRAME_PAYLOAD {
            return Err(NodeError::FrameTooLarge(item.len()));
        }

        dst.reserve(FRAME_HEADER_LEN + item.len());
        dst.put(format!("{:08}", item.len()).as_bytes());
        dst.put(item);
        Ok(())
    }
}
