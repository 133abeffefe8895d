// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire frames for the broker link.
//!
//! Frame format: 4-byte big-endian length prefix, then a bincode-encoded
//! [`Frame`]. The length covers only the body.

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder};

/// Frames larger than this are refused outright.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

const LEN_PREFIX: usize = 4;

/// Messages exchanged with a broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    /// Client → broker: the queues this session handles jobs for.
    Subscribe { queues: Vec<String> },
    /// Client → broker: ready for one job.
    Grab,
    /// Broker → client: one job assignment.
    Assign {
        handle: String,
        queue: String,
        payload: Vec<u8>,
    },
    /// Broker → client: nothing queued, sleep until woken.
    NoJob,
    /// Broker → client: work arrived, grab again.
    Wake,
    /// Client → broker: answer for a handled job.
    Respond { handle: String, payload: Vec<u8> },
    /// Client → broker: enqueue a payload onto a queue.
    Submit { queue: String, payload: Vec<u8> },
    /// Client → broker: graceful deregistration.
    Shutdown,
}

/// Errors from the frame codec.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame of {0} bytes exceeds the maximum")]
    TooLarge(usize),
    #[error("malformed frame: {0}")]
    Malformed(String),
}

/// Length-prefixed bincode codec for [`Frame`].
#[derive(Debug)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        if src.len() < LEN_PREFIX {
            return Ok(None);
        }

        let mut length_bytes = [0u8; LEN_PREFIX];
        length_bytes.copy_from_slice(&src[..LEN_PREFIX]);
        let length = u32::from_be_bytes(length_bytes) as usize;

        if length > MAX_FRAME_SIZE {
            return Err(FrameError::TooLarge(length));
        }

        if src.len() < LEN_PREFIX + length {
            // Wait for the rest of the frame.
            src.reserve(LEN_PREFIX + length - src.len());
            return Ok(None);
        }

        src.advance(LEN_PREFIX);
        let body = src.split_to(length);
        let frame =
            bincode::deserialize(&body).map_err(|e| FrameError::Malformed(e.to_string()))?;
        Ok(Some(frame))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        let body = bincode::serialize(&item).map_err(|e| FrameError::Malformed(e.to_string()))?;
        if body.len() > MAX_FRAME_SIZE {
            return Err(FrameError::TooLarge(body.len()));
        }
        dst.reserve(LEN_PREFIX + body.len());
        dst.put_u32(body.len() as u32);
        dst.put_slice(&body);
        Ok(())
    }
}

#[cfg(test)]
#[path = "frame_tests.rs"]
mod tests;
