//! Length-prefixed JSON framing for the broker transport.
//!
//! Each frame is a u32 big-endian byte length followed by a JSON envelope
//! `{topic, key, payload}`. The decoder is incremental: feed it whatever the
//! socket produced and drain complete frames.

use crate::core::EngineError;
use serde::{Deserialize, Serialize};

/// Upper bound on one frame; a longer prefix means the stream is corrupt.
pub const MAX_FRAME_LEN: usize = 1 << 20;

/// Wire envelope around one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub topic: String,
    #[serde(default)]
    pub key: Option<String>,
    pub payload: serde_json::Value,
}

impl Envelope {
    /// Record payload re-serialized to bytes.
    pub fn payload_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&self.payload).unwrap_or_default()
    }
}

/// Encode one envelope as a length-prefixed frame.
pub fn encode_frame(envelope: &Envelope) -> Result<Vec<u8>, EngineError> {
    let body = serde_json::to_vec(envelope)
        .map_err(|e| EngineError::Processing(format!("frame encode: {e}")))?;
    if body.len() > MAX_FRAME_LEN {
        return Err(EngineError::Processing(format!(
            "frame of {} bytes exceeds cap",
            body.len()
        )));
    }
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Incremental frame decoder over a growing byte buffer.
#[derive(Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes read off the wire.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Next complete frame body, if one is buffered.
    ///
    /// An over-cap length prefix is unrecoverable for this stream: the caller
    /// should drop the connection.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, EngineError> {
        if self.buf.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
        if len > MAX_FRAME_LEN {
            return Err(EngineError::Parse(format!(
                "frame length {len} exceeds cap, stream corrupt"
            )));
        }
        if self.buf.len() < 4 + len {
            return Ok(None);
        }
        let body = self.buf[4..4 + len].to_vec();
        self.buf.drain(..4 + len);
        Ok(Some(body))
    }

    /// Bytes buffered but not yet consumed.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}
