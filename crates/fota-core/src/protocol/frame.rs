//! Firmware image framing.
//!
//! Splits an image into link-sized frames, each carrying a 1-byte sequence
//! number and a 2-byte big-endian declared length (header included), and
//! slices an existing frame plan for resumed transfers.

use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;

use super::constants::{FRAME_HEADER_LEN, MAX_FRAME_COUNT};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
    #[error("image needs {count} frames, the 8-bit sequence counter allows 256")]
    TooManyFrames { count: usize },

    #[error("resume sequence {from} is beyond the last produced frame {last}")]
    OutOfRange { from: u16, last: u16 },
}

/// One link write unit: a payload slice of the image prefixed on the wire by
/// its sequence number and declared length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    sequence: u8,
    payload: Vec<u8>,
}

impl Frame {
    /// Sequence number, assigned in strictly increasing transfer order.
    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    /// Declared frame length as it travels on the wire: payload plus the
    /// 3-byte header.
    pub fn declared_len(&self) -> u16 {
        (self.payload.len() + FRAME_HEADER_LEN) as u16
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Wire form: byte 0 sequence, bytes 1-2 big-endian declared length,
    /// bytes 3.. payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; FRAME_HEADER_LEN + self.payload.len()];
        out[0] = self.sequence;
        BigEndian::write_u16(&mut out[1..3], self.declared_len());
        out[FRAME_HEADER_LEN..].copy_from_slice(&self.payload);
        out
    }
}

/// Split an image into frames of at most `max_payload` payload bytes.
///
/// A zero-length image produces an empty plan. An image needing more than 256
/// frames is rejected before any transport activity can start.
pub fn encode(image: &[u8], max_payload: usize) -> Result<Vec<Frame>, FrameError> {
    if image.is_empty() {
        return Ok(Vec::new());
    }

    let count = image.len().div_ceil(max_payload);
    if count > MAX_FRAME_COUNT {
        return Err(FrameError::TooManyFrames { count });
    }

    Ok(image
        .chunks(max_payload)
        .enumerate()
        .map(|(i, chunk)| Frame {
            sequence: i as u8,
            payload: chunk.to_vec(),
        })
        .collect())
}

/// Frames from `from_sequence` on, for a session resuming after reconnection.
pub fn slice_for_resume(frames: &[Frame], from_sequence: u16) -> Result<&[Frame], FrameError> {
    let last = frames.len().saturating_sub(1) as u16;
    if frames.is_empty() || from_sequence as usize >= frames.len() {
        return Err(FrameError::OutOfRange {
            from: from_sequence,
            last,
        });
    }
    Ok(&frames[from_sequence as usize..])
}
