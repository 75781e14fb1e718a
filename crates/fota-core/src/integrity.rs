//! Image integrity and resume arithmetic.
//!
//! The whole-image digest is computed over the raw unframed bytes and written
//! to the checksum role once streaming finishes. Resume decisions translate
//! the peer's last acknowledged sequence number into either a restart frame
//! or a jump straight to the checksum phase.

use std::fmt;

use sha1::{Digest, Sha1};

use crate::protocol::constants::DIGEST_LEN;

/// SHA-1 digest over the unframed image bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityRecord {
    digest: [u8; DIGEST_LEN],
}

impl IntegrityRecord {
    pub fn compute(image: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(image);
        Self {
            digest: hasher.finalize().into(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.digest
    }
}

impl fmt::Display for IntegrityRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.digest {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Where a transfer should continue after the peer reported its last
/// acknowledged sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeDecision {
    /// Everything already transferred; skip to the checksum phase.
    Complete,
    /// Stream frames starting at this sequence.
    ResumeAt(u16),
}

/// Decide the resume point from the peer-reported sequence number.
///
/// The peer reports a signed 8-bit counter: -1 means no frame received yet,
/// and values below -1 are wrapped negatives normalized by adding 256. The
/// transmitted-byte estimate mirrors the peer's accounting: a short-tail
/// image counts `reported` full frames plus the tail, an aligned image counts
/// `reported + 1` full frames.
pub fn resume_point(
    reported: i32,
    total_len: usize,
    max_payload: usize,
    overhead: usize,
) -> ResumeDecision {
    let sequence = i64::from(if reported < -1 { reported + 256 } else { reported });
    let frame_size = (max_payload + overhead) as i64;
    let tail = (total_len % max_payload) as i64;

    let sent = if tail != 0 {
        sequence * frame_size + tail
    } else {
        (sequence + 1) * frame_size
    };

    if sent >= total_len as i64 {
        ResumeDecision::Complete
    } else {
        ResumeDecision::ResumeAt((sequence + 1) as u16)
    }
}
