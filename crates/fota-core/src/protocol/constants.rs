//! Protocol constants for the firmware upgrade profile.

// ============================================================================
// Frame Geometry
// ============================================================================

/// Maximum firmware payload bytes per link write.
pub const MAX_FRAME_PAYLOAD: usize = 509;

/// Maximum bytes per link write, header included.
pub const MAX_FRAME_SIZE: usize = 512;

/// Frame header: 1-byte sequence number + 2-byte big-endian declared length.
pub const FRAME_HEADER_LEN: usize = 3;

/// The sequence counter is 8 bits wide; a session may carry at most this many
/// frames without wrapping.
pub const MAX_FRAME_COUNT: usize = 256;

/// Largest image that fits in one un-wrapped frame sequence.
pub const MAX_IMAGE_SIZE: usize = MAX_FRAME_COUNT * MAX_FRAME_PAYLOAD;

// ============================================================================
// Version Strings
// ============================================================================

/// Version strings are exactly 8 ASCII characters: `NN-NN-NN`.
pub const VERSION_LEN: usize = 8;

/// Reported by a device with no staged firmware.
pub const EMPTY_VERSION: &str = "00-00-00";

// ============================================================================
// Peer-Reported Code Values
// ============================================================================

/// Data check: peer has not verified the transfer yet.
pub const DATA_CHECK_UNVERIFIED: u8 = 0;
/// Data check: transferred bytes match the checksum.
pub const DATA_CHECK_VALID: u8 = 1;
/// Data check: transferred bytes rejected.
pub const DATA_CHECK_INVALID: u8 = 2;

/// Firmware status: apply not finished yet.
pub const STATUS_NORMAL: u8 = 0;
/// Firmware status: apply finished successfully.
pub const STATUS_SUCCESSFUL: u8 = 1;
/// Firmware status: apply finished abnormally.
pub const STATUS_ABNORMAL_FINISH: u8 = 2;

// ============================================================================
// Host Commands
// ============================================================================

/// Upgrade type: optional upgrade.
pub const UPGRADE_TYPE_NORMAL: u8 = 0;
/// Upgrade type: mandatory upgrade.
pub const UPGRADE_TYPE_FORCED: u8 = 1;

/// Reboot command written to the reset role after a successful apply.
pub const RESET_COMMAND: u8 = 1;

// ============================================================================
// Integrity
// ============================================================================

/// SHA-1 digest width.
pub const DIGEST_LEN: usize = 20;

// ============================================================================
// Link Recovery Timing
// ============================================================================

/// Delay between the adapter power-cycle and the reconnect attempt.
pub const DEFAULT_RECOVERY_DELAY_MS: u64 = 2000;
