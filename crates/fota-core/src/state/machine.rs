//! Transfer state machine state.

use std::fmt;

use crate::protocol::codes::UpgradeMode;
use crate::version::VersionVerdict;

/// States of one upgrade session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpgradeState {
    /// No connection yet.
    #[default]
    Idle,
    /// Link up, roles discovered.
    Connected,
    /// Comparing versions and announcing the incoming one.
    VersionCheck,
    /// Resume point being computed from the peer-reported sequence.
    AwaitingResumePoint,
    /// Frames in flight, one write outstanding at a time.
    Streaming,
    /// Checksum write dispatched.
    ChecksumPending,
    /// Waiting for the peer's data-check verdict.
    Validating,
    /// Upgrade-type write dispatched.
    UpgradeTypeCommit,
    /// Polling the apply status.
    StatusPolling,
    /// Terminal: upgrade applied.
    Complete,
    /// Terminal: session failed.
    Failed,
    /// Terminal: cancelled by the caller.
    Aborted,
}

impl UpgradeState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UpgradeState::Complete | UpgradeState::Failed | UpgradeState::Aborted
        )
    }
}

impl fmt::Display for UpgradeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpgradeState::Idle => write!(f, "IDLE"),
            UpgradeState::Connected => write!(f, "CONNECTED"),
            UpgradeState::VersionCheck => write!(f, "VERSION_CHECK"),
            UpgradeState::AwaitingResumePoint => write!(f, "AWAITING_RESUME_POINT"),
            UpgradeState::Streaming => write!(f, "STREAMING"),
            UpgradeState::ChecksumPending => write!(f, "CHECKSUM_PENDING"),
            UpgradeState::Validating => write!(f, "VALIDATING"),
            UpgradeState::UpgradeTypeCommit => write!(f, "UPGRADE_TYPE_COMMIT"),
            UpgradeState::StatusPolling => write!(f, "STATUS_POLLING"),
            UpgradeState::Complete => write!(f, "COMPLETE"),
            UpgradeState::Failed => write!(f, "FAILED"),
            UpgradeState::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// Per-upgrade mutable state, owned by the session's event loop.
///
/// Mutated only from the single event-processing thread; the gating flag
/// `link_ready` enforces the one-outstanding-operation discipline.
#[derive(Debug)]
pub struct TransferSession {
    /// Current machine state.
    pub state: UpgradeState,
    /// Last transmitted sequence number, -1 before the first frame.
    pub current_sequence: i32,
    /// Frames still to write in this session.
    pub frames_remaining: usize,
    /// Index of the next frame in the session's frame plan.
    pub next_frame: usize,
    /// Unframed image length in bytes.
    pub total_len: usize,
    /// Upgrade type committed after a valid data check.
    pub mode: UpgradeMode,
    /// Whether the engine keeps driving the chain on its own.
    pub auto_progress: bool,
    /// Version verdict, cached so a reconnect does not repeat the check.
    pub verdict: Option<VersionVerdict>,
    /// The single bounded recovery cycle has been spent.
    pub recovery_used: bool,
    /// True when no operation is outstanding on the link.
    pub link_ready: bool,
}

impl TransferSession {
    pub fn new(total_len: usize, mode: UpgradeMode) -> Self {
        Self {
            state: UpgradeState::Idle,
            current_sequence: -1,
            frames_remaining: 0,
            next_frame: 0,
            total_len,
            mode,
            auto_progress: true,
            verdict: None,
            recovery_used: false,
            link_ready: true,
        }
    }

    /// Transition to a new state.
    pub fn goto_state(&mut self, new_state: UpgradeState) {
        tracing::info!(from = %self.state, to = %new_state, "State transition");
        self.state = new_state;
    }

    /// Record one acknowledged frame.
    pub fn advance_sequence(&mut self) {
        self.current_sequence += 1;
        self.frames_remaining = self.frames_remaining.saturating_sub(1);
        self.next_frame += 1;
    }

    pub fn mark_complete(&mut self) {
        self.frames_remaining = 0;
        self.goto_state(UpgradeState::Complete);
    }

    /// Re-arm the per-link counters for a fresh resume negotiation after a
    /// reconnect. The version verdict and the spent recovery budget survive.
    pub fn reset(&mut self) {
        self.current_sequence = -1;
        self.frames_remaining = 0;
        self.next_frame = 0;
        self.link_ready = true;
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}
