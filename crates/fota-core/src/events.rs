//! Upgrade event channel.
//!
//! A single tagged event stream replaces per-datum callback interfaces: the
//! caller registers one `UpgradeObserver` and matches on `UpgradeEvent`
//! variants instead of wiring a listener per data item.

use std::fmt;

use crate::integrity::ResumeDecision;
use crate::protocol::codes::{DataCheck, FirmwareStatus};
use crate::state::machine::UpgradeState;
use crate::version::{VersionTriple, VersionVerdict};

/// Log level for forwarded log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Device-information field read for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoField {
    Manufacturer,
    ModelNumber,
    SerialNumber,
}

impl fmt::Display for InfoField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InfoField::Manufacturer => write!(f, "manufacturer"),
            InfoField::ModelNumber => write!(f, "model number"),
            InfoField::SerialNumber => write!(f, "serial number"),
        }
    }
}

/// Events emitted by an upgrade session.
#[derive(Debug, Clone)]
pub enum UpgradeEvent {
    /// The state machine moved.
    StateChanged {
        from: UpgradeState,
        to: UpgradeState,
    },
    /// The device's current version was compared against the image version.
    VersionChecked {
        device: VersionTriple,
        image: VersionTriple,
        verdict: VersionVerdict,
    },
    /// Version already staged on the device before this session.
    StagedVersion { version: String },
    /// A device-information field was read.
    DeviceInfo { field: InfoField, value: String },
    /// Resume negotiation finished.
    ResumePlan {
        decision: ResumeDecision,
        frames_remaining: usize,
    },
    /// Streaming progress, in frames.
    Progress { sent: usize, total: usize },
    /// Peer verdict on the transferred bytes.
    DataCheckResult { check: DataCheck },
    /// Peer-reported apply status.
    StatusReport { status: FirmwareStatus },
    /// The link dropped mid-session; recovery is starting.
    LinkLost,
    /// The recovery cycle re-established the link.
    LinkRecovered,
    /// The session reached its terminal success state.
    Complete,
    /// The session failed.
    Error { message: String },
    /// Free-form log line.
    Log { level: LogLevel, message: String },
}

/// Observer trait for receiving upgrade events.
pub trait UpgradeObserver: Send + Sync {
    fn on_event(&self, event: &UpgradeEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl UpgradeObserver for NullObserver {
    fn on_event(&self, _event: &UpgradeEvent) {
        // Do nothing
    }
}

/// Observer that maps events onto tracing records.
pub struct TracingObserver;

impl UpgradeObserver for TracingObserver {
    fn on_event(&self, event: &UpgradeEvent) {
        match event {
            UpgradeEvent::StateChanged { from, to } => {
                tracing::info!(from = %from, to = %to, "State changed");
            }
            UpgradeEvent::VersionChecked {
                device,
                image,
                verdict,
            } => {
                tracing::info!(device = %device, image = %image, verdict = %verdict, "Version checked");
            }
            UpgradeEvent::StagedVersion { version } => {
                tracing::debug!(version = %version, "Staged version on device");
            }
            UpgradeEvent::DeviceInfo { field, value } => {
                tracing::debug!(field = %field, value = %value, "Device information");
            }
            UpgradeEvent::ResumePlan {
                decision,
                frames_remaining,
            } => {
                tracing::info!(?decision, frames_remaining, "Resume plan");
            }
            UpgradeEvent::Progress { sent, total } => {
                let pct = if *total > 0 { (*sent * 100) / *total } else { 100 };
                tracing::debug!(sent, total, progress = %format!("{}%", pct), "Progress");
            }
            UpgradeEvent::DataCheckResult { check } => {
                tracing::info!(check = %check, "Data check");
            }
            UpgradeEvent::StatusReport { status } => {
                tracing::info!(status = %status, "Firmware status");
            }
            UpgradeEvent::LinkLost => {
                tracing::warn!("Link lost, attempting recovery");
            }
            UpgradeEvent::LinkRecovered => {
                tracing::info!("Link recovered");
            }
            UpgradeEvent::Complete => {
                tracing::info!("Upgrade complete");
            }
            UpgradeEvent::Error { message } => {
                tracing::error!("{}", message);
            }
            UpgradeEvent::Log { level, message } => match level {
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
        }
    }
}
