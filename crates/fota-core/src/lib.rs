//! fota-core: firmware-over-the-air transfer protocol engine.
//!
//! Drives a firmware upgrade of a constrained peripheral over a
//! packet-oriented, connection-based wireless link: version comparison,
//! framing, resume negotiation, checksum-guarded commit and status polling,
//! all against an abstract read/write/notify transport.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: frame codec, peer-reported code enums, wire constants
//! - **Transport**: the link abstraction the engine drives (trait, mock)
//! - **State**: state machine container and completion-event handlers
//! - **Events**: single tagged event channel for caller decoupling
//! - **Session**: high-level orchestrator with recovery and cancellation
//! - **Version / Integrity / Payload**: pure building blocks
//!
//! # Example
//!
//! ```no_run
//! use fota_core::payload::FirmwareImage;
//! use fota_core::session::{SessionConfig, UpgradeSession};
//! use fota_core::transport::MockTransport;
//!
//! let image = FirmwareImage::from_bytes(vec![0; 1024], "01-02-03").unwrap();
//! let mut session = UpgradeSession::new(SessionConfig::default()).with_image(image);
//!
//! let transport = MockTransport::new(); // any LinkTransport implementation
//! session.run(&transport).expect("upgrade failed");
//! ```

pub mod events;
pub mod integrity;
pub mod payload;
pub mod protocol;
pub mod session;
pub mod state;
pub mod transport;
pub mod version;

// Re-exports for convenience
pub use events::{InfoField, LogLevel, NullObserver, TracingObserver, UpgradeEvent, UpgradeObserver};
pub use integrity::{IntegrityRecord, ResumeDecision, resume_point};
pub use payload::{FirmwareError, FirmwareImage};
pub use protocol::{DataCheck, FirmwareStatus, Frame, FrameError, UpgradeMode};
pub use session::{CancelToken, ConfigError, SessionConfig, UpgradeError, UpgradeSession};
pub use state::{TransferSession, UpgradeState};
pub use transport::{Handle, LinkEvent, LinkTransport, MockTransport, Role, RoleMap, TransportError};
pub use version::{VersionError, VersionTriple, VersionVerdict, compare};
