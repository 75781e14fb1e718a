//! Upgrade session - high-level orchestrator for one firmware transfer.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::events::{TracingObserver, UpgradeEvent, UpgradeObserver};
use crate::integrity::IntegrityRecord;
use crate::payload::{FirmwareError, FirmwareImage};
use crate::protocol::codes::UpgradeMode;
use crate::protocol::constants::{DEFAULT_RECOVERY_DELAY_MS, MAX_FRAME_PAYLOAD};
use crate::protocol::frame::{self, Frame, FrameError};
use crate::state::handlers::{HandleResult, HandlerContext, handle_event};
use crate::state::machine::{TransferSession, UpgradeState};
use crate::transport::{LinkTransport, Role, RoleMap, TransportError};

/// Session error taxonomy.
///
/// `TransportUnavailable` and `LinkRecoveryFailed` are fatal to the session
/// but not to the engine; a new session may be started. Input-borne protocol
/// violations are rejected before any transport operation is issued.
#[derive(Error, Debug)]
pub enum UpgradeError {
    #[error("transport unavailable: {0}")]
    TransportUnavailable(#[from] TransportError),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("peer rejected the transferred data (last acknowledged sequence {last_sequence})")]
    IntegrityFailure { last_sequence: i32 },

    #[error("device reported an abnormal finish (last acknowledged sequence {last_sequence})")]
    DeviceAbnormalFinish { last_sequence: i32 },

    #[error("session cancelled by the caller")]
    Cancelled,

    #[error("link recovery failed after one reconnect attempt")]
    LinkRecoveryFailed,
}

impl From<FrameError> for UpgradeError {
    fn from(error: FrameError) -> Self {
        UpgradeError::ProtocolViolation(error.to_string())
    }
}

impl From<FirmwareError> for UpgradeError {
    fn from(error: FirmwareError) -> Self {
        UpgradeError::ProtocolViolation(error.to_string())
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Configuration for an upgrade session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Path to the firmware image; the file stem names its version.
    pub firmware_path: Option<String>,
    /// Overrides the version derived from the file name.
    pub target_version: Option<String>,
    /// Commit the upgrade as mandatory instead of normal.
    #[serde(default)]
    pub forced: bool,
    /// Write the reboot command after a successful apply.
    #[serde(default)]
    pub auto_reset: bool,
    /// Read the staged version and device-information roles for diagnostics.
    #[serde(default)]
    pub probe_info: bool,
    /// Delay between the adapter power-cycle and the reconnect attempt.
    #[serde(default = "default_recovery_delay_ms")]
    pub recovery_delay_ms: u64,
}

fn default_recovery_delay_ms() -> u64 {
    DEFAULT_RECOVERY_DELAY_MS
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            firmware_path: None,
            target_version: None,
            forced: false,
            auto_reset: false,
            probe_info: false,
            recovery_delay_ms: DEFAULT_RECOVERY_DELAY_MS,
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}

/// Cancellation hook handed to the caller; the engine defines no timeout
/// policy, so callers pair this with an external timer.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Frame plan and digest, computed once per session off the event loop.
struct Prepared {
    frames: Vec<Frame>,
    digest: IntegrityRecord,
}

/// Pre-segment the image and compute its digest on a background worker so the
/// event-processing thread is never blocked on long-running work.
fn spawn_preparation(image: Vec<u8>) -> thread::JoinHandle<Result<Prepared, FrameError>> {
    thread::spawn(move || {
        let frames = frame::encode(&image, MAX_FRAME_PAYLOAD)?;
        let digest = IntegrityRecord::compute(&image);
        Ok(Prepared { frames, digest })
    })
}

/// One end-to-end attempt to transfer and apply a firmware image.
///
/// Owns the mutable session state for its lifetime; no two sessions may run
/// against the same physical connection.
pub struct UpgradeSession<O: UpgradeObserver> {
    config: SessionConfig,
    observer: Arc<O>,
    image: Option<FirmwareImage>,
    cancel: CancelToken,
}

impl UpgradeSession<TracingObserver> {
    /// Create a new session with the default tracing observer.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_observer(config, Arc::new(TracingObserver))
    }
}

impl<O: UpgradeObserver> UpgradeSession<O> {
    /// Create a new session with a custom observer.
    pub fn with_observer(config: SessionConfig, observer: Arc<O>) -> Self {
        Self {
            config,
            observer,
            image: None,
            cancel: CancelToken::new(),
        }
    }

    /// Supply the image directly instead of loading it from the configured
    /// path.
    pub fn with_image(mut self, image: FirmwareImage) -> Self {
        self.image = Some(image);
        self
    }

    /// Hook for aborting the session from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn ensure_image(&mut self) -> Result<(), UpgradeError> {
        if self.image.is_some() {
            return Ok(());
        }
        let Some(path) = self.config.firmware_path.clone() else {
            return Err(UpgradeError::ProtocolViolation(
                "no firmware image supplied".into(),
            ));
        };
        let image = match &self.config.target_version {
            Some(version) => {
                let data = fs::read(&path).map_err(|error| {
                    UpgradeError::ProtocolViolation(format!(
                        "failed to read firmware file: {error}"
                    ))
                })?;
                FirmwareImage::from_bytes(data, version)?
            }
            None => FirmwareImage::from_file(Path::new(&path))?,
        };
        info!(path = %path, version = %image.version_str(), size = image.len(), "Loaded firmware image");
        self.image = Some(image);
        Ok(())
    }

    /// Run the complete upgrade session against the given transport.
    pub fn run<T: LinkTransport>(&mut self, transport: &T) -> Result<(), UpgradeError> {
        // Input validation happens before any transport activity.
        self.ensure_image()?;
        let Some(image) = self.image.as_ref() else {
            return Err(UpgradeError::ProtocolViolation(
                "no firmware image supplied".into(),
            ));
        };

        let mut session = TransferSession::new(
            image.len(),
            if self.config.forced {
                UpgradeMode::Forced
            } else {
                UpgradeMode::Normal
            },
        );

        if self.cancel.is_cancelled() {
            return self.abort(&mut session);
        }

        let worker = spawn_preparation(image.bytes().to_vec());

        let mut roles = match self.establish(transport, &mut session) {
            Ok(roles) => roles,
            Err(error) => {
                if !session.is_terminal() {
                    session.goto_state(UpgradeState::Failed);
                }
                return Err(error);
            }
        };
        self.enter_connected(&mut session);

        let prepared = worker
            .join()
            .map_err(|_| UpgradeError::ProtocolViolation("image preparation worker panicked".into()))??;

        if self.cancel.is_cancelled() {
            return self.abort(&mut session);
        }
        self.dispatch_initial(transport, &roles, &mut session)?;

        loop {
            if self.cancel.is_cancelled() {
                return self.abort(&mut session);
            }

            let event = match transport.next_event() {
                Ok(event) => event,
                // The engine defines no timeout policy; keep waiting.
                Err(TransportError::Timeout { .. }) => continue,
                Err(TransportError::Disconnected) | Err(TransportError::DiscoveryFailed(_)) => {
                    roles = self.recover_mid_session(transport, &mut session)?;
                    self.dispatch_initial(transport, &roles, &mut session)?;
                    continue;
                }
                Err(error) => {
                    session.goto_state(UpgradeState::Failed);
                    return Err(error.into());
                }
            };

            if self.cancel.is_cancelled() {
                // The completed operation's result is discarded.
                return self.abort(&mut session);
            }

            let mut ctx = HandlerContext {
                transport,
                observer: self.observer.as_ref(),
                session: &mut session,
                roles: &roles,
                frames: &prepared.frames,
                digest: &prepared.digest,
                image,
                config: &self.config,
            };

            match handle_event(&event, &mut ctx) {
                Ok(HandleResult::Continue) => {}
                Ok(HandleResult::Complete) => return Ok(()),
                Ok(HandleResult::Failed(error)) => return Err(error),
                Err(UpgradeError::TransportUnavailable(
                    TransportError::Disconnected | TransportError::DiscoveryFailed(_),
                )) => {
                    roles = self.recover_mid_session(transport, &mut session)?;
                    self.dispatch_initial(transport, &roles, &mut session)?;
                }
                Err(error) => {
                    session.goto_state(UpgradeState::Failed);
                    self.observer.on_event(&UpgradeEvent::Error {
                        message: error.to_string(),
                    });
                    return Err(error);
                }
            }
        }
    }

    /// Connect and bind the protocol roles; a discovery failure spends the
    /// single recovery cycle.
    fn establish<T: LinkTransport>(
        &self,
        transport: &T,
        session: &mut TransferSession,
    ) -> Result<RoleMap, UpgradeError> {
        transport.connect()?;
        match self.discover_and_subscribe(transport) {
            Ok(roles) => Ok(roles),
            Err(TransportError::DiscoveryFailed(_) | TransportError::Disconnected) => {
                self.recovery_cycle(transport, session)
            }
            Err(error) => Err(error.into()),
        }
    }

    fn discover_and_subscribe<T: LinkTransport>(
        &self,
        transport: &T,
    ) -> Result<RoleMap, TransportError> {
        let roles = transport.discover_roles()?;
        transport.subscribe(roles.require(Role::DataCheck)?)?;
        transport.subscribe(roles.require(Role::Status)?)?;
        Ok(roles)
    }

    /// One bounded recovery attempt: power-cycle the adapter, wait out the
    /// fixed delay window, reconnect, rediscover.
    fn recovery_cycle<T: LinkTransport>(
        &self,
        transport: &T,
        session: &mut TransferSession,
    ) -> Result<RoleMap, UpgradeError> {
        if session.recovery_used {
            session.goto_state(UpgradeState::Failed);
            return Err(UpgradeError::LinkRecoveryFailed);
        }
        session.recovery_used = true;
        self.observer.on_event(&UpgradeEvent::LinkLost);
        warn!("Link lost, power-cycling the adapter");

        let attempt: Result<RoleMap, TransportError> = (|| {
            transport.reset_adapter()?;
            thread::sleep(Duration::from_millis(self.config.recovery_delay_ms));
            transport.connect()?;
            self.discover_and_subscribe(transport)
        })();

        match attempt {
            Ok(roles) => {
                self.observer.on_event(&UpgradeEvent::LinkRecovered);
                Ok(roles)
            }
            Err(error) => {
                warn!(error = %error, "Recovery attempt failed");
                session.goto_state(UpgradeState::Failed);
                Err(UpgradeError::LinkRecoveryFailed)
            }
        }
    }

    fn recover_mid_session<T: LinkTransport>(
        &self,
        transport: &T,
        session: &mut TransferSession,
    ) -> Result<RoleMap, UpgradeError> {
        let roles = self.recovery_cycle(transport, session)?;
        session.reset();
        self.enter_connected(session);
        Ok(roles)
    }

    fn enter_connected(&self, session: &mut TransferSession) {
        let from = session.state;
        session.goto_state(UpgradeState::Connected);
        self.observer.on_event(&UpgradeEvent::StateChanged {
            from,
            to: UpgradeState::Connected,
        });
    }

    /// Kick off the chain: a fresh session starts with the version check, a
    /// reconnected one renegotiates the resume point without repeating it.
    fn dispatch_initial<T: LinkTransport>(
        &self,
        transport: &T,
        roles: &RoleMap,
        session: &mut TransferSession,
    ) -> Result<(), UpgradeError> {
        session.link_ready = false;
        if session.verdict.is_some() {
            transport.read(roles.require(Role::SequenceNumber)?)?;
        } else {
            transport.read(roles.require(Role::CurrentVersion)?)?;
        }
        Ok(())
    }

    fn abort(&self, session: &mut TransferSession) -> Result<(), UpgradeError> {
        let from = session.state;
        session.goto_state(UpgradeState::Aborted);
        self.observer.on_event(&UpgradeEvent::StateChanged {
            from,
            to: UpgradeState::Aborted,
        });
        Err(UpgradeError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::protocol::constants::MAX_FRAME_SIZE;
    use crate::transport::MockTransport;
    use crate::version::VersionVerdict;

    /// Observer that records every event and optionally cancels the session
    /// the moment streaming starts.
    #[derive(Default)]
    struct Recording {
        events: Mutex<Vec<UpgradeEvent>>,
        cancel_on_streaming: Mutex<Option<CancelToken>>,
    }

    impl Recording {
        fn states(&self) -> Vec<UpgradeState> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter_map(|event| match event {
                    UpgradeEvent::StateChanged { to, .. } => Some(*to),
                    _ => None,
                })
                .collect()
        }

        fn saw_complete(&self) -> bool {
            self.events
                .lock()
                .unwrap()
                .iter()
                .any(|event| matches!(event, UpgradeEvent::Complete))
        }

        fn verdict(&self) -> Option<VersionVerdict> {
            self.events.lock().unwrap().iter().find_map(|event| match event {
                UpgradeEvent::VersionChecked { verdict, .. } => Some(*verdict),
                _ => None,
            })
        }
    }

    impl UpgradeObserver for Recording {
        fn on_event(&self, event: &UpgradeEvent) {
            if let UpgradeEvent::StateChanged {
                to: UpgradeState::Streaming,
                ..
            } = event
            {
                if let Some(token) = self.cancel_on_streaming.lock().unwrap().as_ref() {
                    token.cancel();
                }
            }
            self.events.lock().unwrap().push(event.clone());
        }
    }

    fn image(len: usize) -> FirmwareImage {
        let data = (0..len).map(|i| (i % 251) as u8).collect();
        FirmwareImage::from_bytes(data, "02-00-00").unwrap()
    }

    fn config() -> SessionConfig {
        SessionConfig {
            recovery_delay_ms: 0,
            ..SessionConfig::default()
        }
    }

    fn session(
        config: SessionConfig,
        image: FirmwareImage,
    ) -> (UpgradeSession<Recording>, Arc<Recording>) {
        let observer = Arc::new(Recording::default());
        let session = UpgradeSession::with_observer(config, observer.clone()).with_image(image);
        (session, observer)
    }

    /// Queue the tail of a fresh-device happy path: sequence report, data
    /// acks, checksum ack, valid data check, type ack, successful status.
    fn script_transfer(mock: &MockTransport, frames: usize) {
        mock.queue_read(Role::SequenceNumber, &[0xFF]);
        for _ in 0..frames {
            mock.queue_write_ack(Role::Data);
        }
        mock.queue_write_ack(Role::Checksum);
        mock.queue_read(Role::DataCheck, &[1]);
        mock.queue_write_ack(Role::UpgradeType);
        mock.queue_read(Role::Status, &[1]);
    }

    fn script_handshake(mock: &MockTransport) {
        mock.queue_read(Role::CurrentVersion, b"01-00-00");
        mock.queue_write_ack(Role::NewVersion);
    }

    #[test]
    fn happy_path_streams_all_frames_and_completes() {
        let firmware = image(MAX_FRAME_PAYLOAD * 2 + 100);
        let mock = MockTransport::new();
        script_handshake(&mock);
        script_transfer(&mock, 3);

        let (mut upgrade, observer) = session(config(), firmware.clone());
        upgrade.run(&mock).unwrap();

        let data_writes = mock.writes_to(Role::Data);
        assert_eq!(data_writes.len(), 3);
        assert_eq!(data_writes[0][0], 0);
        assert_eq!(data_writes[0].len(), MAX_FRAME_SIZE);
        assert_eq!(data_writes[2][0], 2);
        assert_eq!(data_writes[2].len(), 100 + 3);

        let checksum = IntegrityRecord::compute(firmware.bytes());
        assert_eq!(mock.writes_to(Role::Checksum), vec![checksum.as_bytes().to_vec()]);
        assert_eq!(mock.writes_to(Role::NewVersion), vec![b"02-00-00".to_vec()]);
        assert_eq!(mock.writes_to(Role::UpgradeType), vec![vec![0]]);
        assert!(mock.subscribed(Role::DataCheck));
        assert!(mock.subscribed(Role::Status));
        assert!(observer.saw_complete());
        assert_eq!(observer.states().last(), Some(&UpgradeState::Complete));
    }

    #[test]
    fn up_to_date_device_completes_without_transfer() {
        let mock = MockTransport::new();
        mock.queue_read(Role::CurrentVersion, b"02-00-00");

        let (mut upgrade, observer) = session(config(), image(1000));
        upgrade.run(&mock).unwrap();

        assert_eq!(observer.verdict(), Some(VersionVerdict::UpToDate));
        assert!(mock.writes_to(Role::Data).is_empty());
        assert!(mock.writes_to(Role::NewVersion).is_empty());
        assert!(observer.saw_complete());
    }

    #[test]
    fn forced_mode_commits_upgrade_type_one() {
        let mock = MockTransport::new();
        script_handshake(&mock);
        script_transfer(&mock, 1);

        let mut cfg = config();
        cfg.forced = true;
        let (mut upgrade, _) = session(cfg, image(100));
        upgrade.run(&mock).unwrap();

        assert_eq!(mock.writes_to(Role::UpgradeType), vec![vec![1]]);
    }

    #[test]
    fn device_reported_sequence_resumes_mid_image() {
        let firmware = image(MAX_FRAME_PAYLOAD * 2 + 100);
        let mock = MockTransport::new();
        script_handshake(&mock);
        // Frame 0 already acknowledged by the peer.
        mock.queue_read(Role::SequenceNumber, &[0]);
        mock.queue_write_ack(Role::Data);
        mock.queue_write_ack(Role::Data);
        mock.queue_write_ack(Role::Checksum);
        mock.queue_read(Role::DataCheck, &[1]);
        mock.queue_write_ack(Role::UpgradeType);
        mock.queue_read(Role::Status, &[1]);

        let (mut upgrade, _) = session(config(), firmware);
        upgrade.run(&mock).unwrap();

        let data_writes = mock.writes_to(Role::Data);
        assert_eq!(data_writes.len(), 2);
        assert_eq!(data_writes[0][0], 1);
    }

    #[test]
    fn fully_transferred_image_skips_straight_to_checksum() {
        let mock = MockTransport::new();
        script_handshake(&mock);
        // One aligned frame, sequence 0 acknowledged: nothing left to stream.
        mock.queue_read(Role::SequenceNumber, &[0]);
        mock.queue_write_ack(Role::Checksum);
        mock.queue_read(Role::DataCheck, &[1]);
        mock.queue_write_ack(Role::UpgradeType);
        mock.queue_read(Role::Status, &[1]);

        let (mut upgrade, observer) = session(config(), image(MAX_FRAME_PAYLOAD));
        upgrade.run(&mock).unwrap();

        assert!(mock.writes_to(Role::Data).is_empty());
        assert_eq!(mock.writes_to(Role::Checksum).len(), 1);
        assert!(observer.states().contains(&UpgradeState::ChecksumPending));
    }

    #[test]
    fn unexpected_completion_never_skips_checksum_phase() {
        let mock = MockTransport::new();
        script_handshake(&mock);
        mock.queue_read(Role::SequenceNumber, &[0xFF]);
        // A stray completion on an unrelated handle arrives mid-stream.
        mock.queue_write_ack(Role::Reset);
        mock.queue_write_ack(Role::Data);
        mock.queue_write_ack(Role::Checksum);
        mock.queue_read(Role::DataCheck, &[1]);
        mock.queue_write_ack(Role::UpgradeType);
        mock.queue_read(Role::Status, &[1]);

        let (mut upgrade, observer) = session(config(), image(100));
        upgrade.run(&mock).unwrap();

        let states = observer.states();
        let checksum = states
            .iter()
            .position(|state| *state == UpgradeState::ChecksumPending);
        let validating = states
            .iter()
            .position(|state| *state == UpgradeState::Validating);
        assert!(checksum.is_some());
        assert!(checksum < validating);
    }

    #[test]
    fn invalid_data_check_fails_without_commit() {
        let mock = MockTransport::new();
        script_handshake(&mock);
        mock.queue_read(Role::SequenceNumber, &[0xFF]);
        mock.queue_write_ack(Role::Data);
        mock.queue_write_ack(Role::Checksum);
        mock.queue_read(Role::DataCheck, &[2]);

        let (mut upgrade, observer) = session(config(), image(100));
        let result = upgrade.run(&mock);

        assert!(matches!(
            result,
            Err(UpgradeError::IntegrityFailure { last_sequence: 0 })
        ));
        assert!(mock.writes_to(Role::UpgradeType).is_empty());
        assert_eq!(observer.states().last(), Some(&UpgradeState::Failed));
    }

    #[test]
    fn unverified_data_check_waits_for_the_notification() {
        let mock = MockTransport::new();
        script_handshake(&mock);
        mock.queue_read(Role::SequenceNumber, &[0xFF]);
        mock.queue_write_ack(Role::Data);
        mock.queue_write_ack(Role::Checksum);
        mock.queue_read(Role::DataCheck, &[0]);
        mock.queue_notify(Role::DataCheck, &[1]);
        mock.queue_write_ack(Role::UpgradeType);
        mock.queue_read(Role::Status, &[1]);

        let (mut upgrade, _) = session(config(), image(100));
        upgrade.run(&mock).unwrap();

        assert_eq!(mock.writes_to(Role::UpgradeType).len(), 1);
    }

    #[test]
    fn not_finished_status_polls_again() {
        let mock = MockTransport::new();
        script_handshake(&mock);
        mock.queue_read(Role::SequenceNumber, &[0xFF]);
        mock.queue_write_ack(Role::Data);
        mock.queue_write_ack(Role::Checksum);
        mock.queue_read(Role::DataCheck, &[1]);
        mock.queue_write_ack(Role::UpgradeType);
        mock.queue_read(Role::Status, &[0]);
        mock.queue_read(Role::Status, &[1]);

        let (mut upgrade, _) = session(config(), image(100));
        upgrade.run(&mock).unwrap();

        assert_eq!(mock.reads_of(Role::Status), 2);
    }

    #[test]
    fn abnormal_finish_is_reported_with_last_sequence() {
        let mock = MockTransport::new();
        script_handshake(&mock);
        mock.queue_read(Role::SequenceNumber, &[0xFF]);
        mock.queue_write_ack(Role::Data);
        mock.queue_write_ack(Role::Checksum);
        mock.queue_read(Role::DataCheck, &[1]);
        mock.queue_write_ack(Role::UpgradeType);
        mock.queue_read(Role::Status, &[2]);

        let (mut upgrade, _) = session(config(), image(100));
        let result = upgrade.run(&mock);

        assert!(matches!(
            result,
            Err(UpgradeError::DeviceAbnormalFinish { last_sequence: 0 })
        ));
    }

    #[test]
    fn auto_reset_reboots_the_device_before_completing() {
        let mock = MockTransport::new();
        script_handshake(&mock);
        script_transfer(&mock, 1);
        mock.queue_write_ack(Role::Reset);

        let mut cfg = config();
        cfg.auto_reset = true;
        let (mut upgrade, observer) = session(cfg, image(100));
        upgrade.run(&mock).unwrap();

        assert_eq!(mock.writes_to(Role::Reset), vec![vec![1]]);
        assert!(observer.saw_complete());
    }

    #[test]
    fn probe_info_walks_the_device_information_roles() {
        let mock = MockTransport::new();
        mock.queue_read(Role::CurrentVersion, b"01-00-00");
        mock.queue_read(Role::NewVersion, b"00-00-00");
        mock.queue_read(Role::ManufacturerName, b"ACME");
        mock.queue_read(Role::ModelNumber, b"MK-7");
        mock.queue_read(Role::SerialNumber, b"0042");
        mock.queue_write_ack(Role::NewVersion);
        script_transfer(&mock, 1);

        let mut cfg = config();
        cfg.probe_info = true;
        let (mut upgrade, observer) = session(cfg, image(100));
        upgrade.run(&mock).unwrap();

        let events = observer.events.lock().unwrap();
        let info: Vec<String> = events
            .iter()
            .filter_map(|event| match event {
                UpgradeEvent::DeviceInfo { value, .. } => Some(value.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(info, vec!["ACME", "MK-7", "0042"]);
    }

    #[test]
    fn cancelled_before_start_issues_no_operations() {
        let mock = MockTransport::new();
        let (mut upgrade, observer) = session(config(), image(100));
        upgrade.cancel_token().cancel();

        let result = upgrade.run(&mock);

        assert!(matches!(result, Err(UpgradeError::Cancelled)));
        assert_eq!(mock.op_count(), 0);
        assert_eq!(mock.connect_count(), 0);
        assert_eq!(observer.states().last(), Some(&UpgradeState::Aborted));
    }

    #[test]
    fn cancel_during_streaming_aborts_and_stops_issuing_operations() {
        let firmware = image(MAX_FRAME_PAYLOAD * 2 + 100);
        let mock = MockTransport::new();
        script_handshake(&mock);
        script_transfer(&mock, 3);

        let (mut upgrade, observer) = session(config(), firmware);
        *observer.cancel_on_streaming.lock().unwrap() = Some(upgrade.cancel_token());

        let result = upgrade.run(&mock);

        assert!(matches!(result, Err(UpgradeError::Cancelled)));
        // Only the frame dispatched before the cancellation went out.
        assert_eq!(mock.writes_to(Role::Data).len(), 1);
        assert_eq!(observer.states().last(), Some(&UpgradeState::Aborted));
    }

    #[test]
    fn discovery_failure_recovers_once_without_repeating_version_check() {
        let mock = MockTransport::new();
        mock.fail_next_discovery();
        script_handshake(&mock);
        script_transfer(&mock, 1);

        let (mut upgrade, observer) = session(config(), image(100));
        upgrade.run(&mock).unwrap();

        assert_eq!(mock.connect_count(), 2);
        assert_eq!(mock.reset_count(), 1);
        assert_eq!(mock.reads_of(Role::CurrentVersion), 1);
        assert!(observer.saw_complete());
    }

    #[test]
    fn mid_session_disconnect_renegotiates_the_resume_point() {
        let mock = MockTransport::new();
        script_handshake(&mock);
        mock.queue_error(TransportError::Disconnected);
        script_transfer(&mock, 3);

        let (mut upgrade, observer) = session(config(), image(MAX_FRAME_PAYLOAD * 2 + 100));
        upgrade.run(&mock).unwrap();

        assert_eq!(mock.connect_count(), 2);
        assert_eq!(mock.reset_count(), 1);
        // The version check ran exactly once; the sequence was re-read.
        assert_eq!(mock.reads_of(Role::CurrentVersion), 1);
        assert_eq!(mock.reads_of(Role::SequenceNumber), 2);
        let events = observer.events.lock().unwrap();
        assert!(events.iter().any(|e| matches!(e, UpgradeEvent::LinkLost)));
        assert!(events.iter().any(|e| matches!(e, UpgradeEvent::LinkRecovered)));
    }

    #[test]
    fn second_link_loss_exhausts_recovery() {
        let mock = MockTransport::new();
        script_handshake(&mock);
        mock.queue_error(TransportError::Disconnected);
        mock.queue_error(TransportError::Disconnected);

        let (mut upgrade, _) = session(config(), image(100));
        let result = upgrade.run(&mock);

        assert!(matches!(result, Err(UpgradeError::LinkRecoveryFailed)));
        assert_eq!(mock.reset_count(), 1);
    }

    #[test]
    fn missing_image_is_rejected_before_any_transport_activity() {
        let mock = MockTransport::new();
        let mut upgrade = UpgradeSession::new(config());

        let result = upgrade.run(&mock);

        assert!(matches!(result, Err(UpgradeError::ProtocolViolation(_))));
        assert_eq!(mock.connect_count(), 0);
        assert_eq!(mock.op_count(), 0);
    }

    #[test]
    fn config_round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fota.toml");

        let mut cfg = SessionConfig::default();
        cfg.firmware_path = Some("02-01-00.bin".into());
        cfg.forced = true;
        cfg.save_to_file(&path).unwrap();

        let loaded = SessionConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.firmware_path.as_deref(), Some("02-01-00.bin"));
        assert!(loaded.forced);
        assert!(!loaded.auto_reset);
        assert_eq!(loaded.recovery_delay_ms, cfg.recovery_delay_ms);
    }
}
