//! Completion-event handlers.
//!
//! Each transport completion is dispatched against the current session state
//! and drives at most one new operation, directly from the completion instead
//! of polling a readiness flag. Completions that do not match the expected
//! role for the current state are discarded with a warning so an out-of-order
//! event can never skip a state.

use tracing::warn;

use crate::events::{InfoField, LogLevel, UpgradeEvent, UpgradeObserver};
use crate::integrity::{IntegrityRecord, ResumeDecision, resume_point};
use crate::payload::FirmwareImage;
use crate::protocol::codes::{DataCheck, FirmwareStatus};
use crate::protocol::constants::{
    EMPTY_VERSION, FRAME_HEADER_LEN, MAX_FRAME_PAYLOAD, RESET_COMMAND, VERSION_LEN,
};
use crate::protocol::frame::{Frame, slice_for_resume};
use crate::session::{SessionConfig, UpgradeError};
use crate::state::machine::{TransferSession, UpgradeState};
use crate::transport::{LinkEvent, LinkTransport, Role, RoleMap, TransportError};
use crate::version::compare;

/// Result of handling one completion event.
#[derive(Debug)]
pub enum HandleResult {
    /// Keep processing events.
    Continue,
    /// The session reached its terminal success state.
    Complete,
    /// The session failed; the error carries the last known state.
    Failed(UpgradeError),
}

/// Resources the handlers operate on.
pub struct HandlerContext<'a, T: LinkTransport, O: UpgradeObserver> {
    pub transport: &'a T,
    pub observer: &'a O,
    pub session: &'a mut TransferSession,
    pub roles: &'a RoleMap,
    /// Full frame plan for the image, produced once per session.
    pub frames: &'a [Frame],
    pub digest: &'a IntegrityRecord,
    pub image: &'a FirmwareImage,
    pub config: &'a SessionConfig,
}

impl<'a, T: LinkTransport, O: UpgradeObserver> HandlerContext<'a, T, O> {
    pub(crate) fn emit(&self, event: UpgradeEvent) {
        self.observer.on_event(&event);
    }

    pub(crate) fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.emit(UpgradeEvent::Log {
            level,
            message: message.into(),
        });
    }

    fn goto(&mut self, to: UpgradeState) {
        let from = self.session.state;
        self.session.goto_state(to);
        self.emit(UpgradeEvent::StateChanged { from, to });
    }

    fn issue_read(&mut self, role: Role) -> Result<(), TransportError> {
        debug_assert!(self.session.link_ready, "read issued while an operation is outstanding");
        self.session.link_ready = false;
        self.transport.read(self.roles.require(role)?)
    }

    fn issue_write(&mut self, role: Role, data: &[u8]) -> Result<(), TransportError> {
        debug_assert!(self.session.link_ready, "write issued while an operation is outstanding");
        self.session.link_ready = false;
        self.transport.write(self.roles.require(role)?, data)
    }
}

/// Handle one completion event and perform the appropriate action.
pub fn handle_event<T: LinkTransport, O: UpgradeObserver>(
    event: &LinkEvent,
    ctx: &mut HandlerContext<'_, T, O>,
) -> Result<HandleResult, UpgradeError> {
    if !ctx.session.auto_progress {
        warn!(state = %ctx.session.state, "Session no longer progressing, discarding event");
        return Ok(HandleResult::Continue);
    }
    match event {
        LinkEvent::ReadDone { handle, data } => {
            ctx.session.link_ready = true;
            let Some(role) = ctx.roles.role_of(*handle) else {
                warn!(handle, "Read completion for unknown handle");
                return Ok(HandleResult::Continue);
            };
            match role {
                Role::CurrentVersion => handle_version_read(ctx, data),
                Role::NewVersion => handle_staged_version_read(ctx, data),
                Role::SequenceNumber => handle_sequence_read(ctx, data),
                Role::DataCheck => handle_data_check(ctx, data),
                Role::Status => handle_status(ctx, data),
                role if role.is_device_info() => handle_info_read(ctx, role, data),
                role => {
                    discard(ctx, role, "read");
                    Ok(HandleResult::Continue)
                }
            }
        }
        LinkEvent::WriteDone { handle } => {
            ctx.session.link_ready = true;
            let Some(role) = ctx.roles.role_of(*handle) else {
                warn!(handle, "Write completion for unknown handle");
                return Ok(HandleResult::Continue);
            };
            match role {
                Role::NewVersion => handle_new_version_write(ctx),
                Role::Data => handle_frame_write(ctx),
                Role::Checksum => handle_checksum_write(ctx),
                Role::UpgradeType => handle_upgrade_type_write(ctx),
                Role::Reset => handle_reset_write(ctx),
                role => {
                    discard(ctx, role, "write");
                    Ok(HandleResult::Continue)
                }
            }
        }
        // Notifications complete no outstanding operation; the readiness flag
        // is left untouched.
        LinkEvent::Notified { handle, data } => {
            let Some(role) = ctx.roles.role_of(*handle) else {
                warn!(handle, "Notification for unknown handle");
                return Ok(HandleResult::Continue);
            };
            match role {
                Role::DataCheck => handle_data_check(ctx, data),
                Role::Status => handle_status(ctx, data),
                role => {
                    discard(ctx, role, "notification");
                    Ok(HandleResult::Continue)
                }
            }
        }
    }
}

fn discard<T: LinkTransport, O: UpgradeObserver>(
    ctx: &HandlerContext<'_, T, O>,
    role: Role,
    kind: &str,
) {
    warn!(role = %role, state = %ctx.session.state, "Discarding unexpected {} completion", kind);
}

fn fail<T: LinkTransport, O: UpgradeObserver>(
    ctx: &mut HandlerContext<'_, T, O>,
    error: UpgradeError,
) -> Result<HandleResult, UpgradeError> {
    ctx.session.auto_progress = false;
    ctx.goto(UpgradeState::Failed);
    ctx.emit(UpgradeEvent::Error {
        message: error.to_string(),
    });
    Ok(HandleResult::Failed(error))
}

fn finish<T: LinkTransport, O: UpgradeObserver>(
    ctx: &mut HandlerContext<'_, T, O>,
) -> Result<HandleResult, UpgradeError> {
    let from = ctx.session.state;
    ctx.session.mark_complete();
    ctx.emit(UpgradeEvent::StateChanged {
        from,
        to: UpgradeState::Complete,
    });
    ctx.emit(UpgradeEvent::Complete);
    Ok(HandleResult::Complete)
}

/// Current-version read finished: compare against the image version.
fn handle_version_read<T: LinkTransport, O: UpgradeObserver>(
    ctx: &mut HandlerContext<'_, T, O>,
    data: &[u8],
) -> Result<HandleResult, UpgradeError> {
    if ctx.session.state != UpgradeState::Connected {
        discard(ctx, Role::CurrentVersion, "read");
        return Ok(HandleResult::Continue);
    }

    let device = match parse_version_bytes(data) {
        Ok(version) => version,
        Err(error) => return fail(ctx, error),
    };

    ctx.goto(UpgradeState::VersionCheck);

    let verdict = compare(device, ctx.image.version());
    ctx.session.verdict = Some(verdict);
    ctx.emit(UpgradeEvent::VersionChecked {
        device,
        image: ctx.image.version(),
        verdict,
    });

    if !verdict.needs_transfer() {
        ctx.log(LogLevel::Info, "Device firmware is up to date");
        return finish(ctx);
    }

    if ctx.config.probe_info {
        ctx.issue_read(Role::NewVersion)?;
    } else {
        announce_new_version(ctx)?;
    }
    Ok(HandleResult::Continue)
}

/// Staged-version read finished (diagnostics only).
fn handle_staged_version_read<T: LinkTransport, O: UpgradeObserver>(
    ctx: &mut HandlerContext<'_, T, O>,
    data: &[u8],
) -> Result<HandleResult, UpgradeError> {
    if ctx.session.state != UpgradeState::VersionCheck {
        discard(ctx, Role::NewVersion, "read");
        return Ok(HandleResult::Continue);
    }

    let staged = ascii_prefix(data, VERSION_LEN);
    if staged == EMPTY_VERSION {
        ctx.log(LogLevel::Debug, "No firmware staged on the device");
    }
    ctx.emit(UpgradeEvent::StagedVersion { version: staged });

    ctx.issue_read(Role::ManufacturerName)?;
    Ok(HandleResult::Continue)
}

/// Device-information read finished; walk the info roles, then announce.
fn handle_info_read<T: LinkTransport, O: UpgradeObserver>(
    ctx: &mut HandlerContext<'_, T, O>,
    role: Role,
    data: &[u8],
) -> Result<HandleResult, UpgradeError> {
    if ctx.session.state != UpgradeState::VersionCheck {
        discard(ctx, role, "read");
        return Ok(HandleResult::Continue);
    }

    let value = String::from_utf8_lossy(data).into_owned();
    match role {
        Role::ManufacturerName => {
            ctx.emit(UpgradeEvent::DeviceInfo {
                field: InfoField::Manufacturer,
                value,
            });
            ctx.issue_read(Role::ModelNumber)?;
        }
        Role::ModelNumber => {
            ctx.emit(UpgradeEvent::DeviceInfo {
                field: InfoField::ModelNumber,
                value,
            });
            ctx.issue_read(Role::SerialNumber)?;
        }
        Role::SerialNumber => {
            ctx.emit(UpgradeEvent::DeviceInfo {
                field: InfoField::SerialNumber,
                value,
            });
            announce_new_version(ctx)?;
        }
        _ => discard(ctx, role, "read"),
    }
    Ok(HandleResult::Continue)
}

/// Tell the device which version is coming before negotiating the resume.
fn announce_new_version<T: LinkTransport, O: UpgradeObserver>(
    ctx: &mut HandlerContext<'_, T, O>,
) -> Result<(), TransportError> {
    let version = ctx.image.version_str().as_bytes().to_vec();
    ctx.issue_write(Role::NewVersion, &version)
}

/// New-version announcement acknowledged: ask for the peer's sequence.
fn handle_new_version_write<T: LinkTransport, O: UpgradeObserver>(
    ctx: &mut HandlerContext<'_, T, O>,
) -> Result<HandleResult, UpgradeError> {
    if ctx.session.state != UpgradeState::VersionCheck {
        discard(ctx, Role::NewVersion, "write");
        return Ok(HandleResult::Continue);
    }
    ctx.issue_read(Role::SequenceNumber)?;
    Ok(HandleResult::Continue)
}

/// Sequence read finished: compute the resume point and start streaming or
/// jump straight to the checksum phase.
fn handle_sequence_read<T: LinkTransport, O: UpgradeObserver>(
    ctx: &mut HandlerContext<'_, T, O>,
    data: &[u8],
) -> Result<HandleResult, UpgradeError> {
    let renegotiating =
        ctx.session.state == UpgradeState::Connected && ctx.session.verdict.is_some();
    if ctx.session.state != UpgradeState::VersionCheck && !renegotiating {
        discard(ctx, Role::SequenceNumber, "read");
        return Ok(HandleResult::Continue);
    }

    // The peer reports its counter as one signed byte.
    let Some(reported) = data.first().map(|byte| i32::from(*byte as i8)) else {
        return fail(
            ctx,
            UpgradeError::ProtocolViolation("empty sequence number report".into()),
        );
    };

    ctx.goto(UpgradeState::AwaitingResumePoint);

    let decision = resume_point(
        reported,
        ctx.session.total_len,
        MAX_FRAME_PAYLOAD,
        FRAME_HEADER_LEN,
    );

    match decision {
        ResumeDecision::Complete => {
            ctx.emit(UpgradeEvent::ResumePlan {
                decision,
                frames_remaining: 0,
            });
            start_checksum(ctx)?;
        }
        ResumeDecision::ResumeAt(sequence) => {
            let rest = match slice_for_resume(ctx.frames, sequence) {
                Ok(rest) => rest,
                Err(error) => {
                    return fail(ctx, UpgradeError::ProtocolViolation(error.to_string()));
                }
            };
            ctx.session.next_frame = sequence as usize;
            ctx.session.frames_remaining = rest.len();
            ctx.session.current_sequence = i32::from(sequence) - 1;
            ctx.emit(UpgradeEvent::ResumePlan {
                decision,
                frames_remaining: rest.len(),
            });
            ctx.goto(UpgradeState::Streaming);
            write_next_frame(ctx)?;
        }
    }
    Ok(HandleResult::Continue)
}

fn write_next_frame<T: LinkTransport, O: UpgradeObserver>(
    ctx: &mut HandlerContext<'_, T, O>,
) -> Result<(), TransportError> {
    let bytes = ctx.frames[ctx.session.next_frame].to_bytes();
    ctx.issue_write(Role::Data, &bytes)
}

fn start_checksum<T: LinkTransport, O: UpgradeObserver>(
    ctx: &mut HandlerContext<'_, T, O>,
) -> Result<(), TransportError> {
    ctx.goto(UpgradeState::ChecksumPending);
    let digest = ctx.digest.as_bytes().to_vec();
    ctx.issue_write(Role::Checksum, &digest)
}

/// One frame acknowledged: advance and write the next, or move to checksum.
fn handle_frame_write<T: LinkTransport, O: UpgradeObserver>(
    ctx: &mut HandlerContext<'_, T, O>,
) -> Result<HandleResult, UpgradeError> {
    if ctx.session.state != UpgradeState::Streaming {
        discard(ctx, Role::Data, "write");
        return Ok(HandleResult::Continue);
    }

    ctx.session.advance_sequence();
    ctx.emit(UpgradeEvent::Progress {
        sent: ctx.frames.len() - ctx.session.frames_remaining,
        total: ctx.frames.len(),
    });

    if ctx.session.frames_remaining == 0 {
        start_checksum(ctx)?;
    } else {
        write_next_frame(ctx)?;
    }
    Ok(HandleResult::Continue)
}

/// Checksum write acknowledged: ask for the peer's verdict.
fn handle_checksum_write<T: LinkTransport, O: UpgradeObserver>(
    ctx: &mut HandlerContext<'_, T, O>,
) -> Result<HandleResult, UpgradeError> {
    if ctx.session.state != UpgradeState::ChecksumPending {
        discard(ctx, Role::Checksum, "write");
        return Ok(HandleResult::Continue);
    }
    ctx.goto(UpgradeState::Validating);
    ctx.issue_read(Role::DataCheck)?;
    Ok(HandleResult::Continue)
}

/// Data-check verdict arrived, by read completion or notification.
fn handle_data_check<T: LinkTransport, O: UpgradeObserver>(
    ctx: &mut HandlerContext<'_, T, O>,
    data: &[u8],
) -> Result<HandleResult, UpgradeError> {
    if ctx.session.state != UpgradeState::Validating {
        discard(ctx, Role::DataCheck, "report");
        return Ok(HandleResult::Continue);
    }

    let Some(check) = DataCheck::from_wire(data) else {
        warn!(?data, "Unparseable data-check report");
        return Ok(HandleResult::Continue);
    };
    ctx.emit(UpgradeEvent::DataCheckResult { check });

    match check {
        DataCheck::Unverified => {
            ctx.log(LogLevel::Debug, "Data not verified yet, waiting");
            Ok(HandleResult::Continue)
        }
        DataCheck::Valid => {
            ctx.goto(UpgradeState::UpgradeTypeCommit);
            let mode = ctx.session.mode.as_byte();
            ctx.issue_write(Role::UpgradeType, &[mode])?;
            Ok(HandleResult::Continue)
        }
        DataCheck::Invalid => {
            let last_sequence = ctx.session.current_sequence;
            fail(ctx, UpgradeError::IntegrityFailure { last_sequence })
        }
    }
}

/// Upgrade-type write acknowledged: start polling the apply status.
fn handle_upgrade_type_write<T: LinkTransport, O: UpgradeObserver>(
    ctx: &mut HandlerContext<'_, T, O>,
) -> Result<HandleResult, UpgradeError> {
    if ctx.session.state != UpgradeState::UpgradeTypeCommit {
        discard(ctx, Role::UpgradeType, "write");
        return Ok(HandleResult::Continue);
    }
    ctx.goto(UpgradeState::StatusPolling);
    ctx.issue_read(Role::Status)?;
    Ok(HandleResult::Continue)
}

/// Apply status arrived, by read completion or notification.
fn handle_status<T: LinkTransport, O: UpgradeObserver>(
    ctx: &mut HandlerContext<'_, T, O>,
    data: &[u8],
) -> Result<HandleResult, UpgradeError> {
    if ctx.session.state != UpgradeState::StatusPolling {
        discard(ctx, Role::Status, "report");
        return Ok(HandleResult::Continue);
    }

    let Some(status) = FirmwareStatus::from_wire(data) else {
        warn!(?data, "Unparseable firmware status report");
        return Ok(HandleResult::Continue);
    };
    ctx.emit(UpgradeEvent::StatusReport { status });

    match status {
        FirmwareStatus::Normal => {
            ctx.issue_read(Role::Status)?;
            Ok(HandleResult::Continue)
        }
        FirmwareStatus::Successful => {
            if ctx.config.auto_reset {
                ctx.issue_write(Role::Reset, &[RESET_COMMAND])?;
                Ok(HandleResult::Continue)
            } else {
                finish(ctx)
            }
        }
        FirmwareStatus::AbnormalFinish => {
            let last_sequence = ctx.session.current_sequence;
            fail(ctx, UpgradeError::DeviceAbnormalFinish { last_sequence })
        }
    }
}

/// Reset command acknowledged: the device reboots into the new image.
fn handle_reset_write<T: LinkTransport, O: UpgradeObserver>(
    ctx: &mut HandlerContext<'_, T, O>,
) -> Result<HandleResult, UpgradeError> {
    if ctx.session.state != UpgradeState::StatusPolling {
        discard(ctx, Role::Reset, "write");
        return Ok(HandleResult::Continue);
    }
    finish(ctx)
}

fn parse_version_bytes(data: &[u8]) -> Result<crate::version::VersionTriple, UpgradeError> {
    if data.len() < VERSION_LEN {
        return Err(UpgradeError::ProtocolViolation(format!(
            "version report is {} bytes, expected {}",
            data.len(),
            VERSION_LEN
        )));
    }
    ascii_prefix(data, VERSION_LEN)
        .parse()
        .map_err(|error: crate::version::VersionError| {
            UpgradeError::ProtocolViolation(error.to_string())
        })
}

/// The leading `len` bytes as text; devices may pad reads with trailing noise.
fn ascii_prefix(data: &[u8], len: usize) -> String {
    String::from_utf8_lossy(&data[..data.len().min(len)]).into_owned()
}
