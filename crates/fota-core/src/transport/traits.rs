//! Link transport abstraction.
//!
//! The engine drives the physical link through this trait: read, write and
//! subscribe are asynchronous, and each issued operation yields exactly one
//! completion through `next_event`. Because the engine keeps a single
//! operation outstanding at a time, the handle is a sufficient correlate.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("radio adapter unavailable")]
    AdapterUnavailable,

    #[error("failed to connect: {0}")]
    ConnectFailed(String),

    #[error("service discovery failed: {0}")]
    DiscoveryFailed(String),

    #[error("no handle bound for role {0}")]
    RoleNotFound(Role),

    #[error("read failed: {0}")]
    ReadFailed(String),

    #[error("write failed: {0}")]
    WriteFailed(String),

    #[error("link disconnected")]
    Disconnected,

    #[error("timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

/// Semantic identity bound to a transport handle during discovery.
///
/// Decouples protocol logic from transport addressing: the state machine
/// speaks in roles, the transport maps them to whatever its link uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    CurrentVersion,
    NewVersion,
    Data,
    SequenceNumber,
    Checksum,
    DataCheck,
    UpgradeType,
    Status,
    Reset,
    ManufacturerName,
    ModelNumber,
    SerialNumber,
}

impl Role {
    pub const ALL: [Role; 12] = [
        Role::CurrentVersion,
        Role::NewVersion,
        Role::Data,
        Role::SequenceNumber,
        Role::Checksum,
        Role::DataCheck,
        Role::UpgradeType,
        Role::Status,
        Role::Reset,
        Role::ManufacturerName,
        Role::ModelNumber,
        Role::SerialNumber,
    ];

    /// Roles of the device-information service, read for diagnostics only.
    pub fn is_device_info(self) -> bool {
        matches!(
            self,
            Role::ManufacturerName | Role::ModelNumber | Role::SerialNumber
        )
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::CurrentVersion => "CurrentVersion",
            Role::NewVersion => "NewVersion",
            Role::Data => "Data",
            Role::SequenceNumber => "SequenceNumber",
            Role::Checksum => "Checksum",
            Role::DataCheck => "DataCheck",
            Role::UpgradeType => "UpgradeType",
            Role::Status => "Status",
            Role::Reset => "Reset",
            Role::ManufacturerName => "ManufacturerName",
            Role::ModelNumber => "ModelNumber",
            Role::SerialNumber => "SerialNumber",
        };
        write!(f, "{}", name)
    }
}

/// Opaque operation handle assigned by the transport during discovery.
pub type Handle = u16;

/// Role-to-handle bindings produced by service discovery.
#[derive(Debug, Clone, Default)]
pub struct RoleMap {
    bindings: HashMap<Role, Handle>,
}

impl RoleMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, role: Role, handle: Handle) {
        self.bindings.insert(role, handle);
    }

    pub fn get(&self, role: Role) -> Option<Handle> {
        self.bindings.get(&role).copied()
    }

    pub fn require(&self, role: Role) -> Result<Handle, TransportError> {
        self.get(role).ok_or(TransportError::RoleNotFound(role))
    }

    /// Reverse lookup for completion events.
    pub fn role_of(&self, handle: Handle) -> Option<Role> {
        self.bindings
            .iter()
            .find(|(_, bound)| **bound == handle)
            .map(|(role, _)| *role)
    }
}

/// One completion delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A read finished with the peer's data.
    ReadDone { handle: Handle, data: Vec<u8> },
    /// A write was acknowledged by the link.
    WriteDone { handle: Handle },
    /// The peer pushed a notification on a subscribed handle.
    Notified { handle: Handle, data: Vec<u8> },
}

/// Abstract packet link consumed by the transfer engine.
pub trait LinkTransport: Send + Sync {
    /// Establish the connection.
    fn connect(&self) -> Result<(), TransportError>;

    /// Bind protocol roles to operation handles.
    fn discover_roles(&self) -> Result<RoleMap, TransportError>;

    /// Issue an asynchronous read; completes via `next_event`.
    fn read(&self, handle: Handle) -> Result<(), TransportError>;

    /// Issue an asynchronous write; completes via `next_event`.
    fn write(&self, handle: Handle, data: &[u8]) -> Result<(), TransportError>;

    /// Enable peer notifications on a handle.
    fn subscribe(&self, handle: Handle) -> Result<(), TransportError>;

    /// Block for the next completion or notification.
    fn next_event(&self) -> Result<LinkEvent, TransportError>;

    /// Power-cycle the local radio adapter (link recovery).
    fn reset_adapter(&self) -> Result<(), TransportError>;

    /// Close the connection.
    fn disconnect(&self);

    fn is_connected(&self) -> bool;
}
