//! Peer-reported protocol codes.
//!
//! The data-check and firmware-status roles both carry the raw values 0/1/2
//! on the wire but mean different things; they are kept as distinct types so
//! a value read from one role can never stand in for the other.
//!
//! Either role may report a single byte (`[value]`) or two bytes
//! (`[flags, value]`), depending on the property format the peer negotiated;
//! the value always sits in the last position.

use std::fmt;

use super::constants::{
    DATA_CHECK_INVALID, DATA_CHECK_UNVERIFIED, DATA_CHECK_VALID, STATUS_ABNORMAL_FINISH,
    STATUS_NORMAL, STATUS_SUCCESSFUL, UPGRADE_TYPE_FORCED, UPGRADE_TYPE_NORMAL,
};

/// Peer verdict on whether the received bytes match the transmitted checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataCheck {
    /// No verdict yet; keep waiting for a notification.
    Unverified,
    /// Received bytes match the checksum.
    Valid,
    /// Received bytes rejected.
    Invalid,
}

impl DataCheck {
    pub fn from_wire(data: &[u8]) -> Option<Self> {
        match *wire_value(data)? {
            DATA_CHECK_UNVERIFIED => Some(DataCheck::Unverified),
            DATA_CHECK_VALID => Some(DataCheck::Valid),
            DATA_CHECK_INVALID => Some(DataCheck::Invalid),
            _ => None,
        }
    }
}

impl fmt::Display for DataCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataCheck::Unverified => write!(f, "UNVERIFIED"),
            DataCheck::Valid => write!(f, "VALID"),
            DataCheck::Invalid => write!(f, "INVALID"),
        }
    }
}

/// Peer-reported apply status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareStatus {
    /// Apply not finished yet; poll again.
    Normal,
    /// New firmware applied.
    Successful,
    /// Apply failed on the device.
    AbnormalFinish,
}

impl FirmwareStatus {
    pub fn from_wire(data: &[u8]) -> Option<Self> {
        match *wire_value(data)? {
            STATUS_NORMAL => Some(FirmwareStatus::Normal),
            STATUS_SUCCESSFUL => Some(FirmwareStatus::Successful),
            STATUS_ABNORMAL_FINISH => Some(FirmwareStatus::AbnormalFinish),
            _ => None,
        }
    }
}

impl fmt::Display for FirmwareStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FirmwareStatus::Normal => write!(f, "NORMAL"),
            FirmwareStatus::Successful => write!(f, "SUCCESSFUL"),
            FirmwareStatus::AbnormalFinish => write!(f, "ABNORMAL_FINISH"),
        }
    }
}

/// Upgrade type written to the peer before the status poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpgradeMode {
    /// Optional upgrade.
    #[default]
    Normal,
    /// Mandatory upgrade.
    Forced,
}

impl UpgradeMode {
    pub fn as_byte(self) -> u8 {
        match self {
            UpgradeMode::Normal => UPGRADE_TYPE_NORMAL,
            UpgradeMode::Forced => UPGRADE_TYPE_FORCED,
        }
    }
}

impl fmt::Display for UpgradeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpgradeMode::Normal => write!(f, "NORMAL"),
            UpgradeMode::Forced => write!(f, "FORCED"),
        }
    }
}

/// The code value of a one- or two-byte report.
fn wire_value(data: &[u8]) -> Option<&u8> {
    match data {
        [value] => Some(value),
        [_, value] => Some(value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_byte_codes_parse() {
        assert_eq!(DataCheck::from_wire(&[0]), Some(DataCheck::Unverified));
        assert_eq!(DataCheck::from_wire(&[1]), Some(DataCheck::Valid));
        assert_eq!(DataCheck::from_wire(&[2]), Some(DataCheck::Invalid));
        assert_eq!(FirmwareStatus::from_wire(&[1]), Some(FirmwareStatus::Successful));
    }

    #[test]
    fn two_byte_format_carries_value_last() {
        assert_eq!(DataCheck::from_wire(&[0x10, 2]), Some(DataCheck::Invalid));
        assert_eq!(
            FirmwareStatus::from_wire(&[0x10, 0]),
            Some(FirmwareStatus::Normal)
        );
    }

    #[test]
    fn unknown_values_are_rejected() {
        assert_eq!(DataCheck::from_wire(&[9]), None);
        assert_eq!(DataCheck::from_wire(&[]), None);
        assert_eq!(FirmwareStatus::from_wire(&[0, 1, 2]), None);
    }

    #[test]
    fn upgrade_mode_wire_bytes() {
        assert_eq!(UpgradeMode::Normal.as_byte(), 0);
        assert_eq!(UpgradeMode::Forced.as_byte(), 1);
    }
}
