//! Protocol module - wire-level definitions of the firmware upgrade profile.

pub mod codes;
pub mod constants;
pub mod frame;

pub use codes::{DataCheck, FirmwareStatus, UpgradeMode};
pub use constants::*;
pub use frame::{Frame, FrameError, encode, slice_for_resume};
