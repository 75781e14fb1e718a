//! Firmware version strings.
//!
//! Versions travel as exactly eight ASCII characters, `NN-NN-NN`, each
//! component a zero-padded decimal 00-99. Parsing is strict: anything else is
//! an error, never silently treated as up to date.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::protocol::constants::VERSION_LEN;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("version string must be exactly {VERSION_LEN} characters, got {0}")]
    BadLength(usize),

    #[error("malformed version string: {0:?}")]
    Malformed(String),
}

/// Parsed `NN-NN-NN` version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VersionTriple {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl VersionTriple {
    pub fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl FromStr for VersionTriple {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != VERSION_LEN {
            return Err(VersionError::BadLength(s.len()));
        }

        let mut components = [0u8; 3];
        let parts: Vec<&str> = s.split('-').collect();
        if parts.len() != components.len() {
            return Err(VersionError::Malformed(s.to_string()));
        }

        for (slot, part) in components.iter_mut().zip(&parts) {
            if part.len() != 2 || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(VersionError::Malformed(s.to_string()));
            }
            *slot = part
                .parse()
                .map_err(|_| VersionError::Malformed(s.to_string()))?;
        }

        Ok(Self {
            major: components[0],
            minor: components[1],
            patch: components[2],
        })
    }
}

impl fmt::Display for VersionTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}-{:02}-{:02}", self.major, self.minor, self.patch)
    }
}

/// Ordered verdict of a version comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionVerdict {
    MajorUpgrade,
    MajorDowngrade,
    MinorUpgrade,
    MinorDowngrade,
    UpToDate,
}

impl VersionVerdict {
    /// Whether a transfer should run at all.
    pub fn needs_transfer(self) -> bool {
        !matches!(self, VersionVerdict::UpToDate)
    }
}

impl fmt::Display for VersionVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionVerdict::MajorUpgrade => write!(f, "MAJOR_UPGRADE"),
            VersionVerdict::MajorDowngrade => write!(f, "MAJOR_DOWNGRADE"),
            VersionVerdict::MinorUpgrade => write!(f, "MINOR_UPGRADE"),
            VersionVerdict::MinorDowngrade => write!(f, "MINOR_DOWNGRADE"),
            VersionVerdict::UpToDate => write!(f, "UP_TO_DATE"),
        }
    }
}

/// Compare the device's current version against a candidate image version.
///
/// Patch-level differences classify as minor.
pub fn compare(current: VersionTriple, candidate: VersionTriple) -> VersionVerdict {
    if current.major != candidate.major {
        if current.major < candidate.major {
            return VersionVerdict::MajorUpgrade;
        }
        return VersionVerdict::MajorDowngrade;
    }
    if current.minor != candidate.minor {
        if current.minor < candidate.minor {
            return VersionVerdict::MinorUpgrade;
        }
        return VersionVerdict::MinorDowngrade;
    }
    if current.patch != candidate.patch {
        if current.patch < candidate.patch {
            return VersionVerdict::MinorUpgrade;
        }
        return VersionVerdict::MinorDowngrade;
    }
    VersionVerdict::UpToDate
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> VersionTriple {
        s.parse().unwrap()
    }

    #[test]
    fn parse_and_display_round_trip() {
        let version = v("01-02-03");
        assert_eq!(version, VersionTriple::new(1, 2, 3));
        assert_eq!(version.to_string(), "01-02-03");
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert_eq!(
            "1-02-03".parse::<VersionTriple>(),
            Err(VersionError::BadLength(7))
        );
        assert_eq!(
            "01.02.03".parse::<VersionTriple>(),
            Err(VersionError::Malformed("01.02.03".into()))
        );
        assert_eq!(
            "0a-02-03".parse::<VersionTriple>(),
            Err(VersionError::Malformed("0a-02-03".into()))
        );
        assert!("".parse::<VersionTriple>().is_err());
    }

    #[test]
    fn comparison_table() {
        assert_eq!(compare(v("01-02-03"), v("01-02-03")), VersionVerdict::UpToDate);
        assert_eq!(
            compare(v("01-02-03"), v("02-02-03")),
            VersionVerdict::MajorUpgrade
        );
        assert_eq!(
            compare(v("02-00-00"), v("01-09-09")),
            VersionVerdict::MajorDowngrade
        );
        assert_eq!(
            compare(v("01-02-03"), v("01-03-00")),
            VersionVerdict::MinorUpgrade
        );
        assert_eq!(
            compare(v("01-03-00"), v("01-02-09")),
            VersionVerdict::MinorDowngrade
        );
    }

    #[test]
    fn patch_differences_classify_as_minor() {
        assert_eq!(
            compare(v("01-02-03"), v("01-02-04")),
            VersionVerdict::MinorUpgrade
        );
        assert_eq!(
            compare(v("01-02-04"), v("01-02-03")),
            VersionVerdict::MinorDowngrade
        );
    }
}
