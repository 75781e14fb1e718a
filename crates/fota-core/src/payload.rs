//! Firmware image loading and validation.
//!
//! An image is an immutable byte buffer plus the version it carries. The
//! version either comes from the caller or is extracted from the firmware
//! file name (`01-02-03.bin`). Validation happens at construction so a bad
//! image is rejected before any transport activity starts.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::protocol::constants::MAX_IMAGE_SIZE;
use crate::version::{VersionError, VersionTriple};

#[derive(Error, Debug)]
pub enum FirmwareError {
    #[error("image is {actual} bytes, larger than the {MAX_IMAGE_SIZE}-byte transfer limit")]
    ImageTooLarge { actual: usize },

    #[error("firmware file name carries no version: {0}")]
    NoVersionInName(String),

    #[error(transparent)]
    Version(#[from] VersionError),

    #[error("failed to read firmware file: {0}")]
    Io(#[from] std::io::Error),
}

/// Immutable firmware image with its declared version.
#[derive(Debug, Clone)]
pub struct FirmwareImage {
    data: Vec<u8>,
    version: VersionTriple,
    version_raw: String,
}

impl FirmwareImage {
    pub fn from_bytes(data: Vec<u8>, version: &str) -> Result<Self, FirmwareError> {
        let parsed = version.parse()?;
        if data.len() > MAX_IMAGE_SIZE {
            return Err(FirmwareError::ImageTooLarge { actual: data.len() });
        }
        Ok(Self {
            data,
            version: parsed,
            version_raw: version.to_string(),
        })
    }

    /// Load an image whose file name is its version, e.g. `01-02-03.bin`.
    pub fn from_file(path: &Path) -> Result<Self, FirmwareError> {
        let version = version_from_file_name(path)?;
        let data = fs::read(path)?;
        Self::from_bytes(data, &version)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn version(&self) -> VersionTriple {
        self.version
    }

    pub fn version_str(&self) -> &str {
        &self.version_raw
    }
}

/// Extract the version part of a firmware file name.
pub fn version_from_file_name(path: &Path) -> Result<String, FirmwareError> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
        .ok_or_else(|| FirmwareError::NoVersionInName(path.display().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_image_parses_its_version() {
        let image = FirmwareImage::from_bytes(vec![1, 2, 3], "01-02-03").unwrap();
        assert_eq!(image.len(), 3);
        assert_eq!(image.version(), VersionTriple::new(1, 2, 3));
        assert_eq!(image.version_str(), "01-02-03");
    }

    #[test]
    fn malformed_version_is_rejected() {
        assert!(FirmwareImage::from_bytes(vec![1], "1.2.3").is_err());
    }

    #[test]
    fn oversized_image_is_rejected() {
        let result = FirmwareImage::from_bytes(vec![0; MAX_IMAGE_SIZE + 1], "01-00-00");
        assert!(matches!(
            result,
            Err(FirmwareError::ImageTooLarge { actual }) if actual == MAX_IMAGE_SIZE + 1
        ));
    }

    #[test]
    fn version_comes_from_file_stem() {
        let version = version_from_file_name(Path::new("/firmware/02-01-00.bin")).unwrap();
        assert_eq!(version, "02-01-00");
    }
}
