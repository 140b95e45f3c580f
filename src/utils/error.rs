//! Error types for Strataplan

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StrataplanError {
    /// No feasible placement, even after the flexible retry
    #[error("No disk space: {0}")]
    NoDiskSpace(String),

    /// A reuse or member reference points to a device missing from the devicegraph
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Invalid RAID: {0}")]
    InvalidRaid(String),

    #[error("Invalid size: {0}")]
    InvalidSize(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StrataplanError {
    /// Whether this is a capacity error, the only kind that triggers the
    /// flexible retry
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::NoDiskSpace(_))
    }

    /// Whether this error points at an inconsistent catalog or topology
    pub fn is_prerequisite(&self) -> bool {
        matches!(self, Self::DeviceNotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, StrataplanError>;
