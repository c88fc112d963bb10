//! Domain primitive types used across the layerbox workspace.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_CPU_PERIOD_US;

/// Unique identifier for a container instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a container ID from an existing string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random container ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the first `len` characters of the ID (or the whole ID if shorter).
    #[must_use]
    pub fn prefix(&self, len: usize) -> &str {
        self.0.get(..len).unwrap_or(&self.0)
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a container image.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ImageId(String);

impl ImageId {
    /// Creates an image ID from an existing string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random image ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// SHA-256 hash digest used for content verification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sha256Hash(String);

impl Sha256Hash {
    /// Creates a hash from a hex-encoded string, with or without a `sha256:` prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not a valid 64-character hex string.
    pub fn from_hex(hex: impl Into<String>) -> crate::error::Result<Self> {
        let hex = hex.into();
        let bare = hex.strip_prefix("sha256:").unwrap_or(&hex);
        if bare.len() != crate::constants::SHA256_HEX_LENGTH
            || !bare.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(crate::error::LayerboxError::Config {
                message: format!("invalid SHA-256 hex string: {hex}"),
            });
        }
        Ok(Self(bare.to_ascii_lowercase()))
    }

    /// Returns the hex-encoded hash string.
    #[must_use]
    pub fn as_hex(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Sha256Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", self.0)
    }
}

/// Resource limits for a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerLimits {
    /// Memory ceiling in bytes; page-aligned downward before being applied.
    pub memory_bytes: Option<u64>,
    /// CFS scheduling period in microseconds.
    pub cpu_period_us: u64,
    /// CFS quota in microseconds per period. `None` means unconstrained.
    pub cpu_quota_us: Option<u64>,
}

impl ContainerLimits {
    /// Returns true when no limit would be enforced.
    #[must_use]
    pub const fn is_unconstrained(&self) -> bool {
        self.memory_bytes.is_none() && self.cpu_quota_us.is_none()
    }
}

impl Default for ContainerLimits {
    fn default() -> Self {
        Self {
            memory_bytes: None,
            cpu_period_us: DEFAULT_CPU_PERIOD_US,
            cpu_quota_us: None,
        }
    }
}

/// Lifecycle state of a container as observed from its on-disk record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainerState {
    /// A pid marker exists and the recorded process is alive.
    Running,
    /// A pid marker exists but the recorded process is gone.
    Stale,
    /// No pid marker: the container ran and exited, or never started.
    Exited,
}

impl ContainerState {
    /// Returns true only for [`ContainerState::Running`].
    #[must_use]
    pub const fn is_running(self) -> bool {
        matches!(self, Self::Running)
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stale => write!(f, "stale"),
            Self::Exited => write!(f, "exited"),
        }
    }
}

/// Whether the invoking process blocks on the container's completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Block until the process exits and report its status.
    #[default]
    Foreground,
    /// Return immediately; a forked supervisor owns the wait.
    Detached,
}

/// A non-fatal problem encountered during best-effort cleanup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownWarning {
    /// The resource that could not be released (mount point, link, path).
    pub resource: String,
    /// What went wrong.
    pub message: String,
}

impl TeardownWarning {
    /// Creates a warning for the given resource.
    pub fn new(resource: impl Into<String>, message: impl fmt::Display) -> Self {
        Self {
            resource: resource.into(),
            message: message.to_string(),
        }
    }
}

impl fmt::Display for TeardownWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.resource, self.message)
    }
}

/// Collected warnings from a teardown pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    /// Warnings in the order they were produced.
    pub warnings: Vec<TeardownWarning>,
}

impl TeardownReport {
    /// Appends warnings from one teardown step.
    pub fn extend(&mut self, warnings: impl IntoIterator<Item = TeardownWarning>) {
        self.warnings.extend(warnings);
    }

    /// Returns true when every resource was released cleanly.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_container_ids_are_unique_uuids() {
        let a = ContainerId::generate();
        let b = ContainerId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn prefix_truncates_without_panicking_on_short_ids() {
        let id = ContainerId::new("abcdef0123456789");
        assert_eq!(id.prefix(8), "abcdef01");
        assert_eq!(ContainerId::new("ab").prefix(8), "ab");
    }

    #[test]
    fn sha256_accepts_prefixed_digest() {
        let hex = "a".repeat(64);
        let hash = Sha256Hash::from_hex(format!("sha256:{hex}")).unwrap();
        assert_eq!(hash.as_hex(), hex);
        assert_eq!(hash.to_string(), format!("sha256:{hex}"));
    }

    #[test]
    fn sha256_rejects_short_input() {
        assert!(Sha256Hash::from_hex("abc").is_err());
    }

    #[test]
    fn default_limits_are_unconstrained() {
        let limits = ContainerLimits::default();
        assert!(limits.is_unconstrained());
        assert_eq!(limits.cpu_period_us, 100_000);
    }

    #[test]
    fn only_running_state_counts_as_running() {
        assert!(ContainerState::Running.is_running());
        assert!(!ContainerState::Stale.is_running());
        assert!(!ContainerState::Exited.is_running());
    }

    #[test]
    fn teardown_report_collects_warnings() {
        let mut report = TeardownReport::default();
        assert!(report.is_clean());
        report.extend([TeardownWarning::new("/mnt/x", "busy")]);
        assert!(!report.is_clean());
        assert_eq!(report.warnings[0].to_string(), "/mnt/x: busy");
    }
}
