//! Driver configuration.
//!
//! ```toml
//! camera_index = 0
//! buffer_padding = 10
//! poll_timeout_ms = 300
//! overflow_policy = "restart"
//! missing_frame_policy = "zero"
//! default_mode = "continuous"
//! default_frame_count = 100
//! enable_metadata = true
//! ```

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::components::acquisition::{
    AcquisitionMode, MissingFramePolicy, OverflowPolicy, DEFAULT_BUFFER_PADDING,
};
use crate::error::{AndorError, Result};

// =============================================================================
// Configuration Types
// =============================================================================

/// Configuration for the Andor SDK3 camera driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AndorConfig {
    /// SDK3 device index
    #[serde(default)]
    pub camera_index: usize,

    /// Ring buffers allocated beyond the queued depth
    #[serde(default = "default_buffer_padding")]
    pub buffer_padding: usize,

    /// Bound on one device wait in the polling loop, in milliseconds
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// Policy applied on `open`
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,

    /// Policy used by `AndorDriver::read_new`
    #[serde(default)]
    pub missing_frame_policy: MissingFramePolicy,

    /// Mode of the setup made on `open`
    #[serde(default)]
    pub default_mode: AcquisitionMode,

    /// Queued depth used when no explicit setup is made
    #[serde(default = "default_frame_count")]
    pub default_frame_count: usize,

    /// Set `MetadataEnable` on open; `None` leaves the camera setting alone
    #[serde(default)]
    pub enable_metadata: Option<bool>,

    /// Use the in-process simulated camera. `false` needs an SDK3 binding
    /// passed to `AndorDriver::from_config`
    #[serde(default = "default_mock")]
    pub mock: bool,
}

fn default_buffer_padding() -> usize {
    DEFAULT_BUFFER_PADDING
}

fn default_poll_timeout_ms() -> u64 {
    300
}

fn default_frame_count() -> usize {
    100
}

fn default_mock() -> bool {
    cfg!(feature = "mock")
}

impl Default for AndorConfig {
    fn default() -> Self {
        Self {
            camera_index: 0,
            buffer_padding: default_buffer_padding(),
            poll_timeout_ms: default_poll_timeout_ms(),
            overflow_policy: OverflowPolicy::default(),
            missing_frame_policy: MissingFramePolicy::default(),
            default_mode: AcquisitionMode::default(),
            default_frame_count: default_frame_count(),
            enable_metadata: None,
            mock: default_mock(),
        }
    }
}

impl AndorConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| AndorError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading Andor config {}", path.display()))?;
        Self::from_toml_str(&text)
            .with_context(|| format!("parsing Andor config {}", path.display()))
    }

    /// Reject zero counts and a `mock` request the build cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.default_frame_count == 0 {
            return Err(AndorError::config("default_frame_count must be at least 1"));
        }
        if self.poll_timeout_ms == 0 {
            return Err(AndorError::config("poll_timeout_ms must be non-zero"));
        }
        if self.mock && !cfg!(feature = "mock") {
            return Err(AndorError::config("mock = true needs the crate's `mock` feature"));
        }
        Ok(())
    }

    /// `poll_timeout_ms` as a `Duration`.
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_document() {
        let config = AndorConfig::from_toml_str("").unwrap();
        assert_eq!(config, AndorConfig::default());
        assert_eq!(config.buffer_padding, 10);
        assert_eq!(config.poll_timeout(), Duration::from_millis(300));
        assert_eq!(config.overflow_policy, OverflowPolicy::Error);
        assert_eq!(config.missing_frame_policy, MissingFramePolicy::Skip);
        assert_eq!(config.default_mode, AcquisitionMode::Continuous);
    }

    #[test]
    fn test_policy_spellings() {
        let config = AndorConfig::from_toml_str(
            r#"
            overflow_policy = "ignore"
            missing_frame_policy = "none"
            default_mode = "oneshot"
            enable_metadata = false
            "#,
        )
        .unwrap();
        assert_eq!(config.overflow_policy, OverflowPolicy::Ignore);
        assert_eq!(config.missing_frame_policy, MissingFramePolicy::None);
        assert_eq!(config.default_mode, AcquisitionMode::OneShot);
        assert_eq!(config.enable_metadata, Some(false));
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(AndorConfig::from_toml_str("poll_timeout_ms = 0").is_err());
        assert!(AndorConfig::from_toml_str("default_frame_count = 0").is_err());
        assert!(AndorConfig::from_toml_str("overflow_policy = \"panic\"").is_err());
        assert!(AndorConfig::from_toml_str("frame_rate = 5").is_err());
    }

    #[test]
    fn test_mock_flag() {
        assert_eq!(AndorConfig::default().mock, cfg!(feature = "mock"));
        assert!(!AndorConfig::from_toml_str("mock = false").unwrap().mock);
        assert_eq!(
            AndorConfig::from_toml_str("mock = true").is_ok(),
            cfg!(feature = "mock")
        );
    }
}
