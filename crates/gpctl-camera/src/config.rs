use std::path::Path;
use std::time::Duration;

use gpctl_frame::DEFAULT_MTU;
use serde::{Deserialize, Serialize};

use crate::error::{CameraError, Result};

/// Tunables for a [`crate::Camera`].
///
/// Durations are (de)serialized as integer milliseconds; missing fields fall
/// back to their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Maximum bytes per outbound write.
    pub mtu: usize,
    /// How long highlight-with-restart waits for recording to stop.
    #[serde(rename = "stop_timeout_ms", with = "millis")]
    pub stop_timeout: Duration,
    /// Pause between the stop confirmation and the new record command.
    #[serde(rename = "settle_delay_ms", with = "millis")]
    pub settle_delay: Duration,
    /// Best-effort wait for recording to resume.
    #[serde(rename = "restart_timeout_ms", with = "millis")]
    pub restart_timeout: Duration,
    /// Period of the keep-alive and refresh poller.
    #[serde(rename = "poll_interval_ms", with = "millis")]
    pub poll_interval: Duration,
    /// Start the poller on connect.
    pub poll_enabled: bool,
    /// Buffered events per error-stream subscriber.
    pub error_capacity: usize,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            mtu: DEFAULT_MTU,
            stop_timeout: Duration::from_secs(8),
            settle_delay: Duration::from_millis(300),
            restart_timeout: Duration::from_secs(3),
            poll_interval: Duration::from_secs(3),
            poll_enabled: true,
            error_capacity: 64,
        }
    }
}

impl CameraConfig {
    /// Load a config from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|err| CameraError::Config(format!("{}: {err}", path.display())))?;
        Self::from_json_str(&raw)
    }

    /// Parse and validate a JSON config document.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.mtu == 0 {
            return Err(CameraError::Config("mtu must be greater than zero".into()));
        }
        if self.poll_interval.is_zero() {
            return Err(CameraError::Config(
                "poll_interval_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
