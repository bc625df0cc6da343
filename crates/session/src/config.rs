//! Session tuning.

use std::time::Duration;

use minfo_engine::EngineSettings;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};

/// How long a request waits for a detection before failing with a timeout.
pub const DEFAULT_DETECTION_TIMEOUT: Duration = Duration::from_secs(45);

/// What a start does while another session is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReentryPolicy {
    /// Stop the active session (its caller gets `Stopped`) and start anew.
    #[default]
    Replace,
    /// Leave the active session alone and fail the new caller.
    Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    #[serde(rename = "detection_timeout_ms", with = "duration_ms")]
    pub detection_timeout: Duration,
    pub reentry_policy: ReentryPolicy,
    /// Apply the detection timeout to stream-only sessions as well.
    pub stream_only_timeout: bool,
    pub engine: EngineSettings,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            detection_timeout: DEFAULT_DETECTION_TIMEOUT,
            reentry_policy: ReentryPolicy::default(),
            stream_only_timeout: false,
            engine: EngineSettings::default(),
        }
    }
}

impl SessionConfig {
    /// Parse a JSON config; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| SessionError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.detection_timeout.is_zero() {
            return Err(SessionError::InvalidConfig(
                "detection timeout must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.detection_timeout = timeout;
        self
    }

    pub fn with_reentry_policy(mut self, policy: ReentryPolicy) -> Self {
        self.reentry_policy = policy;
        self
    }

    pub fn with_stream_only_timeout(mut self, enabled: bool) -> Self {
        self.stream_only_timeout = enabled;
        self
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
