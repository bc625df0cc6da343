//! Contract for the external watermark detection engine.
//!
//! The engine is a black box: it is configured, started and stopped, and it
//! reports detections (or a failed audio setup) through a callback on a
//! thread it owns. Nothing in this crate decodes audio.

mod scripted;

pub use scripted::ScriptedEngine;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default number of counter symbols in a band.
pub const DEFAULT_BAND_LENGTH_HINT: u32 = 1;

/// Default increment between counter periods.
pub const DEFAULT_STEP_HINT: u32 = 1;

/// Default delay adjustment; lower is more sensitive.
pub const DEFAULT_SENSITIVITY_HINT: f32 = 0.3;

/// Frequency band a watermark was decoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SignalBand {
    /// Audible band ("SoundCode").
    Primary,
    /// Ultrasonic band ("UltraCode").
    Secondary,
}

/// An unprocessed match reported by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub band: SignalBand,
    /// Decoded codes, in engine order. Empty lists are reported but invalid.
    pub codes: Vec<i64>,
    /// Running counter, when the engine tracks one.
    pub counter: Option<i32>,
    pub captured_at: DateTime<Utc>,
}

impl RawDetection {
    /// Create a detection captured now.
    pub fn new(band: SignalBand, codes: impl Into<Vec<i64>>) -> Self {
        Self {
            band,
            codes: codes.into(),
            counter: None,
            captured_at: Utc::now(),
        }
    }

    pub fn with_counter(mut self, counter: i32) -> Self {
        self.counter = Some(counter);
        self
    }

    pub fn captured_at(mut self, at: DateTime<Utc>) -> Self {
        self.captured_at = at;
        self
    }
}

/// Everything the engine can report through its callback.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Detection(RawDetection),
    /// The microphone or decoder could not be set up after `start`.
    InitFailed,
}

/// Callback invoked by the engine, from any thread.
pub type EngineCallback = std::sync::Arc<dyn Fn(EngineEvent) + Send + Sync + 'static>;

pub fn new_callback<F>(f: F) -> EngineCallback
where
    F: Fn(EngineEvent) + Send + Sync + 'static,
{
    std::sync::Arc::new(f)
}

/// Tuning passed to the engine before each search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineSettings {
    pub band_length_hint: u32,
    pub step_hint: u32,
    pub sensitivity_hint: f32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            band_length_hint: DEFAULT_BAND_LENGTH_HINT,
            step_hint: DEFAULT_STEP_HINT,
            sensitivity_hint: DEFAULT_SENSITIVITY_HINT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    /// The engine library could not be loaded or instantiated.
    #[error("detection engine unavailable: {0}")]
    Unavailable(String),

    #[error("engine rejected configuration: {0}")]
    ConfigurationRejected(String),

    #[error("engine failed to start: {0}")]
    StartFailed(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Adapter around the process-wide detection engine.
///
/// Implementations must tolerate `stop` being called at any time, including
/// when nothing is running, and may keep invoking the callback for a short
/// while after `stop` returns.
pub trait EngineAdapter: Send + Sync {
    /// Probe the engine and report its version string.
    fn version(&self) -> Result<String>;

    /// Prepare a search with `settings`, routing events to `callback`.
    fn configure(&self, settings: &EngineSettings, callback: EngineCallback) -> Result<()>;

    fn start(&self) -> Result<()>;

    /// Stop searching. Best effort, never fails.
    fn stop(&self);
}
