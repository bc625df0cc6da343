//! Shared wire contracts for detection events.
//!
//! Two consumers listen to the engine through different channels and expect
//! different payload shapes. This crate defines both shapes, the pure
//! encoder that derives them from a raw detection, and the `EventSink` trait
//! the channels are reached through.

mod encoder;
mod sink;

pub use encoder::{
    band_label, encode, sound_type, EncodedDetection, InvalidDetection, DEFAULT_COUNTER,
    REFERENCE_CONFIDENCE,
};
pub use sink::{EmitError, EmittedEvent, EventSink, EventSinkRef, InMemoryEventSink, NullEventSink};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Stream payload: `[soundType, audioId, counter, timestampSeconds]`.
///
/// Producers: session event bus
/// Consumers: stream channel (`onDetectedId`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedStreamEvent {
    /// 0 for the audible band, 1 for the ultrasonic band.
    pub sound_type: i32,
    /// First detected code, truncated to 32 bits.
    pub audio_id: i32,
    pub counter: i32,
    /// Capture time in Unix seconds.
    pub timestamp_seconds: i64,
}

impl EncodedStreamEvent {
    pub fn to_array(&self) -> [i64; 4] {
        [
            i64::from(self.sound_type),
            i64::from(self.audio_id),
            i64::from(self.counter),
            self.timestamp_seconds,
        ]
    }
}

impl Serialize for EncodedStreamEvent {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (
            self.sound_type,
            self.audio_id,
            self.counter,
            self.timestamp_seconds,
        )
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for EncodedStreamEvent {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let (sound_type, audio_id, counter, timestamp_seconds) =
            <(i32, i32, i32, i64)>::deserialize(deserializer)?;
        Ok(Self {
            sound_type,
            audio_id,
            counter,
            timestamp_seconds,
        })
    }
}

/// Success payload for a request-style caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalMatch {
    /// Decimal form of the audio id.
    pub signature: String,
    pub confidence: f64,
    /// Fresh identifier for this match.
    pub signal_id: String,
}

/// Why a request ended without a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// The engine library is missing or could not be instantiated.
    #[serde(rename = "LIBS_UNAVAILABLE")]
    EngineUnavailable,
    /// The engine was reached but audio setup failed.
    #[serde(rename = "AUDIO_INIT_FAILED")]
    InitializationFailed,
    #[serde(rename = "TIMEOUT")]
    Timeout,
    /// Cancelled explicitly or superseded by a newer session.
    #[serde(rename = "STOPPED")]
    Stopped,
    /// A detection carried no codes. Such detections are logged and dropped
    /// while the session keeps listening, so this kind is never delivered
    /// as a request outcome.
    #[serde(rename = "INVALID_DETECTION")]
    InvalidDetection,
    /// Rejected because another session is active.
    #[serde(rename = "DETECTION_IN_PROGRESS")]
    DetectionInProgress,
}

impl FailureKind {
    /// Wire code, as carried in failure payloads.
    pub fn code(self) -> &'static str {
        match self {
            Self::EngineUnavailable => "LIBS_UNAVAILABLE",
            Self::InitializationFailed => "AUDIO_INIT_FAILED",
            Self::Timeout => "TIMEOUT",
            Self::Stopped => "STOPPED",
            Self::InvalidDetection => "INVALID_DETECTION",
            Self::DetectionInProgress => "DETECTION_IN_PROGRESS",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Failure payload: `{"code": ..., "message": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct Failure {
    #[serde(rename = "code")]
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Terminal result delivered to a request-style caller, at most once.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    Success(SignalMatch),
    Failure(Failure),
}

impl RequestOutcome {
    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Failure(Failure::new(kind, message))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Success(_) => None,
            Self::Failure(failure) => Some(failure.kind),
        }
    }

    pub fn into_result(self) -> std::result::Result<SignalMatch, Failure> {
        match self {
            Self::Success(signal) => Ok(signal),
            Self::Failure(failure) => Err(failure),
        }
    }
}

/// Notification on the request channel for every accepted detection.
///
/// Producers: session event bus
/// Consumers: request channel (`onSignalDetected`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalDetectedEvent {
    /// Band label, `SoundCode` or `UltraCode`.
    #[serde(rename = "type")]
    pub kind: String,
    /// All codes joined with `_`.
    pub codes: String,
}

/// Reply to `initialise`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitialiseResponse {
    pub available: bool,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Channel names the two consumers listen on.
pub mod channels {
    /// Call/response channel (`initialise`, `startDetection`, ...).
    pub const REQUEST: &str = "com.minfo_sdk/audioqr";
    /// Fire-and-forget stream channel.
    pub const STREAM: &str = "com.gzone.campaign/audioCapture";
}

/// Method names as constants to prevent typos.
pub mod method_names {
    pub const INITIALISE: &str = "initialise";
    pub const START_DETECTION: &str = "startDetection";
    pub const STOP_DETECTION: &str = "stopDetection";
    pub const START_AUDIO_CAPTURE: &str = "startAudioCapture";
    pub const STOP_AUDIO_CAPTURE: &str = "stopAudioCapture";
    /// Stream tuple notification.
    pub const ON_DETECTED_ID: &str = "onDetectedId";
    /// Request channel notification.
    pub const ON_SIGNAL_DETECTED: &str = "onSignalDetected";
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stream_event_serializes_as_array() {
        let event = EncodedStreamEvent {
            sound_type: 0,
            audio_id: 42,
            counter: 1,
            timestamp_seconds: 1_700_000_001,
        };
        assert_eq!(serde_json::to_value(event).unwrap(), json!([0, 42, 1, 1_700_000_001]));
    }

    #[test]
    fn test_stream_event_deserialize() {
        let event: EncodedStreamEvent = serde_json::from_str("[1, -5, 3, 99]").unwrap();
        assert_eq!(event.sound_type, 1);
        assert_eq!(event.audio_id, -5);
        assert_eq!(event.to_array(), [1, -5, 3, 99]);
    }

    #[test]
    fn test_signal_match_field_names() {
        let signal = SignalMatch {
            signature: "42".into(),
            confidence: 0.98,
            signal_id: "abc".into(),
        };
        let value = serde_json::to_value(signal).unwrap();
        assert_eq!(value["signature"], "42");
        assert_eq!(value["signalId"], "abc");
    }

    #[test]
    fn test_failure_payload_uses_code() {
        let failure = Failure::new(FailureKind::Timeout, "no signal");
        assert_eq!(
            serde_json::to_value(&failure).unwrap(),
            json!({"code": "TIMEOUT", "message": "no signal"})
        );
        assert_eq!(failure.to_string(), "TIMEOUT: no signal");
    }

    #[test]
    fn test_failure_codes_match_serde() {
        for kind in [
            FailureKind::EngineUnavailable,
            FailureKind::InitializationFailed,
            FailureKind::Timeout,
            FailureKind::Stopped,
            FailureKind::InvalidDetection,
            FailureKind::DetectionInProgress,
        ] {
            assert_eq!(serde_json::to_value(kind).unwrap(), json!(kind.code()));
        }
    }

    #[test]
    fn test_initialise_response_omits_missing_error() {
        let response = InitialiseResponse {
            available: true,
            version: "2.3.0-scripted".into(),
            error: None,
        };
        assert_eq!(
            serde_json::to_value(response).unwrap(),
            json!({"available": true, "version": "2.3.0-scripted"})
        );
    }

    #[test]
    fn test_outcome_helpers() {
        let outcome = RequestOutcome::failure(FailureKind::Stopped, "stopped");
        assert!(!outcome.is_success());
        assert_eq!(outcome.failure_kind(), Some(FailureKind::Stopped));
        assert!(outcome.into_result().is_err());
    }
}
