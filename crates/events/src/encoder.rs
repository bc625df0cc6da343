//! Pure mapping from a raw detection to the wire payloads.

use minfo_engine::{RawDetection, SignalBand};

use crate::{EncodedStreamEvent, FailureKind, SignalDetectedEvent, SignalMatch};

/// Confidence reported for every match.
///
/// The engine does not score its matches, so this is a fixed value rather
/// than a measurement.
pub const REFERENCE_CONFIDENCE: f64 = 0.98;

/// Counter used when the engine does not supply one.
pub const DEFAULT_COUNTER: i32 = 1;

/// A detection the engine reported without any codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("detection carried no codes")]
pub struct InvalidDetection;

impl InvalidDetection {
    pub fn kind(self) -> FailureKind {
        FailureKind::InvalidDetection
    }
}

/// All payloads derived from one detection.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedDetection {
    pub signal: SignalMatch,
    pub stream: EncodedStreamEvent,
    pub notification: SignalDetectedEvent,
}

pub fn sound_type(band: SignalBand) -> i32 {
    match band {
        SignalBand::Primary => 0,
        SignalBand::Secondary => 1,
    }
}

pub fn band_label(band: SignalBand) -> &'static str {
    match band {
        SignalBand::Primary => "SoundCode",
        SignalBand::Secondary => "UltraCode",
    }
}

/// Encode a detection. Each call mints a new signal id.
pub fn encode(detection: &RawDetection) -> Result<EncodedDetection, InvalidDetection> {
    let first = *detection.codes.first().ok_or(InvalidDetection)?;
    // Consumers take 32-bit ids; wider codes wrap.
    let audio_id = first as i32;

    let stream = EncodedStreamEvent {
        sound_type: sound_type(detection.band),
        audio_id,
        counter: detection.counter.unwrap_or(DEFAULT_COUNTER),
        timestamp_seconds: detection.captured_at.timestamp(),
    };

    let signal = SignalMatch {
        signature: audio_id.to_string(),
        confidence: REFERENCE_CONFIDENCE,
        signal_id: uuid::Uuid::new_v4().to_string(),
    };

    let notification = SignalDetectedEvent {
        kind: band_label(detection.band).to_string(),
        codes: detection
            .codes
            .iter()
            .map(|code| code.to_string())
            .collect::<Vec<_>>()
            .join("_"),
    };

    Ok(EncodedDetection {
        signal,
        stream,
        notification,
    })
}
