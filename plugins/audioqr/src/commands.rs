use minfo_events::{InitialiseResponse, SignalMatch};

use crate::{AudioQrPlugin, Result, PLUGIN_VERSION};

/// Probe the engine. Never fails: an unusable engine is reported in the body.
pub async fn initialise(plugin: &AudioQrPlugin) -> InitialiseResponse {
    match plugin.engine.version() {
        Ok(engine_version) => {
            tracing::info!(%engine_version, "engine_available");
            InitialiseResponse {
                available: true,
                version: format!("{PLUGIN_VERSION}-{engine_version}"),
                error: None,
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "engine_unavailable");
            InitialiseResponse {
                available: false,
                version: format!("{PLUGIN_VERSION}-unavailable"),
                error: Some(e.to_string()),
            }
        }
    }
}

/// Run one request session to its outcome.
pub async fn start_detection(plugin: &AudioQrPlugin) -> Result<SignalMatch> {
    let outcome = plugin.handle.detect().await?;
    Ok(outcome.into_result()?)
}

pub async fn stop_detection(plugin: &AudioQrPlugin) -> Result<()> {
    plugin.handle.stop_detection().await?;
    Ok(())
}

/// Start a stream-only session. Acks with an empty string.
pub async fn start_audio_capture(plugin: &AudioQrPlugin) -> Result<String> {
    let session = plugin.handle.start_listening().await?;
    tracing::debug!(session = %session, "audio_capture_started");
    Ok(String::new())
}

pub async fn stop_audio_capture(plugin: &AudioQrPlugin) -> Result<String> {
    plugin.handle.stop_detection().await?;
    Ok(String::new())
}
