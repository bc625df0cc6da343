use minfo_events::method_names;

use crate::{commands, AudioQrPlugin, MethodCall, MethodResponse, PluginError};

/// Route a request-channel call to its command by method name.
pub async fn handle(plugin: &AudioQrPlugin, call: &MethodCall) -> MethodResponse {
    tracing::debug!(method = %call.method, "method_call");

    let response = match call.method.as_str() {
        method_names::INITIALISE => MethodResponse::success(commands::initialise(plugin).await),
        method_names::START_DETECTION => commands::start_detection(plugin).await.into(),
        method_names::STOP_DETECTION => commands::stop_detection(plugin).await.into(),
        method_names::START_AUDIO_CAPTURE => commands::start_audio_capture(plugin).await.into(),
        method_names::STOP_AUDIO_CAPTURE => commands::stop_audio_capture(plugin).await.into(),
        other => PluginError::NotImplemented(other.to_string()).into(),
    };

    if let MethodResponse::Error { code, .. } = &response {
        tracing::info!(method = %call.method, %code, "method_failed");
    }
    response
}
