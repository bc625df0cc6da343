//! Method-call surface for the `com.minfo_sdk/audioqr` request channel.
//!
//! Host bindings forward each inbound call to [`AudioQrPlugin::call`] and
//! attach their two outbound channels as [`Sinks`]: `onDetectedId` tuples go
//! to the `com.gzone.campaign/audioCapture` stream sink, `onSignalDetected`
//! notifications to the request sink.

use std::sync::Arc;

use minfo_engine::EngineAdapter;
use minfo_session::{SessionConfig, SessionController, SessionHandle, Sinks};

mod commands;
mod error;
mod events;
mod handler;

pub use error::{PluginError, Result};
pub use events::*;

pub const PLUGIN_VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct AudioQrPlugin {
    pub(crate) engine: Arc<dyn EngineAdapter>,
    pub(crate) handle: SessionHandle,
}

/// Build the plugin around `engine` and spawn its session controller.
///
/// Must be called from within a tokio runtime.
pub fn init(engine: Arc<dyn EngineAdapter>, sinks: Sinks, config: SessionConfig) -> AudioQrPlugin {
    tracing::info!(version = PLUGIN_VERSION, "audioqr_plugin_init");
    let handle = SessionController::spawn(engine.clone(), sinks, config);
    AudioQrPlugin { engine, handle }
}

/// Like [`init`], with the session config read from JSON.
pub fn init_with_json(
    engine: Arc<dyn EngineAdapter>,
    sinks: Sinks,
    config: &str,
) -> Result<AudioQrPlugin> {
    let config = SessionConfig::from_json(config)?;
    Ok(init(engine, sinks, config))
}

impl AudioQrPlugin {
    pub async fn call(&self, call: &MethodCall) -> MethodResponse {
        handler::handle(self, call).await
    }

    pub fn session(&self) -> &SessionHandle {
        &self.handle
    }

    /// Host detached: stop any active session and end the controller.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("audioqr_plugin_shutdown");
        self.handle.shutdown().await?;
        Ok(())
    }
}
