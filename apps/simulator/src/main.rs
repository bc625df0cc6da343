use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use minfo_engine::{ScriptedEngine, SignalBand};
use minfo_events::{channels, method_names, EmitError, EventSink};
use minfo_plugin::{AudioQrPlugin, MethodCall, MethodResponse};
use minfo_session::{SessionConfig, SessionState, Sinks};
use tracing_subscriber::EnvFilter;

/// Prints every notification a channel receives.
struct LogSink {
    channel: &'static str,
}

impl EventSink for LogSink {
    fn emit(&self, method: &str, payload: serde_json::Value) -> Result<(), EmitError> {
        tracing::info!(channel = self.channel, method, %payload, "notification");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,minfo=debug")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => {
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config {path}"))?;
            SessionConfig::from_json(&json).context("failed to parse session config")?
        }
        None => SessionConfig::default().with_timeout(Duration::from_secs(3)),
    };
    tracing::info!(?config, "starting simulator");

    let engine = Arc::new(ScriptedEngine::new());
    let sinks = Sinks::default()
        .with_stream(Arc::new(LogSink {
            channel: channels::STREAM,
        }))
        .with_request(Arc::new(LogSink {
            channel: channels::REQUEST,
        }));
    let plugin = Arc::new(minfo_plugin::init(engine.clone(), sinks, config));

    report(&plugin, method_names::INITIALISE).await?;

    // Request session: a detection arrives half a second in.
    let caller = {
        let plugin = plugin.clone();
        tokio::spawn(async move {
            plugin
                .call(&MethodCall::new(method_names::START_DETECTION))
                .await
        })
    };
    wait_for(&plugin, SessionState::Listening).await?;
    tokio::time::sleep(Duration::from_millis(500)).await;
    engine.detect(SignalBand::Primary, vec![42]);
    print_response(method_names::START_DETECTION, &caller.await?)?;

    // Request session that nobody answers.
    report(&plugin, method_names::START_DETECTION).await?;

    // Stream-only session: three detections from an engine thread.
    report(&plugin, method_names::START_AUDIO_CAPTURE).await?;
    let remote = engine.clone();
    tokio::task::spawn_blocking(move || {
        for code in [7, 8, 9] {
            std::thread::sleep(Duration::from_millis(200));
            remote.detect(SignalBand::Secondary, vec![code, code * 10]);
        }
    })
    .await?;
    report(&plugin, method_names::STOP_AUDIO_CAPTURE).await?;

    let snapshot = plugin.session().snapshot().await?;
    tracing::info!(
        counters = ?snapshot.counters,
        delivery = ?snapshot.delivery,
        dispatched = ?snapshot.dispatched,
        "session_totals"
    );

    plugin.shutdown().await?;
    Ok(())
}

async fn report(plugin: &AudioQrPlugin, method: &str) -> anyhow::Result<()> {
    let response = plugin.call(&MethodCall::new(method)).await;
    print_response(method, &response)
}

fn print_response(method: &str, response: &MethodResponse) -> anyhow::Result<()> {
    let rendered = serde_json::to_string(response)?;
    tracing::info!(method, response = %rendered, "method_response");
    Ok(())
}

async fn wait_for(plugin: &AudioQrPlugin, target: SessionState) -> anyhow::Result<()> {
    let mut states = plugin.session().subscribe();
    while *states.borrow_and_update() != target {
        states
            .changed()
            .await
            .context("session controller stopped")?;
    }
    Ok(())
}
