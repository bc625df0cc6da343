//! In-process engine driven by hand.
//!
//! Stands in for the native engine in tests and the simulator: calls are
//! counted, failures can be scripted, and events are injected with `emit`
//! from whichever thread the caller is on.

use std::sync::Mutex;

use crate::{
    EngineAdapter, EngineCallback, EngineError, EngineEvent, EngineSettings, RawDetection, Result,
    SignalBand,
};

const SCRIPTED_VERSION: &str = "scripted";

#[derive(Default)]
struct ScriptState {
    callback: Option<EngineCallback>,
    settings: Option<EngineSettings>,
    running: bool,
    configure_calls: usize,
    start_calls: usize,
    stop_calls: usize,
    unavailable: Option<String>,
    configure_error: Option<EngineError>,
    start_error: Option<EngineError>,
}

#[derive(Default)]
pub struct ScriptedEngine {
    state: Mutex<ScriptState>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// An engine whose library is missing: every call reports `Unavailable`.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        let engine = Self::default();
        engine.with_state(|s| s.unavailable = Some(reason.into()));
        engine
    }

    /// Make the next and all later `configure` calls fail.
    pub fn fail_configure(&self, reason: impl Into<String>) {
        let error = EngineError::ConfigurationRejected(reason.into());
        self.with_state(|s| s.configure_error = Some(error));
    }

    /// Make the next and all later `start` calls fail.
    pub fn fail_start(&self, reason: impl Into<String>) {
        let error = EngineError::StartFailed(reason.into());
        self.with_state(|s| s.start_error = Some(error));
    }

    /// Invoke the installed callback. Returns false if nothing was configured.
    ///
    /// Works after `stop` too, since real engines deliver late events.
    pub fn emit(&self, event: EngineEvent) -> bool {
        let Some(callback) = self.callback() else {
            tracing::debug!(?event, "scripted_emit_without_callback");
            return false;
        };
        callback(event);
        true
    }

    pub fn detect(&self, band: SignalBand, codes: impl Into<Vec<i64>>) -> bool {
        self.emit(EngineEvent::Detection(RawDetection::new(band, codes)))
    }

    pub fn fail_init(&self) -> bool {
        self.emit(EngineEvent::InitFailed)
    }

    /// The callback from the most recent `configure`.
    pub fn callback(&self) -> Option<EngineCallback> {
        self.read_state(|s| s.callback.clone())
    }

    pub fn last_settings(&self) -> Option<EngineSettings> {
        self.read_state(|s| s.settings)
    }

    pub fn is_running(&self) -> bool {
        self.read_state(|s| s.running)
    }

    pub fn configure_calls(&self) -> usize {
        self.read_state(|s| s.configure_calls)
    }

    pub fn start_calls(&self) -> usize {
        self.read_state(|s| s.start_calls)
    }

    pub fn stop_calls(&self) -> usize {
        self.read_state(|s| s.stop_calls)
    }

    fn with_state(&self, f: impl FnOnce(&mut ScriptState)) {
        if let Ok(mut guard) = self.state.lock() {
            f(&mut guard);
        }
    }

    fn read_state<R: Default>(&self, f: impl FnOnce(&ScriptState) -> R) -> R {
        self.state.lock().map(|guard| f(&guard)).unwrap_or_default()
    }

    fn check_available(state: &ScriptState) -> Result<()> {
        match &state.unavailable {
            Some(reason) => Err(EngineError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }
}

impl EngineAdapter for ScriptedEngine {
    fn version(&self) -> Result<String> {
        let guard = self
            .state
            .lock()
            .map_err(|_| EngineError::Unavailable("engine state poisoned".into()))?;
        Self::check_available(&guard)?;
        Ok(SCRIPTED_VERSION.to_string())
    }

    fn configure(&self, settings: &EngineSettings, callback: EngineCallback) -> Result<()> {
        let mut guard = self
            .state
            .lock()
            .map_err(|_| EngineError::Unavailable("engine state poisoned".into()))?;
        guard.configure_calls += 1;
        Self::check_available(&guard)?;
        if let Some(error) = guard.configure_error.clone() {
            return Err(error);
        }
        guard.settings = Some(*settings);
        guard.callback = Some(callback);
        Ok(())
    }

    fn start(&self) -> Result<()> {
        let mut guard = self
            .state
            .lock()
            .map_err(|_| EngineError::Unavailable("engine state poisoned".into()))?;
        guard.start_calls += 1;
        Self::check_available(&guard)?;
        if let Some(error) = guard.start_error.clone() {
            return Err(error);
        }
        guard.running = true;
        Ok(())
    }

    fn stop(&self) {
        self.with_state(|s| {
            s.stop_calls += 1;
            s.running = false;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_emit_reaches_callback_from_other_thread() {
        let engine = Arc::new(ScriptedEngine::new());
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);

        engine
            .configure(
                &EngineSettings::default(),
                crate::new_callback(move |_event| {
                    seen_clone.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        engine.start().unwrap();

        let remote = Arc::clone(&engine);
        std::thread::spawn(move || remote.detect(SignalBand::Primary, vec![1]))
            .join()
            .unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_emit_without_configure() {
        let engine = ScriptedEngine::new();
        assert!(!engine.fail_init());
    }

    #[test]
    fn test_unavailable_engine() {
        let engine = ScriptedEngine::unavailable("missing native library");
        assert!(matches!(engine.version(), Err(EngineError::Unavailable(_))));
        let result = engine.configure(&EngineSettings::default(), crate::new_callback(|_| {}));
        assert!(matches!(result, Err(EngineError::Unavailable(_))));
        assert_eq!(engine.configure_calls(), 1);
    }

    #[test]
    fn test_scripted_start_failure() {
        let engine = ScriptedEngine::new();
        engine.fail_start("mic busy");
        engine
            .configure(&EngineSettings::default(), crate::new_callback(|_| {}))
            .unwrap();
        assert_eq!(
            engine.start(),
            Err(EngineError::StartFailed("mic busy".into()))
        );
        assert!(!engine.is_running());
    }

    #[test]
    fn test_stop_is_counted_and_idempotent() {
        let engine = ScriptedEngine::new();
        engine.stop();
        engine.stop();
        assert_eq!(engine.stop_calls(), 2);
        assert!(!engine.is_running());
    }
}
