//! Session state machine.
//!
//! The controller runs as one tokio task draining the dispatcher queue, so
//! every transition, resolution and engine call happens in a single total
//! order. `SessionHandle` is the only way in.

use std::sync::Arc;

use minfo_engine::{EngineAdapter, EngineError, EngineEvent, RawDetection};
use minfo_events::{Failure, FailureKind, RequestOutcome};
use tokio::sync::{oneshot, watch};

use crate::config::{ReentryPolicy, SessionConfig};
use crate::dispatcher::{Command, DispatchQueue, Dispatcher};
use crate::error::{Result, SessionError};
use crate::fanout::{Delivery, EventBus, Sinks};
use crate::state::{
    DetectionMode, DetectionSession, PendingOutcome, PendingRequest, SessionCounters, SessionId,
    SessionSnapshot, SessionState,
};
use crate::timeout::TimeoutGuard;

pub struct SessionController {
    engine: Arc<dyn EngineAdapter>,
    config: SessionConfig,
    dispatcher: Dispatcher,
    guard: TimeoutGuard,
    events: EventBus,
    session: Option<DetectionSession>,
    state: SessionState,
    state_tx: watch::Sender<SessionState>,
    counters: SessionCounters,
}

impl SessionController {
    /// Spawn the controller task and return a handle to it.
    ///
    /// Must be called from within a tokio runtime. The task runs until
    /// `SessionHandle::shutdown`.
    pub fn spawn(
        engine: Arc<dyn EngineAdapter>,
        sinks: Sinks,
        config: SessionConfig,
    ) -> SessionHandle {
        let (dispatcher, queue) = Dispatcher::channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);

        let controller = Self {
            engine,
            events: EventBus::new(sinks),
            guard: TimeoutGuard::new(dispatcher.clone()),
            config,
            dispatcher: dispatcher.clone(),
            session: None,
            state: SessionState::Idle,
            state_tx,
            counters: SessionCounters::default(),
        };

        tokio::spawn(controller.run(queue));

        SessionHandle {
            dispatcher,
            state_rx,
        }
    }

    async fn run(mut self, mut queue: DispatchQueue) {
        tracing::info!(
            timeout = ?self.config.detection_timeout,
            policy = ?self.config.reentry_policy,
            "session_controller_started"
        );

        while let Some(envelope) = queue.next().await {
            tracing::trace!(seq = envelope.seq, state = %self.state, "dispatch");

            match envelope.payload {
                Command::Start { id, request, reply } => {
                    let result = self.start(id, request);
                    let _ = reply.send(result);
                }
                Command::Stop { reply } => {
                    self.stop();
                    let _ = reply.send(());
                }
                Command::Engine { session, event } => self.on_engine_event(session, event),
                Command::Timeout { session } => self.on_timeout(session),
                Command::Snapshot { reply } => {
                    let _ = reply.send(self.snapshot());
                }
                Command::Shutdown { reply } => {
                    self.stop();
                    queue.close();
                    let _ = reply.send(());
                    break;
                }
            }
        }

        tracing::info!(counters = ?self.counters, "session_controller_stopped");
    }

    fn start(
        &mut self,
        id: SessionId,
        mut request: Option<PendingRequest>,
    ) -> std::result::Result<(), Failure> {
        if let Some(active) = &self.session {
            match self.config.reentry_policy {
                ReentryPolicy::Reject => {
                    tracing::info!(session = %id, active = %active.id, "session_rejected");
                    let failure = Failure::new(
                        FailureKind::DetectionInProgress,
                        "A detection session is already running",
                    );
                    if let Some(request) = request.take() {
                        request.resolve(RequestOutcome::Failure(failure.clone()));
                    }
                    return Err(failure);
                }
                ReentryPolicy::Replace => {
                    tracing::info!(session = %id, replaced = %active.id, "session_replaced");
                    self.finish(
                        SessionState::Stopped,
                        Some(Failure::new(
                            FailureKind::Stopped,
                            "Detection superseded by a new request",
                        )),
                        true,
                    );
                }
            }
        }

        self.counters.sessions_started += 1;
        self.session = Some(DetectionSession::new(id, request));
        self.transition(SessionState::Preparing);

        let callback = self.dispatcher.engine_callback(id);
        let started = self
            .engine
            .configure(&self.config.engine, callback)
            .and_then(|()| self.engine.start());

        if let Err(e) = started {
            tracing::warn!(session = %id, error = %e, "engine_start_failed");
            let kind = match e {
                EngineError::Unavailable(_) => FailureKind::EngineUnavailable,
                EngineError::ConfigurationRejected(_) | EngineError::StartFailed(_) => {
                    FailureKind::InitializationFailed
                }
            };
            let failure = Failure::new(kind, e.to_string());
            self.finish(SessionState::Failed, Some(failure.clone()), false);
            return Err(failure);
        }

        let timeout = self.config.detection_timeout;
        let mode = self.session.as_ref().map(|s| s.mode);
        let timed = match mode {
            Some(DetectionMode::Request) => true,
            Some(DetectionMode::StreamOnly) => self.config.stream_only_timeout,
            None => false,
        };
        if timed {
            self.guard.arm(id, timeout);
        }

        self.transition(SessionState::Listening);
        tracing::info!(session = %id, ?mode, deadline = ?self.guard.deadline(), "session_started");
        Ok(())
    }

    fn stop(&mut self) {
        if !self.state.is_active() {
            tracing::debug!("stop_while_idle");
            return;
        }
        self.finish(
            SessionState::Stopped,
            Some(Failure::new(FailureKind::Stopped, "Detection stopped")),
            true,
        );
    }

    fn on_engine_event(&mut self, session: SessionId, event: EngineEvent) {
        if !self.is_listening(session) {
            self.counters.stale_events += 1;
            tracing::debug!(session = %session, state = %self.state, "engine_event_dropped");
            return;
        }

        match event {
            EngineEvent::Detection(detection) => self.on_detection(session, &detection),
            EngineEvent::InitFailed => {
                tracing::warn!(session = %session, "engine_init_failed");
                self.finish(
                    SessionState::Failed,
                    Some(Failure::new(
                        FailureKind::InitializationFailed,
                        "Microphone initialization failed",
                    )),
                    true,
                );
            }
        }
    }

    fn on_detection(&mut self, session: SessionId, detection: &RawDetection) {
        let Some(live) = self.session.as_mut() else {
            return;
        };

        match self.events.publish(detection, &mut live.pending) {
            Ok(Delivery::Streamed) => {
                self.counters.detections += 1;
                tracing::debug!(session = %session, codes = ?detection.codes, "detection_streamed");
            }
            Ok(Delivery::Resolved) => {
                self.counters.detections += 1;
                tracing::info!(session = %session, codes = ?detection.codes, "detection_resolved");
                self.finish(SessionState::Resolved, None, true);
            }
            Err(e) => {
                self.counters.invalid_detections += 1;
                tracing::warn!(
                    session = %session,
                    band = ?detection.band,
                    code = e.kind().code(),
                    error = %e,
                    "detection_dropped"
                );
            }
        }
    }

    fn on_timeout(&mut self, session: SessionId) {
        if !self.is_listening(session) {
            self.counters.stale_events += 1;
            tracing::debug!(session = %session, "timeout_ignored");
            return;
        }

        self.counters.timeouts += 1;
        let timeout = self.config.detection_timeout;
        tracing::info!(session = %session, ?timeout, "session_timed_out");
        self.finish(
            SessionState::TimedOut,
            Some(Failure::new(
                FailureKind::Timeout,
                format!("No signal detected within {}s", timeout.as_secs()),
            )),
            true,
        );
    }

    /// End the live session: disarm, optionally stop the engine, resolve any
    /// waiting caller, then pass through `terminal` back to `Idle`.
    fn finish(&mut self, terminal: SessionState, failure: Option<Failure>, stop_engine: bool) {
        debug_assert!(terminal.is_terminal());
        let Some(mut session) = self.session.take() else {
            return;
        };

        self.guard.disarm();
        if stop_engine {
            self.engine.stop();
        }

        if let Some(request) = session.pending.take() {
            let failure = failure
                .unwrap_or_else(|| Failure::new(FailureKind::Stopped, "Detection stopped"));
            request.resolve(RequestOutcome::Failure(failure));
        }

        self.transition(terminal);
        tracing::info!(
            session = %session.id,
            outcome = %terminal,
            elapsed = ?session.started_at.elapsed(),
            "session_finished"
        );
        self.transition(SessionState::Idle);
    }

    fn is_listening(&self, session: SessionId) -> bool {
        self.state == SessionState::Listening
            && self.session.as_ref().is_some_and(|live| live.id == session)
    }

    fn transition(&mut self, to: SessionState) {
        tracing::trace!(from = %self.state, to = %to, "transition");
        self.state = to;
        self.state_tx.send_replace(to);
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            session_id: self.session.as_ref().map(|s| s.id),
            mode: self.session.as_ref().map(|s| s.mode),
            has_pending_request: self
                .session
                .as_ref()
                .is_some_and(|s| s.pending.is_some()),
            deadline: self.guard.deadline(),
            counters: self.counters,
            delivery: self.events.stats(),
            dispatched: self.dispatcher.stats(),
        }
    }
}

/// Cloneable entry point to a running controller.
#[derive(Clone)]
pub struct SessionHandle {
    dispatcher: Dispatcher,
    state_rx: watch::Receiver<SessionState>,
}

impl SessionHandle {
    /// Start a request session.
    ///
    /// Returns once the engine is listening (or failed to start). The
    /// returned `PendingOutcome` yields the single terminal outcome; start
    /// failures are already resolved into it.
    pub async fn start_detection(&self) -> Result<PendingOutcome> {
        let id = SessionId::new();
        let (request, outcome) = PendingRequest::channel(id);
        let (reply, rx) = oneshot::channel();
        self.dispatcher.post(Command::Start {
            id,
            request: Some(request),
            reply,
        })?;
        // A refused start has already resolved `outcome` with its failure.
        let _refused = rx.await.map_err(|_| SessionError::Closed)?;
        Ok(outcome)
    }

    /// Start a request session and wait for its outcome.
    pub async fn detect(&self) -> Result<RequestOutcome> {
        Ok(self.start_detection().await?.wait().await)
    }

    /// Start a stream-only session: detections are streamed until stopped.
    pub async fn start_listening(&self) -> Result<SessionId> {
        let id = SessionId::new();
        let (reply, rx) = oneshot::channel();
        self.dispatcher.post(Command::Start {
            id,
            request: None,
            reply,
        })?;
        rx.await.map_err(|_| SessionError::Closed)??;
        Ok(id)
    }

    /// Stop the active session. A no-op when idle.
    pub async fn stop_detection(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.dispatcher.post(Command::Stop { reply })?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.dispatcher.post(Command::Snapshot { reply })?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Last published state.
    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Stop any active session and end the controller task.
    pub async fn shutdown(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.dispatcher.post(Command::Shutdown { reply })?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    #[cfg(test)]
    pub(crate) fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}
