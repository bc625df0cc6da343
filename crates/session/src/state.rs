//! Session lifecycle types.

use minfo_bus::BusStats;
use minfo_events::{FailureKind, RequestOutcome};
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::fanout::DeliveryStats;

/// Opaque identifier minted for every start call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SessionId(uuid::Uuid);

impl SessionId {
    pub(crate) fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// `Idle → Preparing → Listening → {Resolved, TimedOut, Failed, Stopped} → Idle`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Idle,
    /// Engine is being configured and started.
    Preparing,
    Listening,
    Resolved,
    TimedOut,
    Failed,
    Stopped,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Resolved | Self::TimedOut | Self::Failed | Self::Stopped
        )
    }

    /// A session exists (Idle and the terminal states have none).
    pub fn is_active(self) -> bool {
        matches!(self, Self::Preparing | Self::Listening)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Preparing => "preparing",
            Self::Listening => "listening",
            Self::Resolved => "resolved",
            Self::TimedOut => "timed_out",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DetectionMode {
    /// A caller waits for one outcome; the session ends on the first match.
    Request,
    /// Detections are streamed until the session is stopped.
    StreamOnly,
}

/// Controller side of an outstanding request. Resolving consumes it.
pub(crate) struct PendingRequest {
    session: SessionId,
    tx: oneshot::Sender<RequestOutcome>,
}

impl PendingRequest {
    pub(crate) fn channel(session: SessionId) -> (Self, PendingOutcome) {
        let (tx, rx) = oneshot::channel();
        (Self { session, tx }, PendingOutcome { session, rx })
    }

    pub(crate) fn resolve(self, outcome: RequestOutcome) {
        tracing::debug!(
            session = %self.session,
            success = outcome.is_success(),
            failure = ?outcome.failure_kind(),
            "request_resolved"
        );
        if self.tx.send(outcome).is_err() {
            tracing::debug!(session = %self.session, "request_caller_gone");
        }
    }
}

/// Caller side of a request: await it for the terminal outcome.
#[derive(Debug)]
pub struct PendingOutcome {
    session: SessionId,
    rx: oneshot::Receiver<RequestOutcome>,
}

impl PendingOutcome {
    pub fn session_id(&self) -> SessionId {
        self.session
    }

    /// Wait for the session's single outcome.
    ///
    /// If the controller goes away first, this reports `Stopped`.
    pub async fn wait(self) -> RequestOutcome {
        self.rx.await.unwrap_or_else(|_| {
            RequestOutcome::failure(FailureKind::Stopped, "detection session closed")
        })
    }

    /// Take the outcome if it has already been delivered.
    pub fn try_outcome(&mut self) -> Option<RequestOutcome> {
        self.rx.try_recv().ok()
    }
}

/// The live session, owned by the controller.
pub(crate) struct DetectionSession {
    pub(crate) id: SessionId,
    pub(crate) mode: DetectionMode,
    pub(crate) started_at: Instant,
    pub(crate) pending: Option<PendingRequest>,
}

impl DetectionSession {
    pub(crate) fn new(id: SessionId, pending: Option<PendingRequest>) -> Self {
        let mode = if pending.is_some() {
            DetectionMode::Request
        } else {
            DetectionMode::StreamOnly
        };
        Self {
            id,
            mode,
            started_at: Instant::now(),
            pending,
        }
    }
}

/// Running totals kept by the controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionCounters {
    pub sessions_started: u64,
    /// Detections forwarded to the stream sink.
    pub detections: u64,
    /// Detections dropped for carrying no codes.
    pub invalid_detections: u64,
    /// Engine events and timer firings that arrived for no live session.
    pub stale_events: u64,
    pub timeouts: u64,
}

/// Point-in-time view of the controller.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub session_id: Option<SessionId>,
    pub mode: Option<DetectionMode>,
    pub has_pending_request: bool,
    pub deadline: Option<Instant>,
    pub counters: SessionCounters,
    /// Notifications handed to the stream and request sinks.
    pub delivery: DeliveryStats,
    /// Commands queued to the controller.
    pub dispatched: BusStats,
}
