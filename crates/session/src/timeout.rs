//! Single deadline timer for the live session.
//!
//! Firing does not act directly: it posts a `Timeout` command tagged with
//! the session that armed it, so it is ordered against engine events by the
//! dispatcher and ignored if the session is already gone.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::dispatcher::{Command, Dispatcher};
use crate::state::SessionId;

struct ArmedTimer {
    session: SessionId,
    deadline: Instant,
    cancel: CancellationToken,
}

pub(crate) struct TimeoutGuard {
    dispatcher: Dispatcher,
    armed: Option<ArmedTimer>,
}

impl TimeoutGuard {
    pub(crate) fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            armed: None,
        }
    }

    /// Arm the timer for `session`, replacing any previous one.
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn arm(&mut self, session: SessionId, duration: Duration) -> Instant {
        self.disarm();

        let deadline = Instant::now() + duration;
        let cancel = CancellationToken::new();
        let child = cancel.child_token();
        let dispatcher = self.dispatcher.clone();

        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = child.cancelled() => {}
                _ = tokio::time::sleep_until(deadline) => {
                    tracing::debug!(session = %session, "timeout_fired");
                    let _ = dispatcher.post(Command::Timeout { session });
                }
            }
        });

        tracing::trace!(session = %session, ?duration, "timeout_armed");
        self.armed = Some(ArmedTimer {
            session,
            deadline,
            cancel,
        });
        deadline
    }

    /// Cancel the pending timer. Returns whether one was armed.
    pub(crate) fn disarm(&mut self) -> bool {
        let Some(timer) = self.armed.take() else {
            return false;
        };
        timer.cancel.cancel();
        tracing::trace!(session = %timer.session, "timeout_disarmed");
        true
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.armed.as_ref().map(|timer| timer.deadline)
    }
}

impl Drop for TimeoutGuard {
    fn drop(&mut self) {
        self.disarm();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_at_deadline() {
        let (dispatcher, mut queue) = Dispatcher::channel();
        let mut guard = TimeoutGuard::new(dispatcher);
        let session = SessionId::new();
        let started = Instant::now();

        let deadline = guard.arm(session, Duration::from_secs(45));
        assert_eq!(guard.deadline(), Some(deadline));

        let envelope = queue.next().await.unwrap();
        assert!(matches!(
            envelope.payload,
            Command::Timeout { session: fired } if fired == session
        ));
        assert!(started.elapsed() >= Duration::from_secs(45));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarm_prevents_firing() {
        let (dispatcher, mut queue) = Dispatcher::channel();
        let mut guard = TimeoutGuard::new(dispatcher);

        guard.arm(SessionId::new(), Duration::from_secs(1));
        assert!(guard.disarm());
        assert!(!guard.disarm());
        assert_eq!(guard.deadline(), None);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(queue.try_next().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_previous_timer() {
        let (dispatcher, mut queue) = Dispatcher::channel();
        let mut guard = TimeoutGuard::new(dispatcher);
        let first = SessionId::new();
        let second = SessionId::new();

        guard.arm(first, Duration::from_secs(1));
        guard.arm(second, Duration::from_secs(2));

        let envelope = queue.next().await.unwrap();
        assert!(matches!(
            envelope.payload,
            Command::Timeout { session } if session == second
        ));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(queue.try_next().is_none());
    }
}
