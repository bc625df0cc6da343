//! Serialized execution context for the controller.
//!
//! Public calls, engine callbacks and timer firings all arrive here, from
//! any thread, and are drained by the single controller task in send order.

use minfo_bus::{Bus, BusReceiver, BusSender, BusStats, Envelope};
use minfo_engine::{new_callback, EngineCallback, EngineEvent};
use minfo_events::Failure;
use tokio::sync::oneshot;

use crate::error::{Result, SessionError};
use crate::state::{PendingRequest, SessionId, SessionSnapshot};

pub(crate) enum Command {
    Start {
        id: SessionId,
        /// `None` starts a stream-only session.
        request: Option<PendingRequest>,
        reply: oneshot::Sender<std::result::Result<(), Failure>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    Engine {
        session: SessionId,
        event: EngineEvent,
    },
    Timeout {
        session: SessionId,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Stop { .. } => "stop",
            Self::Engine { .. } => "engine",
            Self::Timeout { .. } => "timeout",
            Self::Snapshot { .. } => "snapshot",
            Self::Shutdown { .. } => "shutdown",
        }
    }
}

/// Producer handle. Cheap to clone, usable from non-async threads.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    tx: BusSender<Command>,
}

impl Dispatcher {
    pub(crate) fn channel() -> (Self, DispatchQueue) {
        let mut bus = Bus::unbounded();
        let tx = bus.sender();
        // A fresh bus always has its receiver.
        let rx = bus.take_receiver();
        (Self { tx }, DispatchQueue { rx })
    }

    /// Enqueue a command. Never blocks or drops; fails only once the queue
    /// is closed.
    pub(crate) fn post(&self, command: Command) -> Result<()> {
        let name = command.name();
        if self.tx.send(command) {
            Ok(())
        } else {
            tracing::debug!(command = name, "dispatch_after_close");
            Err(SessionError::Closed)
        }
    }

    pub(crate) fn stats(&self) -> BusStats {
        self.tx.stats()
    }

    /// Callback handed to the engine for one session.
    ///
    /// Events are tagged with `session` so late events from an earlier
    /// session cannot be mistaken for the current one.
    pub(crate) fn engine_callback(&self, session: SessionId) -> EngineCallback {
        let dispatcher = self.clone();
        new_callback(move |event| {
            // Closed means the controller is gone; the engine may outlive it.
            let _ = dispatcher.post(Command::Engine { session, event });
        })
    }
}

/// Consumer side, owned by the controller task.
pub(crate) struct DispatchQueue {
    rx: Option<BusReceiver<Command>>,
}

impl DispatchQueue {
    pub(crate) async fn next(&mut self) -> Option<Envelope<Command>> {
        self.rx.as_mut()?.recv().await
    }

    pub(crate) fn close(&mut self) {
        if let Some(rx) = self.rx.as_mut() {
            rx.close();
        }
    }

    #[cfg(test)]
    pub(crate) fn try_next(&mut self) -> Option<Envelope<Command>> {
        self.rx.as_mut()?.try_recv()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minfo_engine::{RawDetection, SignalBand};

    #[tokio::test]
    async fn test_commands_drain_in_send_order() {
        let (dispatcher, mut queue) = Dispatcher::channel();
        let session = SessionId::new();

        dispatcher.post(Command::Timeout { session }).unwrap();
        let callback = dispatcher.engine_callback(session);
        callback(EngineEvent::InitFailed);
        dispatcher.post(Command::Timeout { session }).unwrap();

        let seqs: Vec<_> = [
            queue.next().await.unwrap(),
            queue.next().await.unwrap(),
            queue.next().await.unwrap(),
        ]
        .iter()
        .map(|e| (e.seq, e.payload.name()))
        .collect();

        assert_eq!(seqs, vec![(0, "timeout"), (1, "engine"), (2, "timeout")]);
    }

    #[tokio::test]
    async fn test_engine_callback_from_foreign_thread() {
        let (dispatcher, mut queue) = Dispatcher::channel();
        let session = SessionId::new();
        let callback = dispatcher.engine_callback(session);

        std::thread::spawn(move || {
            callback(EngineEvent::Detection(RawDetection::new(
                SignalBand::Primary,
                vec![42],
            )));
        })
        .join()
        .unwrap();

        let envelope = queue.next().await.unwrap();
        match envelope.payload {
            Command::Engine {
                session: tagged,
                event: EngineEvent::Detection(detection),
            } => {
                assert_eq!(tagged, session);
                assert_eq!(detection.codes, vec![42]);
            }
            _ => panic!("expected engine detection"),
        }
    }

    #[tokio::test]
    async fn test_post_after_close_fails() {
        let (dispatcher, mut queue) = Dispatcher::channel();
        queue.close();

        let result = dispatcher.post(Command::Timeout {
            session: SessionId::new(),
        });
        assert!(matches!(result, Err(SessionError::Closed)));
    }
}
