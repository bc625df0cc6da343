//! Event bus fanning detections out to the two consumer channels.
//!
//! Runs on the controller task, so stream emission, the request-channel
//! notification and request resolution for one detection happen in that
//! order and in the same total order as every other session effect. Sinks
//! must not block (see `EventSink::emit`); their failures are logged and
//! never reach session state.

use minfo_engine::RawDetection;
use minfo_events::{
    encode, method_names, EventSinkRef, InvalidDetection, RequestOutcome,
};
use serde::Serialize;

use crate::state::PendingRequest;

/// Outbound channels. Either may be absent.
#[derive(Clone, Default)]
pub struct Sinks {
    /// Receives `onDetectedId` tuples.
    pub stream: Option<EventSinkRef>,
    /// Receives `onSignalDetected` notifications.
    pub request: Option<EventSinkRef>,
}

impl Sinks {
    pub fn with_stream(mut self, sink: EventSinkRef) -> Self {
        self.stream = Some(sink);
        self
    }

    pub fn with_request(mut self, sink: EventSinkRef) -> Self {
        self.request = Some(sink);
        self
    }
}

/// What `publish` did with a valid detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    /// Streamed only; no request was waiting.
    Streamed,
    /// Streamed and the pending request was resolved.
    Resolved,
}

/// Sink-side delivery totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryStats {
    /// Notifications accepted by a sink.
    pub delivered: u64,
    /// Notifications a sink rejected or that could not be encoded.
    pub failed: u64,
}

pub(crate) struct EventBus {
    sinks: Sinks,
    stats: DeliveryStats,
}

impl EventBus {
    pub(crate) fn new(sinks: Sinks) -> Self {
        Self {
            sinks,
            stats: DeliveryStats::default(),
        }
    }

    /// Route one detection.
    ///
    /// The stream tuple goes out first, then the request-channel
    /// notification. If `pending` holds a request it is then taken and
    /// resolved with the match. Invalid detections leave `pending`
    /// untouched and emit nothing.
    pub(crate) fn publish(
        &mut self,
        detection: &RawDetection,
        pending: &mut Option<PendingRequest>,
    ) -> Result<Delivery, InvalidDetection> {
        let encoded = encode(detection)?;

        let stream = self.sinks.stream.clone();
        self.emit(stream.as_ref(), method_names::ON_DETECTED_ID, &encoded.stream);
        let request = self.sinks.request.clone();
        self.emit(
            request.as_ref(),
            method_names::ON_SIGNAL_DETECTED,
            &encoded.notification,
        );

        match pending.take() {
            Some(request) => {
                request.resolve(RequestOutcome::Success(encoded.signal));
                Ok(Delivery::Resolved)
            }
            None => Ok(Delivery::Streamed),
        }
    }

    pub(crate) fn stats(&self) -> DeliveryStats {
        self.stats
    }

    fn emit(&mut self, sink: Option<&EventSinkRef>, method: &str, payload: &impl Serialize) {
        let Some(sink) = sink else {
            return;
        };

        let payload = match serde_json::to_value(payload) {
            Ok(payload) => payload,
            Err(e) => {
                self.stats.failed += 1;
                tracing::warn!(method, error = %e, "notification_encode_failed");
                return;
            }
        };

        match sink.emit(method, payload) {
            Ok(()) => self.stats.delivered += 1,
            Err(e) => {
                self.stats.failed += 1;
                tracing::debug!(method, error = %e, "notification_not_delivered");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SessionId;
    use minfo_engine::SignalBand;
    use minfo_events::{EmitError, EventSink, InMemoryEventSink, NullEventSink};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn detection(codes: Vec<i64>) -> RawDetection {
        let at = chrono::DateTime::from_timestamp(1_700_000_001, 0).unwrap();
        RawDetection::new(SignalBand::Primary, codes).captured_at(at)
    }

    /// Records the order methods are emitted in.
    struct OrderSink {
        seen: Mutex<Vec<String>>,
    }

    impl EventSink for OrderSink {
        fn emit(&self, method: &str, _payload: serde_json::Value) -> Result<(), EmitError> {
            if let Ok(mut seen) = self.seen.lock() {
                seen.push(method.to_string());
            }
            Ok(())
        }
    }

    #[test]
    fn test_streams_without_request() {
        let stream = Arc::new(InMemoryEventSink::new());
        let request = Arc::new(InMemoryEventSink::new());
        let mut bus = EventBus::new(
            Sinks::default()
                .with_stream(stream.clone())
                .with_request(request.clone()),
        );

        let mut pending = None;
        let delivery = bus.publish(&detection(vec![42, 43]), &mut pending).unwrap();

        assert_eq!(delivery, Delivery::Streamed);
        assert_eq!(stream.payloads_for("onDetectedId"), vec![json!([0, 42, 1, 1_700_000_001])]);
        assert_eq!(
            request.payloads_for("onSignalDetected"),
            vec![json!({"type": "SoundCode", "codes": "42_43"})]
        );
        assert_eq!(bus.stats(), DeliveryStats { delivered: 2, failed: 0 });
    }

    #[tokio::test]
    async fn test_stream_emitted_before_request_resolves() {
        let sink = Arc::new(OrderSink {
            seen: Mutex::new(Vec::new()),
        });
        let mut bus = EventBus::new(
            Sinks::default()
                .with_stream(sink.clone())
                .with_request(sink.clone()),
        );
        let (request, mut outcome) = PendingRequest::channel(SessionId::new());
        let mut pending = Some(request);

        bus.publish(&detection(vec![42]), &mut pending).unwrap();

        // Both notifications are already out when the outcome is readable.
        let resolved = outcome.try_outcome().unwrap();
        assert!(resolved.is_success());
        assert_eq!(
            *sink.seen.lock().unwrap(),
            vec!["onDetectedId".to_string(), "onSignalDetected".to_string()]
        );
    }

    #[tokio::test]
    async fn test_resolves_pending_request_once() {
        let mut bus = EventBus::new(Sinks::default());
        let (request, outcome) = PendingRequest::channel(SessionId::new());
        let mut pending = Some(request);

        let first = bus.publish(&detection(vec![42]), &mut pending).unwrap();
        let second = bus.publish(&detection(vec![43]), &mut pending).unwrap();

        assert_eq!(first, Delivery::Resolved);
        assert_eq!(second, Delivery::Streamed);
        let signal = outcome.wait().await.into_result().unwrap();
        assert_eq!(signal.signature, "42");
    }

    #[test]
    fn test_invalid_detection_keeps_request() {
        let stream = Arc::new(InMemoryEventSink::new());
        let mut bus = EventBus::new(Sinks::default().with_stream(stream.clone()));
        let (request, _outcome) = PendingRequest::channel(SessionId::new());
        let mut pending = Some(request);

        let result = bus.publish(&detection(vec![]), &mut pending);

        assert_eq!(result, Err(InvalidDetection));
        assert!(pending.is_some());
        assert!(stream.is_empty());
    }

    #[test]
    fn test_failing_sink_is_swallowed() {
        let request = Arc::new(InMemoryEventSink::new());
        let mut bus = EventBus::new(
            Sinks::default()
                .with_stream(Arc::new(NullEventSink))
                .with_request(request.clone()),
        );

        let mut pending = None;
        bus.publish(&detection(vec![1]), &mut pending).unwrap();
        bus.publish(&detection(vec![2]), &mut pending).unwrap();

        assert_eq!(request.len(), 2);
        assert_eq!(bus.stats(), DeliveryStats { delivered: 2, failed: 2 });
    }

    #[test]
    fn test_burst_is_never_dropped() {
        let stream = Arc::new(InMemoryEventSink::new());
        let mut bus = EventBus::new(Sinks::default().with_stream(stream.clone()));

        let mut pending = None;
        for code in 0..500 {
            bus.publish(&detection(vec![code]), &mut pending).unwrap();
        }

        assert_eq!(stream.payloads_for("onDetectedId").len(), 500);
        assert_eq!(bus.stats().failed, 0);
    }
}
