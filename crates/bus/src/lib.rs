//! Sequenced delivery queue.
//!
//! Every item carries a sequence number assigned at send time so the
//! consumer can tell when something went missing. Two modes:
//!
//! - bounded: producers never wait; when the queue is full the newest item
//!   is dropped and counted.
//! - unbounded: nothing is dropped while the receiver is alive. Used where
//!   loss is not acceptable and producers may be non-async threads.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Default queue capacity in items.
pub const DEFAULT_CAPACITY: usize = 64;

/// Smallest capacity a bounded bus is created with.
pub const MIN_CAPACITY: usize = 8;

/// Item wrapped with its send order.
#[derive(Debug, Clone)]
pub struct Envelope<T> {
    /// Monotonic sequence number, assigned at send time.
    pub seq: u64,
    pub payload: T,
}

/// Configuration for a bus.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Requested capacity in items. `None` means unbounded.
    pub capacity: Option<usize>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            capacity: Some(DEFAULT_CAPACITY),
        }
    }
}

impl BusConfig {
    pub fn bounded(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
        }
    }

    pub fn unbounded() -> Self {
        Self { capacity: None }
    }

    fn channel_capacity(&self) -> Option<usize> {
        self.capacity.map(|capacity| capacity.max(MIN_CAPACITY))
    }
}

/// Counters describing what happened to sent items.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct BusStats {
    pub sent: u64,
    pub dropped: u64,
}

enum Tx<T> {
    Bounded(mpsc::Sender<Envelope<T>>),
    Unbounded(mpsc::UnboundedSender<Envelope<T>>),
}

impl<T> Clone for Tx<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Bounded(tx) => Self::Bounded(tx.clone()),
            Self::Unbounded(tx) => Self::Unbounded(tx.clone()),
        }
    }
}

enum Rx<T> {
    Bounded(mpsc::Receiver<Envelope<T>>),
    Unbounded(mpsc::UnboundedReceiver<Envelope<T>>),
}

/// Sender half of the bus.
pub struct BusSender<T> {
    tx: Tx<T>,
    seq_counter: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

impl<T> Clone for BusSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            seq_counter: Arc::clone(&self.seq_counter),
            dropped: Arc::clone(&self.dropped),
        }
    }
}

impl<T> BusSender<T> {
    /// Send an item. Never blocks.
    ///
    /// Returns true if queued. A bounded bus drops the item when full; either
    /// mode drops it once the receiver is gone.
    pub fn send(&self, payload: T) -> bool {
        let seq = self.seq_counter.fetch_add(1, Ordering::Relaxed);
        let envelope = Envelope { seq, payload };

        let closed = match &self.tx {
            Tx::Bounded(tx) => match tx.try_send(envelope) {
                Ok(()) => return true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    // Every 10th drop.
                    if dropped % 10 == 1 {
                        tracing::warn!(dropped, seq, "bus_full_dropping");
                    }
                    return false;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => true,
            },
            Tx::Unbounded(tx) => tx.send(envelope).is_err(),
        };

        if closed {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(seq, "bus_closed");
        }
        !closed
    }

    pub fn is_closed(&self) -> bool {
        match &self.tx {
            Tx::Bounded(tx) => tx.is_closed(),
            Tx::Unbounded(tx) => tx.is_closed(),
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Number of items handed to `send`, queued or not.
    pub fn current_seq(&self) -> u64 {
        self.seq_counter.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> BusStats {
        let dropped = self.dropped();
        BusStats {
            sent: self.current_seq().saturating_sub(dropped),
            dropped,
        }
    }
}

/// Receiver half of the bus.
pub struct BusReceiver<T> {
    rx: Rx<T>,
    last_seq: Option<u64>,
    gaps_detected: u64,
}

impl<T> BusReceiver<T> {
    /// Receive the next item. `None` once every sender is gone, or after
    /// `close` once the queue is drained.
    pub async fn recv(&mut self) -> Option<Envelope<T>> {
        let envelope = match &mut self.rx {
            Rx::Bounded(rx) => rx.recv().await?,
            Rx::Unbounded(rx) => rx.recv().await?,
        };
        self.track(envelope.seq);
        Some(envelope)
    }

    /// Try to receive an item without waiting.
    pub fn try_recv(&mut self) -> Option<Envelope<T>> {
        let envelope = match &mut self.rx {
            Rx::Bounded(rx) => rx.try_recv().ok()?,
            Rx::Unbounded(rx) => rx.try_recv().ok()?,
        };
        self.track(envelope.seq);
        Some(envelope)
    }

    /// Refuse further sends. Items already queued can still be received.
    pub fn close(&mut self) {
        match &mut self.rx {
            Rx::Bounded(rx) => rx.close(),
            Rx::Unbounded(rx) => rx.close(),
        }
    }

    /// Number of sequence numbers skipped so far (dropped items).
    pub fn gaps_detected(&self) -> u64 {
        self.gaps_detected
    }

    fn track(&mut self, seq: u64) {
        if let Some(last) = self.last_seq {
            if seq > last + 1 {
                let gap = seq - last - 1;
                self.gaps_detected += gap;
                tracing::debug!(gap, from = last, to = seq, "bus_gap_detected");
            }
        }
        self.last_seq = Some(seq);
    }
}

/// Sequenced queue with one receiver and any number of senders.
pub struct Bus<T> {
    sender: BusSender<T>,
    receiver: Option<BusReceiver<T>>,
}

impl<T> Bus<T> {
    pub fn new() -> Self {
        Self::with_config(BusConfig::default())
    }

    pub fn unbounded() -> Self {
        Self::with_config(BusConfig::unbounded())
    }

    pub fn with_config(config: BusConfig) -> Self {
        let (tx, rx) = match config.channel_capacity() {
            Some(capacity) => {
                tracing::debug!(capacity, "bus_created");
                let (tx, rx) = mpsc::channel(capacity);
                (Tx::Bounded(tx), Rx::Bounded(rx))
            }
            None => {
                tracing::debug!("unbounded_bus_created");
                let (tx, rx) = mpsc::unbounded_channel();
                (Tx::Unbounded(tx), Rx::Unbounded(rx))
            }
        };

        Self {
            sender: BusSender {
                tx,
                seq_counter: Arc::new(AtomicU64::new(0)),
                dropped: Arc::new(AtomicU64::new(0)),
            },
            receiver: Some(BusReceiver {
                rx,
                last_seq: None,
                gaps_detected: 0,
            }),
        }
    }

    pub fn sender(&self) -> BusSender<T> {
        self.sender.clone()
    }

    /// Take the receiver (can only be called once).
    pub fn take_receiver(&mut self) -> Option<BusReceiver<T>> {
        self.receiver.take()
    }
}

impl<T> Default for Bus<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_capacity_floor() {
        assert_eq!(BusConfig::bounded(2).channel_capacity(), Some(MIN_CAPACITY));
        assert_eq!(BusConfig::bounded(100).channel_capacity(), Some(100));
        assert_eq!(BusConfig::unbounded().channel_capacity(), None);
    }

    #[tokio::test]
    async fn test_send_recv_in_order() {
        let mut bus = Bus::new();
        let sender = bus.sender();
        let mut receiver = bus.take_receiver().unwrap();

        for i in 0..5 {
            assert!(sender.send(i));
        }

        for expected in 0..5u64 {
            let envelope = receiver.recv().await.unwrap();
            assert_eq!(envelope.seq, expected);
            assert_eq!(envelope.payload, expected as i32);
        }
        assert_eq!(receiver.gaps_detected(), 0);
    }

    #[test]
    fn test_full_bus_drops_without_blocking() {
        let mut bus = Bus::with_config(BusConfig::bounded(8));
        let sender = bus.sender();
        let _receiver = bus.take_receiver().unwrap();

        let accepted = (0..20).filter(|i| sender.send(*i)).count();

        assert_eq!(accepted, 8);
        assert_eq!(sender.dropped(), 12);
        assert_eq!(sender.stats(), BusStats { sent: 8, dropped: 12 });
    }

    #[test]
    fn test_unbounded_bus_keeps_every_item() {
        let mut bus = Bus::unbounded();
        let sender = bus.sender();
        let mut receiver = bus.take_receiver().unwrap();

        let accepted = (0..1_000).filter(|i| sender.send(*i)).count();
        let received: Vec<_> = std::iter::from_fn(|| receiver.try_recv())
            .map(|envelope| envelope.payload)
            .collect();

        assert_eq!(accepted, 1_000);
        assert_eq!(received, (0..1_000).collect::<Vec<_>>());
        assert_eq!(sender.stats(), BusStats { sent: 1_000, dropped: 0 });
        assert_eq!(receiver.gaps_detected(), 0);
    }

    #[test]
    fn test_gap_detection_after_drop() {
        let mut bus = Bus::with_config(BusConfig::bounded(8));
        let sender = bus.sender();
        let mut receiver = bus.take_receiver().unwrap();

        for i in 0..10 {
            sender.send(i);
        }
        // Drain the 8 queued items, then the next send lands after the gap.
        while receiver.try_recv().is_some() {}
        sender.send(10);

        let last = receiver.try_recv().unwrap();
        assert_eq!(last.seq, 10);
        assert_eq!(receiver.gaps_detected(), 2);
    }

    #[test]
    fn test_close_keeps_queued_items() {
        let mut bus = Bus::unbounded();
        let sender = bus.sender();
        let mut receiver = bus.take_receiver().unwrap();

        assert!(sender.send("queued"));
        receiver.close();

        assert!(!sender.send("late"));
        assert_eq!(receiver.try_recv().map(|e| e.payload), Some("queued"));
        assert!(receiver.try_recv().is_none());
        assert_eq!(sender.dropped(), 1);
    }

    #[test]
    fn test_send_after_receiver_dropped() {
        let mut bus = Bus::new();
        let sender = bus.sender();
        drop(bus.take_receiver());

        assert!(sender.is_closed());
        assert!(!sender.send("late"));
        assert_eq!(sender.dropped(), 1);
    }
}
