// src/communication/event_queue.rs

use crate::shared_data::QueueRecord;
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("event queue is closed")]
    Closed,
}

/// Producer side of the event queue. Cheap to clone, one per producer task.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: UnboundedSender<QueueRecord>,
}

/// Consumer side of the event queue. There is exactly one, owned by the aggregator.
#[derive(Debug)]
pub struct EventReceiver {
    rx: UnboundedReceiver<QueueRecord>,
    shutdown: CancellationToken,
}

/// Creates an unbounded multi-producer, single-consumer queue.
///
/// Cancelling `shutdown` makes any pending or future `pop` return `None`.
pub fn event_queue(shutdown: CancellationToken) -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, EventReceiver { rx, shutdown })
}

impl EventSender {
    /// Never blocks. Fails only once the consumer is gone.
    pub fn push(&self, record: QueueRecord) -> Result<(), QueueError> {
        self.tx.send(record).map_err(|_| QueueError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl EventReceiver {
    /// Waits for the next record.
    ///
    /// Returns `None` once shutdown is requested, even if records are still
    /// queued, or once every sender has been dropped.
    pub async fn pop(&mut self) -> Option<QueueRecord> {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => None,
            record = self.rx.recv() => record,
        }
    }

    /// Non-blocking variant of `pop`.
    pub fn try_pop(&mut self) -> Option<QueueRecord> {
        if self.shutdown.is_cancelled() {
            return None;
        }
        self.rx.try_recv().ok()
    }

    /// Records queued but not yet popped.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared_data::{DirectionalCounts, SensorReading};
    use std::collections::HashMap;
    use std::time::Duration;

    fn reading(location: &str, sequence: u64) -> QueueRecord {
        QueueRecord::Sensor(SensorReading {
            location: location.to_string(),
            sequence: Some(sequence),
            timestamp_ms: 0,
            traffic_volume: DirectionalCounts::default(),
            average_speed: 30.0,
            air_quality: 0.5,
        })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_producers_keep_their_own_order() {
        let (tx, mut rx) = event_queue(CancellationToken::new());
        let per_producer = 500u64;

        let mut producers = Vec::new();
        for name in ["sensor-a", "sensor-b", "sensor-c"] {
            let tx = tx.clone();
            producers.push(tokio::spawn(async move {
                for seq in 0..per_producer {
                    tx.push(reading(name, seq)).unwrap();
                    if seq % 50 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            }));
        }
        drop(tx);
        for producer in producers {
            producer.await.unwrap();
        }

        let mut next_expected: HashMap<String, u64> = HashMap::new();
        let mut received = 0;
        while let Some(record) = rx.pop().await {
            let expected = next_expected.entry(record.location().to_string()).or_insert(0);
            assert_eq!(record.sequence(), Some(*expected), "gap, duplicate or reorder");
            *expected += 1;
            received += 1;
        }

        assert_eq!(received, 3 * per_producer);
        assert!(next_expected.values().all(|&n| n == per_producer));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_unblocks_a_waiting_pop() {
        let shutdown = CancellationToken::new();
        let (_tx, mut rx) = event_queue(shutdown.clone());

        let waiter = tokio::spawn(async move { rx.pop().await });
        tokio::time::sleep(Duration::from_secs(5)).await;
        shutdown.cancel();

        assert_eq!(waiter.await.unwrap(), None);
    }

    #[tokio::test]
    async fn shutdown_wins_over_queued_records() {
        let shutdown = CancellationToken::new();
        let (tx, mut rx) = event_queue(shutdown.clone());
        tx.push(reading("a", 0)).unwrap();
        tx.push(reading("a", 1)).unwrap();

        shutdown.cancel();

        assert_eq!(rx.pop().await, None);
        assert_eq!(rx.try_pop(), None);
        assert_eq!(rx.pending(), 2);
    }

    #[test]
    fn push_fails_after_the_consumer_is_dropped() {
        let (tx, rx) = event_queue(CancellationToken::new());
        drop(rx);
        assert!(tx.is_closed());
        assert_eq!(tx.push(reading("a", 0)), Err(QueueError::Closed));
    }
}
