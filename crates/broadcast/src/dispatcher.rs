//! Broadcast Dispatcher Implementation

use crate::event::AlarmEvent;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

/// Identifier handed out by [`BroadcastDispatcher::connect`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A connected subscriber's end of the channel
pub struct Subscription {
    pub id: SubscriberId,
    pub receiver: mpsc::Receiver<Arc<AlarmEvent>>,
}

/// Outcome of one broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub pruned: usize,
}

type Senders = HashMap<SubscriberId, mpsc::Sender<Arc<AlarmEvent>>>;

/// Fan-out publisher
pub struct BroadcastDispatcher {
    subscribers: Mutex<Senders>,
    next_id: AtomicU64,
    buffer: usize,
}

impl BroadcastDispatcher {
    /// Create a dispatcher whose subscribers buffer up to `buffer` events
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    fn subscribers(&self) -> MutexGuard<'_, Senders> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new subscriber
    pub fn connect(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));

        let count = {
            let mut subscribers = self.subscribers();
            subscribers.insert(id, tx);
            subscribers.len()
        };
        metrics::gauge!("broadcast_subscribers").set(count as f64);
        info!("Subscriber {} connected, {} active", id, count);

        Subscription { id, receiver: rx }
    }

    /// Remove a subscriber. Returns false if it was already gone.
    pub fn disconnect(&self, id: SubscriberId) -> bool {
        let (removed, count) = {
            let mut subscribers = self.subscribers();
            (subscribers.remove(&id).is_some(), subscribers.len())
        };
        if removed {
            metrics::gauge!("broadcast_subscribers").set(count as f64);
            info!("Subscriber {} disconnected, {} active", id, count);
        }
        removed
    }

    /// Push `event` to every subscriber without waiting on any of them.
    ///
    /// The lock is only held to copy the sender list and to prune; sends
    /// happen outside it.
    pub fn broadcast(&self, event: AlarmEvent) -> BroadcastReport {
        let event = Arc::new(event);
        let targets: Vec<_> = self
            .subscribers()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut report = BroadcastReport::default();
        let mut failed = Vec::new();
        for (id, tx) in targets {
            match tx.try_send(Arc::clone(&event)) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!("Subscriber {} is not keeping up, dropping it", id);
                    failed.push(id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Subscriber {} went away", id);
                    failed.push(id);
                }
            }
        }

        if !failed.is_empty() {
            let count = {
                let mut subscribers = self.subscribers();
                for id in &failed {
                    if subscribers.remove(id).is_some() {
                        report.pruned += 1;
                    }
                }
                subscribers.len()
            };
            metrics::gauge!("broadcast_subscribers").set(count as f64);
            metrics::counter!("broadcast_pruned_total").increment(report.pruned as u64);
        }

        info!(
            alarm_id = %event.alarm_id,
            "Broadcast {:?} event to {} subscribers ({} pruned)",
            event.kind, report.delivered, report.pruned
        );
        report
    }

    /// Number of connected subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers().len()
    }
}

impl Default for BroadcastDispatcher {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use alarm_tracker::{AlarmId, CameraId, Scenario};
    use chrono::Utc;
    use storage::AlarmStatus;

    fn event(id: i64) -> AlarmEvent {
        AlarmEvent {
            kind: EventKind::Opened,
            alarm_id: AlarmId(id),
            camera_id: CameraId(1),
            scenario: Scenario::AreaIntrusion,
            scenario_code: 1,
            status: AlarmStatus::Open,
            started_at: Utc::now(),
            ended_at: None,
            snapshot_urls: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_fan_out() {
        let dispatcher = BroadcastDispatcher::new(4);
        let mut a = dispatcher.connect();
        let mut b = dispatcher.connect();
        assert_ne!(a.id, b.id);

        let report = dispatcher.broadcast(event(1));
        assert_eq!(report, BroadcastReport { delivered: 2, pruned: 0 });
        assert_eq!(a.receiver.recv().await.unwrap().alarm_id, AlarmId(1));
        assert_eq!(b.receiver.recv().await.unwrap().alarm_id, AlarmId(1));
    }

    #[tokio::test]
    async fn test_closed_subscriber_is_pruned() {
        let dispatcher = BroadcastDispatcher::new(4);
        let mut alive = dispatcher.connect();
        let dead = dispatcher.connect();
        drop(dead.receiver);

        let report = dispatcher.broadcast(event(2));
        assert_eq!(report, BroadcastReport { delivered: 1, pruned: 1 });
        assert_eq!(dispatcher.subscriber_count(), 1);
        assert!(alive.receiver.recv().await.is_some());

        // Pruned subscribers are not retried
        let report = dispatcher.broadcast(event(3));
        assert_eq!(report, BroadcastReport { delivered: 1, pruned: 0 });
    }

    #[tokio::test]
    async fn test_slow_subscriber_is_pruned() {
        let dispatcher = BroadcastDispatcher::new(1);
        let _slow = dispatcher.connect();

        assert_eq!(dispatcher.broadcast(event(1)).delivered, 1);
        let report = dispatcher.broadcast(event(2));
        assert_eq!(report, BroadcastReport { delivered: 0, pruned: 1 });
        assert_eq!(dispatcher.subscriber_count(), 0);
    }

    #[test]
    fn test_disconnect() {
        let dispatcher = BroadcastDispatcher::default();
        let sub = dispatcher.connect();
        assert!(dispatcher.disconnect(sub.id));
        assert!(!dispatcher.disconnect(sub.id));
        assert_eq!(dispatcher.broadcast(event(1)), BroadcastReport::default());
    }
}
