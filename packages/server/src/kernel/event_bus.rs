//! In-process pub/sub of job lifecycle events.
//!
//! A single broadcast channel shared by every publisher and subscriber.
//! Delivery is best-effort: `publish` never blocks, and a subscriber that
//! falls more than the buffer capacity behind loses the oldest events
//! (operator observability is not correctness).

use tokio::sync::broadcast;

use super::jobs::JobEvent;

const DEFAULT_CAPACITY: usize = 256;

/// Process-wide broadcaster for [`JobEvent`]s.
///
/// Thread-safe and cloneable; clones share the same channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<JobEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a bus with a specific per-subscriber buffer capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event to every live subscription.
    ///
    /// Never blocks. A send with no active receivers is a no-op.
    pub fn publish(&self, event: JobEvent) {
        // Ignore send errors (no active receivers)
        let _ = self.tx.send(event);
    }

    /// Attach a new subscription. Dropping the receiver detaches it.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::jobs::{JobEvent, JobEventKind};

    fn event(kind: JobEventKind) -> JobEvent {
        JobEvent {
            kind,
            job_id: uuid::Uuid::new_v4(),
            tenant_id: "acme".to_string(),
            trace_id: "trace-1".to_string(),
            timestamp: chrono::Utc::now(),
            payload: None,
        }
    }

    #[tokio::test]
    async fn publish_subscribe_roundtrip() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        let sent = event(JobEventKind::JobSubmitted);
        bus.publish(sent.clone());

        let received = rx.recv().await.unwrap();
        assert_eq!(received.kind, JobEventKind::JobSubmitted);
        assert_eq!(received.job_id, sent.job_id);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_noop() {
        let bus = EventBus::new();
        // Should not panic or block
        bus.publish(event(JobEventKind::JobStarted));
    }

    #[tokio::test]
    async fn multiple_subscribers_each_receive() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(event(JobEventKind::JobCompleted));

        assert_eq!(rx1.recv().await.unwrap().kind, JobEventKind::JobCompleted);
        assert_eq!(rx2.recv().await.unwrap().kind, JobEventKind::JobCompleted);
    }

    #[tokio::test]
    async fn slow_subscriber_drops_oldest_events() {
        let bus = EventBus::with_capacity(2);
        let mut rx = bus.subscribe();

        for _ in 0..5 {
            bus.publish(event(JobEventKind::JobRetry));
        }
        let last = event(JobEventKind::JobDlq);
        bus.publish(last.clone());

        // The first read observes the lag, later reads catch up to the
        // newest events.
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
        let mut final_kind = None;
        while let Ok(ev) = rx.try_recv() {
            final_kind = Some(ev.kind);
        }
        assert_eq!(final_kind, Some(JobEventKind::JobDlq));
    }

    #[tokio::test]
    async fn dropping_receiver_detaches_subscription() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        drop(rx);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
