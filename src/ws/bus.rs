//! Broadcast channels for inbound messages and connection status.
//!
//! Both buses hand out independent subscriptions. Dropping a subscription (or calling
//! `unsubscribe`) only removes that listener; it never affects the transport.

use std::sync::{Mutex, PoisonError};

use async_stream::try_stream;
use futures::Stream;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use super::codec::MessageEnvelope;
use super::config::MAX_MESSAGE_CAPACITY;
use super::error::WsError;
use crate::Result;

/// Status transitions retained for slow subscribers. Only the latest value matters, so
/// a small buffer is enough.
const STATUS_CAPACITY: usize = 64;

/// Fan-out of decoded envelopes to every current subscriber.
///
/// Delivery is in publish order with no history: a subscriber only sees envelopes
/// published after it subscribed.
#[derive(Debug, Clone)]
pub struct MessageBus {
    tx: broadcast::Sender<MessageEnvelope>,
}

impl MessageBus {
    /// Create a bus that buffers up to `capacity` envelopes per subscriber.
    ///
    /// `capacity` is clamped to `1..=`[`MAX_MESSAGE_CAPACITY`].
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.clamp(1, MAX_MESSAGE_CAPACITY));
        Self { tx }
    }

    /// Deliver an envelope to all current subscribers, returning how many received it.
    pub fn publish(&self, envelope: MessageEnvelope) -> usize {
        self.tx.send(envelope).unwrap_or_default()
    }

    #[must_use]
    pub fn subscribe(&self) -> MessageSubscription {
        MessageSubscription {
            rx: self.tx.subscribe(),
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// A single listener on a [`MessageBus`].
#[derive(Debug)]
pub struct MessageSubscription {
    rx: broadcast::Receiver<MessageEnvelope>,
}

impl MessageSubscription {
    /// Wait for the next envelope.
    ///
    /// Returns `None` once the bus is gone. A subscriber that fell behind gets a
    /// single [`WsError::Lagged`] and then resumes with the oldest retained envelope.
    pub async fn recv(&mut self) -> Option<Result<MessageEnvelope>> {
        match self.rx.recv().await {
            Ok(envelope) => Some(Ok(envelope)),
            Err(RecvError::Lagged(count)) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("Message subscription lagged, missed {count} messages");
                Some(Err(WsError::Lagged { count }.into()))
            }
            Err(RecvError::Closed) => None,
        }
    }

    /// Turn this subscription into a [`Stream`] of envelopes.
    pub fn into_stream(self) -> impl Stream<Item = Result<MessageEnvelope>> {
        let mut rx = self.rx;

        try_stream! {
            loop {
                match rx.recv().await {
                    Ok(envelope) => {
                        yield envelope;
                    }
                    Err(RecvError::Lagged(n)) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("Message subscription lagged, missed {n} messages");
                        Err(WsError::Lagged { count: n })?;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    /// Stream only the envelopes whose type equals `msg_type`.
    pub fn filter_type<T: Into<String>>(
        self,
        msg_type: T,
    ) -> impl Stream<Item = Result<MessageEnvelope>> {
        let target = msg_type.into();
        let mut rx = self.rx;

        try_stream! {
            loop {
                match rx.recv().await {
                    Ok(envelope) => {
                        if envelope.msg_type() == target {
                            yield envelope;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(msg_type = %target, "Message subscription lagged, missed {n} messages");
                        Err(WsError::Lagged { count: n })?;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    /// Stop listening. Equivalent to dropping the subscription.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

/// Broadcast of the boolean connection status with late-joiner replay.
#[derive(Debug)]
pub struct StatusBus {
    inner: Mutex<StatusInner>,
}

#[derive(Debug)]
struct StatusInner {
    current: bool,
    tx: broadcast::Sender<bool>,
}

impl Default for StatusBus {
    fn default() -> Self {
        Self::new(false)
    }
}

impl StatusBus {
    #[must_use]
    pub fn new(initial: bool) -> Self {
        let (tx, _) = broadcast::channel(STATUS_CAPACITY);
        Self {
            inner: Mutex::new(StatusInner {
                current: initial,
                tx,
            }),
        }
    }

    /// Record a new status and deliver it to every subscriber. Repeated values are
    /// delivered as well.
    pub fn publish(&self, connected: bool) {
        // A poisoned lock still holds a consistent bool and sender.
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.current = connected;
        _ = inner.tx.send(connected);
    }

    #[must_use]
    pub fn current(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .current
    }

    /// Subscribe, receiving the current value first.
    ///
    /// The snapshot and the receiver are taken under the same lock as `publish`, so no
    /// transition can fall between them.
    #[must_use]
    pub fn subscribe(&self) -> StatusSubscription {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        StatusSubscription {
            pending: Some(inner.current),
            rx: inner.tx.subscribe(),
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .tx
            .receiver_count()
    }
}

/// A single listener on a [`StatusBus`].
#[derive(Debug)]
pub struct StatusSubscription {
    pending: Option<bool>,
    rx: broadcast::Receiver<bool>,
}

impl StatusSubscription {
    /// Next status value; the first call returns the value current at subscribe time.
    ///
    /// Returns `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<bool> {
        if let Some(current) = self.pending.take() {
            return Some(current);
        }

        loop {
            match self.rx.recv().await {
                Ok(connected) => return Some(connected),
                // Older transitions were overwritten; newer ones are still queued.
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = bool> {
        let mut subscription = self;

        async_stream::stream! {
            while let Some(connected) = subscription.recv().await {
                yield connected;
            }
        }
    }

    /// Stop listening. Equivalent to dropping the subscription.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt as _;
    use serde_json::json;

    use super::*;

    fn envelope(n: u64) -> MessageEnvelope {
        MessageEnvelope::new("tick", json!({ "n": n }))
    }

    #[tokio::test]
    async fn every_subscriber_receives_each_message_in_order() {
        let bus = MessageBus::new(16);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        for n in 0..3 {
            assert_eq!(bus.publish(envelope(n)), 2);
        }

        for n in 0..3 {
            assert_eq!(first.recv().await.unwrap().unwrap(), envelope(n));
            assert_eq!(second.recv().await.unwrap().unwrap(), envelope(n));
        }
    }

    #[tokio::test]
    async fn late_subscriber_gets_no_history() {
        let bus = MessageBus::new(16);
        let _early = bus.subscribe();
        bus.publish(envelope(0));

        let mut late = bus.subscribe();
        bus.publish(envelope(1));

        assert_eq!(late.recv().await.unwrap().unwrap(), envelope(1));
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_dropped() {
        let bus = MessageBus::new(4);
        assert_eq!(bus.publish(envelope(0)), 0);
    }

    #[tokio::test]
    async fn unsubscribe_is_independent() {
        let bus = MessageBus::new(4);
        let first = bus.subscribe();
        let mut second = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        first.unsubscribe();
        assert_eq!(bus.subscriber_count(), 1);

        bus.publish(envelope(9));
        assert_eq!(second.recv().await.unwrap().unwrap(), envelope(9));
    }

    #[tokio::test]
    async fn slow_subscriber_reports_lag() {
        let bus = MessageBus::new(2);
        let mut slow = bus.subscribe();

        for n in 0..5 {
            bus.publish(envelope(n));
        }

        let error = slow.recv().await.unwrap().unwrap_err();
        assert!(
            matches!(error.downcast_ref::<WsError>(), Some(WsError::Lagged { count: 3 })),
            "unexpected error {error:?}"
        );
        assert_eq!(slow.recv().await.unwrap().unwrap(), envelope(3));
    }

    #[tokio::test]
    async fn stream_ends_when_bus_dropped() {
        let bus = MessageBus::new(4);
        let stream = bus.subscribe().into_stream();
        bus.publish(envelope(1));
        drop(bus);

        let collected: Vec<_> = stream.collect().await;
        assert_eq!(collected.len(), 1);
        assert_eq!(collected[0].as_ref().unwrap(), &envelope(1));
    }

    #[tokio::test]
    async fn filter_type_skips_other_types() {
        let bus = MessageBus::new(8);
        let stream = bus.subscribe().filter_type("ticker");

        bus.publish(MessageEnvelope::new("message", json!({ "text": "hi" })));
        bus.publish(MessageEnvelope::new("ticker", json!({ "price": 100 })));
        drop(bus);

        let collected: Vec<_> = stream.collect().await;
        assert_eq!(collected.len(), 1);
        assert_eq!(collected[0].as_ref().unwrap().msg_type(), "ticker");
    }

    #[tokio::test]
    async fn status_replays_current_value_to_late_subscriber() {
        let bus = StatusBus::default();
        bus.publish(true);

        let mut late = bus.subscribe();
        assert_eq!(late.recv().await, Some(true));

        bus.publish(false);
        assert_eq!(late.recv().await, Some(false));
    }

    #[tokio::test]
    async fn status_delivers_repeated_values() {
        let bus = StatusBus::new(false);
        let mut sub = bus.subscribe();
        assert_eq!(sub.recv().await, Some(false));

        bus.publish(false);
        bus.publish(true);
        bus.publish(true);

        assert_eq!(sub.recv().await, Some(false));
        assert_eq!(sub.recv().await, Some(true));
        assert_eq!(sub.recv().await, Some(true));
        assert!(bus.current(), "latest value should be current");
    }

    #[tokio::test]
    async fn status_lag_still_reaches_latest_value() {
        let bus = StatusBus::new(false);
        let mut sub = bus.subscribe();
        assert_eq!(sub.recv().await, Some(false));

        for n in 0..(STATUS_CAPACITY * 2) {
            bus.publish(n % 2 == 0);
        }
        bus.publish(true);

        let mut last = None;
        while let Ok(Some(value)) =
            tokio::time::timeout(std::time::Duration::from_millis(50), sub.recv()).await
        {
            last = Some(value);
        }
        assert_eq!(last, Some(true));
    }
}
