//! In-process broadcast topic bridging the normalizer to subscriber sessions.
//!
//! A single fan-out point: everything published is delivered to every current
//! subscriber and to nobody else. There is no history; a subscriber only sees
//! messages published after it joined. Each subscriber has its own bounded
//! buffer, and a slow one loses its oldest buffered messages rather than
//! stalling the publisher or its peers.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use crate::normalize::ChangeEvent;

/// Default per-subscriber delivery buffer.
pub const DEFAULT_BUFFER: usize = 256;

#[derive(Debug, Clone)]
enum Signal {
    Change(Arc<ChangeEvent>),
    Shutdown,
}

/// What a subscriber sees next.
#[derive(Debug)]
pub enum Received {
    /// A change published after this subscriber joined.
    Change(Arc<ChangeEvent>),
    /// The subscriber fell behind; this many oldest buffered messages were
    /// dropped for it.
    Lagged(u64),
    /// The upstream pipeline is gone; no further messages will arrive on
    /// this subscription.
    Terminated,
}

/// Cloneable handle to the single broadcast topic.
#[derive(Clone)]
pub struct Relay {
    name: Arc<str>,
    tx: broadcast::Sender<Signal>,
}

/// Exclusively-owned registration on the topic. Dropping it (or calling
/// [`unsubscribe`](Subscription::unsubscribe)) removes the subscriber
/// immediately; ownership guarantees that happens exactly once.
pub struct Subscription {
    rx: broadcast::Receiver<Signal>,
}

impl Relay {
    pub fn new(name: &str, buffer: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer.max(1));
        Self {
            name: name.into(),
            tx,
        }
    }

    /// Topic label, used for logging.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Deliver an event to every current subscriber. Never blocks; returns
    /// the number of subscribers the event was buffered for.
    pub fn publish(&self, event: Arc<ChangeEvent>) -> usize {
        match self.tx.send(Signal::Change(event)) {
            Ok(receivers) => receivers,
            // No current subscribers; the event simply fans out to nobody.
            Err(_) => 0,
        }
    }

    /// Register a new subscriber. It will see every event published after
    /// this call, and nothing from before.
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Signal every current subscriber that the upstream is gone. Subscribers
    /// joining afterwards start clean, so the topic keeps working across a
    /// broker reconnect.
    pub fn shutdown(&self) {
        debug!(topic = %self.name, "signalling shutdown to subscribers");
        let _ = self.tx.send(Signal::Shutdown);
    }
}

impl Subscription {
    /// Wait for the next event on this subscription.
    pub async fn next(&mut self) -> Received {
        match self.rx.recv().await {
            Ok(Signal::Change(event)) => Received::Change(event),
            Ok(Signal::Shutdown) => Received::Terminated,
            Err(broadcast::error::RecvError::Lagged(skipped)) => Received::Lagged(skipped),
            Err(broadcast::error::RecvError::Closed) => Received::Terminated,
        }
    }

    /// Explicitly remove this subscriber. Dropping the handle has the same
    /// effect.
    pub fn unsubscribe(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(text: &str) -> Arc<ChangeEvent> {
        Arc::new(ChangeEvent::Text(text.into()))
    }

    fn frame(received: Received) -> String {
        match received {
            Received::Change(event) => event.to_frame(),
            other => panic!("expected change, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn delivers_to_all_current_subscribers() {
        let relay = Relay::new("poll:updates", 16);
        let mut a = relay.subscribe();
        let mut b = relay.subscribe();

        assert_eq!(relay.publish(event("one")), 2);

        assert_eq!(frame(a.next().await), "one");
        assert_eq!(frame(b.next().await), "one");
    }

    #[tokio::test]
    async fn late_subscriber_sees_no_history() {
        let relay = Relay::new("poll:updates", 16);
        let mut early = relay.subscribe();
        relay.publish(event("before"));

        let mut late = relay.subscribe();
        relay.publish(event("after"));

        assert_eq!(frame(early.next().await), "before");
        assert_eq!(frame(early.next().await), "after");
        // The late subscriber only ever sees the second event.
        assert_eq!(frame(late.next().await), "after");
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery_and_updates_count() {
        let relay = Relay::new("poll:updates", 16);
        let a = relay.subscribe();
        let _b = relay.subscribe();
        assert_eq!(relay.subscriber_count(), 2);

        a.unsubscribe();
        assert_eq!(relay.subscriber_count(), 1);
        assert_eq!(relay.publish(event("one")), 1);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_a_noop() {
        let relay = Relay::new("poll:updates", 16);
        assert_eq!(relay.publish(event("nobody home")), 0);
    }

    #[tokio::test]
    async fn slow_subscriber_loses_oldest_messages() {
        let relay = Relay::new("poll:updates", 2);
        let mut slow = relay.subscribe();

        for i in 0..4 {
            relay.publish(event(&format!("m{i}")));
        }

        match slow.next().await {
            Received::Lagged(skipped) => assert_eq!(skipped, 2),
            other => panic!("expected lag, got {other:?}"),
        }
        assert_eq!(frame(slow.next().await), "m2");
        assert_eq!(frame(slow.next().await), "m3");
    }

    #[tokio::test]
    async fn shutdown_terminates_current_subscribers_only() {
        let relay = Relay::new("poll:updates", 16);
        let mut current = relay.subscribe();
        relay.shutdown();

        assert!(matches!(current.next().await, Received::Terminated));

        // A fresh subscriber after the shutdown receives new events normally.
        let mut fresh = relay.subscribe();
        relay.publish(event("recovered"));
        assert_eq!(frame(fresh.next().await), "recovered");
    }
}
