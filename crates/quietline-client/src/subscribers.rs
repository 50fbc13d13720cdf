//! Per-inbox event fan-out.
//!
//! Each subscriber gets a bounded channel. Publishing never waits: when a
//! subscriber's buffer is full the new event is dropped for that subscriber
//! and counted. Closed subscribers are pruned on the next publish.

use std::{
    collections::HashMap,
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use quietline_proto::{Event, InboxId};
use tokio::sync::mpsc::{self, error::TrySendError};

/// Subscriber registry for decrypted events.
#[derive(Debug)]
pub struct Subscribers {
    capacity: usize,
    channels: Mutex<HashMap<InboxId, Vec<mpsc::Sender<Event>>>>,
    dropped: AtomicU64,
}

impl Subscribers {
    /// Create a registry whose subscribers buffer `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: Mutex::new(HashMap::new()),
            dropped: AtomicU64::new(0),
        }
    }

    /// Subscribe to events for `inbox`.
    pub fn subscribe(&self, inbox: InboxId) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(inbox)
            .or_default()
            .push(tx);
        rx
    }

    /// Remove every subscriber for `inbox`.
    pub fn unsubscribe(&self, inbox: &InboxId) {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner).remove(inbox);
    }

    /// Offer `event` to every subscriber of `inbox` without waiting.
    ///
    /// Returns how many subscribers accepted it.
    pub fn publish(&self, inbox: &InboxId, event: &Event) -> usize {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(senders) = channels.get_mut(inbox) else {
            return 0;
        };

        let mut accepted = 0;
        senders.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => {
                accepted += 1;
                true
            },
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    inbox = %inbox,
                    serial = event.serial,
                    "subscriber full, event dropped"
                );
                true
            },
            Err(TrySendError::Closed(_)) => false,
        });

        if senders.is_empty() {
            channels.remove(inbox);
        }

        accepted
    }

    /// Events dropped because a subscriber was full.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Number of live subscribers for `inbox`.
    pub fn subscriber_count(&self, inbox: &InboxId) -> usize {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner).get(inbox).map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use quietline_proto::EventPayload;

    use super::*;

    fn event(serial: u64) -> Event {
        Event {
            timestamp: 0,
            serial,
            sender: "bob".to_string(),
            payload: EventPayload::Message { text: serial.to_string() },
        }
    }

    #[tokio::test]
    async fn delivers_to_every_subscriber() {
        let subs = Subscribers::new(4);
        let inbox = InboxId([1; 32]);
        let mut a = subs.subscribe(inbox);
        let mut b = subs.subscribe(inbox);

        assert_eq!(subs.publish(&inbox, &event(1)), 2);

        assert_eq!(a.recv().await.unwrap().serial, 1);
        assert_eq!(b.recv().await.unwrap().serial, 1);
    }

    #[tokio::test]
    async fn full_subscriber_drops_newest() {
        let subs = Subscribers::new(2);
        let inbox = InboxId([1; 32]);
        let mut rx = subs.subscribe(inbox);

        for serial in 0..5 {
            subs.publish(&inbox, &event(serial));
        }

        assert_eq!(subs.dropped_events(), 3);
        assert_eq!(rx.recv().await.unwrap().serial, 0);
        assert_eq!(rx.recv().await.unwrap().serial, 1);
        assert!(rx.try_recv().is_err(), "newer events were dropped");
    }

    #[test]
    fn closed_subscribers_are_pruned() {
        let subs = Subscribers::new(2);
        let inbox = InboxId([1; 32]);
        let rx = subs.subscribe(inbox);
        drop(rx);

        assert_eq!(subs.publish(&inbox, &event(0)), 0);
        assert_eq!(subs.subscriber_count(&inbox), 0);
        assert_eq!(subs.dropped_events(), 0);
    }

    #[test]
    fn other_inboxes_unaffected() {
        let subs = Subscribers::new(2);
        let _rx = subs.subscribe(InboxId([1; 32]));

        assert_eq!(subs.publish(&InboxId([2; 32]), &event(0)), 0);

        subs.unsubscribe(&InboxId([1; 32]));
        assert_eq!(subs.subscriber_count(&InboxId([1; 32])), 0);
    }
}
