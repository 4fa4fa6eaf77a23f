//! Broadcast event bus built on crossbeam-channel.
//!
//! Every subscriber gets its own channel, so one slow or dropped
//! receiver never holds up the others.

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::Event;

/// Fan-out publisher shared by the queue, service and watcher.
///
/// Cloning is cheap; all clones publish to the same subscribers.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Sender<Event>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe with an unbounded channel.
    pub fn subscribe(&self) -> EventReceiver {
        let (sender, receiver) = unbounded();
        self.add(sender);
        EventReceiver { inner: receiver }
    }

    /// Subscribe with a bounded channel.
    ///
    /// Events that do not fit are dropped for this subscriber only.
    pub fn subscribe_bounded(&self, capacity: usize) -> EventReceiver {
        let (sender, receiver) = bounded(capacity);
        self.add(sender);
        EventReceiver { inner: receiver }
    }

    fn add(&self, sender: Sender<Event>) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(sender);
        }
    }

    /// Deliver an event to every live subscriber. Never blocks.
    ///
    /// Subscribers whose receiver was dropped are pruned.
    pub fn publish(&self, event: Event) {
        let Ok(mut subscribers) = self.subscribers.lock() else {
            return;
        };
        subscribers.retain(|sender| match sender.try_send(event.clone()) {
            Ok(()) | Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }
}

/// Receives events from the bus.
///
/// Used by UI layers to subscribe to progress updates.
pub struct EventReceiver {
    inner: Receiver<Event>,
}

impl EventReceiver {
    /// Block until the next event is received
    pub fn recv(&self) -> Option<Event> {
        self.inner.recv().ok()
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&self) -> Option<Event> {
        self.inner.try_recv().ok()
    }

    /// Wait up to `timeout` for the next event
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Event, RecvTimeoutError> {
        self.inner.recv_timeout(timeout)
    }

    /// Returns an iterator over received events
    pub fn iter(&self) -> impl Iterator<Item = Event> + '_ {
        self.inner.iter()
    }

    /// Drain everything currently buffered
    pub fn drain(&self) -> Vec<Event> {
        self.inner.try_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{JobEvent, QueueEvent, QueueSnapshot};
    use std::thread;

    fn started(id: &str) -> Event {
        Event::Job(JobEvent::Started {
            job_id: id.to_string(),
        })
    }

    #[test]
    fn events_can_be_sent_across_threads() {
        let bus = EventBus::new();
        let receiver = bus.subscribe();

        let publisher = bus.clone();
        let handle = thread::spawn(move || {
            publisher.publish(started("job-1"));
        });

        handle.join().unwrap();

        let event = receiver.recv().unwrap();
        match event {
            Event::Job(JobEvent::Started { job_id }) => assert_eq!(job_id, "job-1"),
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn every_subscriber_gets_every_event() {
        let bus = EventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();

        bus.publish(Event::Queue(QueueEvent::Updated(QueueSnapshot::default())));
        bus.publish(started("x"));

        assert_eq!(a.drain().len(), 2);
        assert_eq!(b.drain().len(), 2);
    }

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish(started("nobody"));
    }

    #[test]
    fn dropped_receivers_are_pruned() {
        let bus = EventBus::new();
        let kept = bus.subscribe();
        drop(bus.subscribe());
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(started("x"));

        assert_eq!(bus.subscriber_count(), 1);
        assert!(kept.try_recv().is_some());
    }

    #[test]
    fn bounded_subscriber_drops_overflow() {
        let bus = EventBus::new();
        let receiver = bus.subscribe_bounded(2);

        bus.publish(started("1"));
        bus.publish(started("2"));
        bus.publish(started("3"));

        assert!(receiver.try_recv().is_some());
        assert!(receiver.try_recv().is_some());
        assert!(receiver.try_recv().is_none());
        assert_eq!(bus.subscriber_count(), 1);
    }
}
