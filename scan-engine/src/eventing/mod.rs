//! Pool event notification: scan lifecycle transitions are published to
//! every subscriber through an unbounded channel per listener.

use chrono::{DateTime, Utc};
use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

/// Lifecycle transitions the engine publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAction {
    ScrubStart,
    ScrubFinish,
    ResilverStart,
    ResilverFinish,
}

/// One published event.
#[derive(Debug, Clone)]
pub struct EventMessage {
    pub action: EventAction,
    pub pool: String,
    pub at: DateTime<Utc>,
}

/// Fan-out of pool events to subscribers. Disconnected subscribers are
/// dropped on the next notification.
#[derive(Debug, Default)]
pub struct EventDispatcher {
    subscribers: Mutex<Vec<Sender<EventMessage>>>,
}

impl EventDispatcher {
    pub fn subscribe(&self) -> Receiver<EventMessage> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn notify(&self, pool: &str, action: EventAction) {
        let msg = EventMessage {
            action,
            pool: pool.to_string(),
            at: Utc::now(),
        };
        self.subscribers
            .lock()
            .retain(|sub| sub.send(msg.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_reach_every_subscriber() {
        let dispatcher = EventDispatcher::default();
        let a = dispatcher.subscribe();
        let b = dispatcher.subscribe();
        dispatcher.notify("tank", EventAction::ScrubStart);
        assert_eq!(a.try_recv().unwrap().action, EventAction::ScrubStart);
        assert_eq!(b.try_recv().unwrap().action, EventAction::ScrubStart);
    }

    #[test]
    fn dead_subscribers_are_dropped() {
        let dispatcher = EventDispatcher::default();
        let rx = dispatcher.subscribe();
        drop(rx);
        dispatcher.notify("tank", EventAction::ScrubFinish);
        assert!(dispatcher.subscribers.lock().is_empty());
    }
}
