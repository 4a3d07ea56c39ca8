//! Session notification bus
//!
//! Each subscriber gets its own unbounded channel. Subscribers that drop
//! their receiver are pruned on the next publish.

use chrono::Duration;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::integrity::Warning;
use crate::session::SessionState;
use crate::submission::{SubmissionResponse, SubmitTrigger};
use crate::violation::ViolationRecord;

/// Something observers of a session may want to react to
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    ViolationRecorded(ViolationRecord),
    Warning(Warning),
    /// Whole seconds left on the countdown
    TimeRemaining { seconds: i64 },
    /// A device track ended on its own; monitoring stopped, the exam continues
    DeviceLost,
    SubmissionFailed {
        trigger: SubmitTrigger,
        reason: String,
    },
    Submitted(SubmissionResponse),
}

impl SessionEvent {
    pub fn time_remaining(remaining: Duration) -> Self {
        SessionEvent::TimeRemaining {
            seconds: remaining.num_seconds().max(0),
        }
    }
}

/// Handle identifying one subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Fan-out of session events to any number of subscribers
#[derive(Debug, Default)]
pub struct SessionEvents {
    subscribers: Vec<(SubscriptionId, mpsc::UnboundedSender<SessionEvent>)>,
    next_id: u64,
}

impl SessionEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self) -> (SubscriptionId, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscribers.push((id, tx));
        (id, rx)
    }

    /// Stop delivering to a subscriber; returns false for an unknown id
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sub, _)| *sub != id);
        self.subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn publish(&mut self, event: SessionEvent) {
        self.subscribers
            .retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_and_unsubscribe() {
        let mut events = SessionEvents::new();
        let (first, mut first_rx) = events.subscribe();
        let (_, mut second_rx) = events.subscribe();

        events.publish(SessionEvent::DeviceLost);
        assert!(events.unsubscribe(first));
        assert!(!events.unsubscribe(first));
        events.publish(SessionEvent::time_remaining(Duration::seconds(42)));

        assert_eq!(first_rx.try_recv().unwrap(), SessionEvent::DeviceLost);
        assert!(first_rx.try_recv().is_err());
        assert_eq!(second_rx.try_recv().unwrap(), SessionEvent::DeviceLost);
        assert_eq!(
            second_rx.try_recv().unwrap(),
            SessionEvent::TimeRemaining { seconds: 42 }
        );
    }

    #[test]
    fn test_dropped_receivers_are_pruned() {
        let mut events = SessionEvents::new();
        let (_, rx) = events.subscribe();
        drop(rx);
        events.publish(SessionEvent::DeviceLost);
        assert_eq!(events.subscriber_count(), 0);
    }
}
