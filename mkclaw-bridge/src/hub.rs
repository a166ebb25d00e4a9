// ABOUTME: Fan-out of BridgeEvents to filtered subscriber channels.
// ABOUTME: Subscribers listen broadly (every stream line) or narrowly (one event kind).

use std::sync::Mutex;
use tokio::sync::mpsc;

use crate::event::{BridgeEvent, EventKind, StreamEvent};

/// Which events a subscriber receives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFilter {
    /// Every parsed stream line
    AnyStream,
    /// Stream lines of one kind
    Kind(EventKind),
    /// Stderr, exit, error and reconnect notifications
    Lifecycle,
}

impl EventFilter {
    pub fn matches(&self, event: &BridgeEvent) -> bool {
        match (self, event) {
            (EventFilter::AnyStream, BridgeEvent::Stream(_)) => true,
            (EventFilter::Kind(kind), BridgeEvent::Stream(stream)) => &stream.kind == kind,
            (EventFilter::Lifecycle, BridgeEvent::Stream(_)) => false,
            (EventFilter::Lifecycle, _) => true,
            _ => false,
        }
    }
}

struct Subscriber {
    filter: EventFilter,
    tx: mpsc::UnboundedSender<BridgeEvent>,
}

/// Registered subscriber sets. Publishing never blocks; events reach each
/// subscriber in publish order.
#[derive(Default)]
pub struct EventHub {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber. Dropping the receiver unsubscribes it.
    pub fn subscribe(&self, filter: EventFilter) -> EventReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(Subscriber { filter, tx });
        EventReceiver { rx }
    }

    /// Deliver an event to every matching subscriber; returns how many got it
    pub fn publish(&self, event: BridgeEvent) -> usize {
        let mut subscribers = self.lock();
        subscribers.retain(|s| !s.tx.is_closed());

        let mut delivered = 0;
        for subscriber in subscribers.iter() {
            if subscriber.filter.matches(&event) && subscriber.tx.send(event.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Parse one stdout line and publish it. Malformed lines are dropped
    /// without any notification; returns whether the line parsed.
    pub fn publish_line(&self, line: &str) -> bool {
        match StreamEvent::parse_line(line) {
            Some(event) => {
                tracing::trace!(kind = %event.kind, "stream event");
                self.publish(BridgeEvent::Stream(event));
                true
            }
            None => {
                if !line.trim().is_empty() {
                    tracing::trace!(len = line.len(), "dropping malformed stream line");
                }
                false
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.lock();
        subscribers.retain(|s| !s.tx.is_closed());
        subscribers.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Receiving end of a subscription
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<BridgeEvent>,
}

impl EventReceiver {
    /// Next event, or None once the hub is gone
    pub async fn recv(&mut self) -> Option<BridgeEvent> {
        self.rx.recv().await
    }

    /// Next event if one is already queued
    pub fn try_recv(&mut self) -> Option<BridgeEvent> {
        self.rx.try_recv().ok()
    }
}
