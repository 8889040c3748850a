//! Event broker: single owner of the connection snapshot and the fan-out
//! registry.
//!
//! Every inbound upstream event and every locally sent message goes through
//! [`EventBroker::publish`], which updates the snapshot, filters repeated
//! message ids through the dedup window and pushes the event onto the queue
//! of each matching [`Subscription`]. Queues are unbounded, so a slow
//! consumer never stalls publishing; chat traffic is human-scale.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use textpilot_shared::{BrokerEvent, ConnectionStatus, EventKind, StatusSnapshot};

use crate::dedup::DedupWindow;
use crate::subscription::Subscription;

pub type SubscriptionId = u64;

/// Which events a subscription wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFilter {
    Only(EventKind),
    All,
}

impl EventFilter {
    pub fn matches(&self, kind: EventKind) -> bool {
        match self {
            Self::Only(wanted) => *wanted == kind,
            Self::All => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Number of subscriber queues the event was pushed onto.
    Delivered(usize),
    /// A message whose id is still in the dedup window.
    Duplicate,
    /// A status change that would move the connection backwards.
    Rejected,
}

struct Subscriber {
    filter: EventFilter,
    tx: mpsc::UnboundedSender<BrokerEvent>,
}

pub(crate) struct Registry {
    subscribers: HashMap<SubscriptionId, Subscriber>,
    dedup: DedupWindow,
    next_id: SubscriptionId,
}

impl Registry {
    pub(crate) fn remove(&mut self, id: SubscriptionId) -> bool {
        let removed = self.subscribers.remove(&id).is_some();
        if removed {
            debug!(
                subscription = id,
                subscribers = self.subscribers.len(),
                "Subscription unregistered"
            );
        }
        removed
    }

    fn fan_out(&mut self, event: &BrokerEvent) -> usize {
        let kind = event.kind();
        let mut delivered = 0;
        let mut gone = Vec::new();

        for (id, subscriber) in &self.subscribers {
            if !subscriber.filter.matches(kind) {
                continue;
            }

            if subscriber.tx.send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                gone.push(*id);
            }
        }

        // Receivers that went away without unregistering must not block or
        // fail delivery to anyone else.
        for id in gone {
            self.remove(id);
        }

        delivered
    }
}

pub(crate) fn lock_registry(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cloneable handle to the broker. Construct one per service (or per test).
#[derive(Clone)]
pub struct EventBroker {
    registry: Arc<Mutex<Registry>>,
    snapshot: Arc<watch::Sender<StatusSnapshot>>,
}

impl EventBroker {
    pub fn new(dedup_window: usize) -> Self {
        let (snapshot, _) = watch::channel(StatusSnapshot::default());
        Self {
            registry: Arc::new(Mutex::new(Registry {
                subscribers: HashMap::new(),
                dedup: DedupWindow::new(dedup_window),
                next_id: 1,
            })),
            snapshot: Arc::new(snapshot),
        }
    }

    /// Create and track a new fan-out target. Never blocks on publishers
    /// beyond the registry lock.
    pub fn register(&self, filter: EventFilter) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut registry = lock_registry(&self.registry);
        self.attach(&mut registry, filter, tx, rx)
    }

    /// Like [`register`](Self::register), but when the connection has left
    /// `Uninitialized` the queue starts with a `StatusChanged` carrying the
    /// current status. Status changes are applied under the registry lock,
    /// so nothing published afterwards is missed or lands ahead of it.
    pub fn register_with_status(&self, filter: EventFilter) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut registry = lock_registry(&self.registry);

        let status = self.snapshot.borrow().status.clone();
        if status != ConnectionStatus::Uninitialized && filter.matches(EventKind::Status) {
            // The receiver is still held here, so this cannot fail.
            let _ = tx.send(BrokerEvent::StatusChanged(status));
        }
        self.attach(&mut registry, filter, tx, rx)
    }

    fn attach(
        &self,
        registry: &mut Registry,
        filter: EventFilter,
        tx: mpsc::UnboundedSender<BrokerEvent>,
        rx: mpsc::UnboundedReceiver<BrokerEvent>,
    ) -> Subscription {
        let id = registry.next_id;
        registry.next_id += 1;
        registry.subscribers.insert(id, Subscriber { filter, tx });

        debug!(
            subscription = id,
            ?filter,
            subscribers = registry.subscribers.len(),
            "Subscription registered"
        );

        Subscription::new(id, rx, Arc::downgrade(&self.registry))
    }

    /// Idempotent: unknown or already removed ids are ignored.
    pub fn unregister(&self, id: SubscriptionId) -> bool {
        lock_registry(&self.registry).remove(id)
    }

    pub fn publish(&self, event: BrokerEvent) -> PublishOutcome {
        let mut registry = lock_registry(&self.registry);

        match &event {
            BrokerEvent::QrUpdated(code) => {
                let next = ConnectionStatus::AwaitingQr { code: code.clone() };
                if !self.apply_status(next) {
                    return PublishOutcome::Rejected;
                }
            }
            BrokerEvent::StatusChanged(status) => {
                if !self.apply_status(status.clone()) {
                    return PublishOutcome::Rejected;
                }
                info!(status = %status, "Connection status changed");
            }
            BrokerEvent::MessageReceived(msg) => {
                if !registry.dedup.insert(&msg.id) {
                    debug!(msg_id = %msg.id, chat = %msg.chat_id, "Suppressed duplicate message");
                    return PublishOutcome::Duplicate;
                }
            }
        }

        let delivered = registry.fan_out(&event);
        debug!(kind = ?event.kind(), delivered, "Event published");
        PublishOutcome::Delivered(delivered)
    }

    /// Hard disconnect: fall back to `Uninitialized` and tell subscribers.
    /// Reconnecting is up to the upstream collaborator.
    pub fn disconnect(&self, reason: &str) -> PublishOutcome {
        warn!(reason, "Upstream disconnected");
        self.publish(BrokerEvent::StatusChanged(ConnectionStatus::Uninitialized))
    }

    /// Drop every subscriber queue; open streams end on their next poll.
    pub fn close_all(&self) {
        let mut registry = lock_registry(&self.registry);
        let count = registry.subscribers.len();
        registry.subscribers.clear();
        info!(count, "Closed all subscriptions");
    }

    pub fn subscriber_count(&self) -> usize {
        lock_registry(&self.registry).subscribers.len()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn watch_snapshot(&self) -> watch::Receiver<StatusSnapshot> {
        self.snapshot.subscribe()
    }

    fn apply_status(&self, next: ConnectionStatus) -> bool {
        let mut accepted = false;
        self.snapshot.send_if_modified(|snap| {
            if !snap.status.accepts(&next) {
                warn!(from = %snap.status, to = %next, "Rejected backwards status change");
                return false;
            }

            match &next {
                ConnectionStatus::AwaitingQr { code } => snap.qr_code = Some(code.clone()),
                ConnectionStatus::Uninitialized => snap.qr_code = None,
                _ => {}
            }
            snap.ready = next.is_ready();
            snap.status = next;
            accepted = true;
            true
        });
        accepted
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use textpilot_shared::{Credentials, Message};

    use super::*;

    fn message(id: &str, chat: &str) -> Message {
        Message {
            id: id.into(),
            chat_id: chat.into(),
            from_me: false,
            author: None,
            body: format!("body of {id}"),
            timestamp: 100,
            quoted_message_id: None,
        }
    }

    #[tokio::test]
    async fn test_fan_out_reaches_every_matching_subscriber() {
        let broker = EventBroker::new(16);
        let mut first = broker.register(EventFilter::Only(EventKind::Message));
        let mut second = broker.register(EventFilter::Only(EventKind::Message));
        let mut qr_only = broker.register(EventFilter::Only(EventKind::Qr));

        let outcome = broker.publish(BrokerEvent::MessageReceived(message("1", "a@c.us")));
        assert_eq!(outcome, PublishOutcome::Delivered(2));

        assert_eq!(first.next_event().await.unwrap().kind(), EventKind::Message);
        assert_eq!(second.next_event().await.unwrap().kind(), EventKind::Message);
        assert!(qr_only.try_next_event().is_none());
    }

    #[tokio::test]
    async fn test_delivery_preserves_publish_order() {
        let broker = EventBroker::new(16);
        let sub = broker.register(EventFilter::Only(EventKind::Message));

        for id in ["1", "2", "3"] {
            broker.publish(BrokerEvent::MessageReceived(message(id, "a@c.us")));
        }

        let ids: Vec<String> = sub
            .take(3)
            .filter_map(|e| async move { e.into_message() })
            .map(|m| m.id.0)
            .collect()
            .await;
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[test]
    fn test_duplicate_message_is_not_fanned_out_twice() {
        let broker = EventBroker::new(16);
        let mut sub = broker.register(EventFilter::Only(EventKind::Message));

        broker.publish(BrokerEvent::MessageReceived(message("9", "a@c.us")));
        let again = broker.publish(BrokerEvent::MessageReceived(message("9", "a@c.us")));

        assert_eq!(again, PublishOutcome::Duplicate);
        assert!(sub.try_next_event().is_some());
        assert!(sub.try_next_event().is_none());
    }

    #[test]
    fn test_dropped_subscription_is_unregistered() {
        let broker = EventBroker::new(16);
        let sub = broker.register(EventFilter::Only(EventKind::Message));
        assert_eq!(broker.subscriber_count(), 1);

        drop(sub);
        assert_eq!(broker.subscriber_count(), 0);

        let outcome = broker.publish(BrokerEvent::MessageReceived(message("1", "a@c.us")));
        assert_eq!(outcome, PublishOutcome::Delivered(0));
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let broker = EventBroker::new(16);
        let mut sub = broker.register(EventFilter::All);
        let id = sub.id();

        assert!(broker.unregister(id));
        assert!(!broker.unregister(id));
        sub.close();
        sub.close();
        assert_eq!(broker.subscriber_count(), 0);
    }

    #[test]
    fn test_status_snapshot_tracks_qr_and_ready() {
        let broker = EventBroker::new(16);
        broker.publish(BrokerEvent::QrUpdated("qr-1".into()));

        let snap = broker.snapshot();
        assert_eq!(snap.qr_code.as_deref(), Some("qr-1"));
        assert_eq!(snap.status.qr_code(), Some("qr-1"));
        assert!(!snap.ready);

        broker.publish(BrokerEvent::StatusChanged(ConnectionStatus::Authenticated {
            credentials: Credentials::default(),
        }));
        broker.publish(BrokerEvent::StatusChanged(ConnectionStatus::Ready));
        assert!(broker.snapshot().ready);
    }

    #[test]
    fn test_backwards_status_change_is_rejected() {
        let broker = EventBroker::new(16);
        let mut sub = broker.register(EventFilter::All);
        broker.publish(BrokerEvent::StatusChanged(ConnectionStatus::Ready));
        sub.try_next_event();

        let outcome = broker.publish(BrokerEvent::QrUpdated("late".into()));
        assert_eq!(outcome, PublishOutcome::Rejected);
        assert!(sub.try_next_event().is_none());
        assert!(broker.snapshot().ready);
    }

    #[test]
    fn test_disconnect_resets_to_uninitialized() {
        let broker = EventBroker::new(16);
        let mut sub = broker.register(EventFilter::Only(EventKind::Status));
        broker.publish(BrokerEvent::QrUpdated("qr".into()));
        broker.publish(BrokerEvent::StatusChanged(ConnectionStatus::Ready));

        broker.disconnect("socket closed");

        let snap = broker.snapshot();
        assert_eq!(snap.status, ConnectionStatus::Uninitialized);
        assert!(snap.qr_code.is_none());

        assert_eq!(
            sub.try_next_event(),
            Some(BrokerEvent::StatusChanged(ConnectionStatus::Ready))
        );
        assert_eq!(
            sub.try_next_event(),
            Some(BrokerEvent::StatusChanged(ConnectionStatus::Uninitialized))
        );
    }

    #[test]
    fn test_late_subscriber_starts_with_current_status() {
        let broker = EventBroker::new(16);
        let mut early = broker.register_with_status(EventFilter::All);
        assert!(early.try_next_event().is_none());

        broker.publish(BrokerEvent::StatusChanged(ConnectionStatus::Ready));

        let mut late = broker.register_with_status(EventFilter::All);
        let mut messages_only = broker.register_with_status(EventFilter::Only(EventKind::Message));
        broker.publish(BrokerEvent::MessageReceived(message("1", "a@c.us")));

        assert_eq!(
            late.try_next_event(),
            Some(BrokerEvent::StatusChanged(ConnectionStatus::Ready))
        );
        assert_eq!(late.try_next_event().map(|e| e.kind()), Some(EventKind::Message));
        assert_eq!(
            messages_only.try_next_event().map(|e| e.kind()),
            Some(EventKind::Message)
        );
        assert!(messages_only.try_next_event().is_none());
    }

    #[tokio::test]
    async fn test_close_all_ends_open_streams() {
        let broker = EventBroker::new(16);
        let mut sub = broker.register(EventFilter::All);

        broker.close_all();

        assert_eq!(broker.subscriber_count(), 0);
        assert!(sub.next_event().await.is_none());
    }
}
