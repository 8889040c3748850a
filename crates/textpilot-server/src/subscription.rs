use std::pin::Pin;
use std::sync::{Mutex, Weak};
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tracing::trace;

use textpilot_shared::BrokerEvent;

use crate::broker::{lock_registry, Registry, SubscriptionId};

/// One client's view of the broker: an ordered queue of pending events.
///
/// The subscription is `Active` until [`Subscription::close`] runs or the
/// value is dropped, after which it is `Closed` for good. Dropping is the
/// cleanup path for cancelled HTTP streams: it deregisters the queue from
/// the broker so later publishes no longer reach it.
pub struct Subscription {
    id: SubscriptionId,
    rx: mpsc::UnboundedReceiver<BrokerEvent>,
    registry: Weak<Mutex<Registry>>,
    closed: bool,
}

impl Subscription {
    pub(crate) fn new(
        id: SubscriptionId,
        rx: mpsc::UnboundedReceiver<BrokerEvent>,
        registry: Weak<Mutex<Registry>>,
    ) -> Self {
        Self {
            id,
            rx,
            registry,
            closed: false,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Wait for the next event. `None` once closed or once the broker has
    /// dropped this queue.
    pub async fn next_event(&mut self) -> Option<BrokerEvent> {
        if self.closed {
            return None;
        }
        self.rx.recv().await
    }

    /// Dequeue without waiting.
    pub fn try_next_event(&mut self) -> Option<BrokerEvent> {
        if self.closed {
            return None;
        }
        self.rx.try_recv().ok()
    }

    /// Discard the queue and deregister. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.rx.close();

        if let Some(registry) = self.registry.upgrade() {
            lock_registry(&registry).remove(self.id);
        }
        trace!(subscription = self.id, "Subscription closed");
    }
}

impl Stream for Subscription {
    type Item = BrokerEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.closed {
            return Poll::Ready(None);
        }
        this.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}
