//! Client-facing streams built on top of the broker.
//!
//! The QR and readiness streams sample the status snapshot: they emit right
//! away, then again whenever the snapshot changes or the interval elapses,
//! and finish immediately after emitting a ready snapshot. The message and
//! event streams never finish on their own; dropping them deregisters the
//! underlying [`Subscription`].

use std::time::Duration;

use futures::{future, stream, Stream, StreamExt};
use tokio::sync::watch;

use textpilot_shared::{EventKind, Message, StatusSnapshot};

use crate::broker::{EventBroker, EventFilter};
use crate::subscription::Subscription;

enum Sampling {
    First(watch::Receiver<StatusSnapshot>),
    Next(watch::Receiver<StatusSnapshot>),
    Done,
}

fn sample_snapshots(
    rx: watch::Receiver<StatusSnapshot>,
    interval: Duration,
) -> impl Stream<Item = StatusSnapshot> {
    stream::unfold(Sampling::First(rx), move |state| async move {
        let mut rx = match state {
            Sampling::First(rx) => rx,
            Sampling::Next(mut rx) => {
                // Wake on change or after the interval, whichever comes first.
                if let Ok(Err(_)) = tokio::time::timeout(interval, rx.changed()).await {
                    return None;
                }
                rx
            }
            Sampling::Done => return None,
        };

        let snapshot = rx.borrow_and_update().clone();
        let next = if snapshot.ready {
            Sampling::Done
        } else {
            Sampling::Next(rx)
        };
        Some((snapshot, next))
    })
}

/// Current QR code (or `None`) until the connection is ready.
pub fn qr_code_stream(
    rx: watch::Receiver<StatusSnapshot>,
    interval: Duration,
) -> impl Stream<Item = Option<String>> {
    sample_snapshots(rx, interval).map(|snapshot| snapshot.qr_code)
}

/// Readiness flag until it turns `true`.
pub fn ready_stream(
    rx: watch::Receiver<StatusSnapshot>,
    interval: Duration,
) -> impl Stream<Item = bool> {
    sample_snapshots(rx, interval).map(|snapshot| snapshot.ready)
}

/// Every message fanned out after the call, in publish order.
pub fn message_stream(broker: &EventBroker) -> impl Stream<Item = Message> {
    broker
        .register(EventFilter::Only(EventKind::Message))
        .filter_map(|event| future::ready(event.into_message()))
}

/// Every broker event of any kind, led by the current status once the
/// connection has left `Uninitialized`.
pub fn event_stream(broker: &EventBroker) -> Subscription {
    broker.register_with_status(EventFilter::All)
}
