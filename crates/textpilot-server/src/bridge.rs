use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use textpilot_shared::{BrokerEvent, ConnectionStatus};

use crate::broker::{EventBroker, PublishOutcome};
use crate::upstream::UpstreamNotification;

/// Forward account notifications into the broker until the channel closes
/// or shutdown is requested.
pub async fn run(
    broker: EventBroker,
    mut notifications: mpsc::Receiver<UpstreamNotification>,
    mut shutdown: oneshot::Receiver<()>,
) {
    info!("Upstream bridge started");

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Upstream bridge shutting down");
                return;
            }
            notification = notifications.recv() => match notification {
                Some(notification) => {
                    let outcome = handle(&broker, notification);
                    debug!(?outcome, "Notification forwarded");
                }
                None => {
                    // The account went away without saying so.
                    broker.disconnect("notification channel closed");
                    warn!("Upstream notification loop ended");
                    return;
                }
            }
        }
    }
}

/// One notification, one publish.
pub fn handle(broker: &EventBroker, notification: UpstreamNotification) -> PublishOutcome {
    match notification {
        UpstreamNotification::Ready => {
            broker.publish(BrokerEvent::StatusChanged(ConnectionStatus::Ready))
        }
        UpstreamNotification::Qr(code) => broker.publish(BrokerEvent::QrUpdated(code)),
        UpstreamNotification::Authenticated(credentials) => {
            info!(browser_id = %credentials.browser_id, "Account authenticated");
            broker.publish(BrokerEvent::StatusChanged(
                ConnectionStatus::Authenticated { credentials },
            ))
        }
        UpstreamNotification::Message(message) => {
            debug!(msg_id = %message.id, chat = %message.chat_id, "Inbound message");
            broker.publish(BrokerEvent::MessageReceived(message))
        }
        UpstreamNotification::Disconnected { reason } => broker.disconnect(&reason),
    }
}
