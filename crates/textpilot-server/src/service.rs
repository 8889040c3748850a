//! Owns the broker, the account handle and the bridge task.
//!
//! Lifecycle is explicit: [`ChatService::start`] wires the account's
//! notifications into the broker and kicks off pairing, [`ChatService::stop`]
//! tears it down and ends every open stream.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use textpilot_shared::{
    BrokerEvent, ChatId, ChatInfo, ConnectionStatus, LookupKind, Message, SendMessageRequest,
    StatusSnapshot, SyncError,
};

use crate::bridge;
use crate::broker::EventBroker;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::lookup::LookupCache;
use crate::upstream::{Upstream, UpstreamNotification};

type BridgeTask = (oneshot::Sender<()>, JoinHandle<()>);

pub struct ChatService {
    broker: EventBroker,
    upstream: Arc<dyn Upstream>,
    lookups: LookupCache,
    bridge: Mutex<Option<BridgeTask>>,
}

impl ChatService {
    pub async fn start(
        config: &ServerConfig,
        upstream: Arc<dyn Upstream>,
        notifications: mpsc::Receiver<UpstreamNotification>,
    ) -> Result<Arc<Self>, ServerError> {
        let broker = EventBroker::new(config.dedup_window);
        let lookups = LookupCache::new(upstream.clone(), config.lookup_cache_ttl);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(bridge::run(broker.clone(), notifications, shutdown_rx));

        let service = Arc::new(Self {
            broker,
            upstream,
            lookups,
            bridge: Mutex::new(Some((shutdown_tx, task))),
        });

        if let Err(e) = service.upstream.initialize().await {
            service.stop().await;
            return Err(e.into());
        }

        info!(dedup_window = config.dedup_window, "Chat service started");
        Ok(service)
    }

    /// Safe to call more than once.
    pub async fn stop(&self) {
        let Some((shutdown, task)) = self.bridge.lock().await.take() else {
            return;
        };

        // The bridge may already have exited on its own.
        let _ = shutdown.send(());
        if let Err(e) = task.await {
            warn!(error = %e, "Bridge task ended abnormally");
        }

        self.broker.close_all();
        info!("Chat service stopped");
    }

    /// Send through the account and fan the result out like any inbound
    /// message. Nothing is published when the account refuses.
    pub async fn send_message(&self, request: SendMessageRequest) -> Result<Message, ServerError> {
        request.validate()?;

        let message = self
            .upstream
            .send_message(&request.to, &request.body, request.options())
            .await
            .map_err(|e| {
                warn!(to = %request.to, error = %e, "Send rejected by account");
                SyncError::SendFailed(e.to_string())
            })?;

        let outcome = self
            .broker
            .publish(BrokerEvent::MessageReceived(message.clone()));
        info!(msg_id = %message.id, chat = %message.chat_id, ?outcome, "Message sent");
        Ok(message)
    }

    /// Saved contacts followed by joined groups. Group participants are
    /// left to [`ChatService::chat`].
    pub async fn chats(&self) -> Result<Vec<ChatInfo>, ServerError> {
        let contacts = self.upstream.get_contacts().await?;
        let groups = self.upstream.get_joined_groups().await?;

        let chats: Vec<ChatInfo> = contacts
            .iter()
            .filter(|contact| !contact.id.is_group())
            .map(ChatInfo::from_contact)
            .chain(groups.into_iter().map(|group| ChatInfo {
                participants: Vec::new(),
                ..ChatInfo::from_group(group)
            }))
            .collect();

        info!(count = chats.len(), "Chats listed");
        Ok(chats)
    }

    /// One chat with its profile picture and, for groups, the description
    /// and participants. A missing picture does not fail the lookup.
    pub async fn chat(&self, id: &ChatId) -> Result<ChatInfo, ServerError> {
        let mut chat = if id.is_group() {
            let group = self
                .upstream
                .get_group_info(id)
                .await?
                .ok_or_else(|| SyncError::not_found(LookupKind::Chat, id))?;
            ChatInfo::from_group(group)
        } else {
            let contact = self.lookups.contact(id).await.map_err(|e| match e {
                ServerError::Sync(SyncError::LookupNotFound { .. }) => {
                    SyncError::not_found(LookupKind::Chat, id).into()
                }
                other => other,
            })?;
            ChatInfo::from_contact(&contact)
        };

        chat.picture_url = match self.lookups.profile_pic_url(id).await {
            Ok(url) => Some(url),
            Err(ServerError::Sync(SyncError::LookupNotFound { .. })) => None,
            Err(e) => {
                warn!(chat = %id, error = %e, "Profile picture lookup failed");
                None
            }
        };

        debug!(chat = %id, is_group = chat.is_group, "Chat details resolved");
        Ok(chat)
    }

    /// Close the account session and fall back to `Uninitialized`. Open
    /// streams stay open and see the status change. Pairing again takes a
    /// new service.
    pub async fn disconnect(&self) -> Result<StatusSnapshot, ServerError> {
        self.upstream.logout().await?;

        if self.broker.snapshot().status != ConnectionStatus::Uninitialized {
            self.broker.disconnect("closed on request");
        }
        Ok(self.broker.snapshot())
    }

    pub fn broker(&self) -> &EventBroker {
        &self.broker
    }

    pub fn lookups(&self) -> &LookupCache {
        &self.lookups
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::StreamExt;
    use textpilot_shared::{Contact, EventKind, GroupInfo, Participant};

    use super::*;
    use crate::broker::EventFilter;
    use crate::simulated::{SimulatedConfig, SimulatedUpstream};
    use crate::streams;

    async fn started(config: SimulatedConfig) -> (Arc<ChatService>, SimulatedUpstream) {
        let (upstream, rx) = SimulatedUpstream::new(config);
        let service = ChatService::start(&ServerConfig::default(), Arc::new(upstream.clone()), rx)
            .await
            .unwrap();
        (service, upstream)
    }

    async fn wait_ready(service: &ChatService) {
        let ready = streams::ready_stream(
            service.broker().watch_snapshot(),
            Duration::from_millis(10),
        );
        let last = ready.collect::<Vec<_>>().await;
        assert_eq!(last.last(), Some(&true));
    }

    fn request(to: &str, body: &str) -> SendMessageRequest {
        SendMessageRequest {
            to: to.into(),
            body: body.into(),
            quoted_message_id: None,
        }
    }

    #[tokio::test]
    async fn test_start_publishes_qr() {
        let (service, _upstream) = started(SimulatedConfig::default()).await;
        let mut qr = Box::pin(streams::qr_code_stream(
            service.broker().watch_snapshot(),
            Duration::from_millis(10),
        ));

        let mut code = None;
        while code.is_none() {
            code = qr.next().await.flatten();
        }
        assert!(code.unwrap().starts_with("2@"));
        service.stop().await;
    }

    #[tokio::test]
    async fn test_send_reaches_message_subscribers_once() {
        let (service, upstream) = started(SimulatedConfig::default()).await;
        upstream.pair().await.unwrap();
        wait_ready(&service).await;

        let mut sub = service.broker().register(EventFilter::Only(EventKind::Message));
        let sent = service.send_message(request("a@c.us", "hello")).await.unwrap();

        let event = sub.next_event().await.unwrap();
        assert_eq!(event.into_message().map(|m| m.id), Some(sent.id));

        // The echo from the account is suppressed by the dedup window.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(sub.try_next_event().is_none());
        service.stop().await;
    }

    #[tokio::test]
    async fn test_failed_send_publishes_nothing() {
        let (service, _upstream) = started(SimulatedConfig::default()).await;
        let mut sub = service.broker().register(EventFilter::Only(EventKind::Message));

        let err = service
            .send_message(request("a@c.us", "hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Sync(SyncError::SendFailed(_))));
        assert!(sub.try_next_event().is_none());
        service.stop().await;
    }

    #[tokio::test]
    async fn test_invalid_request_is_rejected_before_sending() {
        let (service, _upstream) = started(SimulatedConfig::default()).await;
        let err = service.send_message(request("", "hello")).await.unwrap_err();
        assert!(matches!(err, ServerError::Sync(SyncError::InvalidRequest(_))));
        service.stop().await;
    }

    #[tokio::test]
    async fn test_inbound_message_and_disconnect_reach_event_stream() {
        let (service, upstream) = started(SimulatedConfig::default()).await;
        upstream.pair().await.unwrap();
        wait_ready(&service).await;

        let mut events = streams::event_stream(service.broker());
        assert_eq!(
            events.next().await,
            Some(BrokerEvent::StatusChanged(ConnectionStatus::Ready))
        );
        upstream
            .inject_incoming(Message {
                id: "IN-1".into(),
                chat_id: "b@c.us".into(),
                from_me: false,
                author: None,
                body: "yo".into(),
                timestamp: 10,
                quoted_message_id: None,
            })
            .await
            .unwrap();
        upstream.disconnect("phone offline").await.unwrap();

        let first = events.next().await.unwrap();
        assert_eq!(first.into_message().map(|m| m.id), Some("IN-1".into()));
        assert_eq!(
            events.next().await,
            Some(BrokerEvent::StatusChanged(ConnectionStatus::Uninitialized))
        );
        assert!(!service.broker().snapshot().ready);
        service.stop().await;
    }

    #[tokio::test]
    async fn test_chats_lists_contacts_then_groups() {
        let (service, upstream) = started(SimulatedConfig::default()).await;
        upstream
            .add_contact(
                Contact {
                    id: "1@c.us".into(),
                    name: Some("Ada Lovelace".into()),
                    push_name: Some("Ada".into()),
                    is_group: false,
                },
                None,
            )
            .await;
        upstream
            .add_contact(
                Contact {
                    id: "2@c.us".into(),
                    name: None,
                    push_name: None,
                    is_group: false,
                },
                None,
            )
            .await;
        upstream
            .add_group(GroupInfo {
                id: "team@g.us".into(),
                name: "Team".into(),
                topic: Some("Release planning".into()),
                participants: vec![Participant {
                    id: "1@c.us".into(),
                    is_admin: true,
                }],
            })
            .await;

        let chats = service.chats().await.unwrap();
        let names: Vec<_> = chats.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Ada", "2@c.us", "Team"]);

        let team = &chats[2];
        assert!(team.is_group);
        assert_eq!(team.description.as_deref(), Some("Release planning"));
        assert!(team.participants.is_empty());
        service.stop().await;
    }

    #[tokio::test]
    async fn test_chat_details_include_picture_and_participants() {
        let (service, upstream) = started(SimulatedConfig::default()).await;
        upstream
            .add_contact(
                Contact {
                    id: "1@c.us".into(),
                    name: Some("Ada".into()),
                    push_name: None,
                    is_group: false,
                },
                Some("https://pics/1".into()),
            )
            .await;
        upstream
            .add_group(GroupInfo {
                id: "team@g.us".into(),
                name: "Team".into(),
                topic: None,
                participants: vec![
                    Participant {
                        id: "1@c.us".into(),
                        is_admin: true,
                    },
                    Participant {
                        id: "2@c.us".into(),
                        is_admin: false,
                    },
                ],
            })
            .await;

        let ada = service.chat(&"1@c.us".into()).await.unwrap();
        assert_eq!(ada.name, "Ada");
        assert_eq!(ada.picture_url.as_deref(), Some("https://pics/1"));

        let team = service.chat(&"team@g.us".into()).await.unwrap();
        assert_eq!(team.participants.len(), 2);
        assert!(team.picture_url.is_none());

        for missing in ["9@c.us", "gone@g.us"] {
            let err = service.chat(&missing.into()).await.unwrap_err();
            assert!(matches!(
                err,
                ServerError::Sync(SyncError::LookupNotFound {
                    kind: LookupKind::Chat,
                    ..
                })
            ));
        }
        service.stop().await;
    }

    #[tokio::test]
    async fn test_disconnect_falls_back_to_uninitialized() {
        let (service, upstream) = started(SimulatedConfig::default()).await;
        upstream.pair().await.unwrap();
        wait_ready(&service).await;

        let mut status = service.broker().register(EventFilter::Only(EventKind::Status));
        let snapshot = service.disconnect().await.unwrap();

        assert_eq!(snapshot.status, ConnectionStatus::Uninitialized);
        assert!(!snapshot.ready);
        assert_eq!(
            status.try_next_event(),
            Some(BrokerEvent::StatusChanged(ConnectionStatus::Uninitialized))
        );

        // Already closed: nothing more to report.
        service.disconnect().await.unwrap();
        assert!(status.try_next_event().is_none());

        let err = service
            .send_message(request("a@c.us", "hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Sync(SyncError::SendFailed(_))));
        service.stop().await;
    }

    #[tokio::test]
    async fn test_stop_ends_open_streams() {
        let (service, _upstream) = started(SimulatedConfig::default()).await;
        let mut messages = Box::pin(streams::message_stream(service.broker()));

        service.stop().await;
        service.stop().await;

        assert_eq!(messages.next().await, None);
        assert_eq!(service.broker().subscriber_count(), 0);
        assert!(!matches!(
            service.broker().snapshot().status,
            ConnectionStatus::Ready
        ));
    }
}
