//! In-process stand-in for the external messaging account.
//!
//! Used by the binary for local development and by the tests. It walks
//! through the same callback sequence a real account would (QR, then
//! authenticated, then ready), assigns ids and timestamps to sent messages
//! and can echo them back as inbound notifications, which is how real
//! accounts report messages sent from this session.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use textpilot_shared::{
    ChatId, Contact, Credentials, GroupInfo, Message, MessageId, SendOptions,
};

use crate::upstream::{Upstream, UpstreamError, UpstreamNotification};

/// Capacity of the notification channel handed to the bridge.
const NOTIFICATION_BUFFER: usize = 100;

#[derive(Debug, Clone)]
pub struct SimulatedConfig {
    /// Pair automatically this long after `initialize`. `None` waits for
    /// an explicit [`SimulatedUpstream::pair`].
    pub pairing_delay: Option<Duration>,
    /// Report every sent message back as an inbound notification.
    pub echo_sent: bool,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            pairing_delay: None,
            echo_sent: true,
        }
    }
}

#[derive(Default)]
struct SimState {
    ready: bool,
    messages: HashMap<MessageId, Message>,
    contacts: HashMap<ChatId, Contact>,
    groups: HashMap<ChatId, GroupInfo>,
    pictures: HashMap<ChatId, String>,
}

#[derive(Clone)]
pub struct SimulatedUpstream {
    config: SimulatedConfig,
    tx: mpsc::Sender<UpstreamNotification>,
    state: Arc<RwLock<SimState>>,
}

impl SimulatedUpstream {
    pub fn new(config: SimulatedConfig) -> (Self, mpsc::Receiver<UpstreamNotification>) {
        let (tx, rx) = mpsc::channel(NOTIFICATION_BUFFER);
        let upstream = Self {
            config,
            tx,
            state: Arc::new(RwLock::new(SimState::default())),
        };
        (upstream, rx)
    }

    /// Complete pairing: authenticated, then ready.
    pub async fn pair(&self) -> Result<(), UpstreamError> {
        let credentials = Credentials {
            browser_id: Uuid::new_v4().to_string(),
            secret_bundle: Uuid::new_v4().simple().to_string(),
            token1: Uuid::new_v4().simple().to_string(),
            token2: Uuid::new_v4().simple().to_string(),
        };
        self.notify(UpstreamNotification::Authenticated(credentials))
            .await?;

        self.state.write().await.ready = true;
        self.notify(UpstreamNotification::Ready).await?;
        info!("Simulated account paired");
        Ok(())
    }

    /// Deliver a message as if a remote contact had sent it.
    pub async fn inject_incoming(&self, message: Message) -> Result<(), UpstreamError> {
        self.state
            .write()
            .await
            .messages
            .insert(message.id.clone(), message.clone());
        self.notify(UpstreamNotification::Message(message)).await
    }

    pub async fn disconnect(&self, reason: &str) -> Result<(), UpstreamError> {
        self.state.write().await.ready = false;
        self.notify(UpstreamNotification::Disconnected {
            reason: reason.to_string(),
        })
        .await
    }

    pub async fn add_contact(&self, contact: Contact, picture_url: Option<String>) {
        let mut state = self.state.write().await;
        if let Some(url) = picture_url {
            state.pictures.insert(contact.id.clone(), url);
        }
        state.contacts.insert(contact.id.clone(), contact);
    }

    /// Join a group, replacing any earlier metadata for it.
    pub async fn add_group(&self, group: GroupInfo) {
        self.state
            .write()
            .await
            .groups
            .insert(group.id.clone(), group);
    }

    async fn notify(&self, notification: UpstreamNotification) -> Result<(), UpstreamError> {
        self.tx
            .send(notification)
            .await
            .map_err(|_| UpstreamError::Transport("notification channel closed".into()))
    }
}

fn next_message_id() -> MessageId {
    let raw = Uuid::new_v4().simple().to_string().to_uppercase();
    MessageId(format!("3EB0{}", &raw[..16]))
}

#[async_trait]
impl Upstream for SimulatedUpstream {
    async fn initialize(&self) -> Result<(), UpstreamError> {
        let code = format!("2@{}", Uuid::new_v4().simple());
        self.notify(UpstreamNotification::Qr(code)).await?;

        if let Some(delay) = self.config.pairing_delay {
            let upstream = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Err(e) = upstream.pair().await {
                    warn!(error = %e, "Simulated pairing failed");
                }
            });
        }
        Ok(())
    }

    async fn send_message(
        &self,
        to: &ChatId,
        body: &str,
        opts: SendOptions,
    ) -> Result<Message, UpstreamError> {
        let message = {
            let mut state = self.state.write().await;
            if !state.ready {
                return Err(UpstreamError::NotConnected);
            }

            if let Some(quoted) = &opts.quoted_message_id {
                if !state.messages.contains_key(quoted) {
                    return Err(UpstreamError::Rejected(format!(
                        "quoted message {quoted} is unknown"
                    )));
                }
            }

            let message = Message {
                id: next_message_id(),
                chat_id: to.clone(),
                from_me: true,
                author: None,
                body: body.to_string(),
                timestamp: Utc::now().timestamp(),
                quoted_message_id: opts.quoted_message_id,
            };
            state.messages.insert(message.id.clone(), message.clone());
            message
        };

        debug!(msg_id = %message.id, chat = %to, "Simulated send");

        if self.config.echo_sent {
            self.notify(UpstreamNotification::Message(message.clone()))
                .await?;
        }
        Ok(message)
    }

    async fn get_contact(&self, id: &ChatId) -> Result<Option<Contact>, UpstreamError> {
        Ok(self.state.read().await.contacts.get(id).cloned())
    }

    async fn get_profile_pic_url(&self, id: &ChatId) -> Result<Option<String>, UpstreamError> {
        Ok(self.state.read().await.pictures.get(id).cloned())
    }

    async fn get_message(&self, id: &MessageId) -> Result<Option<Message>, UpstreamError> {
        Ok(self.state.read().await.messages.get(id).cloned())
    }

    async fn get_contacts(&self) -> Result<Vec<Contact>, UpstreamError> {
        let state = self.state.read().await;
        let mut contacts: Vec<Contact> = state
            .contacts
            .values()
            .filter(|c| !c.id.is_group())
            .cloned()
            .collect();
        contacts.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(contacts)
    }

    async fn get_joined_groups(&self) -> Result<Vec<GroupInfo>, UpstreamError> {
        let state = self.state.read().await;
        let mut groups: Vec<GroupInfo> = state.groups.values().cloned().collect();
        groups.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(groups)
    }

    async fn get_group_info(&self, id: &ChatId) -> Result<Option<GroupInfo>, UpstreamError> {
        Ok(self.state.read().await.groups.get(id).cloned())
    }

    async fn logout(&self) -> Result<(), UpstreamError> {
        let mut state = self.state.write().await;
        if state.ready {
            state.ready = false;
            info!("Simulated account logged out");
        }
        Ok(())
    }
}
