//! Seam to the external messaging account.
//!
//! Outbound calls go through the [`Upstream`] trait. Inbound callbacks
//! (ready, QR, authenticated, message, disconnect) arrive as
//! [`UpstreamNotification`]s on an mpsc channel owned by the bridge task.

use async_trait::async_trait;
use thiserror::Error;

use textpilot_shared::{
    ChatId, Contact, Credentials, GroupInfo, Message, MessageId, SendOptions,
};

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("Account is not connected")]
    NotConnected,

    #[error("Rejected by account: {0}")]
    Rejected(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Notifications sent *from* the account to the broker.
#[derive(Debug, Clone)]
pub enum UpstreamNotification {
    Ready,
    Qr(String),
    Authenticated(Credentials),
    Message(Message),
    Disconnected { reason: String },
}

#[async_trait]
pub trait Upstream: Send + Sync {
    /// Start pairing / connecting. Progress is reported as notifications.
    async fn initialize(&self) -> Result<(), UpstreamError>;

    /// Send a text message and return it as the account recorded it, with
    /// the account-assigned id and timestamp.
    async fn send_message(
        &self,
        to: &ChatId,
        body: &str,
        opts: SendOptions,
    ) -> Result<Message, UpstreamError>;

    async fn get_contact(&self, id: &ChatId) -> Result<Option<Contact>, UpstreamError>;

    async fn get_profile_pic_url(&self, id: &ChatId) -> Result<Option<String>, UpstreamError>;

    async fn get_message(&self, id: &MessageId) -> Result<Option<Message>, UpstreamError>;

    /// Every saved contact, groups excluded.
    async fn get_contacts(&self) -> Result<Vec<Contact>, UpstreamError>;

    async fn get_joined_groups(&self) -> Result<Vec<GroupInfo>, UpstreamError>;

    async fn get_group_info(&self, id: &ChatId) -> Result<Option<GroupInfo>, UpstreamError>;

    /// Close the session. The caller reports the resulting status; no
    /// `Disconnected` notification follows. Closing a closed session is a
    /// no-op.
    async fn logout(&self) -> Result<(), UpstreamError>;
}
