use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Server-assigned message identity, stable across retransmission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// Remote conversation identifier, e.g. `1234567890@c.us` or `...@g.us`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ChatId(pub String);

impl ChatId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_group(&self) -> bool {
        self.0.ends_with("@g.us")
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChatId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ChatId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A single chat message as seen by every layer of the system.
///
/// Two messages with the same [`MessageId`] are the same entity, whatever
/// their other fields say. The quoted message is referenced by id only and
/// resolved lazily by whoever needs it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub from_me: bool,
    /// Set for group messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub body: String,
    /// Seconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quoted_message_id: Option<MessageId>,
}

impl Message {
    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.timestamp, 0).single()
    }
}

/// Session credentials reported by the account after pairing.
///
/// Only the browser id ever leaves the server; the secret parts are skipped
/// during serialization and redacted from `Debug` output.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub browser_id: String,
    #[serde(skip_serializing, default)]
    pub secret_bundle: String,
    #[serde(skip_serializing, default)]
    pub token1: String,
    #[serde(skip_serializing, default)]
    pub token2: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("browser_id", &self.browser_id)
            .field("secret_bundle", &"<redacted>")
            .field("token1", &"<redacted>")
            .field("token2", &"<redacted>")
            .finish()
    }
}

/// Lifecycle of the upstream account connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Uninitialized,
    AwaitingQr {
        code: String,
    },
    Authenticated {
        credentials: Credentials,
    },
    Ready,
}

impl ConnectionStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    pub fn qr_code(&self) -> Option<&str> {
        match self {
            Self::AwaitingQr { code } => Some(code),
            _ => None,
        }
    }

    pub fn rank(&self) -> u8 {
        match self {
            Self::Uninitialized => 0,
            Self::AwaitingQr { .. } => 1,
            Self::Authenticated { .. } => 2,
            Self::Ready => 3,
        }
    }

    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// Transitions only move forward, except that any state may fall back to
    /// `Uninitialized` on a hard disconnect and a pending QR may be refreshed.
    pub fn accepts(&self, next: &ConnectionStatus) -> bool {
        match (self, next) {
            (_, Self::Uninitialized) => true,
            (Self::AwaitingQr { .. }, Self::AwaitingQr { .. }) => true,
            _ => next.rank() > self.rank(),
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Uninitialized => "uninitialized",
            Self::AwaitingQr { .. } => "awaiting_qr",
            Self::Authenticated { .. } => "authenticated",
            Self::Ready => "ready",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: ChatId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_name: Option<String>,
    pub is_group: bool,
}

impl Contact {
    /// Push name first, then the saved name, then the raw chat id.
    pub fn display_name(&self) -> &str {
        self.push_name
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| self.name.as_deref().filter(|s| !s.is_empty()))
            .unwrap_or(self.id.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: ChatId,
    pub is_admin: bool,
}

/// Group metadata as the account reports it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GroupInfo {
    pub id: ChatId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default)]
    pub participants: Vec<Participant>,
}

/// A conversation the account can reach: a saved contact or a joined group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatInfo {
    pub id: ChatId,
    pub name: String,
    pub is_group: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub participants: Vec<Participant>,
}

impl ChatInfo {
    pub fn from_contact(contact: &Contact) -> Self {
        Self {
            id: contact.id.clone(),
            name: contact.display_name().to_string(),
            is_group: contact.id.is_group(),
            description: None,
            picture_url: None,
            participants: Vec::new(),
        }
    }

    /// Unnamed groups fall back to their id.
    pub fn from_group(group: GroupInfo) -> Self {
        let name = if group.name.is_empty() {
            group.id.to_string()
        } else {
            group.name
        };
        Self {
            id: group.id,
            name,
            is_group: true,
            description: group.topic.filter(|t| !t.is_empty()),
            picture_url: None,
            participants: group.participants,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SendOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quoted_message_id: Option<MessageId>,
}
