use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::types::{ChatId, ConnectionStatus, Message, MessageId, SendOptions};

/// SSE event name for QR code frames.
pub const SSE_EVENT_QR: &str = "qr_code";
/// SSE event name for readiness frames.
pub const SSE_EVENT_READY: &str = "ready";
/// SSE event name for status frames.
pub const SSE_EVENT_STATUS: &str = "status";
/// SSE event name for message frames.
pub const SSE_EVENT_MESSAGE: &str = "message";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Qr,
    Status,
    Message,
}

/// Everything the broker fans out to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum BrokerEvent {
    QrUpdated(String),
    StatusChanged(ConnectionStatus),
    MessageReceived(Message),
}

impl BrokerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::QrUpdated(_) => EventKind::Qr,
            Self::StatusChanged(_) => EventKind::Status,
            Self::MessageReceived(_) => EventKind::Message,
        }
    }

    pub fn sse_name(&self) -> &'static str {
        match self {
            Self::QrUpdated(_) => SSE_EVENT_QR,
            Self::StatusChanged(_) => SSE_EVENT_STATUS,
            Self::MessageReceived(_) => SSE_EVENT_MESSAGE,
        }
    }

    pub fn into_message(self) -> Option<Message> {
        match self {
            Self::MessageReceived(msg) => Some(msg),
            _ => None,
        }
    }
}

/// Input of the send command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub to: ChatId,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quoted_message_id: Option<MessageId>,
}

impl SendMessageRequest {
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.to.as_str().trim().is_empty() {
            return Err(SyncError::InvalidRequest("missing recipient".into()));
        }
        if self.body.trim().is_empty() {
            return Err(SyncError::InvalidRequest("message body is empty".into()));
        }
        Ok(())
    }

    pub fn options(&self) -> SendOptions {
        SendOptions {
            quoted_message_id: self.quoted_message_id.clone(),
        }
    }
}

/// Point-in-time view of the connection, as served by the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub status: ConnectionStatus,
    pub qr_code: Option<String>,
    pub ready: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilePicture {
    pub url: String,
}

/// JSON body of every error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
}
