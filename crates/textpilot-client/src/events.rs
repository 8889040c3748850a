use serde::de::DeserializeOwned;

use textpilot_shared::protocol::{SSE_EVENT_MESSAGE, SSE_EVENT_QR, SSE_EVENT_READY, SSE_EVENT_STATUS};
use textpilot_shared::{ConnectionStatus, Message, SyncError};

use crate::error::Result;

/// One decoded frame of a server stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedItem {
    /// Current pairing code, `None` while there is none.
    Qr(Option<String>),
    Ready(bool),
    Status(ConnectionStatus),
    Message(Message),
    /// An event name this client does not know. Skipped by the feeds.
    Other(String),
}

fn parse<T: DeserializeOwned>(data: &str) -> Result<T> {
    serde_json::from_str(data).map_err(|e| SyncError::from(e).into())
}

/// Turn an SSE frame into a typed item.
pub fn decode(name: &str, data: &str) -> Result<FeedItem> {
    let item = match name {
        SSE_EVENT_QR => FeedItem::Qr(parse(data)?),
        SSE_EVENT_READY => FeedItem::Ready(parse(data)?),
        SSE_EVENT_STATUS => FeedItem::Status(parse(data)?),
        SSE_EVENT_MESSAGE => FeedItem::Message(parse(data)?),
        other => FeedItem::Other(other.to_string()),
    };
    Ok(item)
}
