//! HTTP and SSE access to a TextPilot server.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::StatusCode;
use reqwest_eventsource::{Event, EventSource};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use textpilot_shared::constants::routes;
use textpilot_shared::error::UPSTREAM_ERROR_CODE;
use textpilot_shared::protocol::ProfilePicture;
use textpilot_shared::{
    ChatId, ChatInfo, Contact, LookupKind, Message, MessageId, SendMessageRequest, StatusSnapshot,
    SyncError,
};

use crate::error::{ClientError, Result};
use crate::events::{self, FeedItem};

/// A server stream. Ends when the server closes it; a broken connection
/// yields one error and then ends.
pub type Feed<T> = BoxStream<'static, Result<T>>;

/// What the sync layer needs from a server.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn send_message(&self, request: &SendMessageRequest) -> Result<Message>;
    async fn get_message(&self, id: &MessageId) -> Result<Message>;
    async fn get_contact(&self, id: &ChatId) -> Result<Contact>;
    async fn get_profile_pic_url(&self, id: &ChatId) -> Result<String>;
    async fn chats(&self) -> Result<Vec<ChatInfo>>;
    async fn chat(&self, id: &ChatId) -> Result<ChatInfo>;
    async fn status(&self) -> Result<StatusSnapshot>;
    /// Close the account session. Returns the resulting status.
    async fn disconnect(&self) -> Result<StatusSnapshot>;
    async fn message_feed(&self) -> Result<Feed<Message>>;
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(http: reqwest::Client, base_url: &str) -> Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/');
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ClientError::InvalidUrl(base_url.to_string()));
        }
        Ok(Self {
            http,
            base_url: base_url.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        lookup: Option<(LookupKind, &str)>,
    ) -> Result<T> {
        let resp = self.http.get(self.url(path)).send().await?;
        read_json(resp, lookup).await
    }

    /// Pairing QR codes until the account is ready.
    pub fn qr_feed(&self) -> Result<Feed<Option<String>>> {
        let feed = self.open_feed(routes::STREAM_QR)?;
        Ok(feed
            .filter_map(|item| async move {
                match item {
                    Ok(FeedItem::Qr(code)) => Some(Ok(code)),
                    Ok(_) => None,
                    Err(e) => Some(Err(e)),
                }
            })
            .boxed())
    }

    /// Readiness flags until `true`.
    pub fn ready_feed(&self) -> Result<Feed<bool>> {
        let feed = self.open_feed(routes::STREAM_READY)?;
        Ok(feed
            .filter_map(|item| async move {
                match item {
                    Ok(FeedItem::Ready(ready)) => Some(Ok(ready)),
                    Ok(_) => None,
                    Err(e) => Some(Err(e)),
                }
            })
            .boxed())
    }

    /// Every broker event: QR codes, status changes and messages.
    pub fn event_feed(&self) -> Result<Feed<FeedItem>> {
        self.open_feed(routes::STREAM_EVENTS)
    }

    fn open_feed(&self, path: &str) -> Result<Feed<FeedItem>> {
        let source = EventSource::new(self.http.get(self.url(path)))
            .map_err(|e| ClientError::Stream(e.to_string()))?;
        let path = path.to_string();
        debug!(path = %path, "Opening event stream");

        let feed = stream::unfold(Some(source), move |state| {
            let path = path.clone();
            async move {
                let mut source = state?;
                loop {
                    match source.next().await {
                        None => return None,
                        Some(Ok(Event::Open)) => continue,
                        Some(Ok(Event::Message(frame))) => {
                            match events::decode(&frame.event, &frame.data) {
                                Ok(FeedItem::Other(name)) => {
                                    debug!(path = %path, event = %name, "Skipping unknown event");
                                }
                                item => return Some((item, Some(source))),
                            }
                        }
                        Some(Err(reqwest_eventsource::Error::StreamEnded)) => {
                            debug!(path = %path, "Event stream closed by server");
                            source.close();
                            return None;
                        }
                        Some(Err(e)) => {
                            warn!(path = %path, error = %e, "Event stream failed");
                            source.close();
                            let err = match e {
                                reqwest_eventsource::Error::Transport(e) => ClientError::Http(e),
                                reqwest_eventsource::Error::InvalidStatusCode(status, resp) => {
                                    error_from_response(status, resp, None).await
                                }
                                other => ClientError::Stream(other.to_string()),
                            };
                            return Some((Err(err), None));
                        }
                    }
                }
            }
        });
        Ok(feed.boxed())
    }
}

#[async_trait]
impl ChatApi for ApiClient {
    async fn send_message(&self, request: &SendMessageRequest) -> Result<Message> {
        let resp = self
            .http
            .post(self.url(routes::MESSAGES))
            .json(request)
            .send()
            .await?;
        read_json(resp, None).await
    }

    async fn get_message(&self, id: &MessageId) -> Result<Message> {
        let path = routes::with_id(routes::MESSAGE_BY_ID, id.as_str());
        self.get_json(&path, Some((LookupKind::Message, id.as_str())))
            .await
    }

    async fn get_contact(&self, id: &ChatId) -> Result<Contact> {
        let path = routes::with_id(routes::CONTACT, id.as_str());
        self.get_json(&path, Some((LookupKind::Contact, id.as_str())))
            .await
    }

    async fn get_profile_pic_url(&self, id: &ChatId) -> Result<String> {
        let path = routes::with_id(routes::CONTACT_PICTURE, id.as_str());
        let picture: ProfilePicture = self
            .get_json(&path, Some((LookupKind::ProfilePicture, id.as_str())))
            .await?;
        Ok(picture.url)
    }

    async fn chats(&self) -> Result<Vec<ChatInfo>> {
        self.get_json(routes::CHATS, None).await
    }

    async fn chat(&self, id: &ChatId) -> Result<ChatInfo> {
        let path = routes::with_id(routes::CHAT_BY_ID, id.as_str());
        self.get_json(&path, Some((LookupKind::Chat, id.as_str())))
            .await
    }

    async fn status(&self) -> Result<StatusSnapshot> {
        self.get_json(routes::STATUS, None).await
    }

    async fn disconnect(&self) -> Result<StatusSnapshot> {
        let resp = self.http.post(self.url(routes::DISCONNECT)).send().await?;
        read_json(resp, None).await
    }

    async fn message_feed(&self) -> Result<Feed<Message>> {
        let feed = self.open_feed(routes::STREAM_MESSAGES)?;
        Ok(feed
            .filter_map(|item| async move {
                match item {
                    Ok(FeedItem::Message(message)) => Some(Ok(message)),
                    Ok(_) => None,
                    Err(e) => Some(Err(e)),
                }
            })
            .boxed())
    }
}

async fn read_json<T: DeserializeOwned>(
    resp: reqwest::Response,
    lookup: Option<(LookupKind, &str)>,
) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
        return Err(error_from_response(status, resp, lookup).await);
    }
    Ok(resp.json().await?)
}

#[derive(Deserialize)]
struct LooseErrorBody {
    error: Option<String>,
    code: Option<String>,
}

async fn error_from_response(
    status: StatusCode,
    resp: reqwest::Response,
    lookup: Option<(LookupKind, &str)>,
) -> ClientError {
    let text = resp.text().await.unwrap_or_default();
    let (message, code) = match serde_json::from_str::<LooseErrorBody>(&text) {
        Ok(body) => (body.error.unwrap_or_default(), body.code),
        Err(_) => (text, None),
    };
    classify_error(status, code.as_deref(), message, lookup)
}

/// Map an error response onto the client's error types. The server's error
/// code wins; the status is only consulted when the code is missing or
/// unknown.
fn classify_error(
    status: StatusCode,
    code: Option<&str>,
    message: String,
    lookup: Option<(LookupKind, &str)>,
) -> ClientError {
    match (code, lookup) {
        (Some("LOOKUP_NOT_FOUND"), Some((kind, id))) => SyncError::not_found(kind, id).into(),
        (Some("SEND_FAILED"), _) => SyncError::SendFailed(message).into(),
        (Some("INVALID_REQUEST"), _) => SyncError::InvalidRequest(message).into(),
        (Some("UPSTREAM_DISCONNECTED"), _) => SyncError::UpstreamDisconnected.into(),
        (Some(UPSTREAM_ERROR_CODE), _) => ClientError::Upstream(message),
        _ => error_for_status(status, message, lookup),
    }
}

fn error_for_status(
    status: StatusCode,
    message: String,
    lookup: Option<(LookupKind, &str)>,
) -> ClientError {
    match (status, lookup) {
        (StatusCode::NOT_FOUND, Some((kind, id))) => SyncError::not_found(kind, id).into(),
        // Only a send can fail this way without a code to say otherwise.
        (StatusCode::BAD_GATEWAY, None) => SyncError::SendFailed(message).into(),
        (StatusCode::BAD_GATEWAY, Some(_)) => ClientError::Upstream(message),
        (StatusCode::BAD_REQUEST, _) => SyncError::InvalidRequest(message).into(),
        (StatusCode::SERVICE_UNAVAILABLE, _) => SyncError::UpstreamDisconnected.into(),
        _ => ClientError::Server {
            status: status.as_u16(),
            message,
        },
    }
}
