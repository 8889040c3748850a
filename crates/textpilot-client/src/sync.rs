//! Keeps a [`ChatStore`] in step with the server.
//!
//! Two paths feed the store: the live message feed and the return value of
//! local sends. The server reports a sent message on both, in either order,
//! and the store's id-keyed merge keeps exactly one copy.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use textpilot_shared::{ChatId, Message, MessageId, SendMessageRequest};

use crate::api::ChatApi;
use crate::error::{ClientError, Result};
use crate::store::ChatStore;

fn lock_store(store: &Mutex<ChatStore>) -> MutexGuard<'_, ChatStore> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone)]
pub struct ChatSync {
    store: Arc<Mutex<ChatStore>>,
    api: Arc<dyn ChatApi>,
}

impl ChatSync {
    pub fn new(api: Arc<dyn ChatApi>) -> Self {
        Self::with_store(api, Arc::new(Mutex::new(ChatStore::new())))
    }

    pub fn with_store(api: Arc<dyn ChatApi>, store: Arc<Mutex<ChatStore>>) -> Self {
        Self { store, api }
    }

    /// Lock the store for reading or for selection and composer changes.
    /// Do not hold the guard across an await.
    pub fn lock(&self) -> MutexGuard<'_, ChatStore> {
        lock_store(&self.store)
    }

    pub fn store(&self) -> Arc<Mutex<ChatStore>> {
        self.store.clone()
    }

    /// Send the draft to the open chat, quoting the reply target if any.
    ///
    /// On failure the draft, selection and reply target are left as they
    /// were so the user can retry.
    pub async fn send_draft(&self) -> Result<Message> {
        let request = self.lock().take_outgoing()?;
        let message = self.send_request(&request).await?;

        let mut store = self.lock();
        if store.is_composing(&request) {
            store.complete_send(message.clone());
        } else {
            // The user moved on while the send was in flight.
            store.merge(message.clone());
        }
        Ok(message)
    }

    /// Send without touching the composer.
    pub async fn send_to(
        &self,
        to: ChatId,
        body: impl Into<String>,
        quoted_message_id: Option<MessageId>,
    ) -> Result<Message> {
        let request = SendMessageRequest {
            to,
            body: body.into(),
            quoted_message_id,
        };
        request.validate()?;

        let message = self.send_request(&request).await?;
        self.lock().merge(message.clone());
        Ok(message)
    }

    async fn send_request(&self, request: &SendMessageRequest) -> Result<Message> {
        match self.api.send_message(request).await {
            Ok(message) => {
                info!(msg_id = %message.id, chat = %message.chat_id, "Message sent");
                Ok(message)
            }
            Err(e) => {
                warn!(to = %request.to, error = %e, "Send failed");
                Err(e)
            }
        }
    }

    /// Merge every message from the server's live feed until it ends.
    pub async fn spawn_message_feed(&self) -> Result<FeedHandle> {
        let mut feed = self.api.message_feed().await?;
        let store = self.store.clone();

        let task = tokio::spawn(async move {
            let mut merged = 0usize;
            while let Some(item) = feed.next().await {
                let message = item?;
                if lock_store(&store).merge(message).is_inserted() {
                    merged += 1;
                }
            }
            debug!(merged, "Message feed ended");
            Ok::<_, ClientError>(merged)
        });

        Ok(FeedHandle { task: Some(task) })
    }

    /// The message `message` quotes: from the store when present, otherwise
    /// from the server. The fetched message is not merged.
    pub async fn resolve_quoted(&self, message: &Message) -> Result<Option<Message>> {
        let Some(id) = &message.quoted_message_id else {
            return Ok(None);
        };

        let local = self.lock().message(id).cloned();
        if local.is_some() {
            return Ok(local);
        }
        self.api.get_message(id).await.map(Some)
    }
}

/// Running message feed. Dropping the handle stops the feed.
pub struct FeedHandle {
    task: Option<JoinHandle<Result<usize>>>,
}

impl FeedHandle {
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait for the feed to end. Returns how many new messages it merged.
    pub async fn join(mut self) -> Result<usize> {
        let Some(task) = self.task.take() else {
            return Ok(0);
        };
        task.await
            .map_err(|e| ClientError::Stream(format!("message feed task failed: {e}")))?
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
