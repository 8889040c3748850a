//! Read-through cache for contact, profile picture and quoted-message
//! lookups against the account.
//!
//! Hits are served from memory while fresh; misses and absent results go to
//! the account every time, so a contact that appears later is found.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use textpilot_shared::{ChatId, Contact, LookupKind, Message, MessageId, SyncError};

use crate::error::ServerError;
use crate::upstream::Upstream;

#[derive(Debug, Clone)]
struct Cached<V> {
    value: V,
    cached_at: DateTime<Utc>,
}

struct TtlMap<K, V> {
    entries: RwLock<HashMap<K, Cached<V>>>,
    ttl: Duration,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlMap<K, V> {
    fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    async fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|entry| Utc::now() - entry.cached_at < self.ttl)
            .map(|entry| entry.value.clone())
    }

    async fn insert(&self, key: K, value: V) {
        self.entries.write().await.insert(
            key,
            Cached {
                value,
                cached_at: Utc::now(),
            },
        );
    }

    async fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        let now = Utc::now();
        entries.retain(|_, entry| now - entry.cached_at < self.ttl);
        before - entries.len()
    }
}

#[derive(Clone)]
pub struct LookupCache {
    upstream: Arc<dyn Upstream>,
    contacts: Arc<TtlMap<ChatId, Contact>>,
    pictures: Arc<TtlMap<ChatId, String>>,
    messages: Arc<TtlMap<MessageId, Message>>,
}

impl LookupCache {
    pub fn new(upstream: Arc<dyn Upstream>, ttl: Duration) -> Self {
        Self {
            upstream,
            contacts: Arc::new(TtlMap::new(ttl)),
            pictures: Arc::new(TtlMap::new(ttl)),
            messages: Arc::new(TtlMap::new(ttl)),
        }
    }

    pub async fn contact(&self, id: &ChatId) -> Result<Contact, ServerError> {
        if let Some(contact) = self.contacts.get(id).await {
            debug!(chat = %id, "Contact served from cache");
            return Ok(contact);
        }

        let contact = self
            .upstream
            .get_contact(id)
            .await?
            .ok_or_else(|| SyncError::not_found(LookupKind::Contact, id))?;
        self.contacts.insert(id.clone(), contact.clone()).await;
        Ok(contact)
    }

    pub async fn profile_pic_url(&self, id: &ChatId) -> Result<String, ServerError> {
        if let Some(url) = self.pictures.get(id).await {
            return Ok(url);
        }

        let url = self
            .upstream
            .get_profile_pic_url(id)
            .await?
            .ok_or_else(|| SyncError::not_found(LookupKind::ProfilePicture, id))?;
        self.pictures.insert(id.clone(), url.clone()).await;
        Ok(url)
    }

    pub async fn message(&self, id: &MessageId) -> Result<Message, ServerError> {
        if let Some(message) = self.messages.get(id).await {
            return Ok(message);
        }

        let message = self
            .upstream
            .get_message(id)
            .await?
            .ok_or_else(|| SyncError::not_found(LookupKind::Message, id))?;
        self.messages.insert(id.clone(), message.clone()).await;
        Ok(message)
    }

    /// Drop stale entries. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        self.contacts.purge_expired().await
            + self.pictures.purge_expired().await
            + self.messages.purge_expired().await
    }
}
