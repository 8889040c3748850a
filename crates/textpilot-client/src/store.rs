//! Client-side message store.
//!
//! Every message, whether it arrived on the live feed or came back from a
//! local send, goes through [`ChatStore::merge`]. The merge is keyed on the
//! server-assigned [`MessageId`], so the same message seen on both paths is
//! kept once. Chat summaries and unread counts are maintained as messages
//! arrive instead of being recomputed from the full history.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};

use tracing::{debug, trace};

use textpilot_shared::{ChatId, Message, MessageId, SendMessageRequest};

use crate::error::{ClientError, Result};
use crate::state::{Composer, SelectionState};

/// Result of a single [`ChatStore::merge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// New message; `reordered` is true when the chat's last message moved.
    Inserted { reordered: bool },
    /// A message with the same id is already stored. Nothing changed.
    Duplicate,
}

impl MergeOutcome {
    pub fn is_inserted(&self) -> bool {
        matches!(self, Self::Inserted { .. })
    }
}

/// Derived view of one conversation, in chat list order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSummary {
    pub chat_id: ChatId,
    pub last_message: Message,
    pub unread_count: usize,
    pub message_count: usize,
}

// Newest first; among equal timestamps the most recently merged wins.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct ChatOrderKey {
    timestamp: Reverse<i64>,
    seq: Reverse<u64>,
    chat_id: ChatId,
}

#[derive(Debug)]
struct ChatEntry {
    /// Index of the last message in `ChatStore::messages`.
    last: usize,
    last_seq: u64,
    unread: usize,
    /// Indices sorted by timestamp, arrival order on ties.
    messages: Vec<usize>,
}

#[derive(Debug, Default)]
pub struct ChatStore {
    messages: Vec<Message>,
    index: HashMap<MessageId, usize>,
    chats: HashMap<ChatId, ChatEntry>,
    order: BTreeSet<ChatOrderKey>,
    selection: SelectionState,
    composer: Composer,
    next_seq: u64,
}

impl ChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one message. Idempotent by id.
    pub fn merge(&mut self, message: Message) -> MergeOutcome {
        if self.index.contains_key(&message.id) {
            trace!(msg_id = %message.id, "Duplicate message ignored");
            return MergeOutcome::Duplicate;
        }

        let idx = self.messages.len();
        let seq = self.next_seq;
        self.next_seq += 1;

        let chat_id = message.chat_id.clone();
        let timestamp = message.timestamp;
        let counts_as_unread =
            !message.from_me && self.selection.selected_chat_id.as_ref() != Some(&chat_id);

        self.index.insert(message.id.clone(), idx);
        self.messages.push(message);

        let messages = &self.messages;
        let reordered = match self.chats.get_mut(&chat_id) {
            None => {
                self.order.insert(ChatOrderKey {
                    timestamp: Reverse(timestamp),
                    seq: Reverse(seq),
                    chat_id: chat_id.clone(),
                });
                self.chats.insert(
                    chat_id.clone(),
                    ChatEntry {
                        last: idx,
                        last_seq: seq,
                        unread: usize::from(counts_as_unread),
                        messages: vec![idx],
                    },
                );
                true
            }
            Some(entry) => {
                let pos = entry
                    .messages
                    .partition_point(|&i| messages[i].timestamp <= timestamp);
                entry.messages.insert(pos, idx);

                if counts_as_unread {
                    entry.unread += 1;
                }

                let current = messages[entry.last].timestamp;
                if timestamp >= current {
                    self.order.remove(&ChatOrderKey {
                        timestamp: Reverse(current),
                        seq: Reverse(entry.last_seq),
                        chat_id: chat_id.clone(),
                    });
                    self.order.insert(ChatOrderKey {
                        timestamp: Reverse(timestamp),
                        seq: Reverse(seq),
                        chat_id: chat_id.clone(),
                    });
                    entry.last = idx;
                    entry.last_seq = seq;
                    true
                } else {
                    false
                }
            }
        };

        debug!(chat = %chat_id, total = self.messages.len(), reordered, "Message merged");
        MergeOutcome::Inserted { reordered }
    }

    /// Chats ordered by last message, newest first.
    pub fn chats(&self) -> Vec<ChatSummary> {
        self.order
            .iter()
            .filter_map(|key| self.summary(&key.chat_id))
            .collect()
    }

    pub fn chat(&self, chat_id: &ChatId) -> Option<ChatSummary> {
        self.summary(chat_id)
    }

    fn summary(&self, chat_id: &ChatId) -> Option<ChatSummary> {
        let entry = self.chats.get(chat_id)?;
        Some(ChatSummary {
            chat_id: chat_id.clone(),
            last_message: self.messages[entry.last].clone(),
            unread_count: entry.unread,
            message_count: entry.messages.len(),
        })
    }

    /// Messages of one chat, oldest first.
    pub fn messages_for_chat(&self, chat_id: &ChatId) -> Vec<&Message> {
        self.chats
            .get(chat_id)
            .map(|entry| entry.messages.iter().map(|&i| &self.messages[i]).collect())
            .unwrap_or_default()
    }

    pub fn message(&self, id: &MessageId) -> Option<&Message> {
        self.index.get(id).map(|&i| &self.messages[i])
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn unread_count(&self, chat_id: &ChatId) -> usize {
        self.chats.get(chat_id).map_or(0, |entry| entry.unread)
    }

    pub fn total_unread(&self) -> usize {
        self.chats.values().map(|entry| entry.unread).sum()
    }

    // ─── Selection ───

    /// Open a chat: clears the reply target and that chat's unread count.
    /// Other chats are not affected.
    pub fn select_chat(&mut self, chat_id: ChatId) {
        if let Some(entry) = self.chats.get_mut(&chat_id) {
            entry.unread = 0;
        }
        self.selection.select(chat_id);
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    pub fn selection(&self) -> &SelectionState {
        &self.selection
    }

    pub fn selected_chat(&self) -> Option<&ChatId> {
        self.selection.selected_chat_id.as_ref()
    }

    /// Quote a stored message in the next send. Unknown ids are refused.
    pub fn begin_reply(&mut self, message_id: &MessageId) -> bool {
        if !self.index.contains_key(message_id) {
            return false;
        }
        self.selection.begin_reply(message_id.clone());
        true
    }

    pub fn cancel_reply(&mut self) {
        self.selection.cancel_reply();
    }

    pub fn reply_target(&self) -> Option<&Message> {
        self.selection
            .reply_target
            .as_ref()
            .and_then(|id| self.message(id))
    }

    // ─── Composer ───

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.composer.set(text);
    }

    pub fn draft(&self) -> &str {
        &self.composer.draft
    }

    /// Build the send request for the open chat without changing anything,
    /// so a failed send can be retried as is.
    pub fn take_outgoing(&self) -> Result<SendMessageRequest> {
        let to = self
            .selected_chat()
            .cloned()
            .ok_or(ClientError::NothingToSend("no chat selected"))?;
        if self.composer.is_empty() {
            return Err(ClientError::NothingToSend("draft is empty"));
        }
        Ok(SendMessageRequest {
            to,
            body: self.composer.draft.clone(),
            quoted_message_id: self.selection.reply_target.clone(),
        })
    }

    /// Whether the open chat, reply target and draft are still the ones
    /// `request` was built from.
    pub fn is_composing(&self, request: &SendMessageRequest) -> bool {
        self.selected_chat() == Some(&request.to)
            && self.selection.reply_target == request.quoted_message_id
            && self.composer.draft == request.body
    }

    /// Record a successful send: merge the returned message and reset the
    /// composer and reply target.
    pub fn complete_send(&mut self, message: Message) -> MergeOutcome {
        let outcome = self.merge(message);
        self.composer.clear();
        self.selection.cancel_reply();
        outcome
    }

    /// The message `message` quotes, if it is already in the store.
    pub fn quoted_message(&self, message: &Message) -> Option<&Message> {
        message
            .quoted_message_id
            .as_ref()
            .and_then(|id| self.message(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: &str, chat: &str, ts: i64, from_me: bool) -> Message {
        Message {
            id: id.into(),
            chat_id: chat.into(),
            from_me,
            author: None,
            body: format!("body {id}"),
            timestamp: ts,
            quoted_message_id: None,
        }
    }

    fn chat_order(store: &ChatStore) -> Vec<String> {
        store
            .chats()
            .into_iter()
            .map(|c| c.chat_id.to_string())
            .collect()
    }

    #[test]
    fn test_duplicate_merge_is_ignored() {
        let mut store = ChatStore::new();
        assert!(store.merge(msg("1", "A", 10, false)).is_inserted());
        assert!(store.merge(msg("2", "A", 20, false)).is_inserted());
        assert_eq!(store.merge(msg("1", "A", 10, false)), MergeOutcome::Duplicate);

        assert_eq!(store.len(), 2);
        let chat = store.chat(&"A".into()).unwrap();
        assert_eq!(chat.last_message.id, "2".into());
        assert_eq!(chat.unread_count, 2);
        assert_eq!(chat.message_count, 2);
    }

    #[test]
    fn test_duplicate_with_different_fields_keeps_first() {
        let mut store = ChatStore::new();
        store.merge(msg("1", "A", 10, false));
        let mut changed = msg("1", "A", 99, false);
        changed.body = "edited".into();

        assert_eq!(store.merge(changed), MergeOutcome::Duplicate);
        assert_eq!(store.message(&"1".into()).unwrap().body, "body 1");
        assert_eq!(store.chat(&"A".into()).unwrap().last_message.timestamp, 10);
    }

    #[test]
    fn test_selected_chat_does_not_accumulate_unread() {
        let mut store = ChatStore::new();
        store.merge(msg("1", "A", 10, false));
        store.select_chat("A".into());
        store.merge(msg("3", "A", 30, false));

        assert_eq!(store.unread_count(&"A".into()), 0);
    }

    #[test]
    fn test_own_messages_are_never_unread() {
        let mut store = ChatStore::new();
        store.merge(msg("1", "A", 10, true));
        store.merge(msg("2", "B", 11, false));
        assert_eq!(store.unread_count(&"A".into()), 0);
        assert_eq!(store.total_unread(), 1);
    }

    #[test]
    fn test_selection_resets_only_that_chat() {
        let mut store = ChatStore::new();
        store.merge(msg("1", "A", 10, false));
        store.merge(msg("2", "B", 11, false));
        store.merge(msg("3", "B", 12, false));
        assert!(store.begin_reply(&"1".into()));

        store.select_chat("B".into());
        assert_eq!(store.unread_count(&"B".into()), 0);
        assert_eq!(store.unread_count(&"A".into()), 1);
        assert!(store.reply_target().is_none());

        // Selecting a chat with no messages yet is fine.
        store.select_chat("C".into());
        assert_eq!(store.unread_count(&"C".into()), 0);
        assert_eq!(store.selected_chat(), Some(&ChatId::from("C")));

        // Leaving B lets it count again.
        store.merge(msg("4", "B", 13, false));
        assert_eq!(store.unread_count(&"B".into()), 1);
    }

    #[test]
    fn test_chats_sorted_by_last_timestamp() {
        let mut store = ChatStore::new();
        store.merge(msg("1", "A", 10, false));
        store.merge(msg("2", "B", 20, false));
        store.merge(msg("3", "C", 15, false));
        assert_eq!(chat_order(&store), vec!["B", "C", "A"]);

        store.merge(msg("4", "A", 30, false));
        assert_eq!(chat_order(&store), vec!["A", "B", "C"]);

        // An older message does not move the chat.
        let outcome = store.merge(msg("5", "C", 1, false));
        assert_eq!(outcome, MergeOutcome::Inserted { reordered: false });
        assert_eq!(chat_order(&store), vec!["A", "B", "C"]);
        assert_eq!(store.chat(&"C".into()).unwrap().last_message.id, "3".into());
    }

    #[test]
    fn test_timestamp_tie_goes_to_latest_merge() {
        let mut store = ChatStore::new();
        store.merge(msg("1", "A", 10, false));
        store.merge(msg("2", "B", 10, false));
        assert_eq!(chat_order(&store), vec!["B", "A"]);

        store.merge(msg("3", "A", 10, false));
        assert_eq!(chat_order(&store), vec!["A", "B"]);
        assert_eq!(store.chat(&"A".into()).unwrap().last_message.id, "3".into());
    }

    #[test]
    fn test_messages_for_chat_in_timestamp_order() {
        let mut store = ChatStore::new();
        store.merge(msg("late", "A", 30, false));
        store.merge(msg("early", "A", 10, false));
        store.merge(msg("mid", "A", 20, true));
        store.merge(msg("other", "B", 5, false));

        let ids: Vec<_> = store
            .messages_for_chat(&"A".into())
            .iter()
            .map(|m| m.id.to_string())
            .collect();
        assert_eq!(ids, vec!["early", "mid", "late"]);
        assert!(store.messages_for_chat(&"Z".into()).is_empty());
    }

    #[test]
    fn test_outgoing_requires_chat_and_draft() {
        let mut store = ChatStore::new();
        store.set_draft("hello");
        assert!(matches!(
            store.take_outgoing(),
            Err(ClientError::NothingToSend(_))
        ));

        store.select_chat("A".into());
        store.set_draft("   ");
        assert!(store.take_outgoing().is_err());

        store.set_draft("hello");
        let req = store.take_outgoing().unwrap();
        assert_eq!(req.to, "A".into());
        assert_eq!(req.body, "hello");
        assert_eq!(req.quoted_message_id, None);
        // Building the request leaves the draft in place.
        assert_eq!(store.draft(), "hello");
    }

    #[test]
    fn test_complete_send_quotes_and_resets() {
        let mut store = ChatStore::new();
        store.merge(msg("1", "A", 10, false));
        store.select_chat("A".into());
        assert!(store.begin_reply(&"1".into()));
        assert!(!store.begin_reply(&"missing".into()));
        store.set_draft("reply");

        let req = store.take_outgoing().unwrap();
        assert_eq!(req.quoted_message_id, Some("1".into()));

        let mut sent = msg("9", "A", 20, true);
        sent.quoted_message_id = req.quoted_message_id.clone();
        assert!(store.complete_send(sent.clone()).is_inserted());

        assert_eq!(store.draft(), "");
        assert!(store.reply_target().is_none());
        assert_eq!(store.quoted_message(&sent).map(|m| m.id.clone()), Some("1".into()));

        // The same message arriving on the feed afterwards is a no-op.
        assert_eq!(store.merge(sent), MergeOutcome::Duplicate);
        assert_eq!(store.messages_for_chat(&"A".into()).len(), 2);
    }

    #[test]
    fn test_is_composing_tracks_chat_reply_and_draft() {
        let mut store = ChatStore::new();
        store.merge(msg("1", "A", 10, false));
        store.merge(msg("2", "B", 11, false));
        store.select_chat("A".into());
        store.set_draft("hey");
        let req = store.take_outgoing().unwrap();
        assert!(store.is_composing(&req));

        store.begin_reply(&"1".into());
        assert!(!store.is_composing(&req));
        store.cancel_reply();

        store.select_chat("B".into());
        assert!(!store.is_composing(&req));

        store.select_chat("A".into());
        store.set_draft("hey there");
        assert!(!store.is_composing(&req));
    }

    #[test]
    fn test_unread_matches_unselected_inbound_count() {
        let mut store = ChatStore::new();
        let plan = [
            ("1", "A", false),
            ("2", "B", false),
            ("3", "A", true),
            ("4", "A", false),
            ("5", "B", false),
        ];
        for (i, (id, chat, from_me)) in plan.iter().enumerate() {
            store.merge(msg(id, chat, i as i64, *from_me));
        }
        assert_eq!(store.unread_count(&"A".into()), 2);
        assert_eq!(store.unread_count(&"B".into()), 2);

        store.select_chat("A".into());
        store.merge(msg("6", "A", 10, false));
        store.merge(msg("7", "B", 11, false));
        assert_eq!(store.unread_count(&"A".into()), 0);
        assert_eq!(store.unread_count(&"B".into()), 3);
        assert_eq!(store.total_unread(), 3);

        store.clear_selection();
        store.merge(msg("8", "A", 12, false));
        assert_eq!(store.unread_count(&"A".into()), 1);
    }
}
