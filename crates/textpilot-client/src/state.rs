//! UI-facing state that lives next to the message store.
//!
//! Selection and the composer change on user input only. Neither ever
//! touches the message collection, so re-rendering the conversation list
//! is not triggered by typing.

use textpilot_shared::{ChatId, MessageId};

/// Which conversation is open and which message the user is replying to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionState {
    /// `None` until the user opens a conversation.
    pub selected_chat_id: Option<ChatId>,

    /// Message the next send will quote. Cleared when the selection
    /// changes, on cancel, and after a successful send.
    pub reply_target: Option<MessageId>,
}

impl SelectionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a conversation. Always drops a pending reply, even when the
    /// chat was already open.
    pub fn select(&mut self, chat_id: ChatId) {
        self.selected_chat_id = Some(chat_id);
        self.reply_target = None;
    }

    pub fn clear(&mut self) {
        self.selected_chat_id = None;
        self.reply_target = None;
    }

    pub fn begin_reply(&mut self, message_id: MessageId) {
        self.reply_target = Some(message_id);
    }

    pub fn cancel_reply(&mut self) {
        self.reply_target = None;
    }
}

/// Draft text of the message being typed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Composer {
    pub draft: String,
}

impl Composer {
    pub fn set(&mut self, text: impl Into<String>) {
        self.draft = text.into();
    }

    pub fn clear(&mut self) {
        self.draft.clear();
    }

    /// Whitespace-only drafts count as empty.
    pub fn is_empty(&self) -> bool {
        self.draft.trim().is_empty()
    }
}
