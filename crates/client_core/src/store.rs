use std::collections::{HashMap, HashSet};

use shared::domain::{Chat, ChatId, Message, MessageId, ServerTime};

use crate::send::Draft;

/// Local id of a send that the server never confirmed.
pub type FailedSendId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedSend {
    pub id: FailedSendId,
    pub draft: Draft,
    pub reason: String,
}

/// Authoritative local view of the active user's chats.
///
/// Message lists are append-only and deduplicated by server id; the
/// confirmed list never holds a message without a server id. Sends that
/// failed are kept per chat next to it so the view can offer a retry.
#[derive(Debug, Default)]
pub struct ChatStore {
    order: Vec<ChatId>,
    chats: HashMap<ChatId, Chat>,
    known_ids: HashMap<ChatId, HashSet<MessageId>>,
    failed: HashMap<ChatId, Vec<FailedSend>>,
    next_failed_id: FailedSendId,
}

impl ChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Appends the messages whose ids are not yet known, in the given order,
    /// and recomputes the chat preview. Returns the number appended, or
    /// `None` when the chat is unknown.
    pub fn apply_reconciled_messages(
        &mut self,
        chat_id: &ChatId,
        messages: impl IntoIterator<Item = Message>,
    ) -> Option<usize> {
        let chat = self.chats.get_mut(chat_id)?;
        let known = self.known_ids.entry(chat_id.clone()).or_default();
        let mut appended = 0;
        for message in messages {
            if known.insert(message.id.clone()) {
                chat.messages.push(message);
                appended += 1;
            }
        }
        if appended > 0 {
            chat.refresh_preview();
        }
        Some(appended)
    }

    /// Inserts a chat, or folds its history into the existing entry.
    /// Newly inserted chats are listed first.
    pub fn upsert_chat(&mut self, chat: Chat) {
        if self.chats.contains_key(&chat.id) {
            self.fold_known_chat(chat);
            return;
        }
        self.order.insert(0, chat.id.clone());
        self.insert_new(chat);
    }

    /// Merges a full chat list as returned by the backend. The backend's
    /// order is adopted; chats it did not return are kept after it.
    pub fn merge_chat_list(&mut self, chats: Vec<Chat>) {
        let mut order = Vec::with_capacity(chats.len().max(self.order.len()));
        let mut listed = HashSet::new();
        for chat in chats {
            if !listed.insert(chat.id.clone()) {
                continue;
            }
            order.push(chat.id.clone());
            if self.chats.contains_key(&chat.id) {
                self.fold_known_chat(chat);
            } else {
                self.insert_new(chat);
            }
        }
        order.extend(self.order.iter().filter(|id| !listed.contains(*id)).cloned());
        self.order = order;
    }

    pub fn list_chats(&self) -> Vec<Chat> {
        self.order
            .iter()
            .filter_map(|id| self.chats.get(id))
            .cloned()
            .collect()
    }

    pub fn chat(&self, chat_id: &ChatId) -> Option<&Chat> {
        self.chats.get(chat_id)
    }

    pub fn contains_chat(&self, chat_id: &ChatId) -> bool {
        self.chats.contains_key(chat_id)
    }

    pub fn latest_timestamp(&self, chat_id: &ChatId) -> Option<ServerTime> {
        self.chats.get(chat_id)?.latest_timestamp()
    }

    pub fn set_unread_count(&mut self, chat_id: &ChatId, unread: u32) -> bool {
        match self.chats.get_mut(chat_id) {
            Some(chat) => {
                chat.unread_count = unread;
                true
            }
            None => false,
        }
    }

    pub fn mark_read(&mut self, chat_id: &ChatId) -> bool {
        self.set_unread_count(chat_id, 0)
    }

    pub fn record_failed_send(
        &mut self,
        chat_id: &ChatId,
        draft: Draft,
        reason: impl Into<String>,
    ) -> FailedSendId {
        self.next_failed_id += 1;
        let id = self.next_failed_id;
        self.failed.entry(chat_id.clone()).or_default().push(FailedSend {
            id,
            draft,
            reason: reason.into(),
        });
        id
    }

    pub fn failed_sends(&self, chat_id: &ChatId) -> &[FailedSend] {
        self.failed.get(chat_id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn take_failed_send(&mut self, chat_id: &ChatId, id: FailedSendId) -> Option<FailedSend> {
        let failed = self.failed.get_mut(chat_id)?;
        let index = failed.iter().position(|entry| entry.id == id)?;
        Some(failed.remove(index))
    }

    fn insert_new(&mut self, mut chat: Chat) {
        let history = std::mem::take(&mut chat.messages);
        let id = chat.id.clone();
        self.known_ids.insert(id.clone(), HashSet::new());
        self.chats.insert(id.clone(), chat);
        self.apply_reconciled_messages(&id, history);
    }

    fn fold_known_chat(&mut self, incoming: Chat) {
        let Chat {
            id,
            counterpart_avatar,
            messages,
            last_message_preview,
            last_activity,
            unread_count,
            ..
        } = incoming;
        if let Some(existing) = self.chats.get_mut(&id) {
            existing.unread_count = unread_count;
            if counterpart_avatar.is_some() {
                existing.counterpart_avatar = counterpart_avatar;
            }
            if existing.messages.is_empty() {
                existing.last_message_preview = last_message_preview;
                existing.last_activity = existing.last_activity.max(last_activity);
            }
        }
        self.apply_reconciled_messages(&id, messages);
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
