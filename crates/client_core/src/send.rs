use std::collections::HashSet;

use shared::domain::{ChatId, Message};

use crate::store::FailedSendId;

/// A locally composed message that has not been confirmed by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draft {
    pub content: String,
    pub image_ref: Option<String>,
}

impl Draft {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            image_ref: None,
        }
    }

    /// Image messages carry no text.
    pub fn image(image_ref: impl Into<String>) -> Self {
        Self {
            content: String::new(),
            image_ref: Some(image_ref.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty() && self.image_ref.as_deref().map_or(true, str::is_empty)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendRejection {
    /// Another send to the same chat has not resolved yet.
    InFlight,
    EmptyDraft,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered(Message),
    Rejected(SendRejection),
    /// The draft is handed back so the input can be restored.
    Failed { draft: Draft, failed_id: FailedSendId },
}

impl SendOutcome {
    pub fn delivered(&self) -> Option<&Message> {
        match self {
            Self::Delivered(message) => Some(message),
            _ => None,
        }
    }
}

/// At most one outstanding send per chat.
#[derive(Debug, Default)]
pub struct SendPipeline {
    in_flight: HashSet<ChatId>,
}

impl SendPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `chat_id` in flight. Returns `false` when it already was.
    pub fn begin(&mut self, chat_id: &ChatId) -> bool {
        self.in_flight.insert(chat_id.clone())
    }

    pub fn finish(&mut self, chat_id: &ChatId) {
        self.in_flight.remove(chat_id);
    }

    pub fn is_in_flight(&self, chat_id: &ChatId) -> bool {
        self.in_flight.contains(chat_id)
    }

    pub fn clear(&mut self) {
        self.in_flight.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_begin_for_same_chat_is_refused() {
        let mut pipeline = SendPipeline::new();
        let chat = ChatId::new("c-1");
        assert!(pipeline.begin(&chat));
        assert!(!pipeline.begin(&chat));
        assert!(pipeline.begin(&ChatId::new("c-2")));

        pipeline.finish(&chat);
        assert!(!pipeline.is_in_flight(&chat));
        assert!(pipeline.begin(&chat));
    }

    #[test]
    fn whitespace_text_draft_is_empty() {
        assert!(Draft::text("   ").is_empty());
        assert!(!Draft::text("hi").is_empty());
        assert!(!Draft::image("img://a").is_empty());
        assert!(Draft::image("").is_empty());
    }
}
