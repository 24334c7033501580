use shared::domain::{ChatId, PendingImage, ServerTime};

use crate::{send::SendOutcome, store::FailedSendId};

/// Notifications for views; every change to the store is followed by one.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    ChatUpdated {
        chat_id: ChatId,
        appended: usize,
    },
    ChatListRefreshed {
        chats: usize,
    },
    SendFailed {
        chat_id: ChatId,
        failed_id: FailedSendId,
        reason: String,
    },
    ImageFlagged {
        chat_id: ChatId,
        pending: PendingImage,
    },
    Error(String),
}

/// Result of one poll tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollReport {
    pub since: ServerTime,
    pub fetched: usize,
    pub appended: usize,
    pub cursor: ServerTime,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GateOutcome {
    Sent(SendOutcome),
    AwaitingConfirmation(PendingImage),
    /// The gate for this chat is already classifying or awaiting a decision.
    Busy,
}
