use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::domain::{Chat, ChatId, Message, MessageId, Region, ServerTime, Timestamp, UserProfile};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed response: {0}")]
pub struct MalformedResponse(pub String);

impl MalformedResponse {
    fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Accepts integer or floating point milliseconds and floors to an integer.
pub fn de_timestamp<'de, D>(deserializer: D) -> Result<Timestamp, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = f64::deserialize(deserializer)?;
    timestamp_from_f64(raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
}

fn timestamp_from_f64(raw: f64) -> Option<Timestamp> {
    ServerTime::from_wire(raw).map(ServerTime::millis)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterUserRequest {
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateChatRequest {
    pub user1: String,
    pub user2: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
    pub sender: String,
    #[serde(
        default,
        rename = "imageUrl",
        skip_serializing_if = "Option::is_none"
    )]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifyImageRequest {
    #[serde(rename = "imageUrl")]
    pub image_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifyImageResponse {
    #[serde(alias = "isSensitive")]
    pub sensitive: bool,
    #[serde(default, alias = "bboxes")]
    pub regions: Vec<[f64; 4]>,
}

impl ClassifyImageResponse {
    pub fn into_regions(self) -> Result<Vec<Region>, MalformedResponse> {
        self.regions
            .into_iter()
            .map(|[x1, y1, x2, y2]| {
                Region::normalized(x1, y1, x2, y2)
                    .ok_or_else(|| MalformedResponse::new("region has non-finite coordinates"))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub content: Option<String>,
    pub timestamp: f64,
    #[serde(
        default,
        rename = "imageUrl",
        skip_serializing_if = "Option::is_none"
    )]
    pub image_url: Option<String>,
    #[serde(default)]
    pub username: String,
}

impl TryFrom<WireMessage> for Message {
    type Error = MalformedResponse;

    fn try_from(wire: WireMessage) -> Result<Self, Self::Error> {
        if wire.id.trim().is_empty() {
            return Err(MalformedResponse::new("message without id"));
        }
        let timestamp = ServerTime::from_wire(wire.timestamp).ok_or_else(|| {
            MalformedResponse::new(format!(
                "message {} has invalid timestamp {}",
                wire.id, wire.timestamp
            ))
        })?;
        let content = wire.content.unwrap_or_default();
        let image_ref = wire.image_url.filter(|url| !url.is_empty());
        if content.is_empty() && image_ref.is_none() {
            return Err(MalformedResponse::new(format!(
                "message {} has neither content nor image",
                wire.id
            )));
        }
        Ok(Self {
            id: MessageId(wire.id),
            content,
            image_ref,
            sender: wire.username,
            timestamp,
        })
    }
}

impl From<&Message> for WireMessage {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id.0.clone(),
            content: Some(message.content.clone()),
            timestamp: message.timestamp.as_f64(),
            image_url: message.image_ref.clone(),
            username: message.sender.clone(),
        }
    }
}

/// Valid entries of a batch, in order, plus the reasons the others were
/// rejected. One bad entry never hides the rest of the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lenient<T> {
    pub items: Vec<T>,
    pub rejected: Vec<MalformedResponse>,
}

impl<T> Lenient<T> {
    fn collect(entries: impl IntoIterator<Item = Result<T, MalformedResponse>>) -> Self {
        let mut items = Vec::new();
        let mut rejected = Vec::new();
        for entry in entries {
            match entry {
                Ok(item) => items.push(item),
                Err(err) => rejected.push(err),
            }
        }
        Self { items, rejected }
    }
}

pub fn messages_from_wire(wire: Vec<WireMessage>) -> Lenient<Message> {
    Lenient::collect(wire.into_iter().map(Message::try_from))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireChat {
    pub id: String,
    /// The counterpart, from the requesting user's point of view.
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, rename = "lastMessage")]
    pub last_message: Option<String>,
    #[serde(default)]
    pub messages: Vec<WireMessage>,
    #[serde(default, rename = "unreadCount")]
    pub unread_count: u32,
    #[serde(default)]
    pub timestamp: f64,
}

impl WireChat {
    /// Malformed history entries are dropped and pushed onto `rejected`;
    /// only a chat without an id is rejected as a whole.
    pub fn into_chat(
        self,
        current_user: &str,
        rejected: &mut Vec<MalformedResponse>,
    ) -> Result<Chat, MalformedResponse> {
        if self.id.trim().is_empty() {
            return Err(MalformedResponse::new("chat without id"));
        }
        let mut chat = Chat::new(ChatId(self.id), current_user, self.username);
        chat.counterpart_avatar = self.avatar;
        chat.unread_count = self.unread_count;
        chat.last_message_preview = self.last_message;
        chat.last_activity = timestamp_from_f64(self.timestamp).unwrap_or_default();
        let history = messages_from_wire(self.messages);
        rejected.extend(history.rejected);
        chat.messages = history.items;
        chat.refresh_preview();
        Ok(chat)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserEnvelope {
    pub user: UserProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsersEnvelope {
    pub users: Vec<UserProfile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatsEnvelope {
    pub chats: Vec<WireChat>,
}

impl ChatsEnvelope {
    pub fn into_chats(self, current_user: &str) -> Lenient<Chat> {
        let mut rejected = Vec::new();
        let chats: Vec<_> = self
            .chats
            .into_iter()
            .map(|chat| chat.into_chat(current_user, &mut rejected))
            .collect();
        let mut parsed = Lenient::collect(chats);
        parsed.rejected.extend(rejected);
        parsed
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateChatResponse {
    pub chat_id: ChatId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesEnvelope {
    pub messages: Vec<WireMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub message: WireMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(default, deserialize_with = "de_timestamp")]
    pub timestamp: Timestamp,
}

/// Error body returned by the backend: `{"detail": ...}` or `{"error": ...}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub detail: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ErrorBody {
    pub fn message(&self) -> Option<String> {
        if let Some(detail) = &self.detail {
            return Some(match detail {
                serde_json::Value::String(text) => text.clone(),
                other => other.to_string(),
            });
        }
        self.error.clone()
    }
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
