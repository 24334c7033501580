use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use shared::{
    domain::{Chat, ChatId, Message, ServerTime, UserProfile},
    error::{ApiException, ErrorCode},
    protocol::{
        messages_from_wire, ChatsEnvelope, CreateChatRequest, CreateChatResponse, ErrorBody,
        HealthResponse, Lenient, MessageEnvelope, MessagesEnvelope, RegisterUserRequest,
        SendMessageRequest, UserEnvelope, UsersEnvelope,
    },
};
use tracing::{debug, warn};
use url::Url;

use crate::error::{ClientError, ClientResult};

/// Request/response contract of the chat backend.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn health(&self) -> ClientResult<HealthResponse>;
    async fn register_user(&self, username: &str) -> ClientResult<UserProfile>;
    async fn get_user_profile(&self, username: &str) -> ClientResult<UserProfile>;
    async fn search_users(&self, query: &str, excluding: &str) -> ClientResult<Vec<UserProfile>>;
    async fn create_chat(&self, user_a: &str, user_b: &str) -> ClientResult<Chat>;
    /// Every chat of `username`, each with its full message history.
    async fn get_user_chats(&self, username: &str) -> ClientResult<Vec<Chat>>;
    async fn get_messages(&self, chat_id: &ChatId) -> ClientResult<Vec<Message>>;
    /// Messages with a timestamp strictly greater than `since`.
    async fn get_messages_since(
        &self,
        chat_id: &ChatId,
        since: ServerTime,
    ) -> ClientResult<Vec<Message>>;
    async fn send_message(
        &self,
        chat_id: &ChatId,
        content: &str,
        sender: &str,
        image_ref: Option<&str>,
    ) -> ClientResult<Message>;
}

fn keep_valid<T>(url: &Url, parsed: Lenient<T>) -> Vec<T> {
    for err in &parsed.rejected {
        warn!(url = %url, error = %err, "transport: dropped malformed entry");
    }
    parsed.items
}

pub struct HttpChatBackend {
    http: Client,
    base_url: Url,
}

impl HttpChatBackend {
    pub fn new(base_url: &str, request_timeout: Duration) -> ClientResult<Self> {
        let http = Client::builder().timeout(request_timeout).build()?;
        Self::with_client(http, base_url)
    }

    pub fn with_client(http: Client, base_url: &str) -> ClientResult<Self> {
        let mut base_url = Url::parse(base_url)
            .map_err(|err| ClientError::Validation(format!("invalid server url {base_url}: {err}")))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(ClientError::Validation(
                "server_url must start with http:// or https://".to_string(),
            ));
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self { http, base_url })
    }

    fn endpoint(&self, segments: &[&str]) -> ClientResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::Validation("server url cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder) -> ClientResult<T> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.json::<ErrorBody>().await.unwrap_or_default();
            let message = body
                .message()
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string());
            return Err(ApiException::new(ErrorCode::from_status(status.as_u16()), message).into());
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    async fn health(&self) -> ClientResult<HealthResponse> {
        let url = self.endpoint(&["health"])?;
        self.execute(self.http.get(url)).await
    }

    async fn register_user(&self, username: &str) -> ClientResult<UserProfile> {
        let url = self.endpoint(&["users", "register"])?;
        let body: UserEnvelope = self
            .execute(self.http.post(url).json(&RegisterUserRequest {
                username: username.to_string(),
                avatar: None,
            }))
            .await?;
        Ok(body.user)
    }

    async fn get_user_profile(&self, username: &str) -> ClientResult<UserProfile> {
        let url = self.endpoint(&["users", "profile", username])?;
        let body: UserEnvelope = self.execute(self.http.get(url)).await?;
        Ok(body.user)
    }

    async fn search_users(&self, query: &str, excluding: &str) -> ClientResult<Vec<UserProfile>> {
        let url = self.endpoint(&["users", "search"])?;
        let body: UsersEnvelope = self
            .execute(
                self.http
                    .get(url)
                    .query(&[("q", query), ("current_user", excluding)]),
            )
            .await?;
        Ok(body
            .users
            .into_iter()
            .filter(|user| user.username != excluding)
            .collect())
    }

    async fn create_chat(&self, user_a: &str, user_b: &str) -> ClientResult<Chat> {
        let url = self.endpoint(&["chats", "create"])?;
        let created: CreateChatResponse = self
            .execute(self.http.post(url).json(&CreateChatRequest {
                user1: user_a.to_string(),
                user2: user_b.to_string(),
            }))
            .await?;

        let chats = self.get_user_chats(user_a).await?;
        match chats.into_iter().find(|chat| chat.id == created.chat_id) {
            Some(chat) => Ok(chat),
            None => {
                debug!(chat_id = %created.chat_id, "transport: created chat missing from list");
                Ok(Chat::new(created.chat_id, user_a, user_b))
            }
        }
    }

    async fn get_user_chats(&self, username: &str) -> ClientResult<Vec<Chat>> {
        let url = self.endpoint(&["chats", username])?;
        let body: ChatsEnvelope = self.execute(self.http.get(url.clone())).await?;
        Ok(keep_valid(&url, body.into_chats(username)))
    }

    async fn get_messages(&self, chat_id: &ChatId) -> ClientResult<Vec<Message>> {
        let url = self.endpoint(&["chats", chat_id.as_str(), "messages"])?;
        let body: MessagesEnvelope = self.execute(self.http.get(url.clone())).await?;
        Ok(keep_valid(&url, messages_from_wire(body.messages)))
    }

    async fn get_messages_since(
        &self,
        chat_id: &ChatId,
        since: ServerTime,
    ) -> ClientResult<Vec<Message>> {
        let since = since.to_string();
        let url = self.endpoint(&["chats", chat_id.as_str(), "messages", "since", &since])?;
        let body: MessagesEnvelope = self.execute(self.http.get(url.clone())).await?;
        Ok(keep_valid(&url, messages_from_wire(body.messages)))
    }

    async fn send_message(
        &self,
        chat_id: &ChatId,
        content: &str,
        sender: &str,
        image_ref: Option<&str>,
    ) -> ClientResult<Message> {
        let url = self.endpoint(&["chats", chat_id.as_str(), "messages"])?;
        let body: MessageEnvelope = self
            .execute(self.http.post(url).json(&SendMessageRequest {
                content: content.to_string(),
                sender: sender.to_string(),
                image_url: image_ref.map(str::to_string),
            }))
            .await?;
        Ok(Message::try_from(body.message)?)
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
