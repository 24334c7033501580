use std::time::Duration;

use shared::{
    domain::ChatId,
    error::{ApiException, ErrorCode},
    protocol::MalformedResponse,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("server rejected request: {0}")]
    Api(#[from] ApiException),
    #[error("{0}")]
    Malformed(#[from] MalformedResponse),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("not logged in")]
    NotLoggedIn,
    #[error("unknown chat {0}")]
    UnknownChat(ChatId),
    #[error("chat {0} is not open")]
    ChatNotOpen(ChatId),
    #[error("{0}")]
    Validation(String),
    #[error("profile store failure: {0}")]
    Profile(#[source] anyhow::Error),
}

impl ClientError {
    /// Failures that clear up on their own and are retried on the next
    /// natural schedule.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout(_) => true,
            Self::Api(err) => matches!(err.code, ErrorCode::Internal | ErrorCode::RateLimited),
            _ => false,
        }
    }

    /// Failures reported straight back to the initiating view, never retried.
    pub fn is_validation(&self) -> bool {
        match self {
            Self::Validation(_) => true,
            Self::Api(err) => matches!(
                err.code,
                ErrorCode::Validation | ErrorCode::Conflict | ErrorCode::NotFound
            ),
            _ => false,
        }
    }
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;
