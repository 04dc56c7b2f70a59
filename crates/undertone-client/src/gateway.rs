//! Contract with the HTTP data layer, plus the reqwest-backed
//! implementation of it.
//!
//! The core only needs four calls: a cursor-paginated message fetch and the
//! three mutations, each returning the canonical server-assigned message.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use thiserror::Error;

use undertone_shared::{ChatId, FetchDirection, Message, MessageId, MessagePage, MutationTag};
use undertone_timeline::{MessageDraft, MessagePatch};

/// Errors from the HTTP data layer, mapped to retry semantics.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Credentials rejected; the caller must re-authenticate.
    #[error("Unauthorized: {0}")]
    Auth(String),

    /// The mutation lost a race against server-side state (e.g. editing a
    /// message another actor already deleted).  Resolved by rolling back
    /// the optimistic patch and refetching canonical state.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Retryable transport or server failure.
    #[error("Transient network error: {0}")]
    Transient(String),

    /// The response body did not match the contract.
    #[error("Malformed response: {0}")]
    Decode(String),
}

impl GatewayError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// Cursor-paginated fetch parameters.
#[derive(Debug, Clone, Serialize)]
pub struct PageRequest {
    pub cursor: Option<String>,
    pub limit: u32,
    pub direction: FetchDirection,
}

impl PageRequest {
    /// The most recent page (no cursor).
    pub fn initial(limit: u32) -> Self {
        Self {
            cursor: None,
            limit,
            direction: FetchDirection::Older,
        }
    }

    pub fn older(cursor: impl Into<String>, limit: u32) -> Self {
        Self {
            cursor: Some(cursor.into()),
            limit,
            direction: FetchDirection::Older,
        }
    }

    pub fn newer(cursor: impl Into<String>, limit: u32) -> Self {
        Self {
            cursor: Some(cursor.into()),
            limit,
            direction: FetchDirection::Newer,
        }
    }
}

/// The HTTP data layer as the core sees it.
#[async_trait]
pub trait MessageGateway: Send + Sync + 'static {
    async fn fetch_messages(
        &self,
        chat_id: ChatId,
        request: PageRequest,
    ) -> Result<MessagePage, GatewayError>;

    /// Submit a draft.  `tag` is echoed back as the canonical message's
    /// `client_tag` so the cache can reconcile the optimistic entry.
    async fn send_message(
        &self,
        chat_id: ChatId,
        tag: MutationTag,
        draft: &MessageDraft,
    ) -> Result<Message, GatewayError>;

    async fn edit_message(
        &self,
        message_id: MessageId,
        patch: &MessagePatch,
    ) -> Result<Message, GatewayError>;

    async fn delete_message(&self, message_id: MessageId) -> Result<Message, GatewayError>;
}

// ---------------------------------------------------------------------------
// reqwest implementation
// ---------------------------------------------------------------------------

/// REST client for the conventional message endpoints.
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpGateway {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            token: token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn parse<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, GatewayError> {
        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| GatewayError::Decode(e.to_string()));
        }

        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(GatewayError::Auth(body)),
            StatusCode::CONFLICT | StatusCode::NOT_FOUND | StatusCode::GONE => {
                Err(GatewayError::Conflict(body))
            }
            _ => Err(GatewayError::Transient(format!("{status}: {body}"))),
        }
    }
}

#[async_trait]
impl MessageGateway for HttpGateway {
    async fn fetch_messages(
        &self,
        chat_id: ChatId,
        request: PageRequest,
    ) -> Result<MessagePage, GatewayError> {
        let mut query = vec![
            ("limit", request.limit.to_string()),
            ("direction", request.direction.to_string()),
        ];
        if let Some(cursor) = request.cursor {
            query.push(("cursor", cursor));
        }

        let response = self
            .client
            .get(self.url(&format!("chats/{chat_id}/messages")))
            .bearer_auth(&self.token)
            .query(&query)
            .send()
            .await
            .map_err(|e| GatewayError::Transient(e.to_string()))?;

        Self::parse(response).await
    }

    async fn send_message(
        &self,
        chat_id: ChatId,
        tag: MutationTag,
        draft: &MessageDraft,
    ) -> Result<Message, GatewayError> {
        let body = serde_json::json!({
            "content": draft.content,
            "attachments": draft.attachments,
            "client_tag": tag,
        });

        let response = self
            .client
            .post(self.url(&format!("chats/{chat_id}/messages")))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::Transient(e.to_string()))?;

        Self::parse(response).await
    }

    async fn edit_message(
        &self,
        message_id: MessageId,
        patch: &MessagePatch,
    ) -> Result<Message, GatewayError> {
        let response = self
            .client
            .patch(self.url(&format!("messages/{message_id}")))
            .bearer_auth(&self.token)
            .json(patch)
            .send()
            .await
            .map_err(|e| GatewayError::Transient(e.to_string()))?;

        Self::parse(response).await
    }

    async fn delete_message(&self, message_id: MessageId) -> Result<Message, GatewayError> {
        let response = self
            .client
            .delete(self.url(&format!("messages/{message_id}")))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| GatewayError::Transient(e.to_string()))?;

        Self::parse(response).await
    }
}
