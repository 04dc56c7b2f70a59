//! JSON wire protocol for the realtime socket and the paginated REST fetch.
//!
//! Every socket frame is a JSON envelope with a `type` discriminant; event
//! frames additionally carry `chat_id` and a `payload` object.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::types::{ChatId, Message, MessageId, UserId};

// ---------------------------------------------------------------------------
// Socket frames
// ---------------------------------------------------------------------------

/// Frames sent from the client to the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Auth handshake. Must be the first frame after the transport opens.
    Auth { token: String },
    /// Scope realtime delivery to this chat.
    Subscribe { chat_id: ChatId },
    /// Stop delivery for this chat.
    Unsubscribe { chat_id: ChatId },
    /// Fire-and-forget typing signal.
    Typing { chat_id: ChatId },
    /// Heartbeat.
    Ping,
}

/// Frames received from the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Handshake accepted; carries the authenticated user.
    AuthAck { user_id: UserId },
    /// Handshake rejected (invalid or expired token).
    AuthError { reason: String },
    /// Heartbeat reply.
    Pong,
    MessageCreated { chat_id: ChatId, payload: Message },
    MessageEdited { chat_id: ChatId, payload: Message },
    MessageDeleted { chat_id: ChatId, payload: DeletedPayload },
    TypingStart { chat_id: ChatId, payload: TypingPayload },
    TypingStop { chat_id: ChatId, payload: TypingPayload },
    PresenceChange { chat_id: ChatId, payload: PresencePayload },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeletedPayload {
    pub message_id: MessageId,
    pub deleted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TypingPayload {
    pub user_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresencePayload {
    pub user_id: UserId,
    pub online: bool,
}

impl ClientFrame {
    /// Serialize to the JSON wire form.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }
}

impl ServerFrame {
    /// Parse a frame from the JSON wire form.
    pub fn from_json(raw: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(raw).map_err(ProtocolError::Decode)
    }

    /// Convert an event frame into its domain event.
    ///
    /// Control frames (auth replies, pong) return `None`.
    pub fn into_event(self) -> Option<ChatEvent> {
        match self {
            Self::AuthAck { .. } | Self::AuthError { .. } | Self::Pong => None,
            Self::MessageCreated { chat_id, payload } => Some(ChatEvent::MessageCreated {
                chat_id,
                message: payload,
            }),
            Self::MessageEdited { chat_id, payload } => Some(ChatEvent::MessageEdited {
                chat_id,
                message: payload,
            }),
            Self::MessageDeleted { chat_id, payload } => Some(ChatEvent::MessageDeleted {
                chat_id,
                message_id: payload.message_id,
                deleted_at: payload.deleted_at,
            }),
            Self::TypingStart { chat_id, payload } => Some(ChatEvent::TypingStart {
                chat_id,
                user_id: payload.user_id,
            }),
            Self::TypingStop { chat_id, payload } => Some(ChatEvent::TypingStop {
                chat_id,
                user_id: payload.user_id,
            }),
            Self::PresenceChange { chat_id, payload } => Some(ChatEvent::PresenceChange {
                chat_id,
                user_id: payload.user_id,
                online: payload.online,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Domain events
// ---------------------------------------------------------------------------

/// Realtime events delivered to subscribers, with control frames stripped.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    MessageCreated {
        chat_id: ChatId,
        message: Message,
    },
    MessageEdited {
        chat_id: ChatId,
        message: Message,
    },
    MessageDeleted {
        chat_id: ChatId,
        message_id: MessageId,
        deleted_at: DateTime<Utc>,
    },
    TypingStart {
        chat_id: ChatId,
        user_id: UserId,
    },
    TypingStop {
        chat_id: ChatId,
        user_id: UserId,
    },
    PresenceChange {
        chat_id: ChatId,
        user_id: UserId,
        online: bool,
    },
}

impl ChatEvent {
    /// The chat this event belongs to.
    pub fn chat_id(&self) -> ChatId {
        match self {
            Self::MessageCreated { chat_id, .. }
            | Self::MessageEdited { chat_id, .. }
            | Self::MessageDeleted { chat_id, .. }
            | Self::TypingStart { chat_id, .. }
            | Self::TypingStop { chat_id, .. }
            | Self::PresenceChange { chat_id, .. } => *chat_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Paginated fetch
// ---------------------------------------------------------------------------

/// One page of messages as returned by the HTTP data layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessagePage {
    pub data: Vec<Message>,
    pub meta: PageMeta,
}

/// Pagination metadata.
///
/// `has_next`/`next_cursor` point at data strictly *older* than the page
/// boundary; `has_prev`/`prev_cursor` at data strictly *newer*.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageMeta {
    pub has_next: bool,
    pub has_prev: bool,
    pub next_cursor: Option<String>,
    pub prev_cursor: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_message(chat_id: ChatId) -> Message {
        Message {
            id: MessageId::new(),
            chat_id,
            sender_id: UserId::new(),
            content: "hello".into(),
            attachments: Vec::new(),
            created_at: Utc::now(),
            edited_at: None,
            deleted_at: None,
            client_tag: None,
        }
    }

    #[test]
    fn test_server_frame_roundtrip() {
        let chat_id = ChatId::new();
        let frame = ServerFrame::MessageCreated {
            chat_id,
            payload: test_message(chat_id),
        };

        let json = serde_json::to_string(&frame).unwrap();
        let restored = ServerFrame::from_json(&json).unwrap();
        assert_eq!(frame, restored);
    }

    #[test]
    fn test_envelope_shape() {
        let chat_id = ChatId::new();
        let user_id = UserId::new();
        let frame = ServerFrame::TypingStart {
            chat_id,
            payload: TypingPayload { user_id },
        };

        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&frame).unwrap()).unwrap();
        assert_eq!(value["type"], "typing_start");
        assert_eq!(value["chat_id"], serde_json::json!(chat_id.0));
        assert_eq!(value["payload"]["user_id"], serde_json::json!(user_id.0));
    }

    #[test]
    fn test_client_frame_tags() {
        let json = ClientFrame::Auth {
            token: "tok".into(),
        }
        .to_json()
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "auth");
        assert_eq!(value["token"], "tok");

        let json = ClientFrame::Ping.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "ping");
    }

    #[test]
    fn test_control_frames_are_not_events() {
        assert!(ServerFrame::Pong.into_event().is_none());
        assert!(ServerFrame::AuthAck {
            user_id: UserId::new()
        }
        .into_event()
        .is_none());
    }

    #[test]
    fn test_event_extraction() {
        let chat_id = ChatId::new();
        let message = test_message(chat_id);
        let frame = ServerFrame::MessageCreated {
            chat_id,
            payload: message.clone(),
        };

        match frame.into_event() {
            Some(ChatEvent::MessageCreated {
                chat_id: c,
                message: m,
            }) => {
                assert_eq!(c, chat_id);
                assert_eq!(m.id, message.id);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
