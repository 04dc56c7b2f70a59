use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChatId(pub Uuid);

impl ChatId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ChatId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Client-generated correlation tag for an optimistic mutation.
///
/// The tag travels with the send/edit/delete request and is echoed back by
/// the server, so the cache can reconcile a provisional entry with the
/// canonical message regardless of whether the REST ack or the socket echo
/// arrives first.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct MutationTag(pub Uuid);

impl MutationTag {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MutationTag {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MutationTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A chat message as assigned by the server.
///
/// Identity (`id`) is immutable; `content`, `attachments`, `edited_at` and
/// `deleted_at` change through edit/delete events. `created_at` is the
/// ordering key, monotonic per chat as assigned by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Unique message identifier.
    pub id: MessageId,
    /// The chat this message belongs to.
    pub chat_id: ChatId,
    /// Who sent it.
    pub sender_id: UserId,
    /// Message body. Empty for deleted messages.
    pub content: String,
    /// Attached files, if any.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Server-assigned creation time, the primary ordering key.
    pub created_at: DateTime<Utc>,
    /// Set when the message has been edited.
    pub edited_at: Option<DateTime<Utc>>,
    /// Set when the message has been deleted (soft delete).
    pub deleted_at: Option<DateTime<Utc>>,
    /// Correlation tag of the originating client mutation, echoed back by
    /// the server. `None` for messages from other users.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_tag: Option<MutationTag>,
}

/// Metadata for a file attached to a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    /// Unique attachment identifier.
    pub id: Uuid,
    /// Original file name.
    pub file_name: String,
    /// Where the file can be fetched from.
    pub url: String,
    /// File size in bytes.
    pub size: u64,
}

// ---------------------------------------------------------------------------
// Connection / pagination
// ---------------------------------------------------------------------------

/// Observable state of the realtime connection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Socket is up and authenticated.
    Connected,
    /// Socket dropped unexpectedly; reconnect attempts are running.
    Reconnecting,
    /// Not connected and not retrying (before the first connect, after
    /// shutdown, or after a rejected re-auth).
    Offline,
}

/// Which timeline boundary a fetch extends.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum FetchDirection {
    /// Towards history: strictly older than the loaded range.
    Older,
    /// Towards the live tail: strictly newer than the loaded range.
    Newer,
}

impl std::fmt::Display for FetchDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Older => write!(f, "older"),
            Self::Newer => write!(f, "newer"),
        }
    }
}
