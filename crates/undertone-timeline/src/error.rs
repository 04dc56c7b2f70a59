use thiserror::Error;

use undertone_shared::{ChatId, MessageId, MutationTag};

/// Errors produced by the timeline cache.
#[derive(Error, Debug)]
pub enum TimelineError {
    /// The target message is not in the loaded range.
    #[error("Message not loaded: {0}")]
    UnknownMessage(MessageId),

    /// No pending mutation is registered under this tag.
    #[error("Unknown mutation tag: {0}")]
    UnknownTag(MutationTag),

    /// No timeline has been loaded for this chat.
    #[error("Chat not loaded: {0}")]
    UnknownChat(ChatId),

    /// Draft or patch content exceeds the accepted size.
    #[error("Content too long: {0} bytes")]
    ContentTooLong(usize),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TimelineError>;
