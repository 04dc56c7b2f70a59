//! Ledger of locally originated mutations not yet confirmed by the server.
//!
//! Every optimistic send/edit/delete registers here under its correlation
//! tag before the network round-trip starts.  On ack the entry is committed
//! and dropped; on failure the rollback payload (the original draft, or a
//! snapshot of the message as it was) is handed back to the caller.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use undertone_shared::{Attachment, ChatId, Message, MessageId, MutationTag};

/// Content of a message the user wants to send.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageDraft {
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl MessageDraft {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            attachments: Vec::new(),
        }
    }
}

/// Requested change to an existing message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessagePatch {
    pub content: String,
}

/// One unconfirmed mutation and everything needed to undo it.
#[derive(Debug, Clone)]
pub enum PendingMutation {
    Send {
        chat_id: ChatId,
        /// Kept so a failed send is recoverable for resubmission.
        draft: MessageDraft,
    },
    Edit {
        chat_id: ChatId,
        message_id: MessageId,
        /// The message exactly as it was before the optimistic patch.
        snapshot: Message,
    },
    Delete {
        chat_id: ChatId,
        message_id: MessageId,
        snapshot: Message,
    },
}

/// All in-flight mutations, keyed by correlation tag.
#[derive(Debug, Default)]
pub struct PendingLedger {
    entries: HashMap<MutationTag, PendingMutation>,
}

impl PendingLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tag: MutationTag, mutation: PendingMutation) {
        self.entries.insert(tag, mutation);
    }

    pub fn remove(&mut self, tag: &MutationTag) -> Option<PendingMutation> {
        self.entries.remove(tag)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_round_trip() {
        let mut ledger = PendingLedger::new();
        let tag = MutationTag::new();
        let chat_id = ChatId::new();

        ledger.insert(
            tag,
            PendingMutation::Send {
                chat_id,
                draft: MessageDraft::text("hi"),
            },
        );
        assert_eq!(ledger.len(), 1);

        match ledger.remove(&tag) {
            Some(PendingMutation::Send { draft, .. }) => assert_eq!(draft.content, "hi"),
            other => panic!("unexpected entry: {other:?}"),
        }
        assert!(ledger.is_empty());
        assert!(ledger.remove(&tag).is_none());
    }
}
