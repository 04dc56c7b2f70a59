//! Multi-chat timeline store: the sole mutator of message state.
//!
//! Owns one [`Timeline`] per chat, the pending-mutation ledger, and the
//! in-flight fetch guards that suppress duplicate concurrent requests for
//! the same chat and direction.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use tracing::debug;

use undertone_shared::constants::MAX_CONTENT_LEN;
use undertone_shared::{
    ChatEvent, ChatId, FetchDirection, Message, MessageId, MessagePage, MutationTag, UserId,
};

use crate::error::{Result, TimelineError};
use crate::pending::{MessageDraft, MessagePatch, PendingLedger, PendingMutation};
use crate::timeline::Timeline;

/// What a reverted mutation left behind.
#[derive(Debug)]
pub enum RolledBack {
    /// The provisional message was removed; the draft is recoverable for
    /// resubmission.
    Send {
        chat_id: ChatId,
        draft: MessageDraft,
    },
    /// The optimistic patch was undone; the message is back to its
    /// pre-mutation state.
    Mutation {
        chat_id: ChatId,
        message_id: MessageId,
    },
}

#[derive(Debug, Default)]
pub struct TimelineStore {
    chats: HashMap<ChatId, Timeline>,
    inflight: HashSet<(ChatId, FetchDirection)>,
    ledger: PendingLedger,
}

impl TimelineStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeline(&self, chat_id: ChatId) -> Option<&Timeline> {
        self.chats.get(&chat_id)
    }

    fn ensure(&mut self, chat_id: ChatId) -> &mut Timeline {
        self.chats.entry(chat_id).or_default()
    }

    // -----------------------------------------------------------------------
    // In-flight fetch guards
    // -----------------------------------------------------------------------

    /// Claim the fetch slot for `(chat, direction)`.  Returns `false` while
    /// a fetch in that direction is already outstanding.
    pub fn begin_fetch(&mut self, chat_id: ChatId, direction: FetchDirection) -> bool {
        self.inflight.insert((chat_id, direction))
    }

    pub fn finish_fetch(&mut self, chat_id: ChatId, direction: FetchDirection) {
        self.inflight.remove(&(chat_id, direction));
    }

    pub fn is_fetching(&self, chat_id: ChatId, direction: FetchDirection) -> bool {
        self.inflight.contains(&(chat_id, direction))
    }

    /// Claim both directions for an initial load.
    pub fn begin_initial(&mut self, chat_id: ChatId) -> bool {
        if self.is_fetching(chat_id, FetchDirection::Older)
            || self.is_fetching(chat_id, FetchDirection::Newer)
        {
            return false;
        }
        self.inflight.insert((chat_id, FetchDirection::Older));
        self.inflight.insert((chat_id, FetchDirection::Newer));
        true
    }

    pub fn finish_initial(&mut self, chat_id: ChatId) {
        self.inflight.remove(&(chat_id, FetchDirection::Older));
        self.inflight.remove(&(chat_id, FetchDirection::Newer));
    }

    /// Drop every guard for a chat.  Called when its in-flight fetches are
    /// aborted on a chat switch, so the guards don't leak.
    pub fn reset_inflight(&mut self, chat_id: ChatId) {
        self.inflight.retain(|(chat, _)| *chat != chat_id);
    }

    // -----------------------------------------------------------------------
    // Fetch results
    // -----------------------------------------------------------------------

    pub fn apply_initial(&mut self, chat_id: ChatId, page: MessagePage) {
        debug!(chat = %chat_id, count = page.data.len(), "Applying initial page");
        self.ensure(chat_id).apply_initial(page);
    }

    pub fn apply_page(&mut self, chat_id: ChatId, direction: FetchDirection, page: MessagePage) {
        debug!(
            chat = %chat_id,
            direction = %direction,
            count = page.data.len(),
            "Applying page"
        );
        let timeline = self.ensure(chat_id);
        match direction {
            FetchDirection::Older => timeline.apply_older_page(page),
            FetchDirection::Newer => timeline.apply_newer_page(page),
        }
    }

    /// Merge the refetched tail after a reconnect gap.
    pub fn merge_latest(&mut self, chat_id: ChatId, page: MessagePage) {
        debug!(chat = %chat_id, count = page.data.len(), "Merging tail after gap");
        self.ensure(chat_id).merge_latest(page);
    }

    // -----------------------------------------------------------------------
    // Realtime events
    // -----------------------------------------------------------------------

    /// Apply a realtime message event.  Typing and presence events are not
    /// message state and return `false`.
    pub fn apply_event(&mut self, event: &ChatEvent) -> bool {
        match event {
            ChatEvent::MessageCreated { chat_id, message } => {
                self.ensure(*chat_id).apply_created(message.clone())
            }
            ChatEvent::MessageEdited { chat_id, message } => {
                self.ensure(*chat_id).apply_edited(message.clone())
            }
            ChatEvent::MessageDeleted {
                chat_id,
                message_id,
                deleted_at,
            } => self.ensure(*chat_id).apply_deleted(message_id, *deleted_at),
            ChatEvent::TypingStart { .. }
            | ChatEvent::TypingStop { .. }
            | ChatEvent::PresenceChange { .. } => false,
        }
    }

    // -----------------------------------------------------------------------
    // Optimistic mutations (two-phase)
    // -----------------------------------------------------------------------

    /// Insert a provisional message and register the send in the ledger.
    ///
    /// Drafts over [`MAX_CONTENT_LEN`] bytes are rejected before anything
    /// is inserted.  The provisional entry is timestamped at the live tail
    /// even when the local clock trails the server's, so it renders below
    /// everything already loaded.
    pub fn begin_send(
        &mut self,
        chat_id: ChatId,
        sender_id: UserId,
        draft: MessageDraft,
    ) -> Result<MutationTag> {
        if draft.content.len() > MAX_CONTENT_LEN {
            return Err(TimelineError::ContentTooLong(draft.content.len()));
        }
        let tag = MutationTag::new();
        let timeline = self.ensure(chat_id);
        let created_at = match timeline.newest_created_at() {
            Some(newest) => newest.max(Utc::now()),
            None => Utc::now(),
        };
        let provisional = Message {
            id: MessageId(tag.0),
            chat_id,
            sender_id,
            content: draft.content.clone(),
            attachments: draft.attachments.clone(),
            created_at,
            edited_at: None,
            deleted_at: None,
            client_tag: Some(tag),
        };
        timeline.insert_provisional(provisional, tag);
        self.ledger
            .insert(tag, PendingMutation::Send { chat_id, draft });
        Ok(tag)
    }

    /// Apply an optimistic edit, snapshotting the message for rollback.
    pub fn begin_edit(
        &mut self,
        chat_id: ChatId,
        message_id: MessageId,
        patch: MessagePatch,
    ) -> Result<MutationTag> {
        if patch.content.len() > MAX_CONTENT_LEN {
            return Err(TimelineError::ContentTooLong(patch.content.len()));
        }
        let timeline = match self.chats.get_mut(&chat_id) {
            Some(timeline) => timeline,
            None => return Err(TimelineError::UnknownChat(chat_id)),
        };
        let snapshot = match timeline.get(&message_id) {
            Some(entry) => entry.message.clone(),
            None => return Err(TimelineError::UnknownMessage(message_id)),
        };

        let mut patched = snapshot.clone();
        patched.content = patch.content;
        patched.edited_at = Some(Utc::now());
        timeline.apply_edited(patched);

        let tag = MutationTag::new();
        self.ledger.insert(
            tag,
            PendingMutation::Edit {
                chat_id,
                message_id,
                snapshot,
            },
        );
        Ok(tag)
    }

    /// Apply an optimistic delete, snapshotting the message for rollback.
    pub fn begin_delete(&mut self, chat_id: ChatId, message_id: MessageId) -> Result<MutationTag> {
        let timeline = match self.chats.get_mut(&chat_id) {
            Some(timeline) => timeline,
            None => return Err(TimelineError::UnknownChat(chat_id)),
        };
        let snapshot = match timeline.get(&message_id) {
            Some(entry) => entry.message.clone(),
            None => return Err(TimelineError::UnknownMessage(message_id)),
        };
        timeline.apply_deleted(&message_id, Utc::now());

        let tag = MutationTag::new();
        self.ledger.insert(
            tag,
            PendingMutation::Delete {
                chat_id,
                message_id,
                snapshot,
            },
        );
        Ok(tag)
    }

    /// Commit a mutation with the canonical message from the server.
    pub fn commit(&mut self, tag: MutationTag, canonical: Message) -> Result<()> {
        match self.ledger.remove(&tag) {
            Some(PendingMutation::Send { chat_id, .. }) => {
                self.ensure(chat_id).commit_provisional(tag, canonical);
                Ok(())
            }
            Some(PendingMutation::Edit { chat_id, .. })
            | Some(PendingMutation::Delete { chat_id, .. }) => {
                self.ensure(chat_id).restore(canonical);
                Ok(())
            }
            None => Err(TimelineError::UnknownTag(tag)),
        }
    }

    /// Revert a failed mutation, restoring the pre-mutation state.
    pub fn revert(&mut self, tag: MutationTag) -> Result<RolledBack> {
        match self.ledger.remove(&tag) {
            Some(PendingMutation::Send { chat_id, draft }) => {
                self.ensure(chat_id).remove_provisional(tag);
                Ok(RolledBack::Send { chat_id, draft })
            }
            Some(PendingMutation::Edit {
                chat_id,
                message_id,
                snapshot,
            })
            | Some(PendingMutation::Delete {
                chat_id,
                message_id,
                snapshot,
            }) => {
                self.ensure(chat_id).restore(snapshot);
                Ok(RolledBack::Mutation {
                    chat_id,
                    message_id,
                })
            }
            None => Err(TimelineError::UnknownTag(tag)),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.ledger.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{DateTime, TimeZone, Utc};
    use undertone_shared::PageMeta;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 10, minute, 0).unwrap()
    }

    fn msg(chat_id: ChatId, minute: u32) -> Message {
        Message {
            id: MessageId::new(),
            chat_id,
            sender_id: UserId::new(),
            content: format!("m{minute}"),
            attachments: Vec::new(),
            created_at: at(minute),
            edited_at: None,
            deleted_at: None,
            client_tag: None,
        }
    }

    fn page(data: Vec<Message>, has_next: bool) -> MessagePage {
        MessagePage {
            data,
            meta: PageMeta {
                has_next,
                has_prev: false,
                next_cursor: has_next.then(|| "older".to_string()),
                prev_cursor: None,
            },
        }
    }

    #[test]
    fn test_fetch_guard_suppresses_duplicates() {
        let mut store = TimelineStore::new();
        let chat = ChatId::new();

        assert!(store.begin_fetch(chat, FetchDirection::Older));
        assert!(!store.begin_fetch(chat, FetchDirection::Older));
        // The other direction is independent.
        assert!(store.begin_fetch(chat, FetchDirection::Newer));

        store.finish_fetch(chat, FetchDirection::Older);
        assert!(store.begin_fetch(chat, FetchDirection::Older));
    }

    #[test]
    fn test_reset_inflight_clears_both_directions() {
        let mut store = TimelineStore::new();
        let chat = ChatId::new();
        let other = ChatId::new();

        assert!(store.begin_initial(chat));
        assert!(!store.begin_initial(chat));
        assert!(store.begin_fetch(other, FetchDirection::Older));

        store.reset_inflight(chat);
        assert!(store.begin_initial(chat));
        // Other chats keep their guards.
        assert!(!store.begin_fetch(other, FetchDirection::Older));
    }

    #[test]
    fn test_send_commit_after_socket_echo() {
        let mut store = TimelineStore::new();
        let chat = ChatId::new();
        let me = UserId::new();
        store.apply_initial(chat, page(vec![msg(chat, 1)], false));

        let tag = store.begin_send(chat, me, MessageDraft::text("hello")).unwrap();
        assert_eq!(store.timeline(chat).unwrap().len(), 2);

        // The socket echo lands before the REST ack.
        let mut echo = msg(chat, 2);
        echo.sender_id = me;
        echo.content = "hello".into();
        echo.client_tag = Some(tag);
        assert!(store.apply_event(&ChatEvent::MessageCreated {
            chat_id: chat,
            message: echo.clone(),
        }));
        assert_eq!(store.timeline(chat).unwrap().len(), 2);

        store.commit(tag, echo.clone()).unwrap();
        let timeline = store.timeline(chat).unwrap();
        assert_eq!(timeline.len(), 2);
        assert!(timeline.contains(&echo.id));
        assert_eq!(store.pending_count(), 0);
    }

    #[test]
    fn test_failed_send_recovers_draft() {
        let mut store = TimelineStore::new();
        let chat = ChatId::new();
        store.apply_initial(chat, page(vec![], false));

        let tag = store
            .begin_send(chat, UserId::new(), MessageDraft::text("keep me"))
            .unwrap();
        assert_eq!(store.timeline(chat).unwrap().len(), 1);

        match store.revert(tag).unwrap() {
            RolledBack::Send { draft, .. } => assert_eq!(draft.content, "keep me"),
            other => panic!("unexpected rollback: {other:?}"),
        }
        assert!(store.timeline(chat).unwrap().is_empty());
        assert_eq!(store.pending_count(), 0);
    }

    #[test]
    fn test_provisional_sorts_after_newest() {
        let mut store = TimelineStore::new();
        let chat = ChatId::new();
        // Server timestamps ahead of the local clock.
        let future = Utc::now() + chrono::Duration::hours(1);
        let mut newest = msg(chat, 1);
        newest.created_at = future;
        store.apply_initial(chat, page(vec![newest], false));

        store
            .begin_send(chat, UserId::new(), MessageDraft::text("tail"))
            .unwrap();
        let contents: Vec<_> = store
            .timeline(chat)
            .unwrap()
            .iter()
            .map(|e| e.message.content.clone())
            .collect();
        assert_eq!(contents.last().map(String::as_str), Some("tail"));
    }

    #[test]
    fn test_edit_conflict_rolls_back() {
        let mut store = TimelineStore::new();
        let chat = ChatId::new();
        let message = msg(chat, 1);
        store.apply_initial(chat, page(vec![message.clone()], false));

        let tag = store
            .begin_edit(
                chat,
                message.id,
                MessagePatch {
                    content: "revised".into(),
                },
            )
            .unwrap();
        assert_eq!(
            store.timeline(chat).unwrap().get(&message.id).unwrap().message.content,
            "revised"
        );

        // Server rejects with a conflict.
        store.revert(tag).unwrap();
        let entry = store.timeline(chat).unwrap().get(&message.id).unwrap();
        assert_eq!(entry.message.content, "m1");
        assert!(entry.message.edited_at.is_none());
    }

    #[test]
    fn test_delete_conflict_restores_message_unchanged() {
        let mut store = TimelineStore::new();
        let chat = ChatId::new();
        let message = msg(chat, 2);
        store.apply_initial(chat, page(vec![msg(chat, 1), message.clone()], false));

        let tag = store.begin_delete(chat, message.id).unwrap();
        {
            let entry = store.timeline(chat).unwrap().get(&message.id).unwrap();
            assert!(entry.message.deleted_at.is_some());
            assert!(entry.message.content.is_empty());
        }

        store.revert(tag).unwrap();
        let entry = store.timeline(chat).unwrap().get(&message.id).unwrap();
        assert_eq!(entry.message, message);
    }

    #[test]
    fn test_oversized_draft_rejected() {
        let mut store = TimelineStore::new();
        let chat = ChatId::new();
        store.apply_initial(chat, page(vec![], false));

        let draft = MessageDraft::text("x".repeat(MAX_CONTENT_LEN + 1));
        let err = store.begin_send(chat, UserId::new(), draft).unwrap_err();
        assert!(matches!(err, TimelineError::ContentTooLong(_)));

        // Nothing was inserted or registered.
        assert!(store.timeline(chat).unwrap().is_empty());
        assert_eq!(store.pending_count(), 0);
    }

    #[test]
    fn test_mutation_on_unloaded_chat_rejected() {
        let mut store = TimelineStore::new();
        let chat = ChatId::new();

        let err = store.begin_delete(chat, MessageId::new()).unwrap_err();
        assert!(matches!(err, TimelineError::UnknownChat(_)));

        let err = store
            .begin_edit(
                chat,
                MessageId::new(),
                MessagePatch {
                    content: "x".into(),
                },
            )
            .unwrap_err();
        assert!(matches!(err, TimelineError::UnknownChat(_)));
    }

    #[test]
    fn test_edit_unknown_message_rejected() {
        let mut store = TimelineStore::new();
        let chat = ChatId::new();
        store.apply_initial(chat, page(vec![], false));

        let err = store
            .begin_edit(
                chat,
                MessageId::new(),
                MessagePatch {
                    content: "x".into(),
                },
            )
            .unwrap_err();
        assert!(matches!(err, TimelineError::UnknownMessage(_)));
    }

    #[test]
    fn test_commit_unknown_tag_rejected() {
        let mut store = TimelineStore::new();
        let chat = ChatId::new();
        let err = store.commit(MutationTag::new(), msg(chat, 1)).unwrap_err();
        assert!(matches!(err, TimelineError::UnknownTag(_)));
    }

    #[test]
    fn test_typing_events_do_not_touch_messages() {
        let mut store = TimelineStore::new();
        let chat = ChatId::new();
        store.apply_initial(chat, page(vec![msg(chat, 1)], false));

        assert!(!store.apply_event(&ChatEvent::TypingStart {
            chat_id: chat,
            user_id: UserId::new(),
        }));
        assert_eq!(store.timeline(chat).unwrap().len(), 1);
    }
}
