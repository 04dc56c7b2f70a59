//! Ordered, gap-aware message sequence for a single chat.
//!
//! Entries are keyed by `(created_at, seq)` where `seq` is an arrival
//! sequence number assigned by the cache itself, so two messages sharing a
//! server timestamp still have a stable total order.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use tracing::debug;

use undertone_shared::{Message, MessageId, MessagePage, MutationTag};

/// Ordering key for one timeline slot.
///
/// `created_at` is the server-assigned primary key; `seq` breaks ties by
/// arrival order, never by wall clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EntryKey {
    pub created_at: DateTime<Utc>,
    pub seq: u64,
}

/// Local delivery state of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Inserted optimistically; the server has not confirmed it yet.
    Pending,
    /// Confirmed by the server.
    Sent,
}

/// One slot in the merged sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineEntry {
    pub message: Message,
    pub delivery: Delivery,
}

/// The merged, duplicate-free, time-ordered message sequence of one chat.
///
/// Invariant: no two entries share a message id, and iteration yields
/// entries strictly ascending by `(created_at, seq)`.
#[derive(Debug, Default)]
pub struct Timeline {
    entries: BTreeMap<EntryKey, TimelineEntry>,
    index: HashMap<MessageId, EntryKey>,
    /// Provisional entries awaiting server confirmation, by mutation tag.
    provisional: HashMap<MutationTag, MessageId>,
    next_seq: u64,
    loaded: bool,
    has_older: bool,
    has_newer: bool,
    older_cursor: Option<String>,
    newer_cursor: Option<String>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Whether any page has been applied yet.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in ascending `(created_at, seq)` order.
    pub fn iter(&self) -> impl Iterator<Item = &TimelineEntry> {
        self.entries.values()
    }

    pub fn get(&self, id: &MessageId) -> Option<&TimelineEntry> {
        let key = self.index.get(id)?;
        self.entries.get(key)
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.index.contains_key(id)
    }

    /// Strictly older data exists beyond the loaded range.
    pub fn has_older(&self) -> bool {
        self.has_older
    }

    /// Strictly newer data exists beyond the loaded range (the view was
    /// opened mid-history).
    pub fn has_newer(&self) -> bool {
        self.has_newer
    }

    pub fn older_cursor(&self) -> Option<&str> {
        self.older_cursor.as_deref()
    }

    pub fn newer_cursor(&self) -> Option<&str> {
        self.newer_cursor.as_deref()
    }

    /// Timestamp of the newest loaded entry.
    pub fn newest_created_at(&self) -> Option<DateTime<Utc>> {
        self.entries.keys().next_back().map(|key| key.created_at)
    }

    // -----------------------------------------------------------------------
    // Page application
    // -----------------------------------------------------------------------

    /// Apply the initial (most recent) page, replacing any loaded state.
    ///
    /// Also used for a "jump to message" load, where the page is a window
    /// mid-history and both boundaries may remain open.
    pub fn apply_initial(&mut self, page: MessagePage) {
        self.entries.clear();
        self.index.clear();
        self.provisional.clear();

        self.loaded = true;
        self.has_older = page.meta.has_next;
        self.older_cursor = page.meta.next_cursor;
        self.has_newer = page.meta.has_prev;
        self.newer_cursor = page.meta.prev_cursor;

        for message in sorted(page.data) {
            self.insert_canonical(message, Delivery::Sent);
        }
    }

    /// Merge a page fetched in the given direction, extending that boundary.
    pub fn apply_older_page(&mut self, page: MessagePage) {
        if !self.loaded {
            self.apply_initial(page);
            return;
        }
        self.has_older = page.meta.has_next;
        self.older_cursor = page.meta.next_cursor;
        for message in sorted(page.data) {
            self.insert_canonical(message, Delivery::Sent);
        }
    }

    pub fn apply_newer_page(&mut self, page: MessagePage) {
        if !self.loaded {
            self.apply_initial(page);
            return;
        }
        self.has_newer = page.meta.has_prev;
        self.newer_cursor = page.meta.prev_cursor;
        for message in sorted(page.data) {
            self.insert_canonical(message, Delivery::Sent);
        }
    }

    /// Merge the newest page after a reconnect gap.
    ///
    /// Events missed during the outage are not replayed, so the freshly
    /// fetched tail is merged by id and the newer boundary is closed: the
    /// refetched page *is* the live tail.
    pub fn merge_latest(&mut self, page: MessagePage) {
        if !self.loaded {
            self.apply_initial(page);
            return;
        }
        for message in sorted(page.data) {
            self.insert_canonical(message, Delivery::Sent);
        }
        self.has_newer = false;
        self.newer_cursor = None;
    }

    // -----------------------------------------------------------------------
    // Realtime events
    // -----------------------------------------------------------------------

    /// Insert a message pushed over the realtime channel.
    ///
    /// Returns `true` if the sequence changed.  Duplicates (by id, or by
    /// mutation tag for the echo of an optimistic send) never produce a
    /// second entry.  Messages strictly older than the loaded range are
    /// dropped, since pagination will pick them up; anything at or past
    /// the newest loaded entry always appends at the live tail, regardless
    /// of prior page boundaries.
    pub fn apply_created(&mut self, message: Message) -> bool {
        if self.index.contains_key(&message.id) {
            return false;
        }

        let resolves_provisional = message
            .client_tag
            .map_or(false, |tag| self.provisional.contains_key(&tag));

        if self.loaded && !resolves_provisional {
            if let Some(oldest) = self.entries.keys().next() {
                if message.created_at < oldest.created_at && self.has_older {
                    debug!(message = %message.id, "Dropping event below loaded range");
                    return false;
                }
            }
        }

        self.insert_canonical(message, Delivery::Sent)
    }

    /// Patch an edited message in place.  The ordering key is left
    /// untouched so render order and scroll anchoring stay stable.
    ///
    /// Returns `false` (event dropped) when the message is outside the
    /// loaded range.
    pub fn apply_edited(&mut self, message: Message) -> bool {
        let key = match self.index.get(&message.id) {
            Some(key) => *key,
            None => return false,
        };
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.message.content = message.content;
            entry.message.attachments = message.attachments;
            entry.message.edited_at = message.edited_at;
            true
        } else {
            false
        }
    }

    /// Mark a message deleted, blanking its content.
    pub fn apply_deleted(&mut self, id: &MessageId, deleted_at: DateTime<Utc>) -> bool {
        let key = match self.index.get(id) {
            Some(key) => *key,
            None => return false,
        };
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.message.deleted_at = Some(deleted_at);
            entry.message.content.clear();
            entry.message.attachments.clear();
            true
        } else {
            false
        }
    }

    // -----------------------------------------------------------------------
    // Optimistic entries
    // -----------------------------------------------------------------------

    /// Insert a provisional entry for an optimistic send.
    pub fn insert_provisional(&mut self, message: Message, tag: MutationTag) {
        self.provisional.insert(tag, message.id);
        self.insert_entry(message, Delivery::Pending);
    }

    /// Replace the provisional entry for `tag` with the server's canonical
    /// message.  If the socket echo already resolved the tag, this is a
    /// dedup no-op.
    pub fn commit_provisional(&mut self, tag: MutationTag, canonical: Message) {
        if let Some(temp_id) = self.provisional.remove(&tag) {
            self.remove_by_id(&temp_id);
        }
        self.insert_canonical(canonical, Delivery::Sent);
    }

    /// Drop the provisional entry for a failed send, returning the message
    /// so its content can be recovered for retry.
    pub fn remove_provisional(&mut self, tag: MutationTag) -> Option<Message> {
        let temp_id = self.provisional.remove(&tag)?;
        self.remove_by_id(&temp_id)
    }

    /// Overwrite a loaded message wholesale (rollback restore, or the
    /// canonical result of a confirmed edit/delete).  Ordering key is
    /// preserved.
    pub fn restore(&mut self, message: Message) -> bool {
        let key = match self.index.get(&message.id) {
            Some(key) => *key,
            None => return false,
        };
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.message = message;
            entry.delivery = Delivery::Sent;
            true
        } else {
            false
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Insert unless the id is already present.  A matching mutation tag on
    /// the incoming message removes the provisional entry it replaces.
    fn insert_canonical(&mut self, message: Message, delivery: Delivery) -> bool {
        if self.index.contains_key(&message.id) {
            return false;
        }
        if let Some(tag) = message.client_tag {
            if let Some(temp_id) = self.provisional.remove(&tag) {
                self.remove_by_id(&temp_id);
            }
        }
        self.insert_entry(message, delivery);
        true
    }

    fn insert_entry(&mut self, message: Message, delivery: Delivery) {
        let key = EntryKey {
            created_at: message.created_at,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.index.insert(message.id, key);
        self.entries.insert(key, TimelineEntry { message, delivery });
    }

    fn remove_by_id(&mut self, id: &MessageId) -> Option<Message> {
        let key = self.index.remove(id)?;
        self.entries.remove(&key).map(|entry| entry.message)
    }
}

/// Pages arrive newest-first from the data layer; insert ascending so the
/// arrival tie-break matches display order within a page.
fn sorted(mut data: Vec<Message>) -> Vec<Message> {
    data.sort_by_key(|m| m.created_at);
    data
}
