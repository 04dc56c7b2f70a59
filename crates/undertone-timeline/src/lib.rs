//! # undertone-timeline
//!
//! The single source of truth for a chat's message sequence.  Merges the
//! three input streams (paginated fetch results, local optimistic
//! mutations, realtime push events) into one consistent, duplicate-free,
//! time-ordered sequence per chat, and tracks ephemeral typing/presence
//! state alongside.
//!
//! Nothing here performs I/O.  The [`TimelineStore`] is the sole mutator of
//! message state; networking layers feed it and the view layer reads it.

pub mod pending;
pub mod presence;
pub mod store;
pub mod timeline;

mod error;

pub use error::TimelineError;
pub use pending::{MessageDraft, MessagePatch, PendingLedger, PendingMutation};
pub use presence::{PresenceRoster, TypingTracker};
pub use store::{RolledBack, TimelineStore};
pub use timeline::{Delivery, EntryKey, Timeline, TimelineEntry};
