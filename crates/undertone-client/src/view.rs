//! Windowed renderer adapter.
//!
//! Flattens a [`Timeline`] into the item list a virtualized list renders:
//! messages ascending, date separators where the calendar day changes, and
//! pagination sentinels at either open edge.  [`ScrollTracker`] turns raw
//! scroll telemetry into fetch decisions and the stick-to-bottom policy.
//! This module only reads the cache; fetches go back through the session.

use chrono::NaiveDate;

use undertone_shared::{FetchDirection, Message};
use undertone_timeline::{Delivery, Timeline};

/// What an edge sentinel should show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeState {
    /// A fetch is (or may be) in flight.
    Loading,
    /// The last fetch for this edge failed; show a retry affordance.
    Failed,
}

/// Current failure state of the two edges, as the session tracks it.
#[derive(Debug, Clone, Copy, Default)]
pub struct EdgeStates {
    pub older_failed: bool,
    pub newer_failed: bool,
}

/// One renderable row.
#[derive(Debug, Clone, PartialEq)]
pub enum TimelineItem {
    /// Older data exists beyond this edge.
    OlderEdge(EdgeState),
    /// Separator shown between messages of different calendar days.
    DateMarker(NaiveDate),
    Message {
        message: Message,
        /// Optimistic entry not yet confirmed by the server.
        pending: bool,
    },
    /// Newer data exists beyond this edge (window opened mid-history).
    NewerEdge(EdgeState),
}

/// Flatten the timeline into the virtualizable item list.
pub fn build_items(timeline: &Timeline, edges: EdgeStates) -> Vec<TimelineItem> {
    let mut items = Vec::with_capacity(timeline.len() + 8);

    if timeline.has_older() {
        items.push(TimelineItem::OlderEdge(edge_state(edges.older_failed)));
    }

    let mut last_date: Option<NaiveDate> = None;
    for entry in timeline.iter() {
        let date = entry.message.created_at.date_naive();
        if last_date != Some(date) {
            items.push(TimelineItem::DateMarker(date));
            last_date = Some(date);
        }
        items.push(TimelineItem::Message {
            message: entry.message.clone(),
            pending: entry.delivery == Delivery::Pending,
        });
    }

    if timeline.has_newer() {
        items.push(TimelineItem::NewerEdge(edge_state(edges.newer_failed)));
    }

    items
}

fn edge_state(failed: bool) -> EdgeState {
    if failed {
        EdgeState::Failed
    } else {
        EdgeState::Loading
    }
}

/// Scroll telemetry → fetch decisions and stick-to-bottom policy.
///
/// A trigger for a direction fires at most once per item-count snapshot:
/// while the fetch is outstanding the list length is unchanged, so repeated
/// scroll ticks inside the threshold cannot re-trigger it.  When the page
/// lands the item count changes and the edge re-arms.
#[derive(Debug)]
pub struct ScrollTracker {
    threshold: f64,
    bottom_epsilon: f64,
    at_bottom: bool,
    older_latch: Option<usize>,
    newer_latch: Option<usize>,
}

impl ScrollTracker {
    pub fn new(threshold: f64, bottom_epsilon: f64) -> Self {
        Self {
            threshold,
            bottom_epsilon,
            at_bottom: true,
            older_latch: None,
            newer_latch: None,
        }
    }

    /// Feed one scroll sample.
    ///
    /// # Arguments
    ///
    /// * `offset_to_oldest` / `offset_to_newest` - distance from the
    ///   viewport to the respective list edge, in scroll units
    /// * `item_count` - current length of the rendered item list
    /// * `has_older` / `has_newer` - whether those edges are open
    ///
    /// Returns the directions to fetch now.
    pub fn on_scroll(
        &mut self,
        offset_to_oldest: f64,
        offset_to_newest: f64,
        item_count: usize,
        has_older: bool,
        has_newer: bool,
    ) -> Vec<FetchDirection> {
        self.at_bottom = offset_to_newest <= self.bottom_epsilon && !has_newer;

        let mut fetch = Vec::new();
        if has_older
            && offset_to_oldest <= self.threshold
            && self.older_latch != Some(item_count)
        {
            self.older_latch = Some(item_count);
            fetch.push(FetchDirection::Older);
        }
        if has_newer
            && offset_to_newest <= self.threshold
            && self.newer_latch != Some(item_count)
        {
            self.newer_latch = Some(item_count);
            fetch.push(FetchDirection::Newer);
        }
        fetch
    }

    /// Whether new tail content should auto-scroll the view.  True only
    /// when the user was already at the bottom; loading history must never
    /// yank the scroll position.
    pub fn should_stick(&self) -> bool {
        self.at_bottom
    }

    /// Re-arm a direction after a failed fetch so the retry affordance can
    /// trigger again at the same item count.
    pub fn release(&mut self, direction: FetchDirection) {
        match direction {
            FetchDirection::Older => self.older_latch = None,
            FetchDirection::Newer => self.newer_latch = None,
        }
    }

    /// Fresh chat, fresh state.
    pub fn reset(&mut self) {
        self.at_bottom = true;
        self.older_latch = None;
        self.newer_latch = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{DateTime, TimeZone, Utc};
    use undertone_shared::{ChatId, MessageId, MessagePage, PageMeta, UserId};

    fn at(day: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, 10, minute, 0).unwrap()
    }

    fn msg_at(created_at: DateTime<Utc>) -> Message {
        Message {
            id: MessageId::new(),
            chat_id: ChatId(uuid::Uuid::nil()),
            sender_id: UserId::new(),
            content: "hello".into(),
            attachments: Vec::new(),
            created_at,
            edited_at: None,
            deleted_at: None,
            client_tag: None,
        }
    }

    fn page(data: Vec<Message>, has_next: bool, has_prev: bool) -> MessagePage {
        MessagePage {
            data,
            meta: PageMeta {
                has_next,
                has_prev,
                next_cursor: has_next.then(|| "older".to_string()),
                prev_cursor: has_prev.then(|| "newer".to_string()),
            },
        }
    }

    #[test]
    fn test_date_markers_between_days() {
        let mut timeline = Timeline::new();
        timeline.apply_initial(page(
            vec![msg_at(at(14, 0)), msg_at(at(14, 5)), msg_at(at(15, 0))],
            false,
            false,
        ));

        let items = build_items(&timeline, EdgeStates::default());
        let markers: Vec<_> = items
            .iter()
            .filter(|i| matches!(i, TimelineItem::DateMarker(_)))
            .collect();
        assert_eq!(markers.len(), 2);
        assert!(matches!(items[0], TimelineItem::DateMarker(_)));
        assert_eq!(items.len(), 5);
    }

    #[test]
    fn test_edge_sentinels_follow_boundaries() {
        let mut timeline = Timeline::new();
        timeline.apply_initial(page(vec![msg_at(at(14, 0))], true, true));

        let items = build_items(
            &timeline,
            EdgeStates {
                older_failed: true,
                newer_failed: false,
            },
        );
        assert_eq!(items.first(), Some(&TimelineItem::OlderEdge(EdgeState::Failed)));
        assert_eq!(items.last(), Some(&TimelineItem::NewerEdge(EdgeState::Loading)));
    }

    #[test]
    fn test_no_sentinels_when_range_complete() {
        let mut timeline = Timeline::new();
        timeline.apply_initial(page(vec![msg_at(at(14, 0))], false, false));

        let items = build_items(&timeline, EdgeStates::default());
        assert!(!items
            .iter()
            .any(|i| matches!(i, TimelineItem::OlderEdge(_) | TimelineItem::NewerEdge(_))));
    }

    #[test]
    fn test_pending_entries_marked() {
        use undertone_shared::MutationTag;

        let mut timeline = Timeline::new();
        timeline.apply_initial(page(vec![msg_at(at(14, 0))], false, false));

        let tag = MutationTag::new();
        let mut provisional = msg_at(at(14, 1));
        provisional.id = MessageId(tag.0);
        provisional.client_tag = Some(tag);
        timeline.insert_provisional(provisional, tag);

        let items = build_items(&timeline, EdgeStates::default());
        match items.last() {
            Some(TimelineItem::Message { pending, .. }) => assert!(pending),
            other => panic!("unexpected item: {other:?}"),
        }
    }

    #[test]
    fn test_trigger_fires_once_per_snapshot() {
        let mut tracker = ScrollTracker::new(200.0, 24.0);

        // Repeated ticks inside the threshold, fetch still outstanding.
        assert_eq!(
            tracker.on_scroll(150.0, 5_000.0, 42, true, false),
            vec![FetchDirection::Older]
        );
        assert!(tracker.on_scroll(120.0, 5_000.0, 42, true, false).is_empty());
        assert!(tracker.on_scroll(10.0, 5_000.0, 42, true, false).is_empty());

        // The page landed: item count changed, edge re-arms.
        assert_eq!(
            tracker.on_scroll(180.0, 5_000.0, 92, true, false),
            vec![FetchDirection::Older]
        );
    }

    #[test]
    fn test_no_trigger_outside_threshold_or_closed_edge() {
        let mut tracker = ScrollTracker::new(200.0, 24.0);

        assert!(tracker.on_scroll(800.0, 5_000.0, 42, true, false).is_empty());
        assert!(tracker.on_scroll(100.0, 5_000.0, 42, false, false).is_empty());
    }

    #[test]
    fn test_release_rearms_for_retry() {
        let mut tracker = ScrollTracker::new(200.0, 24.0);

        assert_eq!(
            tracker.on_scroll(100.0, 5_000.0, 42, true, false),
            vec![FetchDirection::Older]
        );
        tracker.release(FetchDirection::Older);
        assert_eq!(
            tracker.on_scroll(100.0, 5_000.0, 42, true, false),
            vec![FetchDirection::Older]
        );
    }

    #[test]
    fn test_stick_to_bottom_policy() {
        let mut tracker = ScrollTracker::new(200.0, 24.0);

        // Reading at the live tail.
        tracker.on_scroll(5_000.0, 10.0, 42, true, false);
        assert!(tracker.should_stick());

        // Scrolled up into history: new items must not yank the view.
        tracker.on_scroll(100.0, 3_000.0, 42, true, false);
        assert!(!tracker.should_stick());

        // Mid-history windows never stick, even at zero offset.
        tracker.on_scroll(5_000.0, 0.0, 42, true, true);
        assert!(!tracker.should_stick());
    }

    #[test]
    fn test_new_tail_message_scenario() {
        // Cache has [A@10:00, B@10:01]; realtime delivers C@10:02.
        let mut timeline = Timeline::new();
        let a = msg_at(at(14, 0));
        let b = msg_at(at(14, 1));
        timeline.apply_initial(page(vec![a.clone(), b.clone()], false, false));

        let mut tracker = ScrollTracker::new(200.0, 24.0);
        tracker.on_scroll(5_000.0, 0.0, 3, false, false);
        assert!(tracker.should_stick());

        let c = msg_at(at(14, 2));
        assert!(timeline.apply_created(c.clone()));

        let items = build_items(&timeline, EdgeStates::default());
        let ids: Vec<_> = items
            .iter()
            .filter_map(|i| match i {
                TimelineItem::Message { message, .. } => Some(message.id),
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec![a.id, b.id, c.id]);
        // Still stuck to the bottom: the view follows the new message.
        assert!(tracker.should_stick());
    }
}
