//! Chat session: bridges the socket layer and the timeline cache, and
//! exposes the user-intent surface (open chat, paginate, send/edit/delete,
//! typing) to the presentation layer.
//!
//! The session owns all mutable state behind one lock; socket notifications
//! and gateway results funnel through it on the way to the typed
//! [`SessionEvent`] stream the presentation layer consumes.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use undertone_net::{
    spawn_socket, ConnectError, Connector, SocketCommand, SocketNotification,
};
use undertone_shared::{
    ChatEvent, ChatId, ConnectionStatus, FetchDirection, MessageId, MutationTag, UserId,
};
use undertone_timeline::{
    MessageDraft, MessagePatch, PresenceRoster, RolledBack, TimelineError, TimelineStore,
    TypingTracker,
};

use crate::config::SessionConfig;
use crate::gateway::{GatewayError, MessageGateway, PageRequest};
use crate::view::{build_items, EdgeStates, ScrollTracker, TimelineItem};

/// Explicit auth context handed to the session: the current user for
/// self/other distinction and the bearer credential for the socket
/// handshake.  No ambient singletons.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: UserId,
    pub token: String,
}

/// Notifications for the presentation layer.
#[derive(Debug)]
pub enum SessionEvent {
    /// A chat's message sequence changed; re-derive its item list.
    TimelineChanged { chat_id: ChatId },
    /// The set of typing users changed.
    TypingChanged { chat_id: ChatId },
    PresenceChanged { user_id: UserId, online: bool },
    /// Connection status changed; drive the offline/reconnecting indicator.
    Status(ConnectionStatus),
    /// Re-auth was rejected mid-session; fresh credentials are needed.
    AuthRequired { reason: String },
    /// An optimistic send failed.  The draft comes back for resubmission.
    SendFailed {
        chat_id: ChatId,
        draft: MessageDraft,
        error: GatewayError,
    },
    /// An optimistic edit/delete was rolled back to the server state.
    MutationRolledBack {
        chat_id: ChatId,
        message_id: MessageId,
        error: GatewayError,
    },
    /// An edge fetch failed; the sentinel now shows a retry affordance.
    EdgeFailed {
        chat_id: ChatId,
        direction: FetchDirection,
    },
}

struct SessionState {
    store: TimelineStore,
    typing: TypingTracker,
    presence: PresenceRoster,
    scroll: ScrollTracker,
    failed_edges: HashSet<(ChatId, FetchDirection)>,
    active_chat: Option<ChatId>,
    /// In-flight fetch tasks for the active chat.  Aborted on chat switch;
    /// mutation tasks are deliberately not here, they resolve against the
    /// ledger regardless of which chat is open.
    fetch_tasks: Vec<JoinHandle<()>>,
}

/// One user's realtime chat session.
pub struct ChatSession {
    state: Mutex<SessionState>,
    cmd_tx: mpsc::Sender<SocketCommand>,
    events_tx: mpsc::Sender<SessionEvent>,
    gateway: Arc<dyn MessageGateway>,
    auth: AuthContext,
    config: SessionConfig,
}

impl ChatSession {
    /// Spawn the socket task and the notification bridge.  Returns the
    /// session handle and the event stream for the presentation layer.
    pub fn start(
        connector: impl Connector,
        gateway: Arc<dyn MessageGateway>,
        auth: AuthContext,
        config: SessionConfig,
    ) -> (Arc<Self>, mpsc::Receiver<SessionEvent>) {
        let (cmd_tx, notif_rx) = spawn_socket(connector, config.socket.clone());
        let (events_tx, events_rx) = mpsc::channel(256);

        let state = SessionState {
            store: TimelineStore::new(),
            typing: TypingTracker::new(config.typing_ttl),
            presence: PresenceRoster::new(),
            scroll: ScrollTracker::new(config.fetch_threshold, config.bottom_epsilon),
            failed_edges: HashSet::new(),
            active_chat: None,
            fetch_tasks: Vec::new(),
        };

        let session = Arc::new(Self {
            state: Mutex::new(state),
            cmd_tx,
            events_tx,
            gateway,
            auth,
            config,
        });

        tokio::spawn(notification_loop(session.clone(), notif_rx));

        (session, events_rx)
    }

    /// Open and authenticate the realtime connection.  A rejected
    /// handshake is fatal to this attempt; re-authenticate and call again.
    pub async fn connect(&self) -> Result<UserId, ConnectError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(SocketCommand::Connect {
                token: self.auth.token.clone(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| ConnectError::ChannelClosed)?;
        reply_rx.await.map_err(|_| ConnectError::ChannelClosed)?
    }

    /// Make `chat_id` the active chat: abort the previous chat's in-flight
    /// fetches, move the realtime subscription over (the socket
    /// unsubscribes the old chat before subscribing the new one), and load
    /// the most recent page.
    pub async fn open_chat(self: &Arc<Self>, chat_id: ChatId) {
        if !self.switch_to(chat_id) {
            return;
        }
        let _ = self.cmd_tx.send(SocketCommand::Subscribe(chat_id)).await;
        self.load_initial(chat_id, None);
    }

    /// Open `chat_id` mid-history at an opaque cursor (jump to message).
    /// The loaded window keeps both boundaries open; the newer edge is
    /// paginated forward like any other.
    pub async fn open_chat_at(self: &Arc<Self>, chat_id: ChatId, cursor: String) {
        if self.switch_to(chat_id) {
            let _ = self.cmd_tx.send(SocketCommand::Subscribe(chat_id)).await;
        } else {
            // Jump within the already active chat: restart its fetches.
            let mut state = self.state_guard();
            for task in state.fetch_tasks.drain(..) {
                task.abort();
            }
            state.store.reset_inflight(chat_id);
            state.scroll.reset();
        }
        self.load_initial(chat_id, Some(cursor));
    }

    /// Returns `false` when `chat_id` is already active.
    fn switch_to(&self, chat_id: ChatId) -> bool {
        let mut state = self.state_guard();
        if state.active_chat == Some(chat_id) {
            return false;
        }
        for task in state.fetch_tasks.drain(..) {
            task.abort();
        }
        if let Some(previous) = state.active_chat.take() {
            state.store.reset_inflight(previous);
            state.typing.clear_chat(previous);
        }
        state.active_chat = Some(chat_id);
        state.scroll.reset();
        true
    }

    // -----------------------------------------------------------------------
    // Pagination
    // -----------------------------------------------------------------------

    fn load_initial(self: &Arc<Self>, chat_id: ChatId, cursor: Option<String>) {
        {
            let mut state = self.state_guard();
            if !state.store.begin_initial(chat_id) {
                return;
            }
            state.failed_edges.remove(&(chat_id, FetchDirection::Older));
            state.failed_edges.remove(&(chat_id, FetchDirection::Newer));
        }

        let session = self.clone();
        let handle = tokio::spawn(async move {
            let limit = session.config.page_limit;
            let request = match cursor {
                Some(cursor) => PageRequest::older(cursor, limit),
                None => PageRequest::initial(limit),
            };
            match session.gateway.fetch_messages(chat_id, request).await {
                Ok(page) => {
                    {
                        let mut state = session.state_guard();
                        state.store.finish_initial(chat_id);
                        state.store.apply_initial(chat_id, page);
                    }
                    session.emit(SessionEvent::TimelineChanged { chat_id }).await;
                }
                Err(error) => {
                    warn!(chat = %chat_id, error = %error, "Initial page load failed");
                    {
                        let mut state = session.state_guard();
                        state.store.finish_initial(chat_id);
                        state.failed_edges.insert((chat_id, FetchDirection::Older));
                    }
                    session
                        .emit(SessionEvent::EdgeFailed {
                            chat_id,
                            direction: FetchDirection::Older,
                        })
                        .await;
                }
            }
        });
        self.track(handle);
    }

    /// Extend the loaded range towards history.  No-op while an older
    /// fetch for this chat is already in flight.
    pub fn load_older(self: &Arc<Self>, chat_id: ChatId) {
        self.load_edge(chat_id, FetchDirection::Older);
    }

    /// Extend the loaded range towards the live tail (relevant after a
    /// jump-to-message opened the window mid-history).
    pub fn load_newer(self: &Arc<Self>, chat_id: ChatId) {
        self.load_edge(chat_id, FetchDirection::Newer);
    }

    fn load_edge(self: &Arc<Self>, chat_id: ChatId, direction: FetchDirection) {
        let cursor = {
            let mut state = self.state_guard();
            let (open, cursor) = match state.store.timeline(chat_id) {
                Some(timeline) => match direction {
                    FetchDirection::Older => (
                        timeline.has_older(),
                        timeline.older_cursor().map(str::to_owned),
                    ),
                    FetchDirection::Newer => (
                        timeline.has_newer(),
                        timeline.newer_cursor().map(str::to_owned),
                    ),
                },
                None => return,
            };
            if !open {
                return;
            }
            if !state.store.begin_fetch(chat_id, direction) {
                return;
            }
            state.failed_edges.remove(&(chat_id, direction));
            cursor
        };

        let session = self.clone();
        let handle = tokio::spawn(async move {
            let limit = session.config.page_limit;
            let request = match (&cursor, direction) {
                (Some(cursor), FetchDirection::Older) => PageRequest::older(cursor.clone(), limit),
                (Some(cursor), FetchDirection::Newer) => PageRequest::newer(cursor.clone(), limit),
                (None, _) => PageRequest::initial(limit),
            };

            match session.gateway.fetch_messages(chat_id, request).await {
                Ok(page) => {
                    {
                        let mut state = session.state_guard();
                        state.store.finish_fetch(chat_id, direction);
                        state.store.apply_page(chat_id, direction, page);
                    }
                    session.emit(SessionEvent::TimelineChanged { chat_id }).await;
                }
                Err(error) => {
                    warn!(
                        chat = %chat_id,
                        direction = %direction,
                        error = %error,
                        "Page fetch failed"
                    );
                    {
                        let mut state = session.state_guard();
                        state.store.finish_fetch(chat_id, direction);
                        state.failed_edges.insert((chat_id, direction));
                        state.scroll.release(direction);
                    }
                    session
                        .emit(SessionEvent::EdgeFailed { chat_id, direction })
                        .await;
                }
            }
        });
        self.track(handle);
    }

    /// Refetch the newest page and merge it by id.  Used after a reconnect
    /// gap and after a mutation conflict, where local state can no longer
    /// be trusted to match the server's.
    pub fn refresh_tail(self: &Arc<Self>, chat_id: ChatId) {
        {
            let mut state = self.state_guard();
            if !state.store.begin_fetch(chat_id, FetchDirection::Newer) {
                return;
            }
        }

        let session = self.clone();
        let handle = tokio::spawn(async move {
            let request = PageRequest::initial(session.config.page_limit);
            match session.gateway.fetch_messages(chat_id, request).await {
                Ok(page) => {
                    {
                        let mut state = session.state_guard();
                        state.store.finish_fetch(chat_id, FetchDirection::Newer);
                        state.store.merge_latest(chat_id, page);
                    }
                    session.emit(SessionEvent::TimelineChanged { chat_id }).await;
                }
                Err(error) => {
                    warn!(chat = %chat_id, error = %error, "Tail reconciliation failed");
                    let mut state = session.state_guard();
                    state.store.finish_fetch(chat_id, FetchDirection::Newer);
                }
            }
        });
        self.track(handle);
    }

    // -----------------------------------------------------------------------
    // Scroll telemetry
    // -----------------------------------------------------------------------

    /// Feed one scroll sample; fires edge fetches per the threshold policy.
    pub fn on_scroll(self: &Arc<Self>, chat_id: ChatId, offset_to_oldest: f64, offset_to_newest: f64) {
        let directions = {
            let mut state = self.state_guard();
            let (has_older, has_newer, len) = match state.store.timeline(chat_id) {
                Some(timeline) => (timeline.has_older(), timeline.has_newer(), timeline.len()),
                None => return,
            };
            state
                .scroll
                .on_scroll(offset_to_oldest, offset_to_newest, len, has_older, has_newer)
        };

        for direction in directions {
            self.load_edge(chat_id, direction);
        }
    }

    /// Whether new tail content should auto-scroll the view.
    pub fn should_stick(&self) -> bool {
        self.state_guard().scroll.should_stick()
    }

    /// Retry a failed edge fetch (the sentinel's retry affordance).
    pub fn retry_edge(self: &Arc<Self>, chat_id: ChatId, direction: FetchDirection) {
        self.state_guard().scroll.release(direction);
        self.load_edge(chat_id, direction);
    }

    // -----------------------------------------------------------------------
    // Optimistic mutations
    // -----------------------------------------------------------------------

    /// Optimistically send a draft.  Oversized drafts are rejected up
    /// front; otherwise the provisional entry renders immediately, and on
    /// a server failure it is removed and the draft comes back via
    /// [`SessionEvent::SendFailed`].
    pub async fn send(
        self: &Arc<Self>,
        chat_id: ChatId,
        draft: MessageDraft,
    ) -> Result<MutationTag, TimelineError> {
        let tag = {
            let mut state = self.state_guard();
            state
                .store
                .begin_send(chat_id, self.auth.user_id, draft.clone())?
        };
        self.emit(SessionEvent::TimelineChanged { chat_id }).await;

        let session = self.clone();
        tokio::spawn(async move {
            match session.gateway.send_message(chat_id, tag, &draft).await {
                Ok(canonical) => {
                    {
                        let mut state = session.state_guard();
                        if let Err(error) = state.store.commit(tag, canonical) {
                            debug!(error = %error, "Send already resolved");
                        }
                    }
                    session.emit(SessionEvent::TimelineChanged { chat_id }).await;
                }
                Err(error) => {
                    warn!(chat = %chat_id, error = %error, "Send failed, rolling back");
                    let draft = {
                        let mut state = session.state_guard();
                        match state.store.revert(tag) {
                            Ok(RolledBack::Send { draft, .. }) => Some(draft),
                            _ => None,
                        }
                    };
                    session.emit(SessionEvent::TimelineChanged { chat_id }).await;
                    if let Some(draft) = draft {
                        session
                            .emit(SessionEvent::SendFailed {
                                chat_id,
                                draft,
                                error,
                            })
                            .await;
                    }
                }
            }
        });

        Ok(tag)
    }

    /// Optimistically edit a message.
    pub async fn edit(
        self: &Arc<Self>,
        chat_id: ChatId,
        message_id: MessageId,
        patch: MessagePatch,
    ) -> Result<MutationTag, TimelineError> {
        let tag = {
            let mut state = self.state_guard();
            state.store.begin_edit(chat_id, message_id, patch.clone())?
        };
        self.emit(SessionEvent::TimelineChanged { chat_id }).await;

        let session = self.clone();
        tokio::spawn(async move {
            match session.gateway.edit_message(message_id, &patch).await {
                Ok(canonical) => {
                    {
                        let mut state = session.state_guard();
                        let _ = state.store.commit(tag, canonical);
                    }
                    session.emit(SessionEvent::TimelineChanged { chat_id }).await;
                }
                Err(error) => {
                    session.roll_back(chat_id, message_id, tag, error).await;
                }
            }
        });

        Ok(tag)
    }

    /// Optimistically delete a message.
    pub async fn delete(
        self: &Arc<Self>,
        chat_id: ChatId,
        message_id: MessageId,
    ) -> Result<MutationTag, TimelineError> {
        let tag = {
            let mut state = self.state_guard();
            state.store.begin_delete(chat_id, message_id)?
        };
        self.emit(SessionEvent::TimelineChanged { chat_id }).await;

        let session = self.clone();
        tokio::spawn(async move {
            match session.gateway.delete_message(message_id).await {
                Ok(canonical) => {
                    {
                        let mut state = session.state_guard();
                        let _ = state.store.commit(tag, canonical);
                    }
                    session.emit(SessionEvent::TimelineChanged { chat_id }).await;
                }
                Err(error) => {
                    session.roll_back(chat_id, message_id, tag, error).await;
                }
            }
        });

        Ok(tag)
    }

    async fn roll_back(
        self: &Arc<Self>,
        chat_id: ChatId,
        message_id: MessageId,
        tag: MutationTag,
        error: GatewayError,
    ) {
        warn!(chat = %chat_id, message = %message_id, error = %error, "Mutation rolled back");
        let conflict = error.is_conflict();
        {
            let mut state = self.state_guard();
            let _ = state.store.revert(tag);
        }
        self.emit(SessionEvent::TimelineChanged { chat_id }).await;
        self.emit(SessionEvent::MutationRolledBack {
            chat_id,
            message_id,
            error,
        })
        .await;
        if conflict {
            // Another actor changed this message under us; fetch what the
            // server actually has.
            self.refresh_tail(chat_id);
        }
    }

    // -----------------------------------------------------------------------
    // Typing / presence / view
    // -----------------------------------------------------------------------

    /// Signal that the local user is typing (coalesced by the socket).
    pub async fn notify_typing(&self, chat_id: ChatId) {
        let _ = self.cmd_tx.send(SocketCommand::SendTyping(chat_id)).await;
    }

    /// Users currently typing in `chat_id`, excluding the local user.
    pub fn typing_users(&self, chat_id: ChatId) -> Vec<UserId> {
        self.state_guard()
            .typing
            .typing_in(chat_id, self.auth.user_id)
    }

    pub fn is_online(&self, user_id: &UserId) -> bool {
        self.state_guard().presence.is_online(user_id)
    }

    /// Render-ready item list for a chat.
    pub fn items(&self, chat_id: ChatId) -> Vec<TimelineItem> {
        let state = self.state_guard();
        let timeline = match state.store.timeline(chat_id) {
            Some(timeline) => timeline,
            None => return Vec::new(),
        };
        let edges = EdgeStates {
            older_failed: state
                .failed_edges
                .contains(&(chat_id, FetchDirection::Older)),
            newer_failed: state
                .failed_edges
                .contains(&(chat_id, FetchDirection::Newer)),
        };
        build_items(timeline, edges)
    }

    /// Tear down: abort pending fetches and stop the socket task.
    pub async fn shutdown(&self) {
        {
            let mut state = self.state_guard();
            for task in state.fetch_tasks.drain(..) {
                task.abort();
            }
        }
        let _ = self.cmd_tx.send(SocketCommand::Shutdown).await;
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn state_guard(&self) -> MutexGuard<'_, SessionState> {
        // A poisoned lock still holds usable state.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut state = self.state_guard();
        state.fetch_tasks.retain(|task| !task.is_finished());
        state.fetch_tasks.push(handle);
    }

    async fn emit(&self, event: SessionEvent) {
        let _ = self.events_tx.send(event).await;
    }

    async fn handle_event(&self, event: ChatEvent) {
        match event {
            ChatEvent::TypingStart { chat_id, user_id } => {
                self.state_guard().typing.observe_start(chat_id, user_id);
                self.emit(SessionEvent::TypingChanged { chat_id }).await;
            }
            ChatEvent::TypingStop { chat_id, user_id } => {
                self.state_guard().typing.observe_stop(chat_id, user_id);
                self.emit(SessionEvent::TypingChanged { chat_id }).await;
            }
            ChatEvent::PresenceChange {
                user_id, online, ..
            } => {
                self.state_guard().presence.observe(user_id, online);
                self.emit(SessionEvent::PresenceChanged { user_id, online })
                    .await;
            }
            other => {
                let chat_id = other.chat_id();
                let changed = self.state_guard().store.apply_event(&other);
                if changed {
                    self.emit(SessionEvent::TimelineChanged { chat_id }).await;
                }
            }
        }
    }
}

/// Forward socket notifications into the cache and the session event
/// stream.
async fn notification_loop(
    session: Arc<ChatSession>,
    mut notif_rx: mpsc::Receiver<SocketNotification>,
) {
    info!("Session bridge started");

    while let Some(notification) = notif_rx.recv().await {
        match notification {
            SocketNotification::Event(event) => {
                session.handle_event(event).await;
            }
            SocketNotification::Status(status) => {
                if status != ConnectionStatus::Connected {
                    // Stale typing/presence state across a gap is
                    // meaningless; both trackers rebuild from live events.
                    let mut state = session.state_guard();
                    state.typing.clear_all();
                    state.presence.clear();
                }
                session.emit(SessionEvent::Status(status)).await;
            }
            SocketNotification::Resubscribed { chat_id } => {
                info!(chat = %chat_id, "Resubscribed after gap, reconciling");
                session.refresh_tail(chat_id);
            }
            SocketNotification::AuthRejected { reason } => {
                session.emit(SessionEvent::AuthRequired { reason }).await;
            }
        }
    }

    debug!("Session bridge stopped");
}
