//! Socket orchestration with tokio mpsc command/notification pattern.
//!
//! The socket event loop runs in a dedicated tokio task and is the sole
//! owner of the connection.  External code communicates with it through
//! typed command and notification channels; the loop handles the auth
//! handshake, heartbeat, reconnection with backoff, and scoping of inbound
//! events to the single subscribed chat.

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use undertone_shared::constants::{
    BACKOFF_BASE, BACKOFF_CAP, BACKOFF_JITTER, HANDSHAKE_TIMEOUT, HEARTBEAT_INTERVAL,
    LIVENESS_TIMEOUT, TYPING_SIGNAL_INTERVAL,
};
use undertone_shared::{ChatEvent, ChatId, ClientFrame, ConnectionStatus, ServerFrame, UserId};

use crate::backoff::Backoff;
use crate::error::ConnectError;
use crate::throttle::TypingThrottle;
use crate::transport::{Connection, Connector};

// ---------------------------------------------------------------------------
// Command / notification types
// ---------------------------------------------------------------------------

/// Commands sent *into* the socket task.
#[derive(Debug)]
pub enum SocketCommand {
    /// Open the connection and run the auth handshake.  A rejected
    /// handshake is fatal to this attempt and is not retried; the caller
    /// must re-authenticate first.
    Connect {
        token: String,
        reply: oneshot::Sender<Result<UserId, ConnectError>>,
    },
    /// Scope realtime delivery to this chat.  Any previously subscribed
    /// chat is unsubscribed first.
    Subscribe(ChatId),
    Unsubscribe(ChatId),
    /// Fire-and-forget typing signal; bursts coalesce into one frame per
    /// throttle window.
    SendTyping(ChatId),
    /// Gracefully shut down the socket task.
    Shutdown,
}

/// Notifications sent *from* the socket task to the application.
#[derive(Debug, Clone)]
pub enum SocketNotification {
    /// A realtime event for the subscribed chat.
    Event(ChatEvent),
    /// The connection status changed.
    Status(ConnectionStatus),
    /// The active chat was re-subscribed after a reconnect.  Events missed
    /// during the outage are not replayed; the caller should run a
    /// reconciliation fetch.
    Resubscribed { chat_id: ChatId },
    /// Re-authentication during a reconnect was rejected; retries stopped.
    AuthRejected { reason: String },
}

/// Socket behaviour knobs.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Deadline for the server's handshake reply.
    pub handshake_timeout: std::time::Duration,
    /// Interval between outbound pings.
    pub heartbeat_interval: std::time::Duration,
    /// The connection counts as dead after this long without inbound
    /// traffic.
    pub liveness_timeout: std::time::Duration,
    /// Delay before the first reconnect attempt.
    pub backoff_base: std::time::Duration,
    /// Upper bound on the reconnect delay.
    pub backoff_cap: std::time::Duration,
    /// Jitter fraction applied to reconnect delays.
    pub backoff_jitter: f64,
    /// Minimum interval between outbound typing signals per chat.
    pub typing_interval: std::time::Duration,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: HANDSHAKE_TIMEOUT,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            liveness_timeout: LIVENESS_TIMEOUT,
            backoff_base: BACKOFF_BASE,
            backoff_cap: BACKOFF_CAP,
            backoff_jitter: BACKOFF_JITTER,
            typing_interval: TYPING_SIGNAL_INTERVAL,
        }
    }
}

/// Spawn the socket event loop in a background tokio task.
///
/// Returns channels for sending commands and receiving notifications.
pub fn spawn_socket<C: Connector>(
    connector: C,
    config: SocketConfig,
) -> (
    mpsc::Sender<SocketCommand>,
    mpsc::Receiver<SocketNotification>,
) {
    let (cmd_tx, cmd_rx) = mpsc::channel::<SocketCommand>(256);
    let (notif_tx, notif_rx) = mpsc::channel::<SocketNotification>(256);

    let throttle = TypingThrottle::new(config.typing_interval);
    let backoff = Backoff::new(config.backoff_base, config.backoff_cap, config.backoff_jitter);
    let task = SocketTask {
        connector,
        config,
        notif_tx,
        throttle,
        backoff,
        token: None,
        user: None,
        active_chat: None,
    };
    tokio::spawn(task.run(cmd_rx));

    (cmd_tx, notif_rx)
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

/// Why an online session ended.
enum SessionEnd {
    Shutdown,
    ConnectionLost,
}

/// Outcome of a reconnect cycle.
enum Reconnect {
    Connected(Connection),
    /// Re-auth was rejected; back to offline until the caller supplies
    /// fresh credentials.
    GaveUp,
    Shutdown,
}

struct SocketTask<C> {
    connector: C,
    config: SocketConfig,
    notif_tx: mpsc::Sender<SocketNotification>,
    throttle: TypingThrottle,
    backoff: Backoff,
    token: Option<String>,
    user: Option<UserId>,
    active_chat: Option<ChatId>,
}

impl<C: Connector> SocketTask<C> {
    async fn run(mut self, mut cmd_rx: mpsc::Receiver<SocketCommand>) {
        info!("Socket task started");

        'offline: loop {
            // --- Offline: wait for a connect ---
            let mut conn = loop {
                match cmd_rx.recv().await {
                    Some(SocketCommand::Connect { token, reply }) => {
                        match self.establish(&token).await {
                            Ok((conn, user_id)) => {
                                self.token = Some(token);
                                let _ = reply.send(Ok(user_id));
                                self.notify(SocketNotification::Status(
                                    ConnectionStatus::Connected,
                                ))
                                .await;
                                if let Some(chat_id) = self.active_chat {
                                    // Chat selected while offline: subscribe now.
                                    // A send failure here means the connection
                                    // already dropped; the online loop notices.
                                    let _ = conn
                                        .outbound
                                        .send(ClientFrame::Subscribe { chat_id })
                                        .await;
                                }
                                break conn;
                            }
                            Err(err) => {
                                warn!(error = %err, "Connect failed");
                                let _ = reply.send(Err(err));
                            }
                        }
                    }
                    Some(SocketCommand::Subscribe(chat_id)) => {
                        self.active_chat = Some(chat_id);
                    }
                    Some(SocketCommand::Unsubscribe(chat_id)) => {
                        if self.active_chat == Some(chat_id) {
                            self.active_chat = None;
                        }
                    }
                    Some(SocketCommand::SendTyping(_)) => {
                        // Typing signals are meaningless while offline.
                    }
                    Some(SocketCommand::Shutdown) | None => {
                        info!("Socket task stopped");
                        return;
                    }
                }
            };

            // --- Online, with reconnect cycles ---
            loop {
                match self.run_online(&mut conn, &mut cmd_rx).await {
                    SessionEnd::Shutdown => {
                        self.notify(SocketNotification::Status(ConnectionStatus::Offline))
                            .await;
                        info!("Socket task stopped");
                        return;
                    }
                    SessionEnd::ConnectionLost => {
                        warn!("Connection lost");
                        self.notify(SocketNotification::Status(
                            ConnectionStatus::Reconnecting,
                        ))
                        .await;
                        match self.reconnect(&mut cmd_rx).await {
                            Reconnect::Connected(new_conn) => conn = new_conn,
                            Reconnect::GaveUp => {
                                self.notify(SocketNotification::Status(
                                    ConnectionStatus::Offline,
                                ))
                                .await;
                                continue 'offline;
                            }
                            Reconnect::Shutdown => {
                                self.notify(SocketNotification::Status(
                                    ConnectionStatus::Offline,
                                ))
                                .await;
                                info!("Socket task stopped");
                                return;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Service an established connection until shutdown or loss.
    async fn run_online(
        &mut self,
        conn: &mut Connection,
        cmd_rx: &mut mpsc::Receiver<SocketCommand>,
    ) -> SessionEnd {
        let mut heartbeat = tokio::time::interval_at(
            tokio::time::Instant::now() + self.config.heartbeat_interval,
            self.config.heartbeat_interval,
        );
        let mut last_inbound = tokio::time::Instant::now();

        loop {
            tokio::select! {
                // --- Incoming commands ---
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(SocketCommand::Connect { token, reply }) => {
                            // Already connected: adopt the refreshed token.
                            match self.user {
                                Some(user_id) => {
                                    self.token = Some(token);
                                    let _ = reply.send(Ok(user_id));
                                }
                                None => {
                                    let _ = reply.send(Err(ConnectError::Transport(
                                        "Connection state unknown".into(),
                                    )));
                                }
                            }
                        }
                        Some(SocketCommand::Subscribe(chat_id)) => {
                            if self.active_chat == Some(chat_id) {
                                continue;
                            }
                            if let Some(prev) = self.active_chat.take() {
                                self.throttle.reset(prev);
                                if conn
                                    .outbound
                                    .send(ClientFrame::Unsubscribe { chat_id: prev })
                                    .await
                                    .is_err()
                                {
                                    self.active_chat = Some(chat_id);
                                    return SessionEnd::ConnectionLost;
                                }
                            }
                            self.active_chat = Some(chat_id);
                            if conn
                                .outbound
                                .send(ClientFrame::Subscribe { chat_id })
                                .await
                                .is_err()
                            {
                                return SessionEnd::ConnectionLost;
                            }
                            debug!(chat = %chat_id, "Subscribed");
                        }
                        Some(SocketCommand::Unsubscribe(chat_id)) => {
                            if self.active_chat == Some(chat_id) {
                                self.active_chat = None;
                                self.throttle.reset(chat_id);
                                if conn
                                    .outbound
                                    .send(ClientFrame::Unsubscribe { chat_id })
                                    .await
                                    .is_err()
                                {
                                    return SessionEnd::ConnectionLost;
                                }
                                debug!(chat = %chat_id, "Unsubscribed");
                            }
                        }
                        Some(SocketCommand::SendTyping(chat_id)) => {
                            if self.throttle.try_send(chat_id)
                                && conn
                                    .outbound
                                    .send(ClientFrame::Typing { chat_id })
                                    .await
                                    .is_err()
                            {
                                return SessionEnd::ConnectionLost;
                            }
                        }
                        Some(SocketCommand::Shutdown) | None => {
                            return SessionEnd::Shutdown;
                        }
                    }
                }

                // --- Inbound frames ---
                frame = conn.inbound.recv() => {
                    match frame {
                        Some(frame) => {
                            last_inbound = tokio::time::Instant::now();
                            self.handle_frame(frame).await;
                        }
                        None => return SessionEnd::ConnectionLost,
                    }
                }

                // --- Heartbeat / liveness ---
                _ = heartbeat.tick() => {
                    if last_inbound.elapsed() >= self.config.liveness_timeout {
                        warn!("No inbound traffic within liveness window");
                        return SessionEnd::ConnectionLost;
                    }
                    if conn.outbound.send(ClientFrame::Ping).await.is_err() {
                        return SessionEnd::ConnectionLost;
                    }
                }
            }
        }
    }

    /// Deliver an inbound frame, scoped to the subscribed chat.
    async fn handle_frame(&mut self, frame: ServerFrame) {
        match frame {
            ServerFrame::Pong => {}
            ServerFrame::AuthAck { .. } | ServerFrame::AuthError { .. } => {
                debug!("Ignoring auth frame outside handshake");
            }
            other => {
                if let Some(event) = other.into_event() {
                    if self.active_chat == Some(event.chat_id()) {
                        self.notify(SocketNotification::Event(event)).await;
                    } else {
                        debug!(chat = %event.chat_id(), "Dropping event for unsubscribed chat");
                    }
                }
            }
        }
    }

    /// Open a transport connection and run the auth handshake.
    async fn establish(&mut self, token: &str) -> Result<(Connection, UserId), ConnectError> {
        let mut conn = self.connector.connect().await?;

        conn.outbound
            .send(ClientFrame::Auth {
                token: token.to_string(),
            })
            .await
            .map_err(|_| ConnectError::Transport("Connection closed during handshake".into()))?;

        let reply = tokio::time::timeout(self.config.handshake_timeout, conn.inbound.recv())
            .await
            .map_err(|_| ConnectError::Timeout)?;

        match reply {
            Some(ServerFrame::AuthAck { user_id }) => {
                info!(user = %user_id, "Authenticated");
                self.user = Some(user_id);
                self.backoff.reset();
                Ok((conn, user_id))
            }
            Some(ServerFrame::AuthError { reason }) => Err(ConnectError::Rejected(reason)),
            Some(other) => Err(ConnectError::Transport(format!(
                "Unexpected handshake reply: {other:?}"
            ))),
            None => Err(ConnectError::Transport(
                "Connection closed during handshake".into(),
            )),
        }
    }

    /// Retry the connection with exponential backoff until it comes back,
    /// re-auth is rejected, or the task is shut down.  The backoff resets
    /// on any successful handshake.
    async fn reconnect(&mut self, cmd_rx: &mut mpsc::Receiver<SocketCommand>) -> Reconnect {
        loop {
            let token = match self.token.clone() {
                Some(token) => token,
                None => return Reconnect::GaveUp,
            };

            let delay = self.backoff.next_delay();
            info!(
                attempt = self.backoff.attempt(),
                delay_ms = delay.as_millis() as u64,
                "Scheduling reconnect attempt"
            );
            if let Some(outcome) = self.wait_backoff(delay, cmd_rx).await {
                return outcome;
            }

            match self.establish(&token).await {
                Ok((conn, _user)) => {
                    self.notify(SocketNotification::Status(ConnectionStatus::Connected))
                        .await;
                    if self.resubscribe(&conn).await {
                        return Reconnect::Connected(conn);
                    }
                    // Dropped again immediately; next attempt.
                }
                Err(ConnectError::Rejected(reason)) => {
                    error!(reason = %reason, "Re-auth rejected, stopping retries");
                    self.notify(SocketNotification::AuthRejected { reason }).await;
                    return Reconnect::GaveUp;
                }
                Err(err) => {
                    warn!(error = %err, "Reconnect attempt failed");
                }
            }
        }
    }

    /// Sleep out a backoff delay while still servicing commands.  Returns
    /// `Some` to end the reconnect cycle early.
    async fn wait_backoff(
        &mut self,
        delay: std::time::Duration,
        cmd_rx: &mut mpsc::Receiver<SocketCommand>,
    ) -> Option<Reconnect> {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return None,
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(SocketCommand::Connect { token, reply }) => {
                            // Fresh credentials: skip the rest of the wait.
                            match self.establish(&token).await {
                                Ok((conn, user_id)) => {
                                    self.token = Some(token);
                                    let _ = reply.send(Ok(user_id));
                                    self.notify(SocketNotification::Status(
                                        ConnectionStatus::Connected,
                                    ))
                                    .await;
                                    if self.resubscribe(&conn).await {
                                        return Some(Reconnect::Connected(conn));
                                    }
                                }
                                Err(err) => {
                                    let _ = reply.send(Err(err));
                                }
                            }
                        }
                        Some(SocketCommand::Subscribe(chat_id)) => {
                            self.active_chat = Some(chat_id);
                        }
                        Some(SocketCommand::Unsubscribe(chat_id)) => {
                            if self.active_chat == Some(chat_id) {
                                self.active_chat = None;
                            }
                        }
                        Some(SocketCommand::SendTyping(_)) => {}
                        Some(SocketCommand::Shutdown) | None => {
                            return Some(Reconnect::Shutdown);
                        }
                    }
                }
            }
        }
    }

    /// Re-subscribe the active chat on a fresh connection and tell the
    /// application to reconcile.
    async fn resubscribe(&mut self, conn: &Connection) -> bool {
        if let Some(chat_id) = self.active_chat {
            if conn
                .outbound
                .send(ClientFrame::Subscribe { chat_id })
                .await
                .is_err()
            {
                return false;
            }
            self.notify(SocketNotification::Resubscribed { chat_id }).await;
        }
        true
    }

    async fn notify(&self, notification: SocketNotification) {
        let _ = self.notif_tx.send(notification).await;
    }
}
