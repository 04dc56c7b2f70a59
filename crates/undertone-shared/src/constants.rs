use std::time::Duration;

/// How long a typing indicator stays visible without a refresh or an
/// explicit stop. The local TTL is authoritative; `typing_stop` delivery
/// is best-effort.
pub const TYPING_TTL: Duration = Duration::from_secs(5);

/// Minimum interval between outbound typing signals for one chat.
/// Bursts of local keystrokes coalesce into one signal per window.
pub const TYPING_SIGNAL_INTERVAL: Duration = Duration::from_millis(2_500);

/// Delay before the first reconnect attempt.
pub const BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Upper bound on the reconnect delay.
pub const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Jitter applied to each reconnect delay, as a fraction of the delay.
pub const BACKOFF_JITTER: f64 = 0.2;

/// Interval between heartbeat pings on an established connection.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);

/// The connection is considered dead after this long without any inbound
/// frame (pongs included).
pub const LIVENESS_TIMEOUT: Duration = Duration::from_secs(45);

/// Deadline for the server to answer the auth handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of messages per timeline page.
pub const DEFAULT_PAGE_LIMIT: u32 = 50;

/// Scroll distance from a timeline edge that triggers the next page fetch.
pub const FETCH_EDGE_THRESHOLD: f64 = 200.0;

/// Distance from the newest message under which the view counts as
/// "at the bottom" for auto-scroll purposes.
pub const BOTTOM_EPSILON: f64 = 24.0;

/// Maximum accepted message content length in bytes.
pub const MAX_CONTENT_LEN: usize = 8_192;
