//! Outbound typing-signal coalescing.
//!
//! Local keystrokes arrive far faster than the channel should see them;
//! one signal per window is enough to keep the remote typing bubble alive.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use undertone_shared::constants::TYPING_SIGNAL_INTERVAL;
use undertone_shared::ChatId;

/// Per-chat minimum interval between outbound typing signals.
#[derive(Debug)]
pub struct TypingThrottle {
    interval: Duration,
    last_sent: HashMap<ChatId, Instant>,
}

impl TypingThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sent: HashMap::new(),
        }
    }

    /// Whether a typing signal for `chat_id` may go out now.  Claims the
    /// window when it returns `true`.
    pub fn try_send(&mut self, chat_id: ChatId) -> bool {
        let now = Instant::now();
        match self.last_sent.get(&chat_id) {
            Some(last) if now.duration_since(*last) < self.interval => false,
            _ => {
                self.last_sent.insert(chat_id, now);
                true
            }
        }
    }

    /// Forget a chat so the next signal goes out immediately.
    pub fn reset(&mut self, chat_id: ChatId) {
        self.last_sent.remove(&chat_id);
    }

    /// Drop entries whose window has long passed.
    pub fn purge_stale(&mut self) {
        let now = Instant::now();
        let interval = self.interval;
        self.last_sent
            .retain(|_, last| now.duration_since(*last) < interval);
    }
}

impl Default for TypingThrottle {
    fn default() -> Self {
        Self::new(TYPING_SIGNAL_INTERVAL)
    }
}
