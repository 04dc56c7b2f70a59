use std::time::Duration;

use undertone_net::SocketConfig;
use undertone_shared::constants::{
    BOTTOM_EPSILON, DEFAULT_PAGE_LIMIT, FETCH_EDGE_THRESHOLD, TYPING_TTL,
};

/// Session behaviour knobs.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Messages per page fetch.
    pub page_limit: u32,
    /// Typing indicator lifetime without a refresh.
    pub typing_ttl: Duration,
    /// Scroll distance from a timeline edge that triggers the next fetch.
    pub fetch_threshold: f64,
    /// "At bottom" tolerance for the auto-scroll policy.
    pub bottom_epsilon: f64,
    /// Socket layer configuration.
    pub socket: SocketConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            page_limit: DEFAULT_PAGE_LIMIT,
            typing_ttl: TYPING_TTL,
            fetch_threshold: FETCH_EDGE_THRESHOLD,
            bottom_epsilon: BOTTOM_EPSILON,
            socket: SocketConfig::default(),
        }
    }
}
