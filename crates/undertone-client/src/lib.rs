//! # undertone-client
//!
//! Session facade for the realtime chat core: wires the socket layer and
//! the timeline cache together, exposes the optimistic send/edit/delete
//! flows, and derives the render-ready item list the presentation layer
//! consumes.

pub mod config;
pub mod gateway;
pub mod session;
pub mod view;

pub use config::SessionConfig;
pub use gateway::{GatewayError, HttpGateway, MessageGateway, PageRequest};
pub use session::{AuthContext, ChatSession, SessionEvent};
pub use view::{build_items, EdgeState, EdgeStates, ScrollTracker, TimelineItem};

use tracing_subscriber::{fmt, EnvFilter};

/// Install the default tracing subscriber for binaries embedding the core.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("undertone_client=debug,undertone_net=debug,undertone_timeline=info,warn"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
