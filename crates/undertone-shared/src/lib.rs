//! # undertone-shared
//!
//! Types shared by every undertone crate: identifiers, the domain message
//! model, the realtime socket wire protocol, and cross-cutting constants.

pub mod constants;
pub mod protocol;
pub mod types;

mod error;

pub use error::ProtocolError;
pub use protocol::{ChatEvent, ClientFrame, MessagePage, PageMeta, ServerFrame};
pub use types::*;
