//! Transport seam for the realtime socket.
//!
//! The socket loop never touches wire I/O directly: a [`Connector`] opens a
//! [`Connection`], a pair of frame channels backed by whatever carries the
//! bytes (a WebSocket, a TLS stream, an in-memory pair in tests).  Framing
//! to and from the JSON envelopes is the transport's job, via
//! [`ClientFrame::to_json`] and [`ServerFrame::from_json`].

use async_trait::async_trait;
use tokio::sync::mpsc;

use undertone_shared::{ClientFrame, ServerFrame};

use crate::error::ConnectError;

/// A live frame channel to the server.
#[derive(Debug)]
pub struct Connection {
    /// Frames written by the socket loop, carried to the server.
    pub outbound: mpsc::Sender<ClientFrame>,
    /// Frames arriving from the server.  The channel closing means the
    /// transport dropped.
    pub inbound: mpsc::Receiver<ServerFrame>,
}

/// Opens transport-level connections.
///
/// One call per connection attempt; the socket loop owns retry policy and
/// the auth handshake on top.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> Result<Connection, ConnectError>;
}
