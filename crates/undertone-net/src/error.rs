use thiserror::Error;

/// Errors from opening and authenticating the realtime socket.
#[derive(Error, Debug, Clone)]
pub enum ConnectError {
    /// The server rejected the auth handshake (invalid or expired token).
    /// Fatal to the attempt: the caller must re-authenticate before
    /// retrying.
    #[error("Handshake rejected: {0}")]
    Rejected(String),

    /// Transport-level failure (retryable).
    #[error("Transport error: {0}")]
    Transport(String),

    /// The server did not answer the handshake in time.
    #[error("Handshake timed out")]
    Timeout,

    /// The socket task is not running.
    #[error("Socket task has shut down")]
    ChannelClosed,
}
