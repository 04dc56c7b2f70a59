use thiserror::Error;

/// Errors produced while encoding or decoding socket frames.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// A frame could not be serialized to JSON.
    #[error("Frame encode error: {0}")]
    Encode(#[source] serde_json::Error),

    /// An inbound frame could not be parsed.
    #[error("Frame decode error: {0}")]
    Decode(#[source] serde_json::Error),
}
