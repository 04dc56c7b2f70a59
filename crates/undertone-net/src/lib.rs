// Realtime connection layer: one authenticated socket, command/notification
// channels, reconnection with backoff.

pub mod backoff;
pub mod socket;
pub mod throttle;
pub mod transport;

mod error;

pub use backoff::Backoff;
pub use error::ConnectError;
pub use socket::{spawn_socket, SocketCommand, SocketConfig, SocketNotification};
pub use throttle::TypingThrottle;
pub use transport::{Connection, Connector};
