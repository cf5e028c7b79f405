/// Parley gateway: line-delimited JSON framing plus, with the `server`
/// feature, the action dispatcher and per-connection request loop.

pub mod codec;
#[cfg(feature = "server")]
pub mod connection;
#[cfg(feature = "server")]
pub mod dispatcher;

pub use codec::{FrameError, TransportError, WireCodec};
#[cfg(feature = "server")]
pub use connection::{handle_connection, serve};
#[cfg(feature = "server")]
pub use dispatcher::ActionDispatcher;
