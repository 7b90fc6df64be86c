//! Listener and connector plumbing for ezrpc.
//!
//! Provides a unified duplex stream over the supported socket kinds:
//! - TCP (`tcp://host:port` or `host:port`)
//! - Unix domain sockets (`unix:/path/to.sock`, Linux/macOS)
//!
//! This is the lowest layer of ezrpc. The RPC engine only ever sees the
//! [`RpcStream`] type provided here, or any other `AsyncRead + AsyncWrite`.

pub mod endpoint;
pub mod error;
pub mod listener;
pub mod stream;

pub use endpoint::Endpoint;
pub use error::{Result, TransportError};
pub use listener::{connect, Listener, ListenerConfig};
pub use stream::RpcStream;
