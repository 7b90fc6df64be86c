//! Bidirectional JSON-RPC over persistent connections.
//!
//! Both ends of an ezrpc connection are peers: either may call methods on
//! the other or send it notifications at any time. A [`Server`] accepts
//! many connections, a [`Client`] opens one, and each connection is a
//! [`Remote`].
//!
//! # Crate Structure
//!
//! - [`transport`]: endpoints, TCP and Unix domain socket listeners
//! - [`frame`]: delimiter framing of the byte stream
//! - [`remote`]: envelopes, correlation, hooks, server and client
//! - [`schema`]: optional JSON Schema validation of params (behind `schema`)
//!
//! ```ignore
//! use std::sync::Arc;
//! use ezrpc::{Endpoint, HookRegistry, Listener, Server};
//!
//! let hooks = HookRegistry::new();
//! hooks.on_request("echo", |_remote, params| async move {
//!     Ok(params.unwrap_or_default())
//! });
//! let listener = Listener::bind(&"127.0.0.1:7000".parse::<Endpoint>()?).await?;
//! Server::new(Arc::new(hooks)).serve(listener).await;
//! ```

/// Re-export transport types.
pub mod transport {
    pub use ezrpc_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use ezrpc_frame::*;
}

/// Re-export connection engine types.
pub mod remote {
    pub use ezrpc_remote::*;
}

/// Re-export schema types (requires `schema` feature).
#[cfg(feature = "schema")]
pub mod schema {
    pub use ezrpc_schema::*;
}

pub use ezrpc_remote::{
    Client, Envelope, ErrorObject, Hook, HookKind, HookRegistry, HookResult, Id, PendingCall,
    Remote, RemoteConfig, RemoteStats, Result, RpcError, Server, State,
};
pub use ezrpc_transport::{Endpoint, Listener, ListenerConfig};
