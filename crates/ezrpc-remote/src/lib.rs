//! Bidirectional JSON-RPC over a persistent stream.
//!
//! A [`Remote`] owns one connected stream. It frames and decodes inbound
//! envelopes, resolves responses against its outstanding requests, and
//! routes requests and notifications to hooks by method name. Either side
//! may call the other at any time.
//!
//! [`Server`] accepts many connections and [`Client`] opens one; both share
//! a single [`HookRegistry`] with their Remotes.

pub mod client;
pub mod envelope;
pub mod error;
pub mod hooks;
pub mod pending;
pub mod remote;
pub mod server;
pub mod stats;

pub use client::{Client, SERVER_REMOTE_ID};
pub use envelope::{
    Envelope, ErrorObject, Id, Inbound, Malformed, MalformedKind, INTERNAL_ERROR,
    INVALID_PARAMS, INVALID_REQUEST, JSONRPC_VERSION, METHOD_NOT_FOUND, PARSE_ERROR,
};
pub use error::{Result, RpcError};
pub use hooks::{
    BoxFuture, Hook, HookKind, HookRegistry, HookResult, LifecycleHook, NotificationHook,
    RequestHook,
};
pub use pending::PendingCall;
pub use remote::{Remote, RemoteConfig, State, ETC_INIT, PING, TERM};
pub use server::Server;
pub use stats::RemoteStats;
