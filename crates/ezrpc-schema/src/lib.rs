//! Optional per-method JSON Schema validation for ezrpc.
//!
//! Validate request and notification `params` against JSON Schema 2020-12
//! before a hook ever sees them. Catch contract violations at the
//! connection boundary instead of inside application code.
//!
//! Schemas are keyed by method name. A directory of `<method>.schema.json`
//! files can be loaded in one call.

pub mod config;
pub mod error;
pub mod registry;
pub mod validator;

pub use config::RegistryConfig;
pub use error::{Result, SchemaError};
pub use registry::SchemaRegistry;
