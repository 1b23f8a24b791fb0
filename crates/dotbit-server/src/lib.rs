//! dotbit-server: authoritative DNS front-end for the `.bit` namespace.
//!
//! Turns a raw configuration into a running server:
//! - **config**: normalizes bind address, nameserver and vanity-IP lists
//! - **keys**: loads the DNSSEC KSK/ZSK pair from BIND key files
//! - **engine**: builds the authority that answers queries
//! - **listener**: binds UDP and TCP on one address and serves both
//! - **server**: ties the pieces together behind `new`/`start`/`stop`
//!
//! All fallible setup happens in [`Server::new`]; once it returns, the port
//! is held and [`Server::start`] cannot fail on configuration grounds.

pub mod config;
pub mod engine;
pub mod error;
pub mod keys;
pub mod listener;
pub mod naming;
pub mod router;
pub mod server;
pub mod web;

// Re-exports for convenience.
pub use config::{Config, NormalizedConfig};
pub use engine::{ApexEngine, EngineConfig, EngineFactory};
pub use error::{ServerError, Transport};
pub use keys::{KeyPair, KeyRole, SigningKeys};
pub use naming::NamingConnection;
pub use server::{Server, Services};

/// Result type for dotbit-server operations.
pub type Result<T> = std::result::Result<T, ServerError>;
