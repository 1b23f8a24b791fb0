//! Error types for the dotbit DNS server.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Which of the two DNS transports an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Datagram transport.
    Udp,
    /// Stream transport.
    Tcp,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Udp => f.write_str("udp"),
            Self::Tcp => f.write_str("tcp"),
        }
    }
}

/// Errors that can occur while constructing, starting or running the server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Configuration is invalid or could not be read.
    #[error("config error: {0}")]
    Config(String),

    /// An entry of the vanity IP list is not an IP address.
    #[error("config error: couldn't parse vanity IP {token:?}")]
    InvalidVanityIp {
        /// The offending list entry.
        token: String,
    },

    /// A key-signing key was configured without a zone-signing key.
    #[error("config error: ZSK required when KSK is specified")]
    KskWithoutZsk,

    /// A DNSSEC key file could not be read or parsed.
    #[error("key load error: {}: {reason}", path.display())]
    KeyLoad {
        /// File that failed to load.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },

    /// Address resolution or socket binding failed.
    #[error("bind error: {addr}: {reason}")]
    Bind {
        /// Address as configured.
        addr: String,
        /// What went wrong.
        reason: String,
    },

    /// A serve loop failed after start.
    #[error("{transport} serve error: {reason}")]
    Serve {
        /// Transport whose loop failed.
        transport: Transport,
        /// What went wrong.
        reason: String,
    },

    /// Naming-service credentials could not be retrieved.
    #[error("credentials error: {0}")]
    Credentials(String),

    /// The resolution engine could not be constructed.
    #[error("engine error: {0}")]
    Engine(String),

    /// The web status frontend failed.
    #[error("web frontend error: {0}")]
    Web(String),

    /// Operation not valid in the server's current lifecycle state.
    #[error("invalid server state: {0}")]
    State(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Returns true for errors caused by invalid configuration values.
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::InvalidVanityIp { .. } | Self::KskWithoutZsk
        )
    }

    /// Returns true if a DNSSEC key file failed to load.
    #[must_use]
    pub const fn is_key_error(&self) -> bool {
        matches!(self, Self::KeyLoad { .. })
    }

    /// Returns true if the listeners could not be bound.
    #[must_use]
    pub const fn is_bind_error(&self) -> bool {
        matches!(self, Self::Bind { .. })
    }

    pub(crate) fn key_load(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        Self::KeyLoad {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
