//! Naming-service connection descriptor.
//!
//! The naming service is reached over RPC with basic credentials. Those come
//! either straight from the configuration or from a cookie file the naming
//! daemon rewrites on every start, so the cookie is re-read on each request.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::NormalizedConfig;
use crate::ServerError;

/// Username and password for one RPC request.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// RPC username.
    pub username: String,
    /// RPC password.
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Strategy for obtaining RPC credentials.
pub trait CredentialSource: Send + Sync + fmt::Debug {
    /// Fetch the credentials to use for the next request.
    fn credentials(&self) -> crate::Result<Credentials>;
}

/// Credentials fixed in the configuration.
#[derive(Debug, Clone)]
pub struct StaticCredentials(Credentials);

impl StaticCredentials {
    /// Wrap a username and password.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self(Credentials {
            username: username.into(),
            password: password.into(),
        })
    }
}

impl CredentialSource for StaticCredentials {
    fn credentials(&self) -> crate::Result<Credentials> {
        Ok(self.0.clone())
    }
}

/// Credentials read from a `user:password` cookie file.
#[derive(Debug, Clone)]
pub struct CookieCredentials {
    path: PathBuf,
}

impl CookieCredentials {
    /// Read credentials from `path` on every request.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the cookie file.
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl CredentialSource for CookieCredentials {
    fn credentials(&self) -> crate::Result<Credentials> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            ServerError::Credentials(format!("failed to read {}: {e}", self.path.display()))
        })?;

        let (username, password) = content.trim_end().split_once(':').ok_or_else(|| {
            ServerError::Credentials(format!("malformed cookie file {}", self.path.display()))
        })?;

        Ok(Credentials {
            username: username.to_string(),
            password: password.to_string(),
        })
    }
}

/// Where the naming service lives and how to authenticate to it.
#[derive(Debug, Clone)]
pub struct NamingConnection {
    /// RPC server address (`host:port`).
    pub server: String,
    credentials: Arc<dyn CredentialSource>,
}

impl NamingConnection {
    /// Describe a connection with an explicit credential strategy.
    pub fn new(server: impl Into<String>, credentials: Arc<dyn CredentialSource>) -> Self {
        Self {
            server: server.into(),
            credentials,
        }
    }

    /// Build the connection from configuration.
    ///
    /// A configured cookie path takes precedence over the static password.
    pub fn from_config(config: &NormalizedConfig) -> Self {
        let raw = config.raw();
        let credentials: Arc<dyn CredentialSource> = if raw.namecoin_rpc_cookie_path.is_empty() {
            Arc::new(StaticCredentials::new(
                raw.namecoin_rpc_username.clone(),
                raw.namecoin_rpc_password.clone(),
            ))
        } else {
            Arc::new(CookieCredentials::new(
                config.resolve_path(&raw.namecoin_rpc_cookie_path),
            ))
        };
        Self::new(raw.namecoin_rpc_address.clone(), credentials)
    }

    /// Credentials for the next request.
    pub fn credentials(&self) -> crate::Result<Credentials> {
        self.credentials.credentials()
    }
}
