//! Server lifecycle: construct, start, stop.
//!
//! Construction does all the fallible work in a fixed order (config, naming
//! connection, keys, engine, router, sockets, status frontend) and returns
//! an error without leaving anything open if any step fails. Starting only
//! launches the serve loops on sockets that are already bound.

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{info, info_span, Span};

use crate::config::{Config, NormalizedConfig};
use crate::engine::{ApexEngine, EngineConfig, EngineFactory};
use crate::keys::{load_signing_keys, SigningKeys};
use crate::listener::{FailureReceiver, ListenerCoordinator};
use crate::naming::NamingConnection;
use crate::router::QueryRouter;
use crate::web::{StatusReport, WebFrontend};
use crate::ServerError;

/// Collaborators injected into a [`Server`].
#[derive(Clone)]
pub struct Services {
    /// Version string reported by the engine and the status frontend.
    pub version: String,
    /// Builds the resolution engine.
    pub engine: Arc<dyn EngineFactory>,
    /// Parent span for everything the server logs.
    pub span: Span,
}

impl Default for Services {
    fn default() -> Self {
        Self {
            version: format!("dotbit {}", env!("CARGO_PKG_VERSION")),
            engine: Arc::new(ApexEngine),
            span: info_span!("dotbit"),
        }
    }
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// A constructed DNS server.
pub struct Server {
    config: Arc<NormalizedConfig>,
    version: String,
    naming: NamingConnection,
    keys: SigningKeys,
    listeners: ListenerCoordinator,
    web: Option<WebFrontend>,
    failures: Mutex<Option<FailureReceiver>>,
    span: Span,
}

impl Server {
    /// Build a server from `config`. Sockets are bound but not yet served.
    pub async fn new(config: Config, services: Services) -> crate::Result<Self> {
        let Services {
            version,
            engine,
            span,
        } = services;

        let config = Arc::new(config.normalize()?);
        let naming = NamingConnection::from_config(&config);
        let keys = span.in_scope(|| load_signing_keys(&config))?;

        let engine_config = EngineConfig::new(&config, keys.clone(), naming.clone(), version.clone());
        let authority = span.in_scope(|| engine.build(engine_config))?;
        let router = QueryRouter::new(authority);

        let (failures_tx, failures_rx) = mpsc::unbounded_channel();
        let listeners =
            ListenerCoordinator::bind(config.bind(), router, failures_tx, span.clone()).await?;

        let http_addr = &config.raw().http_listen_addr;
        let web = if http_addr.is_empty() {
            None
        } else {
            let report = StatusReport::new(&config, &keys, version.clone(), listeners.local_addr());
            // A failure here drops `listeners`, which releases the DNS sockets.
            Some(WebFrontend::start(http_addr, report, span.clone()).await?)
        };

        span.in_scope(|| {
            info!(
                version = %version,
                addr = %listeners.local_addr(),
                suffix = %config.canonical_suffix(),
                signed = keys.is_signing(),
                "server constructed"
            );
        });

        Ok(Self {
            config,
            version,
            naming,
            keys,
            listeners,
            web,
            failures: Mutex::new(Some(failures_rx)),
            span,
        })
    }

    /// Serve both transports. Returns once UDP and TCP are accepting queries.
    pub async fn start(&self) -> crate::Result<()> {
        self.listeners.start().await?;
        self.span.in_scope(|| info!("server started"));
        Ok(())
    }

    /// Stop the status frontend and both listeners. Idempotent.
    pub async fn stop(&self) {
        if let Some(web) = &self.web {
            web.stop().await;
        }
        self.listeners.stop().await;
        self.span.in_scope(|| info!("server stopped"));
    }

    /// Receiver for serve failures that happen after [`Server::start`].
    ///
    /// Only the first call gets the receiver.
    pub fn take_failures(&self) -> crate::Result<FailureReceiver> {
        self.failures
            .lock()
            .map_err(|_| ServerError::State(String::from("failure channel lock poisoned")))?
            .take()
            .ok_or_else(|| ServerError::State(String::from("failure channel already taken")))
    }

    /// The normalized configuration snapshot.
    pub fn config(&self) -> &NormalizedConfig {
        &self.config
    }

    /// Connection descriptor for the naming service.
    pub const fn naming(&self) -> &NamingConnection {
        &self.naming
    }

    /// Loaded DNSSEC keys.
    pub const fn signing_keys(&self) -> &SigningKeys {
        &self.keys
    }

    /// Concrete address the DNS listeners are bound to.
    pub const fn local_addr(&self) -> SocketAddr {
        self.listeners.local_addr()
    }

    /// Address of the status frontend, when enabled.
    pub fn web_addr(&self) -> Option<SocketAddr> {
        self.web.as_ref().map(WebFrontend::local_addr)
    }

    /// Version string the server was constructed with.
    pub fn version(&self) -> &str {
        &self.version
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("version", &self.version)
            .field("addr", &self.local_addr())
            .field("web", &self.web_addr())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_config() -> Config {
        Config {
            bind: "127.0.0.1:0".into(),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_construct_binds_but_does_not_serve() {
        let server = Server::new(local_config(), Services::default()).await.unwrap();
        assert_ne!(server.local_addr().port(), 0);
        assert!(server.web_addr().is_none());
        assert!(server.version().starts_with("dotbit "));
        assert!(!server.signing_keys().is_signing());
        server.stop().await;
    }

    #[tokio::test]
    async fn test_failures_taken_once() {
        let server = Server::new(local_config(), Services::default()).await.unwrap();
        assert!(server.take_failures().is_ok());
        assert!(matches!(server.take_failures(), Err(ServerError::State(_))));
    }

    #[tokio::test]
    async fn test_invalid_vanity_ip_fails_construction() {
        let config = Config {
            vanity_ips: "192.0.2.1,nope".into(),
            ..local_config()
        };
        let err = Server::new(config, Services::default()).await.unwrap_err();
        assert!(err.is_config_error());
        assert!(err.to_string().contains("nope"));
    }

    #[derive(Debug)]
    struct FailingEngine;

    impl EngineFactory for FailingEngine {
        fn build(
            &self,
            _config: EngineConfig,
        ) -> crate::Result<Arc<dyn hickory_server::authority::AuthorityObject>> {
            Err(ServerError::Engine(String::from("no ledger")))
        }
    }

    #[tokio::test]
    async fn test_engine_failure_fails_construction() {
        let services = Services {
            engine: Arc::new(FailingEngine),
            ..Services::default()
        };
        let err = Server::new(local_config(), services).await.unwrap_err();
        assert!(matches!(err, ServerError::Engine(_)));
    }

    #[tokio::test]
    async fn test_web_bind_failure_releases_dns_port() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let dns = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let dns_addr = dns.local_addr().unwrap();
        drop(dns);

        let config = Config {
            bind: dns_addr.to_string(),
            http_listen_addr: taken.local_addr().unwrap().to_string(),
            ..Config::default()
        };
        let err = Server::new(config, Services::default()).await.unwrap_err();
        assert!(err.is_bind_error());
        std::net::TcpListener::bind(dns_addr).unwrap();
        std::net::UdpSocket::bind(dns_addr).unwrap();
    }
}
