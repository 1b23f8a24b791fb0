//! Optional HTTP status frontend.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument, Span};

use crate::config::NormalizedConfig;
use crate::keys::SigningKeys;
use crate::ServerError;

/// Snapshot of the server's configuration served at `/status.json`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    /// Server version string.
    pub version: String,
    /// Concrete DNS listen address.
    pub bind: SocketAddr,
    /// Served suffix without dots.
    pub canonical_suffix: String,
    /// Canonical nameservers as written in the configuration.
    pub canonical_nameservers: String,
    /// Vanity IPs as written in the configuration.
    pub vanity_ips: String,
    /// Hostmaster e-mail address.
    pub hostmaster: String,
    /// Configured name of this nameserver, possibly empty.
    pub self_name: String,
    /// Configured address of this nameserver.
    pub self_ip: String,
    /// Template set name.
    pub tpl_set: String,
    /// Key tag of the loaded KSK.
    pub ksk_tag: Option<u16>,
    /// Key tag of the loaded ZSK.
    pub zsk_tag: Option<u16>,
}

impl StatusReport {
    /// Build the report for a server bound to `bind`.
    pub fn new(
        config: &NormalizedConfig,
        keys: &SigningKeys,
        version: impl Into<String>,
        bind: SocketAddr,
    ) -> Self {
        let raw = config.raw();
        Self {
            version: version.into(),
            bind,
            canonical_suffix: config.canonical_suffix().to_string(),
            canonical_nameservers: raw.canonical_nameservers.clone(),
            vanity_ips: raw.vanity_ips.clone(),
            hostmaster: raw.hostmaster.clone(),
            self_name: raw.self_name.clone(),
            self_ip: raw.self_ip.clone(),
            tpl_set: raw.tpl_set.clone(),
            ksk_tag: keys.ksk.as_ref().map(|k| k.record.key_tag()),
            zsk_tag: keys.zsk.as_ref().map(|k| k.record.key_tag()),
        }
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "dotbit {}", self.version)?;
        writeln!(f, "listening on {}", self.bind)?;
        writeln!(f, "suffix: {}", self.canonical_suffix)?;
        writeln!(f, "nameservers: {}", self.canonical_nameservers)?;
        writeln!(f, "vanity IPs: {}", self.vanity_ips)?;
        writeln!(f, "hostmaster: {}", self.hostmaster)?;
        writeln!(f, "self: {} {}", self.self_name, self.self_ip)?;
        writeln!(f, "templates: {}", self.tpl_set)?;
        match (self.ksk_tag, self.zsk_tag) {
            (_, None) => writeln!(f, "DNSSEC: unsigned"),
            (Some(ksk), Some(zsk)) => writeln!(f, "DNSSEC: KSK {ksk}, ZSK {zsk}"),
            (None, Some(zsk)) => writeln!(f, "DNSSEC: ZSK {zsk}"),
        }
    }
}

fn router(report: Arc<StatusReport>) -> Router {
    Router::new()
        .route("/", get(get_text))
        .route("/status.json", get(get_json))
        .with_state(report)
}

async fn get_text(State(report): State<Arc<StatusReport>>) -> String {
    report.to_string()
}

async fn get_json(State(report): State<Arc<StatusReport>>) -> Json<StatusReport> {
    Json((*report).clone())
}

/// A running status frontend.
pub struct WebFrontend {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WebFrontend {
    /// Bind `addr` and start serving `report` in the background.
    pub async fn start(addr: &str, report: StatusReport, span: Span) -> crate::Result<Self> {
        let bind_error = |reason: String| ServerError::Bind {
            addr: addr.to_string(),
            reason,
        };
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| bind_error(format!("HTTP bind: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| bind_error(format!("HTTP local address: {e}")))?;
        let shutdown = CancellationToken::new();

        let app = router(Arc::new(report));
        let signal = shutdown.clone();
        let task = tokio::spawn(
            async move {
                info!(address = %local_addr, "status frontend listening");
                let served = axum::serve(listener, app)
                    .with_graceful_shutdown(async move { signal.cancelled().await })
                    .await;
                if let Err(e) = served {
                    warn!(error = %ServerError::Web(e.to_string()), "status frontend stopped");
                }
            }
            .instrument(span),
        );

        Ok(Self {
            local_addr,
            shutdown,
            task: Mutex::new(Some(task)),
        })
    }

    /// Address the frontend is listening on.
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop serving and wait for the listener to close. Idempotent.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.lock().await.take() {
            let _ = task.await;
        }
    }
}

impl Drop for WebFrontend {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn report() -> StatusReport {
        let config = Config {
            canonical_nameservers: "a.bit, b.bit".into(),
            vanity_ips: "192.0.2.1".into(),
            ..Config::default()
        }
        .normalize()
        .unwrap();
        StatusReport::new(
            &config,
            &SigningKeys::default(),
            "1.0",
            "127.0.0.1:53".parse().unwrap(),
        )
    }

    #[test]
    fn test_report_keeps_raw_strings() {
        let report = report();
        assert_eq!(report.canonical_nameservers, "a.bit, b.bit");
        assert_eq!(report.vanity_ips, "192.0.2.1");
        assert_eq!(report.canonical_suffix, "bit");

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["version"], "1.0");
        assert!(json["zsk_tag"].is_null());
    }

    #[test]
    fn test_text_summary() {
        let text = report().to_string();
        assert!(text.starts_with("dotbit 1.0\n"));
        assert!(text.contains("DNSSEC: unsigned"));
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let web = WebFrontend::start("127.0.0.1:0", report(), Span::none())
            .await
            .unwrap();
        let addr = web.local_addr();
        assert_ne!(addr.port(), 0);
        web.stop().await;
        web.stop().await;
        std::net::TcpListener::bind(addr).unwrap();
    }

    #[tokio::test]
    async fn test_bind_failure() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap().to_string();
        let err = WebFrontend::start(&addr, report(), Span::none())
            .await
            .err()
            .unwrap();
        assert!(err.is_bind_error());
    }
}
