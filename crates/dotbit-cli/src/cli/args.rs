//! Command-line argument definitions using clap.

use clap::Parser;
use dotbit_server::Config;
use std::path::PathBuf;

/// Authoritative DNS server for the .bit namespace
///
/// Serves the configured apex (SOA, NS, vanity addresses, DNSKEYs) over
/// UDP and TCP, with an optional HTTP status page.
#[derive(Parser, Debug)]
#[command(name = "dotbitd")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (TOML, `[dotbit]` section)
    #[arg(short, long, env = "DOTBIT_CONF", default_value = "dotbit.conf")]
    pub conf: PathBuf,

    /// Address to serve DNS on, overriding `bind`
    #[arg(short, long)]
    pub bind: Option<String>,

    /// Address for the HTTP status page, overriding `httplistenaddr`
    #[arg(long)]
    pub http_listen_addr: Option<String>,

    /// Log filter (e.g. `info`, `dotbit_server=debug`); RUST_LOG wins when set
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Cli {
    /// Apply command-line overrides on top of the file configuration.
    pub fn apply(&self, config: &mut Config) {
        if let Some(bind) = &self.bind {
            config.bind.clone_from(bind);
        }
        if let Some(addr) = &self.http_listen_addr {
            config.http_listen_addr.clone_from(addr);
        }
    }
}
