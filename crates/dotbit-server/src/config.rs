//! Server configuration and normalization.
//!
//! [`Config`] holds the raw values exactly as they were written in the
//! config file (or set in code). [`Config::normalize`] validates them and
//! produces a [`NormalizedConfig`], which keeps the raw record alongside the
//! parsed lists so the raw strings can still be reported by the status page.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use crate::ServerError;

/// Raw configuration for a dotbit server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address to bind to for UDP and TCP (e.g. `0.0.0.0:53`, or `:53`).
    pub bind: String,

    /// Path to the DNSKEY KSK public key file.
    #[serde(rename = "publickey")]
    pub public_key: String,

    /// Path to the KSK's private key file.
    #[serde(rename = "privatekey")]
    pub private_key: String,

    /// Path to the DNSKEY ZSK public key file.
    #[serde(rename = "zonepublickey")]
    pub zone_public_key: String,

    /// Path to the ZSK's private key file.
    #[serde(rename = "zoneprivatekey")]
    pub zone_private_key: String,

    /// Naming-service RPC username.
    #[serde(rename = "namecoinrpcusername")]
    pub namecoin_rpc_username: String,

    /// Naming-service RPC password.
    #[serde(rename = "namecoinrpcpassword")]
    pub namecoin_rpc_password: String,

    /// Naming-service RPC server address.
    #[serde(rename = "namecoinrpcaddress")]
    pub namecoin_rpc_address: String,

    /// Naming-service RPC cookie file; when set it is used instead of the password.
    #[serde(rename = "namecoinrpccookiepath")]
    pub namecoin_rpc_cookie_path: String,

    /// Maximum name cache entries.
    #[serde(rename = "cachemaxentries")]
    pub cache_max_entries: usize,

    /// FQDN of this nameserver. If empty, a pseudo-hostname is used.
    #[serde(rename = "selfname")]
    pub self_name: String,

    /// Canonical IP address of this nameserver.
    #[serde(rename = "selfip")]
    pub self_ip: String,

    /// Address for the status web frontend (empty: disabled).
    #[serde(rename = "httplistenaddr")]
    pub http_listen_addr: String,

    /// Suffix served and advertised via HTTP.
    #[serde(rename = "canonicalsuffix")]
    pub canonical_suffix: String,

    /// Comma-separated nameservers for NS records. If blank, the self name is used.
    #[serde(rename = "canonicalnameservers")]
    pub canonical_nameservers: String,

    /// Hostmaster e-mail address.
    pub hostmaster: String,

    /// Comma-separated addresses to place in A/AAAA records at the zone apex.
    #[serde(rename = "vanityips")]
    pub vanity_ips: String,

    /// Template set for the status page.
    #[serde(rename = "tplset")]
    pub tpl_set: String,

    /// Path to the template directory (empty: autodetect).
    #[serde(rename = "tplpath")]
    pub tpl_path: String,

    /// Directory relative file names are interpreted against.
    #[serde(rename = "configdir")]
    pub config_dir: PathBuf,
}

/// On-disk layout: everything lives under a `[dotbit]` table.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    dotbit: Config,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: String::from(":53"),
            public_key: String::new(),
            private_key: String::new(),
            zone_public_key: String::new(),
            zone_private_key: String::new(),
            namecoin_rpc_username: String::new(),
            namecoin_rpc_password: String::new(),
            namecoin_rpc_address: String::from("127.0.0.1:8336"),
            namecoin_rpc_cookie_path: String::new(),
            cache_max_entries: 100,
            self_name: String::new(),
            self_ip: String::from("127.127.127.127"),
            http_listen_addr: String::new(),
            canonical_suffix: String::from("bit"),
            canonical_nameservers: String::new(),
            hostmaster: String::new(),
            vanity_ips: String::new(),
            tpl_set: String::from("std"),
            tpl_path: String::new(),
            config_dir: PathBuf::new(),
        }
    }
}

impl Config {
    /// Load config from a TOML file, falling back to defaults.
    ///
    /// Unless the file sets `configdir` itself, relative paths are
    /// interpreted against the directory containing the file.
    pub fn load(path: &Path) -> crate::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str::<ConfigFile>(&content)
                .map_err(|e| ServerError::Config(format!("{}: {e}", path.display())))?
                .dotbit
        } else {
            Self::default()
        };

        if config.config_dir.as_os_str().is_empty() {
            if let Some(parent) = path.parent() {
                config.config_dir = parent.to_path_buf();
            }
        } else if config.config_dir.is_relative() {
            if let Some(parent) = path.parent() {
                config.config_dir = parent.join(&config.config_dir);
            }
        }

        Ok(config)
    }

    /// Resolve a configured file name against `config_dir`.
    ///
    /// Absolute paths are returned unchanged.
    pub fn resolve_path(&self, name: &str) -> PathBuf {
        let path = Path::new(name);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config_dir.join(path)
        }
    }

    /// Validate the raw values and parse the list fields.
    pub fn normalize(self) -> crate::Result<NormalizedConfig> {
        let canonical_nameservers = parse_nameservers(&self.canonical_nameservers);
        let vanity_ips = parse_vanity_ips(&self.vanity_ips)?;
        let bind = normalize_bind(&self.bind);

        let self_ip = match self.self_ip.trim() {
            "" => None,
            ip => Some(ip.parse::<IpAddr>().map_err(|_| {
                ServerError::Config(format!("couldn't parse self IP {ip:?}"))
            })?),
        };

        let canonical_suffix = self.canonical_suffix.trim_matches('.').to_string();
        if canonical_suffix.is_empty() {
            return Err(ServerError::Config(String::from(
                "canonical suffix must not be empty",
            )));
        }

        Ok(NormalizedConfig {
            raw: self,
            bind,
            canonical_suffix,
            canonical_nameservers,
            vanity_ips,
            self_ip,
        })
    }
}

/// Validated, immutable view of a [`Config`].
#[derive(Debug, Clone)]
pub struct NormalizedConfig {
    raw: Config,
    bind: String,
    canonical_suffix: String,
    canonical_nameservers: Vec<String>,
    vanity_ips: Vec<IpAddr>,
    self_ip: Option<IpAddr>,
}

impl NormalizedConfig {
    /// The raw configuration as supplied.
    pub const fn raw(&self) -> &Config {
        &self.raw
    }

    /// Bind address with a bare `:port` expanded to all IPv4 interfaces.
    pub fn bind(&self) -> &str {
        &self.bind
    }

    /// Canonical suffix without leading or trailing dots (e.g. `bit`).
    pub fn canonical_suffix(&self) -> &str {
        &self.canonical_suffix
    }

    /// Canonical nameservers, each fully qualified. Empty means "use the self name".
    pub fn canonical_nameservers(&self) -> &[String] {
        &self.canonical_nameservers
    }

    /// Vanity IPs in configuration order.
    pub fn vanity_ips(&self) -> &[IpAddr] {
        &self.vanity_ips
    }

    /// Parsed self IP, if one is configured.
    pub const fn self_ip(&self) -> Option<IpAddr> {
        self.self_ip
    }

    /// Resolve a configured file name against the config directory.
    pub fn resolve_path(&self, name: &str) -> PathBuf {
        self.raw.resolve_path(name)
    }
}

/// Split a comma list into fully-qualified names.
pub fn parse_nameservers(list: &str) -> Vec<String> {
    split_list(list).map(fqdn).collect()
}

/// Split a comma list into IP addresses, naming the first bad entry on failure.
///
/// Only a blank list is empty; a blank entry inside a list is an error.
pub fn parse_vanity_ips(list: &str) -> crate::Result<Vec<IpAddr>> {
    if list.trim().is_empty() {
        return Ok(Vec::new());
    }
    list.split(',')
        .map(str::trim)
        .map(|token| {
            token.parse::<IpAddr>().map_err(|_| ServerError::InvalidVanityIp {
                token: token.to_string(),
            })
        })
        .collect()
}

/// Append the trailing root dot if it is missing.
pub fn fqdn(name: &str) -> String {
    if name.ends_with('.') {
        name.to_string()
    } else {
        format!("{name}.")
    }
}

fn split_list(list: &str) -> impl Iterator<Item = &str> {
    list.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn normalize_bind(bind: &str) -> String {
    let bind = bind.trim();
    if bind.starts_with(':') {
        format!("0.0.0.0{bind}")
    } else {
        bind.to_string()
    }
}
