//! Resolution engine seam.
//!
//! The server never answers queries itself: it assembles an [`EngineConfig`]
//! and hands it to an [`EngineFactory`], which returns a hickory authority
//! that gets registered as the handler for every name. [`ApexEngine`] is the
//! built-in factory; it serves the records the configuration alone defines
//! (SOA, NS, vanity addresses, DNSKEYs, the self name, a version TXT) from
//! an in-memory zone. Ledger-backed engines plug in through the same trait.

use hickory_proto::rr::rdata::{A, AAAA, NS, NULL, SOA, TXT};
use hickory_proto::rr::{Name, RData, Record, RecordType};
use hickory_server::authority::{AuthorityObject, ZoneType};
use hickory_server::store::in_memory::InMemoryAuthority;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

use crate::config::{fqdn, NormalizedConfig};
use crate::keys::{DnsKeyRecord, SigningKeys};
use crate::naming::NamingConnection;
use crate::ServerError;

/// TTL for apex NS and address records.
pub const APEX_TTL: u32 = 600;

/// TTL for DNSKEY records whose key file did not specify one.
pub const DNSKEY_TTL: u32 = 3600;

/// SOA minimum TTL (negative caching).
pub const SOA_MINIMUM_TTL: u32 = 300;

/// SOA refresh interval (Hickory uses i32 for SOA fields).
pub const SOA_REFRESH: i32 = 600;

/// SOA retry interval.
pub const SOA_RETRY: i32 = 600;

/// SOA expire interval.
pub const SOA_EXPIRE: i32 = 7200;

/// Everything a resolution engine is constructed from.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Naming-service connection for ledger lookups.
    pub naming: NamingConnection,
    /// Version string reported by the engine.
    pub version: String,
    /// DNSSEC keys; empty means unsigned operation.
    pub keys: SigningKeys,
    /// Upper bound on cached names.
    pub cache_max_entries: usize,
    /// Served suffix without dots (e.g. `bit`).
    pub canonical_suffix: String,
    /// Fully-qualified nameservers for the apex NS set.
    pub canonical_nameservers: Vec<String>,
    /// Addresses published at the apex.
    pub vanity_ips: Vec<IpAddr>,
    /// Name of this nameserver; empty selects a pseudo-hostname.
    pub self_name: String,
    /// Address of this nameserver.
    pub self_ip: Option<IpAddr>,
    /// Hostmaster e-mail address.
    pub hostmaster: String,
}

impl EngineConfig {
    /// Assemble the engine configuration from its parts.
    pub fn new(
        config: &NormalizedConfig,
        keys: SigningKeys,
        naming: NamingConnection,
        version: impl Into<String>,
    ) -> Self {
        let raw = config.raw();
        Self {
            naming,
            version: version.into(),
            keys,
            cache_max_entries: raw.cache_max_entries,
            canonical_suffix: config.canonical_suffix().to_string(),
            canonical_nameservers: config.canonical_nameservers().to_vec(),
            vanity_ips: config.vanity_ips().to_vec(),
            self_name: raw.self_name.clone(),
            self_ip: config.self_ip(),
            hostmaster: raw.hostmaster.clone(),
        }
    }

    /// Fully-qualified apex of the served suffix.
    pub fn apex(&self) -> String {
        fqdn(&self.canonical_suffix)
    }

    /// This nameserver's name, or the pseudo-hostname `ns.<suffix>.`.
    pub fn self_name(&self) -> String {
        if self.self_name.is_empty() {
            format!("ns.{}", self.apex())
        } else {
            fqdn(&self.self_name)
        }
    }

    /// Names for the apex NS set: the canonical list, else the self name.
    pub fn nameservers(&self) -> Vec<String> {
        if self.canonical_nameservers.is_empty() {
            vec![self.self_name()]
        } else {
            self.canonical_nameservers.clone()
        }
    }

    /// SOA responsible-person name derived from the hostmaster address.
    pub fn hostmaster_name(&self) -> String {
        match self.hostmaster.split_once('@') {
            Some((local, domain)) => format!("{}.{}", local.replace('.', "\\."), fqdn(domain)),
            None if self.hostmaster.is_empty() => format!("hostmaster.{}", self.apex()),
            None => fqdn(&self.hostmaster),
        }
    }
}

/// Builds the authority that answers every query.
pub trait EngineFactory: Send + Sync {
    /// Construct the engine. Errors abort server construction.
    fn build(&self, config: EngineConfig) -> crate::Result<Arc<dyn AuthorityObject>>;
}

/// Built-in engine serving the configured apex records.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApexEngine;

impl EngineFactory for ApexEngine {
    fn build(&self, config: EngineConfig) -> crate::Result<Arc<dyn AuthorityObject>> {
        let serial = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u32::try_from(d.as_secs()).unwrap_or(u32::MAX))
            .unwrap_or(1);
        let zone = build_apex_zone(&config, serial)?;

        info!(
            apex = %config.apex(),
            version = %config.version,
            signed = config.keys.is_signing(),
            naming_server = %config.naming.server,
            cache_max_entries = config.cache_max_entries,
            "apex engine ready"
        );

        Ok(Arc::new(zone) as Arc<dyn AuthorityObject>)
    }
}

/// Build the in-memory apex zone for `config`.
pub fn build_apex_zone(config: &EngineConfig, serial: u32) -> crate::Result<InMemoryAuthority> {
    let apex = parse_name(&config.apex())?;
    let mut zone = InMemoryAuthority::empty(apex.clone(), ZoneType::Primary, false);

    let nameservers = config
        .nameservers()
        .iter()
        .map(|ns| parse_name(ns))
        .collect::<crate::Result<Vec<_>>>()?;

    let soa = SOA::new(
        nameservers[0].clone(),
        parse_name(&config.hostmaster_name())?,
        serial,
        SOA_REFRESH,
        SOA_RETRY,
        SOA_EXPIRE,
        SOA_MINIMUM_TTL,
    );
    zone.upsert_mut(
        Record::from_rdata(apex.clone(), APEX_TTL, RData::SOA(soa)),
        serial,
    );

    for ns in nameservers {
        zone.upsert_mut(
            Record::from_rdata(apex.clone(), APEX_TTL, RData::NS(NS(ns))),
            serial,
        );
    }

    for ip in &config.vanity_ips {
        zone.upsert_mut(address_record(apex.clone(), *ip), serial);
    }

    for key in config.keys.records() {
        zone.upsert_mut(dnskey_record(apex.clone(), key), serial);
    }

    zone.upsert_mut(
        Record::from_rdata(
            parse_name(&format!("version.{}", config.apex()))?,
            APEX_TTL,
            RData::TXT(TXT::new(vec![config.version.clone()])),
        ),
        serial,
    );

    if let Some(ip) = config.self_ip {
        let self_name = parse_name(&config.self_name())?;
        if apex.zone_of(&self_name) && self_name != apex {
            zone.upsert_mut(address_record(self_name, ip), serial);
        }
    }

    Ok(zone)
}

fn address_record(name: Name, ip: IpAddr) -> Record {
    let rdata = match ip {
        IpAddr::V4(v4) => RData::A(A(v4)),
        IpAddr::V6(v6) => RData::AAAA(AAAA(v6)),
    };
    Record::from_rdata(name, APEX_TTL, rdata)
}

/// DNSKEYs are carried as opaque RDATA; signing happens in the engine, not in
/// the protocol stack.
fn dnskey_record(apex: Name, key: &DnsKeyRecord) -> Record {
    Record::from_rdata(
        apex,
        key.ttl().unwrap_or(DNSKEY_TTL),
        RData::Unknown {
            code: RecordType::DNSKEY,
            rdata: NULL::with(key.rdata()),
        },
    )
}

fn parse_name(name: &str) -> crate::Result<Name> {
    Name::parse(name, None).map_err(|e| ServerError::Engine(format!("invalid name '{name}': {e}")))
}
