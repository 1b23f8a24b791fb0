//! DNSSEC key loading.
//!
//! A key is a pair of files: a zone-file fragment holding one DNSKEY record
//! and a BIND private-key file. Two roles exist:
//! - **KSK**: key-signing key, the trust anchor published to the parent.
//! - **ZSK**: zone-signing key, signs ordinary records.
//!
//! A KSK is useless without a ZSK, so loading a KSK alone is rejected. A ZSK
//! alone is fine (unsigned-KSK deployments), and no keys at all means the
//! server runs unsigned.

pub mod private;
pub mod record;

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::NormalizedConfig;
use crate::ServerError;

pub use private::PrivateKey;
pub use record::{Algorithm, DnsKeyRecord, KeyFormatError};

/// Role a key plays in the zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRole {
    /// Key-signing key.
    KeySigning,
    /// Zone-signing key.
    ZoneSigning,
}

impl fmt::Display for KeyRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeySigning => f.write_str("KSK"),
            Self::ZoneSigning => f.write_str("ZSK"),
        }
    }
}

/// A public DNSKEY record and its private key.
#[derive(Debug, Clone)]
pub struct KeyPair {
    /// The public record, as published in the zone.
    pub record: DnsKeyRecord,
    /// The private key used for signing.
    pub private: Arc<PrivateKey>,
}

/// The KSK and ZSK a server signs with.
#[derive(Debug, Clone, Default)]
pub struct SigningKeys {
    /// Key-signing key. Never present without `zsk`.
    pub ksk: Option<KeyPair>,
    /// Zone-signing key.
    pub zsk: Option<KeyPair>,
}

impl SigningKeys {
    /// Pair up loaded keys, rejecting a KSK without a ZSK.
    pub fn new(ksk: Option<KeyPair>, zsk: Option<KeyPair>) -> crate::Result<Self> {
        if ksk.is_some() && zsk.is_none() {
            return Err(ServerError::KskWithoutZsk);
        }
        Ok(Self { ksk, zsk })
    }

    /// Whether any signing key is loaded.
    pub const fn is_signing(&self) -> bool {
        self.zsk.is_some()
    }

    /// Public records of the loaded keys, KSK first.
    pub fn records(&self) -> impl Iterator<Item = &DnsKeyRecord> {
        self.ksk.iter().chain(self.zsk.iter()).map(|pair| &pair.record)
    }
}

/// Load the KSK and ZSK named in the configuration.
///
/// No sockets are touched here; callers run this before binding listeners
/// so a bad key setup never occupies the port.
pub fn load_signing_keys(config: &NormalizedConfig) -> crate::Result<SigningKeys> {
    let raw = config.raw();
    let ksk = load_key_pair(
        config,
        &raw.public_key,
        &raw.private_key,
        KeyRole::KeySigning,
    )?;
    let zsk = load_key_pair(
        config,
        &raw.zone_public_key,
        &raw.zone_private_key,
        KeyRole::ZoneSigning,
    )?;
    SigningKeys::new(ksk, zsk)
}

/// Load one key pair. An empty public key path disables the role.
pub fn load_key_pair(
    config: &NormalizedConfig,
    public_path: &str,
    private_path: &str,
    role: KeyRole,
) -> crate::Result<Option<KeyPair>> {
    if public_path.is_empty() {
        return Ok(None);
    }

    let public_path = config.resolve_path(public_path);
    if private_path.is_empty() {
        return Err(ServerError::key_load(
            &public_path,
            format!("no private key file configured for the {role}"),
        ));
    }
    let private_path = config.resolve_path(private_path);

    let record: DnsKeyRecord = read_key_file(&public_path)?
        .parse()
        .map_err(|e| ServerError::key_load(&public_path, e))?;

    let private = PrivateKey::parse(&read_key_file(&private_path)?, &record)
        .map_err(|e| ServerError::key_load(&private_path, e))?;

    if !record.is_zone_key() {
        warn!(role = %role, path = %public_path.display(), "DNSKEY does not have the zone key flag set");
    }
    if role == KeyRole::KeySigning && !record.is_secure_entry_point() {
        warn!(path = %public_path.display(), "KSK does not have the SEP flag set");
    }

    info!(
        role = %role,
        owner = %record.owner(),
        algorithm = %record.algorithm(),
        key_tag = record.key_tag(),
        "loaded DNSSEC key"
    );

    Ok(Some(KeyPair {
        record,
        private: Arc::new(private),
    }))
}

fn read_key_file(path: &Path) -> crate::Result<String> {
    std::fs::read_to_string(path).map_err(|e| ServerError::key_load(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::path::PathBuf;

    fn fixtures() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
    }

    fn config(ksk: Option<(&str, &str)>, zsk: Option<(&str, &str)>) -> NormalizedConfig {
        let (public_key, private_key) = ksk.unwrap_or_default();
        let (zone_public_key, zone_private_key) = zsk.unwrap_or_default();
        Config {
            public_key: public_key.into(),
            private_key: private_key.into(),
            zone_public_key: zone_public_key.into(),
            zone_private_key: zone_private_key.into(),
            config_dir: fixtures(),
            ..Config::default()
        }
        .normalize()
        .unwrap()
    }

    #[test]
    fn test_no_keys_configured() {
        let keys = load_signing_keys(&config(None, None)).unwrap();
        assert!(keys.ksk.is_none());
        assert!(keys.zsk.is_none());
        assert!(!keys.is_signing());
    }

    #[test]
    fn test_load_ksk_and_zsk() {
        let keys = load_signing_keys(&config(
            Some(("ksk.key", "ksk.private")),
            Some(("zsk.key", "zsk.private")),
        ))
        .unwrap();

        let ksk = keys.ksk.as_ref().unwrap();
        assert_eq!(ksk.record.algorithm(), Algorithm::EcdsaP256Sha256);
        assert_eq!(ksk.record.key_tag(), 24615);
        assert!(ksk.record.is_secure_entry_point());

        let zsk = keys.zsk.as_ref().unwrap();
        assert_eq!(zsk.record.algorithm(), Algorithm::Ed25519);
        assert_eq!(zsk.record.key_tag(), 5988);
        assert_eq!(keys.records().count(), 2);
    }

    #[test]
    fn test_zsk_alone_is_allowed() {
        let keys = load_signing_keys(&config(None, Some(("rsa-zsk.key", "rsa-zsk.private")))).unwrap();
        assert!(keys.ksk.is_none());
        let zsk = keys.zsk.unwrap();
        assert_eq!(zsk.record.algorithm(), Algorithm::RsaSha256);
        assert_eq!(zsk.record.key_tag(), 4215);
        assert_eq!(zsk.private.sign(b"data").unwrap().len(), 256);
    }

    #[test]
    fn test_ksk_without_zsk_is_rejected() {
        let err = load_signing_keys(&config(Some(("ksk.key", "ksk.private")), None)).unwrap_err();
        assert!(matches!(err, ServerError::KskWithoutZsk));
        assert!(err.is_config_error());
    }

    #[test]
    fn test_missing_key_file() {
        let err = load_signing_keys(&config(None, Some(("absent.key", "absent.private")))).unwrap_err();
        assert!(err.is_key_error());
        assert!(err.to_string().contains("absent.key"));
    }

    #[test]
    fn test_missing_private_path() {
        let err = load_signing_keys(&config(None, Some(("zsk.key", "")))).unwrap_err();
        assert!(err.is_key_error());
    }

    #[test]
    fn test_private_key_for_wrong_public_key() {
        let err = load_signing_keys(&config(None, Some(("zsk.key", "ksk.private")))).unwrap_err();
        assert!(err.is_key_error());
        assert!(err.to_string().contains("ksk.private"));
    }

    #[test]
    fn test_wrong_record_type() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.key"), "bit. IN A 192.0.2.1\n").unwrap();
        std::fs::copy(fixtures().join("zsk.private"), dir.path().join("a.private")).unwrap();

        let config = Config {
            zone_public_key: "a.key".into(),
            zone_private_key: "a.private".into(),
            config_dir: dir.path().to_path_buf(),
            ..Config::default()
        }
        .normalize()
        .unwrap();

        let err = load_signing_keys(&config).unwrap_err();
        assert!(err.is_key_error());
        assert!(err.to_string().contains("wasn't a DNSKEY"));
    }
}
