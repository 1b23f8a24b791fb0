//! DNSKEY public records in zone-file presentation syntax.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hickory_proto::rr::{DNSClass, Name, RecordType};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// DNSKEY flag marking a zone key (bit 7).
pub const ZONE_KEY_FLAG: u16 = 0x0100;

/// DNSKEY flag marking a secure entry point, i.e. a key-signing key (bit 15).
pub const SEP_FLAG: u16 = 0x0001;

/// A key file did not contain a usable key.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct KeyFormatError(pub(crate) String);

impl KeyFormatError {
    pub(crate) fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// DNSSEC algorithm numbers (RFC 8624 registry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// 1
    RsaMd5,
    /// 5
    RsaSha1,
    /// 7
    RsaSha1Nsec3Sha1,
    /// 8
    RsaSha256,
    /// 10
    RsaSha512,
    /// 13
    EcdsaP256Sha256,
    /// 14
    EcdsaP384Sha384,
    /// 15
    Ed25519,
    /// Anything else.
    Unknown(u8),
}

impl Algorithm {
    /// Registry number of the algorithm.
    pub const fn number(self) -> u8 {
        match self {
            Self::RsaMd5 => 1,
            Self::RsaSha1 => 5,
            Self::RsaSha1Nsec3Sha1 => 7,
            Self::RsaSha256 => 8,
            Self::RsaSha512 => 10,
            Self::EcdsaP256Sha256 => 13,
            Self::EcdsaP384Sha384 => 14,
            Self::Ed25519 => 15,
            Self::Unknown(n) => n,
        }
    }

    /// Mnemonic as printed in BIND private-key files.
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Self::RsaMd5 => "RSAMD5",
            Self::RsaSha1 => "RSASHA1",
            Self::RsaSha1Nsec3Sha1 => "NSEC3RSASHA1",
            Self::RsaSha256 => "RSASHA256",
            Self::RsaSha512 => "RSASHA512",
            Self::EcdsaP256Sha256 => "ECDSAP256SHA256",
            Self::EcdsaP384Sha384 => "ECDSAP384SHA384",
            Self::Ed25519 => "ED25519",
            Self::Unknown(_) => "UNKNOWN",
        }
    }

    /// Whether the algorithm belongs to the RSA family.
    pub const fn is_rsa(self) -> bool {
        matches!(
            self,
            Self::RsaMd5 | Self::RsaSha1 | Self::RsaSha1Nsec3Sha1 | Self::RsaSha256 | Self::RsaSha512
        )
    }
}

impl From<u8> for Algorithm {
    fn from(n: u8) -> Self {
        match n {
            1 => Self::RsaMd5,
            5 => Self::RsaSha1,
            7 => Self::RsaSha1Nsec3Sha1,
            8 => Self::RsaSha256,
            10 => Self::RsaSha512,
            13 => Self::EcdsaP256Sha256,
            14 => Self::EcdsaP384Sha384,
            15 => Self::Ed25519,
            n => Self::Unknown(n),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.number(), self.mnemonic())
    }
}

/// A DNSKEY resource record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsKeyRecord {
    owner: Name,
    class: DNSClass,
    ttl: Option<u32>,
    flags: u16,
    protocol: u8,
    algorithm: Algorithm,
    public_key: Vec<u8>,
}

impl DnsKeyRecord {
    /// Build a record from its fields.
    pub const fn new(
        owner: Name,
        ttl: Option<u32>,
        flags: u16,
        algorithm: Algorithm,
        public_key: Vec<u8>,
    ) -> Self {
        Self {
            owner,
            class: DNSClass::IN,
            ttl,
            flags,
            protocol: 3,
            algorithm,
            public_key,
        }
    }

    /// Owner name of the key.
    pub const fn owner(&self) -> &Name {
        &self.owner
    }

    /// Record class (normally `IN`).
    pub const fn class(&self) -> DNSClass {
        self.class
    }

    /// TTL, when the file specified one.
    pub const fn ttl(&self) -> Option<u32> {
        self.ttl
    }

    /// Raw flags field.
    pub const fn flags(&self) -> u16 {
        self.flags
    }

    /// Protocol field; always 3 for valid DNSKEYs.
    pub const fn protocol(&self) -> u8 {
        self.protocol
    }

    /// Signing algorithm.
    pub const fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Public key material as carried in the record.
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// Whether the zone-key flag is set.
    pub const fn is_zone_key(&self) -> bool {
        self.flags & ZONE_KEY_FLAG != 0
    }

    /// Whether the secure-entry-point flag is set.
    pub const fn is_secure_entry_point(&self) -> bool {
        self.flags & SEP_FLAG != 0
    }

    /// DNSKEY RDATA in wire format.
    pub fn rdata(&self) -> Vec<u8> {
        let mut rdata = Vec::with_capacity(4 + self.public_key.len());
        rdata.extend_from_slice(&self.flags.to_be_bytes());
        rdata.push(self.protocol);
        rdata.push(self.algorithm.number());
        rdata.extend_from_slice(&self.public_key);
        rdata
    }

    /// Key tag (RFC 4034, Appendix B).
    pub fn key_tag(&self) -> u16 {
        if self.algorithm == Algorithm::RsaMd5 {
            let key = &self.public_key;
            if key.len() < 3 {
                return 0;
            }
            return u16::from_be_bytes([key[key.len() - 3], key[key.len() - 2]]);
        }

        let mut acc: u32 = 0;
        for (i, byte) in self.rdata().iter().enumerate() {
            if i % 2 == 0 {
                acc += u32::from(*byte) << 8;
            } else {
                acc += u32::from(*byte);
            }
        }
        acc += (acc >> 16) & 0xFFFF;
        (acc & 0xFFFF) as u16
    }
}

impl fmt::Display for DnsKeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.owner)?;
        if let Some(ttl) = self.ttl {
            write!(f, " {ttl}")?;
        }
        write!(
            f,
            " {} DNSKEY {} {} {} {}",
            self.class,
            self.flags,
            self.protocol,
            self.algorithm.number(),
            STANDARD.encode(&self.public_key)
        )
    }
}

impl FromStr for DnsKeyRecord {
    type Err = KeyFormatError;

    /// Parse a zone-file fragment holding exactly one DNSKEY record.
    ///
    /// Understands `;` comments, `( ... )` continuation, `$ORIGIN` and
    /// `$TTL` directives, and TTL/class in either order.
    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let mut origin = Name::root();
        let mut default_ttl = None;
        let mut records = Vec::new();

        for line in logical_lines(text)? {
            match line.first().map(String::as_str) {
                Some("$ORIGIN") => {
                    let name = line
                        .get(1)
                        .ok_or_else(|| KeyFormatError::new("$ORIGIN without a name"))?;
                    origin = parse_name(name, &Name::root())?;
                }
                Some("$TTL") => {
                    let ttl = line
                        .get(1)
                        .and_then(|t| t.parse::<u32>().ok())
                        .ok_or_else(|| KeyFormatError::new("$TTL without a valid value"))?;
                    default_ttl = Some(ttl);
                }
                Some(directive) if directive.starts_with('$') => {
                    return Err(KeyFormatError::new(format!(
                        "unsupported directive {directive}"
                    )));
                }
                Some(_) => records.push(parse_record(&line, &origin, default_ttl)?),
                None => {}
            }
        }

        match records.len() {
            0 => Err(KeyFormatError::new("no resource record found")),
            1 => Ok(records.remove(0)),
            n => Err(KeyFormatError::new(format!(
                "expected a single resource record, found {n}"
            ))),
        }
    }
}

/// Split text into logical lines of tokens, joining parenthesised groups.
fn logical_lines(text: &str) -> Result<Vec<Vec<String>>, KeyFormatError> {
    let mut lines = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut depth = 0usize;

    for raw in text.lines() {
        let content = raw.split(';').next().unwrap_or_default();
        let mut token = String::new();

        for c in content.chars() {
            match c {
                '(' => {
                    depth += 1;
                    flush(&mut token, &mut current);
                }
                ')' => {
                    depth = depth
                        .checked_sub(1)
                        .ok_or_else(|| KeyFormatError::new("unbalanced ')'"))?;
                    flush(&mut token, &mut current);
                }
                c if c.is_whitespace() => flush(&mut token, &mut current),
                c => token.push(c),
            }
        }
        flush(&mut token, &mut current);

        if depth == 0 && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
    }

    if depth != 0 {
        return Err(KeyFormatError::new("unbalanced '('"));
    }
    Ok(lines)
}

fn flush(token: &mut String, tokens: &mut Vec<String>) {
    if !token.is_empty() {
        tokens.push(std::mem::take(token));
    }
}

fn parse_name(name: &str, origin: &Name) -> Result<Name, KeyFormatError> {
    if name == "@" {
        return Ok(origin.clone());
    }
    Name::parse(name, Some(origin))
        .map_err(|e| KeyFormatError::new(format!("invalid owner name {name:?}: {e}")))
}

fn parse_class(token: &str) -> Option<DNSClass> {
    match token.to_ascii_uppercase().as_str() {
        "IN" => Some(DNSClass::IN),
        "CH" => Some(DNSClass::CH),
        "HS" => Some(DNSClass::HS),
        _ => None,
    }
}

fn parse_record(
    tokens: &[String],
    origin: &Name,
    default_ttl: Option<u32>,
) -> Result<DnsKeyRecord, KeyFormatError> {
    let mut iter = tokens.iter();
    let owner = parse_name(
        iter.next()
            .ok_or_else(|| KeyFormatError::new("empty record"))?,
        origin,
    )?;

    let mut ttl = None;
    let mut class = None;
    let rtype = loop {
        let token = iter
            .next()
            .ok_or_else(|| KeyFormatError::new("record has no type"))?;
        if ttl.is_none() && token.bytes().all(|b| b.is_ascii_digit()) {
            ttl = Some(
                token
                    .parse::<u32>()
                    .map_err(|e| KeyFormatError::new(format!("invalid TTL {token:?}: {e}")))?,
            );
        } else if let Some(c) = class.is_none().then(|| parse_class(token)).flatten() {
            class = Some(c);
        } else {
            break RecordType::from_str(&token.to_ascii_uppercase())
                .map_err(|_| KeyFormatError::new(format!("unknown record type {token:?}")))?;
        }
    };

    if rtype != RecordType::DNSKEY {
        return Err(KeyFormatError::new(format!(
            "loaded record from key file, but it wasn't a DNSKEY (found {rtype})"
        )));
    }

    let flags = next_number::<u16>(&mut iter, "flags")?;
    let protocol = next_number::<u8>(&mut iter, "protocol")?;
    let algorithm = Algorithm::from(next_number::<u8>(&mut iter, "algorithm")?);

    let encoded: String = iter.map(String::as_str).collect();
    if encoded.is_empty() {
        return Err(KeyFormatError::new("DNSKEY has no key material"));
    }
    let public_key = STANDARD
        .decode(encoded.as_bytes())
        .map_err(|e| KeyFormatError::new(format!("invalid key material: {e}")))?;

    Ok(DnsKeyRecord {
        owner,
        class: class.unwrap_or(DNSClass::IN),
        ttl: ttl.or(default_ttl),
        flags,
        protocol,
        algorithm,
        public_key,
    })
}

fn next_number<'a, T: FromStr>(
    iter: &mut impl Iterator<Item = &'a String>,
    field: &str,
) -> Result<T, KeyFormatError> {
    let token = iter
        .next()
        .ok_or_else(|| KeyFormatError::new(format!("DNSKEY is missing its {field} field")))?;
    token
        .parse::<T>()
        .map_err(|_| KeyFormatError::new(format!("invalid DNSKEY {field} {token:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_B64: &str = "AwEAAcFcGsaxxdgiuuGmCkVImy4h99CqT7jwY3pexPGcnUFtR2Fh36BponcwtkZ4cAgtvd4Qs8PkxUdp6p/DlUmObdk=";

    /// Reference implementation of the RFC 4034 checksum over raw RDATA.
    fn reference_key_tag(rdata: &[u8]) -> u16 {
        let mut ac: u64 = 0;
        for pair in rdata.chunks(2) {
            ac += u64::from(pair[0]) << 8;
            if let Some(low) = pair.get(1) {
                ac += u64::from(*low);
            }
        }
        ac += (ac >> 16) & 0xFFFF;
        (ac & 0xFFFF) as u16
    }

    #[test]
    fn test_parse_bind_key_file() {
        let text = format!(
            "; This is a zone-signing key, keyid 1234, for example.bit.\n\
             ; Created: 20240101000000 (Mon Jan  1 00:00:00 2024)\n\
             example.bit. IN DNSKEY 256 3 8 {KEY_B64}\n"
        );
        let record: DnsKeyRecord = text.parse().unwrap();
        assert_eq!(record.owner().to_string(), "example.bit.");
        assert_eq!(record.class(), DNSClass::IN);
        assert_eq!(record.ttl(), None);
        assert_eq!(record.flags(), 256);
        assert_eq!(record.protocol(), 3);
        assert_eq!(record.algorithm(), Algorithm::RsaSha256);
        assert!(record.is_zone_key());
        assert!(!record.is_secure_entry_point());
        assert_eq!(record.key_tag(), reference_key_tag(&record.rdata()));
    }

    #[test]
    fn test_parse_ttl_and_class_any_order() {
        let a: DnsKeyRecord = format!("bit. 3600 IN DNSKEY 257 3 8 {KEY_B64}").parse().unwrap();
        let b: DnsKeyRecord = format!("bit. IN 3600 DNSKEY 257 3 8 {KEY_B64}").parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.ttl(), Some(3600));
        assert!(a.is_secure_entry_point());
    }

    #[test]
    fn test_parse_parenthesised_record() {
        let (head, tail) = KEY_B64.split_at(40);
        let text = format!(
            "$ORIGIN bit.\n@ 86400 IN DNSKEY 257 3 8 (\n    {head} ; first half\n    {tail} )\n"
        );
        let record: DnsKeyRecord = text.parse().unwrap();
        assert_eq!(record.owner().to_string(), "bit.");
        assert_eq!(STANDARD.encode(record.public_key()), KEY_B64);
    }

    #[test]
    fn test_relative_owner_uses_origin() {
        let record: DnsKeyRecord = format!("$TTL 300\n$ORIGIN bit.\nexample IN DNSKEY 256 3 8 {KEY_B64}")
            .parse()
            .unwrap();
        assert_eq!(record.owner().to_string(), "example.bit.");
        assert_eq!(record.ttl(), Some(300));
    }

    #[test]
    fn test_rejects_non_dnskey() {
        let err = "bit. IN A 192.0.2.1".parse::<DnsKeyRecord>().unwrap_err();
        assert!(err.to_string().contains("wasn't a DNSKEY"));
    }

    #[test]
    fn test_rejects_malformed() {
        assert!("".parse::<DnsKeyRecord>().is_err());
        assert!("bit. IN DNSKEY 256 3".parse::<DnsKeyRecord>().is_err());
        assert!("bit. IN DNSKEY 256 3 8 !!!notbase64".parse::<DnsKeyRecord>().is_err());
        assert!(format!("bit. IN DNSKEY ( 256 3 8 {KEY_B64}")
            .parse::<DnsKeyRecord>()
            .is_err());
    }

    #[test]
    fn test_rejects_two_records() {
        let text = format!("a.bit. IN DNSKEY 256 3 8 {KEY_B64}\nb.bit. IN DNSKEY 256 3 8 {KEY_B64}\n");
        let err = text.parse::<DnsKeyRecord>().unwrap_err();
        assert!(err.to_string().contains("single resource record"));
    }

    #[test]
    fn test_display_round_trip() {
        let record: DnsKeyRecord = format!("bit. 3600 IN DNSKEY 257 3 8 {KEY_B64}").parse().unwrap();
        let reparsed: DnsKeyRecord = record.to_string().parse().unwrap();
        assert_eq!(record, reparsed);
        assert_eq!(record.key_tag(), reparsed.key_tag());
    }

    #[test]
    fn test_rdata_layout() {
        let record = DnsKeyRecord::new(
            Name::root(),
            None,
            257,
            Algorithm::Ed25519,
            vec![0xAA; 32],
        );
        let rdata = record.rdata();
        assert_eq!(&rdata[..4], &[0x01, 0x01, 3, 15]);
        assert_eq!(rdata.len(), 36);
    }

    #[test]
    fn test_algorithm_numbers() {
        for n in [1u8, 5, 7, 8, 10, 13, 14, 15, 99] {
            assert_eq!(Algorithm::from(n).number(), n);
        }
        assert!(Algorithm::RsaSha512.is_rsa());
        assert!(!Algorithm::Ed25519.is_rsa());
        assert_eq!(Algorithm::EcdsaP256Sha256.to_string(), "13 (ECDSAP256SHA256)");
    }
}
