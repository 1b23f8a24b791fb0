//! Private halves of DNSSEC keys, read from BIND `Private-key-format` files.
//!
//! The file is a list of `Field: value` lines. Which fields are present
//! depends on the algorithm of the matching public record: RSA keys carry
//! their CRT components, ECDSA and Ed25519 keys a single `PrivateKey` field.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use ring::rand::SystemRandom;
use ring::signature::{self, EcdsaKeyPair, Ed25519KeyPair, RsaKeyPair};
use std::collections::HashMap;
use std::fmt;

use super::record::{Algorithm, DnsKeyRecord, KeyFormatError};

/// A private key that can produce DNSSEC signatures.
pub struct PrivateKey {
    algorithm: Algorithm,
    signer: Signer,
    rng: SystemRandom,
}

enum Signer {
    Rsa(RsaKeyPair, &'static dyn signature::RsaEncoding),
    Ecdsa(EcdsaKeyPair),
    Ed25519(Ed25519KeyPair),
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl PrivateKey {
    /// Parse a private-key file as the counterpart of `public`.
    ///
    /// Fails if the file's algorithm differs from the public record's, if a
    /// field is missing or malformed, or if the key does not match `public`.
    pub fn parse(text: &str, public: &DnsKeyRecord) -> Result<Self, KeyFormatError> {
        let fields = parse_fields(text)?;

        let format = field(&fields, "Private-key-format")?;
        if !format.starts_with("v1.") {
            return Err(KeyFormatError::new(format!(
                "unsupported private key format {format:?}"
            )));
        }

        let algorithm = field(&fields, "Algorithm")?
            .split_whitespace()
            .next()
            .and_then(|n| n.parse::<u8>().ok())
            .map(Algorithm::from)
            .ok_or_else(|| KeyFormatError::new("invalid Algorithm field"))?;
        if algorithm != public.algorithm() {
            return Err(KeyFormatError::new(format!(
                "private key algorithm {algorithm} does not match public key algorithm {}",
                public.algorithm()
            )));
        }

        let signer = match algorithm {
            Algorithm::RsaSha256 => rsa_signer(&fields, public, &signature::RSA_PKCS1_SHA256)?,
            Algorithm::RsaSha512 => rsa_signer(&fields, public, &signature::RSA_PKCS1_SHA512)?,
            Algorithm::EcdsaP256Sha256 => {
                ecdsa_signer(&fields, public, &signature::ECDSA_P256_SHA256_FIXED_SIGNING)?
            }
            Algorithm::EcdsaP384Sha384 => {
                ecdsa_signer(&fields, public, &signature::ECDSA_P384_SHA384_FIXED_SIGNING)?
            }
            Algorithm::Ed25519 => {
                let seed = base64_field(&fields, "PrivateKey")?;
                let pair = Ed25519KeyPair::from_seed_and_public_key(&seed, public.public_key())
                    .map_err(|e| KeyFormatError::new(format!("rejected Ed25519 key: {e}")))?;
                Signer::Ed25519(pair)
            }
            other => {
                return Err(KeyFormatError::new(format!(
                    "unsupported signing algorithm {other}"
                )))
            }
        };

        Ok(Self {
            algorithm,
            signer,
            rng: SystemRandom::new(),
        })
    }

    /// Algorithm this key signs with.
    pub const fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Sign `data`, producing the signature field of an RRSIG.
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>, ring::error::Unspecified> {
        match &self.signer {
            Signer::Rsa(pair, encoding) => {
                let mut sig = vec![0; pair.public().modulus_len()];
                pair.sign(*encoding, &self.rng, data, &mut sig)?;
                Ok(sig)
            }
            Signer::Ecdsa(pair) => Ok(pair.sign(&self.rng, data)?.as_ref().to_vec()),
            Signer::Ed25519(pair) => Ok(pair.sign(data).as_ref().to_vec()),
        }
    }
}

fn parse_fields(text: &str) -> Result<HashMap<String, String>, KeyFormatError> {
    let mut fields = HashMap::new();
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| KeyFormatError::new(format!("malformed line {line:?}")))?;
        fields.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
    }
    Ok(fields)
}

fn field<'a>(fields: &'a HashMap<String, String>, name: &str) -> Result<&'a str, KeyFormatError> {
    fields
        .get(&name.to_ascii_lowercase())
        .map(String::as_str)
        .ok_or_else(|| KeyFormatError::new(format!("missing {name} field")))
}

fn base64_field(fields: &HashMap<String, String>, name: &str) -> Result<Vec<u8>, KeyFormatError> {
    STANDARD
        .decode(field(fields, name)?)
        .map_err(|e| KeyFormatError::new(format!("invalid base64 in {name}: {e}")))
}

/// Split DNSKEY RSA material (RFC 3110) into exponent and modulus.
fn split_rsa_public_key(key: &[u8]) -> Result<(&[u8], &[u8]), KeyFormatError> {
    let (exp_len, rest) = match key {
        [0, hi, lo, rest @ ..] => (usize::from(u16::from_be_bytes([*hi, *lo])), rest),
        [len, rest @ ..] => (usize::from(*len), rest),
        [] => return Err(KeyFormatError::new("empty RSA public key")),
    };
    if exp_len == 0 || rest.len() <= exp_len {
        return Err(KeyFormatError::new("truncated RSA public key"));
    }
    Ok(rest.split_at(exp_len))
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

fn rsa_signer(
    fields: &HashMap<String, String>,
    public: &DnsKeyRecord,
    encoding: &'static dyn signature::RsaEncoding,
) -> Result<Signer, KeyFormatError> {
    let modulus = base64_field(fields, "Modulus")?;
    let exponent = base64_field(fields, "PublicExponent")?;

    let (pub_exponent, pub_modulus) = split_rsa_public_key(public.public_key())?;
    if strip_leading_zeros(&modulus) != strip_leading_zeros(pub_modulus)
        || strip_leading_zeros(&exponent) != strip_leading_zeros(pub_exponent)
    {
        return Err(KeyFormatError::new(
            "private key does not match the public key record",
        ));
    }

    let d = base64_field(fields, "PrivateExponent")?;
    let p = base64_field(fields, "Prime1")?;
    let q = base64_field(fields, "Prime2")?;
    let dp = base64_field(fields, "Exponent1")?;
    let dq = base64_field(fields, "Exponent2")?;
    let qinv = base64_field(fields, "Coefficient")?;

    let components = ring::rsa::KeyPairComponents {
        public_key: ring::rsa::PublicKeyComponents {
            n: strip_leading_zeros(&modulus),
            e: strip_leading_zeros(&exponent),
        },
        d: d.as_slice(),
        p: p.as_slice(),
        q: q.as_slice(),
        dP: dp.as_slice(),
        dQ: dq.as_slice(),
        qInv: qinv.as_slice(),
    };

    let pair = RsaKeyPair::from_components(&components)
        .map_err(|e| KeyFormatError::new(format!("rejected RSA key: {e}")))?;
    Ok(Signer::Rsa(pair, encoding))
}

fn ecdsa_signer(
    fields: &HashMap<String, String>,
    public: &DnsKeyRecord,
    alg: &'static signature::EcdsaSigningAlgorithm,
) -> Result<Signer, KeyFormatError> {
    let scalar = base64_field(fields, "PrivateKey")?;

    // DNSKEY carries the bare X||Y coordinates; ring wants an uncompressed point.
    let mut point = Vec::with_capacity(1 + public.public_key().len());
    point.push(0x04);
    point.extend_from_slice(public.public_key());

    let pair = EcdsaKeyPair::from_private_key_and_public_key(alg, &scalar, &point, &SystemRandom::new())
        .map_err(|e| KeyFormatError::new(format!("rejected ECDSA key: {e}")))?;
    Ok(Signer::Ecdsa(pair))
}
