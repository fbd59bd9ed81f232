use super::{EC_PUBLIC_KEY_OID, EcdsaKey, PKCS8_PEM_LABEL, PrivateKey, RSA_ENCRYPTION_OID};
use crate::{Error, Result};
use der::{Decode, oid::AssociatedOid};
use pkcs8::{ObjectIdentifier, PrivateKeyInfo};
use rsa::{RsaPrivateKey, pkcs1::DecodeRsaPrivateKey};
use sec1::EcPrivateKey;

/// PEM label of a raw SEC1 EC private key.
pub const SEC1_PEM_LABEL: &str = "EC PRIVATE KEY";

/// PEM label of a raw PKCS#1 RSA private key.
pub const PKCS1_PEM_LABEL: &str = "RSA PRIVATE KEY";

const BEGIN: &[u8] = b"-----BEGIN ";
const END: &[u8] = b"-----END ";
const DASHES: &[u8] = b"-----";

/// Decodes the first PEM block in `input` into a private key.
///
/// The PEM label selects the parser:
///
/// - `PRIVATE KEY` - PKCS#8 (RSA or EC)
/// - `EC PRIVATE KEY` - SEC1
/// - `RSA PRIVATE KEY` - PKCS#1
///
/// Anything before the first block is ignored. Bytes after the end of the
/// first block are returned so concatenated PEM streams can be walked one
/// key at a time.
///
/// # Errors
///
/// - [`Error::PemDecode`] if no well-formed PEM block is found.
/// - [`Error::UnsupportedPemType`] for any other label.
/// - [`Error::KeyParse`] if the payload does not parse as its label claims.
pub fn decode_pem(input: &[u8]) -> Result<(PrivateKey, &[u8])> {
    let (block, rest) = split_first_block(input)?;
    let (label, der) =
        pem_rfc7468::decode_vec(block).map_err(|e| Error::PemDecode(e.to_string()))?;

    let key = match label {
        PKCS8_PEM_LABEL => parse_pkcs8(&der)?,
        SEC1_PEM_LABEL => parse_sec1(&der, None)?,
        PKCS1_PEM_LABEL => parse_pkcs1(&der)?,
        other => return Err(Error::UnsupportedPemType(other.to_string())),
    };
    Ok((key, rest))
}

/// Parses a DER PKCS#8 `PrivateKeyInfo`.
///
/// EC keys are accepted with NULL, absent, or named-curve algorithm
/// parameters; the curve is taken from the SEC1 structure when present.
///
/// # Errors
///
/// Returns [`Error::KeyParse`] on malformed input or an unsupported OID.
pub fn parse_pkcs8(der: &[u8]) -> Result<PrivateKey> {
    let info =
        PrivateKeyInfo::from_der(der).map_err(|e| Error::KeyParse(format!("PKCS#8: {e}")))?;
    match info.algorithm.oid {
        RSA_ENCRYPTION_OID => parse_pkcs1(info.private_key),
        EC_PUBLIC_KEY_OID => parse_sec1(
            info.private_key,
            info.algorithm.parameters_oid().ok(),
        ),
        oid => Err(Error::KeyParse(format!("unsupported PKCS#8 algorithm {oid}"))),
    }
}

fn parse_pkcs1(der: &[u8]) -> Result<PrivateKey> {
    RsaPrivateKey::from_pkcs1_der(der)
        .map(|key| PrivateKey::Rsa(Box::new(key)))
        .map_err(|e| Error::KeyParse(format!("PKCS#1: {e}")))
}

fn parse_sec1(der: &[u8], fallback_curve: Option<ObjectIdentifier>) -> Result<PrivateKey> {
    let parsed =
        EcPrivateKey::from_der(der).map_err(|e| Error::KeyParse(format!("SEC1: {e}")))?;
    let curve = parsed
        .parameters
        .and_then(|params| params.named_curve())
        .or(fallback_curve)
        .ok_or_else(|| Error::KeyParse("EC private key without a named curve".to_string()))?;

    let key = match curve {
        p224::NistP224::OID => p224::SecretKey::from_sec1_der(der).map(EcdsaKey::P224),
        p256::NistP256::OID => p256::SecretKey::from_sec1_der(der).map(EcdsaKey::P256),
        p384::NistP384::OID => p384::SecretKey::from_sec1_der(der).map(EcdsaKey::P384),
        p521::NistP521::OID => p521::SecretKey::from_sec1_der(der).map(EcdsaKey::P521),
        other => return Err(Error::KeyParse(format!("unsupported curve {other}"))),
    };
    key.map(PrivateKey::Ecdsa)
        .map_err(|e| Error::KeyParse(format!("SEC1: {e}")))
}

// Locates the first `-----BEGIN ...-----` through `-----END ...-----` span,
// including the line ending that closes it.
fn split_first_block(input: &[u8]) -> Result<(&[u8], &[u8])> {
    let start = find(input, BEGIN).ok_or_else(|| Error::PemDecode("no PEM block found".into()))?;
    let end = find(&input[start..], END)
        .map(|i| start + i + END.len())
        .ok_or_else(|| Error::PemDecode("missing PEM end boundary".into()))?;
    let mut stop = find(&input[end..], DASHES)
        .map(|i| end + i + DASHES.len())
        .ok_or_else(|| Error::PemDecode("unterminated PEM end boundary".into()))?;

    if input[stop..].starts_with(b"\r\n") {
        stop += 2;
    } else if input[stop..].starts_with(b"\n") {
        stop += 1;
    }
    Ok((&input[start..stop], &input[stop..]))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
