use super::{EcdsaKey, PrivateKey};
use crate::{Error, Result};
use der::{Encode, asn1::AnyRef, oid::AssociatedOid};
use elliptic_curve::{
    AffinePoint, CurveArithmetic, FieldBytesSize, SecretKey,
    sec1::{FromEncodedPoint, ModulusSize, ToEncodedPoint},
};
use pem_rfc7468::LineEnding;
use pkcs8::{AlgorithmIdentifierRef, ObjectIdentifier, PrivateKeyInfo};
use rsa::pkcs1::EncodeRsaPrivateKey;
use sec1::{EcParameters, EcPrivateKey};

/// `rsaEncryption` (PKCS#1).
pub const RSA_ENCRYPTION_OID: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");

/// `id-ecPublicKey` (RFC 5480).
pub const EC_PUBLIC_KEY_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");

/// PEM label of a PKCS#8 private key.
pub const PKCS8_PEM_LABEL: &str = "PRIVATE KEY";

impl PrivateKey {
    /// Serializes the key as a DER PKCS#8 `PrivateKeyInfo`.
    ///
    /// The structure is `{ version 0, AlgorithmIdentifier, OCTET STRING }`
    /// where the algorithm parameters are always NULL and the octet string
    /// holds the algorithm-specific encoding: PKCS#1 `RSAPrivateKey` for RSA,
    /// SEC1 `ECPrivateKey` (carrying its named curve) for ECDSA.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encoding`] if DER serialization fails.
    pub fn to_pkcs8_der(&self) -> Result<Vec<u8>> {
        match self {
            Self::Rsa(key) => {
                let inner = key
                    .to_pkcs1_der()
                    .map_err(|e| Error::Encoding(format!("RSA private key: {e}")))?;
                wrap_pkcs8(RSA_ENCRYPTION_OID, inner.as_bytes())
            }
            Self::Ecdsa(key) => {
                let inner = match key {
                    EcdsaKey::P224(k) => sec1_der(k)?,
                    EcdsaKey::P256(k) => sec1_der(k)?,
                    EcdsaKey::P384(k) => sec1_der(k)?,
                    EcdsaKey::P521(k) => sec1_der(k)?,
                };
                wrap_pkcs8(EC_PUBLIC_KEY_OID, &inner)
            }
        }
    }
}

/// Encodes a key as PKCS#8 and wraps it in a `PRIVATE KEY` PEM block.
///
/// # Errors
///
/// Returns [`Error::Encoding`] if DER serialization or PEM framing fails.
pub fn encode_pkcs8_pem(key: &PrivateKey) -> Result<Vec<u8>> {
    let der = key.to_pkcs8_der()?;
    pem_rfc7468::encode_string(PKCS8_PEM_LABEL, LineEnding::LF, &der)
        .map(String::into_bytes)
        .map_err(|e| Error::Encoding(format!("PEM: {e}")))
}

fn wrap_pkcs8(oid: ObjectIdentifier, private_key: &[u8]) -> Result<Vec<u8>> {
    let algorithm = AlgorithmIdentifierRef {
        oid,
        parameters: Some(AnyRef::NULL),
    };
    PrivateKeyInfo::new(algorithm, private_key)
        .to_der()
        .map_err(|e| Error::Encoding(format!("PKCS#8: {e}")))
}

// The PKCS#8 wrapper carries NULL parameters, so the curve has to travel
// inside the SEC1 structure or the key cannot be decoded again.
fn sec1_der<C>(key: &SecretKey<C>) -> Result<Vec<u8>>
where
    C: CurveArithmetic + AssociatedOid,
    AffinePoint<C>: FromEncodedPoint<C> + ToEncodedPoint<C>,
    FieldBytesSize<C>: ModulusSize,
{
    let scalar = key.to_bytes();
    let point = key.public_key().to_encoded_point(false);
    EcPrivateKey {
        private_key: scalar.as_slice(),
        parameters: Some(EcParameters::NamedCurve(C::OID)),
        public_key: Some(point.as_bytes()),
    }
    .to_der()
    .map_err(|e| Error::Encoding(format!("EC private key: {e}")))
}
