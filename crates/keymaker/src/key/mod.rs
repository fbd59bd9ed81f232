//! Private key generation and the PEM/PKCS#8 codec.
//!
//! Keys are modeled as a closed sum type, [`PrivateKey`], so every encoding
//! path is an exhaustive `match` rather than a runtime type inspection.
//!
//! ## Operations
//!
//! - [`generate`] - produce a fresh key for a registry identifier.
//! - [`encode_pkcs8_pem`] - wrap a key in PKCS#8 and PEM (`PRIVATE KEY`).
//! - [`decode_pem`] - parse the first PEM block of a (possibly concatenated)
//!   buffer, returning the key and the remaining bytes.

mod decode;
mod encode;
#[cfg(test)]
mod tests;

pub use decode::*;
pub use encode::*;

use crate::{Algorithm, AlgorithmSpec, Curve, Error, Result};
use core::fmt;
use rsa::{RsaPrivateKey, rand_core::OsRng, traits::PublicKeyParts};

/// A generated or decoded private key.
#[derive(Clone, PartialEq, Eq)]
pub enum PrivateKey {
    /// An RSA key of any modulus length.
    Rsa(Box<RsaPrivateKey>),
    /// An ECDSA key on one of the supported NIST curves.
    Ecdsa(EcdsaKey),
}

/// An ECDSA secret scalar tagged with its curve.
#[derive(Clone, PartialEq, Eq)]
pub enum EcdsaKey {
    P224(p224::SecretKey),
    P256(p256::SecretKey),
    P384(p384::SecretKey),
    P521(p521::SecretKey),
}

impl EcdsaKey {
    /// Generates a fresh secret scalar on `curve` from the OS CSPRNG.
    pub fn random(curve: Curve) -> Self {
        let mut rng = OsRng;
        match curve {
            Curve::P224 => Self::P224(p224::SecretKey::random(&mut rng)),
            Curve::P256 => Self::P256(p256::SecretKey::random(&mut rng)),
            Curve::P384 => Self::P384(p384::SecretKey::random(&mut rng)),
            Curve::P521 => Self::P521(p521::SecretKey::random(&mut rng)),
        }
    }

    pub const fn curve(&self) -> Curve {
        match self {
            Self::P224(_) => Curve::P224,
            Self::P256(_) => Curve::P256,
            Self::P384(_) => Curve::P384,
            Self::P521(_) => Curve::P521,
        }
    }
}

impl PrivateKey {
    /// The registry entry this key corresponds to, if any.
    ///
    /// Decoded RSA keys with a modulus length outside the registry return
    /// `None`.
    pub fn algorithm(&self) -> Option<Algorithm> {
        let spec = match self {
            Self::Rsa(key) => AlgorithmSpec::Rsa {
                bits: key.size() * 8,
            },
            Self::Ecdsa(key) => AlgorithmSpec::Ecdsa { curve: key.curve() },
        };
        Algorithm::ALL.into_iter().find(|a| a.spec() == spec)
    }
}

// Key material must never reach a log line, so `Debug` only shows the shape.
impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rsa(key) => f
                .debug_struct("PrivateKey::Rsa")
                .field("bits", &(key.size() * 8))
                .finish_non_exhaustive(),
            Self::Ecdsa(key) => key.fmt(f),
        }
    }
}

impl fmt::Debug for EcdsaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey::Ecdsa")
            .field("curve", &self.curve())
            .finish_non_exhaustive()
    }
}

/// Generates a private key for the named algorithm.
///
/// Dispatch is purely on the registry: RSA identifiers use their registered
/// modulus length, ECDSA identifiers their registered curve. Randomness comes
/// from the operating system CSPRNG.
///
/// This is CPU-bound (RSA-4096 can take seconds); async callers should run it
/// on a blocking thread.
///
/// # Errors
///
/// - [`Error::UnknownAlgorithm`] if `name` is not registered.
/// - [`Error::KeyGeneration`] if the RSA prime search fails.
pub fn generate(name: &str) -> Result<PrivateKey> {
    let algorithm: Algorithm = name.parse()?;
    generate_algorithm(algorithm)
}

/// Same as [`generate`] for an already-validated [`Algorithm`].
///
/// # Errors
///
/// Returns [`Error::KeyGeneration`] if the RSA prime search fails.
pub fn generate_algorithm(algorithm: Algorithm) -> Result<PrivateKey> {
    match algorithm.spec() {
        AlgorithmSpec::Rsa { bits } => RsaPrivateKey::new(&mut OsRng, bits)
            .map(|key| PrivateKey::Rsa(Box::new(key)))
            .map_err(|e| Error::KeyGeneration(format!("{algorithm}: {e}"))),
        AlgorithmSpec::Ecdsa { curve } => Ok(PrivateKey::Ecdsa(EcdsaKey::random(curve))),
    }
}
