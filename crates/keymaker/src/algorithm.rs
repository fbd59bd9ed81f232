//! The fixed registry of key algorithms a drone can issue.
//!
//! Every algorithm identifier maps to a single set of generation parameters:
//! RSA identifiers carry a modulus length, ECDSA identifiers carry a named
//! curve. The registry is a static table; nothing mutates it at runtime.
//! Supporting another algorithm means adding a variant here and a generation
//! arm in [`crate::generate`], never changing call sites.

use crate::{Error, Result};
use core::{fmt, str::FromStr};

/// A registered key algorithm identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    Rsa1024,
    Rsa2048,
    Rsa4096,
    Ecdsa224,
    Ecdsa256,
    Ecdsa384,
    Ecdsa521,
}

/// A NIST named curve used for ECDSA keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Curve {
    P224,
    P256,
    P384,
    P521,
}

/// Generation parameters for an [`Algorithm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgorithmSpec {
    /// RSA with the given modulus length in bits.
    Rsa { bits: usize },
    /// ECDSA over the given named curve.
    Ecdsa { curve: Curve },
}

static REGISTRY: [(Algorithm, &str, AlgorithmSpec); 7] = [
    (Algorithm::Rsa1024, "RSA1024", AlgorithmSpec::Rsa { bits: 1024 }),
    (Algorithm::Rsa2048, "RSA2048", AlgorithmSpec::Rsa { bits: 2048 }),
    (Algorithm::Rsa4096, "RSA4096", AlgorithmSpec::Rsa { bits: 4096 }),
    (Algorithm::Ecdsa224, "ECDSA224", AlgorithmSpec::Ecdsa { curve: Curve::P224 }),
    (Algorithm::Ecdsa256, "ECDSA256", AlgorithmSpec::Ecdsa { curve: Curve::P256 }),
    (Algorithm::Ecdsa384, "ECDSA384", AlgorithmSpec::Ecdsa { curve: Curve::P384 }),
    (Algorithm::Ecdsa521, "ECDSA521", AlgorithmSpec::Ecdsa { curve: Curve::P521 }),
];

impl Algorithm {
    /// Every registered algorithm, in registry order.
    pub const ALL: [Self; 7] = [
        Self::Rsa1024,
        Self::Rsa2048,
        Self::Rsa4096,
        Self::Ecdsa224,
        Self::Ecdsa256,
        Self::Ecdsa384,
        Self::Ecdsa521,
    ];

    fn entry(self) -> &'static (Algorithm, &'static str, AlgorithmSpec) {
        &REGISTRY[self as usize]
    }

    /// The wire identifier, e.g. `"RSA2048"`.
    pub fn name(self) -> &'static str {
        self.entry().1
    }

    /// The generation parameters registered for this algorithm.
    pub fn spec(self) -> AlgorithmSpec {
        self.entry().2
    }

    /// Looks up an identifier in the registry without generating anything.
    ///
    /// Returns `None` for any name that is not an exact registry match.
    pub fn lookup(name: &str) -> Option<Self> {
        REGISTRY
            .iter()
            .find(|(_, id, _)| *id == name)
            .map(|(algorithm, _, _)| *algorithm)
    }
}

impl Curve {
    /// The curve name as it appears in the NIST tables.
    pub const fn name(self) -> &'static str {
        match self {
            Self::P224 => "P-224",
            Self::P256 => "P-256",
            Self::P384 => "P-384",
            Self::P521 => "P-521",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for Curve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Algorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::lookup(s).ok_or_else(|| Error::UnknownAlgorithm(s.to_string()))
    }
}

/// Validates an algorithm name against the registry.
///
/// Used by clients to reject bad key types before any network activity.
///
/// # Errors
///
/// Returns [`Error::InvalidAlgorithm`] if `name` is not registered.
pub fn check_algorithm(name: &str) -> Result<Algorithm> {
    Algorithm::lookup(name).ok_or_else(|| Error::InvalidAlgorithm(name.to_string()))
}
