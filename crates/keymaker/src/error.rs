//! Errors produced by key generation and the PEM/PKCS#8 codec.

/// Result alias used throughout `keymaker`.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// All errors the key codec can produce.
///
/// Messages never include key material; at most they name an algorithm, a PEM
/// label or an OID.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Key generation was asked for an algorithm that is not registered.
    #[error("{0} key type not implemented")]
    UnknownAlgorithm(String),

    /// An algorithm name failed up-front validation.
    #[error("invalid key type: {0:?}")]
    InvalidAlgorithm(String),

    /// The underlying cryptographic library failed to produce a key.
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// A key could not be serialized to DER.
    #[error("encoding failed: {0}")]
    Encoding(String),

    /// The input did not contain a well-formed PEM block.
    #[error("failed to decode PEM: {0}")]
    PemDecode(String),

    /// The PEM block is well-formed but its label is not a private key type
    /// this codec understands.
    #[error("{0} is not a supported PEM private key type")]
    UnsupportedPemType(String),

    /// The PEM payload did not parse as the key structure its label claims.
    #[error("failed to parse private key: {0}")]
    KeyParse(String),
}
