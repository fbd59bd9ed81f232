//! TLS identity layer.
//!
//! Builds rustls server and client configurations from raw PEM material. The
//! protocol versions and cipher suites are fixed policy: TLS 1.2 or newer,
//! forward-secret AEAD suites only, and the server picks the suite from its
//! own preference order.
//!
//! Nothing here touches the filesystem; callers read the PEM files and hand
//! over the bytes as a [`TlsMaterial`].

use crate::{Error, Result};
use core::{fmt, str::FromStr};
use rustls::{
    ClientConfig, DigitallySignedStruct, DistinguishedName, RootCertStore, ServerConfig,
    SignatureScheme, SupportedProtocolVersion,
    client::danger::HandshakeSignatureValid,
    crypto::{
        CryptoProvider, WebPkiSupportedAlgorithms, ring, verify_tls12_signature,
        verify_tls13_signature,
    },
    pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime},
    server::{
        WebPkiClientVerifier,
        danger::{ClientCertVerified, ClientCertVerifier},
    },
};
use std::sync::Arc;

/// HTTP/2 is the only application protocol spoken over these connections.
pub const ALPN_H2: &[u8] = b"h2";

static PROTOCOL_VERSIONS: &[&SupportedProtocolVersion] =
    &[&rustls::version::TLS13, &rustls::version::TLS12];

/// PEM-encoded identity: certificate chain, its private key and the CA bundle
/// used to verify peers.
#[derive(Clone)]
pub struct TlsMaterial {
    pub certificate: Vec<u8>,
    pub private_key: Vec<u8>,
    pub ca_bundle: Vec<u8>,
}

impl TlsMaterial {
    pub fn new(
        certificate: impl Into<Vec<u8>>,
        private_key: impl Into<Vec<u8>>,
        ca_bundle: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            certificate: certificate.into(),
            private_key: private_key.into(),
            ca_bundle: ca_bundle.into(),
        }
    }
}

impl fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("certificate", &format_args!("{} bytes", self.certificate.len()))
            .field("private_key", &"<redacted>")
            .field("ca_bundle", &format_args!("{} bytes", self.ca_bundle.len()))
            .finish()
    }
}

/// How a drone treats client certificates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ClientAuthMode {
    /// No certificate is requested.
    None,
    /// A certificate is requested but optional and not chain-verified.
    Request,
    /// A certificate is required but not chain-verified.
    Any,
    /// A certificate is required and must chain to the CA bundle.
    #[default]
    RequireAndVerify,
}

impl ClientAuthMode {
    pub const ALL: [Self; 4] = [Self::None, Self::Request, Self::Any, Self::RequireAndVerify];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Request => "request",
            Self::Any => "any",
            Self::RequireAndVerify => "require-and-verify",
        }
    }

    /// Whether the server asks the client for a certificate at all.
    pub const fn requests_certificate(self) -> bool {
        !matches!(self, Self::None)
    }
}

impl fmt::Display for ClientAuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClientAuthMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| {
                Error::Config(format!(
                    "unknown client auth mode {s:?} (expected none, request, any or require-and-verify)"
                ))
            })
    }
}

/// The ring provider restricted to the allowed cipher suites.
pub fn crypto_provider() -> Arc<CryptoProvider> {
    use ring::cipher_suite as suite;

    Arc::new(CryptoProvider {
        cipher_suites: vec![
            suite::TLS13_AES_256_GCM_SHA384,
            suite::TLS13_AES_128_GCM_SHA256,
            suite::TLS13_CHACHA20_POLY1305_SHA256,
            suite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
            suite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
            suite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
            suite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
        ],
        ..ring::default_provider()
    })
}

/// Builds the drone's server configuration.
///
/// # Errors
///
/// Returns [`Error::Config`] if the certificate chain, private key or CA
/// bundle cannot be parsed, if the key does not match the certificate, or if
/// the CA bundle holds no usable certificate.
pub fn build_server_tls(
    material: &TlsMaterial,
    mode: ClientAuthMode,
) -> Result<Arc<ServerConfig>> {
    let provider = crypto_provider();
    let chain = parse_certificates(&material.certificate, "certificate")?;
    let key = parse_private_key(&material.private_key)?;
    let roots = Arc::new(root_store(&material.ca_bundle)?);

    let builder = ServerConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(PROTOCOL_VERSIONS)
        .map_err(config_error("protocol versions"))?;

    let builder = match mode {
        ClientAuthMode::None => builder.with_no_client_auth(),
        ClientAuthMode::Request | ClientAuthMode::Any => {
            builder.with_client_cert_verifier(Arc::new(UnverifiedClientCert {
                mandatory: mode == ClientAuthMode::Any,
                algorithms: provider.signature_verification_algorithms,
            }))
        }
        ClientAuthMode::RequireAndVerify => {
            let verifier = WebPkiClientVerifier::builder_with_provider(roots, provider)
                .build()
                .map_err(config_error("client verifier"))?;
            builder.with_client_cert_verifier(verifier)
        }
    };

    let mut config = builder
        .with_single_cert(chain, key)
        .map_err(config_error("certificate"))?;
    config.ignore_client_order = true;
    config.alpn_protocols = vec![ALPN_H2.to_vec()];
    Ok(Arc::new(config))
}

/// Builds a client configuration that presents the given identity and
/// trusts only servers chaining to the CA bundle.
///
/// # Errors
///
/// Returns [`Error::Config`] under the same conditions as
/// [`build_server_tls`].
pub fn build_client_tls(material: &TlsMaterial) -> Result<Arc<ClientConfig>> {
    let chain = parse_certificates(&material.certificate, "certificate")?;
    let key = parse_private_key(&material.private_key)?;
    let roots = root_store(&material.ca_bundle)?;

    let mut config = ClientConfig::builder_with_provider(crypto_provider())
        .with_protocol_versions(PROTOCOL_VERSIONS)
        .map_err(config_error("protocol versions"))?
        .with_root_certificates(roots)
        .with_client_auth_cert(chain, key)
        .map_err(config_error("certificate"))?;
    config.alpn_protocols = vec![ALPN_H2.to_vec()];
    Ok(Arc::new(config))
}

/// The TLS server name to verify for a `host:port` drone address.
///
/// IP literals (including bracketed IPv6) become IP server names and are
/// matched against IP SANs; anything else is treated as a DNS name.
///
/// # Errors
///
/// Returns [`Error::Config`] if the host part is empty or not a valid name.
pub fn server_name(address: &str) -> Result<ServerName<'static>> {
    let host = match address.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => address,
    };
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(Error::Config(format!("no host in drone address {address:?}")));
    }
    ServerName::try_from(host.to_string())
        .map_err(|e| Error::Config(format!("invalid server name {host:?}: {e}")))
}

/// Parses every `CERTIFICATE` block in `pem`.
///
/// # Errors
///
/// Returns [`Error::Config`] on malformed PEM or when no certificate is found.
pub fn parse_certificates(pem: &[u8], what: &str) -> Result<Vec<CertificateDer<'static>>> {
    let certs = rustls_pemfile::certs(&mut &pem[..])
        .collect::<core::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Config(format!("{what}: {e}")))?;
    if certs.is_empty() {
        return Err(Error::Config(format!("{what}: no certificates found")));
    }
    Ok(certs)
}

fn parse_private_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut &pem[..])
        .map_err(|e| Error::Config(format!("private key: {e}")))?
        .ok_or_else(|| Error::Config("private key: no key found".to_string()))
}

fn root_store(pem: &[u8]) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    let (added, _ignored) =
        roots.add_parsable_certificates(parse_certificates(pem, "CA bundle")?);
    if added == 0 {
        return Err(Error::Config("CA bundle: no usable certificates".to_string()));
    }
    Ok(roots)
}

fn config_error<E: fmt::Display>(what: &'static str) -> impl Fn(E) -> Error {
    move |e| Error::Config(format!("{what}: {e}"))
}

/// Accepts any client certificate without chain validation, while still
/// checking the handshake signature so the peer must hold the matching key.
#[derive(Debug)]
struct UnverifiedClientCert {
    mandatory: bool,
    algorithms: WebPkiSupportedAlgorithms,
}

impl ClientCertVerifier for UnverifiedClientCert {
    fn offer_client_auth(&self) -> bool {
        true
    }

    fn client_auth_mandatory(&self) -> bool {
        self.mandatory
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> core::result::Result<ClientCertVerified, rustls::Error> {
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> core::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> core::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}
