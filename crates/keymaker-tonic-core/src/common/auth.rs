//! Client authorization by certificate Common Name.
//!
//! Authorization runs after the TLS handshake and before any request is read.
//! It only looks at the leaf certificate the peer presented; chain validation
//! is the TLS layer's job.

use crate::{Error, Result};
use regex::Regex;
use rustls::pki_types::CertificateDer;
use x509_parser::prelude::{FromDer, X509Certificate};

/// An optional regular expression the client certificate CN must match.
#[derive(Debug, Clone, Default)]
pub struct ClientAuthorizationPolicy {
    common_name: Option<Regex>,
}

impl ClientAuthorizationPolicy {
    /// Compiles `pattern`; `None` authorizes every certificate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the expression does not compile.
    pub fn new(pattern: Option<&str>) -> Result<Self> {
        let common_name = pattern
            .map(|p| {
                Regex::new(p).map_err(|e| Error::Config(format!("client CN expression: {e}")))
            })
            .transpose()?;
        Ok(Self { common_name })
    }

    /// Authorizes any peer that presents a certificate.
    pub const fn allow_all() -> Self {
        Self { common_name: None }
    }

    /// The source of the CN expression, if one is configured.
    pub fn pattern(&self) -> Option<&str> {
        self.common_name.as_ref().map(Regex::as_str)
    }

    pub fn permits(&self, common_name: &str) -> bool {
        self.common_name
            .as_ref()
            .is_none_or(|re| re.is_match(common_name))
    }
}

/// Outcome of [`authorize_connection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    Authorized { common_name: String },
    Rejected { reason: String },
}

impl Authorization {
    pub const fn is_authorized(&self) -> bool {
        matches!(self, Self::Authorized { .. })
    }
}

/// Decides whether a peer may talk to the drone.
///
/// A peer without certificates is rejected. Otherwise the first certificate's
/// Common Name (the empty string if it has none) is checked against `policy`.
/// A leaf that does not parse as X.509 is rejected.
pub fn authorize_connection(
    peer_certificates: &[CertificateDer<'_>],
    policy: &ClientAuthorizationPolicy,
) -> Authorization {
    let Some(leaf) = peer_certificates.first() else {
        return Authorization::Rejected {
            reason: "no client certificate presented".to_string(),
        };
    };

    let common_name = match common_name(leaf) {
        Ok(cn) => cn,
        Err(reason) => return Authorization::Rejected { reason },
    };

    if policy.permits(&common_name) {
        Authorization::Authorized { common_name }
    } else {
        Authorization::Rejected {
            reason: format!("client CN {common_name:?} does not match the authorized pattern"),
        }
    }
}

/// Extracts the subject Common Name of a DER certificate.
///
/// Returns an empty string when the subject has no CN attribute.
///
/// # Errors
///
/// Returns a description of the failure when the certificate does not parse.
pub fn common_name(cert: &CertificateDer<'_>) -> core::result::Result<String, String> {
    let (_, parsed) = X509Certificate::from_der(cert.as_ref())
        .map_err(|e| format!("unparseable client certificate: {e}"))?;
    let cn = parsed
        .subject()
        .iter_common_name()
        .next()
        .map(|attr| {
            attr.as_str()
                .map(str::to_string)
                .map_err(|e| format!("client certificate CN is not a string: {e}"))
        })
        .transpose()?;
    Ok(cn.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{parse_certificates, testdata};

    fn leaf(pem: &[u8]) -> Vec<CertificateDer<'static>> {
        parse_certificates(pem, "test").unwrap()
    }

    fn strict() -> ClientAuthorizationPolicy {
        ClientAuthorizationPolicy::new(Some("^drone-client$")).unwrap()
    }

    #[test]
    fn no_certificates_rejected() {
        for policy in [ClientAuthorizationPolicy::allow_all(), strict()] {
            assert!(!authorize_connection(&[], &policy).is_authorized());
        }
    }

    #[test]
    fn matching_cn_authorized() {
        assert_eq!(
            authorize_connection(&leaf(testdata::DRONE_CLIENT_CERT), &strict()),
            Authorization::Authorized {
                common_name: "drone-client".to_string()
            }
        );
    }

    #[test]
    fn mismatching_cn_rejected() {
        let outcome = authorize_connection(&leaf(testdata::OTHER_CLIENT_CERT), &strict());
        match outcome {
            Authorization::Rejected { reason } => assert!(reason.contains("other-client")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn policy_only_checks_the_cn() {
        // Chain validation belongs to the handshake; a CN match is enough here.
        assert!(authorize_connection(&leaf(testdata::ROGUE_CLIENT_CERT), &strict()).is_authorized());
    }

    #[test]
    fn allow_all_accepts_any_cn() {
        let policy = ClientAuthorizationPolicy::new(None).unwrap();
        assert_eq!(policy.pattern(), None);
        for pem in [testdata::DRONE_CLIENT_CERT, testdata::OTHER_CLIENT_CERT] {
            assert!(authorize_connection(&leaf(pem), &policy).is_authorized());
        }
    }

    #[test]
    fn only_the_leaf_is_considered() {
        let mut chain = leaf(testdata::OTHER_CLIENT_CERT);
        chain.extend(leaf(testdata::DRONE_CLIENT_CERT));
        assert!(!authorize_connection(&chain, &strict()).is_authorized());
    }

    #[test]
    fn garbage_certificate_rejected() {
        let garbage = [CertificateDer::from(vec![0x30, 0x03, 0x02, 0x01, 0x00])];
        let policy = ClientAuthorizationPolicy::allow_all();
        assert!(!authorize_connection(&garbage, &policy).is_authorized());
    }

    #[test]
    fn unanchored_pattern_is_a_substring_match() {
        let policy = ClientAuthorizationPolicy::new(Some("client")).unwrap();
        assert!(policy.permits("drone-client"));
        assert!(policy.permits("other-client"));
        assert!(!policy.permits("drone"));
    }

    #[test]
    fn invalid_pattern_is_config_error() {
        assert!(matches!(
            ClientAuthorizationPolicy::new(Some("(unclosed")),
            Err(Error::Config(_))
        ));
    }
}
