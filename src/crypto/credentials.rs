//! Credential selection and trust decisions.
//!
//! The engine asks a [`KeyManager`] which certificate chain to present and a
//! [`TrustManager`] whether to accept the peer's chain. Both are shared
//! through [`Config`](crate::Config) as trait objects so an application can
//! plug in its own keystore or PKI policy.

use std::fmt;

use der::{Decode, Encode};
use spki::ObjectIdentifier;
use thiserror::Error;
use x509_cert::Certificate as X509Certificate;

use crate::alert::AlertDescription;
use crate::certificate::Credential;
use crate::crypto::provider::CryptoProvider;
use crate::types::SignatureScheme;

const OID_P256: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.3.1.7");
const OID_P384: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.132.0.34");

/// Chooses the local certificate chain and private key.
///
/// `issuers` are DER encoded distinguished names the peer accepts. An empty
/// list means any issuer. Returning `None` means no suitable credential.
pub trait KeyManager: Send + Sync + fmt::Debug {
    /// Pick a client credential for a server's CertificateRequest.
    fn choose_client_alias(
        &self,
        schemes: &[SignatureScheme],
        issuers: &[Vec<u8>],
    ) -> Option<String>;

    /// Pick a server credential able to sign with one of `schemes`.
    fn choose_server_alias(
        &self,
        schemes: &[SignatureScheme],
        issuers: &[Vec<u8>],
    ) -> Option<String>;

    /// DER certificates for `alias`, leaf first.
    fn certificate_chain(&self, alias: &str) -> Option<Vec<Vec<u8>>>;

    /// Private key for `alias`, in a form the crypto provider can load.
    fn private_key(&self, alias: &str) -> Option<Vec<u8>>;
}

/// Why a peer chain was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrustError {
    #[error("empty certificate chain")]
    EmptyChain,

    #[error("malformed certificate: {0}")]
    Malformed(String),

    #[error("no trusted issuer for {0}")]
    UnknownIssuer(String),

    #[error("bad certificate signature: {0}")]
    BadSignature(String),

    #[error("certificate expired")]
    Expired,

    #[error("certificate not yet valid")]
    NotYetValid,
}

impl TrustError {
    /// The alert sent to the peer when its chain is rejected.
    pub fn alert(&self) -> AlertDescription {
        match self {
            TrustError::EmptyChain | TrustError::Malformed(_) => AlertDescription::BadCertificate,
            TrustError::UnknownIssuer(_) => AlertDescription::UnknownCa,
            TrustError::BadSignature(_) => AlertDescription::BadCertificate,
            TrustError::Expired | TrustError::NotYetValid => AlertDescription::CertificateExpired,
        }
    }
}

/// Decides whether a peer's certificate chain is trusted.
pub trait TrustManager: Send + Sync + fmt::Debug {
    /// Check a client chain (leaf first) presented to a server.
    fn check_client_trusted(&self, chain: &[Vec<u8>]) -> Result<(), TrustError>;

    /// Check a server chain (leaf first) presented to a client.
    fn check_server_trusted(&self, chain: &[Vec<u8>]) -> Result<(), TrustError>;

    /// Subject names (DER) a server advertises in its CertificateRequest.
    fn accepted_issuers(&self) -> Vec<Vec<u8>>;
}

fn parse(cert_der: &[u8]) -> Result<X509Certificate, TrustError> {
    X509Certificate::from_der(cert_der).map_err(|e| TrustError::Malformed(e.to_string()))
}

fn name_der(name: &x509_cert::name::Name) -> Option<Vec<u8>> {
    name.to_der().ok()
}

/// Signature scheme matching the curve of the leaf's public key.
pub(crate) fn leaf_scheme(cert_der: &[u8]) -> Option<SignatureScheme> {
    let cert = X509Certificate::from_der(cert_der).ok()?;
    let params = cert
        .tbs_certificate
        .subject_public_key_info
        .algorithm
        .parameters?;
    let curve: ObjectIdentifier = params.decode_as().ok()?;
    match curve {
        OID_P256 => Some(SignatureScheme::ECDSA_SECP256R1_SHA256),
        OID_P384 => Some(SignatureScheme::ECDSA_SECP384R1_SHA384),
        _ => None,
    }
}

/// Fixed set of credentials keyed by alias.
///
/// Aliases are tried in insertion order.
#[derive(Debug, Default, Clone)]
pub struct StaticKeyManager {
    entries: Vec<(String, Credential)>,
}

impl StaticKeyManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a credential under `alias`, replacing an earlier one.
    pub fn with_credential(mut self, alias: impl Into<String>, credential: Credential) -> Self {
        let alias = alias.into();
        self.entries.retain(|(a, _)| *a != alias);
        self.entries.push((alias, credential));
        self
    }

    fn choose(&self, schemes: &[SignatureScheme], issuers: &[Vec<u8>]) -> Option<String> {
        self.entries
            .iter()
            .find(|(_, cred)| Self::suitable(cred, schemes, issuers))
            .map(|(alias, _)| alias.clone())
    }

    fn suitable(cred: &Credential, schemes: &[SignatureScheme], issuers: &[Vec<u8>]) -> bool {
        let Some(leaf) = cred.chain.first() else {
            return false;
        };
        let Some(scheme) = leaf_scheme(leaf) else {
            return false;
        };
        if !schemes.is_empty() && !schemes.contains(&scheme) {
            return false;
        }
        if issuers.is_empty() {
            return true;
        }

        // Any certificate of the chain issued by, or being, an accepted issuer
        cred.chain.iter().any(|der| {
            let Ok(cert) = X509Certificate::from_der(der) else {
                return false;
            };
            let issuer = name_der(&cert.tbs_certificate.issuer);
            let subject = name_der(&cert.tbs_certificate.subject);
            issuers
                .iter()
                .any(|i| Some(i) == issuer.as_ref() || Some(i) == subject.as_ref())
        })
    }

    fn get(&self, alias: &str) -> Option<&Credential> {
        self.entries.iter().find(|(a, _)| a == alias).map(|(_, c)| c)
    }
}

impl KeyManager for StaticKeyManager {
    fn choose_client_alias(
        &self,
        schemes: &[SignatureScheme],
        issuers: &[Vec<u8>],
    ) -> Option<String> {
        self.choose(schemes, issuers)
    }

    fn choose_server_alias(
        &self,
        schemes: &[SignatureScheme],
        issuers: &[Vec<u8>],
    ) -> Option<String> {
        self.choose(schemes, issuers)
    }

    fn certificate_chain(&self, alias: &str) -> Option<Vec<Vec<u8>>> {
        self.get(alias).map(|c| c.chain.clone())
    }

    fn private_key(&self, alias: &str) -> Option<Vec<u8>> {
        self.get(alias).map(|c| c.private_key.clone())
    }
}

/// Always picks one alias, as long as the inner manager knows it.
#[derive(Debug)]
pub struct PreferredAlias<K> {
    inner: K,
    alias: String,
}

impl<K: KeyManager> PreferredAlias<K> {
    pub fn new(inner: K, alias: impl Into<String>) -> Self {
        PreferredAlias {
            inner,
            alias: alias.into(),
        }
    }

    fn known(&self) -> Option<String> {
        self.inner
            .certificate_chain(&self.alias)
            .map(|_| self.alias.clone())
    }
}

impl<K: KeyManager> KeyManager for PreferredAlias<K> {
    fn choose_client_alias(&self, _: &[SignatureScheme], _: &[Vec<u8>]) -> Option<String> {
        self.known()
    }

    fn choose_server_alias(&self, _: &[SignatureScheme], _: &[Vec<u8>]) -> Option<String> {
        self.known()
    }

    fn certificate_chain(&self, alias: &str) -> Option<Vec<Vec<u8>>> {
        self.inner.certificate_chain(alias)
    }

    fn private_key(&self, alias: &str) -> Option<Vec<u8>> {
        self.inner.private_key(alias)
    }
}

/// Never presents a client certificate; server selection is unchanged.
#[derive(Debug)]
pub struct NoClientAuth<K> {
    inner: K,
}

impl<K: KeyManager> NoClientAuth<K> {
    pub fn new(inner: K) -> Self {
        NoClientAuth { inner }
    }
}

impl<K: KeyManager> KeyManager for NoClientAuth<K> {
    fn choose_client_alias(&self, _: &[SignatureScheme], _: &[Vec<u8>]) -> Option<String> {
        None
    }

    fn choose_server_alias(
        &self,
        schemes: &[SignatureScheme],
        issuers: &[Vec<u8>],
    ) -> Option<String> {
        self.inner.choose_server_alias(schemes, issuers)
    }

    fn certificate_chain(&self, alias: &str) -> Option<Vec<Vec<u8>>> {
        self.inner.certificate_chain(alias)
    }

    fn private_key(&self, alias: &str) -> Option<Vec<u8>> {
        self.inner.private_key(alias)
    }
}

/// Trusts chains ending in one of a fixed set of anchors.
///
/// Checks validity periods and each signature link of the chain. Host names,
/// key usage and revocation are not checked.
pub struct AnchoredTrustManager {
    anchors: Vec<Vec<u8>>,
    provider: CryptoProvider,
}

impl AnchoredTrustManager {
    pub fn new(anchors: Vec<Vec<u8>>, provider: CryptoProvider) -> Self {
        AnchoredTrustManager { anchors, provider }
    }

    /// Anchors checked against the bundled RustCrypto provider.
    pub fn with_default_provider(anchors: Vec<Vec<u8>>) -> Self {
        Self::new(anchors, crate::crypto::rust_crypto::default_provider())
    }

    fn check_chain(&self, chain: &[Vec<u8>]) -> Result<(), TrustError> {
        if chain.is_empty() {
            return Err(TrustError::EmptyChain);
        }

        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        let parsed = chain
            .iter()
            .map(|der| parse(der))
            .collect::<Result<Vec<_>, _>>()?;

        for cert in &parsed {
            let validity = &cert.tbs_certificate.validity;
            let not_before = validity.not_before.to_unix_duration().as_secs() as i64;
            let not_after = validity.not_after.to_unix_duration().as_secs() as i64;
            if now < not_before {
                return Err(TrustError::NotYetValid);
            }
            if now > not_after {
                return Err(TrustError::Expired);
            }
        }

        let verifier = self.provider.signature_verification;
        for pair in chain.windows(2) {
            verifier
                .verify_issued_by(&pair[0], &pair[1])
                .map_err(|e| TrustError::BadSignature(e.to_string()))?;
        }

        // The last certificate is an anchor, or was issued by one
        let last_der = &chain[chain.len() - 1];
        if self.anchors.iter().any(|a| a == last_der) {
            return Ok(());
        }

        let last = &parsed[parsed.len() - 1];
        let issuer = name_der(&last.tbs_certificate.issuer);
        for anchor in &self.anchors {
            let Ok(anchor_cert) = X509Certificate::from_der(anchor) else {
                continue;
            };
            if name_der(&anchor_cert.tbs_certificate.subject) != issuer {
                continue;
            }
            if verifier.verify_issued_by(last_der, anchor).is_ok() {
                return Ok(());
            }
        }

        Err(TrustError::UnknownIssuer(last.tbs_certificate.subject.to_string()))
    }
}

impl fmt::Debug for AnchoredTrustManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnchoredTrustManager")
            .field("anchors", &self.anchors.len())
            .finish_non_exhaustive()
    }
}

impl TrustManager for AnchoredTrustManager {
    fn check_client_trusted(&self, chain: &[Vec<u8>]) -> Result<(), TrustError> {
        self.check_chain(chain)
    }

    fn check_server_trusted(&self, chain: &[Vec<u8>]) -> Result<(), TrustError> {
        self.check_chain(chain)
    }

    fn accepted_issuers(&self) -> Vec<Vec<u8>> {
        self.anchors
            .iter()
            .filter_map(|der| X509Certificate::from_der(der).ok())
            .filter_map(|cert| name_der(&cert.tbs_certificate.subject))
            .collect()
    }
}

/// Accepts any non-empty chain. For tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAnyTrustManager;

impl TrustManager for AcceptAnyTrustManager {
    fn check_client_trusted(&self, chain: &[Vec<u8>]) -> Result<(), TrustError> {
        if chain.is_empty() {
            return Err(TrustError::EmptyChain);
        }
        Ok(())
    }

    fn check_server_trusted(&self, chain: &[Vec<u8>]) -> Result<(), TrustError> {
        self.check_client_trusted(chain)
    }

    fn accepted_issuers(&self) -> Vec<Vec<u8>> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::{generate_self_signed, CertificateAuthority};

    #[test]
    fn static_manager_matches_scheme_and_issuer() {
        let ca = CertificateAuthority::generate("CA").unwrap();
        let issued = ca.issue("server").unwrap();
        let self_signed = generate_self_signed("other").unwrap();

        let km = StaticKeyManager::new()
            .with_credential("self", self_signed)
            .with_credential("issued", issued);

        let p256 = [SignatureScheme::ECDSA_SECP256R1_SHA256];
        assert_eq!(km.choose_server_alias(&p256, &[]).as_deref(), Some("self"));

        let tm = AnchoredTrustManager::with_default_provider(vec![ca.certificate().to_vec()]);
        let issuers = tm.accepted_issuers();
        assert_eq!(issuers.len(), 1);
        assert_eq!(
            km.choose_client_alias(&p256, &issuers).as_deref(),
            Some("issued")
        );

        let p384 = [SignatureScheme::ECDSA_SECP384R1_SHA384];
        assert_eq!(km.choose_server_alias(&p384, &[]), None);
    }

    #[test]
    fn decorators() {
        let km = StaticKeyManager::new()
            .with_credential("a", generate_self_signed("a").unwrap())
            .with_credential("b", generate_self_signed("b").unwrap());

        let preferred = PreferredAlias::new(km.clone(), "b");
        assert_eq!(preferred.choose_server_alias(&[], &[]).as_deref(), Some("b"));
        assert!(preferred.private_key("b").is_some());

        let missing = PreferredAlias::new(km.clone(), "zzz");
        assert_eq!(missing.choose_client_alias(&[], &[]), None);

        let no_client = NoClientAuth::new(km);
        assert_eq!(no_client.choose_client_alias(&[], &[]), None);
        assert_eq!(no_client.choose_server_alias(&[], &[]).as_deref(), Some("a"));
    }

    #[test]
    fn anchored_trust() {
        let ca = CertificateAuthority::generate("CA").unwrap();
        let tm = AnchoredTrustManager::with_default_provider(vec![ca.certificate().to_vec()]);

        let cred = ca.issue("server").unwrap();
        tm.check_server_trusted(&cred.chain).unwrap();
        // Leaf alone is accepted when its issuer is an anchor
        tm.check_server_trusted(&cred.chain[..1]).unwrap();

        let stranger = generate_self_signed("stranger").unwrap();
        let err = tm.check_client_trusted(&stranger.chain).unwrap_err();
        assert_eq!(err.alert(), AlertDescription::UnknownCa);

        assert_eq!(tm.check_client_trusted(&[]), Err(TrustError::EmptyChain));
        assert!(matches!(
            tm.check_client_trusted(&[vec![1, 2, 3]]),
            Err(TrustError::Malformed(_))
        ));
    }

    #[test]
    fn expired_leaf_rejected() {
        let ca = CertificateAuthority::generate("CA").unwrap();
        let tm = AnchoredTrustManager::with_default_provider(vec![ca.certificate().to_vec()]);
        let cred = ca.issue_expired("old").unwrap();
        let err = tm.check_server_trusted(&cred.chain).unwrap_err();
        assert_eq!(err, TrustError::Expired);
        assert_eq!(err.alert(), AlertDescription::CertificateExpired);
    }

    #[test]
    fn forged_link_rejected() {
        let ca = CertificateAuthority::generate("CA").unwrap();
        let other = CertificateAuthority::generate("CA").unwrap();
        let tm = AnchoredTrustManager::with_default_provider(vec![ca.certificate().to_vec()]);

        // Same issuer name, different key
        let cred = other.issue("server").unwrap();
        assert!(tm.check_server_trusted(&cred.chain[..1]).is_err());
    }

    #[test]
    fn leaf_scheme_of_generated_cert() {
        let cred = generate_self_signed("x").unwrap();
        assert_eq!(
            leaf_scheme(&cred.chain[0]),
            Some(SignatureScheme::ECDSA_SECP256R1_SHA256)
        );
    }
}
