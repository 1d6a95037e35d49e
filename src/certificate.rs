//! Certificate generation helpers exposed via the public `certificate` module.
//!
//! Generates ECDSA P-256 certificates, either self-signed or issued by a
//! throwaway [`CertificateAuthority`]. Enough to configure a
//! [`StaticKeyManager`](crate::crypto::credentials::StaticKeyManager) and an
//! [`AnchoredTrustManager`](crate::crypto::credentials::AnchoredTrustManager)
//! without a keystore.

use std::fmt;

use rcgen::{
    BasicConstraints, Certificate as RcgenCertificate, CertificateParams, DistinguishedName,
    DnType, IsCa, KeyPair, PKCS_ECDSA_P256_SHA256,
};
use sha2::{Digest, Sha256};
use thiserror::Error;
use time::{Duration, OffsetDateTime};

/// Certificate utility error types
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CertificateError {
    /// Certificate generation failed
    #[error("certificate generation failed: {0}")]
    GenerationFailed(String),
}

fn failed(e: rcgen::RcgenError) -> CertificateError {
    CertificateError::GenerationFailed(e.to_string())
}

/// Certificate chain (leaf first) and the leaf's private key.
#[derive(Clone)]
pub struct Credential {
    /// DER certificates, leaf first.
    pub chain: Vec<Vec<u8>>,
    /// PKCS#8 DER private key of the leaf.
    pub private_key: Vec<u8>,
}

impl Credential {
    /// SHA-256 fingerprint of the leaf certificate.
    pub fn fingerprint(&self) -> Vec<u8> {
        self.chain
            .first()
            .map(|leaf| calculate_fingerprint(leaf))
            .unwrap_or_default()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("chain_len", &self.chain.len())
            .field("fingerprint", &format_fingerprint(&self.fingerprint()))
            .finish_non_exhaustive()
    }
}

fn params(name: &str, not_before: OffsetDateTime, not_after: OffsetDateTime) -> CertificateParams {
    let mut params = CertificateParams::new(vec![name.to_string()]);

    let mut distinguished_name = DistinguishedName::new();
    distinguished_name.push(DnType::OrganizationName, "tlsengine".to_string());
    distinguished_name.push(DnType::CommonName, name.to_string());
    params.distinguished_name = distinguished_name;

    params.alg = &PKCS_ECDSA_P256_SHA256;
    params.not_before = not_before;
    params.not_after = not_after;
    params
}

fn one_year() -> (OffsetDateTime, OffsetDateTime) {
    let now = OffsetDateTime::now_utc();
    (now - Duration::minutes(5), now + Duration::days(365))
}

fn key_pair() -> Result<KeyPair, CertificateError> {
    KeyPair::generate(&PKCS_ECDSA_P256_SHA256).map_err(failed)
}

/// Generate a self-signed end entity certificate for `name`.
pub fn generate_self_signed(name: &str) -> Result<Credential, CertificateError> {
    let (not_before, not_after) = one_year();
    let mut params = params(name, not_before, not_after);
    params.is_ca = IsCa::NoCa;
    params.key_pair = Some(key_pair()?);

    let cert = RcgenCertificate::from_params(params).map_err(failed)?;
    Ok(Credential {
        chain: vec![cert.serialize_der().map_err(failed)?],
        private_key: cert.serialize_private_key_der(),
    })
}

/// A CA able to issue leaf certificates.
pub struct CertificateAuthority {
    cert: RcgenCertificate,
    der: Vec<u8>,
}

impl CertificateAuthority {
    /// Generate a self-signed root CA.
    pub fn generate(name: &str) -> Result<Self, CertificateError> {
        let (not_before, not_after) = one_year();
        let mut params = params(name, not_before, not_after);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_pair = Some(key_pair()?);

        let cert = RcgenCertificate::from_params(params).map_err(failed)?;
        let der = cert.serialize_der().map_err(failed)?;
        Ok(CertificateAuthority { cert, der })
    }

    /// DER of the CA certificate, to be used as a trust anchor.
    pub fn certificate(&self) -> &[u8] {
        &self.der
    }

    /// Issue a leaf certificate for `name`. The chain is [leaf, ca].
    pub fn issue(&self, name: &str) -> Result<Credential, CertificateError> {
        let (not_before, not_after) = one_year();
        self.issue_with_validity(name, not_before, not_after)
    }

    /// Issue a leaf certificate that expired yesterday.
    pub fn issue_expired(&self, name: &str) -> Result<Credential, CertificateError> {
        let now = OffsetDateTime::now_utc();
        self.issue_with_validity(name, now - Duration::days(30), now - Duration::days(1))
    }

    fn issue_with_validity(
        &self,
        name: &str,
        not_before: OffsetDateTime,
        not_after: OffsetDateTime,
    ) -> Result<Credential, CertificateError> {
        let mut params = params(name, not_before, not_after);
        params.is_ca = IsCa::NoCa;
        params.key_pair = Some(key_pair()?);

        let cert = RcgenCertificate::from_params(params).map_err(failed)?;
        let leaf = cert.serialize_der_with_signer(&self.cert).map_err(failed)?;
        Ok(Credential {
            chain: vec![leaf, self.der.clone()],
            private_key: cert.serialize_private_key_der(),
        })
    }
}

impl fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("fingerprint", &format_fingerprint(&calculate_fingerprint(&self.der)))
            .finish()
    }
}

/// Calculate a certificate fingerprint using SHA-256
pub fn calculate_fingerprint(cert_der: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(cert_der);
    hasher.finalize().to_vec()
}

/// Format a fingerprint as a colon-separated hex string
/// Example: "AF:12:F6:..."
pub fn format_fingerprint(fingerprint: &[u8]) -> String {
    fingerprint
        .iter()
        .map(|byte| format!("{:02X}", byte))
        .collect::<Vec<String>>()
        .join(":")
}
