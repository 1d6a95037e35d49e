//! Signing and key loading implementations using RustCrypto.

use std::str;

use der::{Decode, Encode};
use p256::ecdsa::{Signature as P256Signature, SigningKey as P256SigningKey};
use p256::ecdsa::VerifyingKey as P256VerifyingKey;
use p384::ecdsa::{Signature as P384Signature, SigningKey as P384SigningKey};
use p384::ecdsa::VerifyingKey as P384VerifyingKey;
use pkcs8::DecodePrivateKey;
use signature::hazmat::{PrehashSigner, PrehashVerifier};
use spki::ObjectIdentifier;
use x509_cert::Certificate as X509Certificate;

use crate::crypto::provider::{KeyProvider, SignatureVerifier, SigningKey};
use crate::error::CryptoError;
use crate::types::{HashAlgorithm, SignatureScheme};

const OID_EC_PUBLIC_KEY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");
const OID_P256: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.3.1.7");
const OID_P384: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.132.0.34");
const OID_ECDSA_SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.2");
const OID_ECDSA_SHA384: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.3");

fn digest(hash: HashAlgorithm, data: &[u8]) -> Vec<u8> {
    use sha2::Digest;
    match hash {
        HashAlgorithm::SHA256 => sha2::Sha256::digest(data).to_vec(),
        HashAlgorithm::SHA384 => sha2::Sha384::digest(data).to_vec(),
    }
}

/// ECDSA signing key implementation.
enum EcdsaSigningKey {
    P256(P256SigningKey),
    P384(P384SigningKey),
}

impl std::fmt::Debug for EcdsaSigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EcdsaSigningKey::P256(_) => f.debug_tuple("EcdsaSigningKey::P256").finish(),
            EcdsaSigningKey::P384(_) => f.debug_tuple("EcdsaSigningKey::P384").finish(),
        }
    }
}

impl SigningKey for EcdsaSigningKey {
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let failed = |_| CryptoError::Provider("ECDSA signing failed".to_string());
        match self {
            EcdsaSigningKey::P256(key) => {
                let hash = digest(HashAlgorithm::SHA256, data);
                let signature: P256Signature = key.sign_prehash(&hash).map_err(failed)?;
                Ok(signature.to_der().as_bytes().to_vec())
            }
            EcdsaSigningKey::P384(key) => {
                let hash = digest(HashAlgorithm::SHA384, data);
                let signature: P384Signature = key.sign_prehash(&hash).map_err(failed)?;
                Ok(signature.to_der().as_bytes().to_vec())
            }
        }
    }

    fn scheme(&self) -> SignatureScheme {
        match self {
            EcdsaSigningKey::P256(_) => SignatureScheme::ECDSA_SECP256R1_SHA256,
            EcdsaSigningKey::P384(_) => SignatureScheme::ECDSA_SECP384R1_SHA384,
        }
    }
}

/// Key provider implementation.
#[derive(Debug)]
pub(super) struct RustCryptoKeyProvider;

impl KeyProvider for RustCryptoKeyProvider {
    fn load_private_key(&self, key_der: &[u8]) -> Result<Box<dyn SigningKey>, CryptoError> {
        // PKCS#8 DER first, the most common form
        if let Ok(key) = P256SigningKey::from_pkcs8_der(key_der) {
            return Ok(Box::new(EcdsaSigningKey::P256(key)));
        }
        if let Ok(key) = P384SigningKey::from_pkcs8_der(key_der) {
            return Ok(Box::new(EcdsaSigningKey::P384(key)));
        }

        // SEC1 DER (OpenSSL EC private key format)
        if let Ok(key) = p256::SecretKey::from_sec1_der(key_der) {
            return Ok(Box::new(EcdsaSigningKey::P256(key.into())));
        }
        if let Ok(key) = p384::SecretKey::from_sec1_der(key_der) {
            return Ok(Box::new(EcdsaSigningKey::P384(key.into())));
        }

        if let Ok(pem_str) = str::from_utf8(key_der) {
            if pem_str.contains("-----BEGIN") {
                if let Ok((_label, doc)) = pkcs8::Document::from_pem(pem_str) {
                    return self.load_private_key(doc.as_bytes());
                }
            }
        }

        Err(CryptoError::BadKey(
            "failed to parse private key in any supported format".to_string(),
        ))
    }
}

/// EC public key from a certificate, with its curve.
enum EcPublicKey {
    P256(P256VerifyingKey),
    P384(P384VerifyingKey),
}

impl EcPublicKey {
    fn from_certificate(cert: &X509Certificate) -> Result<Self, CryptoError> {
        let spki = &cert.tbs_certificate.subject_public_key_info;

        if spki.algorithm.oid != OID_EC_PUBLIC_KEY {
            return Err(CryptoError::UnsupportedAlgorithm(format!(
                "public key algorithm {}",
                spki.algorithm.oid
            )));
        }

        let pubkey_bytes = spki.subject_public_key.as_bytes().ok_or_else(|| {
            CryptoError::VerificationFailed("invalid EC subject_public_key bitstring".to_string())
        })?;

        let curve_oid: ObjectIdentifier = spki
            .algorithm
            .parameters
            .as_ref()
            .ok_or_else(|| {
                CryptoError::VerificationFailed("missing EC curve parameter".to_string())
            })?
            .decode_as()
            .map_err(|_| CryptoError::VerificationFailed("invalid EC curve parameter".to_string()))?;

        let bad_key = |_| CryptoError::VerificationFailed("invalid EC public key".to_string());
        match curve_oid {
            OID_P256 => Ok(EcPublicKey::P256(
                P256VerifyingKey::from_sec1_bytes(pubkey_bytes).map_err(bad_key)?,
            )),
            OID_P384 => Ok(EcPublicKey::P384(
                P384VerifyingKey::from_sec1_bytes(pubkey_bytes).map_err(bad_key)?,
            )),
            _ => Err(CryptoError::UnsupportedAlgorithm(format!(
                "EC curve {}",
                curve_oid
            ))),
        }
    }

    /// Verify a DER encoded ECDSA signature over `hash`.
    ///
    /// The curve decides the signature type, the hash may differ from the
    /// curve's natural one (P-256 keys signing SHA-384 certificates is legal).
    fn verify_prehash(&self, hash: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
        let malformed = |_| CryptoError::VerificationFailed("malformed ECDSA signature".to_string());
        let failed = |_| CryptoError::VerificationFailed("ECDSA signature mismatch".to_string());
        match self {
            EcPublicKey::P256(key) => {
                let sig = P256Signature::from_der(signature).map_err(malformed)?;
                key.verify_prehash(hash, &sig).map_err(failed)
            }
            EcPublicKey::P384(key) => {
                let sig = P384Signature::from_der(signature).map_err(malformed)?;
                key.verify_prehash(hash, &sig).map_err(failed)
            }
        }
    }

    fn matches_scheme(&self, scheme: SignatureScheme) -> bool {
        matches!(
            (self, scheme),
            (EcPublicKey::P256(_), SignatureScheme::ECDSA_SECP256R1_SHA256)
                | (EcPublicKey::P384(_), SignatureScheme::ECDSA_SECP384R1_SHA384)
        )
    }
}

fn parse_certificate(cert_der: &[u8]) -> Result<X509Certificate, CryptoError> {
    X509Certificate::from_der(cert_der)
        .map_err(|e| CryptoError::VerificationFailed(format!("failed to parse certificate: {e}")))
}

/// Signature verifier implementation.
#[derive(Debug)]
pub(super) struct RustCryptoSignatureVerifier;

impl SignatureVerifier for RustCryptoSignatureVerifier {
    fn verify_signature(
        &self,
        cert_der: &[u8],
        data: &[u8],
        signature: &[u8],
        scheme: SignatureScheme,
    ) -> Result<(), CryptoError> {
        let hash_alg = scheme.hash_algorithm().ok_or_else(|| {
            CryptoError::UnsupportedAlgorithm(format!("signature scheme {:?}", scheme))
        })?;

        let cert = parse_certificate(cert_der)?;
        let key = EcPublicKey::from_certificate(&cert)?;

        // TLS 1.3 binds curve and hash together, and we only offer the
        // matching pairs in TLS 1.2 too.
        if !key.matches_scheme(scheme) {
            return Err(CryptoError::VerificationFailed(format!(
                "certificate key does not match scheme {:?}",
                scheme
            )));
        }

        key.verify_prehash(&digest(hash_alg, data), signature)
    }

    fn verify_issued_by(&self, cert_der: &[u8], issuer_der: &[u8]) -> Result<(), CryptoError> {
        let cert = parse_certificate(cert_der)?;
        let issuer = parse_certificate(issuer_der)?;

        let hash_alg = match cert.signature_algorithm.oid {
            OID_ECDSA_SHA256 => HashAlgorithm::SHA256,
            OID_ECDSA_SHA384 => HashAlgorithm::SHA384,
            oid => {
                return Err(CryptoError::UnsupportedAlgorithm(format!(
                    "certificate signature algorithm {}",
                    oid
                )))
            }
        };

        let tbs = cert
            .tbs_certificate
            .to_der()
            .map_err(|e| CryptoError::Provider(format!("failed to encode tbsCertificate: {e}")))?;
        let signature = cert.signature.as_bytes().ok_or_else(|| {
            CryptoError::VerificationFailed("invalid certificate signature bitstring".to_string())
        })?;

        EcPublicKey::from_certificate(&issuer)?.verify_prehash(&digest(hash_alg, &tbs), signature)
    }
}

/// Static instance of the key provider.
pub(super) static KEY_PROVIDER: RustCryptoKeyProvider = RustCryptoKeyProvider;

/// Static instance of the signature verifier.
pub(super) static SIGNATURE_VERIFIER: RustCryptoSignatureVerifier = RustCryptoSignatureVerifier;
