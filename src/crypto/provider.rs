//! Cryptographic provider traits for pluggable crypto backends.
//!
//! The engine never implements a primitive itself. Every cipher, hash,
//! signature and key agreement goes through one of the capability traits in
//! this module, collected in a [`CryptoProvider`] of static trait objects.
//!
//! # Architecture
//!
//! - **Cipher Suites** ([`SupportedCipherSuite`]): Factory for AEAD ciphers
//! - **Key Exchange Groups** ([`SupportedKxGroup`]): Factory for ECDHE key exchanges
//! - **Signature Verification** ([`SignatureVerifier`]): Verify signatures against certificates
//! - **Key Provider** ([`KeyProvider`]): Parse and load private keys
//! - **Secure Random** ([`SecureRandom`]): Cryptographically secure RNG
//! - **Hash Provider** ([`HashProvider`]): Factory for hash contexts
//! - **HMAC Provider** ([`HmacProvider`]): Finished message MACs
//! - **PRF Provider** ([`PrfProvider`]): TLS 1.2 PRF
//! - **HKDF Provider** ([`HkdfProvider`]): TLS 1.3 key schedule
//!
//! Each operation fails with a [`CryptoError`] so the engine can tell a
//! peer that sent garbage (alert) from a broken local setup (no alert).
//!
//! # Using a Custom Provider
//!
//! ```
//! use std::sync::Arc;
//! use tlsengine::Config;
//! use tlsengine::crypto::{rust_crypto, CryptoProvider};
//!
//! let base = rust_crypto::default_provider();
//! let provider = CryptoProvider {
//!     // Only offer the first key exchange group.
//!     kx_groups: &base.kx_groups[..1],
//!     ..base
//! };
//!
//! let config = Arc::new(
//!     Config::builder()
//!         .with_crypto_provider(provider)
//!         .build()
//!         .unwrap(),
//! );
//! # let _ = config;
//! ```
//!
//! # Thread Safety
//!
//! All provider traits require `Send + Sync + UnwindSafe + RefUnwindSafe`
//! since delegated tasks may run them on any thread.

use std::fmt::Debug;
use std::panic::{RefUnwindSafe, UnwindSafe};
use std::sync::OnceLock;

use crate::error::CryptoError;
use crate::types::{CipherSuite, HashAlgorithm, NamedGroup, SignatureScheme};
use crate::Error;

/// Marker trait for types that are safe to use in crypto provider components.
///
/// Automatically implemented for all types that satisfy the bounds.
pub trait CryptoSafe: Send + Sync + Debug + UnwindSafe + RefUnwindSafe {}

impl<T: Send + Sync + Debug + UnwindSafe + RefUnwindSafe> CryptoSafe for T {}

/// AEAD cipher keyed for one direction of a connection.
pub trait Cipher: CryptoSafe {
    /// Encrypt `buf` in place, appending the authentication tag.
    fn encrypt(&self, nonce: &[u8], aad: &[u8], buf: &mut Vec<u8>) -> Result<(), CryptoError>;

    /// Decrypt `buf` in place, verifying and removing the tag.
    ///
    /// Fails with [`CryptoError::DecryptFailed`] when authentication fails.
    fn decrypt(&self, nonce: &[u8], aad: &[u8], buf: &mut Vec<u8>) -> Result<(), CryptoError>;

    /// Authentication tag length in bytes.
    fn tag_len(&self) -> usize;
}

/// Incremental hash.
pub trait HashContext: CryptoSafe {
    fn update(&mut self, data: &[u8]);

    /// Digest of everything so far. The context can keep being updated.
    fn clone_and_finalize(&self) -> Vec<u8>;
}

/// Private key able to produce handshake signatures.
pub trait SigningKey: CryptoSafe {
    /// Sign `data`, hashing it with the scheme's hash first.
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// The scheme signatures are produced with.
    fn scheme(&self) -> SignatureScheme;
}

/// Ephemeral key pair for one key agreement.
pub trait ActiveKeyExchange: CryptoSafe {
    /// Our public key in its wire encoding.
    fn pub_key(&self) -> &[u8];

    /// Complete the exchange with the peer's public key, returning the shared secret.
    ///
    /// An invalid peer key fails with [`CryptoError::VerificationFailed`].
    fn complete(self: Box<Self>, peer_pub: &[u8]) -> Result<Vec<u8>, CryptoError>;

    fn group(&self) -> NamedGroup;
}

/// Cipher suite support (factory for [`Cipher`] instances).
///
/// The same trait covers TLS 1.2 and TLS 1.3 suites. What differs is how
/// the record layer builds nonces from [`SupportedCipherSuite::fixed_iv_len`].
pub trait SupportedCipherSuite: CryptoSafe {
    fn suite(&self) -> CipherSuite;

    /// Hash for the PRF or the HKDF key schedule.
    fn hash_algorithm(&self) -> HashAlgorithm;

    /// AEAD key length in bytes.
    fn key_len(&self) -> usize;

    /// Implicit IV length: 4 byte salt for TLS 1.2 GCM, otherwise a 12 byte IV.
    fn fixed_iv_len(&self) -> usize;

    fn create_cipher(&self, key: &[u8]) -> Result<Box<dyn Cipher>, CryptoError>;
}

/// Key exchange group support (factory for [`ActiveKeyExchange`]).
pub trait SupportedKxGroup: CryptoSafe {
    fn name(&self) -> NamedGroup;

    /// Generate a fresh ephemeral key pair.
    fn start_exchange(&self) -> Result<Box<dyn ActiveKeyExchange>, CryptoError>;
}

/// Signature checks against DER encoded X.509 certificates.
pub trait SignatureVerifier: CryptoSafe {
    /// Verify a handshake signature made by the key in `cert_der`.
    fn verify_signature(
        &self,
        cert_der: &[u8],
        data: &[u8],
        signature: &[u8],
        scheme: SignatureScheme,
    ) -> Result<(), CryptoError>;

    /// Verify that `issuer_der`'s key signed `cert_der`.
    fn verify_issued_by(&self, cert_der: &[u8], issuer_der: &[u8]) -> Result<(), CryptoError>;
}

/// Private key parser (factory for [`SigningKey`]).
pub trait KeyProvider: CryptoSafe {
    /// Load a private key from PKCS#8 DER, SEC1 DER or PEM.
    fn load_private_key(&self, key_der: &[u8]) -> Result<Box<dyn SigningKey>, CryptoError>;
}

pub trait SecureRandom: CryptoSafe {
    fn fill(&self, buf: &mut [u8]) -> Result<(), CryptoError>;
}

/// Hash provider (factory for [`HashContext`]).
pub trait HashProvider: CryptoSafe {
    fn create_hash(&self, algorithm: HashAlgorithm) -> Box<dyn HashContext>;
}

pub trait HmacProvider: CryptoSafe {
    fn hmac(&self, hash: HashAlgorithm, key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// TLS 1.2 PRF (RFC 5246 section 5).
pub trait PrfProvider: CryptoSafe {
    /// PRF(secret, label, seed) truncated to `output_len`.
    fn prf_tls12(
        &self,
        hash: HashAlgorithm,
        secret: &[u8],
        label: &str,
        seed: &[u8],
        output_len: usize,
    ) -> Result<Vec<u8>, CryptoError>;
}

/// HKDF for the TLS 1.3 key schedule (RFC 5869, RFC 8446 section 7.1).
pub trait HkdfProvider: CryptoSafe {
    /// PRK = HKDF-Extract(salt, IKM)
    fn hkdf_extract(
        &self,
        hash: HashAlgorithm,
        salt: &[u8],
        ikm: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    /// OKM = HKDF-Expand(PRK, info, L)
    fn hkdf_expand(
        &self,
        hash: HashAlgorithm,
        prk: &[u8],
        info: &[u8],
        output_len: usize,
    ) -> Result<Vec<u8>, CryptoError>;

    /// HKDF-Expand-Label with the "tls13 " prefix.
    ///
    /// ```text
    /// HkdfLabel = struct {
    ///     uint16 length;
    ///     opaque label<7..255> = "tls13 " + Label;
    ///     opaque context<0..255> = Context;
    /// }
    /// ```
    fn hkdf_expand_label(
        &self,
        hash: HashAlgorithm,
        secret: &[u8],
        label: &[u8],
        context: &[u8],
        output_len: usize,
    ) -> Result<Vec<u8>, CryptoError> {
        let full_label_len = 6 + label.len();
        if full_label_len > 255 || context.len() > 255 || output_len > 65535 {
            return Err(CryptoError::Provider(
                "HKDF-Expand-Label argument too long".to_string(),
            ));
        }

        let mut info = Vec::with_capacity(4 + full_label_len + context.len());
        info.extend_from_slice(&(output_len as u16).to_be_bytes());
        info.push(full_label_len as u8);
        info.extend_from_slice(b"tls13 ");
        info.extend_from_slice(label);
        info.push(context.len() as u8);
        info.extend_from_slice(context);

        self.hkdf_expand(hash, secret, &info, output_len)
    }
}

/// Cryptographic provider for the engine.
///
/// Uses static trait object references (`&'static dyn Trait`), which keeps
/// the provider `Copy`-cheap to clone and shareable across engines.
#[derive(Debug, Clone)]
pub struct CryptoProvider {
    /// Cipher suites in preference order, TLS 1.2 and TLS 1.3 alike.
    pub cipher_suites: &'static [&'static dyn SupportedCipherSuite],

    /// Key exchange groups in preference order.
    pub kx_groups: &'static [&'static dyn SupportedKxGroup],

    /// Signature verification for handshake signatures and certificate chains.
    pub signature_verification: &'static dyn SignatureVerifier,

    /// Key provider for parsing private keys.
    pub key_provider: &'static dyn KeyProvider,

    pub secure_random: &'static dyn SecureRandom,

    /// Hash provider for transcript hashing.
    pub hash_provider: &'static dyn HashProvider,

    pub hmac_provider: &'static dyn HmacProvider,

    /// PRF for TLS 1.2 key derivation.
    pub prf_provider: &'static dyn PrfProvider,

    /// HKDF for TLS 1.3 key derivation.
    pub hkdf_provider: &'static dyn HkdfProvider,
}

static DEFAULT: OnceLock<CryptoProvider> = OnceLock::new();

impl CryptoProvider {
    /// Install a default crypto provider for the process.
    ///
    /// Used by [`Config::builder()`](crate::Config::builder) when no explicit
    /// provider is given. Returns the provider back if a default was already
    /// installed.
    pub fn install_default(provider: CryptoProvider) -> Result<(), CryptoProvider> {
        DEFAULT.set(provider)
    }

    /// Get the default crypto provider, if one has been installed.
    pub fn get_default() -> Option<&'static CryptoProvider> {
        DEFAULT.get()
    }

    pub fn find_suite(&self, suite: CipherSuite) -> Option<&'static dyn SupportedCipherSuite> {
        self.cipher_suites.iter().copied().find(|s| s.suite() == suite)
    }

    pub fn find_kx_group(&self, group: NamedGroup) -> Option<&'static dyn SupportedKxGroup> {
        self.kx_groups.iter().copied().find(|g| g.name() == group)
    }

    /// Check that the provider can run at least one handshake.
    pub fn validate(&self) -> Result<(), Error> {
        if self.cipher_suites.is_empty() {
            return Err(Error::ConfigError(
                "crypto provider has no cipher suites".to_string(),
            ));
        }
        if self.kx_groups.is_empty() {
            return Err(Error::ConfigError(
                "crypto provider has no key exchange groups".to_string(),
            ));
        }
        for suite in self.cipher_suites {
            if suite.suite().protocol().is_none() {
                return Err(Error::ConfigError(format!(
                    "crypto provider offers non-negotiable suite {}",
                    suite.suite()
                )));
            }
        }
        Ok(())
    }
}
