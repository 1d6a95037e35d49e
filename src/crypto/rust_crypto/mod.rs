//! RustCrypto cryptographic provider implementation.
//!
//! A pure Rust backend built on crates from the
//! [RustCrypto](https://github.com/RustCrypto) organization. It is the
//! provider [`Config`](crate::Config) falls back to when none is set and no
//! process default was installed.
//!
//! ```
//! use std::sync::Arc;
//! use tlsengine::{Config, Engine};
//! use tlsengine::crypto::rust_crypto;
//!
//! let config = Arc::new(
//!     Config::builder()
//!         .with_crypto_provider(rust_crypto::default_provider())
//!         .build()
//!         .unwrap()
//! );
//! let engine = Engine::client(config);
//! # let _ = engine;
//! ```

mod cipher_suite;
mod hash;
mod hkdf;
mod hmac;
mod kx_group;
mod random;
mod sign;
mod tls12;

use crate::crypto::provider::CryptoProvider;

/// Get the default RustCrypto-based crypto provider.
///
/// # Supported Cipher Suites
///
/// - `TLS_AES_128_GCM_SHA256` (0x1301)
/// - `TLS_AES_256_GCM_SHA384` (0x1302)
/// - `TLS_CHACHA20_POLY1305_SHA256` (0x1303)
/// - `TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256` (0xC02B)
/// - `TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384` (0xC02C)
/// - `TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256` (0xCCA9)
///
/// # Supported Key Exchange Groups
///
/// - `x25519`
/// - `secp256r1` (P-256)
/// - `secp384r1` (P-384)
///
/// # Supported Signature Schemes
///
/// - `ecdsa_secp256r1_sha256`
/// - `ecdsa_secp384r1_sha384`
///
/// # Key Formats
///
/// The key provider loads PKCS#8 DER, SEC1 DER and PEM encoded versions of
/// both.
pub fn default_provider() -> CryptoProvider {
    CryptoProvider {
        cipher_suites: cipher_suite::ALL_CIPHER_SUITES,
        kx_groups: kx_group::ALL_KX_GROUPS,
        signature_verification: &sign::SIGNATURE_VERIFIER,
        key_provider: &sign::KEY_PROVIDER,
        secure_random: &random::SECURE_RANDOM,
        hash_provider: &hash::HASH_PROVIDER,
        hmac_provider: &hmac::HMAC_PROVIDER,
        prf_provider: &tls12::PRF_PROVIDER,
        hkdf_provider: &hkdf::HKDF_PROVIDER,
    }
}
