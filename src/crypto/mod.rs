//! Cryptographic capabilities used by the engine.
//!
//! The traits in [`provider`] are the only way the engine touches
//! primitives. [`rust_crypto`] is the bundled implementation. Credential
//! selection and trust decisions live in [`credentials`].

mod context;
pub mod credentials;
pub(crate) mod key_schedule;
pub mod provider;
pub mod rust_crypto;

pub(crate) use context::{validate_cipher_suites, validate_protocols, CryptoContext};

pub use provider::{
    ActiveKeyExchange, Cipher, CryptoProvider, CryptoSafe, HashContext, HashProvider,
};
pub use provider::{HkdfProvider, HmacProvider, KeyProvider, PrfProvider};
pub use provider::{SecureRandom, SignatureVerifier, SigningKey};
pub use provider::{SupportedCipherSuite, SupportedKxGroup};

pub use crate::error::CryptoError;
pub use crate::types::{CipherSuite, HashAlgorithm, NamedGroup, SignatureScheme};
