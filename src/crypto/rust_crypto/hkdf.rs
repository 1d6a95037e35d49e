//! HKDF implementation using RustCrypto crates for TLS 1.3 key derivation.

use hkdf::Hkdf;
use sha2::{Sha256, Sha384};

use crate::crypto::provider::HkdfProvider;
use crate::error::CryptoError;
use crate::types::HashAlgorithm;

/// HKDF provider implementation using RustCrypto.
#[derive(Debug)]
pub(super) struct RustCryptoHkdfProvider;

impl HkdfProvider for RustCryptoHkdfProvider {
    fn hkdf_extract(
        &self,
        hash: HashAlgorithm,
        salt: &[u8],
        ikm: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let salt = if salt.is_empty() { None } else { Some(salt) };
        let prk = match hash {
            HashAlgorithm::SHA256 => Hkdf::<Sha256>::extract(salt, ikm).0.to_vec(),
            HashAlgorithm::SHA384 => Hkdf::<Sha384>::extract(salt, ikm).0.to_vec(),
        };
        Ok(prk)
    }

    fn hkdf_expand(
        &self,
        hash: HashAlgorithm,
        prk: &[u8],
        info: &[u8],
        output_len: usize,
    ) -> Result<Vec<u8>, CryptoError> {
        let mut output = vec![0u8; output_len];
        let invalid_prk = |e| CryptoError::BadKey(format!("invalid PRK: {:?}", e));
        let expand_failed = |e| CryptoError::Provider(format!("HKDF expand failed: {:?}", e));

        match hash {
            HashAlgorithm::SHA256 => Hkdf::<Sha256>::from_prk(prk)
                .map_err(invalid_prk)?
                .expand(info, &mut output)
                .map_err(expand_failed)?,
            HashAlgorithm::SHA384 => Hkdf::<Sha384>::from_prk(prk)
                .map_err(invalid_prk)?
                .expand(info, &mut output)
                .map_err(expand_failed)?,
        }

        Ok(output)
    }
}

/// Static instance of the HKDF provider.
pub(super) static HKDF_PROVIDER: RustCryptoHkdfProvider = RustCryptoHkdfProvider;
