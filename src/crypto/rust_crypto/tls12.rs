//! TLS 1.2 PRF using RustCrypto.

use crate::crypto::provider::PrfProvider;
use crate::error::CryptoError;
use crate::types::HashAlgorithm;

use super::hmac;

/// PRF provider implementation for TLS 1.2.
#[derive(Debug)]
pub(super) struct RustCryptoPrfProvider;

impl PrfProvider for RustCryptoPrfProvider {
    fn prf_tls12(
        &self,
        hash: HashAlgorithm,
        secret: &[u8],
        label: &str,
        seed: &[u8],
        output_len: usize,
    ) -> Result<Vec<u8>, CryptoError> {
        if !label.is_ascii() {
            return Err(CryptoError::Provider("PRF label must be ASCII".to_string()));
        }

        let mut full_seed = Vec::with_capacity(label.len() + seed.len());
        full_seed.extend_from_slice(label.as_bytes());
        full_seed.extend_from_slice(seed);

        hmac::p_hash(hash, secret, &full_seed, output_len)
    }
}

/// Static instance of the PRF provider.
pub(super) static PRF_PROVIDER: RustCryptoPrfProvider = RustCryptoPrfProvider;
