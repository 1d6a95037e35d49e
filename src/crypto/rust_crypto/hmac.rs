//! HMAC and the TLS 1.2 P_hash construction using RustCrypto.

use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha384};

use crate::crypto::provider::HmacProvider;
use crate::error::CryptoError;
use crate::types::HashAlgorithm;

fn invalid_key<E>(_: E) -> CryptoError {
    CryptoError::BadKey("invalid HMAC key length".to_string())
}

/// P_hash(secret, seed) from RFC 5246 section 5.
pub(super) fn p_hash(
    hash_alg: HashAlgorithm,
    secret: &[u8],
    full_seed: &[u8],
    output_len: usize,
) -> Result<Vec<u8>, CryptoError> {
    match hash_alg {
        HashAlgorithm::SHA256 => p_hash_with::<Hmac<Sha256>>(secret, full_seed, output_len),
        HashAlgorithm::SHA384 => p_hash_with::<Hmac<Sha384>>(secret, full_seed, output_len),
    }
}

fn p_hash_with<M: Mac + hmac::digest::KeyInit + Clone>(
    secret: &[u8],
    full_seed: &[u8],
    output_len: usize,
) -> Result<Vec<u8>, CryptoError> {
    let mut out = Vec::with_capacity(output_len);
    let keyed = <M as Mac>::new_from_slice(secret).map_err(invalid_key)?;

    // A(1) = HMAC_hash(secret, A(0)) where A(0) = seed
    let mut a = {
        let mut mac = keyed.clone();
        mac.update(full_seed);
        mac.finalize().into_bytes()
    };

    while out.len() < output_len {
        // HMAC_hash(secret, A(i) + seed)
        let mut mac = keyed.clone();
        mac.update(&a);
        mac.update(full_seed);
        let output = mac.finalize().into_bytes();

        let to_copy = (output_len - out.len()).min(output.len());
        out.extend_from_slice(&output[..to_copy]);

        if out.len() < output_len {
            // A(i+1) = HMAC_hash(secret, A(i))
            let mut mac = keyed.clone();
            mac.update(&a);
            a = mac.finalize().into_bytes();
        }
    }

    Ok(out)
}

/// HMAC provider implementation.
#[derive(Debug)]
pub(super) struct RustCryptoHmacProvider;

impl HmacProvider for RustCryptoHmacProvider {
    fn hmac(&self, hash: HashAlgorithm, key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        match hash {
            HashAlgorithm::SHA256 => {
                let mut mac =
                    <Hmac<Sha256> as Mac>::new_from_slice(key).map_err(invalid_key)?;
                mac.update(data);
                Ok(mac.finalize().into_bytes().to_vec())
            }
            HashAlgorithm::SHA384 => {
                let mut mac =
                    <Hmac<Sha384> as Mac>::new_from_slice(key).map_err(invalid_key)?;
                mac.update(data);
                Ok(mac.finalize().into_bytes().to_vec())
            }
        }
    }
}

/// Static instance of the HMAC provider.
pub(super) static HMAC_PROVIDER: RustCryptoHmacProvider = RustCryptoHmacProvider;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn p_hash_truncates_to_requested_len() {
        let out = p_hash(HashAlgorithm::SHA256, b"secret", b"seed", 100).unwrap();
        assert_eq!(out.len(), 100);
        let shorter = p_hash(HashAlgorithm::SHA256, b"secret", b"seed", 40).unwrap();
        assert_eq!(&out[..40], &shorter[..]);
    }

    #[test]
    fn hmac_sha256_rfc4231_case_2() {
        let out = HMAC_PROVIDER
            .hmac(
                HashAlgorithm::SHA256,
                b"Jefe",
                b"what do ya want for nothing?",
            )
            .unwrap();
        assert_eq!(out[..4], [0x5b, 0xdc, 0xc1, 0x46]);
    }
}
