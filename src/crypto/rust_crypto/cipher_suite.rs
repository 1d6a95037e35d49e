//! Cipher suite implementations using RustCrypto.

use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Key, Nonce};
use chacha20poly1305::ChaCha20Poly1305;

use crate::crypto::provider::{Cipher, SupportedCipherSuite};
use crate::error::CryptoError;
use crate::types::{CipherSuite, HashAlgorithm};

/// AES-GCM cipher implementation using RustCrypto.
enum AesGcm {
    Aes128(Box<Aes128Gcm>),
    Aes256(Box<Aes256Gcm>),
}

impl std::fmt::Debug for AesGcm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AesGcm::Aes128(_) => f.debug_tuple("AesGcm::Aes128").finish(),
            AesGcm::Aes256(_) => f.debug_tuple("AesGcm::Aes256").finish(),
        }
    }
}

impl AesGcm {
    fn new(key: &[u8]) -> Result<Self, CryptoError> {
        match key.len() {
            16 => {
                let key = Key::<Aes128Gcm>::from_slice(key);
                Ok(AesGcm::Aes128(Box::new(Aes128Gcm::new(key))))
            }
            32 => {
                let key = Key::<Aes256Gcm>::from_slice(key);
                Ok(AesGcm::Aes256(Box::new(Aes256Gcm::new(key))))
            }
            n => Err(CryptoError::BadKey(format!("invalid AES-GCM key size: {}", n))),
        }
    }
}

fn check_nonce(nonce: &[u8]) -> Result<(), CryptoError> {
    if nonce.len() != 12 {
        return Err(CryptoError::Provider(format!(
            "invalid nonce length: expected 12, got {}",
            nonce.len()
        )));
    }
    Ok(())
}

impl Cipher for AesGcm {
    fn encrypt(&self, nonce: &[u8], aad: &[u8], buf: &mut Vec<u8>) -> Result<(), CryptoError> {
        check_nonce(nonce)?;
        let nonce = Nonce::from_slice(nonce);
        let res = match self {
            AesGcm::Aes128(cipher) => cipher.encrypt_in_place(nonce, aad, buf),
            AesGcm::Aes256(cipher) => cipher.encrypt_in_place(nonce, aad, buf),
        };
        res.map_err(|_| CryptoError::Provider("AES-GCM encryption failed".to_string()))
    }

    fn decrypt(&self, nonce: &[u8], aad: &[u8], buf: &mut Vec<u8>) -> Result<(), CryptoError> {
        check_nonce(nonce)?;
        if buf.len() < 16 {
            return Err(CryptoError::DecryptFailed);
        }
        let nonce = Nonce::from_slice(nonce);
        // decrypt_in_place strips the tag on success
        let res = match self {
            AesGcm::Aes128(cipher) => cipher.decrypt_in_place(nonce, aad, buf),
            AesGcm::Aes256(cipher) => cipher.decrypt_in_place(nonce, aad, buf),
        };
        res.map_err(|_| CryptoError::DecryptFailed)
    }

    fn tag_len(&self) -> usize {
        16
    }
}

/// ChaCha20-Poly1305 (RFC 8439) cipher implementation using RustCrypto.
struct ChaCha(Box<ChaCha20Poly1305>);

impl std::fmt::Debug for ChaCha {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ChaCha20Poly1305").finish()
    }
}

impl Cipher for ChaCha {
    fn encrypt(&self, nonce: &[u8], aad: &[u8], buf: &mut Vec<u8>) -> Result<(), CryptoError> {
        check_nonce(nonce)?;
        let nonce = chacha20poly1305::Nonce::from_slice(nonce);
        self.0
            .encrypt_in_place(nonce, aad, buf)
            .map_err(|_| CryptoError::Provider("ChaCha20-Poly1305 encryption failed".to_string()))
    }

    fn decrypt(&self, nonce: &[u8], aad: &[u8], buf: &mut Vec<u8>) -> Result<(), CryptoError> {
        check_nonce(nonce)?;
        if buf.len() < 16 {
            return Err(CryptoError::DecryptFailed);
        }
        let nonce = chacha20poly1305::Nonce::from_slice(nonce);
        self.0
            .decrypt_in_place(nonce, aad, buf)
            .map_err(|_| CryptoError::DecryptFailed)
    }

    fn tag_len(&self) -> usize {
        16
    }
}

#[derive(Debug, Clone, Copy)]
enum Aead {
    AesGcm,
    ChaCha20Poly1305,
}

/// One AEAD cipher suite, described by its parameters.
#[derive(Debug)]
struct AeadSuite {
    suite: CipherSuite,
    aead: Aead,
    hash: HashAlgorithm,
    key_len: usize,
    /// 4 byte salt for TLS 1.2 GCM, otherwise the whole 12 byte nonce.
    fixed_iv_len: usize,
}

impl SupportedCipherSuite for AeadSuite {
    fn suite(&self) -> CipherSuite {
        self.suite
    }

    fn hash_algorithm(&self) -> HashAlgorithm {
        self.hash
    }

    fn key_len(&self) -> usize {
        self.key_len
    }

    fn fixed_iv_len(&self) -> usize {
        self.fixed_iv_len
    }

    fn create_cipher(&self, key: &[u8]) -> Result<Box<dyn Cipher>, CryptoError> {
        if key.len() != self.key_len {
            return Err(CryptoError::BadKey(format!(
                "{} needs a {} byte key, got {}",
                self.suite,
                self.key_len,
                key.len()
            )));
        }
        match self.aead {
            Aead::AesGcm => Ok(Box::new(AesGcm::new(key)?)),
            Aead::ChaCha20Poly1305 => {
                let key = chacha20poly1305::Key::from_slice(key);
                Ok(Box::new(ChaCha(Box::new(ChaCha20Poly1305::new(key)))))
            }
        }
    }
}

static TLS13_AES_128_GCM_SHA256: AeadSuite = AeadSuite {
    suite: CipherSuite::AES_128_GCM_SHA256,
    aead: Aead::AesGcm,
    hash: HashAlgorithm::SHA256,
    key_len: 16,
    fixed_iv_len: 12,
};

static TLS13_AES_256_GCM_SHA384: AeadSuite = AeadSuite {
    suite: CipherSuite::AES_256_GCM_SHA384,
    aead: Aead::AesGcm,
    hash: HashAlgorithm::SHA384,
    key_len: 32,
    fixed_iv_len: 12,
};

static ECDHE_ECDSA_AES128_GCM_SHA256: AeadSuite = AeadSuite {
    suite: CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256,
    aead: Aead::AesGcm,
    hash: HashAlgorithm::SHA256,
    key_len: 16,
    fixed_iv_len: 4,
};

static ECDHE_ECDSA_AES256_GCM_SHA384: AeadSuite = AeadSuite {
    suite: CipherSuite::ECDHE_ECDSA_AES256_GCM_SHA384,
    aead: Aead::AesGcm,
    hash: HashAlgorithm::SHA384,
    key_len: 32,
    fixed_iv_len: 4,
};

static TLS13_CHACHA20_POLY1305_SHA256: AeadSuite = AeadSuite {
    suite: CipherSuite::CHACHA20_POLY1305_SHA256,
    aead: Aead::ChaCha20Poly1305,
    hash: HashAlgorithm::SHA256,
    key_len: 32,
    fixed_iv_len: 12,
};

// No explicit nonce on the wire (RFC 7905)
static ECDHE_ECDSA_CHACHA20_POLY1305_SHA256: AeadSuite = AeadSuite {
    suite: CipherSuite::ECDHE_ECDSA_CHACHA20_POLY1305_SHA256,
    aead: Aead::ChaCha20Poly1305,
    hash: HashAlgorithm::SHA256,
    key_len: 32,
    fixed_iv_len: 12,
};

/// All supported cipher suites, TLS 1.3 first.
pub(super) static ALL_CIPHER_SUITES: &[&dyn SupportedCipherSuite] = &[
    &TLS13_AES_128_GCM_SHA256,
    &TLS13_AES_256_GCM_SHA384,
    &TLS13_CHACHA20_POLY1305_SHA256,
    &ECDHE_ECDSA_AES128_GCM_SHA256,
    &ECDHE_ECDSA_AES256_GCM_SHA384,
    &ECDHE_ECDSA_CHACHA20_POLY1305_SHA256,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open() {
        let cipher = ECDHE_ECDSA_AES128_GCM_SHA256
            .create_cipher(&[7u8; 16])
            .unwrap();
        let nonce = [1u8; 12];
        let mut buf = b"hello".to_vec();
        cipher.encrypt(&nonce, b"aad", &mut buf).unwrap();
        assert_eq!(buf.len(), 5 + cipher.tag_len());

        cipher.decrypt(&nonce, b"aad", &mut buf).unwrap();
        assert_eq!(buf, b"hello");
    }

    #[test]
    fn tampered_aad_fails() {
        let cipher = TLS13_AES_256_GCM_SHA384.create_cipher(&[3u8; 32]).unwrap();
        let nonce = [0u8; 12];
        let mut buf = b"payload".to_vec();
        cipher.encrypt(&nonce, b"one", &mut buf).unwrap();
        assert_eq!(
            cipher.decrypt(&nonce, b"two", &mut buf),
            Err(CryptoError::DecryptFailed)
        );
    }

    #[test]
    fn chacha_seal_open() {
        let cipher = TLS13_CHACHA20_POLY1305_SHA256
            .create_cipher(&[5u8; 32])
            .unwrap();
        let nonce = [2u8; 12];
        let mut buf = b"poly".to_vec();
        cipher.encrypt(&nonce, b"aad", &mut buf).unwrap();
        assert_eq!(buf.len(), 4 + cipher.tag_len());

        let mut tampered = buf.clone();
        tampered[0] ^= 1;
        assert_eq!(
            cipher.decrypt(&nonce, b"aad", &mut tampered),
            Err(CryptoError::DecryptFailed)
        );

        cipher.decrypt(&nonce, b"aad", &mut buf).unwrap();
        assert_eq!(buf, b"poly");
    }

    #[test]
    fn wrong_key_len_is_bad_key() {
        let err = TLS13_AES_128_GCM_SHA256.create_cipher(&[0u8; 32]).unwrap_err();
        assert!(matches!(err, CryptoError::BadKey(_)));
    }
}
