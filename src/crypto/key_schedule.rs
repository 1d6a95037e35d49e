//! Key derivation for both protocol versions.
//!
//! TLS 1.2 (RFC 5246 section 6.3, 7.4.9):
//!
//! ```text
//! master_secret = PRF(pre_master_secret, "master secret",
//!                     ClientHello.random + ServerHello.random)[0..47]
//! key_block     = PRF(master_secret, "key expansion",
//!                     server_random + client_random)
//! verify_data   = PRF(master_secret, finished_label, Hash(handshake_messages))[0..11]
//! ```
//!
//! TLS 1.3 (RFC 8446 section 7.1), without PSKs:
//!
//! ```text
//!              0
//!              v
//!     0 -> HKDF-Extract = Early Secret
//!              v
//!        Derive-Secret(., "derived", "")
//!              v
//! (EC)DHE -> HKDF-Extract = Handshake Secret
//!              +-----> Derive-Secret(., "c hs traffic", ClientHello...ServerHello)
//!              +-----> Derive-Secret(., "s hs traffic", ClientHello...ServerHello)
//!              v
//!        Derive-Secret(., "derived", "")
//!              v
//!     0 -> HKDF-Extract = Master Secret
//!              +-----> Derive-Secret(., "c ap traffic", ClientHello...server Finished)
//!              +-----> Derive-Secret(., "s ap traffic", ClientHello...server Finished)
//!              +-----> Derive-Secret(., "res master", ClientHello...client Finished)
//! ```

use zeroize::Zeroizing;

use crate::crypto::provider::{CryptoProvider, SupportedCipherSuite};
use crate::error::CryptoError;
use crate::types::HashAlgorithm;

/// Secret material, wiped on drop.
pub(crate) type Secret = Zeroizing<Vec<u8>>;

pub(crate) fn hash(provider: &CryptoProvider, alg: HashAlgorithm, data: &[u8]) -> Vec<u8> {
    let mut ctx = provider.hash_provider.create_hash(alg);
    ctx.update(data);
    ctx.clone_and_finalize()
}

pub(crate) fn tls12_master_secret(
    provider: &CryptoProvider,
    hash: HashAlgorithm,
    pre_master_secret: &[u8],
    client_random: &[u8; 32],
    server_random: &[u8; 32],
) -> Result<Secret, CryptoError> {
    let mut seed = [0u8; 64];
    seed[..32].copy_from_slice(client_random);
    seed[32..].copy_from_slice(server_random);
    let out = provider
        .prf_provider
        .prf_tls12(hash, pre_master_secret, "master secret", &seed, 48)?;
    Ok(Zeroizing::new(out))
}

/// Traffic keys for one direction.
pub(crate) struct TrafficKey {
    pub key: Secret,
    pub iv: Secret,
}

/// Split the TLS 1.2 key block into (client write, server write).
pub(crate) fn tls12_key_block(
    provider: &CryptoProvider,
    suite: &dyn SupportedCipherSuite,
    master_secret: &[u8],
    client_random: &[u8; 32],
    server_random: &[u8; 32],
) -> Result<(TrafficKey, TrafficKey), CryptoError> {
    let key_len = suite.key_len();
    let iv_len = suite.fixed_iv_len();

    let mut seed = [0u8; 64];
    seed[..32].copy_from_slice(server_random);
    seed[32..].copy_from_slice(client_random);

    let block = Zeroizing::new(provider.prf_provider.prf_tls12(
        suite.hash_algorithm(),
        master_secret,
        "key expansion",
        &seed,
        2 * key_len + 2 * iv_len,
    )?);

    // GCM suites have no MAC keys
    let (client_key, rest) = block.split_at(key_len);
    let (server_key, rest) = rest.split_at(key_len);
    let (client_iv, server_iv) = rest.split_at(iv_len);

    Ok((
        TrafficKey {
            key: Zeroizing::new(client_key.to_vec()),
            iv: Zeroizing::new(client_iv.to_vec()),
        },
        TrafficKey {
            key: Zeroizing::new(server_key.to_vec()),
            iv: Zeroizing::new(server_iv.to_vec()),
        },
    ))
}

pub(crate) fn tls12_verify_data(
    provider: &CryptoProvider,
    hash: HashAlgorithm,
    master_secret: &[u8],
    client: bool,
    transcript_hash: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let label = if client {
        "client finished"
    } else {
        "server finished"
    };
    provider
        .prf_provider
        .prf_tls12(hash, master_secret, label, transcript_hash, 12)
}

/// TLS 1.3 key schedule, walking early, handshake and master secret.
pub(crate) struct KeySchedule {
    hash: HashAlgorithm,
    current: Secret,
}

impl KeySchedule {
    /// Start at the early secret with no PSK.
    pub fn new(provider: &CryptoProvider, hash: HashAlgorithm) -> Result<Self, CryptoError> {
        let zeros = vec![0u8; hash.output_len()];
        let early = provider.hkdf_provider.hkdf_extract(hash, &zeros, &zeros)?;
        Ok(KeySchedule {
            hash,
            current: Zeroizing::new(early),
        })
    }

    /// Move to the next stage: Extract(Derive-Secret(current, "derived", ""), ikm).
    ///
    /// An empty `ikm` stands for the all-zero input used for the master secret.
    pub fn advance(&mut self, provider: &CryptoProvider, ikm: &[u8]) -> Result<(), CryptoError> {
        let empty_hash = hash(provider, self.hash, &[]);
        let derived = self.derive_secret(provider, b"derived", &empty_hash)?;
        let zeros;
        let ikm = if ikm.is_empty() {
            zeros = vec![0u8; self.hash.output_len()];
            &zeros[..]
        } else {
            ikm
        };
        let next = provider.hkdf_provider.hkdf_extract(self.hash, &derived, ikm)?;
        self.current = Zeroizing::new(next);
        Ok(())
    }

    /// Derive-Secret(current, label, transcript_hash)
    pub fn derive_secret(
        &self,
        provider: &CryptoProvider,
        label: &[u8],
        transcript_hash: &[u8],
    ) -> Result<Secret, CryptoError> {
        let out = provider.hkdf_provider.hkdf_expand_label(
            self.hash,
            &self.current,
            label,
            transcript_hash,
            self.hash.output_len(),
        )?;
        Ok(Zeroizing::new(out))
    }
}

/// Record key and IV for a TLS 1.3 traffic secret.
pub(crate) fn tls13_traffic_key(
    provider: &CryptoProvider,
    suite: &dyn SupportedCipherSuite,
    secret: &[u8],
) -> Result<TrafficKey, CryptoError> {
    let hkdf = provider.hkdf_provider;
    let hash = suite.hash_algorithm();
    let key = hkdf.hkdf_expand_label(hash, secret, b"key", &[], suite.key_len())?;
    let iv = hkdf.hkdf_expand_label(hash, secret, b"iv", &[], suite.fixed_iv_len())?;
    Ok(TrafficKey {
        key: Zeroizing::new(key),
        iv: Zeroizing::new(iv),
    })
}

/// HMAC(finished_key, transcript_hash) for a handshake traffic secret.
pub(crate) fn tls13_verify_data(
    provider: &CryptoProvider,
    hash: HashAlgorithm,
    base_secret: &[u8],
    transcript_hash: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let finished_key = Zeroizing::new(provider.hkdf_provider.hkdf_expand_label(
        hash,
        base_secret,
        b"finished",
        &[],
        hash.output_len(),
    )?);
    provider
        .hmac_provider
        .hmac(hash, &finished_key, transcript_hash)
}

/// application_traffic_secret_N+1 (RFC 8446 section 7.2).
pub(crate) fn tls13_next_traffic_secret(
    provider: &CryptoProvider,
    hash: HashAlgorithm,
    secret: &[u8],
) -> Result<Secret, CryptoError> {
    let out = provider.hkdf_provider.hkdf_expand_label(
        hash,
        secret,
        b"traffic upd",
        &[],
        hash.output_len(),
    )?;
    Ok(Zeroizing::new(out))
}
