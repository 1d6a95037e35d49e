//! Key exchange group implementations using RustCrypto.

use p256::{ecdh::EphemeralSecret, PublicKey as P256PublicKey};
use p384::{ecdh::EphemeralSecret as P384EphemeralSecret, PublicKey as P384PublicKey};
use rand::rngs::OsRng;

use crate::crypto::provider::{ActiveKeyExchange, SupportedKxGroup};
use crate::error::CryptoError;
use crate::types::NamedGroup;

/// ECDHE key exchange implementation.
enum EcdhKeyExchange {
    P256 {
        secret: EphemeralSecret,
        public_key: Vec<u8>,
    },
    P384 {
        secret: P384EphemeralSecret,
        public_key: Vec<u8>,
    },
    X25519 {
        secret: x25519_dalek::EphemeralSecret,
        public_key: Vec<u8>,
    },
}

impl std::fmt::Debug for EcdhKeyExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EcdhKeyExchange::P256 { .. } => "EcdhKeyExchange::P256",
            EcdhKeyExchange::P384 { .. } => "EcdhKeyExchange::P384",
            EcdhKeyExchange::X25519 { .. } => "EcdhKeyExchange::X25519",
        };
        f.debug_struct(name)
            .field("public_key_len", &self.pub_key().len())
            .finish_non_exhaustive()
    }
}

impl EcdhKeyExchange {
    fn new(group: NamedGroup) -> Result<Self, CryptoError> {
        match group {
            NamedGroup::Secp256r1 => {
                let secret = EphemeralSecret::random(&mut OsRng);
                let public_key = P256PublicKey::from(&secret).to_sec1_bytes().to_vec();
                Ok(EcdhKeyExchange::P256 { secret, public_key })
            }
            NamedGroup::Secp384r1 => {
                let secret = P384EphemeralSecret::random(&mut OsRng);
                let public_key = P384PublicKey::from(&secret).to_sec1_bytes().to_vec();
                Ok(EcdhKeyExchange::P384 { secret, public_key })
            }
            NamedGroup::X25519 => {
                let secret = x25519_dalek::EphemeralSecret::random_from_rng(OsRng);
                let public_key = x25519_dalek::PublicKey::from(&secret).as_bytes().to_vec();
                Ok(EcdhKeyExchange::X25519 { secret, public_key })
            }
            _ => Err(CryptoError::UnsupportedAlgorithm(format!(
                "key exchange group {:?}",
                group
            ))),
        }
    }
}

impl ActiveKeyExchange for EcdhKeyExchange {
    fn pub_key(&self) -> &[u8] {
        match self {
            EcdhKeyExchange::P256 { public_key, .. } => public_key,
            EcdhKeyExchange::P384 { public_key, .. } => public_key,
            EcdhKeyExchange::X25519 { public_key, .. } => public_key,
        }
    }

    fn complete(self: Box<Self>, peer_pub: &[u8]) -> Result<Vec<u8>, CryptoError> {
        match *self {
            EcdhKeyExchange::P256 { secret, .. } => {
                let peer_key = P256PublicKey::from_sec1_bytes(peer_pub).map_err(|_| {
                    CryptoError::VerificationFailed("invalid P-256 public key".to_string())
                })?;
                let shared = secret.diffie_hellman(&peer_key);
                Ok(shared.raw_secret_bytes().to_vec())
            }
            EcdhKeyExchange::P384 { secret, .. } => {
                let peer_key = P384PublicKey::from_sec1_bytes(peer_pub).map_err(|_| {
                    CryptoError::VerificationFailed("invalid P-384 public key".to_string())
                })?;
                let shared = secret.diffie_hellman(&peer_key);
                Ok(shared.raw_secret_bytes().to_vec())
            }
            EcdhKeyExchange::X25519 { secret, .. } => {
                let bytes: [u8; 32] = peer_pub.try_into().map_err(|_| {
                    CryptoError::VerificationFailed("invalid X25519 public key".to_string())
                })?;
                let shared = secret.diffie_hellman(&x25519_dalek::PublicKey::from(bytes));
                if !shared.was_contributory() {
                    return Err(CryptoError::VerificationFailed(
                        "X25519 shared secret is all zero".to_string(),
                    ));
                }
                Ok(shared.as_bytes().to_vec())
            }
        }
    }

    fn group(&self) -> NamedGroup {
        match self {
            EcdhKeyExchange::P256 { .. } => NamedGroup::Secp256r1,
            EcdhKeyExchange::P384 { .. } => NamedGroup::Secp384r1,
            EcdhKeyExchange::X25519 { .. } => NamedGroup::X25519,
        }
    }
}

#[derive(Debug)]
struct KxGroup(NamedGroup);

impl SupportedKxGroup for KxGroup {
    fn name(&self) -> NamedGroup {
        self.0
    }

    fn start_exchange(&self) -> Result<Box<dyn ActiveKeyExchange>, CryptoError> {
        Ok(Box::new(EcdhKeyExchange::new(self.0)?))
    }
}

static KX_GROUP_X25519: KxGroup = KxGroup(NamedGroup::X25519);
static KX_GROUP_P256: KxGroup = KxGroup(NamedGroup::Secp256r1);
static KX_GROUP_P384: KxGroup = KxGroup(NamedGroup::Secp384r1);

/// All supported key exchange groups, in preference order.
pub(super) static ALL_KX_GROUPS: &[&dyn SupportedKxGroup] =
    &[&KX_GROUP_X25519, &KX_GROUP_P256, &KX_GROUP_P384];

#[cfg(test)]
mod tests {
    use super::*;

    fn agree(group: NamedGroup) {
        let a = KxGroup(group).start_exchange().unwrap();
        let b = KxGroup(group).start_exchange().unwrap();
        let a_pub = a.pub_key().to_vec();
        let b_pub = b.pub_key().to_vec();
        assert_eq!(a.complete(&b_pub).unwrap(), b.complete(&a_pub).unwrap());
    }

    #[test]
    fn all_groups_agree() {
        agree(NamedGroup::X25519);
        agree(NamedGroup::Secp256r1);
        agree(NamedGroup::Secp384r1);
    }

    #[test]
    fn garbage_peer_key_is_rejected() {
        let a = KxGroup(NamedGroup::Secp256r1).start_exchange().unwrap();
        let err = a.complete(&[4, 1, 2, 3]).unwrap_err();
        assert!(matches!(err, CryptoError::VerificationFailed(_)));
    }
}
