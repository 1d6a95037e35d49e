use crate::alert::AlertDescription;
use crate::crypto::key_schedule::{self, Secret, TrafficKey};
use crate::crypto::provider::{ActiveKeyExchange, CryptoProvider, SigningKey};
use crate::crypto::provider::{SupportedCipherSuite, SupportedKxGroup};
use crate::error::CryptoError;
use crate::record::RecordProtection;
use crate::types::{CipherSuite, HashAlgorithm, NamedGroup, ProtocolVersion, SignatureScheme};
use crate::Error;

/// Crypto operations as the handshake needs them.
///
/// Wraps the provider and turns its [`CryptoError`]s into engine errors,
/// deciding who is to blame: failures caused by peer input become protocol
/// errors with an alert, failures of our own keys or provider stay
/// [`Error::Crypto`].
#[derive(Debug, Clone)]
pub(crate) struct CryptoContext {
    provider: CryptoProvider,
}

impl CryptoContext {
    pub fn new(provider: CryptoProvider) -> Self {
        CryptoContext { provider }
    }

    pub fn provider(&self) -> &CryptoProvider {
        &self.provider
    }

    pub fn random(&self) -> Result<[u8; 32], Error> {
        let mut out = [0u8; 32];
        self.provider.secure_random.fill(&mut out)?;
        Ok(out)
    }

    pub fn suite(&self, suite: CipherSuite) -> Option<&'static dyn SupportedCipherSuite> {
        self.provider.find_suite(suite)
    }

    pub fn kx_groups(&self) -> impl Iterator<Item = &'static dyn SupportedKxGroup> {
        self.provider.kx_groups.iter().copied()
    }

    pub fn start_exchange(&self, group: NamedGroup) -> Result<Box<dyn ActiveKeyExchange>, Error> {
        let kx = self.provider.find_kx_group(group).ok_or_else(|| {
            Error::protocol(
                AlertDescription::IllegalParameter,
                format!("unsupported key exchange group {:?}", group),
            )
        })?;
        Ok(kx.start_exchange()?)
    }

    /// Finish a key agreement with the peer's public key.
    pub fn complete_exchange(
        &self,
        kx: Box<dyn ActiveKeyExchange>,
        peer_pub: &[u8],
    ) -> Result<Secret, Error> {
        match kx.complete(peer_pub) {
            Ok(secret) => Ok(Secret::new(secret)),
            Err(CryptoError::VerificationFailed(reason)) => {
                Err(Error::protocol(AlertDescription::IllegalParameter, reason))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn load_signing_key(&self, key_der: &[u8]) -> Result<Box<dyn SigningKey>, Error> {
        Ok(self.provider.key_provider.load_private_key(key_der)?)
    }

    /// Check a peer signature made with the key in `cert_der`.
    pub fn verify(
        &self,
        cert_der: &[u8],
        data: &[u8],
        signature: &[u8],
        scheme: SignatureScheme,
    ) -> Result<(), Error> {
        self.provider
            .signature_verification
            .verify_signature(cert_der, data, signature, scheme)
            .map_err(|e| match e {
                CryptoError::UnsupportedAlgorithm(reason) => {
                    Error::protocol(AlertDescription::UnsupportedCertificate, reason)
                }
                e => Error::protocol(AlertDescription::DecryptError, e.to_string()),
            })
    }

    pub fn hash(&self, alg: HashAlgorithm, data: &[u8]) -> Vec<u8> {
        key_schedule::hash(&self.provider, alg, data)
    }

    /// Record protection for one direction with freshly derived keys.
    pub fn record_protection(
        &self,
        version: ProtocolVersion,
        suite: &dyn SupportedCipherSuite,
        key: TrafficKey,
    ) -> Result<RecordProtection, Error> {
        let cipher = suite.create_cipher(&key.key)?;
        Ok(RecordProtection::new(version, cipher, key.iv))
    }
}

/// Keep the suites the provider implements, failing when none is left.
pub(crate) fn validate_cipher_suites(
    provider: &CryptoProvider,
    suites: &[CipherSuite],
) -> Result<Vec<CipherSuite>, Error> {
    if suites.is_empty() {
        return Err(Error::ConfigError("empty cipher suite list".to_string()));
    }

    let mut out = Vec::with_capacity(suites.len());
    for suite in suites {
        if provider.find_suite(*suite).is_none() {
            warn!("Ignoring unsupported cipher suite: {}", suite);
            continue;
        }
        if !out.contains(suite) {
            out.push(*suite);
        }
    }

    if out.is_empty() {
        return Err(Error::ConfigError(
            "none of the cipher suites is supported".to_string(),
        ));
    }
    Ok(out)
}

/// Keep the negotiable versions, failing when none is left.
pub(crate) fn validate_protocols(
    protocols: &[ProtocolVersion],
) -> Result<Vec<ProtocolVersion>, Error> {
    if protocols.is_empty() {
        return Err(Error::ConfigError("empty protocol list".to_string()));
    }

    let mut out: Vec<ProtocolVersion> = Vec::with_capacity(protocols.len());
    for version in protocols {
        if !version.is_supported() {
            warn!("Ignoring unsupported protocol version: {}", version);
            continue;
        }
        if !out.contains(version) {
            out.push(*version);
        }
    }

    if out.is_empty() {
        return Err(Error::ConfigError(
            "none of the protocol versions is supported".to_string(),
        ));
    }
    Ok(out)
}
