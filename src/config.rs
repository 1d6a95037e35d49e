use std::fmt;
use std::sync::Arc;

use crate::crypto::credentials::{KeyManager, TrustManager};
use crate::crypto::{rust_crypto, validate_cipher_suites, validate_protocols, CryptoProvider};
use crate::session::SessionCache;
use crate::types::{CipherSuite, ProtocolVersion};
use crate::Error;

/// TLS engine configuration
///
/// Shared between engines as `Arc<Config>`. The enabled protocol and cipher
/// suite lists are the defaults for new engines; each engine can narrow
/// them for its next handshake.
#[derive(Clone)]
pub struct Config {
    crypto_provider: CryptoProvider,
    key_manager: Option<Arc<dyn KeyManager>>,
    trust_manager: Option<Arc<dyn TrustManager>>,
    enabled_protocols: Vec<ProtocolVersion>,
    enabled_cipher_suites: Vec<CipherSuite>,
    accept_large_fragments: bool,
    allow_renegotiation: bool,
    session_tickets: usize,
    max_handshake_message_size: usize,
    max_certificate_chain_length: usize,
    session_cache: Arc<SessionCache>,
}

impl Config {
    /// Create a new configuration builder.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder {
            crypto_provider: None,
            key_manager: None,
            trust_manager: None,
            enabled_protocols: None,
            enabled_cipher_suites: None,
            accept_large_fragments: false,
            allow_renegotiation: true,
            session_tickets: 1,
            max_handshake_message_size: 32768,
            max_certificate_chain_length: 10,
            session_cache_size: 256,
            session_cache: None,
        }
    }

    /// Cryptographic provider.
    ///
    /// Provides all cryptographic operations (ciphers, key exchange, signing, etc.).
    #[inline(always)]
    pub fn crypto_provider(&self) -> &CryptoProvider {
        &self.crypto_provider
    }

    /// Source of our certificate chain and private key.
    ///
    /// A server without one cannot complete any handshake. A client without
    /// one answers a CertificateRequest with an empty chain.
    #[inline(always)]
    pub fn key_manager(&self) -> Option<&dyn KeyManager> {
        self.key_manager.as_deref()
    }

    /// Decides whether the peer's chain is trusted.
    ///
    /// Without one every presented chain is rejected with certificate_unknown.
    #[inline(always)]
    pub fn trust_manager(&self) -> Option<&dyn TrustManager> {
        self.trust_manager.as_deref()
    }

    /// Protocol versions enabled for new engines, most preferred first.
    #[inline(always)]
    pub fn enabled_protocols(&self) -> &[ProtocolVersion] {
        &self.enabled_protocols
    }

    /// Cipher suites enabled for new engines, most preferred first.
    #[inline(always)]
    pub fn enabled_cipher_suites(&self) -> &[CipherSuite] {
        &self.enabled_cipher_suites
    }

    /// Accept and produce records with up to 32768 bytes of plaintext.
    #[inline(always)]
    pub fn accept_large_fragments(&self) -> bool {
        self.accept_large_fragments
    }

    /// Whether TLS 1.2 renegotiation is allowed, in either direction.
    #[inline(always)]
    pub fn allow_renegotiation(&self) -> bool {
        self.allow_renegotiation
    }

    /// NewSessionTicket messages a TLS 1.3 server sends after the handshake.
    #[inline(always)]
    pub fn session_tickets(&self) -> usize {
        self.session_tickets
    }

    /// Largest handshake message body accepted from the peer.
    #[inline(always)]
    pub fn max_handshake_message_size(&self) -> usize {
        self.max_handshake_message_size
    }

    /// Longest certificate chain accepted from the peer.
    #[inline(always)]
    pub fn max_certificate_chain_length(&self) -> usize {
        self.max_certificate_chain_length
    }

    /// Sessions available for TLS 1.2 resumption.
    #[inline(always)]
    pub fn session_cache(&self) -> &Arc<SessionCache> {
        &self.session_cache
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("enabled_protocols", &self.enabled_protocols)
            .field("enabled_cipher_suites", &self.enabled_cipher_suites)
            .field("accept_large_fragments", &self.accept_large_fragments)
            .field("allow_renegotiation", &self.allow_renegotiation)
            .field("session_tickets", &self.session_tickets)
            .field("key_manager", &self.key_manager)
            .field("trust_manager", &self.trust_manager)
            .finish_non_exhaustive()
    }
}

/// Builder for TLS engine configuration.
pub struct ConfigBuilder {
    crypto_provider: Option<CryptoProvider>,
    key_manager: Option<Arc<dyn KeyManager>>,
    trust_manager: Option<Arc<dyn TrustManager>>,
    enabled_protocols: Option<Vec<ProtocolVersion>>,
    enabled_cipher_suites: Option<Vec<CipherSuite>>,
    accept_large_fragments: bool,
    allow_renegotiation: bool,
    session_tickets: usize,
    max_handshake_message_size: usize,
    max_certificate_chain_length: usize,
    session_cache_size: usize,
    session_cache: Option<Arc<SessionCache>>,
}

impl ConfigBuilder {
    /// Set a custom crypto provider.
    ///
    /// If not set, the process default is used, falling back to the bundled
    /// RustCrypto provider.
    pub fn with_crypto_provider(mut self, provider: CryptoProvider) -> Self {
        self.crypto_provider = Some(provider);
        self
    }

    /// Set the source of our certificate chain and private key.
    pub fn with_key_manager(mut self, key_manager: Arc<dyn KeyManager>) -> Self {
        self.key_manager = Some(key_manager);
        self
    }

    /// Set the policy deciding whether peer chains are trusted.
    pub fn with_trust_manager(mut self, trust_manager: Arc<dyn TrustManager>) -> Self {
        self.trust_manager = Some(trust_manager);
        self
    }

    /// Set the protocol versions enabled for new engines.
    ///
    /// Unsupported versions are dropped. Defaults to TLS 1.3 and TLS 1.2.
    pub fn enabled_protocols(mut self, protocols: &[ProtocolVersion]) -> Self {
        self.enabled_protocols = Some(protocols.to_vec());
        self
    }

    /// Set the cipher suites enabled for new engines.
    ///
    /// Suites the provider does not implement are dropped. Defaults to every
    /// suite of the provider.
    pub fn enabled_cipher_suites(mut self, suites: &[CipherSuite]) -> Self {
        self.enabled_cipher_suites = Some(suites.to_vec());
        self
    }

    /// Set whether records with up to 32768 bytes of plaintext are accepted.
    ///
    /// Defaults to false.
    pub fn accept_large_fragments(mut self, accept: bool) -> Self {
        self.accept_large_fragments = accept;
        self
    }

    /// Set whether TLS 1.2 renegotiation is allowed.
    ///
    /// Defaults to true.
    pub fn allow_renegotiation(mut self, allow: bool) -> Self {
        self.allow_renegotiation = allow;
        self
    }

    /// Set the number of TLS 1.3 session tickets a server sends.
    ///
    /// Defaults to 1.
    pub fn session_tickets(mut self, count: usize) -> Self {
        self.session_tickets = count;
        self
    }

    /// Set the largest handshake message body accepted from the peer.
    ///
    /// Defaults to 32768.
    pub fn max_handshake_message_size(mut self, size: usize) -> Self {
        self.max_handshake_message_size = size;
        self
    }

    /// Set the longest certificate chain accepted from the peer.
    ///
    /// Defaults to 10.
    pub fn max_certificate_chain_length(mut self, len: usize) -> Self {
        self.max_certificate_chain_length = len;
        self
    }

    /// Set the capacity of the session cache created by `build()`.
    ///
    /// 0 means unbounded. Defaults to 256.
    pub fn session_cache_size(mut self, size: usize) -> Self {
        self.session_cache_size = size;
        self
    }

    /// Share an existing session cache, e.g. between two configs.
    pub fn with_session_cache(mut self, cache: Arc<SessionCache>) -> Self {
        self.session_cache = Some(cache);
        self
    }

    /// Build the configuration.
    ///
    /// This validates the crypto provider and the enabled lists before
    /// returning the configuration. Returns `Error::ConfigError` if the
    /// provider is invalid or a list has no usable entry.
    ///
    /// The crypto provider is selected in the following priority order:
    /// 1. Explicit provider set via `with_crypto_provider()`
    /// 2. Default provider installed via `CryptoProvider::install_default()`
    /// 3. The bundled RustCrypto provider
    pub fn build(self) -> Result<Config, Error> {
        let crypto_provider = self
            .crypto_provider
            .or_else(|| CryptoProvider::get_default().cloned())
            .unwrap_or_else(rust_crypto::default_provider);

        // Always validate the crypto provider
        crypto_provider.validate()?;

        let enabled_cipher_suites = match &self.enabled_cipher_suites {
            Some(suites) => validate_cipher_suites(&crypto_provider, suites)?,
            None => crypto_provider
                .cipher_suites
                .iter()
                .map(|s| s.suite())
                .collect(),
        };

        let enabled_protocols = match &self.enabled_protocols {
            Some(protocols) => validate_protocols(protocols)?,
            None => ProtocolVersion::supported().to_vec(),
        };

        if self.max_certificate_chain_length == 0 {
            return Err(Error::ConfigError(
                "max_certificate_chain_length must be at least 1".to_string(),
            ));
        }

        let session_cache = self
            .session_cache
            .unwrap_or_else(|| Arc::new(SessionCache::new(self.session_cache_size)));

        Ok(Config {
            crypto_provider,
            key_manager: self.key_manager,
            trust_manager: self.trust_manager,
            enabled_protocols,
            enabled_cipher_suites,
            accept_large_fragments: self.accept_large_fragments,
            allow_renegotiation: self.allow_renegotiation,
            session_tickets: self.session_tickets,
            max_handshake_message_size: self.max_handshake_message_size,
            max_certificate_chain_length: self.max_certificate_chain_length,
            session_cache,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::builder()
            .build()
            .expect("Default config should always validate")
    }
}
