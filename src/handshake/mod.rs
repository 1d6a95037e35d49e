//! Handshake state machines for both roles and protocol versions.
//!
//! The engine hands over complete handshake messages one at a time through
//! [`Handshake::process`]. The state machine checks that each is expected,
//! updates transcript and keys, and queues [`Outbound`] items which the
//! engine drains in order. Message bytes become handshake records, while the
//! markers switch write keys or report completion at the right point of the
//! outgoing stream.
//!
//! Read keys cannot be sequenced that way since they apply to the very next
//! record. The engine collects them with [`Handshake::take_read_keys`] after
//! each message, or from [`Handshake::change_cipher_spec`] in TLS 1.2.

mod client;
mod server;
mod transcript;

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::alert::AlertDescription;
use crate::config::Config;
use crate::crypto::credentials::KeyManager;
use crate::crypto::key_schedule::{self, KeySchedule, Secret};
use crate::crypto::{ActiveKeyExchange, CryptoContext, SigningKey, SupportedCipherSuite};
use crate::message::{decode, frame, KeyUpdate, NewSessionTicket, Random, SessionId};
use crate::message::HANDSHAKE_HEADER_LEN;
use crate::record::RecordProtection;
use crate::session::{Session, SessionParams};
use crate::types::{CipherSuite, HandshakeType, ProtocolVersion, SignatureScheme};
use crate::Error;

use transcript::Transcript;

/// What the engine needs next to make handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    /// No handshake in progress.
    NotHandshaking,
    /// The engine has handshake records to produce.
    NeedWrap,
    /// The engine waits for records from the peer.
    NeedUnwrap,
    /// A delegated task must run before the handshake can continue.
    NeedTask,
    /// A handshake, or a post-handshake exchange, just completed.
    ///
    /// Only ever reported in the result of the call that completed it.
    Finished,
}

/// Whether a server asks for a client certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientAuth {
    #[default]
    None,
    /// Request a certificate, continue without one.
    Wanted,
    /// Request a certificate, fail the handshake without a trusted one.
    Required,
}

/// Settings picked up when a handshake starts.
#[derive(Debug, Clone)]
pub(crate) struct HandshakeParams {
    pub protocols: Vec<ProtocolVersion>,
    pub cipher_suites: Vec<CipherSuite>,
    pub client_auth: ClientAuth,
    pub peer_host: Option<String>,
    pub peer_port: Option<u16>,
}

impl HandshakeParams {
    pub fn from_config(config: &Config) -> Self {
        HandshakeParams {
            protocols: config.enabled_protocols().to_vec(),
            cipher_suites: config.enabled_cipher_suites().to_vec(),
            client_auth: ClientAuth::None,
            peer_host: None,
            peer_port: None,
        }
    }
}

/// Items produced by the handshake, in stream order.
#[derive(Debug)]
pub(crate) enum Outbound {
    /// A complete handshake message, header included.
    Message(Vec<u8>),
    /// A ChangeCipherSpec record (TLS 1.2).
    ChangeCipherSpec,
    /// Protect all following records with these keys.
    WriteKeys(RecordProtection),
    /// The handshake completed with this session.
    Complete(Arc<Session>),
    /// A post-handshake exchange completed.
    PostHandshake,
}

impl Outbound {
    /// Whether the item becomes a record on the wire.
    pub fn is_record(&self) -> bool {
        matches!(self, Outbound::Message(_) | Outbound::ChangeCipherSpec)
    }
}

/// A received handshake message.
pub(crate) struct Message<'a> {
    pub msg_type: HandshakeType,
    /// Header and body, as hashed into the transcript.
    pub raw: &'a [u8],
    pub body: &'a [u8],
}

impl<'a> Message<'a> {
    fn parse(raw: &'a [u8]) -> Result<Self, Error> {
        if raw.len() < HANDSHAKE_HEADER_LEN {
            return Err(Error::protocol(
                AlertDescription::DecodeError,
                "truncated handshake header",
            ));
        }
        Ok(Message {
            msg_type: HandshakeType::from_u8(raw[0]),
            raw,
            body: &raw[HANDSHAKE_HEADER_LEN..],
        })
    }

    /// HelloRequest and ServerHelloDone have empty bodies.
    fn expect_empty(&self) -> Result<(), Error> {
        if !self.body.is_empty() {
            return Err(Error::protocol(
                AlertDescription::DecodeError,
                format!("{:?} must be empty", self.msg_type),
            ));
        }
        Ok(())
    }
}

/// CertificateRequest as the client keeps it, or the fact that a server
/// sent one.
#[derive(Debug, Default)]
struct CertRequest {
    context: Vec<u8>,
    schemes: Vec<SignatureScheme>,
    issuers: Vec<Vec<u8>>,
}

/// Material of the handshake in progress. Replaced by every (re)start.
#[derive(Default)]
struct Negotiation {
    transcript: Transcript,
    version: Option<ProtocolVersion>,
    suite: Option<&'static dyn SupportedCipherSuite>,
    client_random: Random,
    server_random: Random,
    session_id: SessionId,

    /// Client: one per offered group. Server: the single TLS 1.2 exchange.
    key_shares: Vec<Box<dyn ActiveKeyExchange>>,

    /// Client's public value for the ClientKeyExchange (TLS 1.2).
    kx_public: Vec<u8>,

    master_secret: Option<Secret>,
    schedule: Option<KeySchedule>,
    client_hs_secret: Option<Secret>,
    server_hs_secret: Option<Secret>,
    client_app_secret: Option<Secret>,
    server_app_secret: Option<Secret>,

    /// TLS 1.2 keys waiting for ChangeCipherSpec.
    pending_read: Option<RecordProtection>,
    pending_write: Option<RecordProtection>,

    peer_chain: Option<Vec<Vec<u8>>>,
    peer_trusted: bool,
    local_chain: Option<Vec<Vec<u8>>>,
    signing_key: Option<Box<dyn SigningKey>>,
    cert_request: Option<CertRequest>,

    /// Session offered (client) or picked (server) for resumption.
    resuming: Option<Arc<Session>>,
    abbreviated: bool,

    secure_renegotiation: bool,
    client_verify_data: Vec<u8>,
    server_verify_data: Vec<u8>,
}

/// What the last completed handshake established.
struct Established {
    version: ProtocolVersion,
    suite: &'static dyn SupportedCipherSuite,
    session: Arc<Session>,
    secure_renegotiation: bool,
    client_verify_data: Vec<u8>,
    server_verify_data: Vec<u8>,
    client_app_secret: Option<Secret>,
    server_app_secret: Option<Secret>,
}

/// Handshake state machine in common between client and server.
pub(crate) struct Handshake {
    config: Arc<Config>,
    ctx: CryptoContext,
    is_client: bool,
    state: State,

    /// Settings of the handshake in progress.
    params: HandshakeParams,

    /// Settings for the next handshake.
    next_params: HandshakeParams,

    neg: Negotiation,
    established: Option<Established>,
    outbound: VecDeque<Outbound>,
    read_keys: Option<RecordProtection>,
}

impl Handshake {
    pub fn new(config: Arc<Config>, is_client: bool, params: HandshakeParams) -> Self {
        Handshake {
            ctx: CryptoContext::new(config.crypto_provider().clone()),
            config,
            is_client,
            state: State::Idle,
            params: params.clone(),
            next_params: params,
            neg: Negotiation::default(),
            established: None,
            outbound: VecDeque::new(),
            read_keys: None,
        }
    }

    pub fn set_params(&mut self, params: HandshakeParams) {
        self.next_params = params;
    }

    pub fn is_started(&self) -> bool {
        self.state != State::Idle
    }

    pub fn is_handshaking(&self) -> bool {
        !matches!(self.state, State::Idle | State::Established)
    }

    /// Negotiated version, once known.
    pub fn version(&self) -> Option<ProtocolVersion> {
        self.established
            .as_ref()
            .map(|e| e.version)
            .or(self.neg.version)
    }

    pub fn status(&self) -> HandshakeStatus {
        if !self.outbound.is_empty() {
            HandshakeStatus::NeedWrap
        } else if self.is_handshaking() {
            HandshakeStatus::NeedUnwrap
        } else {
            HandshakeStatus::NotHandshaking
        }
    }

    pub fn front_outbound(&self) -> Option<&Outbound> {
        self.outbound.front()
    }

    pub fn pop_outbound(&mut self) -> Option<Outbound> {
        self.outbound.pop_front()
    }

    pub fn push_front_outbound(&mut self, item: Outbound) {
        self.outbound.push_front(item);
    }

    pub fn take_read_keys(&mut self) -> Option<RecordProtection> {
        self.read_keys.take()
    }

    /// Whether processing the message involves key agreement or public key
    /// operations, and should run as a delegated task.
    pub fn is_expensive(&self, msg_type: HandshakeType) -> bool {
        match msg_type {
            HandshakeType::Certificate
            | HandshakeType::CertificateVerify
            | HandshakeType::ServerKeyExchange
            | HandshakeType::ClientKeyExchange => true,
            // The server answers with its whole signed first flight
            HandshakeType::ClientHello => !self.is_client,
            HandshakeType::ServerHello => self.is_client,
            _ => false,
        }
    }

    /// Start the first handshake, or a new one after completion.
    ///
    /// After a TLS 1.2 handshake this starts a renegotiation, after TLS 1.3
    /// a KeyUpdate.
    pub fn begin(&mut self) -> Result<(), Error> {
        match self.state {
            State::Idle => {
                self.params = self.next_params.clone();
                if self.is_client {
                    self.send_client_hello()?;
                    self.transition(State::AwaitServerHello);
                } else {
                    self.transition(State::AwaitClientHello);
                }
                Ok(())
            }
            State::Established => {
                let version = self.version();
                if version == Some(ProtocolVersion::TLS1_3) {
                    debug!("Requesting key update");
                    return self.send_key_update(true);
                }
                if !self.config.allow_renegotiation() {
                    return Err(Error::IllegalState("renegotiation is disabled"));
                }
                if !self.established.as_ref().is_some_and(|e| e.secure_renegotiation) {
                    return Err(Error::IllegalState(
                        "peer does not support secure renegotiation",
                    ));
                }
                debug!("Starting renegotiation");
                self.restart();
                if self.is_client {
                    self.send_client_hello()?;
                    self.transition(State::AwaitServerHello);
                } else {
                    self.send(HandshakeType::HelloRequest, Vec::new());
                    self.transition(State::AwaitClientHello);
                }
                Ok(())
            }
            _ => Err(Error::IllegalState("handshake already in progress")),
        }
    }

    /// Handle one complete handshake message, header included.
    pub fn process(&mut self, raw: &[u8]) -> Result<(), Error> {
        let msg = Message::parse(raw)?;

        if msg.msg_type == HandshakeType::HelloRequest && self.is_client && self.is_handshaking()
        {
            debug!("Ignoring HelloRequest during handshake");
            return msg.expect_empty();
        }

        let prev_state = self.state;
        let new_state = prev_state.handle(self, &msg)?;
        self.transition(new_state);
        Ok(())
    }

    /// A ChangeCipherSpec arrived: switch to the pending read keys.
    pub fn change_cipher_spec(&mut self) -> Result<RecordProtection, Error> {
        if self.state != State::AwaitChangeCipherSpec {
            return Err(Error::protocol(
                AlertDescription::UnexpectedMessage,
                format!("unexpected ChangeCipherSpec in {}", self.state.name()),
            ));
        }
        let keys = self
            .neg
            .pending_read
            .take()
            .ok_or_else(|| Error::Internal("no pending read keys".to_string()))?;
        self.transition(State::AwaitFinished);
        Ok(keys)
    }

    fn transition(&mut self, new_state: State) {
        let prev_state = self.state;
        if prev_state != new_state {
            self.state = new_state;
            trace!("{:?} -> {:?}", prev_state, new_state);
        }
    }

    /// Reset for a renegotiation of an established connection.
    fn restart(&mut self) {
        if let Some(established) = &self.established {
            established.session.invalidate();
        }
        self.params = self.next_params.clone();
        self.neg = Negotiation::default();
    }

    /// Frame and queue a handshake message.
    fn send(&mut self, msg_type: HandshakeType, body: Vec<u8>) {
        let msg = frame(msg_type, &body);
        if !msg_type.is_post_handshake() {
            self.neg.transcript.add(&msg);
        }
        trace!("Queue {:?} ({} bytes)", msg_type, msg.len());
        self.outbound.push_back(Outbound::Message(msg));
    }

    fn negotiated(&self) -> Result<(ProtocolVersion, &'static dyn SupportedCipherSuite), Error> {
        match (self.neg.version, self.neg.suite) {
            (Some(version), Some(suite)) => Ok((version, suite)),
            _ => Err(Error::Internal("no negotiated cipher suite".to_string())),
        }
    }

    fn transcript_hash(&self) -> Result<Vec<u8>, Error> {
        let (_, suite) = self.negotiated()?;
        Ok(self.neg.transcript.hash(&self.ctx, suite.hash_algorithm()))
    }

    fn check_finished(&self, received: &[u8], expected: &[u8]) -> Result<(), Error> {
        // Constant-time comparison
        let is_eq: bool = received.ct_eq(expected).into();
        if !is_eq {
            return Err(Error::protocol(
                AlertDescription::DecryptError,
                "Finished verification failed",
            ));
        }
        trace!("Peer Finished verified");
        Ok(())
    }

    fn secret(secret: &Option<Secret>, what: &str) -> Result<Secret, Error> {
        secret
            .clone()
            .ok_or_else(|| Error::Internal(format!("no {}", what)))
    }

    // ---------------------------------------------------------------------
    // TLS 1.2 keys
    // ---------------------------------------------------------------------

    fn tls12_master_secret(&self, pre_master_secret: &[u8]) -> Result<Secret, Error> {
        let (_, suite) = self.negotiated()?;
        Ok(key_schedule::tls12_master_secret(
            self.ctx.provider(),
            suite.hash_algorithm(),
            pre_master_secret,
            &self.neg.client_random,
            &self.neg.server_random,
        )?)
    }

    /// Derive both directions from the master secret, pending until
    /// ChangeCipherSpec.
    fn tls12_derive_keys(&mut self, master_secret: Secret) -> Result<(), Error> {
        let (version, suite) = self.negotiated()?;
        let (client, server) = key_schedule::tls12_key_block(
            self.ctx.provider(),
            suite,
            &master_secret,
            &self.neg.client_random,
            &self.neg.server_random,
        )?;
        let client = self.ctx.record_protection(version, suite, client)?;
        let server = self.ctx.record_protection(version, suite, server)?;
        if self.is_client {
            self.neg.pending_write = Some(client);
            self.neg.pending_read = Some(server);
        } else {
            self.neg.pending_write = Some(server);
            self.neg.pending_read = Some(client);
        }
        self.neg.master_secret = Some(master_secret);
        Ok(())
    }

    fn tls12_verify_data(&self, client: bool) -> Result<Vec<u8>, Error> {
        let (_, suite) = self.negotiated()?;
        let master_secret = self
            .neg
            .master_secret
            .as_ref()
            .ok_or_else(|| Error::Internal("no master secret".to_string()))?;
        let transcript_hash = self.transcript_hash()?;
        Ok(key_schedule::tls12_verify_data(
            self.ctx.provider(),
            suite.hash_algorithm(),
            master_secret,
            client,
            &transcript_hash,
        )?)
    }

    /// Queue ChangeCipherSpec, the write key switch and our Finished.
    fn send_change_cipher_spec_and_finished(&mut self) -> Result<(), Error> {
        let keys = self
            .neg
            .pending_write
            .take()
            .ok_or_else(|| Error::Internal("no pending write keys".to_string()))?;
        self.outbound.push_back(Outbound::ChangeCipherSpec);
        self.outbound.push_back(Outbound::WriteKeys(keys));

        let verify_data = self.tls12_verify_data(self.is_client)?;
        self.send_finished(&verify_data);
        if self.is_client {
            self.neg.client_verify_data = verify_data;
        } else {
            self.neg.server_verify_data = verify_data;
        }
        Ok(())
    }

    fn send_finished(&mut self, verify_data: &[u8]) {
        let mut body = Vec::new();
        crate::message::Finished::new(verify_data).serialize(&mut body);
        self.send(HandshakeType::Finished, body);
    }

    // ---------------------------------------------------------------------
    // TLS 1.3 keys
    // ---------------------------------------------------------------------

    /// Handshake traffic secrets from the (EC)DHE shared secret, over the
    /// transcript through ServerHello.
    fn tls13_handshake_secrets(&mut self, shared_secret: &[u8]) -> Result<(), Error> {
        let (_, suite) = self.negotiated()?;
        let transcript_hash = self.transcript_hash()?;
        let provider = self.ctx.provider();

        let mut schedule = KeySchedule::new(provider, suite.hash_algorithm())?;
        schedule.advance(provider, shared_secret)?;
        let client = schedule.derive_secret(provider, b"c hs traffic", &transcript_hash)?;
        let server = schedule.derive_secret(provider, b"s hs traffic", &transcript_hash)?;

        self.neg.client_hs_secret = Some(client);
        self.neg.server_hs_secret = Some(server);
        self.neg.schedule = Some(schedule);
        Ok(())
    }

    /// Application traffic secrets, over the transcript through the server
    /// Finished.
    fn tls13_application_secrets(&mut self) -> Result<(), Error> {
        let transcript_hash = self.transcript_hash()?;
        let provider = self.ctx.provider();
        let schedule = self
            .neg
            .schedule
            .as_mut()
            .ok_or_else(|| Error::Internal("no key schedule".to_string()))?;

        schedule.advance(provider, &[])?;
        let client = schedule.derive_secret(provider, b"c ap traffic", &transcript_hash)?;
        let server = schedule.derive_secret(provider, b"s ap traffic", &transcript_hash)?;

        self.neg.client_app_secret = Some(client);
        self.neg.server_app_secret = Some(server);
        Ok(())
    }

    fn tls13_protection(
        &self,
        suite: &'static dyn SupportedCipherSuite,
        secret: &[u8],
    ) -> Result<RecordProtection, Error> {
        let key = key_schedule::tls13_traffic_key(self.ctx.provider(), suite, secret)?;
        self.ctx
            .record_protection(ProtocolVersion::TLS1_3, suite, key)
    }

    fn tls13_verify_data(&self, base_secret: &[u8]) -> Result<Vec<u8>, Error> {
        let (_, suite) = self.negotiated()?;
        let transcript_hash = self.transcript_hash()?;
        Ok(key_schedule::tls13_verify_data(
            self.ctx.provider(),
            suite.hash_algorithm(),
            base_secret,
            &transcript_hash,
        )?)
    }

    // ---------------------------------------------------------------------
    // Credentials
    // ---------------------------------------------------------------------

    fn load_credential(&mut self, key_manager: &dyn KeyManager, alias: &str) -> Result<(), Error> {
        let chain = key_manager
            .certificate_chain(alias)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                Error::protocol(
                    AlertDescription::HandshakeFailure,
                    format!("no certificate chain for alias {}", alias),
                )
            })?;
        let key_der = key_manager.private_key(alias).ok_or_else(|| {
            Error::protocol(
                AlertDescription::HandshakeFailure,
                format!("no private key for alias {}", alias),
            )
        })?;
        let key = self.ctx.load_signing_key(&key_der)?;

        debug!(
            "Using credential {} ({} certificates, {:?})",
            alias,
            chain.len(),
            key.scheme()
        );
        self.neg.local_chain = Some(chain);
        self.neg.signing_key = Some(key);
        Ok(())
    }

    fn sign(&self, data: &[u8]) -> Result<(SignatureScheme, Vec<u8>), Error> {
        let key = self
            .neg
            .signing_key
            .as_ref()
            .ok_or_else(|| Error::Internal("no signing key".to_string()))?;
        Ok((key.scheme(), key.sign(data)?))
    }

    /// Check a peer signature against its leaf certificate.
    fn verify_peer(
        &self,
        data: &[u8],
        scheme: SignatureScheme,
        signature: &[u8],
    ) -> Result<(), Error> {
        if !SignatureScheme::supported().contains(&scheme) {
            return Err(Error::protocol(
                AlertDescription::IllegalParameter,
                format!("signature scheme {:?} was not offered", scheme),
            ));
        }
        let leaf = self
            .neg
            .peer_chain
            .as_ref()
            .and_then(|c| c.first())
            .ok_or_else(|| {
                Error::protocol(
                    AlertDescription::UnexpectedMessage,
                    "signature without peer certificate",
                )
            })?;
        self.ctx.verify(leaf, data, signature, scheme)?;
        trace!("Peer signature verified: {:?}", scheme);
        Ok(())
    }

    /// Run the peer's chain past the trust manager.
    ///
    /// A server that only wants client auth continues with an untrusted
    /// chain, the session then reports the peer as unverified.
    fn check_peer_chain(&mut self, chain: Vec<Vec<u8>>) -> Result<(), Error> {
        let max = self.config.max_certificate_chain_length();
        if chain.len() > max {
            return Err(Error::protocol(
                AlertDescription::BadCertificate,
                format!("certificate chain of {} exceeds {}", chain.len(), max),
            ));
        }

        let result = match self.config.trust_manager() {
            None => Err(Error::protocol(
                AlertDescription::CertificateUnknown,
                "no trust manager configured",
            )),
            Some(trust_manager) => {
                let checked = if self.is_client {
                    trust_manager.check_server_trusted(&chain)
                } else {
                    trust_manager.check_client_trusted(&chain)
                };
                checked.map_err(|e| Error::protocol(e.alert(), e.to_string()))
            }
        };

        match result {
            Ok(()) => {
                debug!("Peer certificate chain trusted ({} certificates)", chain.len());
                self.neg.peer_trusted = true;
            }
            Err(e) if !self.is_client && self.params.client_auth == ClientAuth::Wanted => {
                debug!("Continuing with unverified client: {}", e);
                self.neg.peer_trusted = false;
            }
            Err(e) => return Err(e),
        }

        self.neg.peer_chain = Some(chain);
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Completion and post-handshake
    // ---------------------------------------------------------------------

    /// Record the handshake result and queue the completion marker.
    fn complete(&mut self) -> Result<(), Error> {
        let (version, suite) = self.negotiated()?;
        let neg = std::mem::take(&mut self.neg);

        let session = match neg.resuming {
            Some(session) if neg.abbreviated => session,
            _ => {
                let mut id = neg.session_id;
                if version == ProtocolVersion::TLS1_3 {
                    // Only used to tell sessions apart
                    id = SessionId::new();
                    id.extend_from_slice(&self.ctx.random()?);
                }
                let peer_certificates = if neg.peer_trusted {
                    neg.peer_chain
                } else {
                    None
                };
                let master_secret = match version {
                    ProtocolVersion::TLS1_2 => neg.master_secret,
                    _ => None,
                };
                let session = Arc::new(Session::new(SessionParams {
                    id,
                    protocol: version,
                    cipher_suite: suite.suite(),
                    peer_certificates,
                    local_certificates: neg.local_chain,
                    peer_host: self.params.peer_host.clone(),
                    peer_port: self.params.peer_port,
                    large_fragments: self.config.accept_large_fragments(),
                    master_secret,
                }));

                if version == ProtocolVersion::TLS1_2 {
                    let cache = self.config.session_cache();
                    if self.is_client {
                        cache.put_client(session.clone());
                    } else {
                        cache.put_server(session.clone());
                    }
                }
                session
            }
        };

        debug!(
            "Handshake complete: {} {}{}",
            version,
            suite.suite(),
            if neg.abbreviated { " (resumed)" } else { "" }
        );

        self.established = Some(Established {
            version,
            suite,
            session: session.clone(),
            secure_renegotiation: neg.secure_renegotiation,
            client_verify_data: neg.client_verify_data,
            server_verify_data: neg.server_verify_data,
            client_app_secret: neg.client_app_secret,
            server_app_secret: neg.server_app_secret,
        });
        self.outbound.push_back(Outbound::Complete(session));
        Ok(())
    }

    fn established(&self) -> Result<&Established, Error> {
        self.established
            .as_ref()
            .ok_or_else(|| Error::Internal("no established connection".to_string()))
    }

    /// A peer renegotiation attempt is refused unless allowed and secure.
    fn accept_renegotiation(&self) -> Result<(), Error> {
        if !self.config.allow_renegotiation() {
            return Err(Error::protocol(
                AlertDescription::NoRenegotiation,
                "renegotiation is disabled",
            ));
        }
        if !self.established()?.secure_renegotiation {
            return Err(Error::protocol(
                AlertDescription::NoRenegotiation,
                "peer does not support secure renegotiation",
            ));
        }
        debug!("Accepting renegotiation");
        Ok(())
    }

    /// Send a KeyUpdate and switch our write keys after it.
    fn send_key_update(&mut self, update_requested: bool) -> Result<(), Error> {
        let mut body = Vec::new();
        KeyUpdate { update_requested }.serialize(&mut body);
        self.send(HandshakeType::KeyUpdate, body);

        let provider = self.ctx.provider().clone();
        let is_client = self.is_client;
        let established = self
            .established
            .as_mut()
            .ok_or_else(|| Error::Internal("no established connection".to_string()))?;
        let suite = established.suite;
        let own = if is_client {
            &mut established.client_app_secret
        } else {
            &mut established.server_app_secret
        };
        let current = Self::secret(own, "application traffic secret")?;
        let next = key_schedule::tls13_next_traffic_secret(&provider, suite.hash_algorithm(), &current)?;
        *own = Some(next.clone());

        let keys = self.tls13_protection(suite, &next)?;
        self.outbound.push_back(Outbound::WriteKeys(keys));
        self.outbound.push_back(Outbound::PostHandshake);
        Ok(())
    }

    fn receive_key_update(&mut self, msg: &Message) -> Result<(), Error> {
        let key_update = decode(msg.body, KeyUpdate::parse)?;

        let provider = self.ctx.provider().clone();
        let is_client = self.is_client;
        let established = self
            .established
            .as_mut()
            .ok_or_else(|| Error::Internal("no established connection".to_string()))?;
        let suite = established.suite;
        let peer = if is_client {
            &mut established.server_app_secret
        } else {
            &mut established.client_app_secret
        };
        let current = Self::secret(peer, "application traffic secret")?;
        let next = key_schedule::tls13_next_traffic_secret(&provider, suite.hash_algorithm(), &current)?;
        *peer = Some(next.clone());

        debug!(
            "Received KeyUpdate (update_requested: {})",
            key_update.update_requested
        );
        self.read_keys = Some(self.tls13_protection(suite, &next)?);

        if key_update.update_requested {
            self.send_key_update(false)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Handshake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handshake")
            .field("is_client", &self.is_client)
            .field("state", &self.state)
            .field("version", &self.version())
            .field("outbound", &self.outbound.len())
            .finish()
    }
}

fn unexpected(state: State, msg: &Message) -> Error {
    Error::protocol(
        AlertDescription::UnexpectedMessage,
        format!("unexpected {:?} in {}", msg.msg_type, state.name()),
    )
}

fn expect(state: State, msg: &Message, msg_type: HandshakeType) -> Result<(), Error> {
    if msg.msg_type != msg_type {
        return Err(unexpected(state, msg));
    }
    Ok(())
}

fn secret_from(bytes: &[u8]) -> Secret {
    Zeroizing::new(bytes.to_vec())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,

    // Client
    AwaitServerHello,
    AwaitEncryptedExtensions,
    AwaitCertificateRequest,
    AwaitServerCertificate,
    AwaitServerCertificateVerify,
    AwaitServerKeyExchange,
    AwaitServerHelloDone,

    // Server
    AwaitClientHello,
    AwaitClientCertificate,
    AwaitClientKeyExchange,
    AwaitClientCertificateVerify,

    // Both
    AwaitChangeCipherSpec,
    AwaitFinished,
    Established,
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::Idle => "Idle",
            State::AwaitServerHello => "AwaitServerHello",
            State::AwaitEncryptedExtensions => "AwaitEncryptedExtensions",
            State::AwaitCertificateRequest => "AwaitCertificateRequest",
            State::AwaitServerCertificate => "AwaitServerCertificate",
            State::AwaitServerCertificateVerify => "AwaitServerCertificateVerify",
            State::AwaitServerKeyExchange => "AwaitServerKeyExchange",
            State::AwaitServerHelloDone => "AwaitServerHelloDone",
            State::AwaitClientHello => "AwaitClientHello",
            State::AwaitClientCertificate => "AwaitClientCertificate",
            State::AwaitClientKeyExchange => "AwaitClientKeyExchange",
            State::AwaitClientCertificateVerify => "AwaitClientCertificateVerify",
            State::AwaitChangeCipherSpec => "AwaitChangeCipherSpec",
            State::AwaitFinished => "AwaitFinished",
            State::Established => "Established",
        }
    }

    fn handle(self, hs: &mut Handshake, msg: &Message) -> Result<Self, Error> {
        match self {
            State::Idle | State::AwaitChangeCipherSpec => Err(unexpected(self, msg)),
            State::AwaitServerHello => self.await_server_hello(hs, msg),
            State::AwaitEncryptedExtensions => self.await_encrypted_extensions(hs, msg),
            State::AwaitCertificateRequest => self.await_certificate_request(hs, msg),
            State::AwaitServerCertificate => self.await_server_certificate(hs, msg),
            State::AwaitServerCertificateVerify => self.await_server_certificate_verify(hs, msg),
            State::AwaitServerKeyExchange => self.await_server_key_exchange(hs, msg),
            State::AwaitServerHelloDone => self.await_server_hello_done(hs, msg),
            State::AwaitClientHello => self.await_client_hello(hs, msg),
            State::AwaitClientCertificate => self.await_client_certificate(hs, msg),
            State::AwaitClientKeyExchange => self.await_client_key_exchange(hs, msg),
            State::AwaitClientCertificateVerify => self.await_client_certificate_verify(hs, msg),
            State::AwaitFinished if hs.is_client => self.await_server_finished(hs, msg),
            State::AwaitFinished => self.await_client_finished(hs, msg),
            State::Established => self.await_post_handshake(hs, msg),
        }
    }

    fn await_post_handshake(self, hs: &mut Handshake, msg: &Message) -> Result<Self, Error> {
        let version = hs.established()?.version;

        match (msg.msg_type, version) {
            (HandshakeType::NewSessionTicket, ProtocolVersion::TLS1_3) if hs.is_client => {
                let ticket = decode(msg.body, NewSessionTicket::parse)?;
                // Tickets are never used for resumption
                debug!(
                    "Received NewSessionTicket (lifetime {}s, {} bytes)",
                    ticket.lifetime,
                    ticket.ticket.len()
                );
                hs.outbound.push_back(Outbound::PostHandshake);
                Ok(self)
            }
            (HandshakeType::KeyUpdate, ProtocolVersion::TLS1_3) => {
                hs.receive_key_update(msg)?;
                Ok(self)
            }
            (HandshakeType::HelloRequest, ProtocolVersion::TLS1_2) if hs.is_client => {
                msg.expect_empty()?;
                hs.accept_renegotiation()?;
                hs.restart();
                hs.send_client_hello()?;
                Ok(State::AwaitServerHello)
            }
            (HandshakeType::ClientHello, ProtocolVersion::TLS1_2) if !hs.is_client => {
                hs.accept_renegotiation()?;
                State::AwaitClientHello.await_client_hello(hs, msg)
            }
            _ => Err(unexpected(self, msg)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertDescription;

    fn handshake(is_client: bool) -> Handshake {
        let config = Arc::new(Config::default());
        let params = HandshakeParams::from_config(&config);
        Handshake::new(config, is_client, params)
    }

    #[test]
    fn client_begins_with_client_hello() {
        let mut hs = handshake(true);
        assert_eq!(hs.status(), HandshakeStatus::NotHandshaking);
        hs.begin().unwrap();
        assert_eq!(hs.status(), HandshakeStatus::NeedWrap);
        match hs.pop_outbound() {
            Some(Outbound::Message(m)) => assert_eq!(m[0], HandshakeType::ClientHello.as_u8()),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(hs.status(), HandshakeStatus::NeedUnwrap);
        assert!(matches!(hs.begin(), Err(Error::IllegalState(_))));
    }

    #[test]
    fn server_waits_for_client_hello() {
        let mut hs = handshake(false);
        hs.begin().unwrap();
        assert_eq!(hs.status(), HandshakeStatus::NeedUnwrap);
        assert!(hs.front_outbound().is_none());
    }

    #[test]
    fn out_of_order_message_is_unexpected() {
        let mut hs = handshake(false);
        hs.begin().unwrap();
        let finished = frame(HandshakeType::Finished, &[0; 12]);
        let err = hs.process(&finished).unwrap_err();
        assert_eq!(err.alert(), Some(AlertDescription::UnexpectedMessage));
    }

    #[test]
    fn stray_change_cipher_spec_is_unexpected() {
        let mut hs = handshake(true);
        hs.begin().unwrap();
        let err = hs.change_cipher_spec().unwrap_err();
        assert_eq!(err.alert(), Some(AlertDescription::UnexpectedMessage));
    }

    #[test]
    fn hello_request_ignored_while_handshaking() {
        let mut hs = handshake(true);
        hs.begin().unwrap();
        hs.process(&frame(HandshakeType::HelloRequest, &[])).unwrap();
        assert_eq!(hs.state, State::AwaitServerHello);
    }

    #[test]
    fn hello_retry_request_fails() {
        use crate::message::{ServerHello, HELLO_RETRY_REQUEST_RANDOM};

        let mut hs = handshake(true);
        hs.begin().unwrap();
        let hrr = ServerHello {
            legacy_version: ProtocolVersion::TLS1_2,
            random: HELLO_RETRY_REQUEST_RANDOM,
            session_id: SessionId::new(),
            cipher_suite: CipherSuite::AES_128_GCM_SHA256,
            selected_version: Some(ProtocolVersion::TLS1_3),
            key_share: None,
            renegotiation_info: None,
        };
        let mut body = Vec::new();
        hrr.serialize(&mut body);
        let err = hs
            .process(&frame(HandshakeType::ServerHello, &body))
            .unwrap_err();
        assert_eq!(err.alert(), Some(AlertDescription::HandshakeFailure));
    }
}
