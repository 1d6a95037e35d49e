// TLS Client Handshake Flows
//
// TLS 1.3 (RFC 8446):
// 1. Client sends ClientHello with a key share for every group it supports
// 2. Server sends ServerHello (plaintext)
//    - Client derives handshake secrets and protects both directions with them
// 3. Server sends EncryptedExtensions
// 4. Server sends CertificateRequest (optional)
// 5. Server sends Certificate and CertificateVerify
// 6. Server sends Finished
//    - Client derives application secrets, server application key protects reads
// 7. Client sends Certificate and CertificateVerify (if requested) and Finished
//    under its handshake key, then switches to its application key
// 8. Server may send NewSessionTicket at any later point
//
// TLS 1.2 (RFC 5246, ECDHE_ECDSA only):
// 1. Client sends ClientHello, offering a cached session id if it has one
// 2. Server sends ServerHello
//    - Session id echoed: abbreviated handshake, continue at 7
// 3. Server sends Certificate, ServerKeyExchange, CertificateRequest
//    (optional) and ServerHelloDone
// 4. Client sends Certificate (if requested), ClientKeyExchange and
//    CertificateVerify (if it sent a non-empty Certificate)
// 5. Client sends ChangeCipherSpec and Finished
// 6. Server sends ChangeCipherSpec and Finished
// 7. Abbreviated: server sends ChangeCipherSpec and Finished first, the
//    client answers with its own
//
// A HelloRequest after completion starts a renegotiation, bound to the
// previous handshake through renegotiation_info (RFC 5746).

use super::{expect, secret_from, unexpected, CertRequest, Handshake, Message, Outbound, State};
use crate::alert::AlertDescription;
use crate::message::{decode, tls13_signed_content, Certificate, CertificateRequest};
use crate::message::{CertificateVerify, ClientHello, ClientKeyExchange, EncryptedExtensions};
use crate::message::{Finished, KeyShareEntry, ServerHello, ServerKeyExchange, DOWNGRADE_TLS12};
use crate::types::{CipherSuite, HandshakeType, NamedGroup, ProtocolVersion, SignatureScheme};
use crate::Error;

impl Handshake {
    /// Versions the ClientHello offers, most preferred first.
    fn offered_protocols(&self) -> Vec<ProtocolVersion> {
        match &self.established {
            // Renegotiation keeps the version
            Some(established) => vec![established.version],
            None => {
                let mut protocols = self.params.protocols.clone();
                protocols.sort_by(|a, b| b.cmp(a));
                protocols
            }
        }
    }

    fn offered_suites(&self, protocols: &[ProtocolVersion]) -> Vec<CipherSuite> {
        self.params
            .cipher_suites
            .iter()
            .copied()
            .filter(|s| s.protocol().is_some_and(|p| protocols.contains(&p)))
            .collect()
    }

    pub(super) fn send_client_hello(&mut self) -> Result<(), Error> {
        let protocols = self.offered_protocols();
        let cipher_suites = self.offered_suites(&protocols);
        if cipher_suites.is_empty() {
            return Err(Error::protocol(
                AlertDescription::HandshakeFailure,
                "no cipher suite enabled for the enabled protocols",
            ));
        }

        self.neg.client_random = self.ctx.random()?;

        if protocols.contains(&ProtocolVersion::TLS1_2) && self.established.is_none() {
            self.offer_cached_session(&cipher_suites);
        }

        let supported_groups: Vec<NamedGroup> = self.ctx.kx_groups().map(|g| g.name()).collect();

        let mut supported_versions = Vec::new();
        if protocols.contains(&ProtocolVersion::TLS1_3) {
            supported_versions = protocols.clone();
            for group in &supported_groups {
                let kx = self.ctx.start_exchange(*group)?;
                self.neg.key_shares.push(kx);
            }
        }

        // Empty on the initial handshake, our previous verify_data on a
        // renegotiation
        let renegotiation_info = self
            .established
            .as_ref()
            .map(|e| e.client_verify_data.clone())
            .unwrap_or_default();

        let hello = ClientHello {
            legacy_version: ProtocolVersion::TLS1_2,
            random: self.neg.client_random,
            session_id: self.neg.session_id.clone(),
            cipher_suites,
            supported_versions,
            supported_groups,
            signature_algorithms: SignatureScheme::supported().to_vec(),
            key_shares: self
                .neg
                .key_shares
                .iter()
                .map(|kx| KeyShareEntry {
                    group: kx.group(),
                    key_exchange: kx.pub_key(),
                })
                .collect(),
            renegotiation_info: Some(&renegotiation_info),
        };

        let mut body = Vec::new();
        hello.serialize(&mut body);
        debug!(
            "Sending ClientHello offering {:?} with {} suites",
            protocols,
            hello.cipher_suites.len()
        );
        self.send(HandshakeType::ClientHello, body);
        Ok(())
    }

    fn offer_cached_session(&mut self, cipher_suites: &[CipherSuite]) {
        let Some(host) = &self.params.peer_host else {
            return;
        };
        let Some(session) = self
            .config
            .session_cache()
            .get_by_peer(host, self.params.peer_port)
        else {
            return;
        };
        let usable = session
            .cipher_suite()
            .is_some_and(|s| cipher_suites.contains(&s));
        if !usable {
            return;
        }

        debug!("Offering session {:02x?} for resumption", session.id());
        self.neg.session_id.extend_from_slice(session.id());
        self.neg.resuming = Some(session);
    }

    fn client_tls13_server_hello(&mut self, sh: &ServerHello, msg: &Message) -> Result<State, Error> {
        let share = sh.key_share.as_ref().ok_or_else(|| {
            Error::protocol(
                AlertDescription::MissingExtension,
                "ServerHello without key_share",
            )
        })?;

        let index = self
            .neg
            .key_shares
            .iter()
            .position(|kx| kx.group() == share.group)
            .ok_or_else(|| {
                Error::protocol(
                    AlertDescription::IllegalParameter,
                    format!("key share for {:?} was not offered", share.group),
                )
            })?;
        let kx = self.neg.key_shares.swap_remove(index);
        self.neg.key_shares.clear();
        let shared_secret = self.ctx.complete_exchange(kx, share.key_exchange)?;

        self.neg.transcript.add(msg.raw);
        self.tls13_handshake_secrets(&shared_secret)?;

        let (_, suite) = self.negotiated()?;
        let server_secret = Self::secret(&self.neg.server_hs_secret, "server handshake secret")?;
        self.read_keys = Some(self.tls13_protection(suite, &server_secret)?);
        // Alerts from here on are protected too
        let client_secret = Self::secret(&self.neg.client_hs_secret, "client handshake secret")?;
        let keys = self.tls13_protection(suite, &client_secret)?;
        self.outbound.push_back(Outbound::WriteKeys(keys));

        Ok(State::AwaitEncryptedExtensions)
    }

    fn client_tls12_server_hello(&mut self, sh: &ServerHello, msg: &Message) -> Result<State, Error> {
        // RFC 5746
        match (&self.established, sh.renegotiation_info) {
            (None, Some(info)) => {
                if !info.is_empty() {
                    return Err(Error::protocol(
                        AlertDescription::HandshakeFailure,
                        "non-empty renegotiation_info on initial handshake",
                    ));
                }
                self.neg.secure_renegotiation = true;
            }
            (None, None) => {
                debug!("Server does not support secure renegotiation");
            }
            (Some(established), info) => {
                let mut expected = established.client_verify_data.clone();
                expected.extend_from_slice(&established.server_verify_data);
                if info != Some(&expected[..]) {
                    return Err(Error::protocol(
                        AlertDescription::HandshakeFailure,
                        "renegotiation_info mismatch",
                    ));
                }
                self.neg.secure_renegotiation = true;
            }
        }

        self.neg.transcript.add(msg.raw);

        let resumed = match &self.neg.resuming {
            Some(session) if !sh.session_id.is_empty() && session.id() == &sh.session_id[..] => {
                if session.cipher_suite() != Some(sh.cipher_suite)
                    || session.protocol() != Some(ProtocolVersion::TLS1_2)
                {
                    return Err(Error::protocol(
                        AlertDescription::IllegalParameter,
                        "resumed session with different parameters",
                    ));
                }
                session.master_secret().map(secret_from)
            }
            _ => None,
        };

        self.neg.session_id = sh.session_id.clone();

        match resumed {
            Some(master_secret) => {
                debug!("Resuming session {:02x?}", &sh.session_id[..]);
                self.neg.abbreviated = true;
                self.tls12_derive_keys(master_secret)?;
                Ok(State::AwaitChangeCipherSpec)
            }
            None => {
                self.neg.resuming = None;
                Ok(State::AwaitServerCertificate)
            }
        }
    }

    /// Everything after ServerHelloDone up to our Finished.
    fn send_client_flight_tls12(&mut self) -> Result<(), Error> {
        let mut sent_certificate = false;

        if let Some(request) = self.neg.cert_request.take() {
            self.choose_client_credential(&request)?;
            let chain = self.neg.local_chain.clone().unwrap_or_default();
            let mut body = Vec::new();
            Certificate::new(chain.iter().map(|c| c.as_slice()).collect()).serialize_tls12(&mut body);
            debug!("Sending client Certificate ({} certificates)", chain.len());
            self.send(HandshakeType::Certificate, body);
            sent_certificate = !chain.is_empty();
        }

        let mut body = Vec::new();
        ClientKeyExchange {
            public: &self.neg.kx_public,
        }
        .serialize(&mut body);
        self.send(HandshakeType::ClientKeyExchange, body);

        if sent_certificate {
            // TLS 1.2 signs the handshake messages themselves
            let (scheme, signature) = self.sign(self.neg.transcript.bytes())?;
            let mut body = Vec::new();
            CertificateVerify {
                scheme,
                signature: &signature,
            }
            .serialize(&mut body);
            self.send(HandshakeType::CertificateVerify, body);
        }

        self.send_change_cipher_spec_and_finished()
    }

    fn choose_client_credential(&mut self, request: &CertRequest) -> Result<(), Error> {
        let config = self.config.clone();
        let Some(key_manager) = config.key_manager() else {
            debug!("No key manager, answering CertificateRequest without certificate");
            return Ok(());
        };

        let schemes: Vec<SignatureScheme> = SignatureScheme::supported()
            .iter()
            .copied()
            .filter(|s| request.schemes.contains(s))
            .collect();

        match key_manager.choose_client_alias(&schemes, &request.issuers) {
            Some(alias) => self.load_credential(key_manager, &alias),
            None => {
                debug!("No client credential matches the CertificateRequest");
                Ok(())
            }
        }
    }
}

impl State {
    pub(super) fn await_server_hello(self, hs: &mut Handshake, msg: &Message) -> Result<Self, Error> {
        expect(self, msg, HandshakeType::ServerHello)?;
        let sh = decode(msg.body, ServerHello::parse)?;

        if sh.is_hello_retry_request() {
            return Err(Error::protocol(
                AlertDescription::HandshakeFailure,
                "HelloRetryRequest is not supported",
            ));
        }

        let version = sh.version();
        let offered = hs.offered_protocols();
        if !offered.contains(&version) {
            return Err(Error::protocol(
                AlertDescription::ProtocolVersion,
                format!("server selected {} which was not offered", version),
            ));
        }
        if version == ProtocolVersion::TLS1_2
            && offered.contains(&ProtocolVersion::TLS1_3)
            && sh.random[24..] == DOWNGRADE_TLS12
        {
            return Err(Error::protocol(
                AlertDescription::IllegalParameter,
                "downgrade to TLS 1.2 detected",
            ));
        }

        if !hs.offered_suites(&[version]).contains(&sh.cipher_suite) {
            return Err(Error::protocol(
                AlertDescription::IllegalParameter,
                format!("server selected {} which was not offered", sh.cipher_suite),
            ));
        }
        let suite = hs.ctx.suite(sh.cipher_suite).ok_or_else(|| {
            Error::protocol(
                AlertDescription::IllegalParameter,
                format!("unsupported cipher suite {}", sh.cipher_suite),
            )
        })?;

        if version == ProtocolVersion::TLS1_3 && sh.session_id != hs.neg.session_id {
            return Err(Error::protocol(
                AlertDescription::IllegalParameter,
                "legacy_session_id_echo mismatch",
            ));
        }

        debug!("Received ServerHello: {} {}", version, sh.cipher_suite);
        hs.neg.version = Some(version);
        hs.neg.suite = Some(suite);
        hs.neg.server_random = sh.random;

        match version {
            ProtocolVersion::TLS1_3 => hs.client_tls13_server_hello(&sh, msg),
            _ => hs.client_tls12_server_hello(&sh, msg),
        }
    }

    pub(super) fn await_encrypted_extensions(
        self,
        hs: &mut Handshake,
        msg: &Message,
    ) -> Result<Self, Error> {
        expect(self, msg, HandshakeType::EncryptedExtensions)?;
        decode(msg.body, EncryptedExtensions::parse)?;
        hs.neg.transcript.add(msg.raw);
        Ok(State::AwaitCertificateRequest)
    }

    /// TLS 1.3: CertificateRequest or straight to Certificate.
    pub(super) fn await_certificate_request(
        self,
        hs: &mut Handshake,
        msg: &Message,
    ) -> Result<Self, Error> {
        match msg.msg_type {
            HandshakeType::CertificateRequest => {
                let request = decode(msg.body, CertificateRequest::parse_tls13)?;
                debug!(
                    "Received CertificateRequest ({} schemes, {} issuers)",
                    request.signature_schemes.len(),
                    request.authorities.len()
                );
                hs.neg.cert_request = Some(CertRequest {
                    context: request.context.to_vec(),
                    schemes: request.signature_schemes,
                    issuers: request.authorities.iter().map(|a| a.to_vec()).collect(),
                });
                hs.neg.transcript.add(msg.raw);
                Ok(State::AwaitServerCertificate)
            }
            HandshakeType::Certificate => State::AwaitServerCertificate.await_server_certificate(hs, msg),
            _ => Err(unexpected(self, msg)),
        }
    }

    pub(super) fn await_server_certificate(
        self,
        hs: &mut Handshake,
        msg: &Message,
    ) -> Result<Self, Error> {
        expect(self, msg, HandshakeType::Certificate)?;
        let (version, _) = hs.negotiated()?;
        let tls13 = version == ProtocolVersion::TLS1_3;

        let certificate = if tls13 {
            decode(msg.body, Certificate::parse_tls13)?
        } else {
            decode(msg.body, Certificate::parse_tls12)?
        };
        if tls13 && !certificate.context.is_empty() {
            return Err(Error::protocol(
                AlertDescription::IllegalParameter,
                "server Certificate with request context",
            ));
        }

        let chain = certificate.to_chain();
        if chain.is_empty() {
            let alert = if tls13 {
                AlertDescription::DecodeError
            } else {
                AlertDescription::BadCertificate
            };
            return Err(Error::protocol(alert, "empty server certificate chain"));
        }

        hs.check_peer_chain(chain)?;
        hs.neg.transcript.add(msg.raw);

        Ok(if tls13 {
            State::AwaitServerCertificateVerify
        } else {
            State::AwaitServerKeyExchange
        })
    }

    pub(super) fn await_server_certificate_verify(
        self,
        hs: &mut Handshake,
        msg: &Message,
    ) -> Result<Self, Error> {
        expect(self, msg, HandshakeType::CertificateVerify)?;
        let verify = decode(msg.body, CertificateVerify::parse)?;

        let transcript_hash = hs.transcript_hash()?;
        let content = tls13_signed_content(true, &transcript_hash);
        hs.verify_peer(&content, verify.scheme, verify.signature)?;

        hs.neg.transcript.add(msg.raw);
        Ok(State::AwaitFinished)
    }

    pub(super) fn await_server_key_exchange(
        self,
        hs: &mut Handshake,
        msg: &Message,
    ) -> Result<Self, Error> {
        expect(self, msg, HandshakeType::ServerKeyExchange)?;
        let ske = decode(msg.body, ServerKeyExchange::parse)?;

        let params = ServerKeyExchange::params(ske.group, ske.public);
        let content =
            ServerKeyExchange::signed_content(&hs.neg.client_random, &hs.neg.server_random, &params);
        hs.verify_peer(&content, ske.signed.scheme, ske.signed.signature)?;

        debug!("Server key exchange with {:?}", ske.group);
        let kx = hs.ctx.start_exchange(ske.group)?;
        hs.neg.kx_public = kx.pub_key().to_vec();
        let pre_master_secret = hs.ctx.complete_exchange(kx, ske.public)?;
        let master_secret = hs.tls12_master_secret(&pre_master_secret)?;
        hs.tls12_derive_keys(master_secret)?;

        hs.neg.transcript.add(msg.raw);
        Ok(State::AwaitServerHelloDone)
    }

    /// TLS 1.2: optional CertificateRequest, then ServerHelloDone.
    pub(super) fn await_server_hello_done(
        self,
        hs: &mut Handshake,
        msg: &Message,
    ) -> Result<Self, Error> {
        match msg.msg_type {
            HandshakeType::CertificateRequest if hs.neg.cert_request.is_none() => {
                let request = decode(msg.body, CertificateRequest::parse_tls12)?;
                debug!(
                    "Received CertificateRequest ({} schemes, {} issuers)",
                    request.signature_schemes.len(),
                    request.authorities.len()
                );
                hs.neg.cert_request = Some(CertRequest {
                    context: Vec::new(),
                    schemes: request.signature_schemes,
                    issuers: request.authorities.iter().map(|a| a.to_vec()).collect(),
                });
                hs.neg.transcript.add(msg.raw);
                Ok(self)
            }
            HandshakeType::ServerHelloDone => {
                msg.expect_empty()?;
                hs.neg.transcript.add(msg.raw);
                hs.send_client_flight_tls12()?;
                Ok(State::AwaitChangeCipherSpec)
            }
            _ => Err(unexpected(self, msg)),
        }
    }

    pub(super) fn await_server_finished(
        self,
        hs: &mut Handshake,
        msg: &Message,
    ) -> Result<Self, Error> {
        expect(self, msg, HandshakeType::Finished)?;
        let finished = decode(msg.body, Finished::parse)?;
        let (version, suite) = hs.negotiated()?;

        if version == ProtocolVersion::TLS1_2 {
            let expected = hs.tls12_verify_data(false)?;
            hs.check_finished(finished.verify_data, &expected)?;
            hs.neg.server_verify_data = expected;
            hs.neg.transcript.add(msg.raw);

            if hs.neg.abbreviated {
                hs.send_change_cipher_spec_and_finished()?;
            }
            hs.complete()?;
            return Ok(State::Established);
        }

        let server_hs = Handshake::secret(&hs.neg.server_hs_secret, "server handshake secret")?;
        let expected = hs.tls13_verify_data(&server_hs)?;
        hs.check_finished(finished.verify_data, &expected)?;
        hs.neg.transcript.add(msg.raw);

        hs.tls13_application_secrets()?;
        let server_app = Handshake::secret(&hs.neg.server_app_secret, "server application secret")?;
        hs.read_keys = Some(hs.tls13_protection(suite, &server_app)?);

        let client_hs = Handshake::secret(&hs.neg.client_hs_secret, "client handshake secret")?;

        if let Some(request) = hs.neg.cert_request.take() {
            hs.choose_client_credential(&request)?;
            let chain = hs.neg.local_chain.clone().unwrap_or_default();
            let mut body = Vec::new();
            Certificate {
                context: &request.context,
                certificate_list: chain.iter().map(|c| c.as_slice()).collect(),
            }
            .serialize_tls13(&mut body);
            debug!("Sending client Certificate ({} certificates)", chain.len());
            hs.send(HandshakeType::Certificate, body);

            if !chain.is_empty() {
                let transcript_hash = hs.transcript_hash()?;
                let content = tls13_signed_content(false, &transcript_hash);
                let (scheme, signature) = hs.sign(&content)?;
                let mut body = Vec::new();
                CertificateVerify {
                    scheme,
                    signature: &signature,
                }
                .serialize(&mut body);
                hs.send(HandshakeType::CertificateVerify, body);
            }
        }

        let verify_data = hs.tls13_verify_data(&client_hs)?;
        hs.send_finished(&verify_data);

        let client_app = Handshake::secret(&hs.neg.client_app_secret, "client application secret")?;
        let keys = hs.tls13_protection(suite, &client_app)?;
        hs.outbound.push_back(Outbound::WriteKeys(keys));

        hs.complete()?;
        Ok(State::Established)
    }
}
