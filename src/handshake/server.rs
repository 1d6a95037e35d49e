// TLS Server Handshake Flows
//
// TLS 1.3 (RFC 8446):
// 1. Client sends ClientHello with key shares
// 2. Server answers with its whole first flight at once:
//    - ServerHello (plaintext)
//    - EncryptedExtensions, CertificateRequest (if client auth is enabled),
//      Certificate, CertificateVerify, Finished under the handshake key
//    - then switches writes to the application key
// 3. Client sends Certificate and CertificateVerify (if requested) and
//    Finished
// 4. Server sends NewSessionTicket messages
//
// TLS 1.2 (RFC 5246, ECDHE_ECDSA only):
// 1. Client sends ClientHello
//    - Known session id: abbreviated handshake, continue at 6
// 2. Server sends ServerHello, Certificate, ServerKeyExchange,
//    CertificateRequest (if client auth is enabled) and ServerHelloDone
// 3. Client sends Certificate (if requested), ClientKeyExchange and
//    CertificateVerify (if its Certificate was not empty)
// 4. Client sends ChangeCipherSpec and Finished
// 5. Server sends ChangeCipherSpec and Finished
// 6. Abbreviated: server sends ServerHello, ChangeCipherSpec and Finished,
//    the client answers with its own ChangeCipherSpec and Finished
//
// Renegotiation starts with a HelloRequest from the server or a new
// ClientHello from the client, and must carry renegotiation_info (RFC 5746).

use std::sync::Arc;

use super::{expect, secret_from, CertRequest, ClientAuth, Handshake, Message, Outbound, State};
use crate::alert::AlertDescription;
use crate::message::{decode, tls13_signed_content, Certificate, CertificateRequest};
use crate::message::{CertificateVerify, ClientHello, ClientKeyExchange, EncryptedExtensions};
use crate::message::{Finished, KeyShareEntry, NewSessionTicket, ServerHello, ServerKeyExchange};
use crate::message::{SessionId, DOWNGRADE_TLS12};
use crate::session::Session;
use crate::types::{HandshakeType, ProtocolVersion, SignatureScheme};
use crate::Error;

/// Lifetime advertised in NewSessionTicket, in seconds.
const TICKET_LIFETIME: u32 = 86400;

impl Handshake {
    fn choose_server_credential(&mut self, peer_schemes: &[SignatureScheme]) -> Result<(), Error> {
        let config = self.config.clone();
        let key_manager = config.key_manager().ok_or_else(|| {
            Error::protocol(
                AlertDescription::HandshakeFailure,
                "no server credentials configured",
            )
        })?;

        let schemes: Vec<SignatureScheme> = SignatureScheme::supported()
            .iter()
            .copied()
            .filter(|s| peer_schemes.contains(s))
            .collect();

        let alias = key_manager
            .choose_server_alias(&schemes, &[])
            .ok_or_else(|| {
                Error::protocol(
                    AlertDescription::HandshakeFailure,
                    "no server credential for the client's signature algorithms",
                )
            })?;
        self.load_credential(key_manager, &alias)?;

        let scheme = self.neg.signing_key.as_ref().map(|k| k.scheme());
        if !scheme.is_some_and(|s| schemes.contains(&s)) {
            return Err(Error::protocol(
                AlertDescription::HandshakeFailure,
                format!("credential {} cannot sign with {:?}", alias, schemes),
            ));
        }
        Ok(())
    }

    fn local_certificate(&self) -> Certificate<'_> {
        let chain = self.neg.local_chain.as_deref().unwrap_or_default();
        Certificate::new(chain.iter().map(|c| c.as_slice()).collect())
    }

    /// CertificateRequest for the configured client auth, if any.
    fn certificate_request(&mut self, tls13: bool) -> Option<Vec<u8>> {
        if self.params.client_auth == ClientAuth::None {
            return None;
        }
        let issuers = self
            .config
            .trust_manager()
            .map(|t| t.accepted_issuers())
            .unwrap_or_default();

        let request = CertificateRequest {
            context: &[],
            signature_schemes: SignatureScheme::supported().to_vec(),
            authorities: issuers.iter().map(|i| i.as_slice()).collect(),
        };
        let mut body = Vec::new();
        if tls13 {
            request.serialize_tls13(&mut body);
        } else {
            request.serialize_tls12(&mut body);
        }

        debug!(
            "Requesting client certificate ({:?}, {} issuers)",
            self.params.client_auth,
            issuers.len()
        );
        self.neg.cert_request = Some(CertRequest::default());
        Some(body)
    }

    fn server_random(&self, version: ProtocolVersion) -> Result<[u8; 32], Error> {
        let mut random = self.ctx.random()?;
        // RFC 8446 section 4.1.3
        if version == ProtocolVersion::TLS1_2 && self.params.protocols.contains(&ProtocolVersion::TLS1_3) {
            random[24..].copy_from_slice(&DOWNGRADE_TLS12);
        }
        Ok(random)
    }

    fn server_tls13_flight(&mut self, ch: &ClientHello) -> Result<State, Error> {
        let (_, suite) = self.negotiated()?;

        // Our most preferred group the client sent a share for
        let share = self
            .ctx
            .kx_groups()
            .find_map(|g| ch.key_shares.iter().find(|s| s.group == g.name()))
            .ok_or_else(|| {
                Error::protocol(
                    AlertDescription::HandshakeFailure,
                    "no key share for a supported group",
                )
            })?;
        let kx = self.ctx.start_exchange(share.group)?;
        let public = kx.pub_key().to_vec();
        let shared_secret = self.ctx.complete_exchange(kx, share.key_exchange)?;
        debug!("Key exchange with {:?}", share.group);

        self.neg.session_id = ch.session_id.clone();
        let hello = ServerHello {
            legacy_version: ProtocolVersion::TLS1_2,
            random: self.neg.server_random,
            session_id: ch.session_id.clone(),
            cipher_suite: suite.suite(),
            selected_version: Some(ProtocolVersion::TLS1_3),
            key_share: Some(KeyShareEntry {
                group: share.group,
                key_exchange: &public,
            }),
            renegotiation_info: None,
        };
        let mut body = Vec::new();
        hello.serialize(&mut body);
        self.send(HandshakeType::ServerHello, body);

        self.tls13_handshake_secrets(&shared_secret)?;
        let client_hs = Self::secret(&self.neg.client_hs_secret, "client handshake secret")?;
        let server_hs = Self::secret(&self.neg.server_hs_secret, "server handshake secret")?;
        self.read_keys = Some(self.tls13_protection(suite, &client_hs)?);
        let keys = self.tls13_protection(suite, &server_hs)?;
        self.outbound.push_back(Outbound::WriteKeys(keys));

        let mut body = Vec::new();
        EncryptedExtensions.serialize(&mut body);
        self.send(HandshakeType::EncryptedExtensions, body);

        let requested = match self.certificate_request(true) {
            Some(body) => {
                self.send(HandshakeType::CertificateRequest, body);
                true
            }
            None => false,
        };

        let mut body = Vec::new();
        self.local_certificate().serialize_tls13(&mut body);
        self.send(HandshakeType::Certificate, body);

        let transcript_hash = self.transcript_hash()?;
        let content = tls13_signed_content(true, &transcript_hash);
        let (scheme, signature) = self.sign(&content)?;
        let mut body = Vec::new();
        CertificateVerify {
            scheme,
            signature: &signature,
        }
        .serialize(&mut body);
        self.send(HandshakeType::CertificateVerify, body);

        let verify_data = self.tls13_verify_data(&server_hs)?;
        self.send_finished(&verify_data);

        self.tls13_application_secrets()?;
        let server_app = Self::secret(&self.neg.server_app_secret, "server application secret")?;
        let keys = self.tls13_protection(suite, &server_app)?;
        self.outbound.push_back(Outbound::WriteKeys(keys));

        Ok(if requested {
            State::AwaitClientCertificate
        } else {
            State::AwaitFinished
        })
    }

    fn server_tls12_flight(&mut self, ch: &ClientHello) -> Result<State, Error> {
        // Our most preferred group the client supports. No extension means
        // the client takes anything.
        let group = self
            .ctx
            .kx_groups()
            .map(|g| g.name())
            .find(|g| ch.supported_groups.is_empty() || ch.supported_groups.contains(g))
            .ok_or_else(|| {
                Error::protocol(AlertDescription::HandshakeFailure, "no common group")
            })?;

        self.neg.session_id = SessionId::new();
        self.neg.session_id.extend_from_slice(&self.ctx.random()?);

        self.send_tls12_server_hello()?;

        let mut body = Vec::new();
        self.local_certificate().serialize_tls12(&mut body);
        self.send(HandshakeType::Certificate, body);

        let kx = self.ctx.start_exchange(group)?;
        let public = kx.pub_key().to_vec();
        self.neg.key_shares.push(kx);

        let params = ServerKeyExchange::params(group, &public);
        let content =
            ServerKeyExchange::signed_content(&self.neg.client_random, &self.neg.server_random, &params);
        let (scheme, signature) = self.sign(&content)?;
        let mut body = Vec::new();
        ServerKeyExchange {
            group,
            public: &public,
            signed: CertificateVerify {
                scheme,
                signature: &signature,
            },
        }
        .serialize(&mut body);
        debug!("Server key exchange with {:?}", group);
        self.send(HandshakeType::ServerKeyExchange, body);

        let requested = match self.certificate_request(false) {
            Some(body) => {
                self.send(HandshakeType::CertificateRequest, body);
                true
            }
            None => false,
        };

        self.send(HandshakeType::ServerHelloDone, Vec::new());

        Ok(if requested {
            State::AwaitClientCertificate
        } else {
            State::AwaitClientKeyExchange
        })
    }

    fn send_tls12_server_hello(&mut self) -> Result<(), Error> {
        let (_, suite) = self.negotiated()?;

        let renegotiation_info = match (&self.established, self.neg.secure_renegotiation) {
            (_, false) => None,
            (None, true) => Some(Vec::new()),
            (Some(established), true) => {
                let mut data = established.client_verify_data.clone();
                data.extend_from_slice(&established.server_verify_data);
                Some(data)
            }
        };

        let hello = ServerHello {
            legacy_version: ProtocolVersion::TLS1_2,
            random: self.neg.server_random,
            session_id: self.neg.session_id.clone(),
            cipher_suite: suite.suite(),
            selected_version: None,
            key_share: None,
            renegotiation_info: renegotiation_info.as_deref(),
        };
        let mut body = Vec::new();
        hello.serialize(&mut body);
        self.send(HandshakeType::ServerHello, body);
        Ok(())
    }

    /// A cached session the client offered that we can resume.
    fn resumable_session(&self, ch: &ClientHello) -> Option<Arc<Session>> {
        let session = self.config.session_cache().get_by_id(&ch.session_id)?;
        let suite = session.cipher_suite()?;
        let usable = session.protocol() == Some(ProtocolVersion::TLS1_2)
            && ch.cipher_suites.contains(&suite)
            && self.params.cipher_suites.contains(&suite)
            // A required client certificate must have been seen
            && (self.params.client_auth != ClientAuth::Required
                || session.peer_certificates().is_ok());
        usable.then_some(session)
    }

    fn server_resume_tls12(&mut self, session: Arc<Session>) -> Result<State, Error> {
        let suite = session
            .cipher_suite()
            .and_then(|s| self.ctx.suite(s))
            .ok_or_else(|| Error::Internal("cached session without cipher suite".to_string()))?;
        let master_secret = session
            .master_secret()
            .map(secret_from)
            .ok_or_else(|| Error::Internal("cached session without master secret".to_string()))?;

        debug!("Resuming session {:02x?}", session.id());
        self.neg.suite = Some(suite);
        self.neg.session_id = SessionId::new();
        self.neg.session_id.extend_from_slice(session.id());
        self.neg.abbreviated = true;
        self.neg.resuming = Some(session);

        self.send_tls12_server_hello()?;
        self.tls12_derive_keys(master_secret)?;
        self.send_change_cipher_spec_and_finished()?;
        Ok(State::AwaitChangeCipherSpec)
    }

    fn send_new_session_ticket(&mut self, index: usize) -> Result<(), Error> {
        let random = self.ctx.random()?;
        let age_add = u32::from_be_bytes([random[0], random[1], random[2], random[3]]);
        let nonce = (index as u64).to_be_bytes();
        let ticket = NewSessionTicket {
            lifetime: TICKET_LIFETIME,
            age_add,
            nonce: &nonce,
            ticket: &random,
        };
        let mut body = Vec::new();
        ticket.serialize(&mut body);
        self.send(HandshakeType::NewSessionTicket, body);
        Ok(())
    }
}

impl State {
    pub(super) fn await_client_hello(self, hs: &mut Handshake, msg: &Message) -> Result<Self, Error> {
        expect(self, msg, HandshakeType::ClientHello)?;
        let renegotiating = hs.established.is_some();
        if renegotiating {
            hs.restart();
        }

        let ch = decode(msg.body, ClientHello::parse)?;

        let enabled = match &hs.established {
            // Renegotiation keeps the version
            Some(established) => vec![established.version],
            None => hs.params.protocols.clone(),
        };
        let version = ch.negotiate_version(&enabled).ok_or_else(|| {
            Error::protocol(
                AlertDescription::ProtocolVersion,
                format!("no common protocol version, client offers {}", ch.legacy_version),
            )
        })?;

        if version == ProtocolVersion::TLS1_2 {
            // RFC 5746
            match &hs.established {
                None => {
                    if ch.renegotiation_info.is_some_and(|ri| !ri.is_empty()) {
                        return Err(Error::protocol(
                            AlertDescription::HandshakeFailure,
                            "non-empty renegotiation_info on initial handshake",
                        ));
                    }
                    hs.neg.secure_renegotiation =
                        ch.has_renegotiation_scsv() || ch.renegotiation_info.is_some();
                }
                Some(established) => {
                    if ch.has_renegotiation_scsv()
                        || ch.renegotiation_info != Some(&established.client_verify_data[..])
                    {
                        return Err(Error::protocol(
                            AlertDescription::HandshakeFailure,
                            "renegotiation_info mismatch",
                        ));
                    }
                    hs.neg.secure_renegotiation = true;
                }
            }
        }

        hs.neg.version = Some(version);
        hs.neg.client_random = ch.random;
        hs.neg.server_random = hs.server_random(version)?;
        hs.neg.transcript.add(msg.raw);

        if version == ProtocolVersion::TLS1_2 && !renegotiating {
            if let Some(session) = hs.resumable_session(&ch) {
                return hs.server_resume_tls12(session);
            }
        }

        let suite = hs
            .params
            .cipher_suites
            .iter()
            .copied()
            .filter(|s| s.protocol() == Some(version))
            .find(|s| ch.cipher_suites.contains(s))
            .and_then(|s| hs.ctx.suite(s))
            .ok_or_else(|| {
                Error::protocol(AlertDescription::HandshakeFailure, "no common cipher suite")
            })?;
        hs.neg.suite = Some(suite);
        debug!("Negotiated {} {}", version, suite.suite());

        // Without signature_algorithms a TLS 1.2 client accepts SHA-256
        let peer_schemes = if ch.signature_algorithms.is_empty() {
            vec![SignatureScheme::ECDSA_SECP256R1_SHA256]
        } else {
            ch.signature_algorithms.clone()
        };
        hs.choose_server_credential(&peer_schemes)?;

        match version {
            ProtocolVersion::TLS1_3 => hs.server_tls13_flight(&ch),
            _ => hs.server_tls12_flight(&ch),
        }
    }

    pub(super) fn await_client_certificate(
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
        let chain = certificate.to_chain();
        hs.neg.transcript.add(msg.raw);

        if chain.is_empty() {
            if hs.params.client_auth == ClientAuth::Required {
                let alert = if tls13 {
                    AlertDescription::CertificateRequired
                } else {
                    AlertDescription::HandshakeFailure
                };
                return Err(Error::protocol(alert, "client did not send a certificate"));
            }
            debug!("Client sent no certificate, continuing unauthenticated");
            return Ok(if tls13 {
                State::AwaitFinished
            } else {
                State::AwaitClientKeyExchange
            });
        }

        hs.check_peer_chain(chain)?;
        Ok(if tls13 {
            State::AwaitClientCertificateVerify
        } else {
            State::AwaitClientKeyExchange
        })
    }

    pub(super) fn await_client_key_exchange(
        self,
        hs: &mut Handshake,
        msg: &Message,
    ) -> Result<Self, Error> {
        expect(self, msg, HandshakeType::ClientKeyExchange)?;
        let cke = decode(msg.body, ClientKeyExchange::parse)?;

        let kx = hs
            .neg
            .key_shares
            .pop()
            .ok_or_else(|| Error::Internal("no pending key exchange".to_string()))?;
        let pre_master_secret = hs.ctx.complete_exchange(kx, cke.public)?;
        let master_secret = hs.tls12_master_secret(&pre_master_secret)?;
        hs.tls12_derive_keys(master_secret)?;

        hs.neg.transcript.add(msg.raw);
        Ok(if hs.neg.peer_chain.is_some() {
            State::AwaitClientCertificateVerify
        } else {
            State::AwaitChangeCipherSpec
        })
    }

    pub(super) fn await_client_certificate_verify(
        self,
        hs: &mut Handshake,
        msg: &Message,
    ) -> Result<Self, Error> {
        expect(self, msg, HandshakeType::CertificateVerify)?;
        let verify = decode(msg.body, CertificateVerify::parse)?;
        let (version, _) = hs.negotiated()?;

        let content = match version {
            ProtocolVersion::TLS1_3 => {
                let transcript_hash = hs.transcript_hash()?;
                tls13_signed_content(false, &transcript_hash)
            }
            _ => hs.neg.transcript.bytes().to_vec(),
        };
        hs.verify_peer(&content, verify.scheme, verify.signature)?;

        hs.neg.transcript.add(msg.raw);
        Ok(match version {
            ProtocolVersion::TLS1_3 => State::AwaitFinished,
            _ => State::AwaitChangeCipherSpec,
        })
    }

    pub(super) fn await_client_finished(
        self,
        hs: &mut Handshake,
        msg: &Message,
    ) -> Result<Self, Error> {
        expect(self, msg, HandshakeType::Finished)?;
        let finished = decode(msg.body, Finished::parse)?;
        let (version, suite) = hs.negotiated()?;

        if version == ProtocolVersion::TLS1_2 {
            let expected = hs.tls12_verify_data(true)?;
            hs.check_finished(finished.verify_data, &expected)?;
            hs.neg.client_verify_data = expected;
            hs.neg.transcript.add(msg.raw);

            if !hs.neg.abbreviated {
                hs.send_change_cipher_spec_and_finished()?;
            }
            hs.complete()?;
            return Ok(State::Established);
        }

        let client_hs = Handshake::secret(&hs.neg.client_hs_secret, "client handshake secret")?;
        let expected = hs.tls13_verify_data(&client_hs)?;
        hs.check_finished(finished.verify_data, &expected)?;
        hs.neg.transcript.add(msg.raw);

        let client_app = Handshake::secret(&hs.neg.client_app_secret, "client application secret")?;
        hs.read_keys = Some(hs.tls13_protection(suite, &client_app)?);

        for index in 0..hs.config.session_tickets() {
            hs.send_new_session_ticket(index)?;
        }
        hs.complete()?;
        Ok(State::Established)
    }
}
