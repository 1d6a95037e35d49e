use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::alert::{Alert, AlertDescription, AlertLevel};
use crate::buffer::ByteBuf;
use crate::config::Config;
use crate::crypto::{validate_cipher_suites, validate_protocols};
use crate::error::ErrorKind;
use crate::handshake::{ClientAuth, Handshake, HandshakeParams, HandshakeStatus, Outbound};
use crate::message::{decode, next_message};
use crate::record::{decode_header, encode_record, max_fragment_len, RecordProtection, HEADER_LEN};
use crate::session::Session;
use crate::task::{self, DelegatedTask, TaskSlot};
use crate::types::{CipherSuite, ContentType, ProtocolVersion};
use crate::Error;

/// Outcome of a single `wrap` or `unwrap` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The call completed normally.
    Ok,
    /// The destination cannot hold the output. Nothing was consumed or
    /// produced.
    BufferOverflow,
    /// The source does not hold a complete record. Nothing was consumed.
    BufferUnderflow,
    /// This direction of the engine is closed.
    Closed,
}

/// What a `wrap` or `unwrap` call did.
///
/// `bytes_consumed` and `bytes_produced` always equal how far the call moved
/// the source and destination positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineResult {
    pub status: Status,
    pub handshake_status: HandshakeStatus,
    pub bytes_consumed: usize,
    pub bytes_produced: usize,
}

impl fmt::Display for EngineResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}/{:?} consumed {} produced {}",
            self.status, self.handshake_status, self.bytes_consumed, self.bytes_produced
        )
    }
}

/// How [`Engine::force_close_inbound`] found the inbound direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// The peer's close_notify had been received.
    Graceful,
    /// The peer never sent close_notify.
    Abrupt,
}

/// Non-blocking TLS engine for one end of one connection.
///
/// The engine performs no I/O. [`Engine::wrap`] turns application data into
/// records for the peer, [`Engine::unwrap`] turns the peer's records back
/// into application data. Both also carry the handshake, which needs
/// neither: the caller keeps calling whichever the [`HandshakeStatus`] asks
/// for, and runs [`DelegatedTask`]s when it is `NeedTask`.
///
/// Every call produces or consumes at most one record.
pub struct Engine {
    config: Arc<Config>,
    is_client: bool,

    /// Settings for the next handshake.
    params: HandshakeParams,

    /// `None` while lent to a delegated task.
    handshake: Option<Handshake>,
    task_slot: TaskSlot,

    /// Message waiting to be handed out as a delegated task.
    pending_task: Option<Vec<u8>>,

    read: Option<RecordProtection>,
    write: Option<RecordProtection>,

    /// Handshake bytes received but not yet processed.
    hs_buffer: Vec<u8>,

    session: Option<Arc<Session>>,
    placeholder: OnceCell<Arc<Session>>,

    pending_alert: Option<AlertDescription>,
    close_notify_pending: bool,
    close_notify_received: bool,
    outbound_done: bool,
    inbound_done: bool,
    records_received: bool,
    /// A record from the peer has been opened with the read keys.
    peer_protected: bool,
}

impl Engine {
    /// Create a client engine.
    pub fn client(config: Arc<Config>) -> Self {
        Self::new(config, true, None, None)
    }

    /// Create a client engine for a known peer.
    ///
    /// Host and port identify the peer in the session cache, so that a
    /// later engine for the same peer can resume the TLS 1.2 session.
    pub fn client_for(config: Arc<Config>, host: impl Into<String>, port: u16) -> Self {
        Self::new(config, true, Some(host.into()), Some(port))
    }

    /// Create a server engine.
    pub fn server(config: Arc<Config>) -> Self {
        Self::new(config, false, None, None)
    }

    fn new(config: Arc<Config>, is_client: bool, host: Option<String>, port: Option<u16>) -> Self {
        let mut params = HandshakeParams::from_config(&config);
        params.peer_host = host;
        params.peer_port = port;

        Engine {
            handshake: Some(Handshake::new(config.clone(), is_client, params.clone())),
            config,
            is_client,
            params,
            task_slot: task::new_slot(),
            pending_task: None,
            read: None,
            write: None,
            hs_buffer: Vec::new(),
            session: None,
            placeholder: OnceCell::new(),
            pending_alert: None,
            close_notify_pending: false,
            close_notify_received: false,
            outbound_done: false,
            inbound_done: false,
            records_received: false,
            peer_protected: false,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn use_client_mode(&self) -> bool {
        self.is_client
    }

    /// Switch between client and server role.
    ///
    /// Fails with [`Error::IllegalState`] once the handshake has started.
    pub fn set_use_client_mode(&mut self, client: bool) -> Result<(), Error> {
        if self.is_started() {
            return Err(Error::IllegalState(
                "cannot change mode after the handshake started",
            ));
        }
        if client != self.is_client {
            self.is_client = client;
            self.handshake = Some(Handshake::new(
                self.config.clone(),
                client,
                self.params.clone(),
            ));
        }
        Ok(())
    }

    pub fn peer_host(&self) -> Option<&str> {
        self.params.peer_host.as_deref()
    }

    pub fn peer_port(&self) -> Option<u16> {
        self.params.peer_port
    }

    /// Require a client certificate (server only).
    ///
    /// Replaces [`Engine::set_want_client_auth`]. Takes effect at the next
    /// handshake.
    pub fn set_need_client_auth(&mut self, need: bool) {
        self.params.client_auth = match (need, self.params.client_auth) {
            (true, _) => ClientAuth::Required,
            (false, ClientAuth::Required) => ClientAuth::None,
            (false, current) => current,
        };
        self.update_params();
    }

    pub fn need_client_auth(&self) -> bool {
        self.params.client_auth == ClientAuth::Required
    }

    /// Request, but do not require, a client certificate (server only).
    ///
    /// Replaces [`Engine::set_need_client_auth`]. Takes effect at the next
    /// handshake.
    pub fn set_want_client_auth(&mut self, want: bool) {
        self.params.client_auth = match (want, self.params.client_auth) {
            (true, _) => ClientAuth::Wanted,
            (false, ClientAuth::Wanted) => ClientAuth::None,
            (false, current) => current,
        };
        self.update_params();
    }

    pub fn want_client_auth(&self) -> bool {
        self.params.client_auth == ClientAuth::Wanted
    }

    /// Cipher suites of the crypto provider.
    pub fn supported_cipher_suites(&self) -> Vec<CipherSuite> {
        self.config
            .crypto_provider()
            .cipher_suites
            .iter()
            .map(|s| s.suite())
            .collect()
    }

    pub fn enabled_cipher_suites(&self) -> &[CipherSuite] {
        &self.params.cipher_suites
    }

    /// Set the cipher suites for the next handshake.
    ///
    /// Unsupported suites are dropped. Fails with [`Error::ConfigError`] if
    /// none is left.
    pub fn set_enabled_cipher_suites(&mut self, suites: &[CipherSuite]) -> Result<(), Error> {
        self.params.cipher_suites = validate_cipher_suites(self.config.crypto_provider(), suites)?;
        self.update_params();
        Ok(())
    }

    pub fn supported_protocols(&self) -> &'static [ProtocolVersion] {
        ProtocolVersion::supported()
    }

    pub fn enabled_protocols(&self) -> &[ProtocolVersion] {
        &self.params.protocols
    }

    /// Set the protocol versions for the next handshake.
    ///
    /// Unsupported versions are dropped. Fails with [`Error::ConfigError`]
    /// if none is left.
    pub fn set_enabled_protocols(&mut self, protocols: &[ProtocolVersion]) -> Result<(), Error> {
        self.params.protocols = validate_protocols(protocols)?;
        self.update_params();
        Ok(())
    }

    fn update_params(&mut self) {
        if let Some(hs) = self.handshake.as_mut() {
            hs.set_params(self.params.clone());
        }
    }

    fn is_started(&self) -> bool {
        self.records_received || self.handshake.as_ref().map_or(true, |h| h.is_started())
    }

    /// Start a handshake.
    ///
    /// Not needed for the first handshake, `wrap` and `unwrap` start it
    /// implicitly. After a completed TLS 1.2 handshake this renegotiates,
    /// after TLS 1.3 it updates the traffic keys. Fails with
    /// [`Error::IllegalState`] while a handshake is in progress.
    pub fn begin_handshake(&mut self) -> Result<(), Error> {
        if self.outbound_done || self.inbound_done || self.pending_alert.is_some() {
            return Err(Error::IllegalState("engine is closed"));
        }
        if self.pending_task.is_some() {
            return Err(Error::IllegalState("delegated task outstanding"));
        }
        let Some(hs) = self.handshake.as_mut() else {
            return Err(Error::IllegalState("delegated task outstanding"));
        };
        match hs.begin() {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::Usage => Err(e),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// What the engine needs next.
    ///
    /// Never [`HandshakeStatus::Finished`], that is only reported in the
    /// result of the call that completed a handshake.
    pub fn handshake_status(&self) -> HandshakeStatus {
        if self.pending_alert.is_some() || self.close_notify_pending {
            return HandshakeStatus::NeedWrap;
        }
        if self.outbound_done && self.inbound_done {
            return HandshakeStatus::NotHandshaking;
        }

        let Some(hs) = &self.handshake else {
            let outcome = self.task_slot.lock().unwrap_or_else(|e| e.into_inner());
            return match &*outcome {
                None => HandshakeStatus::NeedTask,
                Some(o) => match &o.result {
                    Ok(()) => o.handshake.status(),
                    Err(e) if e.alert().is_some() => HandshakeStatus::NeedWrap,
                    Err(_) => HandshakeStatus::NotHandshaking,
                },
            };
        };
        if self.pending_task.is_some() {
            return HandshakeStatus::NeedTask;
        }

        if self.outbound_done {
            // Up to TLS 1.2 the peer must answer our close_notify
            let half_close = hs.version().is_some_and(|v| v.supports_half_close());
            return if half_close || !hs.is_started() {
                HandshakeStatus::NotHandshaking
            } else {
                HandshakeStatus::NeedUnwrap
            };
        }
        hs.status()
    }

    /// Take the next delegated task, if the handshake waits for one.
    pub fn delegated_task(&mut self) -> Option<DelegatedTask> {
        let message = self.pending_task.take()?;
        let Some(handshake) = self.handshake.take() else {
            self.pending_task = Some(message);
            return None;
        };
        Some(DelegatedTask::new(handshake, message, self.task_slot.clone()))
    }

    /// Session of the last completed handshake.
    ///
    /// Before the first handshake completed this is a placeholder without
    /// protocol or cipher suite, reporting the buffer sizes to use.
    pub fn session(&self) -> Arc<Session> {
        match &self.session {
            Some(session) => session.clone(),
            None => self
                .placeholder
                .get_or_init(|| Arc::new(Session::placeholder(self.config.accept_large_fragments())))
                .clone(),
        }
    }

    /// Whether no more records will be produced.
    pub fn is_outbound_done(&self) -> bool {
        self.outbound_done
    }

    /// Whether no more records will be accepted.
    pub fn is_inbound_done(&self) -> bool {
        self.inbound_done
    }

    /// Send close_notify with the next `wrap`.
    ///
    /// Application data passed to later wraps is not consumed.
    pub fn close_outbound(&mut self) {
        if self.outbound_done || self.close_notify_pending || self.pending_alert.is_some() {
            return;
        }
        if !self.is_started() {
            debug!("Closing outbound before handshake");
            self.outbound_done = true;
            return;
        }
        debug!("Closing outbound");
        self.close_notify_pending = true;
    }

    /// Stop accepting records.
    ///
    /// Fails with [`Error::InboundTruncated`] if the peer has not sent
    /// close_notify, since then data may have been cut off. An
    /// internal_error alert is queued in that case.
    pub fn close_inbound(&mut self) -> Result<(), Error> {
        if self.inbound_done {
            return Ok(());
        }
        self.inbound_done = true;
        if !self.is_started() || self.close_notify_received {
            return Ok(());
        }
        Err(self.fail(Error::InboundTruncated))
    }

    /// Stop accepting records, whether or not the peer closed cleanly.
    pub fn force_close_inbound(&mut self) -> CloseKind {
        self.inbound_done = true;
        if self.close_notify_received {
            CloseKind::Graceful
        } else {
            debug!("Inbound closed without close_notify");
            CloseKind::Abrupt
        }
    }

    /// Produce at most one record from the handshake or from `srcs`.
    pub fn wrap(&mut self, srcs: &mut [ByteBuf], dst: &mut ByteBuf) -> Result<EngineResult, Error> {
        let len = srcs.len();
        self.wrap_range(srcs, 0, len, dst)
    }

    /// Like [`Engine::wrap`], reading only `srcs[offset..offset + length]`.
    pub fn wrap_range(
        &mut self,
        srcs: &mut [ByteBuf],
        offset: usize,
        length: usize,
        dst: &mut ByteBuf,
    ) -> Result<EngineResult, Error> {
        check_range(srcs.len(), offset, length)?;
        if dst.is_read_only() {
            return Err(Error::ReadOnlyBuffer);
        }

        match self.do_wrap(&mut srcs[offset..offset + length], dst) {
            Ok(result) => {
                trace!("wrap: {}", result);
                Ok(result)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Consume at most one record from `src`.
    pub fn unwrap(&mut self, src: &mut ByteBuf, dsts: &mut [ByteBuf]) -> Result<EngineResult, Error> {
        let len = dsts.len();
        self.unwrap_range(src, dsts, 0, len)
    }

    /// Like [`Engine::unwrap`], writing only into `dsts[offset..offset + length]`.
    pub fn unwrap_range(
        &mut self,
        src: &mut ByteBuf,
        dsts: &mut [ByteBuf],
        offset: usize,
        length: usize,
    ) -> Result<EngineResult, Error> {
        check_range(dsts.len(), offset, length)?;
        let dsts = &mut dsts[offset..offset + length];
        if dsts.is_empty() {
            return Err(Error::NoDestination);
        }
        if dsts.iter().any(|d| d.is_read_only()) {
            return Err(Error::ReadOnlyBuffer);
        }

        match self.do_unwrap(src, dsts) {
            Ok(result) => {
                trace!("unwrap: {}", result);
                Ok(result)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Record a fatal error and close what it closes.
    fn fail(&mut self, e: Error) -> Error {
        match e.kind() {
            ErrorKind::Usage => {}
            ErrorKind::Protocol => {
                self.inbound_done = true;
                self.close_notify_pending = false;
                match e.alert() {
                    Some(alert) if !self.outbound_done => {
                        debug!("Fatal error, sending {} alert: {}", alert, e);
                        self.pending_alert = Some(alert);
                    }
                    _ => {
                        debug!("Fatal error: {}", e);
                        self.outbound_done = true;
                    }
                }
            }
            ErrorKind::Crypto | ErrorKind::Internal => {
                warn!("Closing engine: {}", e);
                self.inbound_done = true;
                self.outbound_done = true;
                self.close_notify_pending = false;
                self.pending_alert = None;
            }
        }
        e
    }

    fn result(&self, status: Status, consumed: usize, produced: usize, finished: bool) -> EngineResult {
        EngineResult {
            status,
            handshake_status: if finished {
                HandshakeStatus::Finished
            } else {
                self.handshake_status()
            },
            bytes_consumed: consumed,
            bytes_produced: produced,
        }
    }

    fn do_wrap(&mut self, srcs: &mut [ByteBuf], dst: &mut ByteBuf) -> Result<EngineResult, Error> {
        if let Some(alert) = self.pending_alert {
            let Some(produced) = self.write_record(ContentType::Alert, &Alert::fatal(alert).serialize(), dst)?
            else {
                return Ok(self.result(Status::BufferOverflow, 0, 0, false));
            };
            debug!("Sent fatal alert {}", alert);
            self.pending_alert = None;
            self.outbound_done = true;
            self.inbound_done = true;
            return Ok(self.result(Status::Closed, 0, produced, false));
        }

        if self.outbound_done {
            return Ok(self.result(Status::Closed, 0, 0, false));
        }

        if self.close_notify_pending {
            let Some(produced) = self.write_record(ContentType::Alert, &Alert::close_notify().serialize(), dst)?
            else {
                return Ok(self.result(Status::BufferOverflow, 0, 0, false));
            };
            debug!("Sent close_notify");
            self.close_notify_pending = false;
            self.outbound_done = true;
            return Ok(self.result(Status::Closed, 0, produced, false));
        }

        if !self.reclaim_handshake()? || self.pending_task.is_some() {
            return Ok(self.result(Status::Ok, 0, 0, false));
        }

        let hs = self.handshake.as_mut().ok_or_else(lent)?;
        if !hs.is_started() {
            hs.begin()?;
        }

        let mut finished = self.drain_markers();

        if let Some((content_type, plaintext)) = self.next_handshake_record()? {
            return match self.write_record(content_type, &plaintext, dst)? {
                Some(produced) => {
                    finished |= self.drain_markers();
                    Ok(self.result(Status::Ok, 0, produced, finished))
                }
                None => {
                    self.unpop_handshake_record(content_type, plaintext)?;
                    Ok(self.result(Status::BufferOverflow, 0, 0, finished))
                }
            };
        }

        // No application keys before the first handshake completed
        if self.session.is_none() {
            return Ok(self.result(Status::Ok, 0, 0, finished));
        }

        let available: usize = srcs.iter().map(|s| s.remaining()).sum();
        if available == 0 {
            return Ok(self.result(Status::Ok, 0, 0, finished));
        }

        let len = available.min(max_fragment_len(self.config.accept_large_fragments()));
        let overhead = self.write.as_ref().map_or(0, |w| w.overhead());
        if dst.remaining() < HEADER_LEN + len + overhead {
            return Ok(self.result(Status::BufferOverflow, 0, 0, finished));
        }

        let mut plaintext = vec![0u8; len];
        let mut filled = 0;
        for src in srcs.iter_mut() {
            if filled == len {
                break;
            }
            filled += src.get_slice(&mut plaintext[filled..]);
        }

        let produced = self
            .write_record(ContentType::ApplicationData, &plaintext, dst)?
            .ok_or_else(|| Error::Internal("application record does not fit".to_string()))?;
        Ok(self.result(Status::Ok, len, produced, finished))
    }

    fn do_unwrap(&mut self, src: &mut ByteBuf, dsts: &mut [ByteBuf]) -> Result<EngineResult, Error> {
        if self.inbound_done {
            return Ok(self.result(Status::Closed, 0, 0, false));
        }

        if !self.reclaim_handshake()? || self.pending_task.is_some() {
            return Ok(self.result(Status::Ok, 0, 0, false));
        }

        let hs = self.handshake.as_mut().ok_or_else(lent)?;
        if !hs.is_started() {
            hs.begin()?;
        }

        let mut finished = self.drain_markers();

        // Messages left behind by a delegated task come before new records
        if self.process_buffered()? {
            finished |= self.drain_markers();
            return Ok(self.result(Status::Ok, 0, 0, finished));
        }

        let large = self.config.accept_large_fragments();
        let allow_sslv2 = !self.is_client && !self.records_received;
        let Some(header) = decode_header(src.remaining_slice(), large, allow_sslv2)? else {
            return Ok(self.result(Status::BufferUnderflow, 0, 0, finished));
        };
        let record_len = header.record_len();
        if src.remaining() < record_len {
            return Ok(self.result(Status::BufferUnderflow, 0, 0, finished));
        }

        let max = max_fragment_len(large);
        // In TLS 1.3 a peer without handshake keys yet sends alerts in the clear
        let plain_alert = header.content_type == ContentType::Alert
            && !self.peer_protected
            && self.read.as_ref().is_some_and(|r| r.is_tls13());
        let protected = self.read.is_some() && !plain_alert;
        let (content_type, plaintext) = {
            let fragment = &src.remaining_slice()[HEADER_LEN..record_len];
            match &self.read {
                Some(read) if protected => read.open(&header, fragment, max)?,
                _ => {
                    if fragment.len() > max {
                        return Err(Error::protocol(
                            AlertDescription::RecordOverflow,
                            format!("plaintext of {} bytes exceeds {}", fragment.len(), max),
                        ));
                    }
                    (header.content_type, fragment.to_vec())
                }
            }
        };

        match content_type {
            ContentType::ApplicationData => {
                if self.session.is_none() {
                    return Err(Error::protocol(
                        AlertDescription::UnexpectedMessage,
                        "application data before handshake completion",
                    ));
                }
                let capacity: usize = dsts.iter().map(|d| d.remaining()).sum();
                if plaintext.len() > capacity {
                    return Ok(self.result(Status::BufferOverflow, 0, 0, finished));
                }
                self.commit_record(src, record_len, protected)?;

                let mut rest = &plaintext[..];
                for dst in dsts.iter_mut() {
                    let n = rest.len().min(dst.remaining());
                    dst.put_slice(&rest[..n]);
                    rest = &rest[n..];
                }
                Ok(self.result(Status::Ok, record_len, plaintext.len(), finished))
            }

            ContentType::Handshake => {
                if plaintext.is_empty() {
                    return Err(Error::protocol(
                        AlertDescription::UnexpectedMessage,
                        "empty handshake record",
                    ));
                }
                self.commit_record(src, record_len, protected)?;
                self.hs_buffer.extend_from_slice(&plaintext);
                self.process_buffered()?;
                finished |= self.drain_markers();
                Ok(self.result(Status::Ok, record_len, 0, finished))
            }

            ContentType::ChangeCipherSpec => {
                if plaintext != [1] {
                    return Err(Error::protocol(
                        AlertDescription::DecodeError,
                        "malformed ChangeCipherSpec",
                    ));
                }
                if !self.hs_buffer.is_empty() {
                    return Err(Error::protocol(
                        AlertDescription::UnexpectedMessage,
                        "ChangeCipherSpec inside a handshake message",
                    ));
                }
                self.commit_record(src, record_len, protected)?;
                let hs = self.handshake.as_mut().ok_or_else(lent)?;
                let keys = hs.change_cipher_spec()?;
                trace!("Read keys installed after ChangeCipherSpec");
                self.read = Some(keys);
                Ok(self.result(Status::Ok, record_len, 0, finished))
            }

            ContentType::Alert => {
                self.commit_record(src, record_len, protected)?;
                let alert = decode(&plaintext, Alert::parse)?;
                self.receive_alert(alert)?;
                let status = if self.inbound_done {
                    Status::Closed
                } else {
                    Status::Ok
                };
                Ok(self.result(status, record_len, 0, finished))
            }

            ContentType::Unknown(v) => Err(Error::protocol(
                AlertDescription::UnexpectedMessage,
                format!("unexpected record content type {}", v),
            )),
        }
    }

    fn receive_alert(&mut self, alert: Alert) -> Result<(), Error> {
        let version = self.handshake.as_ref().and_then(|h| h.version());

        if alert.description == AlertDescription::CloseNotify {
            debug!("Received close_notify");
            self.close_notify_received = true;
            self.inbound_done = true;
            // Up to TLS 1.2 we answer with our own close_notify
            let half_close = version.is_some_and(|v| v.supports_half_close());
            if !half_close && !self.outbound_done {
                self.close_notify_pending = true;
            }
            return Ok(());
        }

        let tolerated = alert.description == AlertDescription::UserCanceled
            || version != Some(ProtocolVersion::TLS1_3);
        if alert.level == AlertLevel::Warning && tolerated {
            warn!("Ignoring warning alert {}", alert.description);
            return Ok(());
        }

        debug!("Received fatal alert {}", alert.description);
        Err(Error::PeerAlert(alert.description))
    }

    /// Take the state machine back from a delegated task.
    ///
    /// Returns false while the task has not run.
    fn reclaim_handshake(&mut self) -> Result<bool, Error> {
        if self.handshake.is_some() {
            return Ok(true);
        }
        let Some(outcome) = task::take_outcome(&self.task_slot) else {
            return Ok(false);
        };

        let mut handshake = outcome.handshake;
        handshake.set_params(self.params.clone());
        self.handshake = Some(handshake);
        outcome.result?;

        self.install_read_keys()?;
        Ok(true)
    }

    /// Feed complete buffered messages to the state machine, stopping at
    /// the first that needs a delegated task. Returns whether any message
    /// was taken from the buffer.
    fn process_buffered(&mut self) -> Result<bool, Error> {
        let max = self.config.max_handshake_message_size();
        let mut progress = false;

        while self.pending_task.is_none() {
            let Some((msg_type, total)) = next_message(&self.hs_buffer, max)? else {
                break;
            };
            let message: Vec<u8> = self.hs_buffer.drain(..total).collect();
            progress = true;

            let hs = self.handshake.as_mut().ok_or_else(lent)?;
            if hs.is_expensive(msg_type) {
                trace!("Delegating {:?}", msg_type);
                self.pending_task = Some(message);
                break;
            }
            hs.process(&message)?;
            self.install_read_keys()?;
        }
        Ok(progress)
    }

    fn install_read_keys(&mut self) -> Result<(), Error> {
        let Some(keys) = self.handshake.as_mut().and_then(|h| h.take_read_keys()) else {
            return Ok(());
        };
        // A key change must fall on a record boundary
        if !self.hs_buffer.is_empty() {
            return Err(Error::protocol(
                AlertDescription::UnexpectedMessage,
                "handshake data after a key change in the same record",
            ));
        }
        trace!("Read keys installed");
        self.read = Some(keys);
        Ok(())
    }

    /// Apply key switches and completion markers at the front of the
    /// outbound queue. Returns whether a handshake or post-handshake
    /// exchange completed.
    fn drain_markers(&mut self) -> bool {
        let Some(hs) = self.handshake.as_mut() else {
            return false;
        };
        let mut finished = false;
        while hs.front_outbound().is_some_and(|o| !o.is_record()) {
            match hs.pop_outbound() {
                Some(Outbound::WriteKeys(keys)) => {
                    trace!("Write keys installed");
                    self.write = Some(keys);
                }
                Some(Outbound::Complete(session)) => {
                    self.session = Some(session);
                    finished = true;
                }
                Some(Outbound::PostHandshake) => finished = true,
                _ => {}
            }
        }
        finished
    }

    /// Next handshake record plaintext, coalescing queued messages up to
    /// the fragment limit and splitting larger ones.
    fn next_handshake_record(&mut self) -> Result<Option<(ContentType, Vec<u8>)>, Error> {
        let max = max_fragment_len(self.config.accept_large_fragments());
        let hs = self.handshake.as_mut().ok_or_else(lent)?;

        match hs.pop_outbound() {
            None => Ok(None),
            Some(Outbound::ChangeCipherSpec) => Ok(Some((ContentType::ChangeCipherSpec, vec![1]))),
            Some(Outbound::Message(mut data)) => {
                while let Some(Outbound::Message(next)) = hs.front_outbound() {
                    if data.len() + next.len() > max {
                        break;
                    }
                    if let Some(Outbound::Message(next)) = hs.pop_outbound() {
                        data.extend_from_slice(&next);
                    }
                }
                if data.len() > max {
                    let rest = data.split_off(max);
                    hs.push_front_outbound(Outbound::Message(rest));
                }
                Ok(Some((ContentType::Handshake, data)))
            }
            Some(marker) => {
                hs.push_front_outbound(marker);
                Ok(None)
            }
        }
    }

    fn unpop_handshake_record(&mut self, content_type: ContentType, plaintext: Vec<u8>) -> Result<(), Error> {
        let hs = self.handshake.as_mut().ok_or_else(lent)?;
        let item = match content_type {
            ContentType::ChangeCipherSpec => Outbound::ChangeCipherSpec,
            _ => Outbound::Message(plaintext),
        };
        hs.push_front_outbound(item);
        Ok(())
    }

    /// Protect and write one record. `None`, with nothing written, if it
    /// does not fit.
    fn write_record(
        &mut self,
        content_type: ContentType,
        plaintext: &[u8],
        dst: &mut ByteBuf,
    ) -> Result<Option<usize>, Error> {
        let overhead = self.write.as_ref().map_or(0, |w| w.overhead());
        if dst.remaining() < HEADER_LEN + plaintext.len() + overhead {
            return Ok(None);
        }

        let (outer_type, fragment) = match self.write.as_mut() {
            Some(write) => write.seal(content_type, plaintext)?,
            None => (content_type, plaintext.to_vec()),
        };

        let start = dst.position();
        if !encode_record(outer_type, &fragment, dst) {
            return Err(Error::Internal("record larger than computed".to_string()));
        }
        Ok(Some(dst.position() - start))
    }

    fn commit_record(
        &mut self,
        src: &mut ByteBuf,
        record_len: usize,
        protected: bool,
    ) -> Result<(), Error> {
        if protected {
            if let Some(read) = self.read.as_mut() {
                read.commit_read()?;
            }
            self.peer_protected = true;
        }
        src.advance(record_len);
        self.records_received = true;
        Ok(())
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("is_client", &self.is_client)
            .field("handshake", &self.handshake)
            .field("pending_task", &self.pending_task.is_some())
            .field("outbound_done", &self.outbound_done)
            .field("inbound_done", &self.inbound_done)
            .finish_non_exhaustive()
    }
}

fn lent() -> Error {
    Error::Internal("handshake is lent to a delegated task".to_string())
}

fn check_range(len: usize, offset: usize, length: usize) -> Result<(), Error> {
    if offset > len || length > len - offset {
        return Err(Error::IndexOutOfBounds {
            offset,
            length,
            len,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> Engine {
        Engine::client(Arc::new(Config::default()))
    }

    fn server() -> Engine {
        Engine::server(Arc::new(Config::default()))
    }

    #[test]
    fn out_of_range_before_mutation() {
        let mut engine = client();
        let mut srcs = [ByteBuf::allocate(4)];
        let mut dst = ByteBuf::allocate(100);

        let err = engine.wrap_range(&mut srcs, 1, 1, &mut dst).unwrap_err();
        assert!(matches!(err, Error::IndexOutOfBounds { .. }));
        assert_eq!(dst.position(), 0);
        assert_eq!(engine.handshake_status(), HandshakeStatus::NotHandshaking);
    }

    #[test]
    fn read_only_destination() {
        let mut engine = client();
        let mut dst = ByteBuf::allocate(100).as_read_only();
        assert!(matches!(
            engine.wrap(&mut [], &mut dst),
            Err(Error::ReadOnlyBuffer)
        ));

        let mut src = ByteBuf::allocate(0);
        let mut dsts = [ByteBuf::allocate(10).as_read_only()];
        assert!(matches!(
            engine.unwrap(&mut src, &mut dsts),
            Err(Error::ReadOnlyBuffer)
        ));
        assert_eq!(engine.handshake_status(), HandshakeStatus::NotHandshaking);
    }

    #[test]
    fn unwrap_needs_destination() {
        let mut engine = server();
        let mut src = ByteBuf::allocate(0);
        assert!(matches!(
            engine.unwrap(&mut src, &mut []),
            Err(Error::NoDestination)
        ));
    }

    #[test]
    fn overflow_before_consume() {
        let _ = env_logger::try_init();
        let mut engine = client();
        let mut srcs = [ByteBuf::wrap(b"hello".to_vec())];
        let mut dst = ByteBuf::allocate(10);

        let result = engine.wrap(&mut srcs, &mut dst).unwrap();
        assert_eq!(result.status, Status::BufferOverflow);
        assert_eq!(result.bytes_consumed, 0);
        assert_eq!(result.bytes_produced, 0);
        assert_eq!(result.handshake_status, HandshakeStatus::NeedWrap);
        assert_eq!(srcs[0].position(), 0);
        assert_eq!(dst.position(), 0);

        // The ClientHello is still there for a large enough buffer
        let mut dst = ByteBuf::allocate(engine.session().packet_buffer_size());
        let result = engine.wrap(&mut srcs, &mut dst).unwrap();
        assert_eq!(result.status, Status::Ok);
        assert!(result.bytes_produced > 10);
        assert_eq!(result.bytes_consumed, 0);
        assert_eq!(dst.position(), result.bytes_produced);
    }

    #[test]
    fn underflow_before_consume() {
        let mut engine = server();
        let mut dsts = [ByteBuf::allocate(engine.session().application_buffer_size())];

        let mut src = ByteBuf::wrap(vec![22, 3, 3, 0]);
        let result = engine.unwrap(&mut src, &mut dsts).unwrap();
        assert_eq!(result.status, Status::BufferUnderflow);
        assert_eq!(src.position(), 0);

        let mut src = ByteBuf::wrap(vec![22, 3, 3, 0, 100, 1, 2, 3, 4]);
        let result = engine.unwrap(&mut src, &mut dsts).unwrap();
        assert_eq!(result.status, Status::BufferUnderflow);
        assert_eq!(result.bytes_consumed, 0);
        assert_eq!(src.position(), 0);
    }

    #[test]
    fn garbled_header_is_fatal() {
        let mut engine = server();
        let mut dsts = [ByteBuf::allocate(100)];
        let mut src = ByteBuf::wrap(vec![99, 3, 3, 0, 1, 0]);

        let err = engine.unwrap(&mut src, &mut dsts).unwrap_err();
        assert_eq!(err.alert(), Some(AlertDescription::UnexpectedMessage));
        assert!(engine.is_inbound_done());
        assert_eq!(engine.handshake_status(), HandshakeStatus::NeedWrap);

        let mut dst = ByteBuf::allocate(100);
        let result = engine.wrap(&mut [], &mut dst).unwrap();
        assert_eq!(result.status, Status::Closed);
        assert_eq!(result.bytes_produced, 7);
        assert!(engine.is_outbound_done());

        let result = engine.wrap(&mut [], &mut dst).unwrap();
        assert_eq!(result.status, Status::Closed);
        assert_eq!(result.bytes_produced, 0);
    }

    #[test]
    fn mode_fixed_after_start() {
        let mut engine = client();
        engine.set_use_client_mode(false).unwrap();
        assert!(!engine.use_client_mode());
        engine.begin_handshake().unwrap();
        assert!(matches!(
            engine.set_use_client_mode(true),
            Err(Error::IllegalState(_))
        ));
        assert!(matches!(
            engine.begin_handshake(),
            Err(Error::IllegalState(_))
        ));
    }

    #[test]
    fn client_auth_settings_exclusive() {
        let mut engine = server();
        engine.set_want_client_auth(true);
        assert!(engine.want_client_auth());
        engine.set_need_client_auth(true);
        assert!(engine.need_client_auth());
        assert!(!engine.want_client_auth());
        engine.set_want_client_auth(false);
        assert!(engine.need_client_auth());
        engine.set_need_client_auth(false);
        assert!(!engine.need_client_auth());
    }

    #[test]
    fn enabled_lists_validated_eagerly() {
        let mut engine = client();
        assert!(matches!(
            engine.set_enabled_protocols(&[ProtocolVersion::TLS1_1]),
            Err(Error::ConfigError(_))
        ));
        assert!(matches!(
            engine.set_enabled_cipher_suites(&[]),
            Err(Error::ConfigError(_))
        ));
        engine
            .set_enabled_protocols(&[ProtocolVersion::TLS1_2])
            .unwrap();
        assert_eq!(engine.enabled_protocols(), &[ProtocolVersion::TLS1_2]);
        assert_eq!(engine.supported_cipher_suites().len(), 6);
    }

    #[test]
    fn close_before_handshake() {
        let mut engine = client();
        engine.close_outbound();
        assert!(engine.is_outbound_done());
        engine.close_inbound().unwrap();
        assert!(engine.is_inbound_done());

        let mut dst = ByteBuf::allocate(100);
        let result = engine.wrap(&mut [], &mut dst).unwrap();
        assert_eq!(result.status, Status::Closed);
        assert_eq!(result.bytes_produced, 0);
    }
}
