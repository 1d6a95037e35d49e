//! Negotiated session parameters and the TLS 1.2 resumption cache.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use crate::crypto::key_schedule::Secret;
use crate::message::SessionId;
use crate::record::{max_fragment_len, packet_buffer_size};
use crate::types::{CipherSuite, ProtocolVersion};
use crate::Error;

/// The result of a handshake.
///
/// An engine that has not completed a handshake hands out a placeholder with
/// no protocol and no cipher suite, which still reports the buffer sizes
/// needed to drive the handshake. Each completed handshake produces a new
/// `Session`, the old one is left as it was.
pub struct Session {
    id: SessionId,
    protocol: Option<ProtocolVersion>,
    cipher_suite: Option<CipherSuite>,
    peer_certificates: Option<Vec<Vec<u8>>>,
    local_certificates: Option<Vec<Vec<u8>>>,
    peer_host: Option<String>,
    peer_port: Option<u16>,
    creation_time: SystemTime,
    large_fragments: bool,
    valid: AtomicBool,
    master_secret: Option<Secret>,
}

/// What a completed handshake knows about itself.
pub(crate) struct SessionParams {
    pub id: SessionId,
    pub protocol: ProtocolVersion,
    pub cipher_suite: CipherSuite,
    pub peer_certificates: Option<Vec<Vec<u8>>>,
    pub local_certificates: Option<Vec<Vec<u8>>>,
    pub peer_host: Option<String>,
    pub peer_port: Option<u16>,
    pub large_fragments: bool,
    pub master_secret: Option<Secret>,
}

impl Session {
    pub(crate) fn placeholder(large_fragments: bool) -> Self {
        Session {
            id: SessionId::new(),
            protocol: None,
            cipher_suite: None,
            peer_certificates: None,
            local_certificates: None,
            peer_host: None,
            peer_port: None,
            creation_time: SystemTime::now(),
            large_fragments,
            // Nothing to resume from
            valid: AtomicBool::new(false),
            master_secret: None,
        }
    }

    pub(crate) fn new(params: SessionParams) -> Self {
        Session {
            id: params.id,
            protocol: Some(params.protocol),
            cipher_suite: Some(params.cipher_suite),
            peer_certificates: params.peer_certificates,
            local_certificates: params.local_certificates,
            peer_host: params.peer_host,
            peer_port: params.peer_port,
            creation_time: SystemTime::now(),
            large_fragments: params.large_fragments,
            valid: AtomicBool::new(true),
            master_secret: params.master_secret,
        }
    }

    /// Session id, empty for the placeholder.
    pub fn id(&self) -> &[u8] {
        &self.id
    }

    /// Negotiated protocol version, `None` before a handshake completed.
    pub fn protocol(&self) -> Option<ProtocolVersion> {
        self.protocol
    }

    /// Negotiated cipher suite, `None` before a handshake completed.
    pub fn cipher_suite(&self) -> Option<CipherSuite> {
        self.cipher_suite
    }

    /// The peer's chain, leaf first.
    ///
    /// Fails with [`Error::PeerUnverified`] when the peer did not
    /// authenticate, e.g. a client when client auth was only wanted.
    pub fn peer_certificates(&self) -> Result<&[Vec<u8>], Error> {
        self.peer_certificates
            .as_deref()
            .ok_or(Error::PeerUnverified)
    }

    /// The chain we presented, if any.
    pub fn local_certificates(&self) -> Option<&[Vec<u8>]> {
        self.local_certificates.as_deref()
    }

    pub fn peer_host(&self) -> Option<&str> {
        self.peer_host.as_deref()
    }

    pub fn peer_port(&self) -> Option<u16> {
        self.peer_port
    }

    pub fn creation_time(&self) -> SystemTime {
        self.creation_time
    }

    /// Smallest destination that is guaranteed to hold any record.
    pub fn packet_buffer_size(&self) -> usize {
        packet_buffer_size(self.large_fragments)
    }

    /// Smallest destination that is guaranteed to hold the plaintext of any
    /// record.
    pub fn application_buffer_size(&self) -> usize {
        max_fragment_len(self.large_fragments)
    }

    /// Stop later handshakes from resuming this session.
    ///
    /// Connections already using it are not affected.
    pub fn invalidate(&self) {
        if self.valid.swap(false, Ordering::AcqRel) {
            debug!("Invalidated session {:02x?}", &self.id[..]);
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    pub(crate) fn master_secret(&self) -> Option<&[u8]> {
        self.master_secret.as_deref().map(|s| &s[..])
    }

    fn is_resumable(&self) -> bool {
        self.is_valid() && self.master_secret.is_some() && !self.id.is_empty()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("protocol", &self.protocol)
            .field("cipher_suite", &self.cipher_suite)
            .field("peer_host", &self.peer_host)
            .field("peer_port", &self.peer_port)
            .field("valid", &self.is_valid())
            .finish()
    }
}

/// Sessions available for TLS 1.2 resumption.
///
/// Servers look sessions up by id, clients by the peer's host and port.
/// Each side holds at most `capacity` sessions (0 means unbounded) and
/// evicts the oldest first. Invalidated sessions are never returned.
#[derive(Debug)]
pub struct SessionCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

#[derive(Debug, Default)]
struct CacheInner {
    server: VecDeque<Arc<Session>>,
    client: VecDeque<Arc<Session>>,
}

impl SessionCache {
    pub fn new(capacity: usize) -> Self {
        SessionCache {
            capacity,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn inner(&self) -> std::sync::MutexGuard<'_, CacheInner> {
        // A panic while holding the lock cannot leave the queues inconsistent
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn put_server(&self, session: Arc<Session>) {
        if !session.is_resumable() {
            return;
        }
        let mut inner = self.inner();
        inner.server.retain(|s| s.id != session.id);
        inner.server.push_back(session);
        Self::evict(&mut inner.server, self.capacity);
    }

    pub(crate) fn put_client(&self, session: Arc<Session>) {
        if !session.is_resumable() || session.peer_host.is_none() {
            return;
        }
        let mut inner = self.inner();
        inner
            .client
            .retain(|s| s.peer_host != session.peer_host || s.peer_port != session.peer_port);
        inner.client.push_back(session);
        Self::evict(&mut inner.client, self.capacity);
    }

    fn evict(queue: &mut VecDeque<Arc<Session>>, capacity: usize) {
        queue.retain(|s| s.is_valid());
        while capacity > 0 && queue.len() > capacity {
            queue.pop_front();
        }
    }

    /// Server side lookup.
    pub fn get_by_id(&self, id: &[u8]) -> Option<Arc<Session>> {
        if id.is_empty() {
            return None;
        }
        self.inner()
            .server
            .iter()
            .find(|s| s.is_resumable() && &s.id[..] == id)
            .cloned()
    }

    /// Client side lookup.
    pub fn get_by_peer(&self, host: &str, port: Option<u16>) -> Option<Arc<Session>> {
        self.inner()
            .client
            .iter()
            .rev()
            .find(|s| s.is_resumable() && s.peer_host.as_deref() == Some(host) && s.peer_port == port)
            .cloned()
    }

    /// Number of sessions held, valid or not.
    pub fn len(&self) -> usize {
        let inner = self.inner();
        inner.server.len() + inner.client.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionCache {
    fn default() -> Self {
        SessionCache::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zeroize::Zeroizing;

    fn session(id: u8, host: Option<&str>) -> Arc<Session> {
        let mut sid = SessionId::new();
        sid.extend_from_slice(&[id; 32]);
        Arc::new(Session::new(SessionParams {
            id: sid,
            protocol: ProtocolVersion::TLS1_2,
            cipher_suite: CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256,
            peer_certificates: None,
            local_certificates: None,
            peer_host: host.map(String::from),
            peer_port: Some(443),
            large_fragments: false,
            master_secret: Some(Zeroizing::new(vec![1; 48])),
        }))
    }

    #[test]
    fn placeholder_sizes() {
        let s = Session::placeholder(false);
        assert_eq!(s.protocol(), None);
        assert_eq!(s.cipher_suite(), None);
        assert_eq!(s.packet_buffer_size(), 16709);
        assert_eq!(s.application_buffer_size(), 16384);
        assert!(matches!(s.peer_certificates(), Err(Error::PeerUnverified)));

        let large = Session::placeholder(true);
        assert!(large.packet_buffer_size() >= 33049);
        assert!(large.application_buffer_size() >= 32768);
    }

    #[test]
    fn invalid_sessions_not_returned() {
        let cache = SessionCache::new(4);
        let s = session(1, None);
        cache.put_server(s.clone());
        assert!(cache.get_by_id(&[1; 32]).is_some());
        s.invalidate();
        assert!(!s.is_valid());
        assert!(cache.get_by_id(&[1; 32]).is_none());
    }

    #[test]
    fn oldest_evicted() {
        let cache = SessionCache::new(2);
        for i in 1..=3 {
            cache.put_server(session(i, None));
        }
        assert!(cache.get_by_id(&[1; 32]).is_none());
        assert!(cache.get_by_id(&[2; 32]).is_some());
        assert!(cache.get_by_id(&[3; 32]).is_some());
    }

    #[test]
    fn client_keyed_by_peer() {
        let cache = SessionCache::default();
        cache.put_client(session(1, Some("a.example")));
        cache.put_client(session(2, Some("a.example")));
        cache.put_client(session(3, None));

        let found = cache.get_by_peer("a.example", Some(443)).unwrap();
        assert_eq!(found.id(), &[2; 32]);
        assert!(cache.get_by_peer("a.example", Some(444)).is_none());
        assert_eq!(cache.len(), 1);
    }
}
