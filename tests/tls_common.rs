//! Shared helpers for engine integration tests.
//!
//! This file has no `#[test]` functions; Cargo compiles it as a no-op binary.
//! Import it from other test files via `mod tls_common;`.

#![allow(unused)]

use std::sync::Arc;

use tlsengine::certificate::{CertificateAuthority, Credential};
use tlsengine::{
    AnchoredTrustManager, ByteBuf, Config, ConfigBuilder, Engine, EngineResult, Error,
    HandshakeStatus, ProtocolVersion, StaticKeyManager, Status,
};

/// Wire buffer capacity, large enough for a whole flight.
pub const WIRE: usize = 64 * 1024;

const MAX_ROUNDS: usize = 50;

/// A CA with a server and a client certificate issued by it.
pub struct Pki {
    pub ca: CertificateAuthority,
    pub server: Credential,
    pub client: Credential,
}

pub fn pki() -> Pki {
    let ca = CertificateAuthority::generate("Test CA").expect("gen ca");
    let server = ca.issue("server.test").expect("issue server cert");
    let client = ca.issue("client.test").expect("issue client cert");
    Pki { ca, server, client }
}

fn trusting(ca: &CertificateAuthority) -> Arc<AnchoredTrustManager> {
    Arc::new(AnchoredTrustManager::with_default_provider(vec![ca
        .certificate()
        .to_vec()]))
}

/// Server with its certificate, trusting the CA for client certificates.
pub fn server_builder(pki: &Pki) -> ConfigBuilder {
    Config::builder()
        .with_key_manager(Arc::new(
            StaticKeyManager::new().with_credential("server", pki.server.clone()),
        ))
        .with_trust_manager(trusting(&pki.ca))
}

/// Client trusting the CA, without a certificate of its own.
pub fn client_builder(pki: &Pki) -> ConfigBuilder {
    Config::builder().with_trust_manager(trusting(&pki.ca))
}

/// Client trusting the CA, with its certificate.
pub fn client_builder_with_cert(pki: &Pki) -> ConfigBuilder {
    client_builder(pki).with_key_manager(Arc::new(
        StaticKeyManager::new().with_credential("client", pki.client.clone()),
    ))
}

pub fn build(builder: ConfigBuilder) -> Arc<Config> {
    Arc::new(builder.build().expect("valid config"))
}

/// Config builder restricted to one protocol version.
pub fn only(builder: ConfigBuilder, version: ProtocolVersion) -> ConfigBuilder {
    builder.enabled_protocols(&[version])
}

/// One engine and the buffers around it.
pub struct Peer {
    pub engine: Engine,
    /// Application data to send, in read mode.
    pub app_out: ByteBuf,
    /// Application data received, in write mode.
    pub app_in: ByteBuf,
    /// Records produced, in write mode.
    pub net_out: ByteBuf,
    /// How many results reported `Finished`.
    pub finished: usize,
    pub tasks_run: usize,
}

impl Peer {
    pub fn new(engine: Engine) -> Self {
        Peer {
            engine,
            app_out: ByteBuf::wrap(Vec::new()),
            app_in: ByteBuf::allocate(WIRE),
            net_out: ByteBuf::allocate(WIRE),
            finished: 0,
            tasks_run: 0,
        }
    }

    /// Queue application data for the next wraps.
    pub fn send(&mut self, data: &[u8]) {
        assert!(!self.app_out.has_remaining(), "previous data not sent");
        self.app_out = ByteBuf::wrap(data.to_vec());
    }

    /// Take all application data received so far.
    pub fn received(&mut self) -> Vec<u8> {
        self.app_in.flip();
        let data = self.app_in.remaining_slice().to_vec();
        self.app_in.clear();
        data
    }

    fn net_out_pending(&self) -> bool {
        self.net_out.position() > 0 || self.app_out.has_remaining()
    }

    pub fn run_tasks(&mut self) {
        while let Some(task) = self.engine.delegated_task() {
            task.run().expect("task");
            self.tasks_run += 1;
        }
    }

    fn note(&mut self, result: &EngineResult) {
        if result.handshake_status == HandshakeStatus::Finished {
            self.finished += 1;
        }
    }

    /// Wrap until the engine has nothing more to produce.
    pub fn wrap_all(&mut self) -> Result<(), Error> {
        for _ in 0..MAX_ROUNDS {
            self.run_tasks();
            let result = self
                .engine
                .wrap(std::slice::from_mut(&mut self.app_out), &mut self.net_out)?;
            self.note(&result);
            if result.status != Status::Ok {
                return Ok(());
            }
            if result.bytes_produced == 0 && result.handshake_status != HandshakeStatus::NeedTask {
                return Ok(());
            }
        }
        Ok(())
    }

    /// Unwrap the records on `wire` until no complete record is left.
    pub fn unwrap_from(&mut self, wire: &mut ByteBuf) -> Result<(), Error> {
        wire.flip();
        let result = self.unwrap_loop(wire);
        wire.compact();
        result
    }

    fn unwrap_loop(&mut self, wire: &mut ByteBuf) -> Result<(), Error> {
        for _ in 0..MAX_ROUNDS {
            self.run_tasks();
            let result = self
                .engine
                .unwrap(wire, std::slice::from_mut(&mut self.app_in))?;
            self.note(&result);
            if result.status != Status::Ok {
                return Ok(());
            }
            let idle = matches!(
                result.handshake_status,
                HandshakeStatus::NeedWrap | HandshakeStatus::NotHandshaking
            );
            if result.bytes_consumed == 0 && idle {
                return Ok(());
            }
        }
        Ok(())
    }
}

/// Client and server wired back to back.
pub struct Pair {
    pub client: Peer,
    pub server: Peer,
}

impl Pair {
    pub fn new(client: Engine, server: Engine) -> Self {
        Pair {
            client: Peer::new(client),
            server: Peer::new(server),
        }
    }

    pub fn with_configs(client: Arc<Config>, server: Arc<Config>) -> Self {
        Self::new(Engine::client(client), Engine::server(server))
    }

    /// Each side wraps everything it can, the other side unwraps it.
    pub fn round(&mut self) -> Result<(), Error> {
        self.client.wrap_all()?;
        self.server.unwrap_from(&mut self.client.net_out)?;
        self.server.wrap_all()?;
        self.client.unwrap_from(&mut self.server.net_out)?;
        Ok(())
    }

    fn settled(&self) -> bool {
        let idle = |p: &Peer| p.engine.handshake_status() == HandshakeStatus::NotHandshaking;
        idle(&self.client)
            && idle(&self.server)
            && !self.client.net_out_pending()
            && !self.server.net_out_pending()
    }

    /// Run rounds until both sides finished a handshake and went idle.
    pub fn handshake(&mut self) -> Result<(), Error> {
        let (client_before, server_before) = (self.client.finished, self.server.finished);
        for _ in 0..MAX_ROUNDS {
            self.round()?;
            let finished =
                self.client.finished > client_before && self.server.finished > server_before;
            if finished && self.settled() {
                return Ok(());
            }
        }
        panic!(
            "handshake did not complete: client {:?}, server {:?}",
            self.client.engine.handshake_status(),
            self.server.engine.handshake_status()
        );
    }

    /// Check how many results each side reported `Finished` on so far.
    pub fn assert_finished(&self, client: usize, server: usize) {
        assert_eq!(
            (self.client.finished, self.server.finished),
            (client, server),
            "Finished count (client, server)"
        );
    }

    /// Run rounds until nothing moves any more.
    pub fn settle(&mut self) -> Result<(), Error> {
        for _ in 0..MAX_ROUNDS {
            self.round()?;
            if self.settled() {
                return Ok(());
            }
        }
        Ok(())
    }

    /// Client sends `data`, server receives it.
    pub fn client_to_server(&mut self, data: &[u8]) -> Result<Vec<u8>, Error> {
        self.client.send(data);
        self.settle()?;
        Ok(self.server.received())
    }

    /// Server sends `data`, client receives it.
    pub fn server_to_client(&mut self, data: &[u8]) -> Result<Vec<u8>, Error> {
        self.server.send(data);
        self.settle()?;
        Ok(self.client.received())
    }
}

/// Wrap once into a fresh buffer of `capacity`, returning the bytes.
pub fn wrap_once(engine: &mut Engine, srcs: &mut [ByteBuf], capacity: usize) -> (EngineResult, Vec<u8>) {
    let mut dst = ByteBuf::allocate(capacity);
    let result = engine.wrap(srcs, &mut dst).expect("wrap");
    dst.flip();
    (result, dst.remaining_slice().to_vec())
}
