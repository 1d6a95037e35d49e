//! Client certificate authentication, required and optional.

mod tls_common;

use std::sync::Arc;

use tls_common::*;
use tlsengine::{Engine, Error, ProtocolVersion, StaticKeyManager};

const VERSIONS: [ProtocolVersion; 2] = [ProtocolVersion::TLS1_2, ProtocolVersion::TLS1_3];

fn pair(client: tlsengine::ConfigBuilder, server: tlsengine::ConfigBuilder, version: ProtocolVersion) -> Pair {
    let client = build(only(client, version));
    Pair::new(Engine::client(client), Engine::server(build(server)))
}

#[test]
fn required_and_presented() {
    let _ = env_logger::try_init();

    for version in VERSIONS {
        let pki = pki();
        let mut pair = pair(client_builder_with_cert(&pki), server_builder(&pki), version);
        pair.server.engine.set_need_client_auth(true);
        pair.handshake().expect("handshake");

        let server_session = pair.server.engine.session();
        assert_eq!(server_session.protocol(), Some(version));
        assert_eq!(
            server_session.peer_certificates().unwrap(),
            &pki.client.chain[..]
        );
        assert_eq!(
            pair.client.engine.session().local_certificates(),
            Some(&pki.client.chain[..])
        );

        assert_eq!(pair.client_to_server(b"authenticated").unwrap(), b"authenticated");
    }
}

#[test]
fn required_but_missing() {
    let _ = env_logger::try_init();

    for version in VERSIONS {
        let pki = pki();
        let mut pair = pair(client_builder(&pki), server_builder(&pki), version);
        pair.server.engine.set_need_client_auth(true);

        let err = pair.handshake().unwrap_err();
        assert!(err.alert().is_some(), "{}: {}", version, err);

        pair.server.wrap_all().unwrap();
        let err = pair
            .client
            .unwrap_from(&mut pair.server.net_out)
            .unwrap_err();
        assert!(matches!(err, Error::PeerAlert(_)), "{}: {}", version, err);
    }
}

#[test]
fn wanted_but_missing() {
    let _ = env_logger::try_init();

    for version in VERSIONS {
        let pki = pki();
        let mut pair = pair(client_builder(&pki), server_builder(&pki), version);
        pair.server.engine.set_want_client_auth(true);
        pair.handshake().expect("handshake");

        assert!(matches!(
            pair.server.engine.session().peer_certificates(),
            Err(Error::PeerUnverified)
        ));
        assert_eq!(pair.client.engine.session().local_certificates(), None);
    }
}

#[test]
fn wanted_but_untrusted() {
    let _ = env_logger::try_init();

    for version in VERSIONS {
        let pki = pki();
        let stranger = tls_common::pki();
        let client = client_builder(&pki).with_key_manager(Arc::new(
            StaticKeyManager::new().with_credential("client", stranger.client.clone()),
        ));
        let mut pair = pair(client, server_builder(&pki), version);
        pair.server.engine.set_want_client_auth(true);
        pair.handshake().expect("handshake");

        assert!(pair.server.engine.session().peer_certificates().is_err());
    }
}

#[test]
fn not_requested() {
    let _ = env_logger::try_init();

    let pki = pki();
    let mut pair = pair(
        client_builder_with_cert(&pki),
        server_builder(&pki),
        ProtocolVersion::TLS1_3,
    );
    pair.handshake().expect("handshake");

    assert!(pair.server.engine.session().peer_certificates().is_err());
    assert_eq!(pair.client.engine.session().local_certificates(), None);
}
