//! Full handshakes and application data in both directions.

mod tls_common;

use std::sync::Arc;

use tls_common::*;
use tlsengine::{
    AlertDescription, CipherSuite, Engine, Error, HandshakeStatus, ProtocolVersion,
};

const CLIENT_MESSAGE: &[u8] = b"Hi Engine2, I'm SSLEngine1";
const SERVER_MESSAGE: &[u8] = b"Hello Engine1, I'm SSLEngine2";

fn exchange(pair: &mut Pair) {
    assert_eq!(pair.client_to_server(CLIENT_MESSAGE).unwrap(), CLIENT_MESSAGE);
    assert_eq!(pair.server_to_client(SERVER_MESSAGE).unwrap(), SERVER_MESSAGE);
}

#[test]
fn tls13_handshake_and_data() {
    let _ = env_logger::try_init();

    let pki = pki();
    let mut pair = Pair::with_configs(build(client_builder(&pki)), build(server_builder(&pki)));
    pair.handshake().expect("handshake");

    let client_session = pair.client.engine.session();
    let server_session = pair.server.engine.session();
    assert_eq!(client_session.protocol(), Some(ProtocolVersion::TLS1_3));
    assert_eq!(server_session.protocol(), Some(ProtocolVersion::TLS1_3));
    assert_eq!(client_session.cipher_suite(), server_session.cipher_suite());
    assert_eq!(client_session.peer_certificates().unwrap(), &pki.server.chain[..]);
    assert!(server_session.peer_certificates().is_err());

    // ServerHello, certificate checks and CertificateVerify
    assert!(pair.client.tasks_run >= 3);
    assert!(pair.server.tasks_run >= 1);

    // Client: own Finished and the one session ticket
    pair.assert_finished(2, 1);

    exchange(&mut pair);
    pair.assert_finished(2, 1);
}

#[test]
fn tls12_handshake_and_data() {
    let _ = env_logger::try_init();

    let pki = pki();
    let client = build(only(client_builder(&pki), ProtocolVersion::TLS1_2));
    let mut pair = Pair::with_configs(client, build(server_builder(&pki)));
    pair.handshake().expect("handshake");

    let session = pair.client.engine.session();
    assert_eq!(session.protocol(), Some(ProtocolVersion::TLS1_2));
    assert_eq!(session.id(), pair.server.engine.session().id());
    assert!(!session.id().is_empty());
    pair.assert_finished(1, 1);

    exchange(&mut pair);
    pair.assert_finished(1, 1);
}

#[test]
fn tls12_every_cipher_suite() {
    let _ = env_logger::try_init();

    let pki = pki();
    let server = build(server_builder(&pki));
    let client = build(only(client_builder(&pki), ProtocolVersion::TLS1_2));

    for suite in [
        CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256,
        CipherSuite::ECDHE_ECDSA_AES256_GCM_SHA384,
        CipherSuite::ECDHE_ECDSA_CHACHA20_POLY1305_SHA256,
    ] {
        let mut engine = Engine::client(client.clone());
        engine.set_enabled_cipher_suites(&[suite]).unwrap();

        let mut pair = Pair::new(engine, Engine::server(server.clone()));
        pair.handshake().expect("handshake");
        assert_eq!(pair.server.engine.session().cipher_suite(), Some(suite));
        exchange(&mut pair);
    }
}

#[test]
fn tls13_every_cipher_suite() {
    let _ = env_logger::try_init();

    let pki = pki();
    let server = build(server_builder(&pki));
    let client = build(client_builder(&pki));

    for suite in [
        CipherSuite::AES_128_GCM_SHA256,
        CipherSuite::AES_256_GCM_SHA384,
        CipherSuite::CHACHA20_POLY1305_SHA256,
    ] {
        let mut engine = Engine::server(server.clone());
        engine.set_enabled_cipher_suites(&[suite]).unwrap();

        let mut pair = Pair::new(Engine::client(client.clone()), engine);
        pair.handshake().expect("handshake");
        assert_eq!(pair.client.engine.session().cipher_suite(), Some(suite));
        exchange(&mut pair);
    }
}

#[test]
fn version_negotiated_down() {
    let _ = env_logger::try_init();

    let pki = pki();
    let server = build(only(server_builder(&pki), ProtocolVersion::TLS1_2));
    let mut pair = Pair::with_configs(build(client_builder(&pki)), server);
    pair.handshake().expect("handshake");

    assert_eq!(
        pair.client.engine.session().protocol(),
        Some(ProtocolVersion::TLS1_2)
    );
    exchange(&mut pair);
}

#[test]
fn tls12_session_resumed() {
    let _ = env_logger::try_init();

    let pki = pki();
    let client = build(only(client_builder(&pki), ProtocolVersion::TLS1_2));
    let server = build(server_builder(&pki));

    let mut first = Pair::new(
        Engine::client_for(client.clone(), "server.test", 443),
        Engine::server(server.clone()),
    );
    first.handshake().expect("first handshake");
    let first_id = first.client.engine.session().id().to_vec();

    let mut second = Pair::new(
        Engine::client_for(client.clone(), "server.test", 443),
        Engine::server(server.clone()),
    );
    second.handshake().expect("second handshake");
    assert_eq!(second.client.engine.session().id(), &first_id[..]);
    assert_eq!(second.server.engine.session().id(), &first_id[..]);
    // No certificate to check the second time
    assert!(second.client.tasks_run < first.client.tasks_run);
    exchange(&mut second);

    // Another peer gets a full handshake
    let mut third = Pair::new(
        Engine::client_for(client, "other.test", 443),
        Engine::server(server),
    );
    third.handshake().expect("third handshake");
    assert_ne!(third.client.engine.session().id(), &first_id[..]);
}

#[test]
fn invalidated_session_not_resumed() {
    let _ = env_logger::try_init();

    let pki = pki();
    let client = build(only(client_builder(&pki), ProtocolVersion::TLS1_2));
    let server = build(server_builder(&pki));

    let mut first = Pair::new(
        Engine::client_for(client.clone(), "server.test", 443),
        Engine::server(server.clone()),
    );
    first.handshake().expect("first handshake");
    let session = first.client.engine.session();
    session.invalidate();
    assert!(!session.is_valid());

    let mut second = Pair::new(
        Engine::client_for(client, "server.test", 443),
        Engine::server(server),
    );
    second.handshake().expect("second handshake");
    assert_ne!(second.client.engine.session().id(), session.id());
}

#[test]
fn tls13_sessions_are_distinct() {
    let _ = env_logger::try_init();

    let pki = pki();
    let client = build(client_builder(&pki));
    let server = build(server_builder(&pki));

    let mut first = Pair::new(
        Engine::client_for(client.clone(), "server.test", 443),
        Engine::server(server.clone()),
    );
    first.handshake().expect("first handshake");

    let mut second = Pair::new(
        Engine::client_for(client, "server.test", 443),
        Engine::server(server),
    );
    second.handshake().expect("second handshake");

    assert_ne!(
        first.client.engine.session().id(),
        second.client.engine.session().id()
    );
}

#[test]
fn placeholder_session_before_handshake() {
    let pki = pki();
    let engine = Engine::client(build(client_builder(&pki)));

    let session = engine.session();
    assert_eq!(session.protocol(), None);
    assert_eq!(session.cipher_suite(), None);
    assert_eq!(session.packet_buffer_size(), 16709);
    assert_eq!(session.application_buffer_size(), 16384);
    assert!(Arc::ptr_eq(&session, &engine.session()));
}

#[test]
fn no_common_protocol() {
    let _ = env_logger::try_init();

    let pki = pki();
    let client = build(only(client_builder(&pki), ProtocolVersion::TLS1_3));
    let server = build(only(server_builder(&pki), ProtocolVersion::TLS1_2));
    let mut pair = Pair::with_configs(client, server);

    let err = pair.handshake().unwrap_err();
    assert_eq!(err.alert(), Some(AlertDescription::ProtocolVersion));

    // The server still owes the client its alert
    assert_eq!(
        pair.server.engine.handshake_status(),
        HandshakeStatus::NeedWrap
    );
    pair.server.wrap_all().unwrap();
    assert!(pair.server.engine.is_outbound_done());

    let err = pair
        .client
        .unwrap_from(&mut pair.server.net_out)
        .unwrap_err();
    assert!(matches!(
        err,
        Error::PeerAlert(AlertDescription::ProtocolVersion)
    ));
    assert!(pair.client.engine.is_inbound_done());
    assert!(pair.client.engine.is_outbound_done());
}

#[test]
fn untrusted_server_rejected() {
    let _ = env_logger::try_init();

    let pki = pki();
    let other = tls_common::pki();
    let mut pair = Pair::with_configs(build(client_builder(&other)), build(server_builder(&pki)));

    let err = pair.handshake().unwrap_err();
    assert!(err.alert().is_some(), "{}", err);
    assert_eq!(
        pair.client.engine.handshake_status(),
        HandshakeStatus::NeedWrap
    );

    pair.client.wrap_all().unwrap();
    let err = pair
        .server
        .unwrap_from(&mut pair.client.net_out)
        .unwrap_err();
    assert!(matches!(err, Error::PeerAlert(_)));
}
