//! Connection closure in both protocol versions.

mod tls_common;

use tls_common::*;
use tlsengine::{
    AlertDescription, ByteBuf, CloseKind, Error, HandshakeStatus, ProtocolVersion, Status,
};

fn connected(version: ProtocolVersion) -> Pair {
    let pki = pki();
    let client = build(only(client_builder(&pki), version));
    let mut pair = Pair::with_configs(client, build(server_builder(&pki)));
    pair.handshake().expect("handshake");
    pair
}

fn unwrap_bytes(peer: &mut Peer, bytes: Vec<u8>) -> Result<tlsengine::EngineResult, Error> {
    let mut src = ByteBuf::wrap(bytes);
    peer.engine
        .unwrap(&mut src, std::slice::from_mut(&mut peer.app_in))
}

#[test]
fn tls12_close_is_answered() {
    let _ = env_logger::try_init();
    let mut pair = connected(ProtocolVersion::TLS1_2);

    pair.client.engine.close_outbound();
    assert_eq!(
        pair.client.engine.handshake_status(),
        HandshakeStatus::NeedWrap
    );

    let mut late = [ByteBuf::wrap(b"too late".to_vec())];
    let (result, close_notify) = wrap_once(&mut pair.client.engine, &mut late, WIRE);
    assert_eq!(result.status, Status::Closed);
    assert_eq!(result.bytes_consumed, 0);
    assert!(result.bytes_produced > 0);
    assert!(pair.client.engine.is_outbound_done());
    assert!(!pair.client.engine.is_inbound_done());
    assert_eq!(result.handshake_status, HandshakeStatus::NeedUnwrap);

    let result = unwrap_bytes(&mut pair.server, close_notify).unwrap();
    assert_eq!(result.status, Status::Closed);
    assert_eq!(result.handshake_status, HandshakeStatus::NeedWrap);
    assert!(pair.server.engine.is_inbound_done());

    let (result, reply) = wrap_once(&mut pair.server.engine, &mut [], WIRE);
    assert_eq!(result.status, Status::Closed);
    assert!(result.bytes_produced > 0);
    assert_eq!(result.handshake_status, HandshakeStatus::NotHandshaking);
    assert!(pair.server.engine.is_outbound_done());

    let result = unwrap_bytes(&mut pair.client, reply).unwrap();
    assert_eq!(result.status, Status::Closed);
    assert_eq!(result.handshake_status, HandshakeStatus::NotHandshaking);
    assert!(pair.client.engine.is_inbound_done());

    assert_eq!(pair.client.engine.force_close_inbound(), CloseKind::Graceful);
    pair.client.engine.close_inbound().unwrap();
    pair.server.engine.close_inbound().unwrap();

    // Closed engines stay closed
    let (result, bytes) = wrap_once(&mut pair.client.engine, &mut late, WIRE);
    assert_eq!(result.status, Status::Closed);
    assert!(bytes.is_empty());
}

#[test]
fn tls13_half_close() {
    let _ = env_logger::try_init();
    let mut pair = connected(ProtocolVersion::TLS1_3);

    pair.client.engine.close_outbound();
    let (result, close_notify) = wrap_once(&mut pair.client.engine, &mut [], WIRE);
    assert_eq!(result.status, Status::Closed);
    assert_eq!(result.handshake_status, HandshakeStatus::NotHandshaking);

    let result = unwrap_bytes(&mut pair.server, close_notify).unwrap();
    assert_eq!(result.status, Status::Closed);
    assert!(pair.server.engine.is_inbound_done());
    assert!(!pair.server.engine.is_outbound_done());
    assert_eq!(
        pair.server.engine.handshake_status(),
        HandshakeStatus::NotHandshaking
    );

    // The server may keep talking
    let mut srcs = [ByteBuf::wrap(b"still here".to_vec())];
    let (result, bytes) = wrap_once(&mut pair.server.engine, &mut srcs, WIRE);
    assert_eq!(result.status, Status::Ok);
    let result = unwrap_bytes(&mut pair.client, bytes).unwrap();
    assert_eq!(result.status, Status::Ok);
    assert_eq!(pair.client.received(), b"still here");

    pair.server.engine.close_outbound();
    let (_, close_notify) = wrap_once(&mut pair.server.engine, &mut [], WIRE);
    let result = unwrap_bytes(&mut pair.client, close_notify).unwrap();
    assert_eq!(result.status, Status::Closed);
    assert!(pair.client.engine.is_inbound_done());
    assert!(pair.server.engine.is_outbound_done());
}

#[test]
fn truncation_reported() {
    let _ = env_logger::try_init();
    let mut pair = connected(ProtocolVersion::TLS1_3);

    let err = pair.client.engine.close_inbound().unwrap_err();
    assert!(matches!(err, Error::InboundTruncated));
    assert!(pair.client.engine.is_inbound_done());
    assert_eq!(
        pair.client.engine.handshake_status(),
        HandshakeStatus::NeedWrap
    );

    let (result, alert) = wrap_once(&mut pair.client.engine, &mut [], WIRE);
    assert_eq!(result.status, Status::Closed);
    assert!(pair.client.engine.is_outbound_done());

    let err = unwrap_bytes(&mut pair.server, alert).unwrap_err();
    assert!(matches!(
        err,
        Error::PeerAlert(AlertDescription::InternalError)
    ));
    assert!(pair.server.engine.is_inbound_done());
    assert!(pair.server.engine.is_outbound_done());
}

#[test]
fn abrupt_close() {
    let _ = env_logger::try_init();
    let mut pair = connected(ProtocolVersion::TLS1_2);

    assert_eq!(pair.server.engine.force_close_inbound(), CloseKind::Abrupt);
    assert!(pair.server.engine.is_inbound_done());

    let bytes = {
        let mut srcs = [ByteBuf::wrap(b"ignored".to_vec())];
        wrap_once(&mut pair.client.engine, &mut srcs, WIRE).1
    };
    let result = unwrap_bytes(&mut pair.server, bytes).unwrap();
    assert_eq!(result.status, Status::Closed);
    assert_eq!(result.bytes_consumed, 0);
}

#[test]
fn close_during_handshake() {
    let _ = env_logger::try_init();

    let pki = pki();
    let mut pair = Pair::with_configs(build(client_builder(&pki)), build(server_builder(&pki)));

    // ClientHello out, then give up
    pair.client.wrap_all().unwrap();
    pair.client.engine.close_outbound();
    pair.client.wrap_all().unwrap();
    assert!(pair.client.engine.is_outbound_done());

    pair.server.unwrap_from(&mut pair.client.net_out).unwrap();
    assert!(pair.server.engine.is_inbound_done());
}

/// A fatal alert record in the clear, as sent before handshake keys exist.
fn plain_alert(description: u8) -> Vec<u8> {
    vec![21, 3, 3, 0, 2, 2, description]
}

#[test]
fn plaintext_alert_before_client_keys() {
    let _ = env_logger::try_init();

    let pki = pki();
    let client = build(only(client_builder(&pki), ProtocolVersion::TLS1_3));
    let mut pair = Pair::with_configs(client, build(server_builder(&pki)));

    // The server reads with client handshake keys once ClientHello is in
    pair.client.wrap_all().unwrap();
    pair.server.unwrap_from(&mut pair.client.net_out).unwrap();
    assert_eq!(
        pair.server.engine.handshake_status(),
        HandshakeStatus::NeedWrap
    );

    let err = unwrap_bytes(&mut pair.server, plain_alert(40)).unwrap_err();
    assert!(matches!(
        err,
        Error::PeerAlert(AlertDescription::HandshakeFailure)
    ));
    assert!(pair.server.engine.is_inbound_done());
}

#[test]
fn plaintext_alert_after_protected_records() {
    let _ = env_logger::try_init();
    let mut pair = connected(ProtocolVersion::TLS1_3);

    let err = unwrap_bytes(&mut pair.server, plain_alert(40)).unwrap_err();
    assert_eq!(err.alert(), Some(AlertDescription::UnexpectedMessage));
}
