//! Buffer handling of wrap and unwrap on an established connection.

mod tls_common;

use tls_common::*;
use tlsengine::{ByteBuf, Engine, Error, HandshakeStatus, ProtocolVersion, Status};

const MESSAGE: &[u8] = b"Hi Engine2, I'm SSLEngine1";

fn connected(version: ProtocolVersion) -> Pair {
    let pki = pki();
    let client = build(only(client_builder(&pki), version));
    let mut pair = Pair::with_configs(client, build(server_builder(&pki)));
    pair.handshake().expect("handshake");
    pair
}

fn record(engine: &mut Engine, data: &[u8]) -> Vec<u8> {
    let (result, bytes) = wrap_once(engine, &mut [ByteBuf::wrap(data.to_vec())], WIRE);
    assert_eq!(result.status, Status::Ok);
    assert_eq!(result.bytes_consumed, data.len());
    bytes
}

#[test]
fn data_split_into_fragments() {
    let _ = env_logger::try_init();
    let mut pair = connected(ProtocolVersion::TLS1_3);

    let data: Vec<u8> = (0..40_000u32).map(|i| i as u8).collect();
    let mut srcs = [ByteBuf::wrap(data.clone())];
    let mut consumed = Vec::new();
    loop {
        let (result, bytes) = wrap_once(&mut pair.client.engine, &mut srcs, WIRE);
        assert_eq!(result.status, Status::Ok);
        assert_eq!(result.bytes_produced, bytes.len());
        if result.bytes_consumed == 0 {
            break;
        }
        consumed.push(result.bytes_consumed);
        pair.client.net_out.put_slice(&bytes);
    }
    assert_eq!(consumed, [16384, 16384, 7232]);

    pair.server.unwrap_from(&mut pair.client.net_out).unwrap();
    assert_eq!(pair.server.received(), data);
}

#[test]
fn data_gathered_from_sources() {
    let _ = env_logger::try_init();
    let mut pair = connected(ProtocolVersion::TLS1_2);

    let mut srcs = [
        ByteBuf::wrap(b"Hi ".to_vec()),
        ByteBuf::wrap(Vec::new()),
        ByteBuf::wrap(b"there".to_vec()),
    ];
    let (result, bytes) = wrap_once(&mut pair.client.engine, &mut srcs, WIRE);
    assert_eq!(result.bytes_consumed, 8);
    assert!(srcs.iter().all(|s| !s.has_remaining()));

    pair.client.net_out.put_slice(&bytes);
    pair.server.unwrap_from(&mut pair.client.net_out).unwrap();
    assert_eq!(pair.server.received(), b"Hi there");
}

#[test]
fn wrap_range_reads_only_range() {
    let _ = env_logger::try_init();
    let mut pair = connected(ProtocolVersion::TLS1_3);

    let mut srcs = [
        ByteBuf::wrap(b"skip".to_vec()),
        ByteBuf::wrap(b"take".to_vec()),
        ByteBuf::wrap(b"skip".to_vec()),
    ];
    let mut dst = ByteBuf::allocate(WIRE);
    let result = pair
        .client
        .engine
        .wrap_range(&mut srcs, 1, 1, &mut dst)
        .unwrap();
    assert_eq!(result.bytes_consumed, 4);
    assert_eq!(srcs[0].position(), 0);
    assert_eq!(srcs[1].position(), 4);
    assert_eq!(srcs[2].position(), 0);

    assert!(matches!(
        pair.client.engine.wrap_range(&mut srcs, 2, 2, &mut dst),
        Err(Error::IndexOutOfBounds { .. })
    ));
}

#[test]
fn wrap_overflow_exact_size() {
    let _ = env_logger::try_init();
    let mut pair = connected(ProtocolVersion::TLS1_3);

    // Header, data, inner content type and tag
    let needed = 5 + MESSAGE.len() + 1 + 16;

    let mut srcs = [ByteBuf::wrap(MESSAGE.to_vec())];
    let (result, bytes) = wrap_once(&mut pair.client.engine, &mut srcs, needed - 1);
    assert_eq!(result.status, Status::BufferOverflow);
    assert_eq!(result.bytes_consumed, 0);
    assert!(bytes.is_empty());
    assert_eq!(srcs[0].position(), 0);

    let (result, bytes) = wrap_once(&mut pair.client.engine, &mut srcs, needed);
    assert_eq!(result.status, Status::Ok);
    assert_eq!(result.bytes_produced, needed);

    // The overflow did not cost a sequence number
    pair.client.net_out.put_slice(&bytes);
    pair.server.unwrap_from(&mut pair.client.net_out).unwrap();
    assert_eq!(pair.server.received(), MESSAGE);
}

#[test]
fn unwrap_overflow_then_scatter() {
    let _ = env_logger::try_init();
    let mut pair = connected(ProtocolVersion::TLS1_2);

    let bytes = record(&mut pair.client.engine, MESSAGE);
    let mut src = ByteBuf::wrap(bytes.clone());

    let mut small = [ByteBuf::allocate(10)];
    let result = pair.server.engine.unwrap(&mut src, &mut small).unwrap();
    assert_eq!(result.status, Status::BufferOverflow);
    assert_eq!(result.bytes_consumed, 0);
    assert_eq!(src.position(), 0);
    assert_eq!(small[0].position(), 0);

    let mut dsts = [
        ByteBuf::allocate(10),
        ByteBuf::allocate(10),
        ByteBuf::allocate(100),
    ];
    let result = pair.server.engine.unwrap(&mut src, &mut dsts).unwrap();
    assert_eq!(result.status, Status::Ok);
    assert_eq!(result.bytes_consumed, bytes.len());
    assert_eq!(result.bytes_produced, MESSAGE.len());
    assert_eq!(result.handshake_status, HandshakeStatus::NotHandshaking);

    let mut received = Vec::new();
    for dst in dsts.iter_mut() {
        dst.flip();
        received.extend_from_slice(dst.remaining_slice());
    }
    assert_eq!(received, MESSAGE);
    assert_eq!(dsts[2].limit(), 6);
}

#[test]
fn unwrap_underflow_on_partial_record() {
    let _ = env_logger::try_init();
    let mut pair = connected(ProtocolVersion::TLS1_3);

    let bytes = record(&mut pair.client.engine, MESSAGE);
    let mut dsts = [ByteBuf::allocate(WIRE)];

    for cut in [0, 4, 5, 10, bytes.len() - 1] {
        let mut src = ByteBuf::wrap(bytes[..cut].to_vec());
        let result = pair.server.engine.unwrap(&mut src, &mut dsts).unwrap();
        assert_eq!(result.status, Status::BufferUnderflow, "cut at {}", cut);
        assert_eq!(result.bytes_consumed, 0);
        assert_eq!(src.position(), 0);
    }

    let mut src = ByteBuf::wrap(bytes);
    let result = pair.server.engine.unwrap(&mut src, &mut dsts).unwrap();
    assert_eq!(result.status, Status::Ok);
    assert_eq!(result.bytes_produced, MESSAGE.len());
}

#[test]
fn unwrap_range_writes_only_range() {
    let _ = env_logger::try_init();
    let mut pair = connected(ProtocolVersion::TLS1_3);

    let bytes = record(&mut pair.client.engine, MESSAGE);
    let mut src = ByteBuf::wrap(bytes);
    let mut dsts = [ByteBuf::allocate(100), ByteBuf::allocate(100)];

    assert!(matches!(
        pair.server.engine.unwrap_range(&mut src, &mut dsts, 3, 0),
        Err(Error::IndexOutOfBounds { .. })
    ));
    assert!(matches!(
        pair.server.engine.unwrap_range(&mut src, &mut dsts, 1, 0),
        Err(Error::NoDestination)
    ));

    let result = pair
        .server
        .engine
        .unwrap_range(&mut src, &mut dsts, 1, 1)
        .unwrap();
    assert_eq!(result.bytes_produced, MESSAGE.len());
    assert_eq!(dsts[0].position(), 0);
    assert_eq!(dsts[1].position(), MESSAGE.len());
}

#[test]
fn nothing_to_wrap() {
    let _ = env_logger::try_init();
    let mut pair = connected(ProtocolVersion::TLS1_3);

    let (result, bytes) = wrap_once(&mut pair.client.engine, &mut [], WIRE);
    assert_eq!(result.status, Status::Ok);
    assert_eq!(result.handshake_status, HandshakeStatus::NotHandshaking);
    assert_eq!(result.bytes_consumed, 0);
    assert!(bytes.is_empty());
}

#[test]
fn large_fragments() {
    let _ = env_logger::try_init();

    let pki = pki();
    let client = build(client_builder(&pki).accept_large_fragments(true));
    let server = build(server_builder(&pki).accept_large_fragments(true));
    let mut pair = Pair::with_configs(client, server);

    let placeholder = pair.client.engine.session();
    assert_eq!(placeholder.packet_buffer_size(), 16709 + 16384);
    assert_eq!(placeholder.application_buffer_size(), 32768);

    pair.handshake().expect("handshake");
    assert_eq!(pair.client.engine.session().application_buffer_size(), 32768);

    let data = vec![0x42; 40_000];
    let mut srcs = [ByteBuf::wrap(data.clone())];
    let (result, bytes) = wrap_once(&mut pair.client.engine, &mut srcs, WIRE);
    assert_eq!(result.bytes_consumed, 32768);
    pair.client.net_out.put_slice(&bytes);
    let (result, bytes) = wrap_once(&mut pair.client.engine, &mut srcs, WIRE);
    assert_eq!(result.bytes_consumed, 40_000 - 32768);
    pair.client.net_out.put_slice(&bytes);

    pair.server.unwrap_from(&mut pair.client.net_out).unwrap();
    assert_eq!(pair.server.received(), data);
}

#[test]
fn oversized_record_rejected_without_large_fragments() {
    let _ = env_logger::try_init();

    let pki = pki();
    let client = build(client_builder(&pki).accept_large_fragments(true));
    let mut pair = Pair::with_configs(client, build(server_builder(&pki)));
    pair.handshake().expect("handshake");

    let bytes = record(&mut pair.client.engine, &vec![7; 20_000]);
    let mut src = ByteBuf::wrap(bytes);
    let mut dsts = [ByteBuf::allocate(WIRE)];
    let err = pair.server.engine.unwrap(&mut src, &mut dsts).unwrap_err();
    assert!(err.alert().is_some(), "{}", err);
    assert!(pair.server.engine.is_inbound_done());
}
