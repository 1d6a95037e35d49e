//! Handshake message codecs.
//!
//! Every message parses from a complete body (without the 4 byte handshake
//! header) with nom, borrowing from the input, and serializes into a
//! `Vec<u8>`. [`decode`] turns a parser into a `Result` that also rejects
//! trailing bytes.

mod certificate;
mod certificate_request;
mod certificate_verify;
mod client_hello;
mod client_key_exchange;
mod encrypted_extensions;
mod extension;
mod finished;
mod handshake;
mod key_update;
mod new_session_ticket;
mod server_hello;
mod server_key_exchange;

pub use certificate::Certificate;
pub use certificate_request::CertificateRequest;
pub use certificate_verify::{tls13_signed_content, CertificateVerify};
pub use client_hello::ClientHello;
pub use client_key_exchange::ClientKeyExchange;
pub use encrypted_extensions::EncryptedExtensions;
pub use extension::{ExtensionType, KeyShareEntry};
pub use finished::Finished;
pub use handshake::{frame, next_message, HANDSHAKE_HEADER_LEN};
pub use key_update::KeyUpdate;
pub use new_session_ticket::NewSessionTicket;
pub use server_hello::{ServerHello, DOWNGRADE_TLS12};
#[cfg(test)]
pub use server_hello::HELLO_RETRY_REQUEST_RANDOM;
pub use server_key_exchange::ServerKeyExchange;

use nom::error::{Error as NomError, ErrorKind};
use nom::multi::length_data;
use nom::number::complete::{be_u16, be_u24, be_u8};
use nom::{Err, IResult};
use tinyvec::ArrayVec;

use crate::alert::AlertDescription;
use crate::Error;

pub type Random = [u8; 32];

/// Up to 32 bytes of legacy session id.
pub type SessionId = ArrayVec<[u8; 32]>;

/// Run `parser` over a complete message body.
pub fn decode<'a, T>(
    body: &'a [u8],
    parser: impl FnOnce(&'a [u8]) -> IResult<&'a [u8], T>,
) -> Result<T, Error> {
    let (rest, value) = parser(body)?;
    if !rest.is_empty() {
        return Err(Error::protocol(
            AlertDescription::DecodeError,
            format!("{} trailing bytes after message", rest.len()),
        ));
    }
    Ok(value)
}

pub fn u8_vec(input: &[u8]) -> IResult<&[u8], &[u8]> {
    length_data(be_u8)(input)
}

pub fn u16_vec(input: &[u8]) -> IResult<&[u8], &[u8]> {
    length_data(be_u16)(input)
}

pub fn u24_vec(input: &[u8]) -> IResult<&[u8], &[u8]> {
    length_data(be_u24)(input)
}

pub fn parse_random(input: &[u8]) -> IResult<&[u8], Random> {
    let (rest, bytes) = nom::bytes::complete::take(32usize)(input)?;
    let mut random = [0u8; 32];
    random.copy_from_slice(bytes);
    Ok((rest, random))
}

pub fn parse_session_id(input: &[u8]) -> IResult<&[u8], SessionId> {
    let (rest, bytes) = u8_vec(input)?;
    if bytes.len() > 32 {
        return Err(Err::Failure(NomError::new(input, ErrorKind::TooLarge)));
    }
    let mut id = SessionId::new();
    id.extend_from_slice(bytes);
    Ok((rest, id))
}

pub fn put_u8_vec(out: &mut Vec<u8>, data: &[u8]) {
    out.push(data.len() as u8);
    out.extend_from_slice(data);
}

pub fn put_u16_vec(out: &mut Vec<u8>, data: &[u8]) {
    out.extend_from_slice(&(data.len() as u16).to_be_bytes());
    out.extend_from_slice(data);
}

pub fn put_u24_vec(out: &mut Vec<u8>, data: &[u8]) {
    out.extend_from_slice(&(data.len() as u32).to_be_bytes()[1..]);
    out.extend_from_slice(data);
}

/// Write a u8 length, then whatever `f` writes, backfilling the length.
pub fn put_u8_prefixed(out: &mut Vec<u8>, f: impl FnOnce(&mut Vec<u8>)) {
    let at = out.len();
    out.push(0);
    f(out);
    out[at] = (out.len() - at - 1) as u8;
}

pub fn put_u16_prefixed(out: &mut Vec<u8>, f: impl FnOnce(&mut Vec<u8>)) {
    let at = out.len();
    out.extend_from_slice(&[0, 0]);
    f(out);
    let len = (out.len() - at - 2) as u16;
    out[at..at + 2].copy_from_slice(&len.to_be_bytes());
}

pub fn put_u24_prefixed(out: &mut Vec<u8>, f: impl FnOnce(&mut Vec<u8>)) {
    let at = out.len();
    out.extend_from_slice(&[0, 0, 0]);
    f(out);
    let len = (out.len() - at - 3) as u32;
    out[at..at + 3].copy_from_slice(&len.to_be_bytes()[1..]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_up_to_32_bytes() {
        let mut input = vec![32];
        input.extend_from_slice(&[0xab; 32]);
        input.push(0xff);
        let (rest, id) = parse_session_id(&input).unwrap();
        assert_eq!(rest, [0xff]);
        assert_eq!(&id[..], &[0xab; 32][..]);

        let mut input = vec![33];
        input.extend_from_slice(&[0xab; 33]);
        assert!(matches!(parse_session_id(&input), Err(Err::Failure(_))));

        let (_, id) = parse_session_id(&[0]).unwrap();
        assert!(id.is_empty());
    }

    #[test]
    fn prefixed_backfills_length() {
        let mut out = vec![9];
        put_u16_prefixed(&mut out, |out| out.extend_from_slice(&[1, 2, 3]));
        assert_eq!(out, [9, 0, 3, 1, 2, 3]);

        let mut out = Vec::new();
        put_u24_prefixed(&mut out, |out| put_u8_vec(out, &[7]));
        assert_eq!(out, [0, 0, 2, 1, 7]);
    }

    #[test]
    fn trailing_bytes_are_decode_error() {
        let err = decode(&[1, 5, 6][..], u8_vec).unwrap_err();
        assert_eq!(err.alert(), Some(AlertDescription::DecodeError));
        assert_eq!(decode(&[1, 5][..], u8_vec).unwrap(), &[5]);
    }

    #[test]
    fn long_session_id_rejected() {
        let mut input = vec![33];
        input.extend_from_slice(&[0u8; 33]);
        assert!(parse_session_id(&input).is_err());
    }
}
