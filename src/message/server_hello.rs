use nom::error::{Error, ErrorKind};
use nom::number::complete::be_u8;
use nom::{Err, IResult};

use super::extension::{exact, parse_extensions, parse_renegotiation_info, put_extension};
use super::{parse_random, parse_session_id, put_u16_prefixed, put_u8_vec};
use super::{ExtensionType, KeyShareEntry, Random, SessionId};
use crate::types::{CipherSuite, ProtocolVersion};

/// SHA-256("HelloRetryRequest"), the random of a HelloRetryRequest.
pub const HELLO_RETRY_REQUEST_RANDOM: Random = [
    0xCF, 0x21, 0xAD, 0x74, 0xE5, 0x9A, 0x61, 0x11, 0xBE, 0x1D, 0x8C, 0x02, 0x1E, 0x65, 0xB8, 0x91,
    0xC2, 0xA2, 0x11, 0x16, 0x7A, 0xBB, 0x8C, 0x5E, 0x07, 0x9E, 0x09, 0xE2, 0xC8, 0xA8, 0x33, 0x9C,
];

/// Last 8 bytes of a TLS 1.2 ServerHello random from a server that could
/// have done TLS 1.3 (RFC 8446 section 4.1.3).
pub const DOWNGRADE_TLS12: [u8; 8] = [0x44, 0x4F, 0x57, 0x4E, 0x47, 0x52, 0x44, 0x01];

#[derive(Debug, PartialEq, Eq)]
pub struct ServerHello<'a> {
    pub legacy_version: ProtocolVersion,
    pub random: Random,
    pub session_id: SessionId,
    pub cipher_suite: CipherSuite,
    pub selected_version: Option<ProtocolVersion>,
    pub key_share: Option<KeyShareEntry<'a>>,
    pub renegotiation_info: Option<&'a [u8]>,
}

impl<'a> ServerHello<'a> {
    pub fn parse(input: &'a [u8]) -> IResult<&'a [u8], ServerHello<'a>> {
        let (input, legacy_version) = ProtocolVersion::parse(input)?;
        let (input, random) = parse_random(input)?;
        let (input, session_id) = parse_session_id(input)?;
        let (input, cipher_suite) = CipherSuite::parse(input)?;
        let (input, compression) = be_u8(input)?;
        if compression != 0 {
            return Err(Err::Failure(Error::new(input, ErrorKind::Verify)));
        }
        let (input, extensions) = parse_extensions(input)?;

        let mut hello = ServerHello {
            legacy_version,
            random,
            session_id,
            cipher_suite,
            selected_version: None,
            key_share: None,
            renegotiation_info: None,
        };

        for ext in extensions {
            let data = ext.extension_data;
            match ext.extension_type {
                ExtensionType::SupportedVersions => {
                    hello.selected_version = Some(exact(data, ProtocolVersion::parse)?);
                }
                ExtensionType::KeyShare => {
                    hello.key_share = Some(exact(data, KeyShareEntry::parse)?);
                }
                ExtensionType::RenegotiationInfo => {
                    hello.renegotiation_info = Some(exact(data, parse_renegotiation_info)?);
                }
                _ => {}
            }
        }

        Ok((input, hello))
    }

    /// The negotiated version, from supported_versions when present.
    pub fn version(&self) -> ProtocolVersion {
        self.selected_version.unwrap_or(self.legacy_version)
    }

    pub fn is_hello_retry_request(&self) -> bool {
        self.random == HELLO_RETRY_REQUEST_RANDOM
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.extend_from_slice(&self.legacy_version.as_u16().to_be_bytes());
        output.extend_from_slice(&self.random);
        put_u8_vec(output, &self.session_id);
        output.extend_from_slice(&self.cipher_suite.as_u16().to_be_bytes());
        output.push(0);

        put_u16_prefixed(output, |out| {
            if let Some(v) = self.selected_version {
                put_extension(out, ExtensionType::SupportedVersions, |out| {
                    out.extend_from_slice(&v.as_u16().to_be_bytes())
                });
            }
            if let Some(share) = &self.key_share {
                put_extension(out, ExtensionType::KeyShare, |out| share.serialize(out));
            }
            if let Some(ri) = self.renegotiation_info {
                put_extension(out, ExtensionType::RenegotiationInfo, |out| {
                    put_u8_vec(out, ri)
                });
            }
        });
    }
}
