use nom::error::{Error, ErrorKind};
use nom::{Err, IResult};

use super::extension::{exact, parse_extensions, parse_list, put_extension};
use super::extension::{parse_named_groups, parse_renegotiation_info, parse_signature_schemes};
use super::extension::{parse_versions, put_named_groups, put_signature_schemes, put_versions};
use super::{parse_random, parse_session_id, put_u16_prefixed, put_u8_vec, u16_vec, u8_vec};
use super::{ExtensionType, KeyShareEntry, Random, SessionId};
use crate::types::{CipherSuite, NamedGroup, ProtocolVersion, SignatureScheme};

/// ClientHello with the extensions the engine understands broken out.
///
/// Unknown extensions are skipped.
#[derive(Debug, PartialEq, Eq)]
pub struct ClientHello<'a> {
    pub legacy_version: ProtocolVersion,
    pub random: Random,
    pub session_id: SessionId,
    pub cipher_suites: Vec<CipherSuite>,
    pub supported_versions: Vec<ProtocolVersion>,
    pub supported_groups: Vec<NamedGroup>,
    pub signature_algorithms: Vec<SignatureScheme>,
    pub key_shares: Vec<KeyShareEntry<'a>>,
    pub renegotiation_info: Option<&'a [u8]>,
}

impl<'a> ClientHello<'a> {
    pub fn parse(input: &'a [u8]) -> IResult<&'a [u8], ClientHello<'a>> {
        let (input, legacy_version) = ProtocolVersion::parse(input)?;
        let (input, random) = parse_random(input)?;
        let (input, session_id) = parse_session_id(input)?;

        let (input, suites) = u16_vec(input)?;
        if suites.is_empty() || suites.len() % 2 != 0 {
            return Err(Err::Failure(Error::new(suites, ErrorKind::LengthValue)));
        }
        let (_, cipher_suites) = parse_list(suites, CipherSuite::parse)?;

        // Only the null compression method is acceptable
        let (input, compression) = u8_vec(input)?;
        if !compression.contains(&0) {
            return Err(Err::Failure(Error::new(compression, ErrorKind::Verify)));
        }

        let (input, extensions) = parse_extensions(input)?;

        let mut hello = ClientHello {
            legacy_version,
            random,
            session_id,
            cipher_suites,
            supported_versions: Vec::new(),
            supported_groups: Vec::new(),
            signature_algorithms: Vec::new(),
            key_shares: Vec::new(),
            renegotiation_info: None,
        };

        for ext in extensions {
            let data = ext.extension_data;
            match ext.extension_type {
                ExtensionType::SupportedVersions => {
                    hello.supported_versions = exact(data, parse_versions)?;
                }
                ExtensionType::SupportedGroups => {
                    hello.supported_groups = exact(data, parse_named_groups)?;
                }
                ExtensionType::SignatureAlgorithms => {
                    hello.signature_algorithms = exact(data, parse_signature_schemes)?;
                }
                ExtensionType::KeyShare => {
                    let list = exact(data, u16_vec)?;
                    hello.key_shares = exact(list, |i| parse_list(i, KeyShareEntry::parse))?;
                }
                ExtensionType::RenegotiationInfo => {
                    hello.renegotiation_info = Some(exact(data, parse_renegotiation_info)?);
                }
                _ => {}
            }
        }

        Ok((input, hello))
    }

    /// Whether the client signals secure renegotiation with the SCSV.
    pub fn has_renegotiation_scsv(&self) -> bool {
        self.cipher_suites
            .contains(&CipherSuite::EMPTY_RENEGOTIATION_INFO_SCSV)
    }

    /// Highest version offered that is also in `enabled`.
    pub fn negotiate_version(&self, enabled: &[ProtocolVersion]) -> Option<ProtocolVersion> {
        if self.supported_versions.is_empty() {
            // Pre TLS 1.3 clients only have the legacy field
            let v = self.legacy_version.min(ProtocolVersion::TLS1_2);
            return enabled.contains(&v).then_some(v);
        }
        self.supported_versions
            .iter()
            .filter(|v| enabled.contains(v))
            .max()
            .copied()
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.extend_from_slice(&self.legacy_version.as_u16().to_be_bytes());
        output.extend_from_slice(&self.random);
        put_u8_vec(output, &self.session_id);

        put_u16_prefixed(output, |out| {
            for suite in &self.cipher_suites {
                out.extend_from_slice(&suite.as_u16().to_be_bytes());
            }
        });

        // null compression
        put_u8_vec(output, &[0]);

        put_u16_prefixed(output, |out| {
            if !self.supported_versions.is_empty() {
                put_extension(out, ExtensionType::SupportedVersions, |out| {
                    put_versions(out, &self.supported_versions)
                });
            }
            if !self.supported_groups.is_empty() {
                put_extension(out, ExtensionType::SupportedGroups, |out| {
                    put_named_groups(out, &self.supported_groups)
                });
            }
            if !self.signature_algorithms.is_empty() {
                put_extension(out, ExtensionType::SignatureAlgorithms, |out| {
                    put_signature_schemes(out, &self.signature_algorithms)
                });
            }
            if !self.key_shares.is_empty() {
                put_extension(out, ExtensionType::KeyShare, |out| {
                    put_u16_prefixed(out, |out| {
                        for share in &self.key_shares {
                            share.serialize(out);
                        }
                    })
                });
            }
            if let Some(ri) = self.renegotiation_info {
                put_extension(out, ExtensionType::RenegotiationInfo, |out| {
                    put_u8_vec(out, ri)
                });
            }
        });
    }
}
