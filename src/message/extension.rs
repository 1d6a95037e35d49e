use nom::error::{Error, ErrorKind};
use nom::number::complete::{be_u16, be_u8};
use nom::{Err, IResult};

use super::{put_u16_prefixed, put_u16_vec, put_u8_prefixed, u16_vec, u8_vec};
use crate::types::{NamedGroup, ProtocolVersion, SignatureScheme};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionType {
    SupportedGroups,
    SignatureAlgorithms,
    SupportedVersions,
    CertificateAuthorities,
    KeyShare,
    RenegotiationInfo,
    Unknown(u16),
}

impl ExtensionType {
    pub fn from_u16(value: u16) -> Self {
        match value {
            10 => ExtensionType::SupportedGroups,
            13 => ExtensionType::SignatureAlgorithms,
            43 => ExtensionType::SupportedVersions,
            47 => ExtensionType::CertificateAuthorities,
            51 => ExtensionType::KeyShare,
            0xff01 => ExtensionType::RenegotiationInfo,
            _ => ExtensionType::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            ExtensionType::SupportedGroups => 10,
            ExtensionType::SignatureAlgorithms => 13,
            ExtensionType::SupportedVersions => 43,
            ExtensionType::CertificateAuthorities => 47,
            ExtensionType::KeyShare => 51,
            ExtensionType::RenegotiationInfo => 0xff01,
            ExtensionType::Unknown(value) => *value,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct Extension<'a> {
    pub extension_type: ExtensionType,
    pub extension_data: &'a [u8],
}

impl<'a> Extension<'a> {
    pub fn parse(input: &'a [u8]) -> IResult<&'a [u8], Extension<'a>> {
        let (input, extension_type) = be_u16(input)?;
        let (input, extension_data) = u16_vec(input)?;
        Ok((
            input,
            Extension {
                extension_type: ExtensionType::from_u16(extension_type),
                extension_data,
            },
        ))
    }
}

/// Parse an optional u16-prefixed extension block.
///
/// A message may end without the block at all. The same extension twice
/// is a decode error.
pub fn parse_extensions(input: &[u8]) -> IResult<&[u8], Vec<Extension<'_>>> {
    if input.is_empty() {
        return Ok((input, Vec::new()));
    }

    let (rest, mut block) = u16_vec(input)?;
    let mut out: Vec<Extension> = Vec::new();
    while !block.is_empty() {
        let (r, ext) = Extension::parse(block)?;
        if out.iter().any(|e| e.extension_type == ext.extension_type) {
            return Err(Err::Failure(Error::new(block, ErrorKind::Verify)));
        }
        out.push(ext);
        block = r;
    }
    Ok((rest, out))
}

/// Write one extension, `f` producing its body.
pub fn put_extension(out: &mut Vec<u8>, extension_type: ExtensionType, f: impl FnOnce(&mut Vec<u8>)) {
    out.extend_from_slice(&extension_type.as_u16().to_be_bytes());
    put_u16_prefixed(out, f);
}

/// Run `f` over `data`, which it must consume exactly.
pub fn exact<'a, T>(
    data: &'a [u8],
    f: impl FnOnce(&'a [u8]) -> IResult<&'a [u8], T>,
) -> Result<T, Err<Error<&'a [u8]>>> {
    let (rest, value) = f(data)?;
    if !rest.is_empty() {
        return Err(Err::Failure(Error::new(rest, ErrorKind::Eof)));
    }
    Ok(value)
}

/// Apply `f` to every element of a list that must be consumed exactly.
pub fn parse_list<'a, O>(
    mut data: &'a [u8],
    mut f: impl FnMut(&'a [u8]) -> IResult<&'a [u8], O>,
) -> IResult<&'a [u8], Vec<O>> {
    let mut out = Vec::new();
    while !data.is_empty() {
        let (rest, item) = f(data)?;
        out.push(item);
        data = rest;
    }
    Ok((data, out))
}

pub fn parse_named_groups(data: &[u8]) -> IResult<&[u8], Vec<NamedGroup>> {
    let (rest, list) = u16_vec(data)?;
    let (_, groups) = parse_list(list, NamedGroup::parse)?;
    Ok((rest, groups))
}

pub fn put_named_groups(out: &mut Vec<u8>, groups: &[NamedGroup]) {
    put_u16_prefixed(out, |out| {
        for g in groups {
            out.extend_from_slice(&g.as_u16().to_be_bytes());
        }
    });
}

pub fn parse_signature_schemes(data: &[u8]) -> IResult<&[u8], Vec<SignatureScheme>> {
    let (rest, list) = u16_vec(data)?;
    let (_, schemes) = parse_list(list, SignatureScheme::parse)?;
    Ok((rest, schemes))
}

pub fn put_signature_schemes(out: &mut Vec<u8>, schemes: &[SignatureScheme]) {
    put_u16_prefixed(out, |out| {
        for s in schemes {
            out.extend_from_slice(&s.as_u16().to_be_bytes());
        }
    });
}

/// ClientHello form of supported_versions: a u8-prefixed list.
pub fn parse_versions(data: &[u8]) -> IResult<&[u8], Vec<ProtocolVersion>> {
    let (rest, list) = u8_vec(data)?;
    let (_, versions) = parse_list(list, ProtocolVersion::parse)?;
    Ok((rest, versions))
}

pub fn put_versions(out: &mut Vec<u8>, versions: &[ProtocolVersion]) {
    put_u8_prefixed(out, |out| {
        for v in versions {
            out.extend_from_slice(&v.as_u16().to_be_bytes());
        }
    });
}

/// certificate_authorities: a u16-prefixed list of u16-prefixed DER names.
pub fn parse_authorities(data: &[u8]) -> IResult<&[u8], Vec<&[u8]>> {
    let (rest, list) = u16_vec(data)?;
    let (_, names) = parse_list(list, u16_vec)?;
    Ok((rest, names))
}

pub fn put_authorities(out: &mut Vec<u8>, names: &[Vec<u8>]) {
    put_u16_prefixed(out, |out| {
        for name in names {
            put_u16_vec(out, name);
        }
    });
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyShareEntry<'a> {
    pub group: NamedGroup,
    pub key_exchange: &'a [u8],
}

impl<'a> KeyShareEntry<'a> {
    pub fn parse(input: &'a [u8]) -> IResult<&'a [u8], KeyShareEntry<'a>> {
        let (input, group) = NamedGroup::parse(input)?;
        let (input, key_exchange) = u16_vec(input)?;
        if key_exchange.is_empty() {
            return Err(Err::Failure(Error::new(input, ErrorKind::LengthValue)));
        }
        Ok((input, KeyShareEntry { group, key_exchange }))
    }

    pub fn serialize(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.group.as_u16().to_be_bytes());
        put_u16_vec(out, self.key_exchange);
    }
}

/// renegotiation_info body: a u8-prefixed verify data.
pub fn parse_renegotiation_info(data: &[u8]) -> IResult<&[u8], &[u8]> {
    u8_vec(data)
}

/// The single byte body of a KeyUpdate or similar enum.
pub fn parse_u8_enum(input: &[u8], max: u8) -> IResult<&[u8], u8> {
    let (rest, v) = be_u8(input)?;
    if v > max {
        return Err(Err::Failure(Error::new(input, ErrorKind::Verify)));
    }
    Ok((rest, v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_extensions_rejected() {
        let block = [0, 8, 0, 43, 0, 0, 0, 43, 0, 0];
        assert!(parse_extensions(&block).is_err());
    }

    #[test]
    fn missing_block_is_empty() {
        let (rest, exts) = parse_extensions(&[]).unwrap();
        assert!(rest.is_empty());
        assert!(exts.is_empty());
    }

    #[test]
    fn unknown_extension_kept_as_unknown() {
        let block = [0, 5, 0x12, 0x34, 0, 1, 9];
        let (_, exts) = parse_extensions(&block).unwrap();
        assert_eq!(exts[0].extension_type, ExtensionType::Unknown(0x1234));
        assert_eq!(exts[0].extension_data, &[9]);
    }

    #[test]
    fn empty_key_share_rejected() {
        assert!(KeyShareEntry::parse(&[0, 29, 0, 0]).is_err());
    }
}
