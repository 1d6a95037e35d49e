use nom::error::{Error, ErrorKind};
use nom::number::complete::be_u8;
use nom::{Err, IResult};

use super::{put_u8_vec, u8_vec, CertificateVerify, Random};
use crate::types::NamedGroup;

/// ECCurveType named_curve
const NAMED_CURVE: u8 = 3;

/// ECDHE ServerKeyExchange (RFC 8422 section 5.4).
///
/// ```text
/// struct {
///     ECParameters curve_params;   // curve_type(1) || named_curve(2)
///     ECPoint      public;         // opaque point <1..2^8-1>
///     digitally-signed struct { ... } signed_params;
/// } ServerKeyExchange;
/// ```
#[derive(Debug, PartialEq, Eq)]
pub struct ServerKeyExchange<'a> {
    pub group: NamedGroup,
    pub public: &'a [u8],
    pub signed: CertificateVerify<'a>,
}

impl<'a> ServerKeyExchange<'a> {
    pub fn parse(input: &'a [u8]) -> IResult<&'a [u8], ServerKeyExchange<'a>> {
        let (input, (group, public)) = Self::parse_params(input)?;
        let (input, signed) = CertificateVerify::parse(input)?;
        Ok((
            input,
            ServerKeyExchange {
                group,
                public,
                signed,
            },
        ))
    }

    fn parse_params(input: &'a [u8]) -> IResult<&'a [u8], (NamedGroup, &'a [u8])> {
        let (rest, curve_type) = be_u8(input)?;
        if curve_type != NAMED_CURVE {
            return Err(Err::Failure(Error::new(input, ErrorKind::Verify)));
        }
        let (rest, group) = NamedGroup::parse(rest)?;
        let (rest, public) = u8_vec(rest)?;
        if public.is_empty() {
            return Err(Err::Failure(Error::new(rest, ErrorKind::LengthValue)));
        }
        Ok((rest, (group, public)))
    }

    /// The ECParameters and point, as signed.
    pub fn params(group: NamedGroup, public: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + public.len());
        out.push(NAMED_CURVE);
        out.extend_from_slice(&group.as_u16().to_be_bytes());
        put_u8_vec(&mut out, public);
        out
    }

    /// client_random || server_random || params
    pub fn signed_content(client_random: &Random, server_random: &Random, params: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 + params.len());
        out.extend_from_slice(client_random);
        out.extend_from_slice(server_random);
        out.extend_from_slice(params);
        out
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.extend_from_slice(&Self::params(self.group, self.public));
        self.signed.serialize(output);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::decode;
    use crate::types::SignatureScheme;

    #[test]
    fn roundtrip() {
        let point = [4u8; 65];
        let sig = [1u8; 71];
        let ske = ServerKeyExchange {
            group: NamedGroup::Secp256r1,
            public: &point,
            signed: CertificateVerify {
                scheme: SignatureScheme::ECDSA_SECP256R1_SHA256,
                signature: &sig,
            },
        };
        let mut out = Vec::new();
        ske.serialize(&mut out);
        assert_eq!(&out[..4], &[3, 0, 23, 65]);
        assert_eq!(decode(&out, ServerKeyExchange::parse).unwrap(), ske);
    }

    #[test]
    fn explicit_curves_rejected() {
        assert!(decode(&[1, 0, 23, 1, 4, 4, 3, 0, 0], ServerKeyExchange::parse).is_err());
    }
}
