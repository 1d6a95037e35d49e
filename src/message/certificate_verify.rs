use nom::IResult;

use super::{put_u16_vec, u16_vec};
use crate::types::SignatureScheme;

/// CertificateVerify, and the DigitallySigned tail of a TLS 1.2
/// ServerKeyExchange, which share the same layout.
#[derive(Debug, PartialEq, Eq)]
pub struct CertificateVerify<'a> {
    pub scheme: SignatureScheme,
    pub signature: &'a [u8],
}

impl<'a> CertificateVerify<'a> {
    pub fn parse(input: &'a [u8]) -> IResult<&'a [u8], CertificateVerify<'a>> {
        let (input, scheme) = SignatureScheme::parse(input)?;
        let (input, signature) = u16_vec(input)?;
        Ok((input, CertificateVerify { scheme, signature }))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.extend_from_slice(&self.scheme.as_u16().to_be_bytes());
        put_u16_vec(output, self.signature);
    }
}

/// Content covered by a TLS 1.3 CertificateVerify signature.
///
/// 64 spaces, a context string, a zero byte, then the transcript hash.
pub fn tls13_signed_content(server: bool, transcript_hash: &[u8]) -> Vec<u8> {
    let context: &[u8] = if server {
        b"TLS 1.3, server CertificateVerify"
    } else {
        b"TLS 1.3, client CertificateVerify"
    };
    let mut out = Vec::with_capacity(64 + context.len() + 1 + transcript_hash.len());
    out.extend_from_slice(&[0x20; 64]);
    out.extend_from_slice(context);
    out.push(0);
    out.extend_from_slice(transcript_hash);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::decode;

    #[test]
    fn roundtrip() {
        let sig = [9u8; 70];
        let cv = CertificateVerify {
            scheme: SignatureScheme::ECDSA_SECP256R1_SHA256,
            signature: &sig,
        };
        let mut out = Vec::new();
        cv.serialize(&mut out);
        assert_eq!(&out[..4], &[4, 3, 0, 70]);
        assert_eq!(decode(&out, CertificateVerify::parse).unwrap(), cv);
    }

    #[test]
    fn signed_content_layout() {
        let content = tls13_signed_content(true, &[1, 2]);
        assert_eq!(content.len(), 64 + 33 + 1 + 2);
        assert_eq!(content[64], b'T');
        assert_eq!(content[97], 0);
    }
}
