use nom::IResult;

use super::extension::parse_list;
use super::{put_u16_vec, put_u24_prefixed, put_u24_vec, put_u8_vec, u16_vec, u24_vec, u8_vec};

/// Certificate message, leaf first.
///
/// TLS 1.2 carries a bare `u24` list of certificates. TLS 1.3 adds a request
/// context and per-entry extensions, which are ignored.
#[derive(Debug, PartialEq, Eq)]
pub struct Certificate<'a> {
    pub context: &'a [u8],
    pub certificate_list: Vec<&'a [u8]>,
}

impl<'a> Certificate<'a> {
    pub fn new(certificate_list: Vec<&'a [u8]>) -> Self {
        Certificate {
            context: &[],
            certificate_list,
        }
    }

    pub fn parse_tls12(input: &'a [u8]) -> IResult<&'a [u8], Certificate<'a>> {
        let (input, list) = u24_vec(input)?;
        let (_, certificate_list) = parse_list(list, u24_vec)?;
        Ok((input, Certificate::new(certificate_list)))
    }

    pub fn parse_tls13(input: &'a [u8]) -> IResult<&'a [u8], Certificate<'a>> {
        let (input, context) = u8_vec(input)?;
        let (input, list) = u24_vec(input)?;
        let (_, certificate_list) = parse_list(list, |i| {
            let (i, cert) = u24_vec(i)?;
            let (i, _extensions) = u16_vec(i)?;
            Ok((i, cert))
        })?;
        Ok((
            input,
            Certificate {
                context,
                certificate_list,
            },
        ))
    }

    pub fn serialize_tls12(&self, output: &mut Vec<u8>) {
        put_u24_prefixed(output, |out| {
            for cert in &self.certificate_list {
                put_u24_vec(out, cert);
            }
        });
    }

    pub fn serialize_tls13(&self, output: &mut Vec<u8>) {
        put_u8_vec(output, self.context);
        put_u24_prefixed(output, |out| {
            for cert in &self.certificate_list {
                put_u24_vec(out, cert);
                put_u16_vec(out, &[]);
            }
        });
    }

    /// Owned copy of the chain.
    pub fn to_chain(&self) -> Vec<Vec<u8>> {
        self.certificate_list.iter().map(|c| c.to_vec()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::decode;

    #[test]
    fn both_forms() {
        let leaf = [1u8, 2, 3];
        let ca = [4u8; 10];
        let cert = Certificate::new(vec![&leaf, &ca]);

        let mut tls12 = Vec::new();
        cert.serialize_tls12(&mut tls12);
        assert_eq!(&tls12[..6], &[0, 0, 19, 0, 0, 3]);
        assert_eq!(decode(&tls12, Certificate::parse_tls12).unwrap(), cert);

        let mut tls13 = Vec::new();
        cert.serialize_tls13(&mut tls13);
        assert_eq!(decode(&tls13, Certificate::parse_tls13).unwrap(), cert);
    }

    #[test]
    fn empty_chain() {
        let parsed = decode(&[0, 0, 0, 0], Certificate::parse_tls13).unwrap();
        assert!(parsed.certificate_list.is_empty());
        let parsed = decode(&[0, 0, 0], Certificate::parse_tls12).unwrap();
        assert!(parsed.certificate_list.is_empty());
    }

    #[test]
    fn inner_length_mismatch() {
        // outer says 4, inner cert claims 5
        assert!(decode(&[0, 0, 4, 0, 0, 5, 1], Certificate::parse_tls12).is_err());
    }
}
