use nom::IResult;

use super::extension::{exact, parse_authorities, parse_extensions, parse_signature_schemes};
use super::extension::{put_authorities, put_extension, put_signature_schemes};
use super::{put_u16_prefixed, put_u8_vec, u8_vec, ExtensionType};
use crate::types::SignatureScheme;

/// ClientCertificateType ecdsa_sign
const ECDSA_SIGN: u8 = 64;

/// CertificateRequest in either version's layout.
///
/// ```text
/// TLS 1.2: certificate_types<1..2^8-1>
///          supported_signature_algorithms<2..2^16-2>
///          certificate_authorities<0..2^16-1>
/// TLS 1.3: certificate_request_context<0..2^8-1>
///          extensions<2..2^16-1>
/// ```
#[derive(Debug, PartialEq, Eq)]
pub struct CertificateRequest<'a> {
    pub context: &'a [u8],
    pub signature_schemes: Vec<SignatureScheme>,
    pub authorities: Vec<&'a [u8]>,
}

impl<'a> CertificateRequest<'a> {
    pub fn parse_tls12(input: &'a [u8]) -> IResult<&'a [u8], CertificateRequest<'a>> {
        let (input, _certificate_types) = u8_vec(input)?;
        let (input, signature_schemes) = parse_signature_schemes(input)?;
        let (input, authorities) = parse_authorities(input)?;
        Ok((
            input,
            CertificateRequest {
                context: &[],
                signature_schemes,
                authorities,
            },
        ))
    }

    pub fn parse_tls13(input: &'a [u8]) -> IResult<&'a [u8], CertificateRequest<'a>> {
        let (input, context) = u8_vec(input)?;
        let (input, extensions) = parse_extensions(input)?;

        let mut request = CertificateRequest {
            context,
            signature_schemes: Vec::new(),
            authorities: Vec::new(),
        };
        for ext in extensions {
            match ext.extension_type {
                ExtensionType::SignatureAlgorithms => {
                    request.signature_schemes =
                        exact(ext.extension_data, parse_signature_schemes)?;
                }
                ExtensionType::CertificateAuthorities => {
                    request.authorities = exact(ext.extension_data, parse_authorities)?;
                }
                _ => {}
            }
        }
        Ok((input, request))
    }

    fn owned_authorities(&self) -> Vec<Vec<u8>> {
        self.authorities.iter().map(|a| a.to_vec()).collect()
    }

    pub fn serialize_tls12(&self, output: &mut Vec<u8>) {
        put_u8_vec(output, &[ECDSA_SIGN]);
        put_signature_schemes(output, &self.signature_schemes);
        put_authorities(output, &self.owned_authorities());
    }

    pub fn serialize_tls13(&self, output: &mut Vec<u8>) {
        put_u8_vec(output, self.context);
        put_u16_prefixed(output, |out| {
            put_extension(out, ExtensionType::SignatureAlgorithms, |out| {
                put_signature_schemes(out, &self.signature_schemes)
            });
            if !self.authorities.is_empty() {
                put_extension(out, ExtensionType::CertificateAuthorities, |out| {
                    put_authorities(out, &self.owned_authorities())
                });
            }
        });
    }
}
