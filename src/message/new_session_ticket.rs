use nom::number::complete::be_u32;
use nom::IResult;

use super::extension::parse_extensions;
use super::{put_u16_prefixed, put_u16_vec, put_u8_vec, u16_vec, u8_vec};

/// TLS 1.3 NewSessionTicket.
///
/// The engine issues tickets so peers see a complete post-handshake flow,
/// but never resumes from them.
#[derive(Debug, PartialEq, Eq)]
pub struct NewSessionTicket<'a> {
    pub lifetime: u32,
    pub age_add: u32,
    pub nonce: &'a [u8],
    pub ticket: &'a [u8],
}

impl<'a> NewSessionTicket<'a> {
    pub fn parse(input: &'a [u8]) -> IResult<&'a [u8], NewSessionTicket<'a>> {
        let (input, lifetime) = be_u32(input)?;
        let (input, age_add) = be_u32(input)?;
        let (input, nonce) = u8_vec(input)?;
        let (input, ticket) = u16_vec(input)?;
        let (input, _extensions) = parse_extensions(input)?;
        Ok((
            input,
            NewSessionTicket {
                lifetime,
                age_add,
                nonce,
                ticket,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.extend_from_slice(&self.lifetime.to_be_bytes());
        output.extend_from_slice(&self.age_add.to_be_bytes());
        put_u8_vec(output, self.nonce);
        put_u16_vec(output, self.ticket);
        put_u16_prefixed(output, |_| {});
    }
}
