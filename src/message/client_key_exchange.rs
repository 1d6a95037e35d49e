use nom::error::{Error, ErrorKind};
use nom::{Err, IResult};

use super::{put_u8_vec, u8_vec};

/// ECDHE ClientKeyExchange: the client's ephemeral public point.
#[derive(Debug, PartialEq, Eq)]
pub struct ClientKeyExchange<'a> {
    pub public: &'a [u8],
}

impl<'a> ClientKeyExchange<'a> {
    pub fn parse(input: &'a [u8]) -> IResult<&'a [u8], ClientKeyExchange<'a>> {
        let (rest, public) = u8_vec(input)?;
        if public.is_empty() {
            return Err(Err::Failure(Error::new(input, ErrorKind::LengthValue)));
        }
        Ok((rest, ClientKeyExchange { public }))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        put_u8_vec(output, self.public);
    }
}
