use nom::error::{Error, ErrorKind};
use nom::{Err, IResult};

use super::extension::parse_extensions;
use super::put_u16_prefixed;

/// EncryptedExtensions. The engine negotiates nothing here, any
/// extensions the peer sends are ignored.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct EncryptedExtensions;

impl EncryptedExtensions {
    pub fn parse(input: &[u8]) -> IResult<&[u8], EncryptedExtensions> {
        // The block is mandatory here
        if input.is_empty() {
            return Err(Err::Error(Error::new(input, ErrorKind::Eof)));
        }
        let (input, _extensions) = parse_extensions(input)?;
        Ok((input, EncryptedExtensions))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        put_u16_prefixed(output, |_| {});
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::decode;

    #[test]
    fn empty_block() {
        let mut out = Vec::new();
        EncryptedExtensions.serialize(&mut out);
        assert_eq!(out, [0, 0]);
        assert_eq!(decode(&out, EncryptedExtensions::parse).unwrap(), EncryptedExtensions);
        assert!(decode(&[], EncryptedExtensions::parse).is_err());
    }
}
