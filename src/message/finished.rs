use nom::error::{Error, ErrorKind};
use nom::{Err, IResult};

#[derive(Debug, PartialEq, Eq)]
pub struct Finished<'a> {
    pub verify_data: &'a [u8],
}

impl<'a> Finished<'a> {
    pub fn new(verify_data: &'a [u8]) -> Self {
        Finished { verify_data }
    }

    /// The whole body is verify data. Its length depends on the version
    /// and hash and is checked by comparing against the expected value.
    pub fn parse(input: &'a [u8]) -> IResult<&'a [u8], Finished<'a>> {
        if input.is_empty() {
            return Err(Err::Error(Error::new(input, ErrorKind::Eof)));
        }
        Ok((&input[input.len()..], Finished { verify_data: input }))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.extend_from_slice(self.verify_data);
    }
}
