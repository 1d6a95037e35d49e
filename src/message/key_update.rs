use nom::IResult;

use super::extension::parse_u8_enum;

/// TLS 1.3 KeyUpdate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyUpdate {
    /// The peer must answer with its own KeyUpdate.
    pub update_requested: bool,
}

impl KeyUpdate {
    pub fn parse(input: &[u8]) -> IResult<&[u8], KeyUpdate> {
        let (input, v) = parse_u8_enum(input, 1)?;
        Ok((
            input,
            KeyUpdate {
                update_requested: v == 1,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.push(self.update_requested as u8);
    }
}
