use crate::alert::AlertDescription;
use crate::types::HandshakeType;
use crate::Error;

/// msg_type(1) || length(3)
pub const HANDSHAKE_HEADER_LEN: usize = 4;

/// Frame a handshake message body with its header.
pub fn frame(msg_type: HandshakeType, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HANDSHAKE_HEADER_LEN + body.len());
    out.push(msg_type.as_u8());
    super::put_u24_vec(&mut out, body);
    out
}

/// Look at the first message buffered in `buf`.
///
/// Returns its type and total length (header included) once it is complete,
/// `None` while more bytes are needed.
pub fn next_message(buf: &[u8], max_len: usize) -> Result<Option<(HandshakeType, usize)>, Error> {
    if buf.len() < HANDSHAKE_HEADER_LEN {
        return Ok(None);
    }

    let msg_type = HandshakeType::from_u8(buf[0]);
    if let HandshakeType::Unknown(v) = msg_type {
        return Err(Error::protocol(
            AlertDescription::UnexpectedMessage,
            format!("unknown handshake message type {}", v),
        ));
    }

    let len = u32::from_be_bytes([0, buf[1], buf[2], buf[3]]) as usize;
    if len > max_len {
        return Err(Error::protocol(
            AlertDescription::HandshakeFailure,
            format!("handshake message of {} bytes exceeds {}", len, max_len),
        ));
    }

    let total = HANDSHAKE_HEADER_LEN + len;
    if buf.len() < total {
        return Ok(None);
    }
    Ok(Some((msg_type, total)))
}
