use thiserror::Error;

use crate::alert::AlertDescription;

/// Errors raised by the engine.
///
/// The variants fall into the four groups reported by [`Error::kind`]. Usage
/// errors never change engine state. Protocol errors close the engine after
/// a fatal alert has been sent. Crypto and internal errors close the engine
/// without sending anything.
#[derive(Debug, Error)]
pub enum Error {
    #[error("buffer range out of bounds: offset {offset}, length {length}, buffers {len}")]
    IndexOutOfBounds {
        offset: usize,
        length: usize,
        len: usize,
    },

    #[error("destination buffer is read-only")]
    ReadOnlyBuffer,

    #[error("no destination buffers")]
    NoDestination,

    #[error("illegal state: {0}")]
    IllegalState(&'static str),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("peer not authenticated")]
    PeerUnverified,

    #[error("{alert}: {reason}")]
    Protocol {
        alert: AlertDescription,
        reason: String,
    },

    #[error("received fatal alert: {0}")]
    PeerAlert(AlertDescription),

    #[error("inbound closed before receiving peer's close_notify")]
    InboundTruncated,

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Broad classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Programming error by the caller.
    Usage,
    /// The peer misbehaved, or the connection was torn down.
    Protocol,
    /// Local key or provider failure.
    Crypto,
    /// Inconsistent engine state.
    Internal,
}

impl Error {
    pub(crate) fn protocol(alert: AlertDescription, reason: impl Into<String>) -> Self {
        Error::Protocol {
            alert,
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::IndexOutOfBounds { .. }
            | Error::ReadOnlyBuffer
            | Error::NoDestination
            | Error::IllegalState(_)
            | Error::ConfigError(_)
            | Error::PeerUnverified => ErrorKind::Usage,
            Error::Protocol { .. } | Error::PeerAlert(_) | Error::InboundTruncated => {
                ErrorKind::Protocol
            }
            Error::Crypto(_) => ErrorKind::Crypto,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// The alert this engine sends to the peer for the error, if any.
    pub fn alert(&self) -> Option<AlertDescription> {
        match self {
            Error::Protocol { alert, .. } => Some(*alert),
            Error::InboundTruncated => Some(AlertDescription::InternalError),
            _ => None,
        }
    }
}

/// Typed failure from a crypto provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("bad key: {0}")]
    BadKey(String),

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("verification failed: {0}")]
    VerificationFailed(String),

    #[error("decryption failed")]
    DecryptFailed,

    #[error("provider failure: {0}")]
    Provider(String),
}

impl<'a> From<nom::Err<nom::error::Error<&'a [u8]>>> for Error {
    fn from(value: nom::Err<nom::error::Error<&'a [u8]>>) -> Self {
        let reason = match value {
            nom::Err::Incomplete(_) => "truncated message".to_string(),
            nom::Err::Error(e) | nom::Err::Failure(e) => format!("malformed message ({:?})", e.code),
        };
        Error::protocol(AlertDescription::DecodeError, reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds() {
        assert_eq!(Error::ReadOnlyBuffer.kind(), ErrorKind::Usage);
        assert_eq!(
            Error::protocol(AlertDescription::BadRecordMac, "x").kind(),
            ErrorKind::Protocol
        );
        assert_eq!(
            Error::from(CryptoError::BadKey("k".into())).kind(),
            ErrorKind::Crypto
        );
        assert_eq!(Error::Internal("x".into()).kind(), ErrorKind::Internal);
    }

    #[test]
    fn only_protocol_errors_carry_alerts() {
        assert_eq!(
            Error::protocol(AlertDescription::DecodeError, "x").alert(),
            Some(AlertDescription::DecodeError)
        );
        assert_eq!(Error::PeerAlert(AlertDescription::HandshakeFailure).alert(), None);
        assert_eq!(Error::from(CryptoError::DecryptFailed).alert(), None);
    }

    #[test]
    fn nom_errors_map_to_decode_error() {
        let err: Error = nom::Err::Error(nom::error::Error::new(
            &[][..],
            nom::error::ErrorKind::Eof,
        ))
        .into();
        assert_eq!(err.alert(), Some(AlertDescription::DecodeError));
    }
}
