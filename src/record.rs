//! TLS record framing and protection.
//!
//! ```text
//! struct {
//!     ContentType type;
//!     ProtocolVersion legacy_record_version;
//!     uint16 length;
//!     opaque fragment[TLSPlaintext.length];
//! } TLSPlaintext;
//! ```
//!
//! Protected records use an AEAD in one of these layouts:
//!
//! - TLS 1.2 AES-GCM: `explicit_nonce(8) || ciphertext || tag`, nonce is
//!   `salt(4) || explicit_nonce`, AAD is `seq || type || version || length`.
//! - TLS 1.2 ChaCha20-Poly1305: `ciphertext || tag`, nonce is `iv xor seq`,
//!   same AAD as above.
//! - TLS 1.3: outer type is application_data, the real type trails the
//!   plaintext, nonce is `iv xor seq`, AAD is the record header.

use std::fmt;

use crate::alert::AlertDescription;
use crate::buffer::ByteBuf;
use crate::crypto::key_schedule::Secret;
use crate::crypto::Cipher;
use crate::error::CryptoError;
use crate::types::{ContentType, ProtocolVersion};
use crate::Error;

pub(crate) const HEADER_LEN: usize = 5;

/// Largest plaintext fragment.
pub(crate) const MAX_FRAGMENT_LEN: usize = 16384;

/// Largest plaintext fragment in large-fragment mode.
pub(crate) const LARGE_FRAGMENT_LEN: usize = 32768;

/// Largest record on the wire, header included.
pub(crate) const PACKET_BUFFER_SIZE: usize = 16709;

/// Largest record on the wire in large-fragment mode.
pub(crate) const LARGE_PACKET_BUFFER_SIZE: usize = PACKET_BUFFER_SIZE + MAX_FRAGMENT_LEN;

const EXPLICIT_NONCE_LEN: usize = 8;
const NONCE_LEN: usize = 12;

/// Version written in every record header.
const RECORD_VERSION: u16 = 0x0303;

pub(crate) fn max_fragment_len(large: bool) -> usize {
    if large {
        LARGE_FRAGMENT_LEN
    } else {
        MAX_FRAGMENT_LEN
    }
}

pub(crate) fn packet_buffer_size(large: bool) -> usize {
    if large {
        LARGE_PACKET_BUFFER_SIZE
    } else {
        PACKET_BUFFER_SIZE
    }
}

/// Decoded record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RecordHeader {
    pub content_type: ContentType,
    pub version: u16,
    pub length: usize,
}

impl RecordHeader {
    /// Header plus fragment length.
    pub fn record_len(&self) -> usize {
        HEADER_LEN + self.length
    }

    fn to_bytes(self) -> [u8; HEADER_LEN] {
        let v = self.version.to_be_bytes();
        let l = (self.length as u16).to_be_bytes();
        [self.content_type.as_u8(), v[0], v[1], l[0], l[1]]
    }
}

/// Decode the header at the start of `bytes`.
///
/// `None` means more bytes are needed. `allow_sslv2` is set while a server
/// waits for the first ClientHello, where a legacy SSLv2 hello is detected
/// from its first three bytes.
pub(crate) fn decode_header(
    bytes: &[u8],
    large: bool,
    allow_sslv2: bool,
) -> Result<Option<RecordHeader>, Error> {
    if allow_sslv2 && !bytes.is_empty() && bytes[0] & 0x80 != 0 {
        if bytes.len() < 3 {
            return Ok(None);
        }
        if bytes[2] != 1 {
            return Err(Error::protocol(
                AlertDescription::UnexpectedMessage,
                "SSLv2 record is not a client hello",
            ));
        }
        return Err(Error::protocol(
            AlertDescription::HandshakeFailure,
            "SSLv2 client hello is not supported",
        ));
    }

    if bytes.len() < HEADER_LEN {
        return Ok(None);
    }

    let content_type = ContentType::from_u8(bytes[0]);
    if matches!(content_type, ContentType::Unknown(_)) {
        return Err(Error::protocol(
            AlertDescription::UnexpectedMessage,
            format!("unknown record content type {}", bytes[0]),
        ));
    }

    let (major, minor) = (bytes[1], bytes[2]);
    if major != 3 || minor > 4 {
        return Err(Error::protocol(
            AlertDescription::ProtocolVersion,
            format!("unsupported record version {}.{}", major, minor),
        ));
    }

    let length = u16::from_be_bytes([bytes[3], bytes[4]]) as usize;
    let ceiling = packet_buffer_size(large) - HEADER_LEN;
    if length > ceiling {
        return Err(Error::protocol(
            AlertDescription::RecordOverflow,
            format!("record length {} exceeds {}", length, ceiling),
        ));
    }

    Ok(Some(RecordHeader {
        content_type,
        version: u16::from_be_bytes([major, minor]),
        length,
    }))
}

/// Write one record to `dst`. Returns false, writing nothing, if it does not fit.
pub(crate) fn encode_record(content_type: ContentType, fragment: &[u8], dst: &mut ByteBuf) -> bool {
    if dst.remaining() < HEADER_LEN + fragment.len() {
        return false;
    }
    let header = RecordHeader {
        content_type,
        version: RECORD_VERSION,
        length: fragment.len(),
    };
    dst.put_slice(&header.to_bytes());
    dst.put_slice(fragment);
    true
}

/// AEAD state for one direction of a connection.
pub(crate) struct RecordProtection {
    version: ProtocolVersion,
    cipher: Box<dyn Cipher>,
    iv: Secret,
    seq: u64,
}

impl RecordProtection {
    /// `version` selects the record layout, `iv` is the 4 byte TLS 1.2 GCM
    /// salt or a full 12 byte IV.
    pub fn new(version: ProtocolVersion, cipher: Box<dyn Cipher>, iv: Secret) -> Self {
        RecordProtection {
            version,
            cipher,
            iv,
            seq: 0,
        }
    }

    pub fn is_tls13(&self) -> bool {
        self.version == ProtocolVersion::TLS1_3
    }

    /// Bytes added to a plaintext of a record.
    pub fn overhead(&self) -> usize {
        if self.is_tls13() {
            1 + self.cipher.tag_len()
        } else {
            self.explicit_nonce_len() + self.cipher.tag_len()
        }
    }

    fn explicit_nonce_len(&self) -> usize {
        if self.is_tls13() || self.iv.len() == NONCE_LEN {
            0
        } else {
            EXPLICIT_NONCE_LEN
        }
    }

    fn nonce(&self, explicit: &[u8]) -> [u8; NONCE_LEN] {
        let mut nonce = [0u8; NONCE_LEN];
        if self.iv.len() == NONCE_LEN {
            nonce.copy_from_slice(&self.iv);
            for (n, s) in nonce[4..].iter_mut().zip(self.seq.to_be_bytes()) {
                *n ^= s;
            }
        } else {
            nonce[..4].copy_from_slice(&self.iv);
            nonce[4..].copy_from_slice(explicit);
        }
        nonce
    }

    fn tls12_aad(&self, content_type: ContentType, len: usize) -> [u8; 13] {
        let mut aad = [0u8; 13];
        aad[..8].copy_from_slice(&self.seq.to_be_bytes());
        aad[8] = content_type.as_u8();
        aad[9..11].copy_from_slice(&RECORD_VERSION.to_be_bytes());
        aad[11..].copy_from_slice(&(len as u16).to_be_bytes());
        aad
    }

    fn next_seq(&mut self) -> Result<(), Error> {
        self.seq = self
            .seq
            .checked_add(1)
            .ok_or_else(|| Error::Internal("record sequence number exhausted".to_string()))?;
        Ok(())
    }

    /// Protect a plaintext fragment, returning the outer content type and
    /// the record fragment.
    pub fn seal(
        &mut self,
        content_type: ContentType,
        plaintext: &[u8],
    ) -> Result<(ContentType, Vec<u8>), Error> {
        let out = if self.is_tls13() {
            let mut buf = Vec::with_capacity(plaintext.len() + self.overhead());
            buf.extend_from_slice(plaintext);
            buf.push(content_type.as_u8());

            let header = RecordHeader {
                content_type: ContentType::ApplicationData,
                version: RECORD_VERSION,
                length: buf.len() + self.cipher.tag_len(),
            };
            let nonce = self.nonce(&[]);
            self.cipher.encrypt(&nonce, &header.to_bytes(), &mut buf)?;
            (ContentType::ApplicationData, buf)
        } else {
            let seq = self.seq.to_be_bytes();
            let explicit = &seq[..self.explicit_nonce_len()];
            let nonce = self.nonce(explicit);
            let aad = self.tls12_aad(content_type, plaintext.len());

            let mut buf = plaintext.to_vec();
            self.cipher.encrypt(&nonce, &aad, &mut buf)?;

            let mut fragment = Vec::with_capacity(explicit.len() + buf.len());
            fragment.extend_from_slice(explicit);
            fragment.extend_from_slice(&buf);
            (content_type, fragment)
        };
        self.next_seq()?;
        Ok(out)
    }

    /// Remove protection from a record without advancing the sequence
    /// number. Call [`RecordProtection::commit_read`] once the plaintext is
    /// delivered.
    pub fn open(
        &self,
        header: &RecordHeader,
        fragment: &[u8],
        max_plaintext: usize,
    ) -> Result<(ContentType, Vec<u8>), Error> {
        let decrypt_failed = |e: CryptoError| match e {
            CryptoError::DecryptFailed => {
                Error::protocol(AlertDescription::BadRecordMac, "record authentication failed")
            }
            e => Error::Crypto(e),
        };

        let (content_type, plaintext) = if self.is_tls13() {
            if header.content_type != ContentType::ApplicationData {
                return Err(Error::protocol(
                    AlertDescription::UnexpectedMessage,
                    format!("unprotected {} record", header.content_type),
                ));
            }
            if fragment.len() < self.overhead() {
                return Err(Error::protocol(
                    AlertDescription::BadRecordMac,
                    "record too short",
                ));
            }
            let nonce = self.nonce(&[]);
            let mut buf = fragment.to_vec();
            self.cipher
                .decrypt(&nonce, &header.to_bytes(), &mut buf)
                .map_err(decrypt_failed)?;

            // Strip zero padding, the last non-zero byte is the real type
            let end = buf.iter().rposition(|b| *b != 0).ok_or_else(|| {
                Error::protocol(AlertDescription::UnexpectedMessage, "record has no content type")
            })?;
            let inner = ContentType::from_u8(buf[end]);
            buf.truncate(end);
            (inner, buf)
        } else {
            if fragment.len() < self.overhead() {
                return Err(Error::protocol(
                    AlertDescription::BadRecordMac,
                    "record too short",
                ));
            }
            let (explicit, ciphertext) = fragment.split_at(self.explicit_nonce_len());
            let nonce = self.nonce(explicit);
            let plain_len = ciphertext.len() - self.cipher.tag_len();
            let aad = self.tls12_aad(header.content_type, plain_len);

            let mut buf = ciphertext.to_vec();
            self.cipher
                .decrypt(&nonce, &aad, &mut buf)
                .map_err(decrypt_failed)?;
            (header.content_type, buf)
        };

        if plaintext.len() > max_plaintext {
            return Err(Error::protocol(
                AlertDescription::RecordOverflow,
                format!("plaintext of {} bytes exceeds {}", plaintext.len(), max_plaintext),
            ));
        }
        Ok((content_type, plaintext))
    }

    pub fn commit_read(&mut self) -> Result<(), Error> {
        self.next_seq()
    }
}

impl fmt::Debug for RecordProtection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordProtection")
            .field("version", &self.version)
            .field("cipher", &self.cipher)
            .field("seq", &self.seq)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::rust_crypto;
    use crate::types::CipherSuite;
    use zeroize::Zeroizing;

    fn pair(version: ProtocolVersion) -> (RecordProtection, RecordProtection) {
        let provider = rust_crypto::default_provider();
        let (suite, iv_len) = if version == ProtocolVersion::TLS1_3 {
            (CipherSuite::AES_128_GCM_SHA256, 12)
        } else {
            (CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256, 4)
        };
        let suite = provider.find_suite(suite).unwrap();
        let mk = || {
            RecordProtection::new(
                version,
                suite.create_cipher(&[7u8; 16]).unwrap(),
                Zeroizing::new(vec![9u8; iv_len]),
            )
        };
        (mk(), mk())
    }

    fn header_for(content_type: ContentType, fragment: &[u8]) -> RecordHeader {
        RecordHeader {
            content_type,
            version: RECORD_VERSION,
            length: fragment.len(),
        }
    }

    #[test]
    fn header_needs_five_bytes() {
        assert_eq!(decode_header(&[23, 3, 3, 0], false, false).unwrap(), None);
        let h = decode_header(&[23, 3, 3, 0, 9], false, false)
            .unwrap()
            .unwrap();
        assert_eq!(h.content_type, ContentType::ApplicationData);
        assert_eq!(h.record_len(), 14);
    }

    #[test]
    fn header_rejects_bad_type_and_version() {
        let err = decode_header(&[99, 3, 3, 0, 1], false, false).unwrap_err();
        assert_eq!(err.alert(), Some(AlertDescription::UnexpectedMessage));

        let err = decode_header(&[22, 2, 0, 0, 1], false, false).unwrap_err();
        assert_eq!(err.alert(), Some(AlertDescription::ProtocolVersion));

        let err = decode_header(&[22, 3, 5, 0, 1], false, false).unwrap_err();
        assert_eq!(err.alert(), Some(AlertDescription::ProtocolVersion));
    }

    #[test]
    fn header_length_ceiling() {
        let len = (PACKET_BUFFER_SIZE - HEADER_LEN + 1) as u16;
        let [hi, lo] = len.to_be_bytes();
        let err = decode_header(&[23, 3, 3, hi, lo], false, false).unwrap_err();
        assert_eq!(err.alert(), Some(AlertDescription::RecordOverflow));
        assert!(decode_header(&[23, 3, 3, hi, lo], true, false)
            .unwrap()
            .is_some());
    }

    #[test]
    fn sslv2_hello_detected_from_three_bytes() {
        assert_eq!(decode_header(&[0x80, 0x2e], false, true).unwrap(), None);
        let err = decode_header(&[0x80, 0x2e, 1], false, true).unwrap_err();
        assert_eq!(err.alert(), Some(AlertDescription::HandshakeFailure));
        let err = decode_header(&[0x80, 0x2e, 4], false, true).unwrap_err();
        assert_eq!(err.alert(), Some(AlertDescription::UnexpectedMessage));

        // Not looked for once the first hello has been seen
        let err = decode_header(&[0x80, 0x2e, 1, 3, 1], false, false).unwrap_err();
        assert_eq!(err.alert(), Some(AlertDescription::UnexpectedMessage));
    }

    #[test]
    fn encode_exact_fit() {
        let mut dst = ByteBuf::allocate(8);
        assert!(!encode_record(ContentType::Alert, &[1, 2, 3, 4], &mut dst));
        assert_eq!(dst.position(), 0);
        assert!(encode_record(ContentType::Alert, &[1, 2, 3], &mut dst));
        assert_eq!(dst.position(), 8);
    }

    #[test]
    fn tls12_seal_open() {
        let (mut w, mut r) = pair(ProtocolVersion::TLS1_2);
        for msg in [&b"first"[..], b"second"] {
            let (ct, fragment) = w.seal(ContentType::ApplicationData, msg).unwrap();
            assert_eq!(ct, ContentType::ApplicationData);
            assert_eq!(fragment.len(), msg.len() + w.overhead());
            let (ct, plain) = r
                .open(&header_for(ct, &fragment), &fragment, MAX_FRAGMENT_LEN)
                .unwrap();
            assert_eq!(ct, ContentType::ApplicationData);
            assert_eq!(plain, msg);
            r.commit_read().unwrap();
        }
    }

    #[test]
    fn tls12_chacha_has_no_explicit_nonce() {
        let provider = rust_crypto::default_provider();
        let suite = provider
            .find_suite(CipherSuite::ECDHE_ECDSA_CHACHA20_POLY1305_SHA256)
            .unwrap();
        let mk = || {
            RecordProtection::new(
                ProtocolVersion::TLS1_2,
                suite.create_cipher(&[7u8; 32]).unwrap(),
                Zeroizing::new(vec![9u8; 12]),
            )
        };
        let (mut w, mut r) = (mk(), mk());
        assert_eq!(w.overhead(), 16);

        for msg in [&b"first"[..], b"second"] {
            let (ct, fragment) = w.seal(ContentType::Alert, msg).unwrap();
            assert_eq!(ct, ContentType::Alert);
            assert_eq!(fragment.len(), msg.len() + 16);
            let (ct, plain) = r
                .open(&header_for(ct, &fragment), &fragment, MAX_FRAGMENT_LEN)
                .unwrap();
            assert_eq!(ct, ContentType::Alert);
            assert_eq!(plain, msg);
            r.commit_read().unwrap();
        }
    }

    #[test]
    fn tls13_hides_content_type() {
        let (mut w, r) = pair(ProtocolVersion::TLS1_3);
        let (ct, fragment) = w.seal(ContentType::Handshake, b"hello").unwrap();
        assert_eq!(ct, ContentType::ApplicationData);
        let (inner, plain) = r
            .open(&header_for(ct, &fragment), &fragment, MAX_FRAGMENT_LEN)
            .unwrap();
        assert_eq!(inner, ContentType::Handshake);
        assert_eq!(plain, b"hello");
    }

    #[test]
    fn uncommitted_open_can_be_retried() {
        let (mut w, mut r) = pair(ProtocolVersion::TLS1_3);
        let (ct, fragment) = w.seal(ContentType::ApplicationData, b"abc").unwrap();
        let header = header_for(ct, &fragment);
        assert!(r.open(&header, &fragment, MAX_FRAGMENT_LEN).is_ok());
        assert!(r.open(&header, &fragment, MAX_FRAGMENT_LEN).is_ok());
        r.commit_read().unwrap();
        let err = r.open(&header, &fragment, MAX_FRAGMENT_LEN).unwrap_err();
        assert_eq!(err.alert(), Some(AlertDescription::BadRecordMac));
    }

    #[test]
    fn tampered_record_is_bad_record_mac() {
        let (mut w, r) = pair(ProtocolVersion::TLS1_2);
        let (ct, mut fragment) = w.seal(ContentType::ApplicationData, b"abc").unwrap();
        let last = fragment.len() - 1;
        fragment[last] ^= 1;
        let err = r
            .open(&header_for(ct, &fragment), &fragment, MAX_FRAGMENT_LEN)
            .unwrap_err();
        assert_eq!(err.alert(), Some(AlertDescription::BadRecordMac));
    }

    #[test]
    fn oversized_plaintext_is_record_overflow() {
        let (mut w, r) = pair(ProtocolVersion::TLS1_3);
        let big = vec![1u8; 100];
        let (ct, fragment) = w.seal(ContentType::ApplicationData, &big).unwrap();
        let err = r.open(&header_for(ct, &fragment), &fragment, 99).unwrap_err();
        assert_eq!(err.alert(), Some(AlertDescription::RecordOverflow));
    }
}
