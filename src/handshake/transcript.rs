use crate::crypto::CryptoContext;
use crate::types::HashAlgorithm;

/// Handshake messages of the current handshake, header included.
///
/// The hash is only known after the ServerHello, and TLS 1.2 client
/// certificate signatures cover the raw messages, so the bytes are kept
/// rather than a running hash.
#[derive(Debug, Default)]
pub(crate) struct Transcript {
    data: Vec<u8>,
}

impl Transcript {
    pub fn add(&mut self, message: &[u8]) {
        self.data.extend_from_slice(message);
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn hash(&self, ctx: &CryptoContext, alg: HashAlgorithm) -> Vec<u8> {
        ctx.hash(alg, &self.data)
    }
}
