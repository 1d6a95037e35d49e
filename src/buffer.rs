//! Caller-owned byte buffers with position, limit and capacity.
//!
//! [`ByteBuf`] is the currency of [`Engine::wrap`](crate::Engine::wrap) and
//! [`Engine::unwrap`](crate::Engine::unwrap). The engine reads from
//! `position..limit` of a source and writes into `position..limit` of a
//! destination, and only ever moves positions forward. Flipping, compacting
//! and clearing between calls is the caller's job.

use std::fmt;

/// Fixed-capacity byte buffer.
///
/// Invariant: `position <= limit <= capacity`.
#[derive(Clone, PartialEq, Eq)]
pub struct ByteBuf {
    data: Vec<u8>,
    position: usize,
    limit: usize,
    read_only: bool,
}

impl ByteBuf {
    /// Create a zero-filled buffer ready for writing.
    pub fn allocate(capacity: usize) -> Self {
        ByteBuf {
            data: vec![0; capacity],
            position: 0,
            limit: capacity,
            read_only: false,
        }
    }

    /// Wrap existing bytes, ready for reading.
    ///
    /// Capacity and limit are both `data.len()`.
    pub fn wrap(data: Vec<u8>) -> Self {
        let limit = data.len();
        ByteBuf {
            data,
            position: 0,
            limit,
            read_only: false,
        }
    }

    /// Read-only copy of this buffer with the same position and limit.
    pub fn as_read_only(&self) -> ByteBuf {
        ByteBuf {
            data: self.data.clone(),
            position: self.position,
            limit: self.limit,
            read_only: true,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// Move the position.
    ///
    /// Panics if `position > limit`.
    pub fn set_position(&mut self, position: usize) {
        assert!(position <= self.limit, "position beyond limit");
        self.position = position;
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Move the limit, pulling the position back if needed.
    ///
    /// Panics if `limit > capacity`.
    pub fn set_limit(&mut self, limit: usize) {
        assert!(limit <= self.data.len(), "limit beyond capacity");
        self.limit = limit;
        if self.position > limit {
            self.position = limit;
        }
    }

    pub fn remaining(&self) -> usize {
        self.limit - self.position
    }

    pub fn has_remaining(&self) -> bool {
        self.position < self.limit
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Switch from writing to reading: limit becomes position, position zero.
    pub fn flip(&mut self) {
        self.limit = self.position;
        self.position = 0;
    }

    /// Forget the contents: position zero, limit capacity.
    pub fn clear(&mut self) {
        self.position = 0;
        self.limit = self.data.len();
    }

    /// Rewind the position to zero, keeping the limit.
    pub fn rewind(&mut self) {
        self.position = 0;
    }

    /// Move the unread bytes to the front and get ready to append after them.
    pub fn compact(&mut self) {
        let remaining = self.remaining();
        self.data.copy_within(self.position..self.limit, 0);
        self.position = remaining;
        self.limit = self.data.len();
    }

    /// Bytes between position and limit.
    pub fn remaining_slice(&self) -> &[u8] {
        &self.data[self.position..self.limit]
    }

    /// Skip `n` bytes.
    ///
    /// Panics if fewer than `n` bytes remain.
    pub fn advance(&mut self, n: usize) {
        assert!(n <= self.remaining(), "advance beyond limit");
        self.position += n;
    }

    /// Copy `src` in at the position and advance past it.
    ///
    /// Panics if the buffer is read-only or too small.
    pub fn put_slice(&mut self, src: &[u8]) {
        assert!(!self.read_only, "put into read-only buffer");
        assert!(src.len() <= self.remaining(), "put beyond limit");
        let end = self.position + src.len();
        self.data[self.position..end].copy_from_slice(src);
        self.position = end;
    }

    /// Copy up to `dst.len()` bytes out, returning how many were copied.
    pub fn get_slice(&mut self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.remaining());
        dst[..n].copy_from_slice(&self.data[self.position..self.position + n]);
        self.position += n;
        n
    }

    /// Everything up to the limit, regardless of position.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.limit]
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

impl From<&[u8]> for ByteBuf {
    fn from(value: &[u8]) -> Self {
        ByteBuf::wrap(value.to_vec())
    }
}

impl fmt::Debug for ByteBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteBuf")
            .field("position", &self.position)
            .field("limit", &self.limit)
            .field("capacity", &self.data.len())
            .field("read_only", &self.read_only)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_flip_read() {
        let mut buf = ByteBuf::allocate(8);
        buf.put_slice(b"abc");
        assert_eq!(buf.position(), 3);
        buf.flip();
        assert_eq!(buf.remaining_slice(), b"abc");

        let mut out = [0u8; 2];
        assert_eq!(buf.get_slice(&mut out), 2);
        assert_eq!(&out, b"ab");
        assert_eq!(buf.remaining(), 1);
    }

    #[test]
    fn compact_moves_unread_to_front() {
        let mut buf = ByteBuf::wrap(b"hello".to_vec());
        buf.advance(3);
        buf.compact();
        assert_eq!(buf.position(), 2);
        assert_eq!(buf.limit(), 5);
        buf.flip();
        assert_eq!(buf.remaining_slice(), b"lo");
    }

    #[test]
    fn set_limit_clamps_position() {
        let mut buf = ByteBuf::allocate(10);
        buf.set_position(8);
        buf.set_limit(4);
        assert_eq!(buf.position(), 4);
        assert!(!buf.has_remaining());
    }

    #[test]
    #[should_panic(expected = "read-only")]
    fn read_only_rejects_put() {
        let buf = ByteBuf::allocate(4);
        buf.as_read_only().put_slice(b"x");
    }
}
