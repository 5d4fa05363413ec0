use crate::pool::BufferPool;
use bytes::{Buf, BytesMut};

/// Fixed-capacity receive window over one pooled buffer.
///
/// Bytes `[0, len)` are committed, unread data; the spare room up to the
/// window capacity is where the next socket read lands. Consuming from the
/// front compacts the remainder back to the start, so the unread tail is
/// always the prefix of the next read's view.
pub struct RecvBuffer {
    buf: BytesMut,
    cap: usize,
}

impl RecvBuffer {
    pub fn new(pool: &BufferPool, cap: usize) -> Self {
        Self {
            buf: pool.take(cap),
            cap,
        }
    }

    pub fn filled(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.buf.len() >= self.cap
    }

    /// Room left for the next read.
    pub fn spare(&self) -> usize {
        self.cap - self.buf.len()
    }

    /// Drop the first `n` committed bytes and move the rest to the front.
    pub fn consume(&mut self, n: usize) {
        self.buf.advance(n);
        let len = self.buf.len();
        // reserve reclaims the advanced head of a uniquely owned BytesMut,
        // which is exactly the compact-unread-to-front we need
        self.buf.reserve(self.cap - len);
    }

    pub(crate) fn read_target(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    pub(crate) fn into_inner(self) -> BytesMut {
        self.buf
    }
}
