use bytes::BytesMut;
use std::sync::Mutex;

// Buffers kept on the shelf beyond this are dropped instead of returned,
// so a burst of connections doesn't pin memory forever.
const MAX_POOLED: usize = 64;

/// Process-wide shelf of reusable byte buffers.
///
/// Whoever takes a buffer out is responsible for either handing it back with
/// [`put`](BufferPool::put) or transferring it to a component that will.
/// Losing one is a leak, not a correctness problem, and a `take` on an empty
/// shelf simply allocates.
pub struct BufferPool {
    shelf: Mutex<Vec<BytesMut>>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self {
            shelf: Mutex::new(Vec::new()),
        }
    }

    /// Hand out a cleared buffer with at least `min_capacity` bytes of room.
    pub fn take(&self, min_capacity: usize) -> BytesMut {
        let mut shelf = self.shelf.lock().unwrap();
        if let Some(pos) = shelf.iter().position(|b| b.capacity() >= min_capacity) {
            return shelf.swap_remove(pos);
        }
        drop(shelf);
        BytesMut::with_capacity(min_capacity)
    }

    /// Return a buffer to the shelf. Contents are discarded.
    pub fn put(&self, mut buf: BytesMut) {
        buf.clear();
        let mut shelf = self.shelf.lock().unwrap();
        if shelf.len() < MAX_POOLED {
            shelf.push(buf);
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_allocates_at_least_requested() {
        let pool = BufferPool::new();
        let buf = pool.take(4096);
        assert!(buf.capacity() >= 4096);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_put_then_take_reuses() {
        let pool = BufferPool::new();
        let mut buf = pool.take(128);
        buf.extend_from_slice(b"leftover");
        let ptr = buf.as_ptr();
        pool.put(buf);

        let again = pool.take(64);
        assert_eq!(again.as_ptr(), ptr);
        assert!(again.is_empty());
    }

    #[test]
    fn test_take_skips_undersized_buffers() {
        let pool = BufferPool::new();
        pool.put(BytesMut::with_capacity(16));
        let buf = pool.take(1024);
        assert!(buf.capacity() >= 1024);
    }
}
