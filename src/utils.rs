use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use sha1::{Digest, Sha1};

pub(crate) const UUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

pub(crate) fn generate_websocket_accept_value(key: &[u8]) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key);
    sha1.update(UUID.as_bytes());
    BASE64_STANDARD.encode(sha1.finalize())
}

/// XOR `buf` against the 4-byte masking key, where `buf[0]` sits `offset`
/// bytes into the frame payload. Continuation segments of a payload resume
/// mid-key, so the key is rotated to the right phase up front and the bulk
/// of the work happens a word at a time.
pub(crate) fn xor_mask(buf: &mut [u8], mask: [u8; 4], offset: usize) {
    let rot = offset % 4;
    let key = [
        mask[rot],
        mask[(rot + 1) % 4],
        mask[(rot + 2) % 4],
        mask[(rot + 3) % 4],
    ];
    let word = u64::from_ne_bytes([
        key[0], key[1], key[2], key[3], key[0], key[1], key[2], key[3],
    ]);

    let mut chunks = buf.chunks_exact_mut(8);
    for chunk in &mut chunks {
        let v = u64::from_ne_bytes([
            chunk[0], chunk[1], chunk[2], chunk[3], chunk[4], chunk[5], chunk[6], chunk[7],
        ]) ^ word;
        chunk.copy_from_slice(&v.to_ne_bytes());
    }
    for (i, byte) in chunks.into_remainder().iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference_mask(buf: &mut [u8], mask: [u8; 4], offset: usize) {
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte ^= mask[(offset + i) % 4];
        }
    }

    #[test]
    fn test_xor_mask_matches_reference() {
        let mask = [0x11, 0x22, 0x33, 0x44];
        for offset in 0..8 {
            for len in [0usize, 1, 3, 4, 7, 8, 9, 31, 64, 100] {
                let original: Vec<u8> = (0..len as u8).collect();
                let mut fast = original.clone();
                let mut slow = original.clone();
                xor_mask(&mut fast, mask, offset);
                reference_mask(&mut slow, mask, offset);
                assert_eq!(fast, slow, "offset {} len {}", offset, len);
            }
        }
    }

    #[test]
    fn test_xor_mask_round_trips() {
        let mask = [9, 8, 7, 6];
        let original: Vec<u8> = (0..200).collect();
        let mut data = original.clone();
        xor_mask(&mut data, mask, 3);
        xor_mask(&mut data, mask, 3);
        assert_eq!(data, original);
    }

    #[test]
    fn test_accept_value() {
        // The sample key from RFC 6455 section 1.3.
        let accept = generate_websocket_accept_value(b"dGhlIHNhbXBsZSBub25jZQ==");
        assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }
}
