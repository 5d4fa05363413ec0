use crate::frame::OpCode;
use crate::utils::xor_mask;
use bytes::{BufMut, BytesMut};

/// Bytes of frame header in front of a payload of `payload_len` bytes.
///
/// According to the WebSockets RFC, a payload length up to 125 is carried in
/// the second header byte, up to 65535 in two extra big-endian bytes, and
/// anything larger in eight. A masking key adds four more.
pub fn header_size(payload_len: usize, masked: bool) -> usize {
    let base = if payload_len <= 125 {
        2
    } else if payload_len <= 65535 {
        4
    } else {
        10
    };
    base + if masked { 4 } else { 0 }
}

/// Total buffer capacity a frame for `payload_len` bytes needs.
pub fn frame_capacity(payload_len: usize, masked: bool) -> usize {
    header_size(payload_len, masked) + payload_len
}

/// Append the header for a frame carrying `payload_len` payload bytes.
/// The caller appends the payload itself afterwards, and calls
/// [`mask_payload`] when a masking key was set. The broker is the server
/// half of the upstream link, so its own frames always go out unmasked.
pub fn write_header(
    dst: &mut BytesMut,
    final_fragment: bool,
    opcode: OpCode,
    mask: Option<[u8; 4]>,
    payload_len: usize,
) {
    let first_byte = (final_fragment as u8) << 7 | opcode.as_u8();
    dst.put_u8(first_byte);

    let mask_bit = if mask.is_some() { 0b1000_0000 } else { 0 };
    if payload_len <= 125 {
        dst.put_u8(mask_bit | payload_len as u8);
    } else if payload_len <= 65535 {
        dst.put_u8(mask_bit | 126);
        dst.put_u16(payload_len as u16);
    } else {
        dst.put_u8(mask_bit | 127);
        dst.put_u64(payload_len as u64);
    }

    if let Some(mask) = mask {
        dst.put_slice(&mask);
    }
}

/// Mask the payload region of a fully written frame in place. XOR is its
/// own inverse, so this is the same transform the decoder applies.
pub fn mask_payload(frame: &mut [u8], mask: [u8; 4], header_len: usize) {
    xor_mask(&mut frame[header_len..], mask, 0);
}
