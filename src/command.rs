use crate::error::Error;
use bytes::{BufMut, BytesMut};

/// Length prefixes on the wire are 16-bit, which caps every Hello name and
/// Send body.
pub const MAX_BODY: usize = u16::MAX as usize;

const OP_HELLO: u8 = 0x00;
const OP_GOODBYE: u8 = 0x01;
const OP_SEND: u8 = 0x02;

/// Broker commands exchanged with the upstream inside WebSocket Binary
/// frames. All integers are little-endian; variable parts carry a 16-bit
/// length prefix. Payload slices borrow from the decoded frame.
#[derive(Debug, PartialEq, Eq)]
pub enum Command<'a> {
    Hello { id: i32, name: &'a [u8] },
    Goodbye { id: i32 },
    Send { id: i32, command: &'a [u8] },
}

impl<'a> Command<'a> {
    pub fn encoded_len(&self) -> usize {
        match self {
            Command::Hello { name, .. } => 7 + name.len(),
            Command::Goodbye { .. } => 5,
            Command::Send { command, .. } => 7 + command.len(),
        }
    }

    pub fn encode_into(&self, dst: &mut BytesMut) {
        match self {
            Command::Hello { id, name } => {
                debug_assert!(name.len() <= MAX_BODY);
                dst.put_u8(OP_HELLO);
                dst.put_i32_le(*id);
                dst.put_u16_le(name.len() as u16);
                dst.put_slice(name);
            }
            Command::Goodbye { id } => {
                dst.put_u8(OP_GOODBYE);
                dst.put_i32_le(*id);
            }
            Command::Send { id, command } => {
                debug_assert!(command.len() <= MAX_BODY);
                dst.put_u8(OP_SEND);
                dst.put_i32_le(*id);
                dst.put_u16_le(command.len() as u16);
                dst.put_slice(command);
            }
        }
    }

    pub fn decode(buf: &'a [u8]) -> Result<Self, Error> {
        let (&opcode, rest) = buf.split_first().ok_or(Error::InvalidCommand)?;
        match opcode {
            OP_HELLO => {
                let (id, body) = decode_sized(rest)?;
                Ok(Command::Hello { id, name: body })
            }
            OP_GOODBYE => {
                if rest.len() < 4 {
                    return Err(Error::InvalidCommand);
                }
                let id = i32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]);
                Ok(Command::Goodbye { id })
            }
            OP_SEND => {
                let (id, body) = decode_sized(rest)?;
                Ok(Command::Send { id, command: body })
            }
            _ => Err(Error::InvalidCommand),
        }
    }
}

// Shared layout of Hello and Send after the opcode: id(4 LE), len(2 LE),
// body[len].
fn decode_sized(buf: &[u8]) -> Result<(i32, &[u8]), Error> {
    if buf.len() < 6 {
        return Err(Error::InvalidCommand);
    }
    let id = i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let len = u16::from_le_bytes([buf[4], buf[5]]) as usize;
    if buf.len() < 6 + len {
        return Err(Error::InvalidCommand);
    }
    Ok((id, &buf[6..6 + len]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(command: Command<'_>) {
        let mut buf = BytesMut::with_capacity(command.encoded_len());
        command.encode_into(&mut buf);
        assert_eq!(buf.len(), command.encoded_len());
        assert_eq!(Command::decode(&buf).unwrap(), command);
    }

    #[test]
    fn test_round_trips() {
        round_trip(Command::Hello {
            id: 1,
            name: b"test client",
        });
        round_trip(Command::Hello { id: -7, name: b"" });
        round_trip(Command::Goodbye { id: 42 });
        round_trip(Command::Send {
            id: 1,
            command: b"message 1\n",
        });
    }

    #[test]
    fn test_hello_wire_layout() {
        let mut buf = BytesMut::new();
        Command::Hello { id: 1, name: b"ab" }.encode_into(&mut buf);
        assert_eq!(&buf[..], &[0x00, 1, 0, 0, 0, 2, 0, b'a', b'b']);
    }

    #[test]
    fn test_goodbye_wire_layout() {
        let mut buf = BytesMut::new();
        Command::Goodbye { id: 0x01020304 }.encode_into(&mut buf);
        assert_eq!(&buf[..], &[0x01, 0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn test_short_buffers_rejected() {
        let mut buf = BytesMut::new();
        Command::Send {
            id: 9,
            command: b"payload",
        }
        .encode_into(&mut buf);
        for cut in 0..buf.len() {
            assert!(
                Command::decode(&buf[..cut]).is_err(),
                "decode succeeded on {} of {} bytes",
                cut,
                buf.len()
            );
        }
    }

    #[test]
    fn test_unknown_opcode_rejected() {
        assert!(matches!(
            Command::decode(&[0x03, 0, 0, 0, 0]),
            Err(Error::InvalidCommand)
        ));
    }

    #[test]
    fn test_declared_length_beyond_buffer_rejected() {
        // Send claiming 5 body bytes but carrying 4
        let buf = [0x02, 1, 0, 0, 0, 5, 0, b'a', b'b', b'c', b'd'];
        assert!(Command::decode(&buf).is_err());
    }
}
