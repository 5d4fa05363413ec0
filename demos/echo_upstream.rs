//! Reference upstream peer for poking at a running broker.
//!
//! Connects to the broker's upstream port, performs the HTTP upgrade, then
//! echoes every Send command straight back to the client it came from,
//! logging Hello and Goodbye traffic along the way.
//!
//! Usage: `cargo run --example echo_upstream -- 127.0.0.1:7001`

use bytes::BytesMut;
use std::env;
use std::io::{Error, ErrorKind};
use std::time::{SystemTime, UNIX_EPOCH};
use tab_broker::command::Command;
use tab_broker::encoder::{frame_capacity, mask_payload, write_header};
use tab_broker::frame::OpCode;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

// This side of the link is the WebSocket client, so everything it sends
// must be masked. The key doesn't need to be unpredictable here.
const MASK: [u8; 4] = [0x5A, 0xA5, 0x3C, 0xC3];

fn handshake_key() -> String {
    use base64::prelude::*;
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let mut seed = [0u8; 16];
    seed.copy_from_slice(&nanos.to_le_bytes());
    BASE64_STANDARD.encode(seed)
}

async fn send_command(stream: &mut TcpStream, command: &Command<'_>) -> Result<(), Error> {
    let len = command.encoded_len();
    let mut buf = BytesMut::with_capacity(frame_capacity(len, true));
    write_header(&mut buf, true, OpCode::Binary, Some(MASK), len);
    let header = buf.len();
    command.encode_into(&mut buf);
    mask_payload(&mut buf, MASK, header);
    stream.write_all(&buf).await
}

async fn send_control(stream: &mut TcpStream, opcode: OpCode, payload: &[u8]) -> Result<(), Error> {
    let mut buf = BytesMut::with_capacity(frame_capacity(payload.len(), true));
    write_header(&mut buf, true, opcode, Some(MASK), payload.len());
    let header = buf.len();
    buf.extend_from_slice(payload);
    mask_payload(&mut buf, MASK, header);
    stream.write_all(&buf).await
}

/// One unmasked frame off the wire; the broker is the server half of the
/// link, so its frames never carry a mask.
async fn read_frame(stream: &mut TcpStream) -> Result<(u8, Vec<u8>), Error> {
    let mut head = [0u8; 2];
    stream.read_exact(&mut head).await?;
    if head[1] & 0x80 != 0 {
        return Err(Error::new(ErrorKind::InvalidData, "masked frame from broker"));
    }
    let mut len = (head[1] & 0x7F) as usize;
    if len == 126 {
        let mut ext = [0u8; 2];
        stream.read_exact(&mut ext).await?;
        len = u16::from_be_bytes(ext) as usize;
    } else if len == 127 {
        let mut ext = [0u8; 8];
        stream.read_exact(&mut ext).await?;
        len = u64::from_be_bytes(ext) as usize;
    }
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;
    Ok((head[0], payload))
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let addr = env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:7001".to_string());
    let mut stream = TcpStream::connect(&addr).await?;

    let request = format!(
        "GET / HTTP/1.1\r\n\
         Host: {}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         \r\n",
        addr,
        handshake_key()
    );
    stream.write_all(request.as_bytes()).await?;

    let mut response = Vec::new();
    let mut byte = [0u8; 1];
    while !response.ends_with(b"\r\n\r\n") {
        stream.read_exact(&mut byte).await?;
        response.push(byte[0]);
        if response.len() > 8192 {
            return Err(Error::new(ErrorKind::InvalidData, "oversized upgrade response"));
        }
    }
    if !response.starts_with(b"HTTP/1.1 101") {
        return Err(Error::new(ErrorKind::InvalidData, "upgrade refused"));
    }
    println!("upgraded, echoing commands from {}", addr);

    loop {
        let (first, payload) = read_frame(&mut stream).await?;
        match first & 0x0F {
            0x2 => match Command::decode(&payload) {
                Ok(Command::Hello { id, name }) => {
                    println!("hello from {} ({})", id, String::from_utf8_lossy(name));
                }
                Ok(Command::Goodbye { id }) => {
                    println!("goodbye from {}", id);
                }
                Ok(Command::Send { id, command }) => {
                    send_command(&mut stream, &Command::Send { id, command }).await?;
                }
                Err(err) => {
                    eprintln!("undecodable command: {}", err);
                }
            },
            0x9 => send_control(&mut stream, OpCode::Pong, &payload).await?,
            0x8 => {
                send_control(&mut stream, OpCode::Close, b"").await?;
                break;
            }
            _ => {}
        }
    }
    Ok(())
}
