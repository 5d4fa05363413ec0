use crate::buffer::RecvBuffer;
use crate::error::Error;
use crate::event::Event;
use crate::handler::{Ctx, Handler};
use crate::pool::BufferPool;
use crate::upstream::UpstreamHandler;
use crate::utils::generate_websocket_accept_value;
use bytes::BytesMut;
use log::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    ReadRequestLine,
    ReadHeaders,
    SentResponse { upgraded: bool },
    Done,
}

/// Progressive validator for the HTTP/1.1 upgrade request on the upstream
/// socket.
///
/// Each complete line is checked as it arrives; the first offense decides
/// the status code of the rejection. A successful request gets the 101
/// response, and once that response is fully on the wire the handler swaps
/// itself out for the WebSocket handler, handing over any bytes the peer
/// pipelined behind the blank line.
pub struct HandshakeHandler {
    state: State,
    buf: RecvBuffer,
    host_seen: bool,
    upgrade_seen: bool,
    connection_seen: bool,
    version_seen: bool,
    key: Option<Vec<u8>>,
}

impl HandshakeHandler {
    pub fn new(pool: &BufferPool, line_capacity: usize) -> Self {
        Self {
            state: State::ReadRequestLine,
            buf: RecvBuffer::new(pool, line_capacity),
            host_seen: false,
            upgrade_seen: false,
            connection_seen: false,
            version_seen: false,
            key: None,
        }
    }

    pub(crate) fn on_connected(&mut self, ctx: &mut Ctx) -> Result<(), Error> {
        ctx.arm_read();
        Ok(())
    }

    pub(crate) fn on_receive(&mut self, ctx: &mut Ctx) -> Result<(), Error> {
        while matches!(self.state, State::ReadRequestLine | State::ReadHeaders) {
            let Some(newline) = self.buf.filled().iter().position(|&b| b == b'\n') else {
                if self.buf.is_full() {
                    // a whole receive window without a newline
                    self.reject(ctx, 400, "Bad Request");
                    return Ok(());
                }
                ctx.arm_read();
                return Ok(());
            };

            let mut line = self.buf.filled()[..newline].to_vec();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            self.buf.consume(newline + 1);

            match self.state {
                State::ReadRequestLine => self.request_line(ctx, &line),
                State::ReadHeaders => self.header_line(ctx, &line),
                _ => {}
            }
        }
        Ok(())
    }

    pub(crate) fn on_send(&mut self, ctx: &mut Ctx) -> Result<(), Error> {
        if let State::SentResponse { upgraded: true } = self.state {
            self.state = State::Done;
            // hand over whatever the peer already sent past the handshake
            let residual = if self.buf.is_empty() {
                None
            } else {
                let mut copy = ctx.pool().take(self.buf.len());
                copy.extend_from_slice(self.buf.filled());
                Some(copy)
            };
            ctx.replace_handler(Handler::Upstream(UpstreamHandler::new(ctx.pool(), residual)));
        }
        Ok(())
    }

    pub(crate) fn on_close(&mut self, ctx: &mut Ctx) {
        // any exit before the swap means the upstream slot opens up again
        ctx.post(Event::UpstreamDisconnected);
    }

    pub(crate) fn read_slot(&mut self) -> (&mut BytesMut, usize) {
        let spare = self.buf.spare();
        (self.buf.read_target(), spare)
    }

    pub(crate) fn reclaim(self, pool: &BufferPool) {
        pool.put(self.buf.into_inner());
    }

    fn request_line(&mut self, ctx: &mut Ctx, line: &[u8]) {
        let mut parts = line.split(|&b| b == b' ');
        let (method, path, version) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(m), Some(p), Some(v), None) => (m, p, v),
            _ => return self.reject(ctx, 400, "Bad Request"),
        };
        if method != b"GET" {
            return self.reject(ctx, 405, "Method Not Allowed");
        }
        if path != b"/" {
            return self.reject(ctx, 404, "Not Found");
        }
        if version != b"HTTP/1.1" {
            return self.reject(ctx, 400, "Bad Request");
        }
        self.state = State::ReadHeaders;
    }

    fn header_line(&mut self, ctx: &mut Ctx, line: &[u8]) {
        if line.is_empty() {
            return self.finish(ctx);
        }
        if line[0] == b' ' || line[0] == b'\t' {
            return self.reject(ctx, 501, "Not Implemented");
        }
        let Some(colon) = line.iter().position(|&b| b == b':') else {
            return self.reject(ctx, 400, "Bad Request");
        };
        let name = trim(&line[..colon]);
        let value = trim(&line[colon + 1..]);

        // Duplicates of a recognized header are silently ignored, first one
        // wins; unrecognized headers are ignored outright.
        if name.eq_ignore_ascii_case(b"host") {
            self.host_seen = true;
        } else if name.eq_ignore_ascii_case(b"upgrade") {
            if !self.upgrade_seen {
                self.upgrade_seen = true;
                if !contains_token(value, b"websocket") {
                    return self.reject(ctx, 400, "Bad Request");
                }
            }
        } else if name.eq_ignore_ascii_case(b"connection") {
            if !self.connection_seen {
                self.connection_seen = true;
                if !contains_token(value, b"upgrade") {
                    return self.reject(ctx, 400, "Bad Request");
                }
            }
        } else if name.eq_ignore_ascii_case(b"sec-websocket-key") {
            if self.key.is_none() {
                self.key = Some(value.to_vec());
            }
        } else if name.eq_ignore_ascii_case(b"sec-websocket-version") {
            if !self.version_seen {
                self.version_seen = true;
                if value != b"13" {
                    return self.reject(ctx, 400, "Bad Request");
                }
            }
        }
    }

    fn finish(&mut self, ctx: &mut Ctx) {
        let all_present = self.host_seen
            && self.upgrade_seen
            && self.connection_seen
            && self.version_seen
            && self.key.is_some();
        if !all_present {
            return self.reject(ctx, 400, "Bad Request");
        }
        let key = self.key.take().unwrap_or_default();

        let accept = generate_websocket_accept_value(&key);
        let response = format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {}\r\n\
             \r\n",
            accept
        );
        let mut buf = ctx.pool().take(response.len());
        buf.extend_from_slice(response.as_bytes());
        ctx.send(buf);
        self.state = State::SentResponse { upgraded: true };
        info!("upstream handshake complete for {}", ctx.handle().peer());
    }

    fn reject(&mut self, ctx: &mut Ctx, code: u16, reason: &'static str) {
        debug!(
            "rejecting upstream handshake from {}: {}",
            ctx.handle().peer(),
            Error::HandshakeRejected { code, reason }
        );
        // error replies carry the status line only, no body
        let response = format!("HTTP/1.1 {} {}\r\n", code, reason);
        let mut buf = ctx.pool().take(response.len());
        buf.extend_from_slice(response.as_bytes());
        ctx.send(buf);
        ctx.close_after_flush();
        self.state = State::SentResponse { upgraded: false };
    }
}

fn trim(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &bytes[start..end]
}

// Comma-separated token list match: tokens are trimmed, compared without
// case, and a token with embedded whitespace matches nothing.
fn contains_token(value: &[u8], token: &[u8]) -> bool {
    value.split(|&b| b == b',').any(|part| {
        let part = trim(part);
        !part.iter().any(|b| b.is_ascii_whitespace()) && part.eq_ignore_ascii_case(token)
    })
}
