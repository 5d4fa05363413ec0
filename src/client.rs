use crate::buffer::RecvBuffer;
use crate::error::Error;
use crate::event::Event;
use crate::handler::Ctx;
use crate::pool::BufferPool;
use bytes::BytesMut;
use log::{debug, info};

/// The receive window matches the largest body a Send command can carry,
/// since its length field on the wire is 16 bits. A client name is capped
/// by the same window.
pub const RECV_CAPACITY: usize = u16::MAX as usize;

const HELLO: &[u8] = b"HELLO\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitHello,
    AwaitIntro,
    Forward,
}

/// Per-connection state machine for the tabserver line protocol.
///
/// A client opens with `HELLO\n<name>\n`; everything after the name's
/// newline is forwarded upstream verbatim, chunked however the socket
/// delivered it. Anything that isn't that opening sequence closes the
/// connection.
pub struct ClientHandler {
    state: State,
    buf: RecvBuffer,
}

impl ClientHandler {
    pub fn new(pool: &BufferPool) -> Self {
        Self {
            state: State::AwaitHello,
            buf: RecvBuffer::new(pool, RECV_CAPACITY),
        }
    }

    pub(crate) fn on_connected(&mut self, ctx: &mut Ctx) -> Result<(), Error> {
        debug!("client connected from {}", ctx.handle().peer());
        ctx.arm_read();
        Ok(())
    }

    pub(crate) fn on_receive(&mut self, ctx: &mut Ctx) -> Result<(), Error> {
        loop {
            match self.state {
                State::AwaitHello => {
                    if self.buf.len() < HELLO.len() {
                        break;
                    }
                    if &self.buf.filled()[..HELLO.len()] != HELLO {
                        info!("client {} did not say HELLO", ctx.handle().peer());
                        return Err(Error::InvalidHello);
                    }
                    self.buf.consume(HELLO.len());
                    self.state = State::AwaitIntro;
                }
                State::AwaitIntro => {
                    let Some(newline) = self.buf.filled().iter().position(|&b| b == b'\n') else {
                        break;
                    };
                    let name = self.buf.filled()[..newline].to_vec();
                    self.buf.consume(newline + 1);
                    info!(
                        "client {} introduced itself as {:?}",
                        ctx.handle().peer(),
                        String::from_utf8_lossy(&name)
                    );
                    ctx.post(Event::ClientConnected {
                        conn: ctx.handle().clone(),
                        name,
                    });
                    self.state = State::Forward;
                }
                State::Forward => {
                    // relay whatever arrived, as it arrived; line boundaries
                    // are the upstream's business
                    if !self.buf.is_empty() {
                        let chunk = self.buf.filled();
                        let mut payload = ctx.pool().take(chunk.len());
                        payload.extend_from_slice(chunk);
                        self.buf.consume(self.buf.len());
                        ctx.post(Event::ForwardToUpstream {
                            token: ctx.handle().token(),
                            payload,
                        });
                    }
                    break;
                }
            }
        }

        if self.state != State::Forward && self.buf.is_full() {
            // the HELLO sequence does not fit the window
            info!("client {} overran the HELLO window", ctx.handle().peer());
            return Err(Error::HelloTooLong);
        }
        ctx.arm_read();
        Ok(())
    }

    pub(crate) fn on_close(&mut self, ctx: &mut Ctx) {
        if self.state == State::Forward {
            ctx.post(Event::ClientDisconnected {
                token: ctx.handle().token(),
            });
        }
    }

    pub(crate) fn read_slot(&mut self) -> (&mut BytesMut, usize) {
        let spare = self.buf.spare();
        (self.buf.read_target(), spare)
    }

    pub(crate) fn reclaim(self, pool: &BufferPool) {
        pool.put(self.buf.into_inner());
    }
}
