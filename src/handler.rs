use crate::client::ClientHandler;
use crate::error::Error;
use crate::event::Event;
use crate::handshake::HandshakeHandler;
use crate::pool::BufferPool;
use crate::reactor::ConnHandle;
use crate::upstream::UpstreamHandler;
use bytes::BytesMut;
use std::sync::Arc;

/// The protocol state machine attached to one connection.
///
/// The reactor owns exactly one of these per socket and dispatches I/O
/// completions to the active variant. The handshake handler swaps itself
/// out for the upstream handler in place once the 101 response is on the
/// wire.
pub enum Handler {
    Handshake(HandshakeHandler),
    Upstream(UpstreamHandler),
    Client(ClientHandler),
}

impl Handler {
    pub(crate) fn on_connected(&mut self, ctx: &mut Ctx) -> Result<(), Error> {
        match self {
            Handler::Handshake(h) => h.on_connected(ctx),
            Handler::Upstream(h) => h.on_connected(ctx),
            Handler::Client(h) => h.on_connected(ctx),
        }
    }

    pub(crate) fn on_receive(&mut self, ctx: &mut Ctx) -> Result<(), Error> {
        match self {
            Handler::Handshake(h) => h.on_receive(ctx),
            Handler::Upstream(h) => h.on_receive(ctx),
            Handler::Client(h) => h.on_receive(ctx),
        }
    }

    pub(crate) fn on_send(&mut self, ctx: &mut Ctx) -> Result<(), Error> {
        match self {
            Handler::Handshake(h) => h.on_send(ctx),
            // the reactor already returns completed buffers to the pool;
            // the data handlers have nothing more to do per send
            Handler::Upstream(_) | Handler::Client(_) => Ok(()),
        }
    }

    pub(crate) fn on_close(&mut self, ctx: &mut Ctx) {
        match self {
            Handler::Handshake(h) => h.on_close(ctx),
            Handler::Upstream(h) => h.on_close(ctx),
            Handler::Client(h) => h.on_close(ctx),
        }
    }

    /// Where the next socket read lands: the buffer to append into and how
    /// many bytes it may grow by.
    pub(crate) fn read_slot(&mut self) -> (&mut BytesMut, usize) {
        match self {
            Handler::Handshake(h) => h.read_slot(),
            Handler::Upstream(h) => h.read_slot(),
            Handler::Client(h) => h.read_slot(),
        }
    }

    /// Hand the buffers this handler owns back to the pool at teardown.
    pub(crate) fn reclaim(self, pool: &BufferPool) {
        match self {
            Handler::Handshake(h) => h.reclaim(pool),
            Handler::Upstream(h) => h.reclaim(pool),
            Handler::Client(h) => h.reclaim(pool),
        }
    }
}

/// Collects the actions a handler requests during one callback; the
/// connection task applies them after the callback returns, outside the
/// borrow of the handler itself.
pub struct Ctx {
    handle: ConnHandle,
    pool: Arc<BufferPool>,
    pub(crate) sends: Vec<BytesMut>,
    pub(crate) events: Vec<Event>,
    pub(crate) swap: Option<Handler>,
    pub(crate) read_armed: bool,
    pub(crate) close: bool,
    pub(crate) close_after_flush: bool,
}

impl Ctx {
    pub(crate) fn new(handle: ConnHandle, pool: Arc<BufferPool>) -> Self {
        Self {
            handle,
            pool,
            sends: Vec::new(),
            events: Vec::new(),
            swap: None,
            read_armed: false,
            close: false,
            close_after_flush: false,
        }
    }

    pub fn handle(&self) -> &ConnHandle {
        &self.handle
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Queue a fully framed buffer on this connection's outbound FIFO.
    pub fn send(&mut self, buf: BytesMut) {
        self.sends.push(buf);
    }

    /// Report an observation to the dispatcher.
    pub fn post(&mut self, event: Event) {
        self.events.push(event);
    }

    /// Request the next receive. Without this the connection sits idle
    /// waiting for outbound work only.
    pub fn arm_read(&mut self) {
        self.read_armed = true;
    }

    /// Substitute the connection's handler; the new handler's
    /// `on_connected` runs before any further completion is delivered.
    pub fn replace_handler(&mut self, handler: Handler) {
        self.swap = Some(handler);
    }

    /// Drop the connection as soon as the callback returns.
    pub fn close(&mut self) {
        self.close = true;
    }

    /// Stop reading, flush everything queued, then drop the connection.
    pub fn close_after_flush(&mut self) {
        self.close_after_flush = true;
    }
}
