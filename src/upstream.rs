use crate::command::Command;
use crate::decoder::FrameDecoder;
use crate::encoder::{frame_capacity, write_header};
use crate::error::Error;
use crate::event::Event;
use crate::frame::{MessageKind, OpCode};
use crate::handler::Ctx;
use crate::pool::BufferPool;
use crate::reactor::ConnHandle;
use bytes::BytesMut;
use log::{debug, info};

// One socket read's worth of upstream traffic; frames larger than this just
// span feeds and reassemble inside the decoder.
const FEED_CAPACITY: usize = 64 * 1024;

/// Owns the upstream socket once the handshake handler has swapped itself
/// out. Decodes frames into broker commands for the dispatcher and answers
/// the control traffic itself: Ping is echoed as Pong, Close is echoed and
/// then the socket goes down once the echo is flushed.
pub struct UpstreamHandler {
    decoder: FrameDecoder,
    feed: BytesMut,
    residual: Option<BytesMut>,
    sending_close: bool,
}

impl UpstreamHandler {
    pub(crate) fn new(pool: &BufferPool, residual: Option<BytesMut>) -> Self {
        Self {
            decoder: FrameDecoder::new(),
            feed: pool.take(FEED_CAPACITY),
            residual,
            sending_close: false,
        }
    }

    pub(crate) fn on_connected(&mut self, ctx: &mut Ctx) -> Result<(), Error> {
        info!("upstream connected from {}", ctx.handle().peer());
        ctx.post(Event::UpstreamConnected(UpstreamHandle {
            conn: ctx.handle().clone(),
        }));

        // bytes the peer pipelined behind the handshake
        if let Some(mut residual) = self.residual.take() {
            let result = self.process(ctx, &mut residual);
            ctx.pool().put(residual);
            result?;
        }
        if !self.sending_close {
            ctx.arm_read();
        }
        Ok(())
    }

    pub(crate) fn on_receive(&mut self, ctx: &mut Ctx) -> Result<(), Error> {
        let mut feed = std::mem::take(&mut self.feed);
        let result = self.process(ctx, &mut feed);
        self.feed = feed;
        result?;
        if !self.sending_close {
            ctx.arm_read();
        }
        Ok(())
    }

    pub(crate) fn on_close(&mut self, ctx: &mut Ctx) {
        ctx.post(Event::UpstreamDisconnected);
    }

    pub(crate) fn read_slot(&mut self) -> (&mut BytesMut, usize) {
        // raw bytes are consumed whole on every receive; the decoder holds
        // whatever state spans reads
        self.feed.clear();
        (&mut self.feed, FEED_CAPACITY)
    }

    pub(crate) fn reclaim(self, pool: &BufferPool) {
        pool.put(self.feed);
        if let Some(residual) = self.residual {
            pool.put(residual);
        }
    }

    fn process(&mut self, ctx: &mut Ctx, data: &mut BytesMut) -> Result<(), Error> {
        let decoder = &mut self.decoder;
        let sending_close = &mut self.sending_close;
        decoder.feed(data, |message| {
            Self::handle_message(ctx, sending_close, message.kind, message.payload)
        })
    }

    fn handle_message(
        ctx: &mut Ctx,
        sending_close: &mut bool,
        kind: MessageKind,
        payload: &[u8],
    ) -> Result<(), Error> {
        match kind {
            MessageKind::Binary => match Command::decode(payload)? {
                Command::Send { id, command } => {
                    let mut copy = ctx.pool().take(command.len());
                    copy.extend_from_slice(command);
                    ctx.post(Event::ForwardToClient { id, payload: copy });
                }
                other => {
                    // only the broker originates Hello and Goodbye
                    debug!("ignoring unexpected upstream command {:?}", other);
                }
            },
            MessageKind::Text => {}
            MessageKind::Ping => {
                if !*sending_close {
                    // the payload was unmasked in place by the decoder, and
                    // the echo goes out unmasked like every server frame
                    let mut pong = ctx.pool().take(frame_capacity(payload.len(), false));
                    write_header(&mut pong, true, OpCode::Pong, None, payload.len());
                    pong.extend_from_slice(payload);
                    ctx.send(pong);
                }
            }
            MessageKind::Pong => {}
            MessageKind::Close => {
                if !*sending_close {
                    *sending_close = true;
                    let mut close = ctx.pool().take(frame_capacity(0, false));
                    write_header(&mut close, true, OpCode::Close, None, 0);
                    ctx.send(close);
                    ctx.close_after_flush();
                }
            }
        }
        Ok(())
    }
}

/// The dispatcher's side of the established upstream link: frames a broker
/// command as a single unmasked Binary frame in one pooled buffer and
/// queues it on the connection.
#[derive(Clone)]
pub struct UpstreamHandle {
    conn: ConnHandle,
}

impl UpstreamHandle {
    pub fn send_command(&self, pool: &BufferPool, command: &Command<'_>) {
        let len = command.encoded_len();
        let mut buf = pool.take(frame_capacity(len, false));
        write_header(&mut buf, true, OpCode::Binary, None, len);
        command.encode_into(&mut buf);
        self.conn.send(buf);
    }

    pub fn close(&self) {
        self.conn.close();
    }
}
