use crate::reactor::ConnHandle;
use crate::upstream::UpstreamHandle;
use bytes::BytesMut;
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc::Receiver;

// Base enum, used as the structure to represent every single observation
// the connection handlers report to the dispatcher. The dispatcher is the
// only consumer and owns all cross-connection state, so none of these
// carry locks.
pub enum Event {
    /// Tear everything down and exit the dispatch loop.
    Stop,
    /// The HTTP upgrade finished and the WebSocket handler took over.
    UpstreamConnected(UpstreamHandle),
    /// The upstream socket is gone (mid-handshake or established).
    UpstreamDisconnected,
    /// A client finished its HELLO sequence.
    ClientConnected { conn: ConnHandle, name: Vec<u8> },
    /// A forwarding client's socket closed.
    ClientDisconnected { token: u64 },
    /// The upstream asked for `payload` to be written to client `id`.
    ForwardToClient { id: i32, payload: BytesMut },
    /// A client produced a chunk to relay upstream.
    ForwardToUpstream { token: u64, payload: BytesMut },
}

// This struct will be used for implementing the Stream trait, so the
// dispatcher doesn't interact with the mpsc tokio channel directly
pub struct EventStream {
    receiver: Receiver<Event>,
}

impl EventStream {
    pub fn new(receiver: Receiver<Event>) -> Self {
        Self { receiver }
    }
}

impl Stream for EventStream {
    type Item = Event;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        Pin::new(&mut this.receiver).poll_recv(cx)
    }
}
