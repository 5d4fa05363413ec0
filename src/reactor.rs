use crate::event::Event;
use crate::handler::{Ctx, Handler};
use crate::pool::BufferPool;
use bytes::{BufMut, BytesMut};
use log::{debug, error, warn};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

pub(crate) enum Cmd {
    Send(BytesMut),
    Close,
}

/// Cheap cloneable reference to a live connection. Sending enqueues on the
/// connection's outbound FIFO and never blocks, so the dispatcher can call
/// it from its own task freely. Once the connection is gone both calls are
/// silent no-ops.
#[derive(Clone)]
pub struct ConnHandle {
    token: u64,
    peer: SocketAddr,
    cmd_tx: UnboundedSender<Cmd>,
}

impl ConnHandle {
    /// Process-unique identity of this connection.
    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Queue a fully framed buffer for transmission. Bytes of one buffer
    /// are contiguous on the wire; buffers go out in FIFO order.
    pub fn send(&self, buf: BytesMut) {
        let _ = self.cmd_tx.send(Cmd::Send(buf));
    }

    pub fn close(&self) {
        let _ = self.cmd_tx.send(Cmd::Close);
    }
}

/// Owns the listening sockets and accepted connections, and routes I/O
/// completions to each connection's [`Handler`].
///
/// Every accepted socket gets its own task, which serializes the handler
/// callbacks for that connection; nothing is ordered across connections.
/// Handlers report observations as [`Event`]s on the dispatcher channel.
pub struct Reactor {
    pool: Arc<BufferPool>,
    events: mpsc::Sender<Event>,
    conns: Mutex<HashMap<u64, ConnHandle>>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
    next_token: AtomicU64,
}

impl Reactor {
    pub fn new(pool: Arc<BufferPool>, events: mpsc::Sender<Event>) -> Self {
        Self {
            pool,
            events,
            conns: Mutex::new(HashMap::new()),
            listeners: Mutex::new(Vec::new()),
            next_token: AtomicU64::new(1),
        }
    }

    /// Open a TCP listener and start accepting. The factory sees each
    /// `(local, peer)` pair and either supplies a handler or refuses, in
    /// which case the socket is closed on the spot. Returns the actually
    /// bound address, so callers may bind port 0.
    pub async fn bind<F>(self: &Arc<Self>, addr: SocketAddr, factory: F) -> io::Result<SocketAddr>
    where
        F: Fn(SocketAddr, SocketAddr) -> Option<Handler> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;

        let reactor = Arc::clone(self);
        let accept_loop = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => match factory(local, peer) {
                        Some(handler) => reactor.attach(stream, peer, handler),
                        None => {
                            // refusal: drop closes the socket immediately
                            debug!("refused connection from {}", peer);
                        }
                    },
                    Err(err) => {
                        // close_all aborts this task outright, which is how
                        // "operation aborted" during shutdown stays silent
                        error!("accept failed on {}: {}", local, err);
                    }
                }
            }
        });
        self.listeners.lock().unwrap().push(accept_loop);

        Ok(local)
    }

    /// Close all listeners and every accepted connection.
    pub fn close_all(&self) {
        for listener in self.listeners.lock().unwrap().drain(..) {
            listener.abort();
        }
        let conns: Vec<ConnHandle> = self.conns.lock().unwrap().values().cloned().collect();
        for conn in conns {
            conn.close();
        }
    }

    fn attach(self: &Arc<Self>, stream: TcpStream, peer: SocketAddr, handler: Handler) {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let handle = ConnHandle {
            token,
            peer,
            cmd_tx,
        };
        self.conns.lock().unwrap().insert(token, handle.clone());

        let reactor = Arc::clone(self);
        tokio::spawn(async move {
            reactor.run_conn(stream, handle, cmd_rx, handler).await;
        });
    }

    async fn run_conn(
        &self,
        stream: TcpStream,
        handle: ConnHandle,
        mut cmd_rx: UnboundedReceiver<Cmd>,
        mut handler: Handler,
    ) {
        let token = handle.token;
        let peer = handle.peer;
        let (mut read_half, mut write_half) = stream.into_split();
        let mut ctx = Ctx::new(handle, Arc::clone(&self.pool));

        // Outbound FIFO: the head is the in-flight buffer until every byte
        // of it has been written, then it goes back to the pool.
        let mut outbound: VecDeque<BytesMut> = VecDeque::new();
        let mut written = 0usize;

        let mut want_read = false;
        let mut draining = false; // flush outbound, then drop the socket
        let mut dead = false;

        if handler.on_connected(&mut ctx).is_err() {
            dead = true;
        }
        self.apply(&mut ctx, &mut handler, &mut outbound, &mut want_read, &mut draining, &mut dead)
            .await;

        while !dead {
            if draining && outbound.is_empty() {
                break;
            }
            tokio::select! {
                biased;

                cmd = cmd_rx.recv() => match cmd {
                    Some(Cmd::Send(buf)) => {
                        if draining {
                            self.pool.put(buf);
                        } else {
                            outbound.push_back(buf);
                        }
                    }
                    Some(Cmd::Close) | None => dead = true,
                },

                result = write_front(&mut write_half, &outbound, written), if !outbound.is_empty() => {
                    match result {
                        Ok(0) => {
                            debug!("write side of {} closed", peer);
                            dead = true;
                        }
                        Ok(n) => {
                            written += n;
                            if written == outbound[0].len() {
                                written = 0;
                                if let Some(buf) = outbound.pop_front() {
                                    self.pool.put(buf);
                                }
                                if handler.on_send(&mut ctx).is_err() {
                                    dead = true;
                                }
                                self.apply(&mut ctx, &mut handler, &mut outbound, &mut want_read, &mut draining, &mut dead)
                                    .await;
                            }
                        }
                        Err(err) => {
                            debug!("write to {} failed: {}", peer, err);
                            dead = true;
                        }
                    }
                },

                result = read_into(&mut read_half, &mut handler), if want_read && !draining => {
                    match result {
                        Ok(0) => {
                            // peer closed its write half
                            debug!("{} closed the connection", peer);
                            dead = true;
                        }
                        Ok(_) => {
                            want_read = false;
                            if let Err(err) = handler.on_receive(&mut ctx) {
                                warn!("closing {}: {}", peer, err);
                                dead = true;
                            }
                            self.apply(&mut ctx, &mut handler, &mut outbound, &mut want_read, &mut draining, &mut dead)
                                .await;
                        }
                        Err(err) => {
                            debug!("read from {} failed: {}", peer, err);
                            dead = true;
                        }
                    }
                },
            }
        }

        self.conns.lock().unwrap().remove(&token);
        handler.on_close(&mut ctx);
        for event in ctx.events.drain(..) {
            let _ = self.events.send(event).await;
        }
        // every queued buffer comes back deterministically, closes included
        for buf in ctx.sends.drain(..) {
            self.pool.put(buf);
        }
        for buf in outbound.drain(..) {
            self.pool.put(buf);
        }
        handler.reclaim(&self.pool);
    }

    /// Apply whatever the last callback asked for: flush events to the
    /// dispatcher, move queued sends to the outbound FIFO, honor close
    /// requests, and run handler swaps (including the new handler's
    /// `on_connected`, which may ask for more).
    async fn apply(
        &self,
        ctx: &mut Ctx,
        handler: &mut Handler,
        outbound: &mut VecDeque<BytesMut>,
        want_read: &mut bool,
        draining: &mut bool,
        dead: &mut bool,
    ) {
        loop {
            for event in ctx.events.drain(..) {
                // a send failure here means the dispatcher is gone and the
                // whole process is shutting down
                let _ = self.events.send(event).await;
            }
            outbound.extend(ctx.sends.drain(..));
            if ctx.read_armed {
                ctx.read_armed = false;
                *want_read = true;
            }
            if ctx.close_after_flush {
                ctx.close_after_flush = false;
                *draining = true;
            }
            if ctx.close {
                ctx.close = false;
                *dead = true;
            }

            match ctx.swap.take() {
                Some(next) => {
                    *handler = next;
                    if handler.on_connected(ctx).is_err() {
                        *dead = true;
                    }
                }
                None => break,
            }
        }
    }
}

// Single cancel-safe write of whatever is left of the in-flight buffer.
// write_all would restart from the beginning when the select loop drops the
// future, so progress is tracked by the caller instead.
async fn write_front(
    write_half: &mut OwnedWriteHalf,
    outbound: &VecDeque<BytesMut>,
    written: usize,
) -> io::Result<usize> {
    match outbound.front() {
        Some(buf) => write_half.write(&buf[written..]).await,
        None => std::future::pending().await,
    }
}

async fn read_into(read_half: &mut OwnedReadHalf, handler: &mut Handler) -> io::Result<usize> {
    use tokio::io::AsyncReadExt;

    let (buf, spare) = handler.read_slot();
    if spare == 0 {
        // handlers close on a full window before re-arming, so this is
        // unreachable in practice; report it like a peer close
        return Ok(0);
    }
    read_half.read_buf(&mut buf.limit(spare)).await
}

#[cfg(test)]
pub(crate) fn test_handle(token: u64) -> (ConnHandle, UnboundedReceiver<Cmd>) {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let handle = ConnHandle {
        token,
        peer: "127.0.0.1:0".parse().unwrap(),
        cmd_tx,
    };
    (handle, cmd_rx)
}
