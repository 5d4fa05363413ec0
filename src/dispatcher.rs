use crate::command::Command;
use crate::event::{Event, EventStream};
use crate::pool::BufferPool;
use crate::reactor::{ConnHandle, Reactor};
use crate::upstream::UpstreamHandle;
use futures::StreamExt;
use log::{debug, info};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Lifecycle of the single upstream slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamPhase {
    /// No upstream socket exists.
    None = 0,
    /// A TCP connection is in, HTTP upgrade still in progress.
    Handshaking = 1,
    /// The WebSocket is established and commands flow.
    Connected = 2,
}

/// The dispatcher owns the phase; this cell publishes a snapshot of it so
/// the listener factories can gate admission from the accept loops without
/// reaching into dispatcher state.
pub struct PhaseCell(AtomicU8);

impl PhaseCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(UpstreamPhase::None as u8))
    }

    pub fn load(&self) -> UpstreamPhase {
        match self.0.load(Ordering::Acquire) {
            0 => UpstreamPhase::None,
            1 => UpstreamPhase::Handshaking,
            _ => UpstreamPhase::Connected,
        }
    }

    pub fn store(&self, phase: UpstreamPhase) {
        self.0.store(phase as u8, Ordering::Release);
    }

    /// Claim the upstream slot for an incoming handshake. Fails when any
    /// upstream, handshaking or established, already holds it.
    pub fn try_begin_handshake(&self) -> bool {
        self.0
            .compare_exchange(
                UpstreamPhase::None as u8,
                UpstreamPhase::Handshaking as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

impl Default for PhaseCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Single-task consumer of the event queue; the only place that touches the
/// client table and the upstream handle, so none of it needs a lock.
pub struct Dispatcher {
    reactor: Arc<Reactor>,
    pool: Arc<BufferPool>,
    phase: Arc<PhaseCell>,
    upstream: Option<UpstreamHandle>,
    clients: HashMap<i32, ConnHandle>,
    ids_by_token: HashMap<u64, i32>,
    next_id: i32,
}

impl Dispatcher {
    pub fn new(reactor: Arc<Reactor>, pool: Arc<BufferPool>, phase: Arc<PhaseCell>) -> Self {
        Self {
            reactor,
            pool,
            phase,
            upstream: None,
            clients: HashMap::new(),
            ids_by_token: HashMap::new(),
            next_id: 1,
        }
    }

    pub async fn run(mut self, mut events: EventStream) {
        while let Some(event) = events.next().await {
            if !self.handle(event) {
                break;
            }
        }
    }

    // Returns false when the loop should exit.
    fn handle(&mut self, event: Event) -> bool {
        match event {
            Event::Stop => {
                info!("stopping broker");
                self.reactor.close_all();
                return false;
            }
            Event::UpstreamConnected(handle) => {
                self.upstream = Some(handle);
                self.phase.store(UpstreamPhase::Connected);
            }
            Event::UpstreamDisconnected => {
                self.phase.store(UpstreamPhase::None);
                self.upstream = None;
                if !self.clients.is_empty() {
                    info!(
                        "upstream disconnected, dropping {} clients",
                        self.clients.len()
                    );
                }
                for (_, conn) in self.clients.drain() {
                    conn.close();
                }
                self.ids_by_token.clear();
            }
            Event::ClientConnected { conn, name } => match &self.upstream {
                Some(upstream) => {
                    let id = self.next_id;
                    self.next_id += 1;
                    upstream.send_command(&self.pool, &Command::Hello { id, name: &name });
                    self.ids_by_token.insert(conn.token(), id);
                    self.clients.insert(id, conn);
                    info!(
                        "client {} registered as {:?}",
                        id,
                        String::from_utf8_lossy(&name)
                    );
                }
                None => {
                    // admission raced the upstream teardown; make sure the
                    // socket dies with the rest
                    debug!("dropping client that arrived without an upstream");
                    conn.close();
                }
            },
            Event::ClientDisconnected { token } => {
                if let Some(upstream) = &self.upstream {
                    if let Some(id) = self.ids_by_token.remove(&token) {
                        self.clients.remove(&id);
                        upstream.send_command(&self.pool, &Command::Goodbye { id });
                        info!("client {} disconnected", id);
                    }
                }
            }
            Event::ForwardToClient { id, payload } => {
                match self.clients.get(&id) {
                    Some(conn) => conn.send(payload),
                    None => {
                        // the client left after the upstream queued its reply
                        debug!("dropping reply for departed client {}", id);
                        self.pool.put(payload);
                    }
                }
            }
            Event::ForwardToUpstream { token, payload } => {
                if let (Some(upstream), Some(&id)) =
                    (&self.upstream, self.ids_by_token.get(&token))
                {
                    upstream.send_command(
                        &self.pool,
                        &Command::Send {
                            id,
                            command: &payload,
                        },
                    );
                }
                self.pool.put(payload);
            }
        }
        true
    }
}
