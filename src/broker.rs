use crate::client::ClientHandler;
use crate::config::BrokerConfig;
use crate::dispatcher::{Dispatcher, PhaseCell, UpstreamPhase};
use crate::event::{Event, EventStream};
use crate::handler::Handler;
use crate::handshake::HandshakeHandler;
use crate::pool::BufferPool;
use crate::reactor::Reactor;
use log::debug;
use std::io::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A running broker: two listeners, the reactor behind them, and the
/// dispatcher task that owns all routing state.
pub struct Broker {
    client_addr: SocketAddr,
    upstream_addr: SocketAddr,
    events: mpsc::Sender<Event>,
    dispatcher: JoinHandle<()>,
}

/// Bind both listeners and spawn the dispatcher.
///
/// The upstream listener admits exactly one connection at a time: the
/// first comer claims the slot and gets the HTTP handshake handler, anyone
/// else is closed on accept. The client listener only admits connections
/// while that upstream is fully established.
pub async fn start(config: BrokerConfig) -> Result<Broker, Error> {
    let pool = Arc::new(BufferPool::new());
    let (events_tx, events_rx) = mpsc::channel(config.event_queue_depth);
    let reactor = Arc::new(Reactor::new(Arc::clone(&pool), events_tx.clone()));
    let phase = Arc::new(PhaseCell::new());

    let upstream_addr = {
        let pool = Arc::clone(&pool);
        let phase = Arc::clone(&phase);
        let line_capacity = config.handshake_line_capacity;
        reactor
            .bind(config.upstream_addr, move |_, peer| {
                if phase.try_begin_handshake() {
                    Some(Handler::Handshake(HandshakeHandler::new(
                        &pool,
                        line_capacity,
                    )))
                } else {
                    debug!("refusing second upstream from {}", peer);
                    None
                }
            })
            .await?
    };

    let client_addr = {
        let pool = Arc::clone(&pool);
        let phase = Arc::clone(&phase);
        reactor
            .bind(config.client_addr, move |_, peer| {
                if phase.load() == UpstreamPhase::Connected {
                    Some(Handler::Client(ClientHandler::new(&pool)))
                } else {
                    debug!("refusing client {} while the upstream is absent", peer);
                    None
                }
            })
            .await?
    };

    let dispatcher = Dispatcher::new(reactor, pool, phase);
    let dispatcher = tokio::spawn(dispatcher.run(EventStream::new(events_rx)));

    Ok(Broker {
        client_addr,
        upstream_addr,
        events: events_tx,
        dispatcher,
    })
}

impl Broker {
    /// Where tabserver clients should connect, ports resolved.
    pub fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    /// Where the upstream should connect, ports resolved.
    pub fn upstream_addr(&self) -> SocketAddr {
        self.upstream_addr
    }

    /// Ask the dispatcher to tear everything down.
    pub async fn stop(&self) {
        let _ = self.events.send(Event::Stop).await;
    }

    /// Wait for the dispatcher to exit.
    pub async fn join(self) {
        let _ = self.dispatcher.await;
    }
}
