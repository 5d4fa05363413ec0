use std::net::{Ipv4Addr, SocketAddr};

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Where tabserver clients connect. Port 0 asks the OS for one, which
    /// the bound address reported back will reflect.
    pub client_addr: SocketAddr,
    /// Where the single upstream connects and upgrades to WebSocket.
    pub upstream_addr: SocketAddr,
    /// Depth of the bounded queue feeding the dispatcher.
    pub event_queue_depth: usize,
    /// Receive window for the HTTP upgrade; no single request line or
    /// header may exceed it.
    pub handshake_line_capacity: usize,
}

impl BrokerConfig {
    pub fn for_ports(client_port: u16, upstream_port: u16) -> Self {
        Self {
            client_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, client_port)),
            upstream_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, upstream_port)),
            ..Self::default()
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            client_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            upstream_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            event_queue_depth: 1024,
            handshake_line_capacity: 8192,
        }
    }
}
