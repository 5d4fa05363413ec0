//! A TCP broker that funnels many tabserver line-protocol clients onto a
//! single WebSocket upstream.
//!
//! Clients speak `HELLO\n<name>\n` followed by raw bytes; the broker tags
//! every chunk with the client's id and forwards it upstream as a binary
//! broker command inside a WebSocket frame, per the
//! [WebSocket Protocol RFC](https://datatracker.ietf.org/doc/html/rfc6455).
//! Replies from the upstream name a client id and are written back to that
//! client's socket verbatim.
//!
//! It's an async implementation based on the tokio runtime: one task per
//! accepted socket drives that connection's protocol handler, and a single
//! dispatcher task consumes their events and owns every piece of state that
//! crosses connections.

pub mod broker;
pub mod buffer;
pub mod client;
pub mod command;
pub mod config;
pub mod decoder;
pub mod dispatcher;
pub mod encoder;
pub mod error;
pub mod event;
pub mod frame;
pub mod handler;
pub mod handshake;
pub mod pool;
pub mod reactor;
pub mod upstream;
mod utils;
