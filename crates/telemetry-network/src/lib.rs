//! Single-threaded, `mio`-driven TCP front-end for the telemetry daemon.
//!
//! Accepts clients, frames/deframes the wire protocol per connection, and
//! routes decoded records to a [`telemetry_sink::Sink`] and
//! [`telemetry_observer::Observer`].

mod connection;
mod server;

pub use connection::RX_BUF_SIZE;
pub use server::Server;
