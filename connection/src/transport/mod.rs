//! Transport layer: sockets and the acceptor/connector that produce them.
//!
//! A [`Socket`] wraps exactly one of a plain, TLS, websocket or websocket
//! over TLS stream. Sockets start out plain and are upgraded in place.
//! [`Acceptor`] and [`Connector`] observe shared suspend flags owned by the
//! node, and the connector optionally tunnels through a SOCKS5 proxy.

mod acceptor;
mod connector;
mod socket;
mod socks5;

pub use acceptor::Acceptor;
pub use connector::{
    resolve, ConnectFailure, Connector, ConnectorSettings, DEFAULT_CONNECT_TIMEOUT,
};
pub use socket::Socket;
pub use socks5::handshake as socks5_handshake;
