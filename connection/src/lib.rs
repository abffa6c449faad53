//! Sockets, channels and coordination primitives of a bitcoin P2P node.
//!
//! * [`transport`] produces [`Socket`]s, by accepting or by connecting
//!   directly or through a SOCKS5 proxy.
//! * [`Channel`] frames messages over a socket and fans them out to
//!   per-command subscribers.
//! * [`subscriber`] and [`race`] hold the notification registries and
//!   aggregators the node builds its sessions from.

pub mod address;
mod channel;
mod error;
pub mod race;
pub mod subscriber;
pub mod transport;

pub use address::{
    Address, Endpoint, ADDRV2_MIN_PROTOCOL_VERSION, DEFAULT_PROTOCOL_VERSION, MIN_PROTOCOL_VERSION,
};
pub use channel::{
    checksum, is_http_or_tls, Channel, ChannelSettings, Distributor, Heading, MessageHandler,
    DEFAULT_CHANNEL_EXPIRATION, DEFAULT_CHANNEL_INACTIVITY, DEFAULT_MAXIMUM_PAYLOAD,
    DEFAULT_MINIMUM_BUFFER, HEADING_SIZE,
};
pub use error::Error;
pub use race::{RaceQuality, RaceUnity, RaceVolume};
pub use subscriber::{Desubscriber, Handler, RetainingHandler, Subscriber, Unsubscriber};
pub use transport::{
    Acceptor, ConnectFailure, Connector, ConnectorSettings, Socket, DEFAULT_CONNECT_TIMEOUT,
};
