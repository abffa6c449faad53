//! A bitcoin P2P node: seeding, manual, inbound and outbound sessions over
//! the channels of [`bitcoin_peers_connection`].
//!
//! ```no_run
//! use bitcoin::Network;
//! use bitcoin_peers_network::{Net, Settings};
//!
//! let settings = Settings::new(Network::Bitcoin)
//!     .with_seed("seed.bitcoin.sipa.be:8333")
//!     .unwrap();
//! let net = Net::new(settings).unwrap();
//! net.start(|result| println!("seeded: {result:?}"));
//! ```

mod hosts;
mod net;
mod protocols;
mod sessions;
mod settings;

pub use hosts::{HostPool, Hosts};
pub use net::{Net, NetBuilder};
pub use protocols::{HandshakeState, Protocols};
pub use settings::{
    default_user_agent, validate_user_agent, Settings, SettingsError, DEFAULT_CONNECT_BATCH_SIZE,
    DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_HOST_POOL_CAPACITY, DEFAULT_MINIMUM_ADDRESS_COUNT,
    DEFAULT_OUTBOUND_CONNECTIONS, DEFAULT_RETRY_TIMEOUT, DEFAULT_SEEDING_TIMEOUT, DEFAULT_THREADS,
};

// Re-exports.
pub use bitcoin_peers_connection::{
    Address, Channel, Endpoint, Error, Handler, MessageHandler, RetainingHandler,
};
