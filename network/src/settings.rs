//! Node configuration.
//!
//! [`Settings`] carries every value the sessions and the [`Net`] read by
//! name. Loading settings from files is left to the application.
//!
//! [`Net`]: crate::Net

use bitcoin::p2p::ServiceFlags;
use bitcoin::Network;
use bitcoin_peers_connection::{
    ChannelSettings, ConnectorSettings, Endpoint, DEFAULT_CHANNEL_EXPIRATION,
    DEFAULT_CHANNEL_INACTIVITY, DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAXIMUM_PAYLOAD,
    DEFAULT_MINIMUM_BUFFER, DEFAULT_PROTOCOL_VERSION, MIN_PROTOCOL_VERSION,
};
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

/// Default number of runtime worker threads.
pub const DEFAULT_THREADS: usize = 4;
/// Default target of outbound channels.
pub const DEFAULT_OUTBOUND_CONNECTIONS: usize = 8;
/// Default number of parallel attempts per outbound slot or seeding batch.
pub const DEFAULT_CONNECT_BATCH_SIZE: usize = 5;
/// Default timeout of the version handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
/// Default timeout of one seed channel's address request.
pub const DEFAULT_SEEDING_TIMEOUT: Duration = Duration::from_secs(30);
/// Default delay before a failed or dropped attempt is retried.
pub const DEFAULT_RETRY_TIMEOUT: Duration = Duration::from_secs(1);
/// Default capacity of the address pool.
pub const DEFAULT_HOST_POOL_CAPACITY: usize = 10_000;
/// Default address count below which the node seeds.
pub const DEFAULT_MINIMUM_ADDRESS_COUNT: usize = 1_000;

/// User agent advertised when none is configured.
pub fn default_user_agent() -> String {
    format!("/bitcoin-peers:{}/", env!("CARGO_PKG_VERSION"))
}

/// Errors that can occur while building [`Settings`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsError {
    /// User agent doesn't follow the `/name:version/` format.
    InvalidUserAgent(String),
    /// Endpoint text isn't `host:port`.
    InvalidEndpoint(String),
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsError::InvalidUserAgent(agent) => {
                write!(f, "User agent '{agent}' must follow format '/name:version/'")
            }
            SettingsError::InvalidEndpoint(text) => {
                write!(f, "Endpoint '{text}' must follow format 'host:port'")
            }
        }
    }
}

impl std::error::Error for SettingsError {}

/// Validates the Bitcoin Core user agent format: `/name:version/`.
pub fn validate_user_agent(user_agent: &str) -> Result<(), SettingsError> {
    let invalid = || SettingsError::InvalidUserAgent(user_agent.to_string());

    let contents = user_agent
        .strip_prefix('/')
        .and_then(|rest| rest.strip_suffix('/'))
        .ok_or_else(invalid)?;

    match contents.split_once(':') {
        Some((name, version))
            if !name.is_empty() && !version.is_empty() && !version.contains(':') =>
        {
            Ok(())
        }
        _ => Err(invalid()),
    }
}

fn parse_endpoint(text: &str) -> Result<Endpoint, SettingsError> {
    text.parse()
        .map_err(|_| SettingsError::InvalidEndpoint(text.to_string()))
}

/// Node configuration.
///
/// # Example
///
/// ```
/// # fn main() -> Result<(), bitcoin_peers_network::SettingsError> {
/// use bitcoin::Network;
/// use bitcoin_peers_network::Settings;
///
/// let settings = Settings::new(Network::Regtest)
///     .with_user_agent("/my-node:1.0/")?
///     .with_seed("seed.example.org:18444")?
///     .with_outbound_connections(2);
/// assert_eq!(settings.outbound_connections, 2);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Settings {
    /// Worker threads of the node's runtime.
    pub threads: usize,
    /// Network, which selects the message magic.
    pub network: Network,
    /// Highest protocol version advertised.
    pub protocol_maximum: u32,
    /// Lowest protocol version accepted from a peer.
    pub protocol_minimum: u32,
    /// Services advertised in our version message.
    pub services: ServiceFlags,
    /// User agent advertised in our version message.
    pub user_agent: String,
    /// Whether peers should relay transactions to us.
    pub relay: bool,
    /// Maximum inbound channels, zero disables listening.
    pub inbound_connections: usize,
    /// Target outbound channels, zero disables outbound connections.
    pub outbound_connections: usize,
    /// Parallel attempts per outbound slot and per seeding batch.
    pub connect_batch_size: usize,
    /// Timeout of one connection attempt.
    pub connect_timeout: Duration,
    /// Timeout of the version handshake.
    pub handshake_timeout: Duration,
    /// Timeout of one seed channel's address request.
    pub seeding_timeout: Duration,
    /// Delay before a failed attempt is retried.
    pub retry_timeout: Duration,
    /// Inactivity timeout of every channel, zero disables it.
    pub channel_inactivity: Duration,
    /// Nominal lifetime of every channel, zero disables it.
    pub channel_expiration: Duration,
    /// Largest payload accepted from a peer.
    pub maximum_payload: usize,
    /// Payload buffer capacity retained between messages.
    pub minimum_buffer: usize,
    /// Whether payload checksums are verified.
    pub validate_checksum: bool,
    /// Allow connecting to ourselves, skips loopback detection.
    pub enable_loopback: bool,
    /// Capacity of the address pool, zero disables seeding.
    pub host_pool_capacity: usize,
    /// Seeding is skipped once the pool holds this many addresses.
    pub minimum_address_count: usize,
    /// Endpoints asked for addresses when the pool runs low.
    pub seeds: Vec<Endpoint>,
    /// Endpoints kept connected by the manual session.
    pub peers: Vec<Endpoint>,
    /// Local addresses accepting inbound connections.
    pub binds: Vec<SocketAddr>,
    /// SOCKS5 proxy all outbound connections are tunneled through.
    pub socks5: Option<Endpoint>,
}

impl Settings {
    /// Default settings for `network`.
    pub fn new(network: Network) -> Self {
        Settings {
            threads: DEFAULT_THREADS,
            network,
            protocol_maximum: DEFAULT_PROTOCOL_VERSION,
            protocol_minimum: MIN_PROTOCOL_VERSION,
            services: ServiceFlags::NONE,
            user_agent: default_user_agent(),
            relay: false,
            inbound_connections: 0,
            outbound_connections: DEFAULT_OUTBOUND_CONNECTIONS,
            connect_batch_size: DEFAULT_CONNECT_BATCH_SIZE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            seeding_timeout: DEFAULT_SEEDING_TIMEOUT,
            retry_timeout: DEFAULT_RETRY_TIMEOUT,
            channel_inactivity: DEFAULT_CHANNEL_INACTIVITY,
            channel_expiration: DEFAULT_CHANNEL_EXPIRATION,
            maximum_payload: DEFAULT_MAXIMUM_PAYLOAD,
            minimum_buffer: DEFAULT_MINIMUM_BUFFER,
            validate_checksum: true,
            enable_loopback: false,
            host_pool_capacity: DEFAULT_HOST_POOL_CAPACITY,
            minimum_address_count: DEFAULT_MINIMUM_ADDRESS_COUNT,
            seeds: Vec::new(),
            peers: Vec::new(),
            binds: Vec::new(),
            socks5: None,
        }
    }

    /// The per-channel subset of the settings.
    pub fn channel_settings(&self) -> ChannelSettings {
        ChannelSettings::new(self.network.magic())
            .with_protocol_range(self.protocol_minimum, self.protocol_maximum)
            .with_maximum_payload(self.maximum_payload)
            .with_minimum_buffer(self.minimum_buffer)
            .with_validate_checksum(self.validate_checksum)
            .with_inactivity(self.channel_inactivity)
            .with_expiration(self.channel_expiration)
    }

    /// The connector subset of the settings.
    pub fn connector_settings(&self) -> ConnectorSettings {
        let settings = ConnectorSettings::default().with_timeout(self.connect_timeout);
        match &self.socks5 {
            Some(proxy) => settings.with_proxy(proxy.clone()),
            None => settings,
        }
    }

    /// Set the user agent, which must follow the `/name:version/` format.
    pub fn with_user_agent<S: Into<String>>(mut self, user_agent: S) -> Result<Self, SettingsError> {
        let user_agent = user_agent.into();
        validate_user_agent(&user_agent)?;
        self.user_agent = user_agent;
        Ok(self)
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_protocol_range(mut self, minimum: u32, maximum: u32) -> Self {
        self.protocol_minimum = minimum;
        self.protocol_maximum = maximum;
        self
    }

    pub fn with_services(mut self, services: ServiceFlags) -> Self {
        self.services = services;
        self
    }

    pub fn with_relay(mut self, relay: bool) -> Self {
        self.relay = relay;
        self
    }

    pub fn with_inbound_connections(mut self, inbound: usize) -> Self {
        self.inbound_connections = inbound;
        self
    }

    pub fn with_outbound_connections(mut self, outbound: usize) -> Self {
        self.outbound_connections = outbound;
        self
    }

    pub fn with_connect_batch_size(mut self, batch_size: usize) -> Self {
        self.connect_batch_size = batch_size;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_seeding_timeout(mut self, timeout: Duration) -> Self {
        self.seeding_timeout = timeout;
        self
    }

    pub fn with_retry_timeout(mut self, timeout: Duration) -> Self {
        self.retry_timeout = timeout;
        self
    }

    pub fn with_channel_inactivity(mut self, inactivity: Duration) -> Self {
        self.channel_inactivity = inactivity;
        self
    }

    pub fn with_channel_expiration(mut self, expiration: Duration) -> Self {
        self.channel_expiration = expiration;
        self
    }

    pub fn with_maximum_payload(mut self, maximum_payload: usize) -> Self {
        self.maximum_payload = maximum_payload;
        self
    }

    pub fn with_minimum_buffer(mut self, minimum_buffer: usize) -> Self {
        self.minimum_buffer = minimum_buffer;
        self
    }

    pub fn with_validate_checksum(mut self, validate: bool) -> Self {
        self.validate_checksum = validate;
        self
    }

    pub fn with_enable_loopback(mut self, enable: bool) -> Self {
        self.enable_loopback = enable;
        self
    }

    pub fn with_host_pool_capacity(mut self, capacity: usize) -> Self {
        self.host_pool_capacity = capacity;
        self
    }

    pub fn with_minimum_address_count(mut self, count: usize) -> Self {
        self.minimum_address_count = count;
        self
    }

    /// Add a seed endpoint given as `host:port`.
    pub fn with_seed(mut self, seed: &str) -> Result<Self, SettingsError> {
        self.seeds.push(parse_endpoint(seed)?);
        Ok(self)
    }

    pub fn with_seeds(mut self, seeds: Vec<Endpoint>) -> Self {
        self.seeds = seeds;
        self
    }

    /// Add a manual peer given as `host:port`.
    pub fn with_peer(mut self, peer: &str) -> Result<Self, SettingsError> {
        self.peers.push(parse_endpoint(peer)?);
        Ok(self)
    }

    pub fn with_peers(mut self, peers: Vec<Endpoint>) -> Self {
        self.peers = peers;
        self
    }

    pub fn with_bind(mut self, bind: SocketAddr) -> Self {
        self.binds.push(bind);
        self
    }

    /// Tunnel outbound connections through the SOCKS5 proxy at `proxy`.
    pub fn with_socks5(mut self, proxy: &str) -> Result<Self, SettingsError> {
        self.socks5 = Some(parse_endpoint(proxy)?);
        Ok(self)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings::new(Network::Bitcoin)
    }
}
