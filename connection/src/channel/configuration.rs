//! Channel configuration types and constants.

use crate::address::{DEFAULT_PROTOCOL_VERSION, MIN_PROTOCOL_VERSION};
use bitcoin::p2p::Magic;
use std::time::Duration;

/// Maximum payload accepted from a peer, the bitcoin protocol message limit.
pub const DEFAULT_MAXIMUM_PAYLOAD: usize = 4_000_000;

/// Payload buffer capacity retained between messages.
pub const DEFAULT_MINIMUM_BUFFER: usize = 4_096;

/// A channel receiving nothing for this long is stopped.
pub const DEFAULT_CHANNEL_INACTIVITY: Duration = Duration::from_secs(10 * 60);

/// Nominal channel lifetime, jittered per channel.
pub const DEFAULT_CHANNEL_EXPIRATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Configuration used to build a channel.
///
/// A zero `inactivity` or `expiration` duration disables that timer.
#[derive(Debug, Clone)]
pub struct ChannelSettings {
    /// Network magic expected on every heading.
    pub magic: Magic,
    /// Highest protocol version advertised.
    pub protocol_maximum: u32,
    /// Lowest protocol version accepted from a peer.
    pub protocol_minimum: u32,
    /// Largest payload accepted, checked before any allocation.
    pub maximum_payload: usize,
    /// Payload buffer capacity kept after a large message.
    pub minimum_buffer: usize,
    /// Whether payload checksums are verified.
    pub validate_checksum: bool,
    /// Inactivity timeout, reset by every processed message.
    pub inactivity: Duration,
    /// Lifetime after which the channel expires.
    pub expiration: Duration,
}

impl ChannelSettings {
    /// Default settings for the network identified by `magic`.
    pub fn new(magic: Magic) -> Self {
        Self {
            magic,
            protocol_maximum: DEFAULT_PROTOCOL_VERSION,
            protocol_minimum: MIN_PROTOCOL_VERSION,
            maximum_payload: DEFAULT_MAXIMUM_PAYLOAD,
            minimum_buffer: DEFAULT_MINIMUM_BUFFER,
            validate_checksum: true,
            inactivity: DEFAULT_CHANNEL_INACTIVITY,
            expiration: DEFAULT_CHANNEL_EXPIRATION,
        }
    }

    pub fn with_protocol_range(mut self, minimum: u32, maximum: u32) -> Self {
        self.protocol_minimum = minimum;
        self.protocol_maximum = maximum;
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

    pub fn with_validate_checksum(mut self, validate_checksum: bool) -> Self {
        self.validate_checksum = validate_checksum;
        self
    }

    pub fn with_inactivity(mut self, inactivity: Duration) -> Self {
        self.inactivity = inactivity;
        self
    }

    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = expiration;
        self
    }
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self::new(Magic::BITCOIN)
    }
}
