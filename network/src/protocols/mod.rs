//! Protocols attached to channels.
//!
//! The node attaches the version handshake to every new channel, and to
//! every handshaked channel the ping responder plus either the seed address
//! request (seed sessions) or the application's [`Protocols`].

mod handshake;
mod ping;
mod seed;

pub(crate) use handshake::handshake;
pub use handshake::HandshakeState;
pub(crate) use ping::attach_ping;
pub(crate) use seed::seed;

use bitcoin_peers_connection::Channel;
use std::sync::Arc;

/// Application protocols installed on every handshaked, counted channel.
///
/// Called while the channel is still paused, so handlers subscribed here
/// see every message following the handshake.
pub trait Protocols: Send + Sync {
    fn attach(&self, channel: &Arc<Channel>);
}

impl<F> Protocols for F
where
    F: Fn(&Arc<Channel>) + Send + Sync,
{
    fn attach(&self, channel: &Arc<Channel>) {
        self(channel)
    }
}
