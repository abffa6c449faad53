//! Version handshake.
//!
//! ```text
//! us:   version ----------------------> (sendaddrv2) verack
//! peer: <------------------ version     <------------------ verack
//! ```
//!
//! Messages may arrive in either order, [`HandshakeState`] tracks which
//! halves have completed. The handler completing the handshake pauses the
//! channel before returning, so nothing sent after the peer's verack is read
//! until the session has attached its protocols and resumed the channel.

use crate::net::Core;
use bitcoin::p2p::message::NetworkMessage;
use bitcoin::p2p::message_network::VersionMessage;
use bitcoin::p2p::{Address as WireAddress, ServiceFlags};
use bitcoin_peers_connection::{Channel, Error, ADDRV2_MIN_PROTOCOL_VERSION};
use log::debug;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::oneshot;

/// State machine for tracking handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Sent version message, but haven't received anything yet.
    VersionSent,
    /// Received the peer's version message (and sent verack), but no verack response yet.
    VersionReceived,
    /// Received a verack, but no version message yet.
    VerackReceived,
    /// Both version and verack received, handshake complete.
    Complete,
}

impl HandshakeState {
    /// The state after the peer's version was accepted.
    pub fn on_version(self) -> Self {
        match self {
            HandshakeState::VersionSent => HandshakeState::VersionReceived,
            HandshakeState::VerackReceived => HandshakeState::Complete,
            _ => {
                debug!("Received duplicate version message in state {self:?}, ignoring");
                self
            }
        }
    }

    /// The state after the peer's verack.
    pub fn on_verack(self) -> Self {
        match self {
            HandshakeState::VersionSent => HandshakeState::VerackReceived,
            HandshakeState::VersionReceived => HandshakeState::Complete,
            _ => {
                debug!("Received duplicate verack message in state {self:?}, ignoring");
                self
            }
        }
    }
}

/// Shared between the version and verack handlers.
struct Negotiation {
    state: HandshakeState,
    outcome: Option<oneshot::Sender<Result<(), Error>>>,
}

impl Negotiation {
    fn finish(&mut self, result: Result<(), Error>) {
        if let Some(outcome) = self.outcome.take() {
            let _ = outcome.send(result);
        }
    }

    /// Advance the state, completing (and pausing the channel) when done.
    fn advance(&mut self, state: HandshakeState, channel: &Channel) {
        self.state = state;
        if state == HandshakeState::Complete {
            channel.pause();
            self.finish(Ok(()));
        }
    }
}

type Shared = Arc<Mutex<Negotiation>>;

fn lock(negotiation: &Shared) -> std::sync::MutexGuard<'_, Negotiation> {
    negotiation.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Negotiate the protocol version on a paused channel.
///
/// Resumes the channel to exchange messages and leaves it paused on
/// success. On failure the channel is stopped with the returned code:
/// [`Error::ProtocolViolation`] for a peer below the minimum version,
/// [`Error::ConnectionLoop`] for a connection to ourselves and
/// [`Error::ChannelTimeout`] when the peer is too slow.
pub(crate) async fn handshake(core: &Arc<Core>, channel: &Arc<Channel>) -> Result<(), Error> {
    let (sender, receiver) = oneshot::channel();
    let negotiation = Arc::new(Mutex::new(Negotiation {
        state: HandshakeState::VersionSent,
        outcome: Some(sender),
    }));

    let subscribed = channel
        .subscribe(
            "version",
            version_handler(core, channel, negotiation.clone()),
        )
        .and_then(|()| channel.subscribe("verack", verack_handler(channel, negotiation)));
    if let Err(e) = subscribed {
        let code = channel.stop_code().unwrap_or(e);
        channel.stop(code);
        return Err(code);
    }

    channel.post(NetworkMessage::Version(version_message(core, channel)));
    channel.resume();

    let result = match tokio::time::timeout(core.settings().handshake_timeout, receiver).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(channel.stop_code().unwrap_or(Error::ChannelStopped)),
        Err(_) => Err(Error::ChannelTimeout),
    };

    match result {
        Ok(()) => debug!(
            "Handshake with {} complete at version {}",
            channel.endpoint(),
            channel.negotiated_version()
        ),
        Err(code) => {
            debug!("Handshake with {} failed: {code}", channel.endpoint());
            channel.stop(code);
        }
    }

    result
}

fn version_handler(
    core: &Arc<Core>,
    channel: &Arc<Channel>,
    negotiation: Shared,
) -> bitcoin_peers_connection::MessageHandler {
    let core = Arc::downgrade(core);
    let channel = Arc::downgrade(channel);

    Box::new(move |result| {
        let mut negotiation = lock(&negotiation);
        let message = match result {
            Ok(message) => message,
            Err(code) => {
                negotiation.finish(Err(code));
                return false;
            }
        };

        let (Some(core), Some(channel)) = (core.upgrade(), channel.upgrade()) else {
            negotiation.finish(Err(Error::ServiceStopped));
            return false;
        };

        let NetworkMessage::Version(version) = message.as_ref() else {
            return true;
        };

        match accept_version(&core, &channel, version) {
            Ok(()) => {
                let state = negotiation.state.on_version();
                negotiation.advance(state, &channel);
            }
            Err(code) => negotiation.finish(Err(code)),
        }

        // Later version messages are ignored.
        false
    })
}

fn verack_handler(
    channel: &Arc<Channel>,
    negotiation: Shared,
) -> bitcoin_peers_connection::MessageHandler {
    let channel: Weak<Channel> = Arc::downgrade(channel);

    Box::new(move |result| {
        let mut negotiation = lock(&negotiation);
        if let Err(code) = result {
            negotiation.finish(Err(code));
            return false;
        }

        let Some(channel) = channel.upgrade() else {
            negotiation.finish(Err(Error::ServiceStopped));
            return false;
        };

        let state = negotiation.state.on_verack();
        negotiation.advance(state, &channel);
        false
    })
}

/// Validate the peer's version and answer it.
fn accept_version(core: &Core, channel: &Channel, version: &VersionMessage) -> Result<(), Error> {
    let settings = core.settings();

    if version.nonce == channel.identifier() || core.is_loopback(version.nonce) {
        debug!("Connection loop detected with {}", channel.endpoint());
        return Err(Error::ConnectionLoop);
    }

    if version.version < settings.protocol_minimum {
        debug!(
            "Peer {} version {} below minimum {}",
            channel.endpoint(),
            version.version,
            settings.protocol_minimum
        );
        return Err(Error::ProtocolViolation);
    }

    let negotiated = settings.protocol_maximum.min(version.version);
    debug!(
        "Received version {} ({}) from {}, negotiated {negotiated}",
        version.version,
        version.user_agent,
        channel.endpoint()
    );
    channel.set_negotiated_version(negotiated);
    channel.set_peer_version(version.clone());

    // BIP155 requires sendaddrv2 ahead of our verack.
    if negotiated >= ADDRV2_MIN_PROTOCOL_VERSION {
        channel.post(NetworkMessage::SendAddrV2);
    }
    channel.post(NetworkMessage::Verack);
    Ok(())
}

/// Gets the current Unix timestamp, zero if the clock is before the epoch.
fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or_default()
}

fn version_message(core: &Core, channel: &Channel) -> VersionMessage {
    let settings = core.settings();
    let unspecified = SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0);
    let receiver = channel.authority().unwrap_or(unspecified);

    VersionMessage {
        version: settings.protocol_maximum,
        services: settings.services,
        timestamp: unix_timestamp(),
        receiver: WireAddress::new(&receiver, ServiceFlags::NONE),
        sender: WireAddress::new(&unspecified, settings.services),
        nonce: channel.identifier(),
        user_agent: settings.user_agent.clone(),
        start_height: 0,
        relay: settings.relay,
    }
}
