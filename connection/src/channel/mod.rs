//! Channels: one per established peer connection.
//!
//! A [`Channel`] owns its [`Socket`], runs the receive loop and fans decoded
//! messages out through its [`Distributor`].
//!
//! # Lifecycle
//!
//! ```text
//! created (paused) -> resume() -> active <-> paused -> stopped
//! ```
//!
//! Channels are created paused so protocol handlers can subscribe before the
//! first message is read. The receive loop checks the pause flag between
//! messages, so a handler pausing the channel from inside a notification
//! (as the version handshake does on completion) stops the loop before the
//! next message is read.
//!
//! Two timers run while the channel is active. The expiration deadline is a
//! jittered lifetime fixed when the loop first starts, the inactivity
//! deadline is reset by every processed message and on resume.

mod configuration;
mod distributor;
mod heading;
mod reader;

pub use configuration::{
    ChannelSettings, DEFAULT_CHANNEL_EXPIRATION, DEFAULT_CHANNEL_INACTIVITY,
    DEFAULT_MAXIMUM_PAYLOAD, DEFAULT_MINIMUM_BUFFER,
};
pub use distributor::{Distributor, MessageHandler};
pub use heading::{checksum, is_http_or_tls, Heading, HEADING_SIZE};

use crate::address::Endpoint;
use crate::error::Error;
use crate::subscriber::{Handler, Subscriber};
use crate::transport::Socket;
use bitcoin::consensus::encode;
use bitcoin::p2p::message::{NetworkMessage, RawNetworkMessage};
use bitcoin::p2p::message_network::VersionMessage;
use bitcoin::p2p::Magic;
use log::{debug, info, Level};
use rand::Rng;
use reader::FrameReader;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// What interrupted the active receive loop.
enum Event {
    Message(Heading),
    Paused,
    Stop(Error),
}

/// Application handle of one peer connection.
pub struct Channel {
    socket: Arc<Socket>,
    settings: ChannelSettings,
    identifier: u64,
    start_time: std::time::Instant,
    quiet: AtomicBool,
    negotiated_version: AtomicU32,
    peer_version: Mutex<Option<Arc<VersionMessage>>>,
    paused: watch::Sender<bool>,
    started: AtomicBool,
    stopped: AtomicBool,
    stop_code: OnceLock<Error>,
    cancel: CancellationToken,
    done: CancellationToken,
    tracker: TaskTracker,
    distributor: Distributor,
    stop_subscribers: Mutex<Subscriber<()>>,
    outbox: mpsc::UnboundedSender<NetworkMessage>,
}

impl Channel {
    /// Create a paused channel over a connected socket.
    ///
    /// Tasks are spawned on `tracker`, so this must run inside a tokio
    /// runtime. Cancelling `parent` stops the channel with
    /// [`Error::ServiceStopped`].
    pub fn new(
        socket: Arc<Socket>,
        settings: ChannelSettings,
        tracker: &TaskTracker,
        parent: &CancellationToken,
    ) -> Arc<Self> {
        let (paused, _) = watch::channel(true);
        let (outbox, queue) = mpsc::unbounded_channel();
        let magic = settings.magic;

        let channel = Arc::new(Self {
            socket,
            identifier: rand::random(),
            start_time: std::time::Instant::now(),
            quiet: AtomicBool::new(false),
            negotiated_version: AtomicU32::new(settings.protocol_maximum),
            peer_version: Mutex::new(None),
            paused,
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            stop_code: OnceLock::new(),
            cancel: parent.child_token(),
            done: CancellationToken::new(),
            tracker: tracker.clone(),
            distributor: Distributor::new(magic),
            stop_subscribers: Mutex::new(Subscriber::new()),
            settings,
            outbox,
        });

        tracker.spawn(write_loop(
            Arc::downgrade(&channel),
            channel.socket.clone(),
            magic,
            channel.cancel.clone(),
            queue,
        ));

        debug!(
            "Channel {:016x} created for {}",
            channel.identifier,
            channel.socket.endpoint()
        );
        channel
    }

    /// Start or restart the receive loop and timers.
    pub fn resume(self: &Arc<Self>) {
        if self.stopped() {
            return;
        }

        self.paused.send_replace(false);
        if !self.started.swap(true, Ordering::AcqRel) {
            self.tracker.spawn(self.clone().receive());
        }
    }

    /// Halt the receive loop and timers after the current message.
    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    pub fn paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// Stop the channel with `code`, idempotent.
    ///
    /// Halts the receive loop and timers, closes the socket and notifies
    /// message and stop subscribers once with `code`.
    pub fn stop(&self, code: Error) {
        // The code is published before the flag, so anyone seeing the
        // channel stopped also sees why.
        if self.stop_code.set(code).is_err() {
            return;
        }
        self.stopped.store(true, Ordering::Release);

        if code.is_remote() && !self.quiet() {
            info!(
                "Channel {:016x} to {} stopped, peer misbehaved: {code}",
                self.identifier,
                self.socket.endpoint()
            );
        } else {
            debug!(
                "Channel {:016x} to {} stopped: {code}",
                self.identifier,
                self.socket.endpoint()
            );
        }

        self.paused.send_replace(true);
        self.cancel.cancel();
        self.socket.stop();
        self.distributor.stop(code);

        let mut subscribers = std::mem::take(&mut *self.lock_stop_subscribers());
        subscribers.stop(code);
        self.done.cancel();
    }

    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// The code the channel was stopped with.
    pub fn stop_code(&self) -> Option<Error> {
        self.stop_code.get().copied()
    }

    /// Wait until the channel has stopped and notified its subscribers.
    pub async fn closed(&self) {
        self.done.cancelled().await
    }

    /// Be notified once, with `Err(code)`, when the channel stops.
    ///
    /// Invoked immediately if the channel has already stopped.
    pub fn subscribe_stop(&self, mut handler: Handler<()>) {
        let mut subscribers = self.lock_stop_subscribers();
        if self.stopped() {
            drop(subscribers);
            handler(Err(self.stop_code().unwrap_or(Error::ChannelStopped)));
            return;
        }

        // Not stopped, so the registry accepts.
        let _ = subscribers.subscribe(handler);
    }

    /// Subscribe to messages with `command`, see [`Distributor::subscribe`].
    pub fn subscribe(&self, command: &str, handler: MessageHandler) -> Result<(), Error> {
        self.distributor.subscribe(command, handler)
    }

    /// Serialize and write one message.
    ///
    /// A write failure stops the channel with the failure code.
    pub async fn send(&self, message: NetworkMessage) -> Result<(), Error> {
        if self.stopped() {
            return Err(Error::ChannelStopped);
        }

        let data = encode::serialize(&RawNetworkMessage::new(self.settings.magic, message));
        if let Err(e) = self.socket.write(&data).await {
            self.stop(e);
            return Err(e);
        }

        Ok(())
    }

    /// Queue one message for the channel's writer task.
    ///
    /// For use from synchronous handlers, queued messages are written in
    /// order. Dropped once the channel stops.
    pub fn post(&self, message: NetworkMessage) {
        if !self.stopped() {
            let _ = self.outbox.send(message);
        }
    }

    /// The channel's nonce, advertised in our version message.
    pub fn identifier(&self) -> u64 {
        self.identifier
    }

    pub fn settings(&self) -> &ChannelSettings {
        &self.settings
    }

    pub fn socket(&self) -> &Arc<Socket> {
        &self.socket
    }

    pub fn inbound(&self) -> bool {
        self.socket.inbound()
    }

    pub fn endpoint(&self) -> Endpoint {
        self.socket.endpoint()
    }

    /// The address identifying the peer for deduplication.
    pub fn authority(&self) -> Option<SocketAddr> {
        self.socket.authority()
    }

    pub fn start_time(&self) -> std::time::Instant {
        self.start_time
    }

    /// Quiet channels log peer protocol violations at debug level.
    pub fn quiet(&self) -> bool {
        self.quiet.load(Ordering::Relaxed)
    }

    pub fn set_quiet(&self, quiet: bool) {
        self.quiet.store(quiet, Ordering::Relaxed);
    }

    /// The negotiated protocol version, our maximum until negotiated.
    pub fn negotiated_version(&self) -> u32 {
        self.negotiated_version.load(Ordering::Acquire)
    }

    pub fn set_negotiated_version(&self, version: u32) {
        self.negotiated_version.store(version, Ordering::Release);
    }

    /// The version message received from the peer, once handshaked.
    pub fn peer_version(&self) -> Option<Arc<VersionMessage>> {
        self.peer_version
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_peer_version(&self, version: VersionMessage) {
        *self
            .peer_version
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(version));
    }

    fn lock_stop_subscribers(&self) -> MutexGuard<'_, Subscriber<()>> {
        self.stop_subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn level(&self) -> Level {
        if self.quiet() {
            Level::Debug
        } else {
            Level::Warn
        }
    }

    async fn receive(self: Arc<Self>) {
        let mut reader = FrameReader::new(self.settings.clone());
        let mut paused = self.paused.subscribe();
        let expiration = deadline(self.settings.expiration, true);

        loop {
            let resumed = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => false,
                changed = paused.wait_for(|paused| !*paused) => changed.is_ok(),
            };

            if !resumed {
                self.stop(Error::ServiceStopped);
                return;
            }

            let mut inactivity = deadline(self.settings.inactivity, false);
            loop {
                let event = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => Event::Stop(Error::ServiceStopped),
                    _ = expire(expiration) => Event::Stop(Error::ChannelExpired),
                    _ = expire(inactivity) => Event::Stop(Error::ChannelInactive),
                    _ = paused.wait_for(|paused| *paused) => Event::Paused,
                    result = reader.read(&self.socket, self.level()) => match result {
                        Ok(heading) => Event::Message(heading),
                        Err(e) => Event::Stop(e),
                    },
                };

                match event {
                    Event::Paused => break,
                    Event::Stop(code) => {
                        self.stop(code);
                        return;
                    }
                    Event::Message(heading) => {
                        if self.stopped() {
                            return;
                        }

                        if let Err(e) = self.distributor.notify(&heading, reader.payload()) {
                            debug!(
                                "Undecodable {heading} from {}: {e}",
                                self.socket.endpoint()
                            );
                            self.stop(e);
                            return;
                        }

                        reader.reclaim();
                        inactivity = deadline(self.settings.inactivity, false);
                    }
                }
            }
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if !self.stopped() {
            self.socket.stop();
        }
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("identifier", &format_args!("{:016x}", self.identifier))
            .field("endpoint", &self.socket.endpoint())
            .field("inbound", &self.inbound())
            .field("negotiated_version", &self.negotiated_version())
            .field("paused", &self.paused())
            .field("stopped", &self.stopped())
            .finish()
    }
}

/// Writes posted messages in order until the channel stops.
async fn write_loop(
    channel: Weak<Channel>,
    socket: Arc<Socket>,
    magic: Magic,
    cancel: CancellationToken,
    mut queue: mpsc::UnboundedReceiver<NetworkMessage>,
) {
    loop {
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            message = queue.recv() => message,
        };

        let Some(message) = message else {
            // Owner shutdown cancels the token without stopping a paused channel.
            if let Some(channel) = channel.upgrade() {
                channel.stop(Error::ServiceStopped);
            }
            return;
        };

        let data = encode::serialize(&RawNetworkMessage::new(magic, message));
        if let Err(e) = socket.write(&data).await {
            if let Some(channel) = channel.upgrade() {
                channel.stop(e);
            }
            return;
        }
    }
}

/// A deadline `duration` from now, jittered to 50-100% if requested.
fn deadline(duration: Duration, jitter: bool) -> Option<Instant> {
    if duration.is_zero() {
        return None;
    }

    let duration = if jitter {
        let millis = duration.as_millis().min(u64::MAX as u128) as u64;
        Duration::from_millis(rand::thread_rng().gen_range(millis / 2..=millis))
    } else {
        duration
    };

    Some(Instant::now() + duration)
}

async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
