//! Session control loops.
//!
//! Every session kind shares a [`SessionBase`]: the start/stop contract, the
//! cancellation token parenting its connectors and channels, and the
//! handshake/count/attach sequence every new channel goes through.
//!
//! ```text
//! socket -> channel (paused) -> handshake -> count -> ping -> protocols -> resume
//! ```

mod inbound;
mod manual;
mod outbound;
mod seed;

pub(crate) use inbound::InboundSession;
pub(crate) use manual::ManualSession;
pub(crate) use outbound::OutboundSession;
pub(crate) use seed::SeedSession;

use crate::net::Core;
use crate::protocols::{attach_ping, handshake};
use bitcoin_peers_connection::{Channel, Connector, Error, Socket};
use log::info;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// The closed set of session kinds, as seen by the node.
pub(crate) trait Session: Send + Sync {
    fn base(&self) -> &SessionBase;

    /// Stop the session, idempotent and safe before start.
    fn stop(&self) {
        self.base().stop()
    }

    fn stopped(&self) -> bool {
        self.base().stopped()
    }
}

/// State and channel plumbing shared by every session kind.
pub(crate) struct SessionBase {
    name: &'static str,
    core: Arc<Core>,
    started: AtomicBool,
    stopped: AtomicBool,
    cancel: CancellationToken,
}

impl SessionBase {
    pub(crate) fn new(name: &'static str, core: Arc<Core>) -> Self {
        let cancel = core.shutdown().child_token();
        SessionBase {
            name,
            core,
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            cancel,
        }
    }

    pub(crate) fn core(&self) -> &Arc<Core> {
        &self.core
    }

    /// Parent of every connector, acceptor and channel of the session.
    pub(crate) fn cancel(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Mark the session started.
    ///
    /// Fails with [`Error::OperationFailed`] if already started, leaving the
    /// running session untouched, and with [`Error::ServiceStopped`] once
    /// stopped.
    pub(crate) fn begin(&self) -> Result<(), Error> {
        if self.stopped() {
            return Err(Error::ServiceStopped);
        }

        if self.started.swap(true, Ordering::AcqRel) {
            return Err(Error::OperationFailed);
        }

        info!("Starting {} session", self.name);
        Ok(())
    }

    pub(crate) fn started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub(crate) fn stop(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            self.cancel.cancel();
            if self.started() {
                info!("Stopped {} session", self.name);
            }
        }
    }

    pub(crate) fn stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire) || self.cancel.is_cancelled()
    }

    /// A connector stopped along with the session.
    pub(crate) fn connector(&self) -> Connector {
        Connector::new(
            self.core.settings().connector_settings(),
            self.core.connect_suspended(),
            &self.cancel,
        )
    }

    /// A paused channel stopped along with the session.
    pub(crate) fn channel(&self, socket: Arc<Socket>) -> Arc<Channel> {
        Channel::new(
            socket,
            self.core.settings().channel_settings(),
            self.core.tracker(),
            &self.cancel,
        )
    }

    /// Sleep for `duration`, returns `false` if the session stopped first.
    pub(crate) async fn wait(&self, duration: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => !self.stopped(),
        }
    }

    /// Handshake and count a new channel, then attach the ping responder.
    ///
    /// The channel is left paused. On failure it is stopped with the
    /// returned code and never counted.
    pub(crate) async fn establish(&self, channel: &Arc<Channel>) -> Result<(), Error> {
        let core = &self.core;

        if !channel.inbound() && !core.settings().enable_loopback {
            let nonce = channel.identifier();
            core.store_nonce(nonce);
            let weak = Arc::downgrade(core);
            channel.subscribe_stop(Box::new(move |_| {
                if let Some(core) = weak.upgrade() {
                    core.unstore_nonce(nonce);
                }
            }));
        }

        handshake(core, channel).await?;

        let authority = channel.authority();
        let inbound = channel.inbound();
        if let Err(e) = core.count(authority, inbound) {
            channel.stop(e);
            return Err(e);
        }

        let weak = Arc::downgrade(core);
        channel.subscribe_stop(Box::new(move |_| {
            if let Some(core) = weak.upgrade() {
                core.uncount(authority, inbound);
            }
        }));

        attach_ping(channel);
        Ok(())
    }

    /// Attach application protocols, resume and announce an established channel.
    pub(crate) fn attach(&self, channel: &Arc<Channel>) {
        self.core.protocols().attach(channel);
        channel.resume();
        self.core.notify_connect(channel);
    }
}
