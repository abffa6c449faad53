use super::{Session, SessionBase};
use crate::net::Core;
use bitcoin_peers_connection::{Channel, Connector, Endpoint, Error, Handler};
use log::{debug, info};
use std::sync::Arc;

/// Keeps user-requested peers connected.
pub(crate) struct ManualSession {
    base: SessionBase,
}

impl Session for ManualSession {
    fn base(&self) -> &SessionBase {
        &self.base
    }
}

impl ManualSession {
    pub(crate) fn new(core: Arc<Core>) -> Arc<Self> {
        Arc::new(ManualSession {
            base: SessionBase::new("manual", core),
        })
    }

    pub(crate) fn start(&self) -> Result<(), Error> {
        self.base.begin()
    }

    /// Connect to `endpoint`, reconnecting whenever the channel drops.
    ///
    /// `handler` sees the outcome of every attempt, then
    /// [`Error::ServiceStopped`] once the session stops.
    pub(crate) fn connect(self: &Arc<Self>, endpoint: Endpoint, handler: Option<Handler<Arc<Channel>>>) {
        if !self.base.started() || self.stopped() {
            if let Some(mut handler) = handler {
                handler(Err(Error::ServiceStopped));
            }
            return;
        }

        self.base
            .core()
            .tracker()
            .spawn(self.clone().maintain(endpoint, handler));
    }

    async fn maintain(self: Arc<Self>, endpoint: Endpoint, mut handler: Option<Handler<Arc<Channel>>>) {
        let retry = self.base.core().settings().retry_timeout;
        let connector = self.base.connector();
        let mut notify = |result: Result<Arc<Channel>, Error>| {
            if let Some(handler) = handler.as_mut() {
                handler(result);
            }
        };

        while !self.stopped() {
            match self.attempt(&connector, &endpoint).await {
                Ok(channel) => {
                    notify(Ok(channel.clone()));
                    channel.closed().await;
                    let code = channel.stop_code().unwrap_or(Error::ChannelStopped);
                    if code.is_shutdown() {
                        debug!("Manual channel to {endpoint} closed: {code}");
                    } else {
                        info!("Manual channel to {endpoint} dropped: {code}");
                    }
                }
                Err(e) => {
                    debug!("Manual connection to {endpoint} failed: {e}");
                    notify(Err(e));
                }
            }

            if !self.base.wait(retry).await {
                break;
            }
        }

        notify(Err(Error::ServiceStopped));
    }

    async fn attempt(&self, connector: &Connector, endpoint: &Endpoint) -> Result<Arc<Channel>, Error> {
        let socket = connector
            .connect(endpoint)
            .await
            .map_err(|failure| failure.error)?;

        let channel = self.base.channel(socket);
        self.base.establish(&channel).await?;
        self.base.attach(&channel);
        Ok(channel)
    }
}
