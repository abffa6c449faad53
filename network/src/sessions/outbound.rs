use super::{Session, SessionBase};
use crate::net::Core;
use bitcoin_peers_connection::{Address, Channel, Error, RaceQuality, Socket};
use log::{debug, info};
use std::sync::Arc;
use tokio::sync::oneshot;

/// Keeps `outbound_connections` channels to pool addresses open.
pub(crate) struct OutboundSession {
    base: SessionBase,
}

impl Session for OutboundSession {
    fn base(&self) -> &SessionBase {
        &self.base
    }
}

impl OutboundSession {
    pub(crate) fn new(core: Arc<Core>) -> Arc<Self> {
        Arc::new(OutboundSession {
            base: SessionBase::new("outbound", core),
        })
    }

    /// Start one maintenance loop per outbound slot.
    pub(crate) fn start(self: &Arc<Self>) -> Result<(), Error> {
        self.base.begin()?;
        let core = self.base.core();
        let slots = core.settings().outbound_connections;

        if slots == 0 {
            info!("Outbound connections disabled");
            return Ok(());
        }

        for slot in 0..slots {
            core.tracker().spawn(self.clone().maintain(slot));
        }
        Ok(())
    }

    async fn maintain(self: Arc<Self>, slot: usize) {
        let core = self.base.core().clone();
        let retry = core.settings().retry_timeout;

        while !self.stopped() {
            match self.batch().await {
                Ok((channel, address)) => {
                    channel.closed().await;
                    debug!(
                        "Outbound slot {slot} channel to {} closed: {}",
                        address.socket_addr(),
                        channel.stop_code().unwrap_or(Error::ChannelStopped)
                    );
                    core.restore_host(address);
                }
                Err(e) if e.is_transient() || e == Error::AddressNotFound => {
                    debug!("Outbound slot {slot} failed: {e}")
                }
                Err(e) => info!("Outbound slot {slot} failed: {e}"),
            }

            if !self.base.wait(retry).await {
                break;
            }
        }
    }

    /// Race a batch of pool addresses, the first connected socket wins.
    ///
    /// Connected losers are closed and their addresses restored to the
    /// pool, addresses that failed to connect are dropped.
    async fn batch(self: &Arc<Self>) -> Result<(Arc<Channel>, Address), Error> {
        let core = self.base.core();
        let size = core.settings().connect_batch_size.max(1);

        let candidates: Vec<Address> = (0..size).map_while(|_| core.take_host().ok()).collect();
        if candidates.is_empty() {
            return Err(Error::AddressNotFound);
        }

        let race = Arc::new(RaceQuality::<(Arc<Socket>, Address)>::new(candidates.len()));
        let (sender, receiver) = oneshot::channel();
        race.start(Box::new(move |result| {
            let _ = sender.send(result);
        }));

        for address in candidates {
            let session = self.clone();
            let race = race.clone();
            core.tracker().spawn(async move {
                let connector = session.base.connector();
                match connector.connect(&address.endpoint()).await {
                    Ok(socket) => {
                        if !race.finish(Ok((socket.clone(), address))) {
                            socket.stop();
                            session.base.core().restore_host(address);
                        }
                    }
                    Err(failure) => {
                        race.finish(Err(failure.error));
                    }
                }
            });
        }

        let (socket, address) = receiver.await.unwrap_or(Err(Error::ServiceStopped))?;
        let channel = self.base.channel(socket);
        self.base.establish(&channel).await?;
        self.base.attach(&channel);
        Ok((channel, address))
    }
}
