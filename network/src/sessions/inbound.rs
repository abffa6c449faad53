use super::{Session, SessionBase};
use crate::net::{Admission, Core};
use bitcoin_peers_connection::{Acceptor, Error, RaceUnity, Socket};
use log::{debug, info};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;

/// Accepts peers on the configured binds.
pub(crate) struct InboundSession {
    base: SessionBase,
    acceptors: Mutex<Vec<Arc<Acceptor>>>,
}

impl Session for InboundSession {
    fn base(&self) -> &SessionBase {
        &self.base
    }
}

impl InboundSession {
    pub(crate) fn new(core: Arc<Core>) -> Arc<Self> {
        Arc::new(InboundSession {
            base: SessionBase::new("inbound", core),
            acceptors: Mutex::new(Vec::new()),
        })
    }

    /// Bind every configured address, failing with the first bind error.
    ///
    /// Succeeds without binding when inbound connections are disabled.
    pub(crate) async fn start(self: &Arc<Self>) -> Result<(), Error> {
        self.base.begin()?;
        let core = self.base.core();
        let settings = core.settings();

        if settings.inbound_connections == 0 || settings.binds.is_empty() {
            info!("Inbound connections disabled");
            return Ok(());
        }

        let race = Arc::new(RaceUnity::<()>::new(settings.binds.len()));
        let (sender, receiver) = oneshot::channel();
        race.start(Box::new(move |result| {
            let _ = sender.send(result);
        }));

        for bind in settings.binds.iter().copied() {
            let acceptor = Arc::new(Acceptor::new(core.accept_suspended(), self.base.cancel()));
            self.acceptors
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(acceptor.clone());

            let session = self.clone();
            let race = race.clone();
            core.tracker().spawn(async move {
                let result = acceptor.start(bind).await;
                let bound = result.is_ok();
                race.finish(result);
                if bound {
                    session.accept(acceptor).await;
                }
            });
        }

        let result = receiver.await.unwrap_or(Err(Error::ServiceStopped));
        if let Err(e) = result {
            info!("Inbound session failed to bind: {e}");
            self.stop();
        }
        result
    }

    /// Addresses currently accepting connections.
    pub(crate) fn local_addrs(&self) -> Vec<SocketAddr> {
        self.acceptors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(|acceptor| acceptor.local_addr())
            .collect()
    }

    async fn accept(self: Arc<Self>, acceptor: Arc<Acceptor>) {
        let core = self.base.core().clone();
        let retry = core.settings().retry_timeout;

        loop {
            match acceptor.accept().await {
                Ok(socket) => {
                    let Some(admission) = core.admit() else {
                        debug!("Inbound limit reached, dropping {}", socket.endpoint());
                        socket.stop();
                        continue;
                    };

                    core.tracker().spawn(self.clone().admit(socket, admission));
                }
                Err(Error::ServiceStopped) => break,
                Err(e) => {
                    if e != Error::ServiceSuspended {
                        debug!("Accept failed: {e}");
                    }

                    if !self.base.wait(retry).await {
                        break;
                    }
                }
            }
        }
    }

    async fn admit(self: Arc<Self>, socket: Arc<Socket>, admission: Admission) {
        let channel = self.base.channel(socket);
        if self.base.establish(&channel).await.is_ok() {
            self.base.attach(&channel);
        }
        drop(admission);
    }
}
