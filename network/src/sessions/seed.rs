use super::{Session, SessionBase};
use crate::net::Core;
use crate::protocols::seed;
use bitcoin_peers_connection::{Endpoint, Error, RaceVolume};
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::{oneshot, Semaphore};

/// Fills the address pool from the configured seeds.
pub(crate) struct SeedSession {
    base: SessionBase,
}

impl Session for SeedSession {
    fn base(&self) -> &SessionBase {
        &self.base
    }
}

impl SeedSession {
    pub(crate) fn new(core: Arc<Core>) -> Arc<Self> {
        Arc::new(SeedSession {
            base: SessionBase::new("seed", core),
        })
    }

    /// Seed until the pool holds `minimum_address_count` addresses.
    ///
    /// Succeeds without any I/O when seeding is disabled (zero pool
    /// capacity) or the pool is already full enough. Seeds are dialed at
    /// most `connect_batch_size` at a time and the result is decided as soon
    /// as enough addresses arrived, [`Error::SeedingUnsuccessful`] if every
    /// seed finished short of it.
    pub(crate) async fn start(self: &Arc<Self>) -> Result<(), Error> {
        self.base.begin()?;
        let core = self.base.core();
        let settings = core.settings();

        let count = core.host_count();
        if settings.host_pool_capacity == 0 || count >= settings.minimum_address_count {
            info!("Seeding not required with {count} addresses");
            return Ok(());
        }

        if settings.seeds.is_empty() {
            warn!("Seeding required with {count} addresses but no seeds are configured");
            return Err(Error::SeedingUnsuccessful);
        }

        let needed = settings.minimum_address_count - count;
        let race = Arc::new(RaceVolume::new(
            settings.seeds.len(),
            needed,
            needed,
            Error::SeedingUnsuccessful,
        ));

        let (sender, receiver) = oneshot::channel();
        let session = Arc::downgrade(self);
        race.start(
            Box::new(move |result| {
                let _ = sender.send(result);
            }),
            Box::new(move |total| {
                info!("Seeding complete with {total} new addresses");
                if let Some(session) = session.upgrade() {
                    session.stop();
                }
            }),
        );

        let permits = Arc::new(Semaphore::new(settings.connect_batch_size.max(1)));
        for endpoint in settings.seeds.iter().cloned() {
            let session = self.clone();
            let race = race.clone();
            let permits = permits.clone();
            core.tracker().spawn(async move {
                let amount = match permits.acquire().await {
                    Ok(_permit) => session.harvest(&endpoint).await,
                    Err(_) => 0,
                };
                race.finish(amount);
            });
        }

        receiver.await.unwrap_or(Err(Error::ServiceStopped))
    }

    /// New addresses learned from one seed.
    async fn harvest(&self, endpoint: &Endpoint) -> usize {
        if self.stopped() {
            return 0;
        }

        let socket = match self.base.connector().connect(endpoint).await {
            Ok(socket) => socket,
            Err(failure) => {
                debug!("Seed {endpoint} unreachable: {}", failure.error);
                return 0;
            }
        };

        let channel = self.base.channel(socket);
        channel.set_quiet(true);
        if self.base.establish(&channel).await.is_err() {
            return 0;
        }

        seed(self.base.core(), &channel).await
    }
}
