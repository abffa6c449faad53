//! The node: sessions, address book and channel accounting.
//!
//! [`Net`] owns the runtime every task runs on and the [`Core`] state shared
//! with its sessions. Sessions reach the address book, the loopback nonces
//! and the channel counters only through the core, which is what keeps
//! address deconfliction and counting consistent.
//!
//! ```text
//! start: manual -> hosts.start -> seed
//! run:   manual connects -> inbound -> outbound
//! close: stop sessions -> cancel -> drain runtime -> hosts.stop
//! ```

use crate::hosts::{HostPool, Hosts};
use crate::protocols::Protocols;
use crate::sessions::{InboundSession, ManualSession, OutboundSession, SeedSession, Session};
use crate::settings::Settings;
use bitcoin_peers_connection::{
    Address, Channel, Desubscriber, Endpoint, Error, Handler, RetainingHandler, Subscriber,
};
use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::{Builder, Runtime};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct Counts {
    total: usize,
    inbound: usize,
    admitting: usize,
}

/// An inbound slot held while an accepted socket handshakes.
///
/// The slot is released on drop.
pub(crate) struct Admission {
    core: Arc<Core>,
}

impl Drop for Admission {
    fn drop(&mut self) {
        let mut counts = lock(&self.core.counts);
        counts.admitting = counts.admitting.saturating_sub(1);
    }
}

/// State shared by the node and its sessions.
pub(crate) struct Core {
    settings: Settings,
    hosts: Mutex<Box<dyn Hosts>>,
    protocols: Arc<dyn Protocols>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    closed: AtomicBool,
    accept_suspended: Arc<AtomicBool>,
    connect_suspended: Arc<AtomicBool>,
    counts: Mutex<Counts>,
    nonces: Mutex<HashSet<u64>>,
    next_key: AtomicU64,
    stop_subscribers: Mutex<Subscriber<()>>,
    connect_subscribers: Mutex<Desubscriber<u64, Arc<Channel>>>,
    close_subscribers: Mutex<Desubscriber<u64, ()>>,
}

impl Core {
    pub(crate) fn new(
        settings: Settings,
        hosts: Box<dyn Hosts>,
        protocols: Arc<dyn Protocols>,
    ) -> Arc<Self> {
        Arc::new(Core {
            settings,
            hosts: Mutex::new(hosts),
            protocols,
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            closed: AtomicBool::new(false),
            accept_suspended: Arc::new(AtomicBool::new(false)),
            connect_suspended: Arc::new(AtomicBool::new(false)),
            counts: Mutex::new(Counts::default()),
            nonces: Mutex::new(HashSet::new()),
            next_key: AtomicU64::new(0),
            stop_subscribers: Mutex::new(Subscriber::new()),
            connect_subscribers: Mutex::new(Desubscriber::new()),
            close_subscribers: Mutex::new(Desubscriber::new()),
        })
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.settings
    }

    pub(crate) fn protocols(&self) -> &dyn Protocols {
        self.protocols.as_ref()
    }

    pub(crate) fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    pub(crate) fn shutdown(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub(crate) fn closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn accept_suspended(&self) -> Arc<AtomicBool> {
        self.accept_suspended.clone()
    }

    pub(crate) fn connect_suspended(&self) -> Arc<AtomicBool> {
        self.connect_suspended.clone()
    }

    fn next_key(&self) -> u64 {
        self.next_key.fetch_add(1, Ordering::Relaxed)
    }

    // Address book.

    pub(crate) fn take_host(&self) -> Result<Address, Error> {
        lock(&self.hosts).take()
    }

    pub(crate) fn restore_host(&self, address: Address) {
        lock(&self.hosts).restore(address)
    }

    pub(crate) fn fetch_hosts(&self, limit: usize) -> Vec<Address> {
        lock(&self.hosts).fetch(limit)
    }

    pub(crate) fn save_hosts(&self, addresses: &[Address]) -> usize {
        lock(&self.hosts).save(addresses)
    }

    pub(crate) fn host_count(&self) -> usize {
        lock(&self.hosts).count()
    }

    pub(crate) fn reserved_count(&self) -> usize {
        lock(&self.hosts).reserved()
    }

    // Loopback detection.

    /// Remember the nonce of one of our outbound channels.
    pub(crate) fn store_nonce(&self, nonce: u64) {
        if !lock(&self.nonces).insert(nonce) {
            warn!("Duplicate channel nonce {nonce:016x}");
        }
    }

    pub(crate) fn unstore_nonce(&self, nonce: u64) {
        lock(&self.nonces).remove(&nonce);
    }

    /// Whether `nonce` was generated by one of our outbound channels.
    pub(crate) fn is_loopback(&self, nonce: u64) -> bool {
        lock(&self.nonces).contains(&nonce)
    }

    // Channel accounting.

    /// Reserve `authority` and count a new channel.
    ///
    /// Fails with [`Error::AddressInUse`] if a channel to the same address is
    /// already counted, and with [`Error::ChannelOverflow`] (logged) rather
    /// than wrapping a counter.
    pub(crate) fn count(&self, authority: Option<SocketAddr>, inbound: bool) -> Result<(), Error> {
        if let Some(authority) = authority {
            if !lock(&self.hosts).reserve(authority) {
                debug!("Already connected to {authority}");
                return Err(Error::AddressInUse);
            }
        }

        let mut counts = lock(&self.counts);
        let total = counts.total.checked_add(1);
        let inbound_total = if inbound {
            counts.inbound.checked_add(1)
        } else {
            Some(counts.inbound)
        };

        match (total, inbound_total) {
            (Some(total), Some(inbound_total)) => {
                counts.total = total;
                counts.inbound = inbound_total;
                Ok(())
            }
            _ => {
                drop(counts);
                error!("{}", Error::ChannelOverflow);
                if let Some(authority) = authority {
                    lock(&self.hosts).unreserve(authority);
                }
                Err(Error::ChannelOverflow)
            }
        }
    }

    /// Reverse [`Core::count`], logging (and tolerating) underflow.
    pub(crate) fn uncount(&self, authority: Option<SocketAddr>, inbound: bool) {
        if let Some(authority) = authority {
            if !lock(&self.hosts).unreserve(authority) {
                warn!("Unreserved address {authority} was not reserved");
            }
        }

        let mut counts = lock(&self.counts);
        match counts.total.checked_sub(1) {
            Some(total) => counts.total = total,
            None => warn!("{} (total)", Error::ChannelUnderflow),
        }

        if inbound {
            match counts.inbound.checked_sub(1) {
                Some(inbound) => counts.inbound = inbound,
                None => warn!("{} (inbound)", Error::ChannelUnderflow),
            }
        }
    }

    /// Hold an inbound slot for an accepted socket.
    ///
    /// `None` once counted and admitting inbound channels together reach
    /// the inbound limit.
    pub(crate) fn admit(self: &Arc<Self>) -> Option<Admission> {
        let mut counts = lock(&self.counts);
        if counts.inbound.saturating_add(counts.admitting) >= self.settings.inbound_connections {
            return None;
        }

        counts.admitting += 1;
        Some(Admission { core: self.clone() })
    }

    pub(crate) fn channel_count(&self) -> usize {
        lock(&self.counts).total
    }

    pub(crate) fn inbound_count(&self) -> usize {
        lock(&self.counts).inbound
    }

    // Subscriptions.

    /// Announce an established channel to connect subscribers.
    pub(crate) fn notify_connect(&self, channel: &Arc<Channel>) {
        lock(&self.connect_subscribers).notify(channel.clone());
    }

    fn subscribe_stop(&self, handler: Handler<()>) -> Result<(), Error> {
        lock(&self.stop_subscribers).subscribe(handler)
    }

    /// Flag the node closed and notify every subscriber once with `code`.
    ///
    /// Returns `false` if already closed.
    fn close(&self, code: Error) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }

        let mut stop = std::mem::take(&mut *lock(&self.stop_subscribers));
        stop.stop(code);
        let mut connect = std::mem::take(&mut *lock(&self.connect_subscribers));
        connect.stop(code);
        let mut close = std::mem::take(&mut *lock(&self.close_subscribers));
        close.stop(code);

        // Leave the registries refusing new subscriptions.
        lock(&self.stop_subscribers).stop(code);
        lock(&self.connect_subscribers).stop(code);
        lock(&self.close_subscribers).stop(code);
        true
    }
}

/// Builder for creating a customized [`Net`] instance.
///
/// # Example
///
/// ```no_run
/// use bitcoin::Network;
/// use bitcoin_peers_network::{HostPool, NetBuilder, Settings};
///
/// let net = NetBuilder::new(Settings::new(Network::Bitcoin))
///     .with_hosts(HostPool::new(1_000))
///     .with_protocols(|channel: &std::sync::Arc<bitcoin_peers_network::Channel>| {
///         println!("channel {:016x} established", channel.identifier());
///     })
///     .build()
///     .unwrap();
/// net.close();
/// ```
pub struct NetBuilder {
    settings: Settings,
    hosts: Option<Box<dyn Hosts>>,
    protocols: Option<Arc<dyn Protocols>>,
}

impl NetBuilder {
    pub fn new(settings: Settings) -> Self {
        NetBuilder {
            settings,
            hosts: None,
            protocols: None,
        }
    }

    /// Use `hosts` as the address book, an empty [`HostPool`] by default.
    pub fn with_hosts<H: Hosts + 'static>(mut self, hosts: H) -> Self {
        self.hosts = Some(Box::new(hosts));
        self
    }

    /// Attach `protocols` to every established channel.
    pub fn with_protocols<P: Protocols + 'static>(mut self, protocols: P) -> Self {
        self.protocols = Some(Arc::new(protocols));
        self
    }

    /// Build the node and its runtime of `settings.threads` workers.
    pub fn build(self) -> io::Result<Net> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(self.settings.threads.max(1))
            .thread_name("bitcoin-peers")
            .enable_all()
            .build()?;

        let capacity = self.settings.host_pool_capacity;
        let hosts: Box<dyn Hosts> = match self.hosts {
            Some(hosts) => hosts,
            None => Box::new(HostPool::new(capacity)),
        };
        let protocols: Arc<dyn Protocols> = match self.protocols {
            Some(protocols) => protocols,
            None => Arc::new(|_: &Arc<Channel>| {}),
        };
        let core = Core::new(self.settings, hosts, protocols);

        let net = Net {
            manual: ManualSession::new(core.clone()),
            seed: SeedSession::new(core.clone()),
            inbound: InboundSession::new(core.clone()),
            outbound: OutboundSession::new(core.clone()),
            runtime,
            core,
        };

        net.attach(&net.manual);
        net.attach(&net.seed);
        net.attach(&net.inbound);
        net.attach(&net.outbound);
        Ok(net)
    }
}

/// A bitcoin P2P node.
///
/// All I/O runs on a runtime owned by the node. Results of the long running
/// operations are delivered to handlers, which run on runtime threads.
///
/// [`Net::close`] blocks until every task has finished, so it (and dropping
/// the node, which closes it) must not happen on a runtime thread.
pub struct Net {
    runtime: Runtime,
    core: Arc<Core>,
    manual: Arc<ManualSession>,
    seed: Arc<SeedSession>,
    inbound: Arc<InboundSession>,
    outbound: Arc<OutboundSession>,
}

impl Net {
    /// Build a node with an in-memory address pool and no application protocols.
    pub fn new(settings: Settings) -> io::Result<Self> {
        NetBuilder::new(settings).build()
    }

    fn attach<S: Session + 'static>(&self, session: &Arc<S>) {
        let session = Arc::downgrade(session);
        let _ = self.core.subscribe_stop(Box::new(move |_| {
            if let Some(session) = session.upgrade() {
                session.stop();
            }
        }));
    }

    /// Start the manual session, load the address book and seed it.
    ///
    /// `handler` receives the seeding outcome. A failure to load the address
    /// book is reported to `handler` but leaves the manual session running.
    pub fn start<F>(&self, handler: F)
    where
        F: FnOnce(Result<(), Error>) + Send + 'static,
    {
        if self.closed() {
            handler(Err(Error::ServiceStopped));
            return;
        }

        info!("Starting network");
        let core = self.core.clone();
        let manual = self.manual.clone();
        let seed = self.seed.clone();
        self.core.tracker().spawn_on(
            async move {
                if let Err(e) = manual.start() {
                    handler(Err(e));
                    return;
                }

                if let Err(e) = lock(&core.hosts).start() {
                    error!("Failed to load address book: {e}");
                    handler(Err(e));
                    return;
                }

                handler(seed.start().await);
            },
            self.runtime.handle(),
        );
    }

    /// Connect the configured peers, then start accepting and dialing.
    ///
    /// The first failing stage short circuits the rest and is reported to
    /// `handler`.
    pub fn run<F>(&self, handler: F)
    where
        F: FnOnce(Result<(), Error>) + Send + 'static,
    {
        if self.closed() {
            handler(Err(Error::ServiceStopped));
            return;
        }

        info!("Running network");
        let core = self.core.clone();
        let manual = self.manual.clone();
        let inbound = self.inbound.clone();
        let outbound = self.outbound.clone();
        self.core.tracker().spawn_on(
            async move {
                for peer in &core.settings().peers {
                    manual.connect(peer.clone(), None);
                }

                let result = match inbound.start().await {
                    Ok(()) => outbound.start(),
                    Err(e) => Err(e),
                };
                handler(result);
            },
            self.runtime.handle(),
        );
    }

    /// Keep `endpoint` connected until the node closes.
    ///
    /// `handler`, if any, sees the outcome of every attempt and finally
    /// [`Error::ServiceStopped`]. Requires a started node.
    pub fn connect(&self, endpoint: Endpoint, handler: Option<Handler<Arc<Channel>>>) {
        let _runtime = self.runtime.enter();
        self.manual.connect(endpoint, handler);
    }

    /// Be notified of every established channel, returns the subscription key.
    ///
    /// After close `handler` is invoked immediately with
    /// [`Error::ServiceStopped`]. Handlers run under the registry lock and
    /// must not call back into the subscription methods.
    pub fn subscribe_connect(&self, mut handler: RetainingHandler<Arc<Channel>>) -> u64 {
        let key = self.core.next_key();
        let mut subscribers = lock(&self.core.connect_subscribers);
        if subscribers.stopped() || self.closed() {
            drop(subscribers);
            handler(Err(Error::ServiceStopped));
            return key;
        }

        let _ = subscribers.subscribe(key, handler);
        key
    }

    /// Remove a connect subscription, notifying it with [`Error::Desubscribed`].
    pub fn unsubscribe_connect(&self, key: u64) -> bool {
        lock(&self.core.connect_subscribers).unsubscribe(&key)
    }

    /// Be notified once, with [`Error::ServiceStopped`], when the node closes.
    ///
    /// Invoked immediately if already closed.
    pub fn subscribe_close(&self, mut handler: Handler<()>) -> u64 {
        let key = self.core.next_key();
        let mut subscribers = lock(&self.core.close_subscribers);
        if subscribers.stopped() || self.closed() {
            drop(subscribers);
            handler(Err(Error::ServiceStopped));
            return key;
        }

        let _ = subscribers.subscribe(
            key,
            Box::new(move |result| {
                handler(result);
                true
            }),
        );
        key
    }

    /// Remove a close subscription, notifying it with [`Error::Desubscribed`].
    pub fn unsubscribe_close(&self, key: u64) -> bool {
        lock(&self.core.close_subscribers).unsubscribe(&key)
    }

    pub fn suspend_acceptors(&self) {
        info!("Suspending acceptors");
        self.core.accept_suspended.store(true, Ordering::Release);
    }

    pub fn resume_acceptors(&self) {
        info!("Resuming acceptors");
        self.core.accept_suspended.store(false, Ordering::Release);
    }

    pub fn suspend_connectors(&self) {
        info!("Suspending connectors");
        self.core.connect_suspended.store(true, Ordering::Release);
    }

    pub fn resume_connectors(&self) {
        info!("Resuming connectors");
        self.core.connect_suspended.store(false, Ordering::Release);
    }

    /// Whether acceptors or connectors are suspended.
    pub fn suspended(&self) -> bool {
        self.core.accept_suspended.load(Ordering::Acquire)
            || self.core.connect_suspended.load(Ordering::Acquire)
    }

    pub fn closed(&self) -> bool {
        self.core.closed()
    }

    pub fn settings(&self) -> &Settings {
        self.core.settings()
    }

    /// Number of counted channels.
    pub fn channel_count(&self) -> usize {
        self.core.channel_count()
    }

    /// Number of counted inbound channels.
    pub fn inbound_channel_count(&self) -> usize {
        self.core.inbound_count()
    }

    /// Number of addresses in the address book.
    pub fn address_count(&self) -> usize {
        self.core.host_count()
    }

    /// Number of reserved channel addresses.
    pub fn reserved_count(&self) -> usize {
        self.core.reserved_count()
    }

    /// Up to `limit` addresses from the address book.
    pub fn fetch_addresses(&self, limit: usize) -> Vec<Address> {
        self.core.fetch_hosts(limit)
    }

    /// Store addresses in the address book, returns how many were new.
    pub fn save_addresses(&self, addresses: &[Address]) -> usize {
        self.core.save_hosts(addresses)
    }

    /// Addresses the inbound session is accepting on.
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.inbound.local_addrs()
    }

    /// Stop every session and channel, wait for all tasks, then persist the
    /// address book. Idempotent.
    ///
    /// Blocks the calling thread, which must not be a runtime thread.
    pub fn close(&self) {
        if !self.core.close(Error::ServiceStopped) {
            return;
        }

        info!("Closing network");
        self.core.shutdown.cancel();
        self.core.tracker.close();
        self.runtime.block_on(self.core.tracker.wait());

        if let Err(e) = lock(&self.core.hosts).stop() {
            error!("Failed to save address book: {e}");
        }
        info!("Network closed");
    }
}

impl Drop for Net {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::Network;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::mpsc;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    fn core() -> Arc<Core> {
        Core::new(
            Settings::new(Network::Regtest),
            Box::new(HostPool::new(10)),
            Arc::new(|_: &Arc<Channel>| {}),
        )
    }

    fn authority(last: u8) -> Option<SocketAddr> {
        Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)), 8333))
    }

    fn settings() -> Settings {
        Settings::new(Network::Regtest)
            .with_threads(2)
            .with_outbound_connections(0)
    }

    #[test]
    fn test_count_rejects_duplicate_address() {
        let core = core();
        core.count(authority(1), false).unwrap();
        assert_eq!(core.count(authority(1), true), Err(Error::AddressInUse));
        assert_eq!(core.channel_count(), 1);
        assert_eq!(core.inbound_count(), 0);

        core.uncount(authority(1), false);
        assert_eq!(core.channel_count(), 0);
        assert_eq!(core.count(authority(1), true), Ok(()));
        assert_eq!(core.inbound_count(), 1);
    }

    #[test]
    fn test_concurrent_reservation_single_winner() {
        let core = core();
        let results: Vec<Result<(), Error>> = std::thread::scope(|scope| {
            let first = scope.spawn(|| core.count(authority(7), false));
            let second = scope.spawn(|| core.count(authority(7), true));
            vec![first.join().unwrap(), second.join().unwrap()]
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results.contains(&Err(Error::AddressInUse)));
        assert_eq!(core.channel_count(), 1);
        assert_eq!(core.reserved_count(), 1);
    }

    #[test]
    fn test_count_overflow_rejected() {
        let core = core();
        lock(&core.counts).total = usize::MAX;

        assert_eq!(core.count(authority(1), false), Err(Error::ChannelOverflow));
        assert_eq!(core.channel_count(), usize::MAX);
        // The reservation is released again.
        assert_eq!(core.reserved_count(), 0);
    }

    #[test]
    fn test_uncount_tolerates_underflow() {
        let core = core();
        core.uncount(authority(1), true);
        assert_eq!(core.channel_count(), 0);
        assert_eq!(core.inbound_count(), 0);
    }

    #[test]
    fn test_admission_holds_inbound_slot() {
        let core = Core::new(
            Settings::new(Network::Regtest).with_inbound_connections(2),
            Box::new(HostPool::new(10)),
            Arc::new(|_: &Arc<Channel>| {}),
        );

        // A burst of accepted sockets, none of them counted yet.
        let first = core.admit().unwrap();
        let second = core.admit().unwrap();
        assert!(core.admit().is_none());
        assert_eq!(core.inbound_count(), 0);

        drop(first);
        let third = core.admit().unwrap();
        core.count(authority(1), true).unwrap();
        drop(second);
        drop(third);

        let fourth = core.admit().unwrap();
        assert!(core.admit().is_none());
        drop(fourth);
        assert!(core.admit().is_some());
    }

    #[test]
    fn test_nonces() {
        let core = core();
        assert!(!core.is_loopback(5));
        core.store_nonce(5);
        assert!(core.is_loopback(5));
        core.unstore_nonce(5);
        assert!(!core.is_loopback(5));
    }

    #[test]
    fn test_seeding_unsuccessful_without_seeds() {
        let net = Net::new(settings().with_minimum_address_count(1)).unwrap();
        let (sender, receiver) = mpsc::channel();
        net.start(move |result| sender.send(result).unwrap());

        assert_eq!(
            receiver.recv_timeout(WAIT).unwrap(),
            Err(Error::SeedingUnsuccessful)
        );
    }

    #[test]
    fn test_seeding_skipped_with_zero_capacity() {
        let cached = Address::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 1);
        let net = NetBuilder::new(
            settings()
                .with_host_pool_capacity(0)
                .with_seed("127.0.0.1:1")
                .unwrap(),
        )
        .with_hosts(HostPool::with_addresses(0, [cached]))
        .build()
        .unwrap();

        let (sender, receiver) = mpsc::channel();
        net.start(move |result| sender.send(result).unwrap());
        assert_eq!(receiver.recv_timeout(WAIT).unwrap(), Ok(()));
        assert_eq!(net.address_count(), 1);
    }

    #[test]
    fn test_start_twice_fails() {
        let net = Net::new(settings().with_host_pool_capacity(0)).unwrap();
        let (sender, receiver) = mpsc::channel();

        let first = sender.clone();
        net.start(move |result| first.send(result).unwrap());
        assert_eq!(receiver.recv_timeout(WAIT).unwrap(), Ok(()));

        net.start(move |result| sender.send(result).unwrap());
        assert_eq!(
            receiver.recv_timeout(WAIT).unwrap(),
            Err(Error::OperationFailed)
        );
    }

    #[test]
    fn test_close_is_idempotent_and_notifies() {
        let net = Net::new(settings()).unwrap();
        let (sender, receiver) = mpsc::channel();

        let closing = sender.clone();
        net.subscribe_close(Box::new(move |result| {
            closing.send(result.err()).unwrap();
        }));
        net.close();
        net.close();

        assert_eq!(receiver.recv_timeout(WAIT).unwrap(), Some(Error::ServiceStopped));
        assert!(receiver.try_recv().is_err());
        assert!(net.closed());

        // Late subscriptions and operations fail synchronously.
        net.subscribe_connect(Box::new(move |result| {
            sender.send(result.err()).unwrap();
            false
        }));
        assert_eq!(receiver.try_recv().unwrap(), Some(Error::ServiceStopped));

        let (started, start_result) = mpsc::channel();
        net.start(move |result| started.send(result).unwrap());
        assert_eq!(start_result.try_recv().unwrap(), Err(Error::ServiceStopped));
    }

    #[test]
    fn test_unsubscribe_connect() {
        let net = Net::new(settings()).unwrap();
        let (sender, receiver) = mpsc::channel();
        let key = net.subscribe_connect(Box::new(move |result| {
            sender.send(result.err()).unwrap();
            true
        }));

        assert!(net.unsubscribe_connect(key));
        assert!(!net.unsubscribe_connect(key));
        assert_eq!(receiver.recv_timeout(WAIT).unwrap(), Some(Error::Desubscribed));
    }

    #[test]
    fn test_suspension_flags() {
        let net = Net::new(settings()).unwrap();
        assert!(!net.suspended());

        net.suspend_connectors();
        assert!(net.suspended());
        net.suspend_acceptors();
        net.resume_connectors();
        assert!(net.suspended());
        net.resume_acceptors();
        assert!(!net.suspended());
    }

    #[test]
    fn test_connect_before_start_stops_handler() {
        let net = Net::new(settings()).unwrap();
        let (sender, receiver) = mpsc::channel();
        net.connect(
            Endpoint::new("127.0.0.1", 1),
            Some(Box::new(move |result| {
                sender.send(result.err()).unwrap();
            })),
        );
        assert_eq!(receiver.recv_timeout(WAIT).unwrap(), Some(Error::ServiceStopped));
    }
}
