use crate::address::Endpoint;
use crate::error::Error;
use crate::transport::Socket;
use log::debug;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::lookup_host;
use tokio_util::sync::CancellationToken;

/// Default timeout of one connection attempt, including any proxy handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Connector configuration.
#[derive(Debug, Clone)]
pub struct ConnectorSettings {
    /// Timeout of one attempt, resolution and proxy handshake included.
    pub timeout: Duration,
    /// SOCKS5 proxy dialed in place of every target.
    pub proxy: Option<Endpoint>,
}

impl Default for ConnectorSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_CONNECT_TIMEOUT,
            proxy: None,
        }
    }
}

impl ConnectorSettings {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_proxy(mut self, proxy: Endpoint) -> Self {
        self.proxy = Some(proxy);
        self
    }
}

/// A failed connection attempt.
///
/// Carries the socket when one was created, already stopped, so the caller
/// can observe its final state.
pub struct ConnectFailure {
    pub error: Error,
    pub socket: Option<Arc<Socket>>,
}

impl ConnectFailure {
    fn new(error: Error) -> Self {
        Self {
            error,
            socket: None,
        }
    }
}

impl fmt::Debug for ConnectFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectFailure")
            .field("error", &self.error)
            .field("socket", &self.socket.is_some())
            .finish()
    }
}

/// Makes one outbound connection attempt at a time.
pub struct Connector {
    settings: ConnectorSettings,
    suspended: Arc<AtomicBool>,
    busy: AtomicBool,
    stopped: AtomicBool,
    cancel: CancellationToken,
}

/// Clears the busy flag when the attempt ends, however it ends.
struct Attempt<'a>(&'a AtomicBool);

impl Drop for Attempt<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Connector {
    /// Create a connector observing the shared `suspended` flag.
    ///
    /// Cancelling `parent` stops the connector.
    pub fn new(
        settings: ConnectorSettings,
        suspended: Arc<AtomicBool>,
        parent: &CancellationToken,
    ) -> Self {
        Self {
            settings,
            suspended,
            busy: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            cancel: parent.child_token(),
        }
    }

    /// Connect to `target`, through the proxy if one is configured.
    ///
    /// A second call while an attempt is in flight fails with
    /// [`Error::OperationFailed`]. Timeout and cancellation stop the socket
    /// and report [`Error::OperationTimeout`] / [`Error::OperationCanceled`].
    pub async fn connect(&self, target: &Endpoint) -> Result<Arc<Socket>, ConnectFailure> {
        if self.stopped() {
            return Err(ConnectFailure::new(Error::ServiceStopped));
        }

        if self.suspended.load(Ordering::Acquire) {
            return Err(ConnectFailure::new(Error::ServiceSuspended));
        }

        if self.busy.swap(true, Ordering::AcqRel) {
            return Err(ConnectFailure::new(Error::OperationFailed));
        }
        let _attempt = Attempt(&self.busy);

        let proxied = self.settings.proxy.is_some();
        let socket = Arc::new(Socket::outbound(target.clone(), proxied));

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::OperationCanceled),
            result = tokio::time::timeout(self.settings.timeout, self.establish(&socket, target)) => {
                result.unwrap_or(Err(Error::OperationTimeout))
            }
        };

        match result {
            Ok(()) => {
                debug!("Connected to {target}");
                Ok(socket)
            }
            Err(error) => {
                debug!("Connect to {target} failed: {error}");
                socket.stop();
                Err(ConnectFailure {
                    error,
                    socket: Some(socket),
                })
            }
        }
    }

    async fn establish(&self, socket: &Socket, target: &Endpoint) -> Result<(), Error> {
        let dial = self.settings.proxy.as_ref().unwrap_or(target);
        let addresses = resolve(dial).await?;
        socket.connect(&addresses).await?;

        if self.settings.proxy.is_some() {
            socket.tunnel(target).await?;
        }

        Ok(())
    }

    /// Stop the connector, cancelling an in-flight attempt. Idempotent.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            self.cancel.cancel();
        }
    }

    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire) || self.cancel.is_cancelled()
    }
}

/// Resolve `endpoint` to candidate addresses, literals skip the resolver.
pub async fn resolve(endpoint: &Endpoint) -> Result<Vec<SocketAddr>, Error> {
    if let Some(address) = endpoint.socket_addr() {
        return Ok(vec![address]);
    }

    let addresses: Vec<SocketAddr> = lookup_host((endpoint.host(), endpoint.port()))
        .await
        .map_err(|_| Error::ResolveFailed)?
        .collect();

    if addresses.is_empty() {
        return Err(Error::ResolveFailed);
    }

    Ok(addresses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn connector(settings: ConnectorSettings) -> (Connector, Arc<AtomicBool>) {
        let suspended = Arc::new(AtomicBool::new(false));
        (
            Connector::new(settings, suspended.clone(), &CancellationToken::new()),
            suspended,
        )
    }

    #[tokio::test]
    async fn test_connect_literal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let (connector, _) = connector(ConnectorSettings::default());

        let socket = connector.connect(&Endpoint::from(address)).await.unwrap();
        assert_eq!(socket.address(), Some(address));
        assert!(!socket.proxied());
    }

    #[tokio::test]
    async fn test_connect_refused_returns_stopped_socket() {
        let closed = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap()
            .local_addr()
            .unwrap();
        let (connector, _) = connector(ConnectorSettings::default());

        let failure = connector.connect(&Endpoint::from(closed)).await.unwrap_err();
        assert_eq!(failure.error, Error::ConnectFailed);
        assert!(failure.socket.unwrap().stopped());
    }

    #[tokio::test]
    async fn test_suspended_fails_fast() {
        let (connector, suspended) = connector(ConnectorSettings::default());
        suspended.store(true, Ordering::Release);

        let failure = connector
            .connect(&Endpoint::new("127.0.0.1", 8333))
            .await
            .unwrap_err();
        assert_eq!(failure.error, Error::ServiceSuspended);
        assert!(failure.socket.is_none());
    }

    #[tokio::test]
    async fn test_busy_connector_rejects_second_attempt() {
        // A proxy which accepts but never answers the greeting.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy = Endpoint::from(listener.local_addr().unwrap());
        let (connector, _) = connector(
            ConnectorSettings::default()
                .with_timeout(Duration::from_millis(200))
                .with_proxy(proxy),
        );

        let target = Endpoint::new("node.example", 8333);
        let (first, second) = tokio::join!(connector.connect(&target), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            connector.connect(&target).await
        });

        assert_eq!(second.unwrap_err().error, Error::OperationFailed);
        let first = first.unwrap_err();
        assert_eq!(first.error, Error::OperationTimeout);
        assert!(first.socket.unwrap().stopped());
        drop(listener);
    }

    #[tokio::test]
    async fn test_stop_cancels_attempt() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy = Endpoint::from(listener.local_addr().unwrap());
        let (connector, _) = connector(ConnectorSettings::default().with_proxy(proxy));

        let target = Endpoint::new("node.example", 8333);
        let (result, _) = tokio::join!(connector.connect(&target), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            connector.stop();
        });

        assert_eq!(result.unwrap_err().error, Error::OperationCanceled);
        assert_eq!(
            connector.connect(&target).await.unwrap_err().error,
            Error::ServiceStopped
        );
    }

    #[tokio::test]
    async fn test_connect_through_proxy() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy = Endpoint::from(listener.local_addr().unwrap());

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut greeting = [0u8; 3];
            stream.read_exact(&mut greeting).await.unwrap();
            assert_eq!(greeting, [0x05, 0x01, 0x00]);
            stream.write_all(&[0x05, 0x00]).await.unwrap();

            let mut head = [0u8; 5];
            stream.read_exact(&mut head).await.unwrap();
            let mut rest = vec![0u8; head[4] as usize + 2];
            stream.read_exact(&mut rest).await.unwrap();
            stream
                .write_all(&[0x05, 0x00, 0x00, 0x01, 127, 0, 0, 1, 0x20, 0x8d])
                .await
                .unwrap();

            // Tunneled traffic.
            stream.write_all(b"tunneled").await.unwrap();
            rest
        });

        let (connector, _) = connector(ConnectorSettings::default().with_proxy(proxy.clone()));
        let target = Endpoint::new("node.example", 8333);
        let socket = connector.connect(&target).await.unwrap();

        assert!(socket.proxied());
        assert_eq!(socket.endpoint(), target);
        assert_ne!(socket.endpoint(), proxy);

        let mut buffer = [0u8; 8];
        socket.read(&mut buffer).await.unwrap();
        assert_eq!(&buffer, b"tunneled");

        let rest = server.await.unwrap();
        assert_eq!(&rest[..12], b"node.example");
        assert_eq!(&rest[12..], &8333u16.to_be_bytes());
    }

    #[tokio::test]
    async fn test_resolve_literal_skips_lookup() {
        let addresses = resolve(&Endpoint::new("10.0.0.1", 8333)).await.unwrap();
        assert_eq!(addresses, vec!["10.0.0.1:8333".parse().unwrap()]);
    }
}
