use crate::error::Error;
use crate::transport::Socket;
use log::{debug, info};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Listens on one bound endpoint and hands out inbound sockets.
pub struct Acceptor {
    listener: OnceLock<TcpListener>,
    suspended: Arc<AtomicBool>,
    stopped: AtomicBool,
    cancel: CancellationToken,
}

impl Acceptor {
    /// Create an acceptor observing the shared `suspended` flag.
    ///
    /// Cancelling `parent` stops the acceptor.
    pub fn new(suspended: Arc<AtomicBool>, parent: &CancellationToken) -> Self {
        Self {
            listener: OnceLock::new(),
            suspended,
            stopped: AtomicBool::new(false),
            cancel: parent.child_token(),
        }
    }

    /// Bind the listening endpoint, which may only happen once.
    pub async fn start(&self, bind: SocketAddr) -> Result<(), Error> {
        if self.stopped() {
            return Err(Error::ServiceStopped);
        }

        if self.listener.get().is_some() {
            return Err(Error::OperationFailed);
        }

        let listener = TcpListener::bind(bind).await?;
        let local = listener.local_addr()?;
        self.listener
            .set(listener)
            .map_err(|_| Error::OperationFailed)?;

        info!("Accepting connections on {local}");
        Ok(())
    }

    /// Wait for the next inbound connection.
    ///
    /// Fails immediately, without touching the network, with
    /// [`Error::ServiceSuspended`] or [`Error::ServiceStopped`].
    pub async fn accept(&self) -> Result<Arc<Socket>, Error> {
        if self.stopped() {
            return Err(Error::ServiceStopped);
        }

        if self.suspended.load(Ordering::Acquire) {
            return Err(Error::ServiceSuspended);
        }

        let Some(listener) = self.listener.get() else {
            return Err(Error::OperationFailed);
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::ServiceStopped),
            accepted = listener.accept() => match accepted {
                Ok((stream, address)) => {
                    debug!("Accepted connection from {address}");
                    Ok(Arc::new(Socket::accepted(stream, address)))
                }
                Err(e) => {
                    debug!("Accept failed: {e}");
                    Err(Error::AcceptFailed)
                }
            },
        }
    }

    /// The bound address, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener
            .get()
            .and_then(|listener| listener.local_addr().ok())
    }

    /// Stop accepting, idempotent.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            self.cancel.cancel();
        }
    }

    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire) || self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpStream;

    fn acceptor() -> (Acceptor, Arc<AtomicBool>) {
        let suspended = Arc::new(AtomicBool::new(false));
        (
            Acceptor::new(suspended.clone(), &CancellationToken::new()),
            suspended,
        )
    }

    #[tokio::test]
    async fn test_accept_inbound_socket() {
        let (acceptor, _) = acceptor();
        acceptor.start("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let local = acceptor.local_addr().unwrap();

        let (accepted, connected) = tokio::join!(acceptor.accept(), TcpStream::connect(local));
        let socket = accepted.unwrap();
        let client = connected.unwrap();

        assert!(socket.inbound());
        assert_eq!(socket.address(), Some(client.local_addr().unwrap()));
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let (acceptor, _) = acceptor();
        acceptor.start("127.0.0.1:0".parse().unwrap()).await.unwrap();
        assert_eq!(
            acceptor.start("127.0.0.1:0".parse().unwrap()).await,
            Err(Error::OperationFailed)
        );
    }

    #[tokio::test]
    async fn test_suspended_and_stopped_fail_fast() {
        let (acceptor, suspended) = acceptor();
        acceptor.start("127.0.0.1:0".parse().unwrap()).await.unwrap();

        suspended.store(true, Ordering::Release);
        assert_eq!(acceptor.accept().await.err(), Some(Error::ServiceSuspended));

        suspended.store(false, Ordering::Release);
        acceptor.stop();
        acceptor.stop();
        assert_eq!(acceptor.accept().await.err(), Some(Error::ServiceStopped));
    }

    #[tokio::test]
    async fn test_stop_wakes_pending_accept() {
        let (acceptor, _) = acceptor();
        let acceptor = Arc::new(acceptor);
        acceptor.start("127.0.0.1:0".parse().unwrap()).await.unwrap();

        let pending = {
            let acceptor = acceptor.clone();
            tokio::spawn(async move { acceptor.accept().await.err() })
        };

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        acceptor.stop();
        assert_eq!(pending.await.unwrap(), Some(Error::ServiceStopped));
    }

    #[tokio::test]
    async fn test_bind_in_use() {
        let (first, _) = acceptor();
        first.start("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let taken = first.local_addr().unwrap();

        let (second, _) = acceptor();
        assert_eq!(second.start(taken).await, Err(Error::AddressInUse));
    }
}
