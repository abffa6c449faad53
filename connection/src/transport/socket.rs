//! Variant-typed socket over a plain, TLS or websocket upgraded TCP stream.

use crate::address::Endpoint;
use crate::error::Error;
use crate::transport::socks5;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::io::{self, AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, ServerConfig};
use tokio_rustls::{TlsAcceptor, TlsConnector, TlsStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;

type Tls = TlsStream<TcpStream>;
type Websocket = WebSocketStream<TcpStream>;
type SecureWebsocket = WebSocketStream<Tls>;

/// Read chunk used while scanning for line and header delimiters.
const SCAN_CHUNK_SIZE: usize = 1024;

/// The receive half of whichever transport variant is active.
enum ReadHalf {
    Plain(OwnedReadHalf),
    Tls(io::ReadHalf<Tls>),
    Websocket(SplitStream<Websocket>),
    SecureWebsocket(SplitStream<SecureWebsocket>),
}

/// The send half of whichever transport variant is active.
enum WriteHalf {
    Plain(OwnedWriteHalf),
    Tls(io::WriteHalf<Tls>),
    Websocket(SplitSink<Websocket, Message>),
    SecureWebsocket(SplitSink<SecureWebsocket, Message>),
}

/// A whole byte stream, reunited for an upgrade.
enum Stream {
    Plain(TcpStream),
    Tls(Tls),
}

/// Receive half plus bytes read past a line or header delimiter.
struct Reader {
    half: ReadHalf,
    pending: Vec<u8>,
}

impl Reader {
    fn new(half: ReadHalf) -> Self {
        Self {
            half,
            pending: Vec::new(),
        }
    }

    /// Read at least one byte into `buffer`.
    ///
    /// Cancellation safe: a single underlying read either completes or
    /// transfers nothing.
    async fn read_some(&mut self, buffer: &mut [u8]) -> Result<usize, Error> {
        if buffer.is_empty() {
            return Ok(0);
        }

        if !self.pending.is_empty() {
            let count = buffer.len().min(self.pending.len());
            buffer[..count].copy_from_slice(&self.pending[..count]);
            self.pending.drain(..count);
            return Ok(count);
        }

        let count = match &mut self.half {
            ReadHalf::Plain(half) => half.read(buffer).await?,
            ReadHalf::Tls(half) => half.read(buffer).await?,
            ReadHalf::Websocket(_) | ReadHalf::SecureWebsocket(_) => {
                return Err(Error::BadStream)
            }
        };

        if count == 0 {
            return Err(Error::PeerDisconnect);
        }

        Ok(count)
    }

    async fn read_exact(&mut self, buffer: &mut [u8]) -> Result<(), Error> {
        let mut filled = 0;
        while filled < buffer.len() {
            filled += self.read_some(&mut buffer[filled..]).await?;
        }

        Ok(())
    }

    /// Read through `delimiter`, returning everything up to and including it.
    async fn read_until(&mut self, delimiter: &[u8], limit: usize) -> Result<Vec<u8>, Error> {
        let mut chunk = [0u8; SCAN_CHUNK_SIZE];
        loop {
            if let Some(position) = self
                .pending
                .windows(delimiter.len())
                .position(|window| window == delimiter)
            {
                let rest = self.pending.split_off(position + delimiter.len());
                return Ok(std::mem::replace(&mut self.pending, rest));
            }

            if self.pending.len() > limit {
                return Err(Error::OversizedPayload);
            }

            let count = match &mut self.half {
                ReadHalf::Plain(half) => half.read(&mut chunk).await?,
                ReadHalf::Tls(half) => half.read(&mut chunk).await?,
                ReadHalf::Websocket(_) | ReadHalf::SecureWebsocket(_) => {
                    return Err(Error::BadStream)
                }
            };

            if count == 0 {
                return Err(Error::PeerDisconnect);
            }

            self.pending.extend_from_slice(&chunk[..count]);
        }
    }

    /// Next data frame of a websocket, skipping control frames.
    async fn next_frame(&mut self) -> Result<Vec<u8>, Error> {
        loop {
            let message = match &mut self.half {
                ReadHalf::Websocket(stream) => stream.next().await,
                ReadHalf::SecureWebsocket(stream) => stream.next().await,
                ReadHalf::Plain(_) | ReadHalf::Tls(_) => return Err(Error::BadStream),
            };

            match message {
                Some(Ok(Message::Binary(data))) => return Ok(data),
                Some(Ok(Message::Text(text))) => return Ok(text.into_bytes()),
                Some(Ok(Message::Close(_))) | None => return Err(Error::PeerDisconnect),
                Some(Ok(_)) => continue,
                Some(Err(_)) => return Err(Error::BadStream),
            }
        }
    }
}

impl WriteHalf {
    async fn write_all(&mut self, data: &[u8]) -> Result<(), Error> {
        match self {
            WriteHalf::Plain(half) => {
                half.write_all(data).await?;
                half.flush().await?;
            }
            WriteHalf::Tls(half) => {
                half.write_all(data).await?;
                half.flush().await?;
            }
            WriteHalf::Websocket(_) | WriteHalf::SecureWebsocket(_) => {
                return Err(Error::BadStream)
            }
        }

        Ok(())
    }

    async fn send_frame(&mut self, message: Message) -> Result<(), Error> {
        let result = match self {
            WriteHalf::Websocket(sink) => sink.send(message).await,
            WriteHalf::SecureWebsocket(sink) => sink.send(message).await,
            WriteHalf::Plain(_) | WriteHalf::Tls(_) => return Err(Error::BadStream),
        };

        result.map_err(|_| Error::BadStream)
    }
}

/// One accepted or connected transport connection.
///
/// The socket is shared (`Arc`) between its owner and any in-flight
/// operations. Reads and writes use separate halves so a pending read never
/// blocks a write. Every operation races the socket's cancellation token:
/// once [`stop`](Socket::stop) is called, pending and future operations
/// complete with [`Error::OperationCanceled`].
pub struct Socket {
    inbound: bool,
    proxied: bool,
    target: Endpoint,
    address: OnceLock<SocketAddr>,
    secure: AtomicBool,
    websocket: AtomicBool,
    stopped: AtomicBool,
    cancel: CancellationToken,
    reader: Arc<Mutex<Option<Reader>>>,
    writer: Arc<Mutex<Option<WriteHalf>>>,
}

impl Socket {
    /// Wrap a stream returned by a listener.
    pub fn accepted(stream: TcpStream, address: SocketAddr) -> Self {
        let _ = stream.set_nodelay(true);
        let (read, write) = stream.into_split();
        Self {
            inbound: true,
            proxied: false,
            target: Endpoint::from(address),
            address: OnceLock::from(address),
            secure: AtomicBool::new(false),
            websocket: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            reader: Arc::new(Mutex::new(Some(Reader::new(ReadHalf::Plain(read))))),
            writer: Arc::new(Mutex::new(Some(WriteHalf::Plain(write)))),
        }
    }

    /// An unconnected outbound socket for `target`.
    ///
    /// A `proxied` socket keeps `target` as its logical endpoint after
    /// connecting, instead of the physically dialed proxy address.
    pub fn outbound(target: Endpoint, proxied: bool) -> Self {
        Self {
            inbound: false,
            proxied,
            target,
            address: OnceLock::new(),
            secure: AtomicBool::new(false),
            websocket: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            reader: Arc::new(Mutex::new(None)),
            writer: Arc::new(Mutex::new(None)),
        }
    }

    /// Connect to the first reachable address, trying them in order.
    pub async fn connect(&self, addresses: &[SocketAddr]) -> Result<(), Error> {
        if addresses.is_empty() {
            return Err(Error::ResolveFailed);
        }

        if self.address.get().is_some() {
            return Err(Error::OperationFailed);
        }

        for address in addresses {
            match self.guard(dial(*address)).await {
                Ok(stream) => {
                    let (read, write) = stream.into_split();
                    self.install(ReadHalf::Plain(read), WriteHalf::Plain(write))
                        .await;
                    let _ = self.address.set(*address);
                    return Ok(());
                }
                Err(Error::OperationCanceled) => return Err(Error::OperationCanceled),
                Err(_) => continue,
            }
        }

        Err(Error::ConnectFailed)
    }

    /// Fill `buffer` completely from the byte stream.
    ///
    /// Partial transfers are never reported. Not available on websockets.
    pub async fn read(&self, buffer: &mut [u8]) -> Result<(), Error> {
        self.guard(async {
            match self.reader.lock().await.as_mut() {
                Some(reader) => reader.read_exact(buffer).await,
                None => Err(Error::BadStream),
            }
        })
        .await
    }

    /// Read at least one byte into `buffer`, returning the count.
    ///
    /// Cancellation safe, for callers keeping partial frames across
    /// `select!` iterations.
    pub async fn read_some(&self, buffer: &mut [u8]) -> Result<usize, Error> {
        self.guard(async {
            match self.reader.lock().await.as_mut() {
                Some(reader) => reader.read_some(buffer).await,
                None => Err(Error::BadStream),
            }
        })
        .await
    }

    /// Read one newline terminated line (RPC over TCP), without the terminator.
    pub async fn read_line(&self, limit: usize) -> Result<String, Error> {
        let mut line = self.read_delimited(b"\n", limit).await?;
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }

        String::from_utf8(line).map_err(|_| Error::InvalidMessage)
    }

    /// Read an HTTP request or response head through the blank line.
    pub async fn read_http_head(&self, limit: usize) -> Result<String, Error> {
        let head = self.read_delimited(b"\r\n\r\n", limit).await?;
        String::from_utf8(head).map_err(|_| Error::InvalidMessage)
    }

    async fn read_delimited(&self, delimiter: &[u8], limit: usize) -> Result<Vec<u8>, Error> {
        self.guard(async {
            match self.reader.lock().await.as_mut() {
                Some(reader) => reader.read_until(delimiter, limit).await,
                None => Err(Error::BadStream),
            }
        })
        .await
    }

    /// Write all of `data` to the byte stream.
    pub async fn write(&self, data: &[u8]) -> Result<(), Error> {
        self.guard(async {
            match self.writer.lock().await.as_mut() {
                Some(writer) => writer.write_all(data).await,
                None => Err(Error::BadStream),
            }
        })
        .await
    }

    /// Read the next websocket data frame.
    pub async fn ws_read(&self) -> Result<Vec<u8>, Error> {
        self.guard(async {
            match self.reader.lock().await.as_mut() {
                Some(reader) => reader.next_frame().await,
                None => Err(Error::BadStream),
            }
        })
        .await
    }

    /// Write one binary websocket frame.
    pub async fn ws_write(&self, data: &[u8]) -> Result<(), Error> {
        self.guard(async {
            match self.writer.lock().await.as_mut() {
                Some(writer) => writer.send_frame(Message::Binary(data.to_vec())).await,
                None => Err(Error::BadStream),
            }
        })
        .await
    }

    /// Run the server side TLS handshake over the plain stream.
    pub async fn tls_accept(&self, config: Arc<ServerConfig>) -> Result<(), Error> {
        self.guard(self.upgrade_tls_accept(config)).await
    }

    /// Run the client side TLS handshake over the plain stream.
    pub async fn tls_connect(&self, config: Arc<ClientConfig>, domain: &str) -> Result<(), Error> {
        let name = ServerName::try_from(domain.to_string()).map_err(|_| Error::ResolveFailed)?;
        self.guard(self.upgrade_tls_connect(config, name)).await
    }

    /// Run the server side websocket upgrade over the plain or TLS stream.
    pub async fn ws_accept(&self) -> Result<(), Error> {
        self.guard(self.upgrade_ws_accept()).await
    }

    /// Run the client side websocket upgrade for `url`.
    pub async fn ws_connect(&self, url: &str) -> Result<(), Error> {
        self.guard(self.upgrade_ws_connect(url)).await
    }

    async fn upgrade_tls_accept(&self, config: Arc<ServerConfig>) -> Result<(), Error> {
        let Stream::Plain(stream) = self.take_stream().await? else {
            return Err(Error::BadStream);
        };

        let stream = TlsAcceptor::from(config)
            .accept(stream)
            .await
            .map_err(|_| Error::BadStream)?;
        self.install_tls(TlsStream::Server(stream)).await;
        Ok(())
    }

    async fn upgrade_tls_connect(
        &self,
        config: Arc<ClientConfig>,
        name: ServerName<'static>,
    ) -> Result<(), Error> {
        let Stream::Plain(stream) = self.take_stream().await? else {
            return Err(Error::BadStream);
        };

        let stream = TlsConnector::from(config)
            .connect(name, stream)
            .await
            .map_err(|_| Error::BadStream)?;
        self.install_tls(TlsStream::Client(stream)).await;
        Ok(())
    }

    async fn upgrade_ws_accept(&self) -> Result<(), Error> {
        match self.take_stream().await? {
            Stream::Plain(stream) => {
                let (sink, stream) = tokio_tungstenite::accept_async(stream)
                    .await
                    .map_err(|_| Error::BadStream)?
                    .split();
                self.install(ReadHalf::Websocket(stream), WriteHalf::Websocket(sink))
                    .await;
            }
            Stream::Tls(stream) => {
                let (sink, stream) = tokio_tungstenite::accept_async(stream)
                    .await
                    .map_err(|_| Error::BadStream)?
                    .split();
                self.install(
                    ReadHalf::SecureWebsocket(stream),
                    WriteHalf::SecureWebsocket(sink),
                )
                .await;
            }
        }

        self.websocket.store(true, Ordering::Release);
        Ok(())
    }

    async fn upgrade_ws_connect(&self, url: &str) -> Result<(), Error> {
        match self.take_stream().await? {
            Stream::Plain(stream) => {
                let (socket, _) = tokio_tungstenite::client_async(url, stream)
                    .await
                    .map_err(|_| Error::BadStream)?;
                let (sink, stream) = socket.split();
                self.install(ReadHalf::Websocket(stream), WriteHalf::Websocket(sink))
                    .await;
            }
            Stream::Tls(stream) => {
                let (socket, _) = tokio_tungstenite::client_async(url, stream)
                    .await
                    .map_err(|_| Error::BadStream)?;
                let (sink, stream) = socket.split();
                self.install(
                    ReadHalf::SecureWebsocket(stream),
                    WriteHalf::SecureWebsocket(sink),
                )
                .await;
            }
        }

        self.websocket.store(true, Ordering::Release);
        Ok(())
    }

    /// Tunnel the connected plain stream to `target` through a SOCKS5 proxy.
    pub(crate) async fn tunnel(&self, target: &Endpoint) -> Result<(), Error> {
        self.guard(async {
            let mut reader = self.reader.lock().await;
            let mut writer = self.writer.lock().await;
            match (reader.as_mut(), writer.as_mut()) {
                (
                    Some(Reader {
                        half: ReadHalf::Plain(read),
                        ..
                    }),
                    Some(WriteHalf::Plain(write)),
                ) => socks5::handshake(read, write, target).await,
                _ => Err(Error::BadStream),
            }
        })
        .await
    }

    /// Cancel pending operations and close the transport.
    ///
    /// Idempotent and callable from any thread. Closing may complete
    /// asynchronously when an operation currently holds a half.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        self.cancel.cancel();

        if let (Ok(mut reader), Ok(mut writer)) = (self.reader.try_lock(), self.writer.try_lock())
        {
            reader.take();
            writer.take();
            return;
        }

        // A cancelled operation still holds a half, release once it returns.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let reader = self.reader.clone();
            let writer = self.writer.clone();
            handle.spawn(async move {
                reader.lock().await.take();
                writer.lock().await.take();
            });
        }
    }

    /// Stop, sending a websocket close frame first if upgraded.
    pub async fn lazy_stop(&self) {
        if self.websocket() && !self.stopped() {
            let _ = self
                .guard(async {
                    match self.writer.lock().await.as_mut() {
                        Some(writer) => writer.send_frame(Message::Close(None)).await,
                        None => Ok(()),
                    }
                })
                .await;
        }

        self.stop();
    }

    pub fn inbound(&self) -> bool {
        self.inbound
    }

    pub fn proxied(&self) -> bool {
        self.proxied
    }

    /// Whether the stream has been upgraded to TLS.
    pub fn secure(&self) -> bool {
        self.secure.load(Ordering::Acquire)
    }

    /// Whether the stream has been upgraded to websocket framing.
    pub fn websocket(&self) -> bool {
        self.websocket.load(Ordering::Acquire)
    }

    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// The physically connected peer address, once connected.
    pub fn address(&self) -> Option<SocketAddr> {
        self.address.get().copied()
    }

    /// The logical peer endpoint.
    ///
    /// The connected address for direct connections, the originally
    /// requested target for proxied or not yet connected sockets.
    pub fn endpoint(&self) -> Endpoint {
        match self.address.get() {
            Some(address) if !self.proxied => Endpoint::from(*address),
            _ => self.target.clone(),
        }
    }

    /// The address identifying the remote peer for deduplication.
    ///
    /// `None` for a proxied hostname target, the proxy's own address never
    /// identifies the peer.
    pub fn authority(&self) -> Option<SocketAddr> {
        if self.proxied {
            return self.target.socket_addr();
        }

        self.endpoint().socket_addr().or_else(|| self.address())
    }

    /// Run `operation` unless the socket stops first.
    async fn guard<T, F>(&self, operation: F) -> Result<T, Error>
    where
        F: Future<Output = Result<T, Error>>,
    {
        if self.stopped() {
            return Err(Error::OperationCanceled);
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::OperationCanceled),
            result = operation => result,
        }
    }

    async fn install(&self, read: ReadHalf, write: WriteHalf) {
        *self.reader.lock().await = Some(Reader::new(read));
        *self.writer.lock().await = Some(write);
    }

    async fn install_tls(&self, stream: Tls) {
        let (read, write) = io::split(stream);
        self.install(ReadHalf::Tls(read), WriteHalf::Tls(write)).await;
        self.secure.store(true, Ordering::Release);
    }

    /// Take both halves out of the socket and reunite them for an upgrade.
    async fn take_stream(&self) -> Result<Stream, Error> {
        if self.websocket() {
            return Err(Error::BadStream);
        }

        let mut reader = self.reader.lock().await;
        let mut writer = self.writer.lock().await;

        // Bytes buffered past a delimiter would be lost to the upgrade.
        if reader.as_ref().is_some_and(|reader| !reader.pending.is_empty()) {
            return Err(Error::BadStream);
        }

        match (reader.take(), writer.take()) {
            (
                Some(Reader {
                    half: ReadHalf::Plain(read),
                    ..
                }),
                Some(WriteHalf::Plain(write)),
            ) => read
                .reunite(write)
                .map(Stream::Plain)
                .map_err(|_| Error::BadStream),
            (
                Some(Reader {
                    half: ReadHalf::Tls(read),
                    ..
                }),
                Some(WriteHalf::Tls(write)),
            ) => Ok(Stream::Tls(read.unsplit(write))),
            _ => Err(Error::BadStream),
        }
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("endpoint", &self.endpoint())
            .field("inbound", &self.inbound)
            .field("proxied", &self.proxied)
            .field("secure", &self.secure())
            .field("websocket", &self.websocket())
            .field("stopped", &self.stopped())
            .finish()
    }
}

async fn dial(address: SocketAddr) -> Result<TcpStream, Error> {
    let stream = TcpStream::connect(address).await?;
    let _ = stream.set_nodelay(true);
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn pair() -> (Socket, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let socket = Socket::outbound(Endpoint::from(address), false);
        let addresses = [address];
        let (connected, accepted) = tokio::join!(socket.connect(&addresses), listener.accept());
        connected.unwrap();
        (socket, accepted.unwrap().0)
    }

    #[tokio::test]
    async fn test_read_fills_whole_buffer() {
        let (socket, mut remote) = pair().await;

        remote.write_all(b"hel").await.unwrap();
        let writer = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            remote.write_all(b"lo").await.unwrap();
            remote
        });

        let mut buffer = [0u8; 5];
        socket.read(&mut buffer).await.unwrap();
        assert_eq!(&buffer, b"hello");
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_write_reaches_peer() {
        let (socket, mut remote) = pair().await;
        socket.write(b"ping").await.unwrap();

        let mut buffer = [0u8; 4];
        remote.read_exact(&mut buffer).await.unwrap();
        assert_eq!(&buffer, b"ping");
    }

    #[tokio::test]
    async fn test_read_line_keeps_remainder() {
        let (socket, mut remote) = pair().await;
        remote.write_all(b"first\r\nsecond\nrest").await.unwrap();

        assert_eq!(socket.read_line(64).await.unwrap(), "first");
        assert_eq!(socket.read_line(64).await.unwrap(), "second");

        let mut rest = [0u8; 4];
        socket.read(&mut rest).await.unwrap();
        assert_eq!(&rest, b"rest");
    }

    #[tokio::test]
    async fn test_read_line_limit() {
        let (socket, mut remote) = pair().await;
        remote.write_all(&[b'a'; 64]).await.unwrap();

        assert_eq!(socket.read_line(16).await, Err(Error::OversizedPayload));
    }

    #[tokio::test]
    async fn test_read_http_head() {
        let (socket, mut remote) = pair().await;
        remote
            .write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\nbody")
            .await
            .unwrap();

        let head = socket.read_http_head(1024).await.unwrap();
        assert_eq!(head, "GET / HTTP/1.1\r\nHost: x\r\n\r\n");
    }

    #[tokio::test]
    async fn test_peer_close_is_disconnect() {
        let (socket, remote) = pair().await;
        drop(remote);

        let mut buffer = [0u8; 1];
        assert_eq!(socket.read(&mut buffer).await, Err(Error::PeerDisconnect));
    }

    #[tokio::test]
    async fn test_stop_cancels_pending_read() {
        let (socket, _remote) = pair().await;
        let socket = Arc::new(socket);

        let reading = socket.clone();
        let pending = tokio::spawn(async move {
            let mut buffer = [0u8; 8];
            reading.read(&mut buffer).await
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        socket.stop();
        socket.stop();

        assert_eq!(pending.await.unwrap(), Err(Error::OperationCanceled));
        assert!(socket.stopped());
        assert_eq!(socket.write(b"x").await, Err(Error::OperationCanceled));
    }

    #[tokio::test]
    async fn test_connect_tries_in_order() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let good = listener.local_addr().unwrap();

        // Bind then drop to get a port nobody listens on.
        let closed = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap()
            .local_addr()
            .unwrap();

        let socket = Socket::outbound(Endpoint::new("localhost", good.port()), false);
        socket.connect(&[closed, good]).await.unwrap();
        assert_eq!(socket.address(), Some(good));
        assert_eq!(socket.endpoint(), Endpoint::from(good));
        assert!(!socket.inbound());
    }

    #[tokio::test]
    async fn test_connect_no_addresses() {
        let socket = Socket::outbound(Endpoint::new("example.com", 8333), false);
        assert_eq!(socket.connect(&[]).await, Err(Error::ResolveFailed));
    }

    #[tokio::test]
    async fn test_proxied_endpoint_is_target() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy = listener.local_addr().unwrap();
        let target = Endpoint::new("node.example", 8333);

        let socket = Socket::outbound(target.clone(), true);
        socket.connect(&[proxy]).await.unwrap();
        assert_eq!(socket.address(), Some(proxy));
        assert_eq!(socket.endpoint(), target);
    }

    #[tokio::test]
    async fn test_proxied_authority_is_never_the_proxy() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy = listener.local_addr().unwrap();

        let first = Socket::outbound(Endpoint::new("seed-a.example", 8333), true);
        let second = Socket::outbound(Endpoint::new("seed-b.example", 8333), true);
        first.connect(&[proxy]).await.unwrap();
        second.connect(&[proxy]).await.unwrap();
        assert_eq!(first.address(), Some(proxy));
        assert_eq!(first.authority(), None);
        assert_eq!(second.authority(), None);

        let literal: SocketAddr = "10.0.0.1:8333".parse().unwrap();
        let third = Socket::outbound(Endpoint::from(literal), true);
        third.connect(&[proxy]).await.unwrap();
        assert_eq!(third.authority(), Some(literal));
    }

    fn tls_configs() -> (Arc<ServerConfig>, Arc<ClientConfig>) {
        use tokio_rustls::rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
        use tokio_rustls::rustls::RootCertStore;

        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));

        let server = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert.der().clone()], key)
            .unwrap();

        let mut roots = RootCertStore::empty();
        roots.add(cert.der().clone()).unwrap();
        let client = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();

        (Arc::new(server), Arc::new(client))
    }

    #[tokio::test]
    async fn test_tls_then_websocket_upgrade() {
        let (server_config, client_config) = tls_configs();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            let socket = Socket::accepted(stream, peer);
            socket.tls_accept(server_config).await.unwrap();
            assert!(socket.secure());

            let mut buffer = [0u8; 5];
            socket.read(&mut buffer).await.unwrap();
            socket.write(&buffer).await.unwrap();

            socket.ws_accept().await.unwrap();
            let frame = socket.ws_read().await.unwrap();
            socket.ws_write(&frame).await.unwrap();
            socket
        });

        let client = Socket::outbound(Endpoint::from(address), false);
        client.connect(&[address]).await.unwrap();
        client.tls_connect(client_config, "localhost").await.unwrap();
        assert!(client.secure());
        assert!(!client.websocket());

        client.write(b"hello").await.unwrap();
        let mut buffer = [0u8; 5];
        client.read(&mut buffer).await.unwrap();
        assert_eq!(&buffer, b"hello");

        client.ws_connect("wss://localhost/").await.unwrap();
        assert!(client.secure());
        assert!(client.websocket());

        client.ws_write(b"echo").await.unwrap();
        assert_eq!(client.ws_read().await.unwrap(), b"echo".to_vec());
        assert_eq!(client.write(b"x").await, Err(Error::BadStream));

        // A second TLS upgrade has no plain stream to work on.
        let (_, again) = tls_configs();
        assert_eq!(
            client.tls_connect(again, "localhost").await,
            Err(Error::BadStream)
        );

        let server = server.await.unwrap();
        assert!(server.secure());
        assert!(server.websocket());
    }

    #[tokio::test]
    async fn test_websocket_ops_rejected_on_plain() {
        let (socket, _remote) = pair().await;
        assert_eq!(socket.ws_write(b"x").await, Err(Error::BadStream));
        assert!(!socket.secure());
        assert!(!socket.websocket());
    }

    #[tokio::test]
    async fn test_websocket_upgrade() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            let socket = Socket::accepted(stream, peer);
            socket.ws_accept().await.unwrap();
            let frame = socket.ws_read().await.unwrap();
            socket.ws_write(&frame).await.unwrap();
            socket
        });

        let client = Socket::outbound(Endpoint::from(address), false);
        client.connect(&[address]).await.unwrap();
        client
            .ws_connect(&format!("ws://{address}/"))
            .await
            .unwrap();
        assert!(client.websocket());

        client.ws_write(b"echo").await.unwrap();
        assert_eq!(client.ws_read().await.unwrap(), b"echo".to_vec());

        let mut buffer = [0u8; 1];
        assert_eq!(client.read(&mut buffer).await, Err(Error::BadStream));

        client.lazy_stop().await;
        assert!(client.stopped());
        let server = server.await.unwrap();
        assert!(server.inbound());
    }
}
