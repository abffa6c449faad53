//! SOCKS5 client handshake (RFC 1928), CONNECT by domain name without authentication.

use crate::address::Endpoint;
use crate::error::Error;
use log::debug;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const VERSION: u8 = 0x05;
const METHOD_NO_AUTHENTICATION: u8 = 0x00;
const COMMAND_CONNECT: u8 = 0x01;
const RESERVED: u8 = 0x00;
const REPLY_SUCCEEDED: u8 = 0x00;

const ADDRESS_IPV4: u8 = 0x01;
const ADDRESS_DOMAIN: u8 = 0x03;
const ADDRESS_IPV6: u8 = 0x04;

/// Ask the proxy on the other end of `reader`/`writer` to tunnel to `target`.
///
/// On success the stream carries the tunneled connection. Every malformed or
/// refused step fails with [`Error::ConnectFailed`], an unknown bound address
/// type with [`Error::OperationFailed`].
pub async fn handshake<R, W>(reader: &mut R, writer: &mut W, target: &Endpoint) -> Result<(), Error>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let host = target.host().as_bytes();
    let length = u8::try_from(host.len()).map_err(|_| Error::ConnectFailed)?;
    if length == 0 {
        return Err(Error::ConnectFailed);
    }

    // Greeting: one method offered, no authentication.
    send(writer, &[VERSION, 0x01, METHOD_NO_AUTHENTICATION]).await?;

    let mut choice = [0u8; 2];
    receive(reader, &mut choice).await?;
    if choice != [VERSION, METHOD_NO_AUTHENTICATION] {
        debug!("Proxy refused authentication method: {choice:?}");
        return Err(Error::ConnectFailed);
    }

    let mut request = Vec::with_capacity(7 + host.len());
    request.extend_from_slice(&[VERSION, COMMAND_CONNECT, RESERVED, ADDRESS_DOMAIN, length]);
    request.extend_from_slice(host);
    request.extend_from_slice(&target.port().to_be_bytes());
    send(writer, &request).await?;

    let mut reply = [0u8; 4];
    receive(reader, &mut reply).await?;
    if reply[0] != VERSION || reply[1] != REPLY_SUCCEEDED {
        debug!("Proxy refused connect to {target}: reply code {}", reply[1]);
        return Err(Error::ConnectFailed);
    }

    // Bound address and port, not needed by the caller.
    let bound = match reply[3] {
        ADDRESS_IPV4 => 4,
        ADDRESS_IPV6 => 16,
        ADDRESS_DOMAIN => {
            let mut length = [0u8; 1];
            receive(reader, &mut length).await?;
            usize::from(length[0])
        }
        other => {
            debug!("Proxy replied with unknown address type {other}");
            return Err(Error::OperationFailed);
        }
    };

    let mut discard = vec![0u8; bound + 2];
    receive(reader, &mut discard).await?;

    debug!("Proxy tunnel established to {target}");
    Ok(())
}

async fn send<W: AsyncWrite + Unpin>(writer: &mut W, data: &[u8]) -> Result<(), Error> {
    writer.write_all(data).await.map_err(|_| Error::ConnectFailed)?;
    writer.flush().await.map_err(|_| Error::ConnectFailed)
}

async fn receive<R: AsyncRead + Unpin>(reader: &mut R, buffer: &mut [u8]) -> Result<(), Error> {
    reader
        .read_exact(buffer)
        .await
        .map(|_| ())
        .map_err(|_| Error::ConnectFailed)
}
