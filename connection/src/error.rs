//! Error codes shared by every layer of the peer engine.
//!
//! Asynchronous operations complete with an explicit [`Error`] code delivered to
//! their continuation (or returned from the awaited future). Codes are `Copy` so
//! a single terminal code can be fanned out to many subscribers.

use std::error;
use std::fmt;
use std::io;

/// Result code of a failed peer engine operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Error {
    // Shutdown signaling.
    /// The owning service has been stopped.
    ServiceStopped,
    /// The owning service is suspended, try again after resume.
    ServiceSuspended,
    /// The subscriber registry has been stopped.
    SubscriberStopped,
    /// A subscription with the same key already exists.
    SubscriberExists,
    /// The subscription was removed by its owner.
    Desubscribed,

    // Generic operation results.
    /// The operation could not be started in the current state.
    OperationFailed,
    /// The operation did not complete in time.
    OperationTimeout,
    /// The operation was canceled before completion.
    OperationCanceled,

    // Transport.
    /// Hostname resolution failed or produced no addresses.
    ResolveFailed,
    /// Every connection attempt failed.
    ConnectFailed,
    /// Accepting an inbound connection failed.
    AcceptFailed,
    /// The underlying stream failed or is not usable for this operation.
    BadStream,
    /// The remote peer closed or reset the connection.
    PeerDisconnect,

    // Remote protocol violations.
    /// The message heading could not be parsed.
    InvalidHeading,
    /// The message heading carried the wrong network magic.
    InvalidMagic,
    /// The heading announced a payload above the configured maximum.
    OversizedPayload,
    /// The payload checksum does not match the heading.
    InvalidChecksum,
    /// The payload could not be decoded as the announced message.
    InvalidMessage,
    /// The peer violated the expected message sequence.
    ProtocolViolation,
    /// The peer echoed one of our own nonces back (self connection).
    ConnectionLoop,

    // Local resource and state.
    /// The remote address is already held by another channel.
    AddressInUse,
    /// The channel counter cannot be incremented further.
    ChannelOverflow,
    /// The channel counter was decremented below zero.
    ChannelUnderflow,
    /// No usable address is available in the address pool.
    AddressNotFound,

    // Channel lifecycle.
    /// The channel reached the end of its configured lifetime.
    ChannelExpired,
    /// The channel received no message within the inactivity period.
    ChannelInactive,
    /// A channel level negotiation (handshake) timed out.
    ChannelTimeout,
    /// The channel has been stopped.
    ChannelStopped,

    // Sessions.
    /// Seeding finished without reaching the minimum address count.
    SeedingUnsuccessful,
}

impl Error {
    /// Codes which a session control loop retries or rotates past.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::ResolveFailed
                | Error::ConnectFailed
                | Error::AcceptFailed
                | Error::OperationTimeout
                | Error::OperationCanceled
                | Error::PeerDisconnect
                | Error::ServiceSuspended
        )
    }

    /// Codes caused by data received from an untrusted peer.
    ///
    /// These are always contained at the channel boundary.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            Error::InvalidHeading
                | Error::InvalidMagic
                | Error::OversizedPayload
                | Error::InvalidChecksum
                | Error::InvalidMessage
                | Error::ProtocolViolation
                | Error::ConnectionLoop
        )
    }

    /// Codes which signal an orderly shutdown rather than a failure.
    pub fn is_shutdown(&self) -> bool {
        matches!(
            self,
            Error::ServiceStopped
                | Error::SubscriberStopped
                | Error::Desubscribed
                | Error::ChannelStopped
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            Error::ServiceStopped => "service stopped",
            Error::ServiceSuspended => "service suspended",
            Error::SubscriberStopped => "subscriber stopped",
            Error::SubscriberExists => "subscriber key already exists",
            Error::Desubscribed => "desubscribed",
            Error::OperationFailed => "operation failed",
            Error::OperationTimeout => "operation timed out",
            Error::OperationCanceled => "operation canceled",
            Error::ResolveFailed => "failed to resolve hostname",
            Error::ConnectFailed => "unable to reach remote host",
            Error::AcceptFailed => "failed to accept connection",
            Error::BadStream => "bad stream",
            Error::PeerDisconnect => "peer disconnected",
            Error::InvalidHeading => "invalid message heading",
            Error::InvalidMagic => "invalid network magic",
            Error::OversizedPayload => "payload exceeds maximum size",
            Error::InvalidChecksum => "invalid payload checksum",
            Error::InvalidMessage => "invalid message payload",
            Error::ProtocolViolation => "protocol violation",
            Error::ConnectionLoop => "detected connection to self (matching nonce)",
            Error::AddressInUse => "address already in use",
            Error::ChannelOverflow => "channel count overflow",
            Error::ChannelUnderflow => "channel count underflow",
            Error::AddressNotFound => "address not found",
            Error::ChannelExpired => "channel expired",
            Error::ChannelInactive => "channel inactive",
            Error::ChannelTimeout => "channel timed out",
            Error::ChannelStopped => "channel stopped",
            Error::SeedingUnsuccessful => "seeding unsuccessful",
        };

        f.write_str(message)
    }
}

impl error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected => Error::PeerDisconnect,
            io::ErrorKind::TimedOut => Error::OperationTimeout,
            io::ErrorKind::AddrInUse => Error::AddressInUse,
            io::ErrorKind::ConnectionRefused | io::ErrorKind::AddrNotAvailable => {
                Error::ConnectFailed
            }
            _ => Error::BadStream,
        }
    }
}
