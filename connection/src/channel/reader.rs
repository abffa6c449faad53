//! Framed message reader for the channel receive loop.

use crate::channel::configuration::ChannelSettings;
use crate::channel::heading::{is_http_or_tls, Heading, HEADING_SIZE};
use crate::error::Error;
use crate::transport::Socket;
use bitcoin::p2p::Magic;
use log::{log, Level};

/// State machine for [`FrameReader::read`].
///
/// Keeps partial progress so the read can be interrupted by `select!` (a
/// pause, a timer) and resumed later without losing bytes.
#[derive(Debug)]
enum ReceiveState {
    /// Reading the fixed size heading.
    ReadingHeading {
        heading: [u8; HEADING_SIZE],
        bytes_read: usize,
    },
    /// Reading the payload announced by a validated heading.
    ReadingPayload { heading: Heading, bytes_read: usize },
}

impl ReceiveState {
    fn reading_heading() -> Self {
        ReceiveState::ReadingHeading {
            heading: [0u8; HEADING_SIZE],
            bytes_read: 0,
        }
    }
}

/// Reads heading and payload pairs off a socket, enforcing framing limits.
#[derive(Debug)]
pub(crate) struct FrameReader {
    settings: ChannelSettings,
    state: ReceiveState,
    payload: Vec<u8>,
}

impl FrameReader {
    pub(crate) fn new(settings: ChannelSettings) -> Self {
        let payload = Vec::with_capacity(settings.minimum_buffer);
        Self {
            settings,
            state: ReceiveState::reading_heading(),
            payload,
        }
    }

    /// Read the next message, its payload is then available from [`payload`].
    ///
    /// Cancellation safe. Violations are logged at `level`.
    ///
    /// [`payload`]: FrameReader::payload
    pub(crate) async fn read(&mut self, socket: &Socket, level: Level) -> Result<Heading, Error> {
        loop {
            match &mut self.state {
                ReceiveState::ReadingHeading {
                    heading: bytes,
                    bytes_read,
                } => {
                    while *bytes_read < HEADING_SIZE {
                        *bytes_read += socket.read_some(&mut bytes[*bytes_read..]).await?;
                    }

                    let bytes = *bytes;
                    self.state = ReceiveState::reading_heading();
                    let heading = self.validate(&bytes, socket, level)?;

                    // Allocate only after the size passed validation.
                    self.payload.clear();
                    self.payload.resize(heading.payload_size as usize, 0);
                    self.state = ReceiveState::ReadingPayload {
                        heading,
                        bytes_read: 0,
                    };
                }

                ReceiveState::ReadingPayload {
                    heading,
                    bytes_read,
                } => {
                    while *bytes_read < self.payload.len() {
                        *bytes_read += socket
                            .read_some(&mut self.payload[*bytes_read..])
                            .await?;
                    }

                    let heading = heading.clone();
                    self.state = ReceiveState::reading_heading();

                    if self.settings.validate_checksum && !heading.verify(&self.payload) {
                        log!(level, "Invalid {} checksum from {}", heading.command, socket.endpoint());
                        return Err(Error::InvalidChecksum);
                    }

                    return Ok(heading);
                }
            }
        }
    }

    fn validate(
        &self,
        bytes: &[u8; HEADING_SIZE],
        socket: &Socket,
        level: Level,
    ) -> Result<Heading, Error> {
        let magic = Magic::from_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if magic != self.settings.magic {
            if is_http_or_tls(bytes) {
                log!(level, "HTTP/HTTPS magic from {}", socket.endpoint());
            } else {
                log!(level, "Invalid magic {magic:?} from {}", socket.endpoint());
            }
            return Err(Error::InvalidMagic);
        }

        let heading = Heading::decode(bytes).map_err(|e| {
            log!(level, "Invalid heading from {}", socket.endpoint());
            e
        })?;

        if heading.payload_size as usize > self.settings.maximum_payload {
            log!(
                level,
                "Oversized {} payload of {} bytes from {}",
                heading.command,
                heading.payload_size,
                socket.endpoint()
            );
            return Err(Error::OversizedPayload);
        }

        Ok(heading)
    }

    /// The payload of the last message read.
    pub(crate) fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Release payload capacity beyond the configured minimum.
    pub(crate) fn reclaim(&mut self) {
        if self.payload.capacity() > self.settings.minimum_buffer {
            self.payload.clear();
            self.payload.shrink_to(self.settings.minimum_buffer);
        }
    }

    /// Currently reserved payload capacity.
    pub(crate) fn capacity(&self) -> usize {
        self.payload.capacity()
    }
}
