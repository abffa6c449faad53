//! Message heading codec.
//!
//! ```text
//! magic:4 | command:12 (ASCII, NUL padded) | payload size:4 (LE) | checksum:4
//! ```

use crate::error::Error;
use bitcoin::hashes::{sha256d, Hash};
use bitcoin::p2p::Magic;
use std::fmt;

/// Size of a message heading in bytes.
pub const HEADING_SIZE: usize = 24;

const COMMAND_OFFSET: usize = 4;
const COMMAND_SIZE: usize = 12;
const PAYLOAD_SIZE_OFFSET: usize = 16;
const CHECKSUM_OFFSET: usize = 20;

/// Leading bytes of plaintext HTTP requests sent to a P2P port.
const HTTP_METHODS: [&[u8; 4]; 4] = [b"GET ", b"POST", b"HEAD", b"PUT "];

/// A decoded message heading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heading {
    pub magic: Magic,
    pub command: String,
    pub payload_size: u32,
    pub checksum: [u8; 4],
}

impl Heading {
    /// The heading announcing `payload` as `command`.
    pub fn for_payload(magic: Magic, command: &str, payload: &[u8]) -> Self {
        Self {
            magic,
            command: command.to_string(),
            payload_size: payload.len() as u32,
            checksum: checksum(payload),
        }
    }

    /// Parse a heading, rejecting malformed commands with [`Error::InvalidHeading`].
    ///
    /// The magic value is not checked here, see [`Heading::magic`].
    pub fn decode(bytes: &[u8; HEADING_SIZE]) -> Result<Self, Error> {
        let command = &bytes[COMMAND_OFFSET..COMMAND_OFFSET + COMMAND_SIZE];
        let length = command
            .iter()
            .position(|byte| *byte == 0)
            .unwrap_or(COMMAND_SIZE);

        if length == 0
            || !command[..length].iter().all(|byte| byte.is_ascii_graphic())
            || command[length..].iter().any(|byte| *byte != 0)
        {
            return Err(Error::InvalidHeading);
        }

        Ok(Self {
            magic: Magic::from_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            command: String::from_utf8_lossy(&command[..length]).into_owned(),
            payload_size: u32::from_le_bytes([
                bytes[PAYLOAD_SIZE_OFFSET],
                bytes[PAYLOAD_SIZE_OFFSET + 1],
                bytes[PAYLOAD_SIZE_OFFSET + 2],
                bytes[PAYLOAD_SIZE_OFFSET + 3],
            ]),
            checksum: [
                bytes[CHECKSUM_OFFSET],
                bytes[CHECKSUM_OFFSET + 1],
                bytes[CHECKSUM_OFFSET + 2],
                bytes[CHECKSUM_OFFSET + 3],
            ],
        })
    }

    /// Serialize the heading, commands longer than 12 bytes are truncated.
    pub fn encode(&self) -> [u8; HEADING_SIZE] {
        let mut bytes = [0u8; HEADING_SIZE];
        bytes[..COMMAND_OFFSET].copy_from_slice(&self.magic.to_bytes());

        let command = self.command.as_bytes();
        let length = command.len().min(COMMAND_SIZE);
        bytes[COMMAND_OFFSET..COMMAND_OFFSET + length].copy_from_slice(&command[..length]);

        bytes[PAYLOAD_SIZE_OFFSET..CHECKSUM_OFFSET]
            .copy_from_slice(&self.payload_size.to_le_bytes());
        bytes[CHECKSUM_OFFSET..].copy_from_slice(&self.checksum);
        bytes
    }

    /// Whether `payload` matches the announced checksum.
    pub fn verify(&self, payload: &[u8]) -> bool {
        checksum(payload) == self.checksum
    }
}

impl fmt::Display for Heading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} bytes)", self.command, self.payload_size)
    }
}

/// The first four bytes of the payload's double SHA256.
pub fn checksum(payload: &[u8]) -> [u8; 4] {
    let hash = sha256d::Hash::hash(payload).to_byte_array();
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Whether the leading bytes look like an HTTP request or a TLS handshake.
pub fn is_http_or_tls(bytes: &[u8]) -> bool {
    if bytes.len() >= 2 && bytes[0] == 0x16 && bytes[1] == 0x03 {
        return true;
    }

    bytes.len() >= 4 && HTTP_METHODS.iter().any(|method| &bytes[..4] == *method)
}
