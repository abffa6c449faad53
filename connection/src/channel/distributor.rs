//! Per-channel fan out of decoded messages to command subscribers.

use crate::channel::heading::{Heading, HEADING_SIZE};
use crate::error::Error;
use crate::subscriber::{RetainingHandler, Unsubscriber};
use bitcoin::consensus::encode;
use bitcoin::p2p::message::{NetworkMessage, RawNetworkMessage};
use bitcoin::p2p::Magic;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Handler of one message command, returns whether it stays subscribed.
pub type MessageHandler = RetainingHandler<Arc<NetworkMessage>>;

struct Inner {
    subscribers: HashMap<String, Unsubscriber<Arc<NetworkMessage>>>,
    stopped: Option<Error>,
}

/// Maps message commands to subscriber lists.
///
/// Payloads are only decoded when the command has subscribers. Handlers run
/// without the distributor lock held, so they may subscribe further handlers
/// or stop the channel from inside a notification.
pub struct Distributor {
    magic: Magic,
    inner: Mutex<Inner>,
}

impl Distributor {
    pub fn new(magic: Magic) -> Self {
        Self {
            magic,
            inner: Mutex::new(Inner {
                subscribers: HashMap::new(),
                stopped: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe `handler` to messages with `command` (e.g. `"ping"`).
    pub fn subscribe(&self, command: &str, handler: MessageHandler) -> Result<(), Error> {
        let mut inner = self.lock();
        if inner.stopped.is_some() {
            return Err(Error::SubscriberStopped);
        }

        inner
            .subscribers
            .entry(command.to_string())
            .or_default()
            .subscribe(handler)
    }

    /// Whether any handler is subscribed to `command`.
    pub fn subscribed(&self, command: &str) -> bool {
        self.lock()
            .subscribers
            .get(command)
            .is_some_and(|subscribers| !subscribers.is_empty())
    }

    /// Decode and deliver one message.
    ///
    /// Fails with [`Error::InvalidMessage`] if the payload does not decode as
    /// the announced command.
    pub fn notify(&self, heading: &Heading, payload: &[u8]) -> Result<(), Error> {
        let detached = {
            let mut inner = self.lock();
            if inner.stopped.is_some() {
                return Ok(());
            }

            match inner.subscribers.remove(&heading.command) {
                Some(subscribers) => subscribers,
                None => return Ok(()),
            }
        };

        match decode(self.magic, &heading.command, payload) {
            Ok(message) => {
                let mut detached = detached;
                detached.notify(Arc::new(message));
                self.reattach(&heading.command, detached);
                Ok(())
            }
            Err(e) => {
                self.reattach(&heading.command, detached);
                Err(e)
            }
        }
    }

    /// Merge detached subscribers back in behind any added meanwhile.
    fn reattach(&self, command: &str, mut detached: Unsubscriber<Arc<NetworkMessage>>) {
        let mut inner = self.lock();
        if let Some(code) = inner.stopped {
            drop(inner);
            detached.stop(code);
            return;
        }

        if let Some(later) = inner.subscribers.remove(command) {
            detached.absorb(later);
        }

        if !detached.is_empty() {
            inner.subscribers.insert(command.to_string(), detached);
        }
    }

    /// Notify every subscriber once with `code` and refuse new subscriptions.
    pub fn stop(&self, code: Error) {
        let subscribers = {
            let mut inner = self.lock();
            if inner.stopped.is_some() {
                return;
            }

            inner.stopped = Some(code);
            std::mem::take(&mut inner.subscribers)
        };

        for (_, mut subscribers) in subscribers {
            subscribers.stop(code);
        }
    }

    pub fn stopped(&self) -> bool {
        self.lock().stopped.is_some()
    }
}

/// Decode a payload with the consensus codec.
fn decode(magic: Magic, command: &str, payload: &[u8]) -> Result<NetworkMessage, Error> {
    // The codec verifies a checksum, the heading's was already checked (or
    // deliberately skipped) by the reader.
    let heading = Heading::for_payload(magic, command, payload);
    let mut bytes = Vec::with_capacity(HEADING_SIZE + payload.len());
    bytes.extend_from_slice(&heading.encode());
    bytes.extend_from_slice(payload);

    let raw: RawNetworkMessage =
        encode::deserialize(&bytes).map_err(|_| Error::InvalidMessage)?;
    Ok(raw.into_payload())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heading_for(message: &NetworkMessage) -> (Heading, Vec<u8>) {
        let bytes = encode::serialize(&RawNetworkMessage::new(Magic::BITCOIN, message.clone()));
        let heading = Heading::decode(bytes[..HEADING_SIZE].try_into().unwrap()).unwrap();
        (heading, bytes[HEADING_SIZE..].to_vec())
    }

    fn collect(
        distributor: &Distributor,
        command: &str,
        retain: bool,
    ) -> Arc<Mutex<Vec<Result<Arc<NetworkMessage>, Error>>>> {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = calls.clone();
        distributor
            .subscribe(
                command,
                Box::new(move |result| {
                    sink.lock().unwrap().push(result);
                    retain
                }),
            )
            .unwrap();
        calls
    }

    #[test]
    fn test_routes_by_command() {
        let distributor = Distributor::new(Magic::BITCOIN);
        let pings = collect(&distributor, "ping", true);
        let pongs = collect(&distributor, "pong", true);

        let (heading, payload) = heading_for(&NetworkMessage::Ping(5));
        distributor.notify(&heading, &payload).unwrap();

        let pings = pings.lock().unwrap();
        assert_eq!(pings.len(), 1);
        assert_eq!(**pings[0].as_ref().unwrap(), NetworkMessage::Ping(5));
        assert!(pongs.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unsubscribed_commands_not_decoded() {
        let distributor = Distributor::new(Magic::BITCOIN);
        let heading = Heading::for_payload(Magic::BITCOIN, "ping", b"garbage!!");
        assert_eq!(distributor.notify(&heading, b"garbage!!"), Ok(()));

        let _pings = collect(&distributor, "ping", true);
        assert_eq!(
            distributor.notify(&heading, b"garbage!!"),
            Err(Error::InvalidMessage)
        );
        assert!(distributor.subscribed("ping"));
    }

    #[test]
    fn test_handler_returning_false_is_removed() {
        let distributor = Distributor::new(Magic::BITCOIN);
        let once = collect(&distributor, "verack", false);

        let (heading, payload) = heading_for(&NetworkMessage::Verack);
        distributor.notify(&heading, &payload).unwrap();
        distributor.notify(&heading, &payload).unwrap();

        assert_eq!(once.lock().unwrap().len(), 1);
        assert!(!distributor.subscribed("verack"));
    }

    #[test]
    fn test_subscribe_from_handler() {
        let distributor = Arc::new(Distributor::new(Magic::BITCOIN));
        let later = Arc::new(Mutex::new(0));

        let inner = distributor.clone();
        let counter = later.clone();
        distributor
            .subscribe(
                "ping",
                Box::new(move |_| {
                    let counter = counter.clone();
                    inner
                        .subscribe(
                            "ping",
                            Box::new(move |_| {
                                *counter.lock().unwrap() += 1;
                                true
                            }),
                        )
                        .unwrap();
                    false
                }),
            )
            .unwrap();

        let (heading, payload) = heading_for(&NetworkMessage::Ping(1));
        distributor.notify(&heading, &payload).unwrap();
        assert_eq!(*later.lock().unwrap(), 0);
        distributor.notify(&heading, &payload).unwrap();
        assert_eq!(*later.lock().unwrap(), 1);
    }

    #[test]
    fn test_stop_notifies_once_and_silences() {
        let distributor = Distributor::new(Magic::BITCOIN);
        let pings = collect(&distributor, "ping", true);

        distributor.stop(Error::ChannelStopped);
        distributor.stop(Error::ServiceStopped);

        let (heading, payload) = heading_for(&NetworkMessage::Ping(1));
        distributor.notify(&heading, &payload).unwrap();

        let pings = pings.lock().unwrap();
        assert_eq!(pings.len(), 1);
        assert_eq!(pings[0].as_ref().err(), Some(&Error::ChannelStopped));
        assert_eq!(
            distributor.subscribe("ping", Box::new(|_| true)),
            Err(Error::SubscriberStopped)
        );
    }

    #[test]
    fn test_stop_from_handler() {
        let distributor = Arc::new(Distributor::new(Magic::BITCOIN));
        let calls = Arc::new(Mutex::new(Vec::new()));

        let inner = distributor.clone();
        let sink = calls.clone();
        distributor
            .subscribe(
                "ping",
                Box::new(move |result| {
                    sink.lock().unwrap().push(result.is_ok());
                    if result.is_ok() {
                        inner.stop(Error::ProtocolViolation);
                    }
                    true
                }),
            )
            .unwrap();

        let (heading, payload) = heading_for(&NetworkMessage::Ping(1));
        distributor.notify(&heading, &payload).unwrap();

        // Delivered, then stopped on reattach.
        assert_eq!(*calls.lock().unwrap(), vec![true, false]);
    }
}
