use crate::net::Core;
use bitcoin::p2p::message::NetworkMessage;
use bitcoin_peers_connection::{Address, Channel, Error, MessageHandler};
use log::debug;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;

/// Progress of one seed channel.
struct Harvest {
    saved: usize,
    done: Option<oneshot::Sender<()>>,
}

/// Ask a handshaked, paused channel for addresses and store the answer.
///
/// Every `addr`/`addrv2` message is saved. The first carrying more than one
/// record is taken as the `getaddr` response (a lone record is usually the
/// peer announcing itself) and ends the request, as does
/// `seeding_timeout`. The channel is stopped afterwards and the number of
/// new addresses returned.
pub(crate) async fn seed(core: &Arc<Core>, channel: &Arc<Channel>) -> usize {
    let (sender, receiver) = oneshot::channel();
    let harvest = Arc::new(Mutex::new(Harvest {
        saved: 0,
        done: Some(sender),
    }));

    for command in ["addr", "addrv2"] {
        if channel
            .subscribe(command, harvester(core, harvest.clone()))
            .is_err()
        {
            return 0;
        }
    }

    channel.post(NetworkMessage::GetAddr);
    channel.resume();

    let timeout = core.settings().seeding_timeout;
    tokio::select! {
        _ = tokio::time::timeout(timeout, receiver) => {}
        _ = channel.closed() => {}
    }
    channel.stop(Error::ChannelStopped);

    let saved = harvest
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .saved;
    debug!("Seeded {saved} addresses from {}", channel.endpoint());
    saved
}

fn harvester(core: &Arc<Core>, harvest: Arc<Mutex<Harvest>>) -> MessageHandler {
    let core = Arc::downgrade(core);

    Box::new(move |result| {
        let mut harvest = harvest.lock().unwrap_or_else(PoisonError::into_inner);
        let (Ok(message), Some(core)) = (result, core.upgrade()) else {
            harvest.done.take();
            return false;
        };

        let (records, addresses): (usize, Vec<Address>) = match message.as_ref() {
            NetworkMessage::Addr(entries) => (
                entries.len(),
                entries
                    .iter()
                    .filter_map(|(time, address)| Address::from_legacy(*time, address))
                    .collect(),
            ),
            NetworkMessage::AddrV2(entries) => (
                entries.len(),
                entries.iter().filter_map(Address::from_addrv2).collect(),
            ),
            _ => return true,
        };

        harvest.saved += core.save_hosts(&addresses);
        if records > 1 {
            if let Some(done) = harvest.done.take() {
                let _ = done.send(());
            }
        }
        true
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hosts::HostPool;
    use crate::settings::Settings;
    use bitcoin::consensus::encode;
    use bitcoin::p2p::address::{AddrV2, AddrV2Message, Address as LegacyAddress};
    use bitcoin::p2p::message::RawNetworkMessage;
    use bitcoin::p2p::{Magic, ServiceFlags};
    use bitcoin::Network;
    use bitcoin_peers_connection::{Endpoint, Socket};
    use std::net::{Ipv4Addr, SocketAddr};
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::net::{TcpListener, TcpStream};
    use tokio_util::sync::CancellationToken;
    use tokio_util::task::TaskTracker;

    async fn pair(core: &Core) -> (Arc<Channel>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let socket = Socket::outbound(Endpoint::from(address), false);
        let addresses = [address];
        let (connected, accepted) = tokio::join!(socket.connect(&addresses), listener.accept());
        connected.unwrap();

        let channel = Channel::new(
            Arc::new(socket),
            core.settings().channel_settings(),
            &TaskTracker::new(),
            &CancellationToken::new(),
        );
        (channel, accepted.unwrap().0)
    }

    fn frame(message: NetworkMessage) -> Vec<u8> {
        encode::serialize(&RawNetworkMessage::new(Magic::REGTEST, message))
    }

    fn legacy(last: u8) -> (u32, LegacyAddress) {
        let address = SocketAddr::new(Ipv4Addr::new(10, 0, 0, last).into(), 18444);
        (1, LegacyAddress::new(&address, ServiceFlags::NETWORK))
    }

    #[tokio::test]
    async fn test_saves_response_and_stops() {
        let settings = Settings::new(Network::Regtest);
        let core = Core::new(
            settings,
            Box::new(HostPool::new(100)),
            Arc::new(|_: &Arc<Channel>| {}),
        );
        let (channel, mut remote) = pair(&core).await;

        // Self announcement, then the real response.
        remote
            .write_all(&frame(NetworkMessage::Addr(vec![legacy(1)])))
            .await
            .unwrap();
        let addrv2 = vec![
            AddrV2Message {
                time: 1,
                services: ServiceFlags::NETWORK,
                addr: AddrV2::Ipv4(Ipv4Addr::new(10, 0, 0, 2)),
                port: 18444,
            },
            AddrV2Message {
                time: 1,
                services: ServiceFlags::NETWORK,
                addr: AddrV2::TorV3([7u8; 32]),
                port: 18444,
            },
        ];
        remote
            .write_all(&frame(NetworkMessage::AddrV2(addrv2)))
            .await
            .unwrap();

        // The undialable onion record is dropped, the pair above saved.
        let saved = seed(&core, &channel).await;
        assert_eq!(saved, 2);
        assert_eq!(core.host_count(), 2);
        assert_eq!(channel.stop_code(), Some(Error::ChannelStopped));
    }

    #[tokio::test]
    async fn test_silent_peer_times_out() {
        let settings =
            Settings::new(Network::Regtest).with_seeding_timeout(Duration::from_millis(50));
        let core = Core::new(
            settings,
            Box::new(HostPool::new(100)),
            Arc::new(|_: &Arc<Channel>| {}),
        );
        let (channel, _remote) = pair(&core).await;

        assert_eq!(seed(&core, &channel).await, 0);
        assert!(channel.stopped());
    }
}
