use bitcoin::p2p::message::NetworkMessage;
use bitcoin_peers_connection::Channel;
use std::sync::Arc;

/// Answer every `ping` with the matching `pong`.
pub(crate) fn attach_ping(channel: &Arc<Channel>) {
    let weak = Arc::downgrade(channel);
    let _ = channel.subscribe(
        "ping",
        Box::new(move |result| {
            let (Ok(message), Some(channel)) = (result, weak.upgrade()) else {
                return false;
            };

            if let NetworkMessage::Ping(nonce) = message.as_ref() {
                channel.post(NetworkMessage::Pong(*nonce));
            }
            true
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::consensus::encode;
    use bitcoin::p2p::message::RawNetworkMessage;
    use bitcoin::p2p::Magic;
    use bitcoin_peers_connection::{ChannelSettings, Endpoint, Socket};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio_util::sync::CancellationToken;
    use tokio_util::task::TaskTracker;

    #[tokio::test]
    async fn test_ping_answered_with_pong() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let socket = Socket::outbound(Endpoint::from(address), false);
        let addresses = [address];
        let (connected, accepted) = tokio::join!(socket.connect(&addresses), listener.accept());
        connected.unwrap();
        let mut remote = accepted.unwrap().0;

        let channel = Channel::new(
            Arc::new(socket),
            ChannelSettings::default(),
            &TaskTracker::new(),
            &CancellationToken::new(),
        );
        attach_ping(&channel);
        channel.resume();

        let ping = RawNetworkMessage::new(Magic::BITCOIN, NetworkMessage::Ping(42));
        remote.write_all(&encode::serialize(&ping)).await.unwrap();

        let pong = encode::serialize(&RawNetworkMessage::new(
            Magic::BITCOIN,
            NetworkMessage::Pong(42),
        ));
        let mut received = vec![0u8; pong.len()];
        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            remote.read_exact(&mut received),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(received, pong);
    }
}
