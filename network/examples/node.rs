//! Run a node for a while and log the channels it establishes.

use bitcoin::Network;
use bitcoin_peers_network::{Channel, Net, Settings};
use clap::Parser;
use log::LevelFilter;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Network to join (bitcoin, testnet, signet or regtest).
    #[arg(short, long, default_value = "bitcoin")]
    network: Network,

    /// Seed to harvest addresses from, as host:port (repeatable).
    #[arg(short, long)]
    seed: Vec<String>,

    /// Peer to keep connected, as host:port (repeatable).
    #[arg(short, long)]
    peer: Vec<String>,

    /// Address to accept inbound connections on (repeatable).
    #[arg(short, long)]
    bind: Vec<SocketAddr>,

    /// Maximum number of inbound channels.
    #[arg(long, default_value = "0")]
    inbound: usize,

    /// Number of outbound channels to maintain.
    #[arg(long, default_value = "8")]
    outbound: usize,

    /// SOCKS5 proxy for outbound connections, as host:port.
    #[arg(long)]
    socks5: Option<String>,

    /// Custom user agent (optional).
    #[arg(short, long)]
    user_agent: Option<String>,

    /// Seconds to run before closing.
    #[arg(short, long, default_value = "60")]
    duration: u64,

    /// Log level.
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let log_level = match args.log_level.to_lowercase().as_str() {
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    };

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}] {} - {}",
                record.level(),
                record.target(),
                message
            ))
        })
        .level(log_level)
        .chain(std::io::stderr())
        .apply()?;

    let mut settings = Settings::new(args.network)
        .with_inbound_connections(args.inbound)
        .with_outbound_connections(args.outbound);
    for seed in &args.seed {
        settings = settings.with_seed(seed)?;
    }
    for peer in &args.peer {
        settings = settings.with_peer(peer)?;
    }
    for bind in args.bind {
        settings = settings.with_bind(bind);
    }
    if let Some(proxy) = &args.socks5 {
        settings = settings.with_socks5(proxy)?;
    }
    if let Some(user_agent) = args.user_agent {
        log::debug!("Using custom user agent: {user_agent}");
        settings = settings.with_user_agent(user_agent)?;
    }

    let net = Net::new(settings)?;
    net.subscribe_connect(Box::new(|result: Result<Arc<Channel>, _>| match result {
        Ok(channel) => {
            let agent = channel
                .peer_version()
                .map(|version| version.user_agent.clone())
                .unwrap_or_default();
            log::info!(
                "Channel to {} established ({agent}, version {})",
                channel.endpoint(),
                channel.negotiated_version()
            );
            true
        }
        Err(e) => {
            log::info!("Connect subscription ended: {e}");
            false
        }
    }));

    let (sender, receiver) = std::sync::mpsc::channel();
    net.start(move |result| {
        let _ = sender.send(result);
    });
    match receiver.recv()? {
        Ok(()) => log::info!("Seeded with {} addresses", net.address_count()),
        Err(e) => log::warn!("Seeding failed: {e}"),
    }

    let (sender, receiver) = std::sync::mpsc::channel();
    net.run(move |result| {
        let _ = sender.send(result);
    });
    receiver.recv()??;
    log::info!("Listening on {:?}", net.local_addrs());

    std::thread::sleep(Duration::from_secs(args.duration));
    log::info!(
        "Closing with {} channels ({} inbound)",
        net.channel_count(),
        net.inbound_channel_count()
    );
    net.close();
    Ok(())
}
