use clap::Parser;
use spvwallet::bitcoin::Network;
use spvwallet::chain::HeaderChain;
use spvwallet::p2p::{PeerConfig, PeerConnection, PeerEvent};
use std::time::Duration;

/// Follows the header chain of a peer and prints every new tip.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// mainnet, testnet or regtest.
    #[clap(long, default_value = "mainnet")]
    network: String,
    /// The peer to use, as host or host:port.
    #[clap(index = 1)]
    peer: String,
    /// Stop after this many seconds.
    #[clap(long, default_value_t = 60)]
    seconds: u64,
}

#[tokio::main]
async fn main() -> spvwallet::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let args: Args = Args::parse();
    let network: Network = args.network.parse()?;
    let mut chain = HeaderChain::new(network);
    let addr = if args.peer.contains(':') {
        args.peer.clone()
    } else {
        format!("{}:{}", args.peer, network.default_port())
    };
    let (peer, mut events) =
        PeerConnection::connect(&addr, PeerConfig::default_for(network), 0).await?;
    peer.get_headers(chain.locator()).await?;

    let deadline = tokio::time::sleep(Duration::from_secs(args.seconds));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = events.recv() => match event {
                Some(PeerEvent::Headers(headers)) => {
                    let full = headers.len() >= spvwallet::p2p::MAX_HEADERS_RESULTS;
                    for header in headers {
                        chain.accept_header(header);
                    }
                    chain.take_unsaved();
                    println!("{} {}", chain.height(), chain.tip_hash());
                    if full {
                        peer.get_headers(chain.locator()).await?;
                    }
                }
                Some(PeerEvent::Disconnected(reason)) => {
                    eprintln!("peer went away: {}", reason);
                    break;
                }
                None => break,
                Some(_) => {}
            },
        }
    }
    peer.disconnect().await;
    Ok(())
}
