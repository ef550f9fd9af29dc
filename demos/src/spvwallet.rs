use clap::{Parser, Subcommand};
use serde_json::json;
use spvwallet::bitcoin::{AddressKind, Network};
use spvwallet::wallet::{Wallet, WalletConfig};
use std::path::PathBuf;
use std::process::ExitCode;

/// A command line SPV wallet. Connects to one peer, syncs, runs the command and prints JSON.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// mainnet, testnet or regtest.
    #[clap(long, default_value = "testnet")]
    network: String,
    /// The peer to use, as host:port.
    #[clap(long)]
    peer: String,
    /// The BIP32 extended private key.
    #[clap(long, env = "SPV_HD_KEY", hide_env_values = true)]
    key: String,
    /// Where the wallet database is kept, in place of ./.spvwallet.
    #[clap(long, conflicts_with = "in_memory")]
    data_dir: Option<PathBuf>,
    /// Keep nothing on disk.
    #[clap(long)]
    in_memory: bool,
    /// Use base58 P2PKH addresses rather than bech32 witness addresses.
    #[clap(long)]
    legacy: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the confirmed and total balance.
    Balance,
    /// Print a receive address.
    Address {
        #[clap(default_value_t = 0)]
        index: u32,
    },
    /// List the unspent outputs.
    Unspent,
    /// List the transactions touching the wallet.
    History,
    /// Print the fee paid by every transaction.
    Fee,
    /// Pay an amount in satoshis to an address.
    Send { address: String, amount: u64 },
    /// Broadcast a raw transaction given as hex.
    Broadcast { raw: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let args: Args = Args::parse();
    match run(args).await {
        Ok(output) => {
            println!("{}", output);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}", json!({ "error": e.to_string() }));
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> spvwallet::Result<serde_json::Value> {
    let network: Network = args.network.parse()?;
    let mut config = WalletConfig::default_for(network, &args.peer, &args.key);
    if let Some(dir) = args.data_dir {
        config = config.with_data_dir(dir);
    }
    if args.in_memory {
        config = config.in_memory();
    }
    if args.legacy {
        config.address_kind = AddressKind::P2pkh;
    }
    let wallet = Wallet::connect(config).await?;
    let output = match args.command {
        Command::Balance => {
            let balance = wallet.get_balance_detail().await;
            json!({
                "confirmed": balance.confirmed.as_sat(),
                "total": balance.unconfirmed.as_sat(),
                "height": wallet.status().height,
            })
        }
        Command::Address { index } => {
            json!({ "address": wallet.get_receive_address(index).await? })
        }
        Command::Unspent => json!(wallet.unspent().await),
        Command::History => {
            let records: Vec<_> = wallet
                .transactions()
                .await
                .iter()
                .map(|r| json!({ "txid": r.txid, "status": r.status, "height": r.height }))
                .collect();
            json!(records)
        }
        Command::Fee => json!({ "fee": wallet.get_fee() }),
        Command::Send { address, amount } => {
            json!({ "txid": wallet.send_to_address(&address, amount, network).await? })
        }
        Command::Broadcast { raw } => {
            json!({ "txid": wallet.broadcast_transaction(&raw, network).await? })
        }
    };
    wallet.shutdown().await;
    Ok(output)
}
