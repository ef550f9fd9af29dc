use crate::common::fake_peer::FakePeer;
use spvwallet::bitcoin::{
    Address, AddressKind, Hash, Network, Outpoint, Script, Tx, TxInput, TxOutput,
};
use spvwallet::wallet::WalletConfig;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// BIP32 test vector 1 master key, on testnet.
pub const TPRV: &str = "tprv8ZgxMBicQKsPeDgjzdC36fs6bMjGApWDNLR9erAXMs5skhMv36j9MV5ecvfavji5khqjWaWSFhN3YcCUUdiKH6isR4Pwy3U5y5egddBr16m";
/// The same key on mainnet.
pub const XPRV: &str = "xprv9s21ZrQH143K3QTDL4LXw2F7HEK3wJUD2nW2nRk4stbPy6cq3jPPqjiChkVvvNKmPGJxWUtg6LnF5kejMRNNU3TGtRBeJgk33yuGBxrMPHi";

/// m/44'/1'/0'/0/0 of [TPRV].
pub const RECEIVE_0: &str = "mr2WYNhNLNzTUmaSo9w5LKQDpth5umfk9Y";
/// m/44'/1'/0'/0/1 of [TPRV].
pub const RECEIVE_1: &str = "n3b3ebu35pK5AQ3dKHR27qHqCCrTSCHEaG";
/// m/44'/1'/0'/1/0 of [TPRV].
pub const CHANGE_0: &str = "mhXPHi3jSkzbyNzDA8HYxnBs14UhMGHTZe";
/// m/44'/1'/0'/0/0 of [TPRV] as a witness address.
pub const WITNESS_RECEIVE_0: &str = "tb1qwdyr6dtppn5ru3d6ue823pc5mmrag8548f7e54";
/// m/44'/1'/0'/1/0 of [TPRV] as a witness address.
pub const WITNESS_CHANGE_0: &str = "tb1qzcz3m9zvgjzhpdmtwz4n3w94t48wh8q2vr7d8n";
/// A testnet address the wallet does not own.
pub const FOREIGN: &str = "mh5CE8Nbj38iND267s4XnvhSmhDW7yWc6Q";

/// Initialize test logging (call once per test)
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::DEBUG.into()),
        )
        .with_test_writer()
        .try_init();
}

/// An in-memory testnet wallet configuration for [TPRV] talking to `peer`, with legacy
/// addresses, short timeouts and small watch windows.
pub fn test_config(peer: &FakePeer) -> WalletConfig {
    let mut config = WalletConfig::default_for(Network::Testnet, &peer.addr(), TPRV).in_memory();
    config.address_kind = AddressKind::P2pkh;
    config.receive_window = 10;
    config.change_window = 10;
    config.sync_timeout = Duration::from_secs(10);
    config.peer_config.connect_timeout = Duration::from_secs(2);
    config.peer_config.handshake_timeout = Duration::from_secs(2);
    config.peer_config.broadcast_timeout = Duration::from_secs(2);
    config
}

/// A transaction paying `amount` to `address` from an output nobody in the test owns.
pub fn payment_to(address: &str, amount: u64, seed: u8) -> Tx {
    let address = Address::parse(address, Network::Testnet).unwrap();
    Tx {
        version: 1,
        inputs: vec![TxInput::new(
            Outpoint::new(Hash::sha256d(&[0xfe, seed]), 0),
            Script::default(),
        )],
        outputs: vec![TxOutput::new(amount, address.script_pubkey())],
        lock_time: 0,
    }
}

/// Poll `check` until it holds, panicking after five seconds.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    while !check().await {
        if Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        sleep(Duration::from_millis(20)).await;
    }
}
