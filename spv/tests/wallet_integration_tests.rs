// Integration tests for the wallet
// Each test runs the wallet against an in-process fake peer on localhost.

mod common;

use common::fake_peer::{BroadcastMode, FakePeer};
use common::helpers::{
    eventually, init_test_logging, payment_to, test_config, CHANGE_0, FOREIGN, RECEIVE_0,
    RECEIVE_1, TPRV, WITNESS_CHANGE_0, WITNESS_RECEIVE_0, XPRV,
};
use spvwallet::bitcoin::sighash::verify_p2wpkh_input;
use spvwallet::bitcoin::{
    Address, AddressKind, Network, Outpoint, Script, ToHex, Tx, TxInput, TxOutput,
};
use spvwallet::p2p::{ConnectionState, Services};
use spvwallet::util::Amount;
use spvwallet::wallet::{TxStatus, Wallet, WalletConfig};
use spvwallet::Error;
use std::time::Duration;

/// A wallet synced against a peer whose block 1 pays 50,000 to the first receive address.
async fn funded_wallet() -> (FakePeer, Wallet) {
    let peer = FakePeer::start(Network::Testnet).await;
    peer.mine_quietly(vec![vec![payment_to(RECEIVE_0, 50_000, 1)]]);
    let wallet = Wallet::connect(test_config(&peer)).await.unwrap();
    (peer, wallet)
}

#[tokio::test]
async fn test_pay_and_confirm() {
    init_test_logging();
    let (peer, wallet) = funded_wallet().await;

    assert_eq!(wallet.state(), ConnectionState::Synced);
    assert_eq!(wallet.status().height, 1);
    assert_eq!(wallet.get_balance().await, Amount(50_000));
    assert_eq!(wallet.get_balance_detail().await.confirmed, Amount(50_000));
    assert_eq!(wallet.get_address().await.unwrap(), RECEIVE_0);
    assert_eq!(wallet.get_fee(), "150");
    assert!(peer.filter_loads() >= 1);

    let txid = wallet
        .send_to_address(FOREIGN, 30_000, Network::Testnet)
        .await
        .unwrap();

    let sent = peer.received();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].hash().to_string(), txid);
    assert_eq!(sent[0].outputs[0].value, 30_000);
    assert_eq!(sent[0].outputs[1].value, 19_850);

    // the change is counted straight away, as pending
    assert_eq!(wallet.get_balance().await, Amount(19_850));
    let unspent = wallet.unspent().await;
    assert_eq!(unspent.len(), 1);
    assert_eq!(unspent[0].address.to_string(), CHANGE_0);
    assert_eq!(unspent[0].height, None);

    peer.mine(vec![sent[0].clone()]);
    let w = &wallet;
    eventually("the payment to confirm", || async move {
        w.get_balance_detail().await.confirmed == Amount(19_850)
    })
    .await;
    assert_eq!(wallet.status().height, 2);
    let records = wallet.transactions().await;
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.status == TxStatus::Confirmed));
    assert_eq!(records[1].height, Some(2));

    wallet.shutdown().await;
    assert_eq!(wallet.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_network_mismatch_touches_nothing() {
    init_test_logging();
    let (peer, wallet) = funded_wallet().await;

    let err = wallet
        .send_to_address(FOREIGN, 1_000, Network::Mainnet)
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "This wallet is only connected to the testnet network and cannot perform actions on the mainnet network"
    );
    let raw: String = payment_to(RECEIVE_1, 1_000, 2).encode_hex();
    assert!(matches!(
        wallet.broadcast_transaction(&raw, Network::Regtest).await,
        Err(Error::NetworkMismatch { .. })
    ));
    assert!(peer.received().is_empty());
    assert_eq!(wallet.get_balance().await, Amount(50_000));
}

#[tokio::test]
async fn test_insufficient_funds_is_not_broadcast() {
    init_test_logging();
    let (peer, wallet) = funded_wallet().await;

    let err = wallet
        .send_to_address(FOREIGN, 49_900, Network::Testnet)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::InsufficientFunds {
            needed: 50_050,
            available: 50_000
        }
    ));
    assert!(peer.received().is_empty());
    assert_eq!(wallet.get_balance().await, Amount(50_000));
}

#[tokio::test]
async fn test_broadcast_raw_transaction() {
    init_test_logging();
    let (peer, wallet) = funded_wallet().await;

    assert!(matches!(
        wallet.broadcast_transaction("not hex", Network::Testnet).await,
        Err(Error::MalformedTransaction(_))
    ));
    assert!(matches!(
        wallet.broadcast_transaction("01000000", Network::Testnet).await,
        Err(Error::MalformedTransaction(_))
    ));

    let tx = payment_to(RECEIVE_1, 7_000, 3);
    let raw: String = tx.encode_hex();
    let txid = wallet
        .broadcast_transaction(&raw, Network::Testnet)
        .await
        .unwrap();
    assert_eq!(txid, tx.hash().to_string());
    assert_eq!(peer.received(), vec![tx]);
    assert_eq!(wallet.get_balance().await, Amount(57_000));
    assert_eq!(wallet.get_balance_detail().await.confirmed, Amount(50_000));
}

#[tokio::test]
async fn test_rejected_broadcast_leaves_ledger_alone() {
    init_test_logging();
    let (peer, wallet) = funded_wallet().await;
    peer.set_broadcast_mode(BroadcastMode::Reject);

    let err = wallet
        .send_to_address(FOREIGN, 10_000, Network::Testnet)
        .await
        .unwrap_err();
    match err {
        Error::BroadcastRejected { txid, reason } => {
            assert_eq!(txid, peer.received()[0].hash().to_string());
            assert_eq!(reason, "bad-txns-inputs-missingorspent");
        }
        other => panic!("unexpected error {}", other),
    }
    assert_eq!(wallet.get_balance().await, Amount(50_000));
    assert_eq!(wallet.unspent().await.len(), 1);

    // the rejected payment no longer holds its input
    peer.set_broadcast_mode(BroadcastMode::Accept);
    wallet
        .send_to_address(FOREIGN, 10_000, Network::Testnet)
        .await
        .unwrap();
    assert_eq!(wallet.get_balance().await, Amount(39_850));
}

#[tokio::test]
async fn test_concurrent_payments_never_share_inputs() {
    init_test_logging();
    let (peer, wallet) = funded_wallet().await;

    let (a, b) = tokio::join!(
        wallet.send_to_address(FOREIGN, 30_000, Network::Testnet),
        wallet.send_to_address(FOREIGN, 10_000, Network::Testnet),
    );
    let mut spent = 0;
    for (result, amount) in [(a, 30_000), (b, 10_000)] {
        match result {
            Ok(_) => spent += amount + 150,
            Err(Error::InsufficientFunds { .. }) => {}
            Err(other) => panic!("unexpected error {}", other),
        }
    }
    assert!(spent > 0);
    assert_eq!(wallet.get_balance().await, Amount(50_000 - spent));

    let mut inputs: Vec<Outpoint> = peer
        .received()
        .iter()
        .flat_map(|tx| tx.inputs.iter().map(|i| i.outpoint))
        .collect();
    let sent = inputs.len();
    inputs.sort();
    inputs.dedup();
    assert_eq!(inputs.len(), sent);
}

#[tokio::test]
async fn test_unacknowledged_broadcast_times_out() {
    init_test_logging();
    let peer = FakePeer::start(Network::Testnet).await;
    peer.mine_quietly(vec![vec![payment_to(RECEIVE_0, 50_000, 1)]]);
    let mut config = test_config(&peer);
    config.peer_config.broadcast_timeout = Duration::from_millis(300);
    let wallet = Wallet::connect(config).await.unwrap();
    peer.set_broadcast_mode(BroadcastMode::Ignore);

    let err = wallet
        .send_to_address(FOREIGN, 10_000, Network::Testnet)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::BroadcastTimeout(_)));
    assert_eq!(peer.received().len(), 1);
    assert_eq!(wallet.get_balance().await, Amount(50_000));
}

#[tokio::test]
async fn test_relayed_transaction_is_pending_until_mined() {
    init_test_logging();
    let (peer, wallet) = funded_wallet().await;

    let tx = payment_to(RECEIVE_1, 8_000, 4);
    peer.relay(tx.clone());
    let w = &wallet;
    eventually("the relayed payment", || async move {
        w.get_balance().await == Amount(58_000)
    })
    .await;
    assert_eq!(wallet.get_balance_detail().await.confirmed, Amount(50_000));

    peer.mine(vec![tx]);
    eventually("the relayed payment to confirm", || async move {
        w.get_balance_detail().await.confirmed == Amount(58_000)
    })
    .await;
}

#[tokio::test]
async fn test_reorg_rolls_back_and_reapplies() {
    init_test_logging();
    let peer = FakePeer::start(Network::Testnet).await;
    let second = payment_to(RECEIVE_1, 20_000, 2);
    peer.mine_quietly(vec![
        vec![payment_to(RECEIVE_0, 50_000, 1)],
        vec![second.clone()],
    ]);
    let wallet = Wallet::connect(test_config(&peer)).await.unwrap();
    assert_eq!(wallet.get_balance_detail().await.confirmed, Amount(70_000));

    // a longer branch from block 1 without the second payment
    peer.reorg(1, vec![vec![], vec![]]);
    let w = &wallet;
    eventually("the reorg", || async move {
        w.status().height == 3 && w.get_balance().await == Amount(50_000)
    })
    .await;
    let records = wallet.transactions().await;
    let orphaned = records.iter().find(|r| r.txid == second.hash()).unwrap();
    assert_eq!(orphaned.status, TxStatus::Pending);
    assert_eq!(orphaned.height, None);

    peer.mine(vec![second]);
    eventually("the payment on the new branch", || async move {
        w.get_balance_detail().await.confirmed == Amount(70_000)
    })
    .await;
    assert_eq!(wallet.status().height, 4);
}

#[tokio::test]
async fn test_blocks_are_applied_in_height_order() {
    init_test_logging();
    let peer = FakePeer::start(Network::Testnet).await;
    let third = payment_to(RECEIVE_1, 5_000, 3);
    let spend = Tx {
        version: 1,
        inputs: vec![TxInput::new(Outpoint::new(third.hash(), 0), Script::default())],
        outputs: vec![TxOutput::new(4_000, Script::default())],
        lock_time: 0,
    };
    peer.mine_quietly(vec![
        vec![payment_to(RECEIVE_0, 10_000, 1)],
        vec![],
        vec![third],
        vec![spend],
        vec![payment_to(CHANGE_0, 2_500, 5)],
    ]);
    peer.set_reverse_blocks(true);

    let wallet = Wallet::connect(test_config(&peer)).await.unwrap();
    // the spend in block 4 only counts if block 3 was applied first
    assert_eq!(wallet.get_balance().await, Amount(12_500));
    assert_eq!(wallet.status().height, 5);
    let heights: Vec<Option<u32>> = wallet
        .transactions()
        .await
        .iter()
        .map(|r| r.height)
        .collect();
    assert_eq!(heights, vec![Some(1), Some(3), Some(4), Some(5)]);
}

#[tokio::test]
async fn test_state_survives_restart() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let peer = FakePeer::start(Network::Testnet).await;
    peer.mine_quietly(vec![vec![payment_to(RECEIVE_0, 50_000, 1)]]);
    let config = test_config(&peer).with_data_dir(dir.path());

    let wallet = Wallet::connect(config.clone()).await.unwrap();
    wallet
        .send_to_address(FOREIGN, 30_000, Network::Testnet)
        .await
        .unwrap();
    wallet.shutdown().await;
    drop(wallet);
    assert!(dir.path().join("testnet.sqlite").exists());

    let wallet = Wallet::connect(config).await.unwrap();
    assert_eq!(peer.connections(), 2);
    assert_eq!(wallet.status().height, 1);
    assert_eq!(wallet.get_balance().await, Amount(19_850));
    assert_eq!(wallet.transactions().await.len(), 2);

    // the next payment takes the next change index
    peer.mine(vec![peer.received()[0].clone()]);
    let w = &wallet;
    eventually("the payment to confirm", || async move {
        w.get_balance_detail().await.confirmed == Amount(19_850)
    })
    .await;
    wallet
        .send_to_address(FOREIGN, 5_000, Network::Testnet)
        .await
        .unwrap();
    let unspent = wallet.unspent().await;
    assert_eq!(unspent.len(), 1);
    assert_eq!(unspent[0].amount, 14_700);
    assert_ne!(unspent[0].address.to_string(), CHANGE_0);
}

#[tokio::test]
async fn test_receive_address_beyond_window_reloads_filter() {
    init_test_logging();
    let (peer, wallet) = funded_wallet().await;
    assert_eq!(wallet.get_receive_address(1).await.unwrap(), RECEIVE_1);
    let loads = peer.filter_loads();

    let far = wallet.get_receive_address(15).await.unwrap();
    assert_ne!(far, RECEIVE_1);
    let p = &peer;
    eventually("the filter reload", || async move { p.filter_loads() == loads + 1 }).await;

    peer.mine(vec![payment_to(&far, 3_000, 6)]);
    let w = &wallet;
    eventually("the payment to the new address", || async move {
        w.get_balance_detail().await.confirmed == Amount(53_000)
    })
    .await;
}

#[tokio::test]
async fn test_receive_address_beyond_window_survives_restart() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let peer = FakePeer::start(Network::Testnet).await;
    peer.mine_quietly(vec![vec![payment_to(RECEIVE_0, 50_000, 1)]]);
    let config = test_config(&peer).with_data_dir(dir.path());

    let wallet = Wallet::connect(config.clone()).await.unwrap();
    let far = wallet.get_receive_address(15).await.unwrap();
    wallet.shutdown().await;
    drop(wallet);

    let wallet = Wallet::connect(config).await.unwrap();
    assert_eq!(wallet.get_receive_address(15).await.unwrap(), far);
    peer.mine(vec![payment_to(&far, 3_000, 9)]);
    let w = &wallet;
    eventually("the payment to the far address", || async move {
        w.get_balance_detail().await.confirmed == Amount(53_000)
    })
    .await;

    // spending it needs its key
    wallet
        .send_to_address(FOREIGN, 52_000, Network::Testnet)
        .await
        .unwrap();
    assert_eq!(peer.received()[0].inputs.len(), 2);
    assert_eq!(wallet.get_balance().await, Amount(850));
}

#[tokio::test]
async fn test_witness_wallet_pays_and_confirms() {
    init_test_logging();
    let peer = FakePeer::start(Network::Testnet).await;
    peer.mine_quietly(vec![vec![payment_to(WITNESS_RECEIVE_0, 50_000, 1)]]);
    let mut config = test_config(&peer);
    config.address_kind = AddressKind::P2wpkh;
    let wallet = Wallet::connect(config).await.unwrap();

    assert_eq!(wallet.get_address().await.unwrap(), WITNESS_RECEIVE_0);
    assert_eq!(wallet.get_balance().await, Amount(50_000));

    wallet
        .send_to_address(FOREIGN, 30_000, Network::Testnet)
        .await
        .unwrap();
    let sent = peer.received();
    assert_eq!(sent.len(), 1);
    let tx = &sent[0];
    assert!(tx.has_witness());
    let funding = Address::parse(WITNESS_RECEIVE_0, Network::Testnet).unwrap();
    assert!(verify_p2wpkh_input(tx, 0, &funding.script_pubkey(), 50_000).unwrap());
    let change = Address::parse(WITNESS_CHANGE_0, Network::Testnet).unwrap();
    assert_eq!(tx.outputs[1].script, change.script_pubkey());
    assert_eq!(wallet.get_balance().await, Amount(19_850));

    peer.mine(vec![tx.clone()]);
    let w = &wallet;
    eventually("the witness payment to confirm", || async move {
        w.get_balance_detail().await.confirmed == Amount(19_850)
    })
    .await;
    assert_eq!(wallet.unspent().await[0].address.to_string(), WITNESS_CHANGE_0);
}

#[tokio::test]
async fn test_reconnect() {
    init_test_logging();
    let (peer, wallet) = funded_wallet().await;
    peer.mine_quietly(vec![vec![payment_to(RECEIVE_1, 1_000, 7)]]);

    wallet.reconnect().await.unwrap();
    assert_eq!(peer.connections(), 2);
    assert_eq!(wallet.state(), ConnectionState::Synced);
    assert_eq!(wallet.status().height, 2);
    assert_eq!(wallet.get_balance().await, Amount(51_000));
}

#[tokio::test]
async fn test_mainnet_addresses() {
    init_test_logging();
    let peer = FakePeer::start(Network::Mainnet).await;
    // witness addresses unless configured otherwise
    let mut config = WalletConfig::default_for(Network::Mainnet, &peer.addr(), XPRV).in_memory();
    config.receive_window = 3;
    config.change_window = 3;
    let wallet = Wallet::connect(config.clone()).await.unwrap();
    assert_eq!(wallet.network(), Network::Mainnet);
    assert_eq!(
        wallet.get_address().await.unwrap(),
        "bc1qatd6clekcdlrjds3dzm64m3ukf9z2vfdz3hajy"
    );
    assert_eq!(
        wallet.get_receive_address(2).await.unwrap(),
        "bc1qcr69wvj3mh66nd92skdc75dyqpklyr4tseu0c0"
    );
    assert_eq!(wallet.get_balance().await, Amount(0));
    wallet.shutdown().await;

    config.address_kind = AddressKind::P2pkh;
    let wallet = Wallet::connect(config).await.unwrap();
    assert_eq!(
        wallet.get_address().await.unwrap(),
        "1NQpH6Nf8QtR2HphLRcvuVqfhXBXsiWn8r"
    );
    assert_eq!(
        wallet.get_receive_address(2).await.unwrap(),
        "1JbFSv4FnJ6ykAmAAMSsfb17xPDRxa3mcd"
    );
}

#[tokio::test]
async fn test_key_for_another_network() {
    init_test_logging();
    let peer = FakePeer::start(Network::Testnet).await;
    let mut config = test_config(&peer);
    config.hd_key = XPRV.to_string();
    assert!(matches!(
        Wallet::connect(config).await,
        Err(Error::InvalidKeyMaterial(_))
    ));
    assert_eq!(peer.connections(), 0);
}

#[tokio::test]
async fn test_unreachable_peer() {
    init_test_logging();
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let mut config = WalletConfig::default_for(Network::Testnet, &addr.to_string(), TPRV).in_memory();
    config.peer_config.connect_timeout = Duration::from_millis(500);
    let err = Wallet::connect(config).await.err().unwrap();
    assert!(matches!(err, Error::PeerUnreachable(_)));
    assert!(err.is_connection_error());
}

#[tokio::test]
async fn test_peer_without_bloom_support() {
    init_test_logging();
    let peer = FakePeer::start_with(Network::Testnet, Services::NETWORK).await;
    assert!(matches!(
        Wallet::connect(test_config(&peer)).await,
        Err(Error::HandshakeFailed(_))
    ));
}

#[tokio::test]
async fn test_stalled_sync_times_out() {
    init_test_logging();
    let peer = FakePeer::start(Network::Testnet).await;
    peer.set_answer_headers(false);
    let mut config = test_config(&peer);
    config.sync_timeout = Duration::from_millis(300);
    assert!(matches!(
        Wallet::connect(config).await,
        Err(Error::SyncTimeout)
    ));
}

#[tokio::test]
async fn test_wrong_network_peer_config() {
    init_test_logging();
    let peer = FakePeer::start(Network::Testnet).await;
    let mut config = test_config(&peer);
    config.peer_config.network = Network::Regtest;
    assert!(matches!(
        Wallet::connect(config).await,
        Err(Error::InvalidConfiguration(_))
    ));
    assert_eq!(peer.connections(), 0);
}
