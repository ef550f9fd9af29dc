#![no_main]

use libfuzzer_sys::fuzz_target;
use spvwallet::bitcoin::merkle::calculate_merkle_root;
use spvwallet::bitcoin::{Encodable, Hash, PartialMerkleTree};

fuzz_target!(|data: &[u8]| {
    // arbitrary bytes as a received tree must never panic
    if let Ok(tree) = PartialMerkleTree::from_binary_buf(data) {
        let _ = tree.extract_matches();
    }

    // the first byte of each 33 byte chunk marks the hash as matched
    let leaves: Vec<(bool, Hash)> = data
        .chunks_exact(33)
        .take(1000)
        .map(|c| {
            let mut raw = [0u8; 32];
            raw.copy_from_slice(&c[1..]);
            (c[0] & 1 == 1, Hash { raw })
        })
        .collect();
    if leaves.is_empty() {
        return;
    }
    let txids: Vec<Hash> = leaves.iter().map(|(_, h)| *h).collect();
    let matched: Vec<bool> = leaves.iter().map(|(m, _)| *m).collect();
    let tree = PartialMerkleTree::from_txids(&txids, &matched).unwrap();
    let matches = tree.extract_matches().unwrap();
    assert_eq!(matches.merkle_root, calculate_merkle_root(&txids).unwrap());
    let expected: Vec<Hash> = leaves.iter().filter(|(m, _)| *m).map(|(_, h)| *h).collect();
    assert_eq!(matches.matches, expected);
});
