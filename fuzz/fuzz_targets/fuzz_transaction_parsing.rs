#![no_main]

use libfuzzer_sys::fuzz_target;
use spvwallet::bitcoin::{Encodable, Tx};

fuzz_target!(|data: &[u8]| {
    let mut buffer = data;
    if let Ok(tx) = Tx::from_binary(&mut buffer) {
        let encoded = tx.to_binary_buf().unwrap();
        assert_eq!(encoded.len() as u64, tx.encoded_size());
        // varints may have been non-canonical, so compare decoded values
        assert_eq!(Tx::from_binary_buf(&encoded).unwrap(), tx);
        let _ = tx.hash();
    }
});
