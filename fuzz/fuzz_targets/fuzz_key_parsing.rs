#![no_main]

use libfuzzer_sys::fuzz_target;
use spvwallet::bitcoin::{Address, ExtendedPrivKey, Network};
use std::str::FromStr;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        // whatever parses must print back to the same string
        for network in Network::ALL {
            if let Ok(address) = Address::parse(s, network) {
                assert_eq!(address.to_string(), s);
            }
        }
        if let Ok(key) = ExtendedPrivKey::from_str(s) {
            assert_eq!(key.to_string(), s);
        }
    }
});
