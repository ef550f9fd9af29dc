#![no_main]

use libfuzzer_sys::fuzz_target;
use spvwallet::bitcoin::Network;
use spvwallet::p2p::{Message, MessageFramer, MAX_PAYLOAD_SIZE};

const COMMANDS: [&str; 12] = [
    "version", "ping", "reject", "inv", "getdata", "notfound", "getheaders", "headers",
    "merkleblock", "tx", "filterload", "block",
];

fuzz_target!(|data: &[u8]| {
    // a stream of frames, as read from a socket
    let mut framer = MessageFramer::new(Network::Testnet.magic());
    framer.add_data(data);
    while let Ok(Some(msg)) = framer.decode_message() {
        let _ = msg.command();
    }

    // a payload under every command we decode
    if let Some((selector, payload)) = data.split_first() {
        let command = COMMANDS[*selector as usize % COMMANDS.len()];
        if let Ok(msg) = Message::decode(command, payload) {
            assert_eq!(msg.command(), command);
            let framed = framer.frame_message(&msg).unwrap();
            assert!(framed.len() <= 24 + MAX_PAYLOAD_SIZE as usize);
        }
    }
});
