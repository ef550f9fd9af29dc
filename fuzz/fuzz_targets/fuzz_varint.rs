#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use spvwallet::bitcoin::{varint_decode, varint_encode, varint_size};

fuzz_target!(|data: &[u8]| {
    let mut buffer = data;
    if let Ok(value) = varint_decode(&mut buffer) {
        let mut encoded = BytesMut::new();
        varint_encode(&mut encoded, value).unwrap();
        assert_eq!(varint_size(value) as usize, encoded.len());
        let mut decode_buffer = encoded.as_ref();
        assert_eq!(varint_decode(&mut decode_buffer).unwrap(), value);
    }
});
