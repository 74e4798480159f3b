#![no_main]

use libfuzzer_sys::fuzz_target;
use tangle_cbor::{decode, encode, value::Value};

fuzz_target!(|data: &[u8]| {
    let Ok((value, _)) = decode::decode(data) else {
        return;
    };
    if matches!(value, Value::Break) {
        return;
    }
    // Re-encode with both reference schemes on so shared/cyclic structures
    // stay encodable, then make sure our own output decodes.
    let options = encode::Options {
        shared_refs: true,
        string_refs: true,
        ..encode::Options::default()
    };
    if let Ok(bytes) = encode::encode_with(&value, &options) {
        decode::decode(&bytes).expect("own output must decode");
    }
});
