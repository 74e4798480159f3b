#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok((value, _)) = tangle_cbor::decode::decode(data) {
        let _ = format!("{value:?}");
    }
});
