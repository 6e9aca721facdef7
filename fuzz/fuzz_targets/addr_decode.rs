//! Fuzzer for the socket-address codec.
//!
//! Invariants under arbitrary input bytes:
//! - decoding never panics
//! - a successful decode re-encodes to exactly the input bytes
//! - pretty-printing a decoded address never panics

#![no_main]

use libfuzzer_sys::fuzz_target;
use shroud_core::SockAddr;

fuzz_target!(|data: &[u8]| {
    let Ok(addr) = SockAddr::decode(data) else {
        return;
    };

    // Decode accepts exactly-framed buffers only, so re-encoding must be
    // the identity.
    let wire = addr.to_bytes();
    assert_eq!(&wire[..], data, "decode/encode round trip diverged");

    // Display must cope with arbitrary name bytes for any family.
    let _ = addr.to_string();
});
