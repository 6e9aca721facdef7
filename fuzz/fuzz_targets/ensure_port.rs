//! Fuzzer for the address-string normalizer.
//!
//! Invariants under arbitrary input strings:
//! - normalization never panics
//! - the output is the input verbatim, the input with `:0` appended, or
//!   the input bracketed with `:0` appended

#![no_main]

use libfuzzer_sys::fuzz_target;
use shroud_core::ensure_port;

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };

    let out = ensure_port(input);
    assert!(
        out == input || out == format!("{input}:0") || out == format!("[{input}]:0"),
        "unexpected normalization: {input:?} -> {out:?}"
    );

    // Normalization is idempotent for anything it already passed through
    // unchanged.
    if out == input {
        assert_eq!(ensure_port(&out), out);
    }
});
