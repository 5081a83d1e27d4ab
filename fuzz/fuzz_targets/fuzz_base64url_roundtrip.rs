// Copyright (c) 2026 Amunchain
// Licensed under the Apache-2.0 License.

#![no_main]
#![forbid(unsafe_code)]

use kms_core::core::crypto::primitives::{base64url_decode, base64url_encode};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let encoded = base64url_encode(data);
    assert!(!encoded.contains('='), "encoder must not pad");
    match base64url_decode(&encoded) {
        Ok(decoded) => assert_eq!(decoded, data, "round-trip must be exact"),
        Err(_) => panic!("our own encoding must always decode"),
    }

    if let Ok(s) = std::str::from_utf8(data) {
        // Decoding arbitrary text must never panic, padded or not.
        let _ = base64url_decode(s);
    }
});
