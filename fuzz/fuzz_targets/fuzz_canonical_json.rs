// Copyright (c) 2026 Amunchain
// Licensed under the Apache-2.0 License.

#![no_main]
#![forbid(unsafe_code)]

use kms_core::core::crypto::canonical_json::canonicalize;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else { return };
    let Ok(value) = serde_json::from_str::<serde_json::Value>(s) else { return };

    let first = canonicalize(&value);
    // Canonicalization must itself be valid JSON that re-parses to an
    // equal value, and must be stable under repeated application.
    let reparsed: serde_json::Value = serde_json::from_str(&first).expect("canonical output must be valid JSON");
    assert_eq!(reparsed, value);
    let second = canonicalize(&reparsed);
    assert_eq!(first, second, "canonicalization must be idempotent");
});
