// Copyright (c) 2026 Amunchain
// Licensed under the Apache-2.0 License.

#![no_main]
#![forbid(unsafe_code)]

use kms_core::core::orchestrator::RpcEnvelopeRequest;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Deserializing an arbitrary envelope, and re-serializing a valid one,
    // must never panic regardless of how malformed `params` is.
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(req) = serde_json::from_str::<RpcEnvelopeRequest>(s) {
            let _ = serde_json::to_string(&req);
        }
    }
});
