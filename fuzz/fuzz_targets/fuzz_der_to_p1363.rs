// Copyright (c) 2026 Amunchain
// Licensed under the Apache-2.0 License.

#![no_main]
#![forbid(unsafe_code)]

use kms_core::core::crypto::sigformat::{der_to_p1363, p1363_to_der};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes must never panic the parser, only return a typed error.
    if let Ok(p1363) = der_to_p1363(data) {
        // A signature we accepted must re-encode to a DER blob that parses
        // back to the identical P-1363 value (leading-zero padding aside).
        let der = p1363_to_der(&p1363).expect("p1363 we just produced must re-encode");
        let roundtripped = der_to_p1363(&der).expect("our own DER output must parse");
        assert_eq!(roundtripped, p1363);
    }
});
