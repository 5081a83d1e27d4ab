// Copyright (c) 2026 Amunchain
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]

use std::sync::Arc;

use kms_core::config::KmsConfig;
use kms_core::core::orchestrator::{Orchestrator, RpcEnvelopeRequest};
use kms_core::core::persistence::{SledStore, Store};
use kms_core::monitoring::metrics::Metrics;
use serde_json::json;

fn fast_orchestrator() -> Orchestrator {
    let store: Arc<dyn Store> = Arc::new(SledStore::open_temporary().unwrap());
    let config = KmsConfig {
        pbkdf2_iter_bounds: (1_000, 2_000_000),
        pbkdf2_calibration_target_ms: (1, 50),
        ..KmsConfig::default()
    };
    Orchestrator::new(store, config, Metrics::new().unwrap())
}

async fn call(orch: &Orchestrator, id: &str, method: &str, params: serde_json::Value, now_ms: u64) -> serde_json::Value {
    let resp = orch
        .handle(
            RpcEnvelopeRequest {
                id: id.into(),
                method: method.into(),
                params,
            },
            now_ms,
        )
        .await;
    assert!(resp.error.is_none(), "{method} failed: {:?}", resp.error);
    resp.result.unwrap()
}

// Spec scenario S1: fresh setup, explicit key generation, and a signed JWT
// whose wire shape matches RFC 8292 / JWS ES256.
#[tokio::test]
async fn s1_fresh_setup_generate_and_sign() {
    let orch = fast_orchestrator();

    let setup = call(
        &orch,
        "r1",
        "setupPassphrase",
        json!({"userId": "u1", "passphrase": "test-passphrase-123"}),
        1_000,
    )
    .await;
    assert_eq!(setup["success"], json!(true));

    let creds = json!({"method": "passphrase", "userId": "u1", "passphrase": "test-passphrase-123"});

    let gen = call(&orch, "r2", "generateVAPID", json!({"credentials": creds}), 1_000).await;
    let kid = gen["kid"].as_str().unwrap().to_string();
    assert_eq!(kid.len(), 43, "kid is a 43-char RFC 7638 thumbprint");
    assert!(kid.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));

    let public_key_raw = kms_core::core::crypto::primitives::base64url_decode(gen["publicKey"].as_str().unwrap()).unwrap();
    assert_eq!(public_key_raw.len(), 65);
    assert_eq!(public_key_raw[0], 0x04);

    let signed = call(
        &orch,
        "r3",
        "signJWT",
        json!({
            "kid": kid,
            "payload": {"aud": "https://fcm.googleapis.com", "sub": "mailto:t@example.com", "exp": 1_000 / 1000 + 600},
            "credentials": creds,
        }),
        1_000,
    )
    .await;
    let jwt = signed["jwt"].as_str().unwrap();
    let parts: Vec<&str> = jwt.split('.').collect();
    assert_eq!(parts.len(), 3);
    let sig = kms_core::core::crypto::primitives::base64url_decode(parts[2]).unwrap();
    assert_eq!(sig.len(), 64, "JWS ES256 signature is raw P-1363, not DER");
}

// Spec scenario S2: after three state-changing ops the audit chain is
// linked and fully verifies.
#[tokio::test]
async fn s2_audit_chain_after_three_ops() {
    let orch = fast_orchestrator();
    let creds = json!({"method": "passphrase", "userId": "u1", "passphrase": "p1"});

    call(&orch, "r1", "setupPassphrase", json!({"userId": "u1", "passphrase": "p1"}), 1_000).await;
    let gen = call(&orch, "r2", "generateVAPID", json!({"credentials": creds}), 2_000).await;
    let kid = gen["kid"].as_str().unwrap();
    call(
        &orch,
        "r3",
        "signJWT",
        json!({
            "kid": kid,
            "payload": {"aud": "https://fcm.googleapis.com", "sub": "mailto:t@example.com", "exp": 2 + 600},
            "credentials": creds,
        }),
        3_000,
    )
    .await;

    let chain = call(&orch, "r4", "verifyAuditChain", json!({}), 4_000).await;
    assert_eq!(chain["valid"], json!(true));
    assert_eq!(chain["verified"], json!(3));
    assert_eq!(chain["errors"], json!([]));

    let log = call(&orch, "r5", "getAuditLog", json!({}), 5_000).await;
    let entries = log["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0]["previousHash"], json!(""));
    for i in 1..entries.len() {
        assert_eq!(entries[i]["previousHash"], entries[i - 1]["chainHash"]);
        assert_eq!(entries[i]["seqNum"].as_u64().unwrap(), entries[i - 1]["seqNum"].as_u64().unwrap() + 1);
    }
}

// Spec scenario S5: a signJWT payload whose `exp` exceeds the 24-hour
// ceiling is a policy rejection, not a silent clamp.
#[tokio::test]
async fn s5_policy_rejects_exp_beyond_24_hours() {
    let orch = fast_orchestrator();
    let creds = json!({"method": "passphrase", "userId": "u1", "passphrase": "p1"});
    call(&orch, "r1", "setupPassphrase", json!({"userId": "u1", "passphrase": "p1"}), 1_000).await;
    let gen = call(&orch, "r2", "generateVAPID", json!({"credentials": creds}), 1_000).await;
    let kid = gen["kid"].as_str().unwrap().to_string();

    let resp = orch
        .handle(
            RpcEnvelopeRequest {
                id: "r3".into(),
                method: "signJWT".into(),
                params: json!({
                    "kid": kid,
                    "payload": {"aud": "https://fcm.googleapis.com", "sub": "mailto:t@example.com", "exp": 90_000},
                    "credentials": creds,
                }),
            },
            1_000,
        )
        .await;
    let err = resp.error.expect("exp 25h out must be rejected");
    assert!(err.contains("24 hour"), "unexpected message: {err}");
}

// Spec scenario S6: two enrollments on the same userId share one Master
// Secret, so each method's VAPID keys are visible to the other method.
#[tokio::test]
async fn s6_multi_enrollment_shares_underlying_keys() {
    let orch = fast_orchestrator();
    call(&orch, "r1", "setupPassphrase", json!({"userId": "u1", "passphrase": "p1"}), 1_000).await;

    let passphrase_creds = json!({"method": "passphrase", "userId": "u1", "passphrase": "p1"});
    let prf_new_creds = json!({
        "method": "passkey-prf",
        "userId": "u1",
        "credentialId": "Y3JlZA",
        "prfOutput": "AQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQE",
        "rpId": "example.com",
    });

    call(
        &orch,
        "r2",
        "addEnrollment",
        json!({"userId": "u1", "method": "passkey-prf", "credentials": passphrase_creds, "newCredentials": prf_new_creds}),
        1_000,
    )
    .await;

    let gen_a = call(&orch, "r3", "generateVAPID", json!({"credentials": passphrase_creds}), 1_000).await;
    let kid_a = gen_a["kid"].as_str().unwrap().to_string();
    let pub_a = gen_a["publicKey"].as_str().unwrap().to_string();

    let prf_unlock_creds = json!({
        "method": "passkey-prf",
        "userId": "u1",
        "credentialId": "Y3JlZA",
        "prfOutput": "AQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQE",
    });
    let gen_b = call(&orch, "r4", "generateVAPID", json!({"credentials": prf_unlock_creds}), 1_000).await;
    let kid_b = gen_b["kid"].as_str().unwrap().to_string();
    assert_ne!(kid_a, kid_b, "two distinct key-generation calls produce distinct keys");

    let lookup = call(&orch, "r5", "getPublicKey", json!({"kid": kid_a}), 1_000).await;
    assert_eq!(lookup["publicKey"], json!(pub_a), "same MKEK decrypts keys made under either enrollment");
}
