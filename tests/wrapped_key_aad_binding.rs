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

fn fast_config() -> KmsConfig {
    KmsConfig {
        pbkdf2_iter_bounds: (1_000, 2_000_000),
        pbkdf2_calibration_target_ms: (1, 50),
        ..KmsConfig::default()
    }
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

// Spec invariant (iv) / testable property 3: the AAD bound into each
// wrapped-key record references the record's own `kid`/`createdAt`.
// Mutating either field after the fact must make the ciphertext
// unrecoverable, even though the ciphertext bytes themselves are
// untouched.
#[tokio::test]
async fn mutating_wrapped_key_metadata_breaks_unwrap() {
    let store: Arc<dyn Store> = Arc::new(SledStore::open_temporary().unwrap());
    let orch = Orchestrator::new(store.clone(), fast_config(), Metrics::new().unwrap());
    let creds = json!({"method": "passphrase", "userId": "u1", "passphrase": "p1"});

    call(&orch, "r1", "setupPassphrase", json!({"userId": "u1", "passphrase": "p1"}), 1_000).await;
    let gen = call(&orch, "r2", "generateVAPID", json!({"credentials": creds}), 1_000).await;
    let kid = gen["kid"].as_str().unwrap().to_string();

    let sign_ok = orch
        .handle(
            RpcEnvelopeRequest {
                id: "r3".into(),
                method: "signJWT".into(),
                params: json!({
                    "kid": kid,
                    "payload": {"aud": "https://fcm.googleapis.com", "sub": "mailto:t@example.com", "exp": 1 + 600},
                    "credentials": creds,
                }),
            },
            1_000,
        )
        .await;
    assert!(sign_ok.error.is_none(), "signing must succeed before tampering");

    let mut record = store.get_wrapped_key(&kid).await.unwrap().unwrap();
    record.created_at += 1;
    store.put_wrapped_key(&record).await.unwrap();

    let sign_after_tamper = orch
        .handle(
            RpcEnvelopeRequest {
                id: "r4".into(),
                method: "signJWT".into(),
                params: json!({
                    "kid": kid,
                    "payload": {"aud": "https://fcm.googleapis.com", "sub": "mailto:t@example.com", "exp": 2 + 600},
                    "credentials": creds,
                }),
            },
            2_000,
        )
        .await;
    assert!(
        sign_after_tamper.error.is_some(),
        "a mutated createdAt must invalidate the AAD binding and fail unwrap"
    );
}
