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

//! Instance Audit Key lifecycle and the append-only, hash-chained,
//! signed audit log. The in-memory chain-head cache (`seqNum`, last
//! `chainHash`) is the only legitimately process-wide state in this
//! crate (spec.md §9); it lives behind one `tokio::sync::Mutex`, held
//! only for the read-head/write-entry critical section.

use serde_json::json;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::core::crypto::canonical_json::canonicalize;
use crate::core::crypto::primitives::{self, CryptoError};
use crate::core::persistence::{Store, StoreError};
use crate::core::security::secret::SecretBytes;
use crate::core::types::{kms_version, AuditEntry, KeyAlg, KeyPurpose, WrappedKeyRecord, AUDIT_INSTANCE_KID};

/// Errors from IAK lifecycle management or audit log operations.
#[derive(Debug, Error)]
pub enum AuditError {
    /// The instance audit key has not been created yet.
    #[error("UAK not initialized")]
    NotInitialized,
    /// A write raced another writer for the same `seqNum` and exhausted
    /// its bounded retry budget — an implementation bug if still
    /// conflicting (spec.md §4.4/§5).
    #[error("audit log concurrent write")]
    ConcurrentWrite,
    /// The underlying store failed.
    #[error("storage error")]
    Store(#[from] StoreError),
    /// A crypto primitive failed.
    #[error("crypto operation failed")]
    Crypto(#[from] CryptoError),
}

/// Signature algorithm for the Instance Audit Key. Ed25519 is the default
/// (spec.md §4.4); ECDSA P-256 is the explicitly allowed fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditKeyAlg {
    /// Default.
    Ed25519,
    /// Fallback.
    EcdsaP256,
}

const MAX_APPEND_RETRIES: u32 = 3;

/// The audit chain's in-memory head cache.
#[derive(Debug, Default)]
struct HeadState {
    initialized: bool,
    seq_num: u64,
    last_chain_hash: String,
}

/// Process-wide audit chain head cache.
pub struct AuditHeadCache(Mutex<HeadState>);

impl Default for AuditHeadCache {
    fn default() -> Self {
        AuditHeadCache(Mutex::new(HeadState::default()))
    }
}

impl AuditHeadCache {
    /// A fresh, uninitialized cache.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Ensure the instance audit key exists, creating it (wrapped under
/// `mkek`) if absent. Returns the (possibly newly created) record.
pub async fn ensure_iak(
    store: &dyn Store,
    mkek: &SecretBytes,
    alg: AuditKeyAlg,
    now_ms: u64,
) -> Result<WrappedKeyRecord, AuditError> {
    if let Some(existing) = store.get_wrapped_key(AUDIT_INSTANCE_KID).await? {
        return Ok(existing);
    }

    let (key_alg, public_key_raw, pkcs8) = match alg {
        AuditKeyAlg::Ed25519 => {
            let kp = primitives::generate_ed25519_keypair()?;
            (KeyAlg::Ed25519, kp.public_key.to_vec(), kp.pkcs8.clone())
        }
        AuditKeyAlg::EcdsaP256 => {
            let kp = primitives::generate_p256_keypair()?;
            (KeyAlg::Es256, kp.public_key_raw.to_vec(), kp.pkcs8.clone())
        }
    };

    let wrap_iv = primitives::random_bytes(primitives::AES_GCM_NONCE_LEN)?;
    let aad = wrapped_key_aad(AUDIT_INSTANCE_KID, key_alg, KeyPurpose::Audit, now_ms);
    let mut mkek_bytes = [0u8; 32];
    mkek_bytes.copy_from_slice(mkek.expose());
    let wrapped_private_key = primitives::aead_encrypt(&mkek_bytes, &wrap_iv, &aad, &pkcs8)?;

    let record = WrappedKeyRecord {
        kid: AUDIT_INSTANCE_KID.to_string(),
        alg: key_alg,
        purpose: KeyPurpose::Audit,
        created_at: now_ms,
        public_key_raw,
        wrap_iv,
        wrapped_private_key,
    };
    store.put_wrapped_key(&record).await?;
    Ok(record)
}

/// AAD binding for a wrapped asymmetric key record: `{kmsVersion, kid,
/// alg, purpose, createdAt, keyType:"private"}`.
pub fn wrapped_key_aad(kid: &str, alg: KeyAlg, purpose: KeyPurpose, created_at: u64) -> Vec<u8> {
    let obj = json!({
        "kmsVersion": kms_version(),
        "kid": kid,
        "alg": alg.as_str(),
        "purpose": purpose.as_str(),
        "createdAt": created_at,
        "keyType": "private",
    });
    canonicalize(&obj).into_bytes()
}

fn unwrap_iak_pkcs8(record: &WrappedKeyRecord, mkek: &SecretBytes) -> Result<Vec<u8>, AuditError> {
    let aad = wrapped_key_aad(&record.kid, record.alg, record.purpose, record.created_at);
    let mut mkek_bytes = [0u8; 32];
    mkek_bytes.copy_from_slice(mkek.expose());
    let pkcs8 = primitives::aead_decrypt(&mkek_bytes, &record.wrap_iv, &aad, &record.wrapped_private_key)?;
    Ok(pkcs8)
}

fn audit_entry_preimage(entry: &AuditEntry) -> serde_json::Value {
    let mut obj = json!({
        "seqNum": entry.seq_num,
        "timestamp": entry.timestamp,
        "op": entry.op,
        "requestId": entry.request_id,
        "previousHash": entry.previous_hash,
        "signerId": entry.signer_id,
    });
    if let Some(kid) = &entry.kid {
        obj["kid"] = json!(kid);
    }
    if let Some(user_id) = &entry.user_id {
        obj["userId"] = json!(user_id);
    }
    if let Some(origin) = &entry.origin {
        obj["origin"] = json!(origin);
    }
    if let Some(duration_ms) = entry.duration_ms {
        obj["durationMs"] = json!(duration_ms);
    }
    if let Some(details) = &entry.details {
        obj["details"] = details.clone();
    }
    obj
}

/// Compute `chainHash` for an entry's content fields (everything except
/// `chainHash` and `sig`).
pub fn compute_chain_hash(entry: &AuditEntry) -> String {
    let preimage = audit_entry_preimage(entry);
    let canonical = canonicalize(&preimage);
    primitives::hex_encode(&primitives::sha256(canonical.as_bytes()))
}

fn sign_chain_hash(pkcs8: &[u8], alg: KeyAlg, chain_hash_hex: &str) -> Result<String, AuditError> {
    let digest_bytes = primitives::hex_decode(chain_hash_hex)?;
    let sig = match alg {
        KeyAlg::Ed25519 => primitives::sign_ed25519(pkcs8, &digest_bytes)?.to_vec(),
        KeyAlg::Es256 => primitives::sign_ecdsa_p256_der(pkcs8, &digest_bytes)?,
    };
    Ok(primitives::hex_encode(&sig))
}

fn verify_chain_hash_sig(
    public_key_raw: &[u8],
    alg: KeyAlg,
    chain_hash_hex: &str,
    sig_hex: &str,
) -> Result<(), AuditError> {
    let digest_bytes = primitives::hex_decode(chain_hash_hex)?;
    let sig = primitives::hex_decode(sig_hex)?;
    match alg {
        KeyAlg::Ed25519 => primitives::verify_ed25519(public_key_raw, &digest_bytes, &sig)?,
        KeyAlg::Es256 => primitives::verify_ecdsa_p256_der(public_key_raw, &digest_bytes, &sig)?,
    }
    Ok(())
}

/// Parameters for one audit entry, prior to chain linkage/signing.
pub struct LogOperationInput {
    /// Operation name, e.g. `"generate-vapid"`.
    pub op: String,
    /// The `kid` this operation concerned, if any.
    pub kid: Option<String>,
    /// Caller-supplied request identifier.
    pub request_id: String,
    /// The user this operation was performed for, if any.
    pub user_id: Option<String>,
    /// Request origin, if known.
    pub origin: Option<String>,
    /// Operation duration in milliseconds.
    pub duration_ms: Option<u64>,
    /// Free-form operation-specific detail.
    pub details: Option<serde_json::Value>,
}

/// Append one audit entry: reads the chain head (from cache or storage
/// on first use), builds the entry, signs it under the IAK, and writes
/// it. Retries a bounded number of times on a `seqNum` race before
/// surfacing [`AuditError::ConcurrentWrite`] as fatal.
pub async fn log_operation(
    head: &AuditHeadCache,
    store: &dyn Store,
    mkek: &SecretBytes,
    input: LogOperationInput,
    now_ms: u64,
) -> Result<AuditEntry, AuditError> {
    let iak_record = store
        .get_wrapped_key(AUDIT_INSTANCE_KID)
        .await?
        .ok_or(AuditError::NotInitialized)?;
    let pkcs8 = unwrap_iak_pkcs8(&iak_record, mkek)?;

    let mut guard = head.0.lock().await;
    if !guard.initialized {
        let max_seq = store.max_audit_seq_num().await?;
        let last_hash = if max_seq == 0 {
            String::new()
        } else {
            store
                .scan_audit()
                .await?
                .into_iter()
                .last()
                .map(|e| e.chain_hash)
                .unwrap_or_default()
        };
        guard.seq_num = max_seq;
        guard.last_chain_hash = last_hash;
        guard.initialized = true;
    }

    let mut attempt = 0u32;
    loop {
        let next_seq = guard.seq_num + 1;
        let previous_hash = guard.last_chain_hash.clone();

        let mut entry = AuditEntry {
            seq_num: next_seq,
            timestamp: now_ms,
            op: input.op.clone(),
            kid: input.kid.clone(),
            request_id: input.request_id.clone(),
            user_id: input.user_id.clone(),
            origin: input.origin.clone(),
            duration_ms: input.duration_ms,
            details: input.details.clone(),
            previous_hash,
            chain_hash: String::new(),
            signer_id: iak_record.kid.clone(),
            sig: String::new(),
        };
        entry.chain_hash = compute_chain_hash(&entry);
        entry.sig = sign_chain_hash(&pkcs8, iak_record.alg, &entry.chain_hash)?;

        match store.append_audit_entry(&entry).await {
            Ok(()) => {
                guard.seq_num = entry.seq_num;
                guard.last_chain_hash = entry.chain_hash.clone();
                return Ok(entry);
            }
            Err(StoreError::AuditConcurrentWrite) => {
                attempt += 1;
                if attempt >= MAX_APPEND_RETRIES {
                    return Err(AuditError::ConcurrentWrite);
                }
                // Re-read the head and retry.
                let max_seq = store.max_audit_seq_num().await?;
                let last_hash = store
                    .scan_audit()
                    .await?
                    .into_iter()
                    .last()
                    .map(|e| e.chain_hash)
                    .unwrap_or_default();
                guard.seq_num = max_seq;
                guard.last_chain_hash = last_hash;
                continue;
            }
            Err(other) => return Err(other.into()),
        }
    }
}

/// Result of walking the audit chain end to end.
#[derive(Debug, Clone)]
pub struct AuditVerifyResult {
    /// True iff every entry's linkage and signature checked out.
    pub valid: bool,
    /// Number of entries walked.
    pub verified: u64,
    /// Human-readable problems found, one per failing entry.
    pub errors: Vec<String>,
}

/// Walk the audit chain in `seqNum` order, verifying `chainHash`
/// recomputation, `previousHash` linkage, and the IAK signature over
/// every entry.
pub async fn verify_audit_chain(store: &dyn Store) -> Result<AuditVerifyResult, AuditError> {
    let iak_record = store.get_wrapped_key(AUDIT_INSTANCE_KID).await?;
    let entries = store.scan_audit().await?;

    let mut errors = Vec::new();
    let mut previous_hash = String::new();
    let mut previous_seq = 0u64;

    for entry in &entries {
        if entry.seq_num != previous_seq + 1 {
            errors.push(format!(
                "seqNum gap: expected {}, found {}",
                previous_seq + 1,
                entry.seq_num
            ));
        }
        if entry.previous_hash != previous_hash {
            errors.push(format!("entry {}: previousHash mismatch", entry.seq_num));
        }
        let recomputed = compute_chain_hash(entry);
        if recomputed != entry.chain_hash {
            errors.push(format!("entry {}: chainHash mismatch", entry.seq_num));
        }
        match &iak_record {
            Some(iak) => {
                if verify_chain_hash_sig(&iak.public_key_raw, iak.alg, &entry.chain_hash, &entry.sig).is_err() {
                    errors.push(format!("entry {}: signature verification failed", entry.seq_num));
                }
            }
            None => errors.push(format!("entry {}: no audit key to verify against", entry.seq_num)),
        }

        previous_hash = entry.chain_hash.clone();
        previous_seq = entry.seq_num;
    }

    Ok(AuditVerifyResult {
        valid: errors.is_empty(),
        verified: entries.len() as u64,
        errors,
    })
}
