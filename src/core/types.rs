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

//! Core data model: enrollment records, wrapped keys, audit entries, lease
//! records, and the quota schedule they're governed by. These types are
//! the persisted shape of the system; derivation and unlock live in
//! `core::security`, signing in `core::keyservice`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The crate's own semver, stamped into every AAD binding and audit entry
/// so records are bound to the build that created them.
pub fn kms_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// An authenticator enrollment method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnrollmentMethod {
    /// Passphrase stretched via calibrated PBKDF2-HMAC-SHA-256.
    Passphrase,
    /// WebAuthn PRF extension output used as HKDF input keying material.
    PasskeyPrf,
    /// WebAuthn user-verification-only gate; no extra entropy contributed.
    PasskeyGate,
}

impl EnrollmentMethod {
    /// Stable wire name, also used as the method tag inside AAD.
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentMethod::Passphrase => "passphrase",
            EnrollmentMethod::PasskeyPrf => "passkey-prf",
            EnrollmentMethod::PasskeyGate => "passkey-gate",
        }
    }
}

/// Method-specific derivation inputs, persisted alongside the ciphertext.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "kebab-case")]
pub enum EnrollmentInputs {
    /// `salt`: 32 random bytes. `pbkdf2Iterations`: calibrated at setup,
    /// reused verbatim at unlock.
    Passphrase {
        /// Random salt bound to this enrollment.
        salt: Vec<u8>,
        /// Calibrated PBKDF2 iteration count.
        pbkdf2_iterations: u32,
    },
    /// `credentialId`/`rpId` identify the authenticator; `appSalt` is the
    /// HKDF salt mixed with the PRF output at unlock time.
    PasskeyPrf {
        /// WebAuthn credential identifier.
        credential_id: Vec<u8>,
        /// Relying party identifier, if supplied at setup.
        rp_id: Option<String>,
        /// Application-chosen HKDF salt.
        app_salt: Vec<u8>,
    },
    /// No extra entropy; `gateSalt` is a deterministic per-enrollment
    /// value so the HKDF call still has a salt argument.
    PasskeyGate {
        /// WebAuthn credential identifier.
        credential_id: Vec<u8>,
        /// Relying party identifier, if supplied at setup.
        rp_id: Option<String>,
        /// Deterministic per-enrollment HKDF salt.
        gate_salt: Vec<u8>,
    },
}

impl EnrollmentInputs {
    /// The method tag this set of inputs belongs to.
    pub fn method(&self) -> EnrollmentMethod {
        match self {
            EnrollmentInputs::Passphrase { .. } => EnrollmentMethod::Passphrase,
            EnrollmentInputs::PasskeyPrf { .. } => EnrollmentMethod::PasskeyPrf,
            EnrollmentInputs::PasskeyGate { .. } => EnrollmentMethod::PasskeyGate,
        }
    }
}

/// Persisted enrollment record: a method-bound, AEAD-wrapped copy of MS.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentRecord {
    /// Opaque identifier for this enrollment, unique per record.
    pub enrollment_id: String,
    /// The user this enrollment belongs to.
    pub user_id: String,
    /// Format version of this record, for forward compatibility.
    pub alg_version: u32,
    /// Method-specific derivation inputs.
    pub inputs: EnrollmentInputs,
    /// 12-byte AEAD nonce used to encrypt MS under this enrollment.
    pub wrap_iv: Vec<u8>,
    /// AEAD ciphertext (MS, with appended tag).
    pub wrapped_ms: Vec<u8>,
    /// Unix millis this enrollment was created.
    pub created_at: u64,
}

/// Algorithm for a wrapped asymmetric key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum KeyAlg {
    /// ECDSA P-256 (VAPID keys, audit keys when `AuditKeyAlg::EcdsaP256`).
    #[serde(rename = "ES256")]
    Es256,
    /// Ed25519 (default audit instance key algorithm).
    Ed25519,
}

impl KeyAlg {
    /// Wire string used in AAD and JWT headers.
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyAlg::Es256 => "ES256",
            KeyAlg::Ed25519 => "Ed25519",
        }
    }
}

/// What a wrapped key is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyPurpose {
    /// A VAPID (Web Push) signing key.
    Vapid,
    /// The instance audit signing key.
    Audit,
}

impl KeyPurpose {
    /// Wire string used in AAD.
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyPurpose::Vapid => "vapid",
            KeyPurpose::Audit => "audit",
        }
    }
}

/// Reserved `kid` for the instance audit key's wrapped-key record.
pub const AUDIT_INSTANCE_KID: &str = "audit-instance";

/// A wrapped private key record, persisted by `kid`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WrappedKeyRecord {
    /// Content-addressed (RFC 7638) identifier for VAPID keys; the fixed
    /// sentinel [`AUDIT_INSTANCE_KID`] for the audit key.
    pub kid: String,
    /// Signature algorithm.
    pub alg: KeyAlg,
    /// What this key is used for.
    pub purpose: KeyPurpose,
    /// Unix millis this record was created.
    pub created_at: u64,
    /// Raw uncompressed public key (65 bytes for P-256, 32 for Ed25519).
    pub public_key_raw: Vec<u8>,
    /// 12-byte AEAD nonce used to wrap the private key.
    pub wrap_iv: Vec<u8>,
    /// AEAD ciphertext of the PKCS#8 private key (with appended tag).
    pub wrapped_private_key: Vec<u8>,
}

/// An append-only, hash-chained, signed audit entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Strictly monotonic, dense, starting at 1.
    pub seq_num: u64,
    /// Unix millis.
    pub timestamp: u64,
    /// Operation name, e.g. `"generate-vapid"`.
    pub op: String,
    /// The `kid` this operation concerned, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    /// Caller-supplied request identifier for correlation.
    pub request_id: String,
    /// The user this operation was performed for, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Request origin, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    /// How long the operation took, in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Free-form operation-specific detail (e.g. rotated kids).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// `chainHash` of the previous entry, or `""` for `seqNum == 1`.
    pub previous_hash: String,
    /// `SHA-256(canonical-json(entry excluding chainHash/sig))`, hex.
    pub chain_hash: String,
    /// `kid` of the audit key that produced `sig`.
    pub signer_id: String,
    /// Signature over `chainHash` under the instance audit key, hex.
    pub sig: String,
}

/// An endpoint a lease is permitted to sign VAPID JWTs for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseSubscription {
    /// Web Push endpoint URL.
    pub url: String,
    /// `aud` to embed in the JWT (the endpoint's origin).
    pub aud: String,
    /// Opaque endpoint identifier, used to key per-endpoint quotas.
    pub eid: String,
}

/// Per-lease rate limit policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quotas {
    /// Max VAPID tokens issued per rolling hour.
    pub tokens_per_hour: u32,
    /// Max sends per rolling minute, across all endpoints.
    pub sends_per_minute: u32,
    /// Burst allowance layered on top of `sendsPerMinute`.
    pub burst_sends: u32,
    /// Max sends per rolling minute, per endpoint identifier.
    pub sends_per_minute_per_eid: u32,
}

impl Default for Quotas {
    fn default() -> Self {
        Quotas {
            tokens_per_hour: 100,
            sends_per_minute: 10,
            burst_sends: 50,
            sends_per_minute_per_eid: 5,
        }
    }
}

/// A lease: an attenuated, time-bounded capability to sign VAPID JWTs for
/// one `kid` and a fixed endpoint set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseRecord {
    /// Opaque unique lease identifier.
    pub lease_id: String,
    /// The user this lease belongs to.
    pub user_id: String,
    /// The VAPID `kid` this lease is bound to at creation time.
    pub kid: String,
    /// Endpoints this lease may sign for.
    pub subs: Vec<LeaseSubscription>,
    /// Original requested TTL in hours (`0 < ttlHours <= 720`).
    pub ttl_hours: u32,
    /// Whether `extendLeases` may renew this lease without fresh auth.
    pub auto_extend: bool,
    /// Unix millis this lease was created.
    pub created_at: u64,
    /// Unix millis this lease expires.
    pub exp: u64,
    /// Quota schedule for this lease.
    pub quotas: Quotas,
}

/// Lazy sliding-window counters for one endpoint identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointCounter {
    /// Sends observed in the current per-eid minute window.
    pub sends_this_minute: u32,
    /// Unix millis the current per-eid minute window started.
    pub last_minute_reset_at: u64,
}

/// Per-lease rate-limit counters, refilled lazily on observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitCounter {
    /// The lease these counters belong to.
    pub lease_id: String,
    /// Tokens issued in the current hour window.
    pub tokens_issued: u32,
    /// Unix millis the current hour window started.
    pub last_reset_at: u64,
    /// Sends observed in the current global (lease-wide) minute window.
    pub sends_this_minute: u32,
    /// Unix millis the current global minute window started.
    pub last_minute_reset_at: u64,
    /// Per-endpoint send counters, keyed by `eid`.
    pub per_endpoint: BTreeMap<String, EndpointCounter>,
}

impl RateLimitCounter {
    /// A fresh, zeroed counter for a newly created lease.
    pub fn new(lease_id: String, now: u64) -> Self {
        RateLimitCounter {
            lease_id,
            tokens_issued: 0,
            last_reset_at: now,
            sends_this_minute: 0,
            last_minute_reset_at: now,
            per_endpoint: BTreeMap::new(),
        }
    }
}

/// Why `verifyLease` considered a lease invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LeaseInvalidReason {
    /// No lease with this id exists.
    NotFound,
    /// `now >= lease.exp`.
    Expired,
    /// The lease's bound `kid` is no longer the current VAPID key.
    WrongKey,
}

impl LeaseInvalidReason {
    /// Wire string, matching spec.md's literal reason strings.
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaseInvalidReason::NotFound => "not-found",
            LeaseInvalidReason::Expired => "expired",
            LeaseInvalidReason::WrongKey => "wrong-key",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enrollment_method_wire_names() {
        assert_eq!(EnrollmentMethod::Passphrase.as_str(), "passphrase");
        assert_eq!(EnrollmentMethod::PasskeyPrf.as_str(), "passkey-prf");
        assert_eq!(EnrollmentMethod::PasskeyGate.as_str(), "passkey-gate");
    }

    #[test]
    fn default_quotas_match_spec_literals() {
        let q = Quotas::default();
        assert_eq!(q.tokens_per_hour, 100);
        assert_eq!(q.sends_per_minute, 10);
        assert_eq!(q.burst_sends, 50);
        assert_eq!(q.sends_per_minute_per_eid, 5);
    }

    #[test]
    fn kms_version_is_nonempty() {
        assert!(!kms_version().is_empty());
    }
}
