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

//! VAPID (P-256) key generation, rotation, public-key export, and
//! RFC 8292-policed JWT signing.

use serde_json::json;
use thiserror::Error;

use crate::core::audit::wrapped_key_aad;
use crate::core::crypto::canonical_json::canonicalize;
use crate::core::crypto::primitives::{self, CryptoError};
use crate::core::crypto::sigformat::{self, SigFormatError};
use crate::core::crypto::thumbprint;
use crate::core::persistence::{Store, StoreError};
use crate::core::security::secret::SecretBytes;
use crate::core::types::{KeyAlg, KeyPurpose, WrappedKeyRecord};

/// Errors from VAPID key generation, rotation, or JWT signing.
#[derive(Debug, Error)]
pub enum KeyServiceError {
    /// No wrapped key exists with the requested `kid`.
    #[error("No wrapped key with id: {0}")]
    NotFound(String),
    /// The JWT payload violated the RFC 8292 policy conjunction.
    #[error("{0}")]
    Policy(#[from] PolicyError),
    /// A crypto primitive failed.
    #[error("crypto operation failed")]
    Crypto(#[from] CryptoError),
    /// Signature format conversion failed.
    #[error("signature format conversion failed")]
    SigFormat(#[from] SigFormatError),
    /// The underlying store failed.
    #[error("storage error")]
    Store(#[from] StoreError),
}

/// Why a `signJWT` payload was rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// `aud` missing or not an `https://` URL.
    #[error("aud must be present and an https:// URL")]
    InvalidAud,
    /// `sub` missing or not `mailto:`/`https://`.
    #[error("sub must be present and start with mailto: or https:")]
    InvalidSub,
    /// `exp` missing, not in the future, or more than 24 hours out.
    #[error("exp must be in the future and at most 24 hours from now")]
    InvalidExp,
}

/// The caller-supplied VAPID claim set, prior to policy validation.
#[derive(Debug, Clone)]
pub struct JwtPayloadInput {
    /// Audience: the push service origin.
    pub aud: String,
    /// Subject: a contact URI for the application server operator.
    pub sub: String,
    /// Expiry, unix seconds.
    pub exp: u64,
    /// JWT id; a random one is generated if absent.
    pub jti: Option<String>,
}

/// A signed VAPID JWT and its metadata.
#[derive(Debug, Clone)]
pub struct SignedJwt {
    /// `header.payload.signature`, base64url throughout.
    pub jwt: String,
    /// The `jti` actually embedded (caller-supplied or generated).
    pub jti: String,
    /// The `exp` actually embedded.
    pub exp: u64,
}

const MAX_JWT_TTL_SECS: u64 = 24 * 3600;

fn validate_policy(payload: &JwtPayloadInput, now_secs: u64) -> Result<(), PolicyError> {
    if !payload.aud.starts_with("https://") {
        return Err(PolicyError::InvalidAud);
    }
    if !(payload.sub.starts_with("mailto:") || payload.sub.starts_with("https://")) {
        return Err(PolicyError::InvalidSub);
    }
    if payload.exp <= now_secs || payload.exp > now_secs + MAX_JWT_TTL_SECS {
        return Err(PolicyError::InvalidExp);
    }
    Ok(())
}

fn wrap_private_key(
    mkek: &SecretBytes,
    kid: &str,
    alg: KeyAlg,
    purpose: KeyPurpose,
    created_at: u64,
    pkcs8: &[u8],
) -> Result<(Vec<u8>, Vec<u8>), CryptoError> {
    let wrap_iv = primitives::random_bytes(primitives::AES_GCM_NONCE_LEN)?;
    let aad = wrapped_key_aad(kid, alg, purpose, created_at);
    let mut mkek_bytes = [0u8; 32];
    mkek_bytes.copy_from_slice(mkek.expose());
    let wrapped = primitives::aead_encrypt(&mkek_bytes, &wrap_iv, &aad, pkcs8)?;
    Ok((wrap_iv, wrapped))
}

fn unwrap_private_key(record: &WrappedKeyRecord, mkek: &SecretBytes) -> Result<Vec<u8>, CryptoError> {
    let aad = wrapped_key_aad(&record.kid, record.alg, record.purpose, record.created_at);
    let mut mkek_bytes = [0u8; 32];
    mkek_bytes.copy_from_slice(mkek.expose());
    primitives::aead_decrypt(&mkek_bytes, &record.wrap_iv, &aad, &record.wrapped_private_key)
}

/// Generate a fresh P-256 VAPID keypair, wrap its private key under
/// `mkek`, and persist the record.
pub async fn generate_vapid(
    store: &dyn Store,
    mkek: &SecretBytes,
    now_ms: u64,
) -> Result<WrappedKeyRecord, KeyServiceError> {
    let kp = primitives::generate_p256_keypair()?;
    let kid = thumbprint::kid_from_public_key_raw(&kp.public_key_raw)?;
    let (wrap_iv, wrapped_private_key) =
        wrap_private_key(mkek, &kid, KeyAlg::Es256, KeyPurpose::Vapid, now_ms, &kp.pkcs8)?;

    let record = WrappedKeyRecord {
        kid,
        alg: KeyAlg::Es256,
        purpose: KeyPurpose::Vapid,
        created_at: now_ms,
        public_key_raw: kp.public_key_raw.to_vec(),
        wrap_iv,
        wrapped_private_key,
    };
    store.put_wrapped_key(&record).await?;
    Ok(record)
}

/// Delete every `purpose:"vapid"` wrapped-key record, then generate a
/// fresh one. Returns the deleted kids and the newly created record.
pub async fn regenerate_vapid(
    store: &dyn Store,
    mkek: &SecretBytes,
    now_ms: u64,
) -> Result<(Vec<String>, WrappedKeyRecord), KeyServiceError> {
    let existing = store.list_wrapped_keys_by_purpose(KeyPurpose::Vapid).await?;
    let mut deleted_kids = Vec::with_capacity(existing.len());
    for record in existing {
        store.delete_wrapped_key(&record.kid).await?;
        deleted_kids.push(record.kid);
    }
    let new_record = generate_vapid(store, mkek, now_ms).await?;
    Ok((deleted_kids, new_record))
}

/// The newest `purpose:"vapid"` wrapped-key record, if any.
pub async fn current_vapid_key(store: &dyn Store) -> Result<Option<WrappedKeyRecord>, StoreError> {
    let mut keys = store.list_wrapped_keys_by_purpose(KeyPurpose::Vapid).await?;
    Ok(keys.pop())
}

/// Look up a wrapped key's raw public key by `kid`.
pub async fn get_public_key(store: &dyn Store, kid: &str) -> Result<Vec<u8>, KeyServiceError> {
    store
        .get_wrapped_key(kid)
        .await?
        .map(|r| r.public_key_raw)
        .ok_or_else(|| KeyServiceError::NotFound(kid.to_string()))
}

/// Validate `payload` against RFC 8292 policy, unwrap the private key for
/// `kid`, and produce a signed VAPID JWT (`header.payload.signature`,
/// P-1363 signature, all base64url).
pub async fn sign_jwt(
    store: &dyn Store,
    mkek: &SecretBytes,
    kid: &str,
    payload: JwtPayloadInput,
    now_secs: u64,
) -> Result<SignedJwt, KeyServiceError> {
    validate_policy(&payload, now_secs)?;

    let record = store
        .get_wrapped_key(kid)
        .await?
        .ok_or_else(|| KeyServiceError::NotFound(kid.to_string()))?;
    let pkcs8 = unwrap_private_key(&record, mkek)?;

    let jti = payload.jti.unwrap_or_else(|| {
        primitives::base64url_encode(&primitives::random_bytes(16).unwrap_or_default())
    });

    let header = json!({"alg": "ES256", "typ": "JWT", "kid": kid});
    let body = json!({"aud": payload.aud, "sub": payload.sub, "exp": payload.exp, "jti": jti});

    let header_b64 = primitives::base64url_encode(canonicalize(&header).as_bytes());
    let payload_b64 = primitives::base64url_encode(canonicalize(&body).as_bytes());
    let signing_input = format!("{header_b64}.{payload_b64}");

    let der_sig = primitives::sign_ecdsa_p256_der(&pkcs8, signing_input.as_bytes())?;
    let p1363_sig = sigformat::der_to_p1363(&der_sig)?;
    let sig_b64 = primitives::base64url_encode(&p1363_sig);

    Ok(SignedJwt {
        jwt: format!("{signing_input}.{sig_b64}"),
        jti,
        exp: payload.exp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::persistence::SledStore;

    fn test_mkek() -> SecretBytes {
        SecretBytes::new(vec![5u8; 32])
    }

    #[tokio::test]
    async fn generate_then_sign_round_trips() {
        let store = SledStore::open_temporary().unwrap();
        let mkek = test_mkek();
        let record = generate_vapid(&store, &mkek, 1000).await.unwrap();
        assert_eq!(record.public_key_raw.len(), 65);
        assert_eq!(record.public_key_raw[0], 0x04);
        assert_eq!(record.kid.len(), 43);

        let signed = sign_jwt(
            &store,
            &mkek,
            &record.kid,
            JwtPayloadInput {
                aud: "https://fcm.googleapis.com".into(),
                sub: "mailto:t@example.com".into(),
                exp: 1000 + 600,
                jti: None,
            },
            1000,
        )
        .await
        .unwrap();

        let parts: Vec<&str> = signed.jwt.split('.').collect();
        assert_eq!(parts.len(), 3);
        let sig_bytes = primitives::base64url_decode(parts[2]).unwrap();
        assert_eq!(sig_bytes.len(), 64);
    }

    #[tokio::test]
    async fn regenerate_invalidates_old_kid() {
        let store = SledStore::open_temporary().unwrap();
        let mkek = test_mkek();
        let first = generate_vapid(&store, &mkek, 1000).await.unwrap();
        let (deleted, second) = regenerate_vapid(&store, &mkek, 2000).await.unwrap();
        assert_eq!(deleted, vec![first.kid.clone()]);
        assert_ne!(first.kid, second.kid);
        assert!(store.get_wrapped_key(&first.kid).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn policy_rejects_non_https_aud() {
        let store = SledStore::open_temporary().unwrap();
        let mkek = test_mkek();
        let record = generate_vapid(&store, &mkek, 1000).await.unwrap();
        let err = sign_jwt(
            &store,
            &mkek,
            &record.kid,
            JwtPayloadInput {
                aud: "http://fcm.googleapis.com".into(),
                sub: "mailto:t@example.com".into(),
                exp: 1000 + 600,
                jti: None,
            },
            1000,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, KeyServiceError::Policy(PolicyError::InvalidAud)));
    }

    #[tokio::test]
    async fn policy_rejects_exp_beyond_24_hours() {
        let store = SledStore::open_temporary().unwrap();
        let mkek = test_mkek();
        let record = generate_vapid(&store, &mkek, 1000).await.unwrap();
        let err = sign_jwt(
            &store,
            &mkek,
            &record.kid,
            JwtPayloadInput {
                aud: "https://fcm.googleapis.com".into(),
                sub: "mailto:t@example.com".into(),
                exp: 1000 + 90_000,
                jti: None,
            },
            1000,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, KeyServiceError::Policy(PolicyError::InvalidExp)));
    }

    #[tokio::test]
    async fn unknown_kid_is_not_found() {
        let store = SledStore::open_temporary().unwrap();
        let mkek = test_mkek();
        let err = get_public_key(&store, "does-not-exist").await.unwrap_err();
        assert!(matches!(err, KeyServiceError::NotFound(_)));
        let _ = mkek;
    }
}
