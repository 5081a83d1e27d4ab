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
#![warn(missing_docs)]

//! AEAD, KDF, signature, and encoding primitives backing the whole KMS.
//!
//! Every primitive here is a thin, typed wrapper over `ring`; nothing in
//! this module persists state or knows about enrollments, leases, or the
//! audit chain.

use base64::Engine;
use ring::{
    aead, digest, hkdf, pbkdf2,
    rand::{SecureRandom, SystemRandom},
    signature::{
        EcdsaKeyPair, Ed25519KeyPair, KeyPair, UnparsedPublicKey, ECDSA_P256_SHA256_ASN1,
        ECDSA_P256_SHA256_ASN1_SIGNING, ED25519,
    },
};
use std::num::NonZeroU32;
use std::time::Instant;
use subtle::ConstantTimeEq;
use thiserror::Error;
use zeroize::Zeroize;

/// AES-256-GCM nonce length.
pub const AES_GCM_NONCE_LEN: usize = 12;
/// Raw uncompressed P-256 public key length (`0x04 || X(32) || Y(32)`).
pub const P256_PUBLIC_KEY_LEN: usize = 65;
/// Length of a P-1363 (fixed-width `r||s`) ECDSA P-256 signature.
pub const P1363_SIGNATURE_LEN: usize = 64;

/// Errors from the crypto primitive layer. Deliberately terse: callers map
/// these onto the spec's user-visible messages at a higher layer rather
/// than leaking internal detail.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// AEAD seal/open failed (bad key, tampered ciphertext, or wrong AAD).
    #[error("aead operation failed")]
    Aead,
    /// HKDF or PBKDF2 derivation failed.
    #[error("key derivation failed")]
    Kdf,
    /// Asymmetric key generation failed.
    #[error("key generation failed")]
    KeyGen,
    /// Signing failed.
    #[error("signing failed")]
    Sign,
    /// Signature verification failed.
    #[error("signature verification failed")]
    Verify,
    /// A public key was the wrong length or wrong leading byte.
    #[error("invalid public key encoding")]
    InvalidPublicKey,
    /// A nonce/IV was the wrong length.
    #[error("invalid nonce length")]
    InvalidNonceLength,
    /// System RNG failed.
    #[error("system randomness unavailable")]
    Rng,
    /// base64url/hex decoding failed.
    #[error("invalid encoding")]
    Encoding,
}

/// Fill a fresh buffer of `len` bytes with cryptographically secure
/// randomness.
pub fn random_bytes(len: usize) -> Result<Vec<u8>, CryptoError> {
    let rng = SystemRandom::new();
    let mut out = vec![0u8; len];
    rng.fill(&mut out).map_err(|_| CryptoError::Rng)?;
    Ok(out)
}

/// SHA-256 digest.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let d = digest::digest(&digest::SHA256, data);
    let mut out = [0u8; 32];
    out.copy_from_slice(d.as_ref());
    out
}

/// Constant-time byte equality (does not short-circuit on first mismatch).
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

// ---------------------------------------------------------------------
// base64url / hex
// ---------------------------------------------------------------------

/// Encode bytes as base64url, no padding (the wire format used throughout
/// the RPC surface: kids, public keys, JWT segments, AAD components).
pub fn base64url_encode(bytes: &[u8]) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Decode base64url, tolerant of trailing `=` padding even though it is
/// never emitted by [`base64url_encode`].
pub fn base64url_decode(s: &str) -> Result<Vec<u8>, CryptoError> {
    let trimmed = s.trim_end_matches('=');
    base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(trimmed)
        .map_err(|_| CryptoError::Encoding)
}

/// Encode bytes as lowercase hex.
pub fn hex_encode(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Decode lowercase or uppercase hex.
pub fn hex_decode(s: &str) -> Result<Vec<u8>, CryptoError> {
    hex::decode(s).map_err(|_| CryptoError::Encoding)
}

// ---------------------------------------------------------------------
// AEAD (AES-256-GCM)
// ---------------------------------------------------------------------

/// Encrypt `plaintext` under `key` with caller-supplied `nonce` and `aad`.
/// Returns ciphertext with the 16-byte GCM tag appended, matching the
/// donor's `encrypt_pkcs8` convention.
pub fn aead_encrypt(
    key: &[u8; 32],
    nonce: &[u8],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if nonce.len() != AES_GCM_NONCE_LEN {
        return Err(CryptoError::InvalidNonceLength);
    }
    let mut nonce_bytes = [0u8; AES_GCM_NONCE_LEN];
    nonce_bytes.copy_from_slice(nonce);
    let nonce = aead::Nonce::assume_unique_for_key(nonce_bytes);

    let unbound = aead::UnboundKey::new(&aead::AES_256_GCM, key).map_err(|_| CryptoError::Aead)?;
    let less_safe = aead::LessSafeKey::new(unbound);

    let mut in_out = plaintext.to_vec();
    less_safe
        .seal_in_place_append_tag(nonce, aead::Aad::from(aad), &mut in_out)
        .map_err(|_| CryptoError::Aead)?;
    Ok(in_out)
}

/// Decrypt `ciphertext` (with appended tag) under `key`, `nonce`, `aad`.
pub fn aead_decrypt(
    key: &[u8; 32],
    nonce: &[u8],
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if nonce.len() != AES_GCM_NONCE_LEN {
        return Err(CryptoError::InvalidNonceLength);
    }
    let mut nonce_bytes = [0u8; AES_GCM_NONCE_LEN];
    nonce_bytes.copy_from_slice(nonce);
    let nonce = aead::Nonce::assume_unique_for_key(nonce_bytes);

    let unbound = aead::UnboundKey::new(&aead::AES_256_GCM, key).map_err(|_| CryptoError::Aead)?;
    let less_safe = aead::LessSafeKey::new(unbound);

    let mut in_out = ciphertext.to_vec();
    let plain = less_safe
        .open_in_place(nonce, aead::Aad::from(aad), &mut in_out)
        .map_err(|_| CryptoError::Aead)?;
    Ok(plain.to_vec())
}

// ---------------------------------------------------------------------
// HKDF-SHA-256
// ---------------------------------------------------------------------

struct HkdfOutputLen(usize);

impl hkdf::KeyType for HkdfOutputLen {
    fn len(&self) -> usize {
        self.0
    }
}

/// HKDF-SHA-256 extract-and-expand. `salt` is optional (HKDF defines an
/// all-zero salt of hash-length when absent; `ring` handles that
/// internally when given an empty salt).
pub fn hkdf_sha256(
    ikm: &[u8],
    salt: Option<&[u8]>,
    info: &[u8],
    out_len: usize,
) -> Result<Vec<u8>, CryptoError> {
    let salt_bytes = salt.unwrap_or(&[]);
    let salt = hkdf::Salt::new(hkdf::HKDF_SHA256, salt_bytes);
    let prk = salt.extract(ikm);
    let okm = prk
        .expand(&[info], HkdfOutputLen(out_len))
        .map_err(|_| CryptoError::Kdf)?;
    let mut out = vec![0u8; out_len];
    okm.fill(&mut out).map_err(|_| CryptoError::Kdf)?;
    Ok(out)
}

// ---------------------------------------------------------------------
// PBKDF2-HMAC-SHA-256 with machine calibration
// ---------------------------------------------------------------------

/// Derive a 32-byte key via PBKDF2-HMAC-SHA-256.
pub fn pbkdf2_sha256(passphrase: &[u8], salt: &[u8], iterations: u32) -> Result<[u8; 32], CryptoError> {
    let iters = NonZeroU32::new(iterations).ok_or(CryptoError::Kdf)?;
    let mut out = [0u8; 32];
    pbkdf2::derive(pbkdf2::PBKDF2_HMAC_SHA256, iters, salt, passphrase, &mut out);
    Ok(out)
}

/// Binary-search an iteration count whose measured PBKDF2-HMAC-SHA-256 cost
/// on this machine falls inside `target_range_ms` (inclusive), clamped to
/// `bounds`. Calibration uses a throwaway passphrase/salt and is expected
/// to take up to a few hundred milliseconds (spec.md §5).
pub fn calibrate_pbkdf2_iterations(target_range_ms: (u32, u32), bounds: (u32, u32)) -> u32 {
    let (lo_ms, hi_ms) = target_range_ms;
    let (lo_iters, hi_iters) = bounds;
    let probe_salt = [0x5au8; 16];
    let probe_pass = b"kms-pbkdf2-calibration-probe";

    let measure = |iters: u32| -> u128 {
        let start = Instant::now();
        let _ = pbkdf2_sha256(probe_pass, &probe_salt, iters);
        start.elapsed().as_millis()
    };

    // Find a cheap baseline to scale from, then binary-search around it.
    let mut low = lo_iters.max(1);
    let mut high = hi_iters;
    // Fast path: estimate using a small sample and scale linearly, then
    // refine with a bounded binary search so we never guess wildly off.
    let sample_iters = low.max(10_000);
    let sample_ms = measure(sample_iters).max(1) as u64;
    let target_mid_ms = ((lo_ms as u64) + (hi_ms as u64)) / 2;
    let mut estimate = ((sample_iters as u64) * target_mid_ms / sample_ms) as u32;
    estimate = estimate.clamp(lo_iters, hi_iters);

    // Bounded binary search refinement (at most ~12 probes).
    for _ in 0..12 {
        let measured = measure(estimate);
        if measured >= lo_ms as u128 && measured <= hi_ms as u128 {
            break;
        }
        if measured < lo_ms as u128 {
            low = estimate;
            estimate = if high > estimate {
                estimate + (high - estimate) / 2 + 1
            } else {
                (estimate.saturating_mul(2)).min(hi_iters)
            };
        } else {
            high = estimate;
            estimate = low + (estimate - low) / 2;
        }
        estimate = estimate.clamp(lo_iters, hi_iters);
        if low >= high {
            break;
        }
    }

    estimate.clamp(lo_iters, hi_iters)
}

// ---------------------------------------------------------------------
// ECDSA P-256
// ---------------------------------------------------------------------

/// A generated P-256 keypair: PKCS#8 private bytes (zeroized on drop) and
/// the raw uncompressed public point.
pub struct P256Keypair {
    /// PKCS#8 document bytes. Caller wraps and discards this; never
    /// persisted in cleartext.
    pub pkcs8: Vec<u8>,
    /// Raw uncompressed SEC1 public key (65 bytes, leading `0x04`).
    pub public_key_raw: [u8; P256_PUBLIC_KEY_LEN],
}

impl Drop for P256Keypair {
    fn drop(&mut self) {
        self.pkcs8.zeroize();
    }
}

/// Generate a fresh P-256 ECDSA keypair.
pub fn generate_p256_keypair() -> Result<P256Keypair, CryptoError> {
    let rng = SystemRandom::new();
    let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &rng)
        .map_err(|_| CryptoError::KeyGen)?;
    let keypair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, pkcs8.as_ref(), &rng)
        .map_err(|_| CryptoError::KeyGen)?;
    let pk = keypair.public_key().as_ref();
    if pk.len() != P256_PUBLIC_KEY_LEN {
        return Err(CryptoError::KeyGen);
    }
    let mut public_key_raw = [0u8; P256_PUBLIC_KEY_LEN];
    public_key_raw.copy_from_slice(pk);
    Ok(P256Keypair {
        pkcs8: pkcs8.as_ref().to_vec(),
        public_key_raw,
    })
}

/// Sign `msg` with a P-256 PKCS#8 private key. Returns a DER-encoded
/// ASN.1 signature (the format Web Crypto / `ring` emit natively); convert
/// with [`crate::core::crypto::sigformat::der_to_p1363`] for JWS use.
pub fn sign_ecdsa_p256_der(pkcs8: &[u8], msg: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let rng = SystemRandom::new();
    let keypair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, pkcs8, &rng)
        .map_err(|_| CryptoError::Sign)?;
    let sig = keypair.sign(&rng, msg).map_err(|_| CryptoError::Sign)?;
    Ok(sig.as_ref().to_vec())
}

/// Verify a DER-encoded P-256 ECDSA signature against a raw uncompressed
/// public key.
pub fn verify_ecdsa_p256_der(
    public_key_raw: &[u8],
    msg: &[u8],
    sig_der: &[u8],
) -> Result<(), CryptoError> {
    if public_key_raw.len() != P256_PUBLIC_KEY_LEN {
        return Err(CryptoError::InvalidPublicKey);
    }
    let pk = UnparsedPublicKey::new(&ECDSA_P256_SHA256_ASN1, public_key_raw);
    pk.verify(msg, sig_der).map_err(|_| CryptoError::Verify)
}

// ---------------------------------------------------------------------
// Ed25519 (instance audit key default algorithm)
// ---------------------------------------------------------------------

/// A generated Ed25519 keypair: PKCS#8 private bytes (zeroized on drop)
/// and the raw 32-byte public key.
pub struct Ed25519Keypair {
    /// PKCS#8 document bytes.
    pub pkcs8: Vec<u8>,
    /// Raw 32-byte public key.
    pub public_key: [u8; 32],
}

impl Drop for Ed25519Keypair {
    fn drop(&mut self) {
        self.pkcs8.zeroize();
    }
}

/// Generate a fresh Ed25519 keypair.
pub fn generate_ed25519_keypair() -> Result<Ed25519Keypair, CryptoError> {
    let rng = SystemRandom::new();
    let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).map_err(|_| CryptoError::KeyGen)?;
    let keypair = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).map_err(|_| CryptoError::KeyGen)?;
    let pk = keypair.public_key().as_ref();
    let mut public_key = [0u8; 32];
    public_key.copy_from_slice(pk);
    Ok(Ed25519Keypair {
        pkcs8: pkcs8.as_ref().to_vec(),
        public_key,
    })
}

/// Sign `msg` with an Ed25519 PKCS#8 private key. Output is always 64
/// bytes; no format conversion is needed (unlike ECDSA).
pub fn sign_ed25519(pkcs8: &[u8], msg: &[u8]) -> Result<[u8; 64], CryptoError> {
    let keypair = Ed25519KeyPair::from_pkcs8(pkcs8).map_err(|_| CryptoError::Sign)?;
    let sig = keypair.sign(msg);
    let bytes = sig.as_ref();
    if bytes.len() != 64 {
        return Err(CryptoError::Sign);
    }
    let mut out = [0u8; 64];
    out.copy_from_slice(bytes);
    Ok(out)
}

/// Verify an Ed25519 signature.
pub fn verify_ed25519(public_key: &[u8], msg: &[u8], sig: &[u8]) -> Result<(), CryptoError> {
    if public_key.len() != 32 || sig.len() != 64 {
        return Err(CryptoError::InvalidPublicKey);
    }
    let pk = UnparsedPublicKey::new(&ED25519, public_key);
    pk.verify(msg, sig).map_err(|_| CryptoError::Verify)
}

// ---------------------------------------------------------------------
// SPKI export (audit public-key export wire format, spec.md §6)
// ---------------------------------------------------------------------

/// Fixed DER prefix for an Ed25519 `SubjectPublicKeyInfo` (RFC 8410),
/// everything up to and including the `BIT STRING` tag/length/unused-bits
/// octet; the 32-byte raw public key follows directly.
const ED25519_SPKI_PREFIX: [u8; 12] = [
    0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x03, 0x21, 0x00,
];

/// Fixed DER prefix for a P-256 `SubjectPublicKeyInfo` (id-ecPublicKey +
/// prime256v1 OIDs), everything up to and including the `BIT STRING`
/// tag/length/unused-bits octet; the 65-byte raw uncompressed point
/// (leading `0x04`) follows directly.
const P256_SPKI_PREFIX: [u8; 26] = [
    0x30, 0x59, 0x30, 0x13, 0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01, 0x06, 0x08, 0x2a,
    0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07, 0x03, 0x42, 0x00,
];

/// Wrap a raw 32-byte Ed25519 public key in its DER `SubjectPublicKeyInfo`
/// encoding (44 bytes total).
pub fn ed25519_spki(raw: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if raw.len() != 32 {
        return Err(CryptoError::InvalidPublicKey);
    }
    let mut out = Vec::with_capacity(ED25519_SPKI_PREFIX.len() + raw.len());
    out.extend_from_slice(&ED25519_SPKI_PREFIX);
    out.extend_from_slice(raw);
    Ok(out)
}

/// Wrap a raw 65-byte uncompressed P-256 public key in its DER
/// `SubjectPublicKeyInfo` encoding (91 bytes total).
pub fn p256_spki(raw: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if raw.len() != P256_PUBLIC_KEY_LEN || raw[0] != 0x04 {
        return Err(CryptoError::InvalidPublicKey);
    }
    let mut out = Vec::with_capacity(P256_SPKI_PREFIX.len() + raw.len());
    out.extend_from_slice(&P256_SPKI_PREFIX);
    out.extend_from_slice(raw);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64url_round_trip() {
        for len in [0usize, 1, 16, 31, 32, 65, 255] {
            let bytes = (0..len).map(|i| (i * 7 + 3) as u8).collect::<Vec<u8>>();
            let enc = base64url_encode(&bytes);
            assert!(!enc.contains('='));
            let dec = base64url_decode(&enc).unwrap();
            assert_eq!(dec, bytes);
        }
    }

    #[test]
    fn base64url_decode_tolerates_padding() {
        let bytes = b"hello world";
        let enc = base64url_encode(bytes);
        let padded = format!("{enc}==");
        assert_eq!(base64url_decode(&padded).unwrap(), bytes);
    }

    #[test]
    fn aead_round_trip() {
        let key = [7u8; 32];
        let nonce = [1u8; AES_GCM_NONCE_LEN];
        let aad = b"bind-me";
        let ct = aead_encrypt(&key, &nonce, aad, b"secret payload").unwrap();
        let pt = aead_decrypt(&key, &nonce, aad, &ct).unwrap();
        assert_eq!(pt, b"secret payload");
    }

    #[test]
    fn aead_rejects_tampered_aad() {
        let key = [7u8; 32];
        let nonce = [1u8; AES_GCM_NONCE_LEN];
        let ct = aead_encrypt(&key, &nonce, b"aad-a", b"secret payload").unwrap();
        assert!(aead_decrypt(&key, &nonce, b"aad-b", &ct).is_err());
    }

    #[test]
    fn aead_rejects_bad_nonce_length() {
        let key = [7u8; 32];
        assert!(aead_encrypt(&key, &[0u8; 8], b"aad", b"pt").is_err());
    }

    #[test]
    fn hkdf_is_deterministic() {
        let a = hkdf_sha256(b"ikm", Some(b"salt"), b"info", 32).unwrap();
        let b = hkdf_sha256(b"ikm", Some(b"salt"), b"info", 32).unwrap();
        assert_eq!(a, b);
        let c = hkdf_sha256(b"ikm", Some(b"salt"), b"other-info", 32).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn ecdsa_p256_sign_verify_round_trip() {
        let kp = generate_p256_keypair().unwrap();
        let sig = sign_ecdsa_p256_der(&kp.pkcs8, b"message").unwrap();
        verify_ecdsa_p256_der(&kp.public_key_raw, b"message", &sig).unwrap();
        assert!(verify_ecdsa_p256_der(&kp.public_key_raw, b"tampered", &sig).is_err());
    }

    #[test]
    fn ed25519_sign_verify_round_trip() {
        let kp = generate_ed25519_keypair().unwrap();
        let sig = sign_ed25519(&kp.pkcs8, b"message").unwrap();
        verify_ed25519(&kp.public_key, b"message", &sig).unwrap();
    }

    #[test]
    fn constant_time_eq_basic() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }

    #[test]
    fn pbkdf2_calibration_stays_in_bounds() {
        let iters = calibrate_pbkdf2_iterations((1, 5000), (50_000, 2_000_000));
        assert!(iters >= 50_000 && iters <= 2_000_000);
    }
}
