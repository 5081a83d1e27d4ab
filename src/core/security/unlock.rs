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

//! The per-operation unlock context: the central safety primitive that
//! owns MS and the derived MKEK for exactly the duration of one closure
//! call and guarantees zeroization on every exit path.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

use crate::core::crypto::primitives;
use crate::core::security::enrollment::{unlock_enrollment, Credentials};
use crate::core::security::secret::SecretBytes;
use crate::core::types::EnrollmentRecord;

/// Errors from enrollment setup, unlock, or the `withUnlock` context.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UnlockError {
    /// Passphrase credentials failed AEAD decryption.
    #[error("Invalid passphrase")]
    InvalidPassphrase,
    /// Non-passphrase credentials failed AEAD decryption.
    #[error("Decryption failed")]
    DecryptionFailed,
    /// A passkey-gate unlock was attempted with no matching enrollment.
    #[error("Passkey gate not set up")]
    PasskeyGateNotSetUp,
    /// A passkey-PRF unlock was attempted with no matching enrollment.
    #[error("Passkey not set up")]
    PasskeyNotSetUp,
    /// Credentials named a method that does not match the enrollment
    /// record being unlocked against.
    #[error("enrollment method mismatch")]
    MethodMismatch,
    /// No enrollment exists at all for this user.
    #[error("KMS not setup")]
    NotSetUp,
    /// Invariant (i): at most one enrollment per `{userId, method}`.
    #[error("enrollment already exists for this method")]
    AlreadyEnrolled,
    /// `withUnlock` was invoked again from within its own closure.
    #[error("reentrant withUnlock call")]
    Reentrant,
    /// A crypto primitive failed (derivation, AEAD, keygen).
    #[error("crypto operation failed")]
    Crypto,
}

/// Per-KMS-instance reentrancy guard for `with_unlock`. The system is
/// single-threaded cooperative (spec.md §5): one flag is sufficient, no
/// per-user tracking needed.
#[derive(Debug, Default)]
pub struct UnlockGuard {
    in_use: AtomicBool,
}

impl UnlockGuard {
    /// A fresh, unlocked guard.
    pub fn new() -> Self {
        UnlockGuard {
            in_use: AtomicBool::new(false),
        }
    }
}

/// The result of one `with_unlock` call: the closure's output plus the
/// unlock/lock timestamps spec.md §4.3 requires.
#[derive(Debug)]
pub struct UnlockOutcome<T> {
    /// The closure's return value.
    pub result: T,
    /// Unix millis MS was unlocked.
    pub unlock_time: u64,
    /// Unix millis MS was zeroized and the context released.
    pub lock_time: u64,
    /// `lock_time - unlock_time`.
    pub duration_ms: u64,
}

const MKEK_INFO: &[u8] = b"kms-mkek-v1";

/// Derive MKEK from MS via HKDF-SHA-256 with a fixed context string.
pub fn derive_mkek(ms: &SecretBytes) -> Result<SecretBytes, UnlockError> {
    let okm = primitives::hkdf_sha256(ms.expose(), None, MKEK_INFO, 32)
        .map_err(|_| UnlockError::Crypto)?;
    Ok(SecretBytes::new(okm))
}

/// Find the enrollment matching `credentials` among `enrollments`, unlock
/// it, derive MKEK, invoke `op` with owned copies of `(mkek, ms)`, then
/// zeroize and return timestamps alongside the closure's result.
///
/// `op` receives MS and MKEK by value so their lifetime is exactly the
/// closure's execution; both are dropped (and therefore zeroized) the
/// moment the returned future resolves, regardless of whether it resolved
/// via success or error.
pub async fn with_unlock<F, Fut, T>(
    guard: &UnlockGuard,
    enrollments: &[EnrollmentRecord],
    config: &crate::config::KmsConfig,
    credentials: &Credentials,
    now_ms: impl Fn() -> u64,
    op: F,
) -> Result<UnlockOutcome<T>, UnlockError>
where
    F: FnOnce(SecretBytes, SecretBytes) -> Fut,
    Fut: Future<Output = Result<T, UnlockError>>,
{
    if guard
        .in_use
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return Err(UnlockError::Reentrant);
    }

    let outcome = async {
        let record = enrollments
            .iter()
            .find(|e| e.user_id == credentials.user_id() && e.inputs.method() == credentials.method())
            .ok_or(UnlockError::NotSetUp)?;

        let ms = unlock_enrollment(record, credentials, config)?;
        let mkek = derive_mkek(&ms)?;
        let unlock_time = now_ms();

        let result = op(mkek, ms).await?;

        let lock_time = now_ms();
        Ok(UnlockOutcome {
            result,
            unlock_time,
            lock_time,
            duration_ms: lock_time.saturating_sub(unlock_time),
        })
    }
    .await;

    guard.in_use.store(false, Ordering::Release);
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KmsConfig;
    use crate::core::security::enrollment::{setup_enrollment, SetupInputs};

    fn test_config() -> KmsConfig {
        let mut c = KmsConfig::default();
        c.pbkdf2_iter_bounds = (1_000, 2_000_000);
        c.pbkdf2_calibration_target_ms = (1, 50);
        c
    }

    #[tokio::test]
    async fn with_unlock_derives_mkek_and_zeroizes_timestamps() {
        let config = test_config();
        let (record, _ms) = setup_enrollment(
            SetupInputs::Passphrase {
                user_id: "u1".into(),
                passphrase: "p1".into(),
                existing_ms: None,
            },
            "e1".into(),
            &config,
            1000,
        )
        .unwrap();

        let guard = UnlockGuard::new();
        let creds = Credentials::Passphrase {
            user_id: "u1".into(),
            passphrase: "p1".into(),
        };

        let outcome = with_unlock(&guard, &[record], &config, &creds, || 5000, |mkek, ms| async move {
            assert_eq!(mkek.len(), 32);
            assert_eq!(ms.len(), 32);
            Ok(42)
        })
        .await
        .unwrap();

        assert_eq!(outcome.result, 42);
        assert_eq!(outcome.unlock_time, 5000);
        assert_eq!(outcome.lock_time, 5000);
    }

    #[tokio::test]
    async fn rejects_reentrant_call() {
        let config = test_config();
        let (record, _ms) = setup_enrollment(
            SetupInputs::Passphrase {
                user_id: "u1".into(),
                passphrase: "p1".into(),
                existing_ms: None,
            },
            "e1".into(),
            &config,
            1000,
        )
        .unwrap();

        let guard = UnlockGuard::new();
        let creds = Credentials::Passphrase {
            user_id: "u1".into(),
            passphrase: "p1".into(),
        };

        // Simulate reentrancy by flipping the flag before calling.
        guard.in_use.store(true, Ordering::SeqCst);
        let err = with_unlock(&guard, &[record], &config, &creds, || 1, |mkek, ms| async move {
            let _ = (mkek, ms);
            Ok(())
        })
        .await
        .unwrap_err();
        assert_eq!(err, UnlockError::Reentrant);
    }

    #[tokio::test]
    async fn unknown_user_fails_not_set_up() {
        let config = test_config();
        let guard = UnlockGuard::new();
        let creds = Credentials::Passphrase {
            user_id: "ghost".into(),
            passphrase: "p1".into(),
        };
        let err = with_unlock(&guard, &[], &config, &creds, || 1, |mkek, ms| async move {
            let _ = (mkek, ms);
            Ok(())
        })
        .await
        .unwrap_err();
        assert_eq!(err, UnlockError::NotSetUp);
    }
}
