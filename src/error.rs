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

//! Crate-root error composing every module's error enum at the
//! orchestrator boundary. Mirrors the donor's `TideError`
//! (`core::consensus::tide`): one `From<X> for KmsError` arm per
//! subsystem, no internal panics except the one documented fatal path
//! (audit `seqNum` uniqueness conflict surviving bounded retry).

use thiserror::Error;

use crate::core::audit::AuditError;
use crate::core::crypto::primitives::CryptoError;
use crate::core::crypto::sigformat::SigFormatError;
use crate::core::keyservice::KeyServiceError;
use crate::core::lease::LeaseError;
use crate::core::orchestrator::RpcValidationError;
use crate::core::persistence::StoreError;
use crate::core::security::unlock::UnlockError;

/// The single error type surfaced across the orchestrator boundary.
/// `Display` renders exactly the message strings spec.md §7 names, since
/// callers pattern-match on message text across the host boundary.
#[derive(Debug, Error)]
pub enum KmsError {
    /// A request's parameters were missing or the wrong type.
    #[error(transparent)]
    Validation(#[from] RpcValidationError),
    /// Enrollment setup, unlock, or `withUnlock` context failure.
    #[error(transparent)]
    Unlock(#[from] UnlockError),
    /// Audit chain or IAK lifecycle failure.
    #[error(transparent)]
    Audit(#[from] AuditError),
    /// VAPID key generation, rotation, or JWT signing failure.
    #[error(transparent)]
    KeyService(#[from] KeyServiceError),
    /// Lease issuance, verification, or quota failure.
    #[error(transparent)]
    Lease(#[from] LeaseError),
    /// Underlying storage failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Crypto primitive failure.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    /// Signature format conversion failure.
    #[error(transparent)]
    SigFormat(#[from] SigFormatError),
    /// The requested RPC method is not one this orchestrator knows.
    #[error("Unknown RPC method")]
    UnknownMethod,
    /// No enrollment record exists with the requested id.
    #[error("No enrollment with id: {0}")]
    EnrollmentNotFound(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlock_errors_preserve_their_spec_literal_message() {
        let err: KmsError = UnlockError::InvalidPassphrase.into();
        assert_eq!(err.to_string(), "Invalid passphrase");
    }

    #[test]
    fn lease_errors_preserve_their_spec_literal_message() {
        let err: KmsError = LeaseError::QuotaTokensPerHour.into();
        assert_eq!(err.to_string(), "Quota exceeded (tokens per hour)");
    }

    #[test]
    fn unknown_method_has_fixed_message() {
        assert_eq!(KmsError::UnknownMethod.to_string(), "Unknown RPC method");
    }
}
