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

//! The storage seam: an async, object-safe `Store` trait plus the
//! `sled`-backed reference implementation this crate ships. Callers may
//! substitute another engine satisfying the same trait.

pub mod sled_store;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::types::{AuditEntry, EnrollmentRecord, KeyPurpose, LeaseRecord, RateLimitCounter, WrappedKeyRecord};

pub use sled_store::SledStore;

/// Errors surfaced by any `Store` implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying storage engine reported a failure.
    #[error("storage backend error")]
    Backend,
    /// A record failed to (de)serialize.
    #[error("storage record codec error")]
    Codec,
    /// An `appendAudit` write raced another writer for the same `seqNum`.
    #[error("audit log concurrent write")]
    AuditConcurrentWrite,
}

/// Named collections with typed records. All operations are async; a
/// single-process assumption holds (spec.md §4.2/§5) so no cross-process
/// locking is required.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or replace a wrapped-key record by `kid`.
    async fn put_wrapped_key(&self, record: &WrappedKeyRecord) -> Result<(), StoreError>;
    /// Look up a wrapped-key record by `kid`.
    async fn get_wrapped_key(&self, kid: &str) -> Result<Option<WrappedKeyRecord>, StoreError>;
    /// Delete a wrapped-key record by `kid`.
    async fn delete_wrapped_key(&self, kid: &str) -> Result<(), StoreError>;
    /// All wrapped-key records of a given purpose, newest-created first.
    async fn list_wrapped_keys_by_purpose(
        &self,
        purpose: KeyPurpose,
    ) -> Result<Vec<WrappedKeyRecord>, StoreError>;

    /// Insert or replace an enrollment record by `enrollmentId`.
    async fn put_enrollment(&self, record: &EnrollmentRecord) -> Result<(), StoreError>;
    /// Look up an enrollment record by `enrollmentId`.
    async fn get_enrollment(&self, enrollment_id: &str) -> Result<Option<EnrollmentRecord>, StoreError>;
    /// Delete an enrollment record by `enrollmentId`.
    async fn delete_enrollment(&self, enrollment_id: &str) -> Result<(), StoreError>;
    /// All enrollment records for a user.
    async fn list_enrollments_by_user(&self, user_id: &str) -> Result<Vec<EnrollmentRecord>, StoreError>;
    /// All enrollment records, regardless of user (used by `resetKMS`
    /// scoping and diagnostics).
    async fn list_all_enrollments(&self) -> Result<Vec<EnrollmentRecord>, StoreError>;

    /// Get an opaque metadata value by string key.
    async fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    /// Set an opaque metadata value by string key.
    async fn put_meta(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Append an audit entry, failing if `entry.seqNum` already exists.
    async fn append_audit_entry(&self, entry: &AuditEntry) -> Result<(), StoreError>;
    /// The highest `seqNum` currently stored, or 0 if the chain is empty.
    async fn max_audit_seq_num(&self) -> Result<u64, StoreError>;
    /// All audit entries in ascending `seqNum` order.
    async fn scan_audit(&self) -> Result<Vec<AuditEntry>, StoreError>;

    /// Insert or replace a lease record by `leaseId`.
    async fn put_lease(&self, record: &LeaseRecord) -> Result<(), StoreError>;
    /// Look up a lease record by `leaseId`.
    async fn get_lease(&self, lease_id: &str) -> Result<Option<LeaseRecord>, StoreError>;
    /// Delete a lease record (and its rate-limit counter) by `leaseId`.
    async fn delete_lease(&self, lease_id: &str) -> Result<(), StoreError>;
    /// All lease records for a user, via the secondary by-user index.
    async fn list_leases_by_user(&self, user_id: &str) -> Result<Vec<LeaseRecord>, StoreError>;
    /// Delete every lease with `exp < now_ms`; returns the count removed.
    async fn delete_expired_leases(&self, now_ms: u64) -> Result<u64, StoreError>;

    /// Look up a lease's rate-limit counter.
    async fn get_rate_limit(&self, lease_id: &str) -> Result<Option<RateLimitCounter>, StoreError>;
    /// Insert or replace a lease's rate-limit counter.
    async fn put_rate_limit(&self, counter: &RateLimitCounter) -> Result<(), StoreError>;

    /// Drop the entire database. Used by `resetKMS`.
    async fn reset(&self) -> Result<(), StoreError>;
}
