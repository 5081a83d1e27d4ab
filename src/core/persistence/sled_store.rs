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

//! `sled`-backed `Store` implementation: one tree per collection, plus a
//! secondary `leases_by_user` index tree. Audit append uses a sled
//! transaction to enforce `seqNum` uniqueness atomically.

use async_trait::async_trait;
use bincode::Options;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use std::path::Path;

use super::{Store, StoreError};
use crate::core::types::{AuditEntry, EnrollmentRecord, KeyPurpose, LeaseRecord, RateLimitCounter, WrappedKeyRecord};

fn codec() -> impl bincode::Options {
    bincode::DefaultOptions::new().with_fixint_encoding().reject_trailing_bytes()
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    codec().serialize(value).map_err(|_| StoreError::Codec)
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    codec().deserialize(bytes).map_err(|_| StoreError::Codec)
}

/// Zero-padded decimal key so lexical sled ordering matches numeric order.
fn audit_key(seq_num: u64) -> String {
    format!("{seq_num:020}")
}

fn user_lease_key(user_id: &str, lease_id: &str) -> Vec<u8> {
    let mut k = user_id.as_bytes().to_vec();
    k.push(0);
    k.extend_from_slice(lease_id.as_bytes());
    k
}

/// A `sled`-backed `Store`.
pub struct SledStore {
    db: sled::Db,
    wrapped_keys: sled::Tree,
    enrollments: sled::Tree,
    meta: sled::Tree,
    audit: sled::Tree,
    leases: sled::Tree,
    leases_by_user: sled::Tree,
    rate_limits: sled::Tree,
}

impl SledStore {
    /// Open (creating if absent) a `sled` database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(|_| StoreError::Backend)?;
        Self::from_db(db)
    }

    /// Open a temporary, in-memory-backed database. Used by tests.
    pub fn open_temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|_| StoreError::Backend)?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self, StoreError> {
        let wrapped_keys = db.open_tree("wrapped_keys").map_err(|_| StoreError::Backend)?;
        let enrollments = db.open_tree("enrollments").map_err(|_| StoreError::Backend)?;
        let meta = db.open_tree("meta").map_err(|_| StoreError::Backend)?;
        let audit = db.open_tree("audit").map_err(|_| StoreError::Backend)?;
        let leases = db.open_tree("leases").map_err(|_| StoreError::Backend)?;
        let leases_by_user = db.open_tree("leases_by_user").map_err(|_| StoreError::Backend)?;
        let rate_limits = db.open_tree("rate_limits").map_err(|_| StoreError::Backend)?;
        Ok(SledStore {
            db,
            wrapped_keys,
            enrollments,
            meta,
            audit,
            leases,
            leases_by_user,
            rate_limits,
        })
    }
}

#[async_trait]
impl Store for SledStore {
    async fn put_wrapped_key(&self, record: &WrappedKeyRecord) -> Result<(), StoreError> {
        let bytes = encode(record)?;
        self.wrapped_keys
            .insert(record.kid.as_bytes(), bytes)
            .map_err(|_| StoreError::Backend)?;
        Ok(())
    }

    async fn get_wrapped_key(&self, kid: &str) -> Result<Option<WrappedKeyRecord>, StoreError> {
        match self.wrapped_keys.get(kid.as_bytes()).map_err(|_| StoreError::Backend)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn delete_wrapped_key(&self, kid: &str) -> Result<(), StoreError> {
        self.wrapped_keys.remove(kid.as_bytes()).map_err(|_| StoreError::Backend)?;
        Ok(())
    }

    async fn list_wrapped_keys_by_purpose(
        &self,
        purpose: KeyPurpose,
    ) -> Result<Vec<WrappedKeyRecord>, StoreError> {
        let mut out = Vec::new();
        for item in self.wrapped_keys.iter() {
            let (_, bytes) = item.map_err(|_| StoreError::Backend)?;
            let record: WrappedKeyRecord = decode(&bytes)?;
            if record.purpose == purpose {
                out.push(record);
            }
        }
        out.sort_by_key(|r| r.created_at);
        Ok(out)
    }

    async fn put_enrollment(&self, record: &EnrollmentRecord) -> Result<(), StoreError> {
        let bytes = encode(record)?;
        self.enrollments
            .insert(record.enrollment_id.as_bytes(), bytes)
            .map_err(|_| StoreError::Backend)?;
        Ok(())
    }

    async fn get_enrollment(&self, enrollment_id: &str) -> Result<Option<EnrollmentRecord>, StoreError> {
        match self
            .enrollments
            .get(enrollment_id.as_bytes())
            .map_err(|_| StoreError::Backend)?
        {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn delete_enrollment(&self, enrollment_id: &str) -> Result<(), StoreError> {
        self.enrollments
            .remove(enrollment_id.as_bytes())
            .map_err(|_| StoreError::Backend)?;
        Ok(())
    }

    async fn list_enrollments_by_user(&self, user_id: &str) -> Result<Vec<EnrollmentRecord>, StoreError> {
        let mut out = Vec::new();
        for item in self.enrollments.iter() {
            let (_, bytes) = item.map_err(|_| StoreError::Backend)?;
            let record: EnrollmentRecord = decode(&bytes)?;
            if record.user_id == user_id {
                out.push(record);
            }
        }
        Ok(out)
    }

    async fn list_all_enrollments(&self) -> Result<Vec<EnrollmentRecord>, StoreError> {
        let mut out = Vec::new();
        for item in self.enrollments.iter() {
            let (_, bytes) = item.map_err(|_| StoreError::Backend)?;
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }

    async fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .meta
            .get(key.as_bytes())
            .map_err(|_| StoreError::Backend)?
            .map(|v| v.to_vec()))
    }

    async fn put_meta(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.meta.insert(key.as_bytes(), value).map_err(|_| StoreError::Backend)?;
        Ok(())
    }

    async fn append_audit_entry(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        let key = audit_key(entry.seq_num);
        let bytes = encode(entry)?;

        let result = self.audit.transaction(|tx_audit| {
            if tx_audit.get(key.as_bytes())?.is_some() {
                return Err(ConflictableTransactionError::Abort(()));
            }
            tx_audit.insert(key.as_bytes(), bytes.clone())?;
            Ok(())
        });

        match result {
            Ok(()) => Ok(()),
            Err(TransactionError::Abort(())) => Err(StoreError::AuditConcurrentWrite),
            Err(TransactionError::Storage(_)) => Err(StoreError::Backend),
        }
    }

    async fn max_audit_seq_num(&self) -> Result<u64, StoreError> {
        match self.audit.last().map_err(|_| StoreError::Backend)? {
            Some((_, bytes)) => {
                let entry: AuditEntry = decode(&bytes)?;
                Ok(entry.seq_num)
            }
            None => Ok(0),
        }
    }

    async fn scan_audit(&self) -> Result<Vec<AuditEntry>, StoreError> {
        let mut out = Vec::new();
        for item in self.audit.iter() {
            let (_, bytes) = item.map_err(|_| StoreError::Backend)?;
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }

    async fn put_lease(&self, record: &LeaseRecord) -> Result<(), StoreError> {
        let bytes = encode(record)?;
        self.leases
            .insert(record.lease_id.as_bytes(), bytes)
            .map_err(|_| StoreError::Backend)?;
        self.leases_by_user
            .insert(user_lease_key(&record.user_id, &record.lease_id), record.lease_id.as_bytes())
            .map_err(|_| StoreError::Backend)?;
        Ok(())
    }

    async fn get_lease(&self, lease_id: &str) -> Result<Option<LeaseRecord>, StoreError> {
        match self.leases.get(lease_id.as_bytes()).map_err(|_| StoreError::Backend)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn delete_lease(&self, lease_id: &str) -> Result<(), StoreError> {
        if let Some(record) = self.get_lease(lease_id).await? {
            self.leases_by_user
                .remove(user_lease_key(&record.user_id, &record.lease_id))
                .map_err(|_| StoreError::Backend)?;
        }
        self.leases.remove(lease_id.as_bytes()).map_err(|_| StoreError::Backend)?;
        self.rate_limits.remove(lease_id.as_bytes()).map_err(|_| StoreError::Backend)?;
        Ok(())
    }

    async fn list_leases_by_user(&self, user_id: &str) -> Result<Vec<LeaseRecord>, StoreError> {
        let mut prefix = user_id.as_bytes().to_vec();
        prefix.push(0);
        let mut out = Vec::new();
        for item in self.leases_by_user.scan_prefix(&prefix) {
            let (_, lease_id_bytes) = item.map_err(|_| StoreError::Backend)?;
            let lease_id = String::from_utf8_lossy(&lease_id_bytes).to_string();
            if let Some(record) = self.get_lease(&lease_id).await? {
                out.push(record);
            }
        }
        Ok(out)
    }

    async fn delete_expired_leases(&self, now_ms: u64) -> Result<u64, StoreError> {
        let mut expired_ids = Vec::new();
        for item in self.leases.iter() {
            let (_, bytes) = item.map_err(|_| StoreError::Backend)?;
            let record: LeaseRecord = decode(&bytes)?;
            if record.exp < now_ms {
                expired_ids.push(record.lease_id);
            }
        }
        let count = expired_ids.len() as u64;
        for id in expired_ids {
            self.delete_lease(&id).await?;
        }
        Ok(count)
    }

    async fn get_rate_limit(&self, lease_id: &str) -> Result<Option<RateLimitCounter>, StoreError> {
        match self.rate_limits.get(lease_id.as_bytes()).map_err(|_| StoreError::Backend)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn put_rate_limit(&self, counter: &RateLimitCounter) -> Result<(), StoreError> {
        let bytes = encode(counter)?;
        self.rate_limits
            .insert(counter.lease_id.as_bytes(), bytes)
            .map_err(|_| StoreError::Backend)?;
        Ok(())
    }

    async fn reset(&self) -> Result<(), StoreError> {
        for tree in [
            &self.wrapped_keys,
            &self.enrollments,
            &self.meta,
            &self.audit,
            &self.leases,
            &self.leases_by_user,
            &self.rate_limits,
        ] {
            tree.clear().map_err(|_| StoreError::Backend)?;
        }
        self.db.flush().map_err(|_| StoreError::Backend)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{KeyAlg, KeyPurpose};

    fn sample_key(kid: &str, created_at: u64) -> WrappedKeyRecord {
        WrappedKeyRecord {
            kid: kid.to_string(),
            alg: KeyAlg::Es256,
            purpose: KeyPurpose::Vapid,
            created_at,
            public_key_raw: vec![4; 65],
            wrap_iv: vec![0; 12],
            wrapped_private_key: vec![1, 2, 3],
        }
    }

    #[tokio::test]
    async fn wrapped_key_round_trips() {
        let store = SledStore::open_temporary().unwrap();
        let key = sample_key("kid-a", 1000);
        store.put_wrapped_key(&key).await.unwrap();
        let fetched = store.get_wrapped_key("kid-a").await.unwrap().unwrap();
        assert_eq!(fetched.kid, "kid-a");
        store.delete_wrapped_key("kid-a").await.unwrap();
        assert!(store.get_wrapped_key("kid-a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_wrapped_keys_by_purpose_filters_and_orders() {
        let store = SledStore::open_temporary().unwrap();
        store.put_wrapped_key(&sample_key("b", 2000)).await.unwrap();
        store.put_wrapped_key(&sample_key("a", 1000)).await.unwrap();
        let mut audit_key_rec = sample_key("audit-instance", 500);
        audit_key_rec.purpose = KeyPurpose::Audit;
        store.put_wrapped_key(&audit_key_rec).await.unwrap();

        let vapid_keys = store.list_wrapped_keys_by_purpose(KeyPurpose::Vapid).await.unwrap();
        assert_eq!(vapid_keys.len(), 2);
        assert_eq!(vapid_keys[0].kid, "a");
        assert_eq!(vapid_keys[1].kid, "b");
    }

    #[tokio::test]
    async fn audit_append_rejects_duplicate_seq_num() {
        let store = SledStore::open_temporary().unwrap();
        let entry = AuditEntry {
            seq_num: 1,
            timestamp: 1000,
            op: "generate-vapid".into(),
            kid: None,
            request_id: "r1".into(),
            user_id: None,
            origin: None,
            duration_ms: None,
            details: None,
            previous_hash: String::new(),
            chain_hash: "abc".into(),
            signer_id: "audit-instance".into(),
            sig: "sig".into(),
        };
        store.append_audit_entry(&entry).await.unwrap();
        let err = store.append_audit_entry(&entry).await.unwrap_err();
        assert!(matches!(err, StoreError::AuditConcurrentWrite));
        assert_eq!(store.max_audit_seq_num().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn leases_by_user_index_and_expiry_reaping() {
        let store = SledStore::open_temporary().unwrap();
        let lease = LeaseRecord {
            lease_id: "l1".into(),
            user_id: "u1".into(),
            kid: "kid-a".into(),
            subs: vec![],
            ttl_hours: 24,
            auto_extend: true,
            created_at: 0,
            exp: 100,
            quotas: Default::default(),
        };
        store.put_lease(&lease).await.unwrap();
        let by_user = store.list_leases_by_user("u1").await.unwrap();
        assert_eq!(by_user.len(), 1);

        let removed = store.delete_expired_leases(1000).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_lease("l1").await.unwrap().is_none());
        assert!(store.list_leases_by_user("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reset_clears_every_tree() {
        let store = SledStore::open_temporary().unwrap();
        store.put_wrapped_key(&sample_key("a", 1)).await.unwrap();
        store.put_meta("k", b"v").await.unwrap();
        store.reset().await.unwrap();
        assert!(store.get_wrapped_key("a").await.unwrap().is_none());
        assert!(store.get_meta("k").await.unwrap().is_none());
    }
}
