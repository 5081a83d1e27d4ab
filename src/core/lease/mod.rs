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

//! Lease issuance, verification, quota enforcement, and batch/extend
//! maintenance. A lease attenuates one VAPID `kid` to a bounded set of
//! endpoints, a TTL, and a quota schedule.

use thiserror::Error;

use crate::core::crypto::primitives::{self, CryptoError};
use crate::core::keyservice::{self, JwtPayloadInput, KeyServiceError, SignedJwt};
use crate::core::persistence::{Store, StoreError};
use crate::core::security::secret::SecretBytes;
use crate::core::types::{LeaseInvalidReason, LeaseRecord, LeaseSubscription, Quotas, RateLimitCounter};

const MAX_LEASE_TTL_HOURS: u32 = 720;
const DEFAULT_TOKEN_TTL_SECS: u64 = 900;
const BATCH_STRIDE_SECS: u64 = 550;
const MAX_BATCH_COUNT: u32 = 10;
const HOUR_MS: u64 = 3_600_000;
const MINUTE_MS: u64 = 60_000;
const EXTEND_GRANT_MS: u64 = 30 * 24 * HOUR_MS;

/// Errors from lease creation, verification, or issuance.
#[derive(Debug, Error)]
pub enum LeaseError {
    /// No lease with the requested id exists.
    #[error("Lease not found")]
    NotFound,
    /// The lease's bound `kid` is no longer the current VAPID key.
    #[error("lease invalidated (wrong-key)")]
    WrongKey,
    /// The lease's `exp` has passed.
    #[error("lease expired")]
    Expired,
    /// `ttlHours` was outside `(0, 720]`.
    #[error("ttlHours must be between 1 and 720")]
    InvalidTtl,
    /// `count` was outside `[1, 10]`.
    #[error("count must be between 1 and 10")]
    InvalidCount,
    /// No `purpose:"vapid"` key exists yet to bind the lease to.
    #[error("No VAPID key has been generated yet")]
    NoVapidKey,
    /// The lease has more than one subscription and the caller did not
    /// select one.
    #[error("endpoint must be specified when a lease has multiple subscriptions")]
    EndpointRequired,
    /// The caller-selected `eid` does not appear in the lease's subs.
    #[error("endpoint not found in lease subscriptions")]
    EndpointNotFound,
    /// Hourly token quota exhausted.
    #[error("Quota exceeded (tokens per hour)")]
    QuotaTokensPerHour,
    /// Per-minute send quota exhausted.
    #[error("Quota exceeded (sends per minute)")]
    QuotaSendsPerMinute,
    /// Per-endpoint per-minute send quota exhausted.
    #[error("Quota exceeded (sends per minute per endpoint)")]
    QuotaSendsPerMinutePerEid,
    /// `autoExtend:false` but no fresh credentials were supplied.
    #[error("credentials required to extend a lease with autoExtend=false")]
    ExtendRequiresAuth,
    /// The underlying key service failed.
    #[error(transparent)]
    KeyService(#[from] KeyServiceError),
    /// A crypto primitive failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    /// The underlying store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Inputs to `create_lease`.
#[derive(Debug, Clone)]
pub struct CreateLeaseInput {
    /// The user this lease belongs to.
    pub user_id: String,
    /// Endpoints the lease may sign VAPID JWTs for.
    pub subs: Vec<LeaseSubscription>,
    /// Requested TTL in hours, `0 < ttl_hours <= 720`.
    pub ttl_hours: u32,
    /// Whether `extendLeases` may renew this lease without fresh auth.
    pub auto_extend: bool,
}

/// Result of `create_lease`.
#[derive(Debug, Clone)]
pub struct CreateLeaseOutput {
    /// The newly created lease's id.
    pub lease_id: String,
    /// Unix millis this lease expires.
    pub exp: u64,
    /// Quota schedule bound to this lease.
    pub quotas: Quotas,
    /// Echoes the requested `autoExtend`.
    pub auto_extend: bool,
    /// The VAPID `kid` this lease is bound to.
    pub kid: String,
}

/// Validate TTL, resolve the current VAPID key, and persist a new lease.
pub async fn create_lease(
    store: &dyn Store,
    input: CreateLeaseInput,
    now_ms: u64,
) -> Result<CreateLeaseOutput, LeaseError> {
    if input.ttl_hours == 0 || input.ttl_hours > MAX_LEASE_TTL_HOURS {
        return Err(LeaseError::InvalidTtl);
    }
    let current = keyservice::current_vapid_key(store)
        .await?
        .ok_or(LeaseError::NoVapidKey)?;

    let lease_id = primitives::base64url_encode(&primitives::random_bytes(16)?);
    let quotas = Quotas::default();
    let exp = now_ms + (input.ttl_hours as u64) * HOUR_MS;

    let record = LeaseRecord {
        lease_id: lease_id.clone(),
        user_id: input.user_id,
        kid: current.kid.clone(),
        subs: input.subs,
        ttl_hours: input.ttl_hours,
        auto_extend: input.auto_extend,
        created_at: now_ms,
        exp,
        quotas,
    };
    store.put_lease(&record).await?;

    Ok(CreateLeaseOutput {
        lease_id,
        exp,
        quotas,
        auto_extend: record.auto_extend,
        kid: record.kid,
    })
}

/// Outcome of `verify_lease`.
#[derive(Debug, Clone)]
pub struct LeaseVerification {
    /// Whether the lease is currently usable.
    pub valid: bool,
    /// The lease id queried.
    pub lease_id: String,
    /// The lease's bound `kid`, if the record exists.
    pub kid: Option<String>,
    /// Why the lease is invalid, if it is.
    pub reason: Option<LeaseInvalidReason>,
}

/// Check a lease's existence, expiry, and kid currency.
pub async fn verify_lease(
    store: &dyn Store,
    lease_id: &str,
    now_ms: u64,
) -> Result<LeaseVerification, StoreError> {
    let record = match store.get_lease(lease_id).await? {
        Some(r) => r,
        None => {
            return Ok(LeaseVerification {
                valid: false,
                lease_id: lease_id.to_string(),
                kid: None,
                reason: Some(LeaseInvalidReason::NotFound),
            })
        }
    };
    if now_ms >= record.exp {
        return Ok(LeaseVerification {
            valid: false,
            lease_id: lease_id.to_string(),
            kid: Some(record.kid),
            reason: Some(LeaseInvalidReason::Expired),
        });
    }
    let current = keyservice::current_vapid_key(store).await?;
    let current_kid_matches = current.map(|c| c.kid == record.kid).unwrap_or(false);
    if !current_kid_matches {
        return Ok(LeaseVerification {
            valid: false,
            lease_id: lease_id.to_string(),
            kid: Some(record.kid),
            reason: Some(LeaseInvalidReason::WrongKey),
        });
    }
    Ok(LeaseVerification {
        valid: true,
        lease_id: lease_id.to_string(),
        kid: Some(record.kid),
        reason: None,
    })
}

async fn resolve_and_check_lease(
    store: &dyn Store,
    lease_id: &str,
    kid_hint: Option<&str>,
    now_ms: u64,
) -> Result<LeaseRecord, LeaseError> {
    let verification = verify_lease(store, lease_id, now_ms).await?;
    if !verification.valid {
        return Err(match verification.reason {
            Some(LeaseInvalidReason::NotFound) => LeaseError::NotFound,
            Some(LeaseInvalidReason::Expired) => LeaseError::Expired,
            _ => LeaseError::WrongKey,
        });
    }
    let record = store
        .get_lease(lease_id)
        .await?
        .ok_or(LeaseError::NotFound)?;
    if let Some(hint) = kid_hint {
        if hint != record.kid {
            return Err(LeaseError::WrongKey);
        }
    }
    Ok(record)
}

fn select_endpoint<'a>(
    record: &'a LeaseRecord,
    eid: Option<&str>,
) -> Result<&'a LeaseSubscription, LeaseError> {
    match eid {
        Some(eid) => record
            .subs
            .iter()
            .find(|s| s.eid == eid)
            .ok_or(LeaseError::EndpointNotFound),
        None => match record.subs.len() {
            1 => Ok(&record.subs[0]),
            _ => Err(LeaseError::EndpointRequired),
        },
    }
}

fn refill_if_elapsed(counter: &mut RateLimitCounter, now_ms: u64) {
    if now_ms >= counter.last_reset_at + HOUR_MS {
        counter.tokens_issued = 0;
        counter.last_reset_at = now_ms;
    }
    if now_ms >= counter.last_minute_reset_at + MINUTE_MS {
        counter.sends_this_minute = 0;
        counter.last_minute_reset_at = now_ms;
    }
}

fn refill_endpoint_if_elapsed(counter: &mut RateLimitCounter, eid: &str, now_ms: u64) {
    let entry = counter
        .per_endpoint
        .entry(eid.to_string())
        .or_insert_with(|| crate::core::types::EndpointCounter {
            sends_this_minute: 0,
            last_minute_reset_at: now_ms,
        });
    if now_ms >= entry.last_minute_reset_at + MINUTE_MS {
        entry.sends_this_minute = 0;
        entry.last_minute_reset_at = now_ms;
    }
}

/// Load (or initialize) a lease's rate-limit counter, check every quota
/// dimension against `tokens_to_consume`, and if all pass, increment and
/// persist. Returns the error for the first dimension that fails.
async fn check_and_increment_quota(
    store: &dyn Store,
    record: &LeaseRecord,
    eid: &str,
    tokens_to_consume: u32,
    now_ms: u64,
) -> Result<(), LeaseError> {
    let mut counter = store
        .get_rate_limit(&record.lease_id)
        .await?
        .unwrap_or_else(|| RateLimitCounter::new(record.lease_id.clone(), now_ms));

    refill_if_elapsed(&mut counter, now_ms);
    refill_endpoint_if_elapsed(&mut counter, eid, now_ms);

    if counter.tokens_issued + tokens_to_consume > record.quotas.tokens_per_hour {
        return Err(LeaseError::QuotaTokensPerHour);
    }
    let minute_allowance = record.quotas.sends_per_minute + record.quotas.burst_sends;
    if counter.sends_this_minute + tokens_to_consume > minute_allowance {
        return Err(LeaseError::QuotaSendsPerMinute);
    }
    let eid_count = counter.per_endpoint.get(eid).map(|e| e.sends_this_minute).unwrap_or(0);
    if eid_count + tokens_to_consume > record.quotas.sends_per_minute_per_eid {
        return Err(LeaseError::QuotaSendsPerMinutePerEid);
    }

    counter.tokens_issued += tokens_to_consume;
    counter.sends_this_minute += tokens_to_consume;
    let entry = counter.per_endpoint.get_mut(eid).expect("refilled above");
    entry.sends_this_minute += tokens_to_consume;

    store.put_rate_limit(&counter).await?;
    Ok(())
}

/// Inputs to `issue_vapid_jwt`.
#[derive(Debug, Clone)]
pub struct IssueJwtInput {
    /// The lease to issue under.
    pub lease_id: String,
    /// Caller's expectation of the lease's bound `kid`, if any.
    pub kid: Option<String>,
    /// Which of the lease's subscriptions to sign for.
    pub eid: Option<String>,
}

/// Verify the lease, check and consume one token of quota, and sign a
/// VAPID JWT for the selected endpoint.
pub async fn issue_vapid_jwt(
    store: &dyn Store,
    mkek: &SecretBytes,
    jwt_sub: &str,
    input: IssueJwtInput,
    now_ms: u64,
) -> Result<SignedJwt, LeaseError> {
    let record = resolve_and_check_lease(store, &input.lease_id, input.kid.as_deref(), now_ms).await?;
    let endpoint = select_endpoint(&record, input.eid.as_deref())?.clone();

    check_and_increment_quota(store, &record, &endpoint.eid, 1, now_ms).await?;

    let now_secs = now_ms / 1000;
    let exp = (now_secs + DEFAULT_TOKEN_TTL_SECS).min(record.exp / 1000);
    let signed = keyservice::sign_jwt(
        store,
        mkek,
        &record.kid,
        JwtPayloadInput {
            aud: endpoint.aud,
            sub: jwt_sub.to_string(),
            exp,
            jti: None,
        },
        now_secs,
    )
    .await?;
    Ok(signed)
}

/// Issue `count` staggered VAPID JWTs, consuming `count` tokens from the
/// lease's hourly quota atomically (all-or-none).
pub async fn issue_vapid_jwts(
    store: &dyn Store,
    mkek: &SecretBytes,
    jwt_sub: &str,
    input: IssueJwtInput,
    count: u32,
    now_ms: u64,
) -> Result<Vec<SignedJwt>, LeaseError> {
    if count == 0 || count > MAX_BATCH_COUNT {
        return Err(LeaseError::InvalidCount);
    }
    let record = resolve_and_check_lease(store, &input.lease_id, input.kid.as_deref(), now_ms).await?;
    let endpoint = select_endpoint(&record, input.eid.as_deref())?.clone();

    check_and_increment_quota(store, &record, &endpoint.eid, count, now_ms).await?;

    let now_secs = now_ms / 1000;
    let lease_exp_secs = record.exp / 1000;
    let mut jwts = Vec::with_capacity(count as usize);
    for i in 0..count as u64 {
        let exp = (now_secs + DEFAULT_TOKEN_TTL_SECS + i * BATCH_STRIDE_SECS).min(lease_exp_secs);
        let signed = keyservice::sign_jwt(
            store,
            mkek,
            &record.kid,
            JwtPayloadInput {
                aud: endpoint.aud.clone(),
                sub: jwt_sub.to_string(),
                exp,
                jti: None,
            },
            now_secs,
        )
        .await?;
        jwts.push(signed);
    }
    Ok(jwts)
}

/// Status of one lease in an `extend_leases` batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtendStatus {
    /// The lease's `exp` was advanced.
    Extended {
        /// The new expiry, unix millis.
        exp: u64,
    },
    /// The lease was left untouched, with a reason.
    Skipped(&'static str),
}

/// One lease's outcome within an `extend_leases` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendResultItem {
    /// The lease id this result concerns.
    pub lease_id: String,
    /// What happened to it.
    pub status: ExtendStatus,
}

/// Aggregate result of `extend_leases`.
#[derive(Debug, Clone)]
pub struct ExtendLeasesOutput {
    /// Per-lease outcomes, in input order.
    pub results: Vec<ExtendResultItem>,
    /// Count of leases actually extended.
    pub extended: u32,
    /// Count of leases skipped.
    pub skipped: u32,
}

/// For each `lease_id`, extend it by a fixed 30-day grant if eligible.
/// `fresh_auth` signals that the caller already validated `credentials`
/// via `withUnlock` for this call (required when a lease has
/// `autoExtend:false` and `request_auth:true`).
pub async fn extend_leases(
    store: &dyn Store,
    lease_ids: &[String],
    request_auth: bool,
    fresh_auth: bool,
    now_ms: u64,
) -> Result<ExtendLeasesOutput, StoreError> {
    let mut results = Vec::with_capacity(lease_ids.len());
    let mut extended = 0u32;
    let mut skipped = 0u32;

    for lease_id in lease_ids {
        let record = match store.get_lease(lease_id).await? {
            Some(r) => r,
            None => {
                results.push(ExtendResultItem {
                    lease_id: lease_id.clone(),
                    status: ExtendStatus::Skipped("not found"),
                });
                skipped += 1;
                continue;
            }
        };

        let current = keyservice::current_vapid_key(store).await?;
        let kid_matches = current.map(|c| c.kid == record.kid).unwrap_or(false);
        if !kid_matches {
            results.push(ExtendResultItem {
                lease_id: lease_id.clone(),
                status: ExtendStatus::Skipped("different VAPID key"),
            });
            skipped += 1;
            continue;
        }

        if !record.auto_extend && !request_auth {
            results.push(ExtendResultItem {
                lease_id: lease_id.clone(),
                status: ExtendStatus::Skipped("autoExtend=false"),
            });
            skipped += 1;
            continue;
        }
        if !record.auto_extend && !fresh_auth {
            results.push(ExtendResultItem {
                lease_id: lease_id.clone(),
                status: ExtendStatus::Skipped("autoExtend=false"),
            });
            skipped += 1;
            continue;
        }

        let mut updated = record;
        updated.exp = now_ms + EXTEND_GRANT_MS;
        store.put_lease(&updated).await?;
        results.push(ExtendResultItem {
            lease_id: lease_id.clone(),
            status: ExtendStatus::Extended { exp: updated.exp },
        });
        extended += 1;
    }

    Ok(ExtendLeasesOutput { results, extended, skipped })
}

/// Remove every lease whose `exp < now_ms`. Returns the count removed.
pub async fn delete_expired_leases(store: &dyn Store, now_ms: u64) -> Result<u64, StoreError> {
    store.delete_expired_leases(now_ms).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::keyservice::generate_vapid;
    use crate::core::persistence::SledStore;

    fn test_mkek() -> SecretBytes {
        SecretBytes::new(vec![9u8; 32])
    }

    fn one_sub() -> LeaseSubscription {
        LeaseSubscription {
            url: "https://fcm.googleapis.com/send/abc".into(),
            aud: "https://fcm.googleapis.com".into(),
            eid: "endpoint-1".into(),
        }
    }

    #[tokio::test]
    async fn create_then_verify_then_issue() {
        let store = SledStore::open_temporary().unwrap();
        let mkek = test_mkek();
        let key = generate_vapid(&store, &mkek, 1000).await.unwrap();

        let created = create_lease(
            &store,
            CreateLeaseInput {
                user_id: "u1".into(),
                subs: vec![one_sub()],
                ttl_hours: 24,
                auto_extend: true,
            },
            1000,
        )
        .await
        .unwrap();
        assert_eq!(created.kid, key.kid);

        let verification = verify_lease(&store, &created.lease_id, 2000).await.unwrap();
        assert!(verification.valid);

        let signed = issue_vapid_jwt(
            &store,
            &mkek,
            "mailto:ops@example.com",
            IssueJwtInput {
                lease_id: created.lease_id.clone(),
                kid: None,
                eid: None,
            },
            2000,
        )
        .await
        .unwrap();
        assert_eq!(signed.jwt.split('.').count(), 3);
    }

    #[tokio::test]
    async fn rotation_invalidates_lease() {
        let store = SledStore::open_temporary().unwrap();
        let mkek = test_mkek();
        generate_vapid(&store, &mkek, 1000).await.unwrap();
        let created = create_lease(
            &store,
            CreateLeaseInput {
                user_id: "u1".into(),
                subs: vec![one_sub()],
                ttl_hours: 24,
                auto_extend: true,
            },
            1000,
        )
        .await
        .unwrap();

        keyservice::regenerate_vapid(&store, &mkek, 2000).await.unwrap();

        let verification = verify_lease(&store, &created.lease_id, 3000).await.unwrap();
        assert!(!verification.valid);
        assert_eq!(verification.reason, Some(LeaseInvalidReason::WrongKey));

        let err = issue_vapid_jwt(
            &store,
            &mkek,
            "mailto:ops@example.com",
            IssueJwtInput {
                lease_id: created.lease_id,
                kid: None,
                eid: None,
            },
            3000,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, LeaseError::WrongKey));
    }

    #[tokio::test]
    async fn expiry_is_reported_distinctly_from_wrong_key() {
        let store = SledStore::open_temporary().unwrap();
        let mkek = test_mkek();
        generate_vapid(&store, &mkek, 1000).await.unwrap();
        let created = create_lease(
            &store,
            CreateLeaseInput {
                user_id: "u1".into(),
                subs: vec![one_sub()],
                ttl_hours: 1,
                auto_extend: true,
            },
            1000,
        )
        .await
        .unwrap();

        let past_exp = created.exp + 1;
        let verification = verify_lease(&store, &created.lease_id, past_exp).await.unwrap();
        assert!(!verification.valid);
        assert_eq!(verification.reason, Some(LeaseInvalidReason::Expired));

        let err = issue_vapid_jwt(
            &store,
            &mkek,
            "mailto:ops@example.com",
            IssueJwtInput {
                lease_id: created.lease_id,
                kid: None,
                eid: None,
            },
            past_exp,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, LeaseError::Expired));
    }

    #[tokio::test]
    async fn hourly_quota_hard_caps_at_limit() {
        let store = SledStore::open_temporary().unwrap();
        let mkek = test_mkek();
        generate_vapid(&store, &mkek, 1000).await.unwrap();
        let created = create_lease(
            &store,
            CreateLeaseInput {
                user_id: "u1".into(),
                subs: vec![one_sub()],
                ttl_hours: 24,
                auto_extend: true,
            },
            1000,
        )
        .await
        .unwrap();

        let mut counter = RateLimitCounter::new(created.lease_id.clone(), 1000);
        counter.tokens_issued = 99;
        store.put_rate_limit(&counter).await.unwrap();

        issue_vapid_jwt(
            &store,
            &mkek,
            "mailto:ops@example.com",
            IssueJwtInput {
                lease_id: created.lease_id.clone(),
                kid: None,
                eid: None,
            },
            1500,
        )
        .await
        .unwrap();

        let err = issue_vapid_jwt(
            &store,
            &mkek,
            "mailto:ops@example.com",
            IssueJwtInput {
                lease_id: created.lease_id,
                kid: None,
                eid: None,
            },
            1600,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, LeaseError::QuotaTokensPerHour));
    }

    #[tokio::test]
    async fn batch_issue_staggers_expirations() {
        let store = SledStore::open_temporary().unwrap();
        let mkek = test_mkek();
        generate_vapid(&store, &mkek, 1000).await.unwrap();
        let created = create_lease(
            &store,
            CreateLeaseInput {
                user_id: "u1".into(),
                subs: vec![one_sub()],
                ttl_hours: 24,
                auto_extend: true,
            },
            1000,
        )
        .await
        .unwrap();

        let jwts = issue_vapid_jwts(
            &store,
            &mkek,
            "mailto:ops@example.com",
            IssueJwtInput {
                lease_id: created.lease_id,
                kid: None,
                eid: None,
            },
            3,
            1000,
        )
        .await
        .unwrap();
        assert_eq!(jwts.len(), 3);
        assert!(jwts[1].exp > jwts[0].exp);
        assert!(jwts[2].exp > jwts[1].exp);
        assert_eq!(jwts[1].exp - jwts[0].exp, BATCH_STRIDE_SECS);
    }

    #[tokio::test]
    async fn extend_leases_classifies_every_case() {
        let store = SledStore::open_temporary().unwrap();
        let mkek = test_mkek();
        generate_vapid(&store, &mkek, 1000).await.unwrap();
        let auto = create_lease(
            &store,
            CreateLeaseInput {
                user_id: "u1".into(),
                subs: vec![one_sub()],
                ttl_hours: 1,
                auto_extend: true,
            },
            1000,
        )
        .await
        .unwrap();
        let manual = create_lease(
            &store,
            CreateLeaseInput {
                user_id: "u1".into(),
                subs: vec![one_sub()],
                ttl_hours: 1,
                auto_extend: false,
            },
            1000,
        )
        .await
        .unwrap();

        let result = extend_leases(
            &store,
            &[auto.lease_id.clone(), manual.lease_id.clone(), "missing".into()],
            false,
            false,
            2000,
        )
        .await
        .unwrap();

        assert_eq!(result.extended, 1);
        assert_eq!(result.skipped, 2);
        assert_eq!(result.results[0].status, ExtendStatus::Extended { exp: 2000 + EXTEND_GRANT_MS });
        assert_eq!(result.results[1].status, ExtendStatus::Skipped("autoExtend=false"));
        assert_eq!(result.results[2].status, ExtendStatus::Skipped("not found"));
    }

    #[tokio::test]
    async fn delete_expired_removes_only_past_exp() {
        let store = SledStore::open_temporary().unwrap();
        let mkek = test_mkek();
        generate_vapid(&store, &mkek, 1000).await.unwrap();
        let short = create_lease(
            &store,
            CreateLeaseInput {
                user_id: "u1".into(),
                subs: vec![one_sub()],
                ttl_hours: 1,
                auto_extend: true,
            },
            1000,
        )
        .await
        .unwrap();
        let long = create_lease(
            &store,
            CreateLeaseInput {
                user_id: "u1".into(),
                subs: vec![one_sub()],
                ttl_hours: 720,
                auto_extend: true,
            },
            1000,
        )
        .await
        .unwrap();

        let removed = delete_expired_leases(&store, short.exp + 1).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_lease(&short.lease_id).await.unwrap().is_none());
        assert!(store.get_lease(&long.lease_id).await.unwrap().is_some());
    }
}
