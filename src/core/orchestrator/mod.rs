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

//! The request orchestrator: one tagged-enum-shaped RPC envelope in,
//! one envelope out, dispatched by method name to a typed handler.
//! Every dispatch is wrapped in a `kms.rpc` tracing span carrying
//! `method` and `requestId`, mirroring the donor's `core::consensus`
//! request-handling surface.

pub mod params;

use std::cell::Cell;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::Instrument;

pub use params::RpcValidationError;

use crate::config::KmsConfig;
use crate::core::audit::{self, AuditHeadCache, AuditKeyAlg, LogOperationInput};
use crate::core::crypto::primitives;
use crate::core::keyservice;
use crate::core::lease::{self, LeaseError};
use crate::core::persistence::Store;
use crate::core::security::enrollment::setup_enrollment;
use crate::core::security::secret::SecretBytes;
use crate::core::security::unlock::{derive_mkek, with_unlock, UnlockError, UnlockGuard};
use crate::core::types::{AuditEntry, EnrollmentRecord, KeyAlg, Quotas, AUDIT_INSTANCE_KID};
use crate::error::KmsError;
use crate::monitoring::metrics::Metrics;

use params::{
    AddEnrollmentParams, CreateLeaseParams, CredentialsOnlyParams, ExtendLeasesParams, GetPublicKeyParams,
    IssueVapidJwtParams, IssueVapidJwtsParams, RemoveEnrollmentParams, SetupParams, SignJwtParams,
    UserScopedParams, VerifyLeaseParams,
};

/// One inbound RPC call: a correlation id, a method name, and its
/// untyped parameter object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcEnvelopeRequest {
    /// Caller-supplied correlation id, echoed back verbatim.
    pub id: String,
    /// The RPC method name, e.g. `"setupPassphrase"`.
    pub method: String,
    /// Method-specific parameters.
    #[serde(default)]
    pub params: Value,
}

/// One outbound RPC response. Exactly one of `result`/`error` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcEnvelopeResponse {
    /// Echoes the request's correlation id.
    pub id: String,
    /// The method's return value, on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// A human-readable failure message, on error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A holder for the richer error a store/audit call produced inside a
/// `with_unlock` closure, whose return type is pinned to `UnlockError`.
/// The closure stashes the real error here and returns the generic
/// `UnlockError::Crypto` sentinel; the caller prefers the stashed error
/// when present.
type ErrStash = Arc<Mutex<Option<KmsError>>>;

fn new_stash() -> ErrStash {
    Arc::new(Mutex::new(None))
}

fn stash_err<E: Into<KmsError>>(stash: &ErrStash, e: E) -> UnlockError {
    if let Ok(mut slot) = stash.lock() {
        *slot = Some(e.into());
    }
    UnlockError::Crypto
}

fn finalize_unlock_error(err: UnlockError, stash: &ErrStash) -> KmsError {
    if matches!(err, UnlockError::Crypto) {
        if let Ok(mut slot) = stash.lock() {
            if let Some(rich) = slot.take() {
                return rich;
            }
        }
    }
    KmsError::Unlock(err)
}

fn is_quota_error(e: &LeaseError) -> bool {
    matches!(
        e,
        LeaseError::QuotaTokensPerHour | LeaseError::QuotaSendsPerMinute | LeaseError::QuotaSendsPerMinutePerEid
    )
}

fn quotas_to_json(q: &Quotas) -> Value {
    json!({
        "tokensPerHour": q.tokens_per_hour,
        "sendsPerMinute": q.sends_per_minute,
        "burstSends": q.burst_sends,
        "sendsPerMinutePerEid": q.sends_per_minute_per_eid,
    })
}

fn audit_entry_to_wire_json(e: &AuditEntry) -> Value {
    let mut obj = json!({
        "seqNum": e.seq_num,
        "timestamp": e.timestamp,
        "op": e.op,
        "requestId": e.request_id,
        "previousHash": e.previous_hash,
        "chainHash": e.chain_hash,
        "signerId": e.signer_id,
        "sig": e.sig,
    });
    if let Some(kid) = &e.kid {
        obj["kid"] = json!(kid);
    }
    if let Some(user_id) = &e.user_id {
        obj["userId"] = json!(user_id);
    }
    if let Some(origin) = &e.origin {
        obj["origin"] = json!(origin);
    }
    if let Some(duration_ms) = e.duration_ms {
        obj["durationMs"] = json!(duration_ms);
    }
    if let Some(details) = &e.details {
        obj["details"] = details.clone();
    }
    obj
}

fn enrollment_record_to_wire_json(r: &EnrollmentRecord) -> Value {
    json!({
        "enrollmentId": r.enrollment_id,
        "userId": r.user_id,
        "method": r.inputs.method().as_str(),
        "createdAt": r.created_at,
    })
}

fn extend_result_to_json(o: &lease::ExtendLeasesOutput) -> Value {
    let results: Vec<Value> = o
        .results
        .iter()
        .map(|item| match &item.status {
            lease::ExtendStatus::Extended { exp } => json!({"leaseId": item.lease_id, "status": "extended", "exp": exp}),
            lease::ExtendStatus::Skipped(reason) => json!({"leaseId": item.lease_id, "status": "skipped", "reason": reason}),
        })
        .collect();
    json!({"results": results, "extended": o.extended, "skipped": o.skipped})
}

/// Owns the storage handle, configuration, the process-wide unlock
/// reentrancy guard, the audit chain head cache, and the metrics
/// bundle every RPC method draws from.
pub struct Orchestrator {
    store: Arc<dyn Store>,
    config: KmsConfig,
    guard: UnlockGuard,
    audit_head: AuditHeadCache,
    metrics: Metrics,
}

impl Orchestrator {
    /// Build an orchestrator over an already-opened store.
    pub fn new(store: Arc<dyn Store>, config: KmsConfig, metrics: Metrics) -> Self {
        Orchestrator {
            store,
            config,
            guard: UnlockGuard::new(),
            audit_head: AuditHeadCache::new(),
            metrics,
        }
    }

    /// Handle one RPC envelope end to end: dispatch, and translate any
    /// error into the envelope's `error` string.
    pub async fn handle(&self, request: RpcEnvelopeRequest, now_ms: u64) -> RpcEnvelopeResponse {
        let RpcEnvelopeRequest { id, method, params } = request;
        let span = tracing::info_span!("kms.rpc", method = %method, request_id = %id);
        async {
            match self.dispatch(&method, &id, params, now_ms).await {
                Ok(result) => {
                    tracing::debug!("rpc completed");
                    RpcEnvelopeResponse {
                        id: id.clone(),
                        result: Some(result),
                        error: None,
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "rpc failed");
                    RpcEnvelopeResponse {
                        id: id.clone(),
                        result: None,
                        error: Some(err.to_string()),
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn dispatch(&self, method: &str, request_id: &str, params: Value, now_ms: u64) -> Result<Value, KmsError> {
        match method {
            "setupPassphrase" => {
                self.handle_setup("setup-passphrase", request_id, params::parse_setup_passphrase(&params)?, now_ms)
                    .await
            }
            "setupPasskeyPRF" => {
                self.handle_setup(
                    "setup-passkey-prf",
                    request_id,
                    params::parse_setup_passkey_prf(&params)?,
                    now_ms,
                )
                .await
            }
            "setupPasskeyGate" => {
                self.handle_setup(
                    "setup-passkey-gate",
                    request_id,
                    params::parse_setup_passkey_gate(&params)?,
                    now_ms,
                )
                .await
            }
            "addEnrollment" => {
                self.handle_add_enrollment(request_id, params::parse_add_enrollment(&params)?, now_ms)
                    .await
            }
            "removeEnrollment" => {
                self.handle_remove_enrollment(request_id, params::parse_remove_enrollment(&params)?, now_ms)
                    .await
            }
            "generateVAPID" => {
                self.handle_generate_vapid(request_id, params::parse_credentials_only(method, &params)?, now_ms)
                    .await
            }
            "regenerateVAPID" => {
                self.handle_regenerate_vapid(request_id, params::parse_credentials_only(method, &params)?, now_ms)
                    .await
            }
            "signJWT" => self.handle_sign_jwt(request_id, params::parse_sign_jwt(&params)?, now_ms).await,
            "createLease" => {
                self.handle_create_lease(request_id, params::parse_create_lease(&params)?, now_ms)
                    .await
            }
            "verifyLease" => self.handle_verify_lease(params::parse_verify_lease(&params)?, now_ms).await,
            "issueVAPIDJWT" => {
                self.handle_issue_vapid_jwt(request_id, params::parse_issue_vapid_jwt(&params)?, now_ms)
                    .await
            }
            "issueVAPIDJWTs" => {
                self.handle_issue_vapid_jwts(request_id, params::parse_issue_vapid_jwts(&params)?, now_ms)
                    .await
            }
            "extendLeases" => {
                self.handle_extend_leases(request_id, params::parse_extend_leases(&params)?, now_ms)
                    .await
            }
            "getPublicKey" => self.handle_get_public_key(params::parse_get_public_key(&params)?).await,
            "getAuditPublicKey" => {
                params::require_object(method, &params)?;
                self.handle_get_audit_public_key().await
            }
            "verifyAuditChain" => {
                params::require_object(method, &params)?;
                self.handle_verify_audit_chain().await
            }
            "getAuditLog" => {
                params::require_object(method, &params)?;
                self.handle_get_audit_log().await
            }
            "isSetup" => self.handle_is_setup(params::parse_user_scoped(method, &params)?).await,
            "getEnrollments" => {
                self.handle_get_enrollments(params::parse_user_scoped(method, &params)?).await
            }
            "resetKMS" => {
                self.handle_reset_kms(params::parse_user_scoped(method, &params)?).await
            }
            _ => Err(KmsError::UnknownMethod),
        }
    }

    async fn handle_setup(&self, op: &str, request_id: &str, parsed: SetupParams, now_ms: u64) -> Result<Value, KmsError> {
        let target_method = parsed.inputs.method_tag();
        let user_id = parsed.inputs.user_id().to_string();
        let existing_ms_provided = parsed.inputs.existing_ms_provided();

        let existing = self.store.list_enrollments_by_user(&user_id).await?;
        if existing.iter().any(|e| e.inputs.method() == target_method) {
            return Err(UnlockError::AlreadyEnrolled.into());
        }
        let is_first = existing.is_empty() && !existing_ms_provided;

        let enrollment_id = primitives::base64url_encode(&primitives::random_bytes(16)?);
        let (record, ms) = setup_enrollment(parsed.inputs, enrollment_id, &self.config, now_ms)?;
        self.store.put_enrollment(&record).await?;

        let mkek = derive_mkek(&ms)?;
        audit::ensure_iak(&*self.store, &mkek, AuditKeyAlg::Ed25519, now_ms).await?;

        let mut vapid_kid = None;
        let mut vapid_public_key = None;
        if is_first {
            let vapid = keyservice::generate_vapid(&*self.store, &mkek, now_ms).await?;
            vapid_public_key = Some(primitives::base64url_encode(&vapid.public_key_raw));
            vapid_kid = Some(vapid.kid);
            self.metrics.kms_vapid_keys_generated_total.inc();
        }

        audit::log_operation(
            &self.audit_head,
            &*self.store,
            &mkek,
            LogOperationInput {
                op: op.to_string(),
                kid: vapid_kid.clone(),
                request_id: request_id.to_string(),
                user_id: Some(user_id),
                origin: None,
                duration_ms: None,
                details: None,
            },
            now_ms,
        )
        .await?;
        self.metrics.kms_unlocks_total.inc();
        self.metrics.kms_audit_entries_total.inc();

        let mut out = json!({"success": true, "enrollmentId": record.enrollment_id});
        if let Some(kid) = vapid_kid {
            out["vapidKid"] = json!(kid);
        }
        if let Some(pk) = vapid_public_key {
            out["vapidPublicKey"] = json!(pk);
        }
        Ok(out)
    }

    async fn handle_add_enrollment(&self, request_id: &str, p: AddEnrollmentParams, now_ms: u64) -> Result<Value, KmsError> {
        let existing = self.store.list_enrollments_by_user(&p.user_id).await?;
        if existing.iter().any(|e| e.inputs.method() == p.target_method) {
            return Err(UnlockError::AlreadyEnrolled.into());
        }

        let last_err = new_stash();
        let last_err_inner = last_err.clone();
        let store = &*self.store;
        let audit_head = &self.audit_head;
        let config = &self.config;
        let target_method = p.target_method;
        let user_id = p.user_id;
        let new_credentials = p.new_credentials;
        let request_id_owned = request_id.to_string();

        let outcome = with_unlock(&self.guard, &existing, &self.config, &p.credentials, || now_ms, move |mkek, ms| async move {
            let raw_inputs = params::parse_new_credentials(target_method, user_id.clone(), &new_credentials)
                .map_err(|e| stash_err(&last_err_inner, e))?;
            let inputs = params::with_existing_ms(raw_inputs, ms.duplicate());
            let enrollment_id = primitives::base64url_encode(&primitives::random_bytes(16)?);
            let (record, _ms2) = setup_enrollment(inputs, enrollment_id, config, now_ms)?;
            store.put_enrollment(&record).await.map_err(|e| stash_err(&last_err_inner, e))?;
            audit::log_operation(
                audit_head,
                store,
                &mkek,
                LogOperationInput {
                    op: "add-enrollment".to_string(),
                    kid: None,
                    request_id: request_id_owned,
                    user_id: Some(user_id.clone()),
                    origin: None,
                    duration_ms: None,
                    details: Some(json!({"enrollmentId": record.enrollment_id, "method": target_method.as_str()})),
                },
                now_ms,
            )
            .await
            .map_err(|e| stash_err(&last_err_inner, e))?;
            Ok(record.enrollment_id)
        })
        .await;

        match outcome {
            Ok(o) => {
                self.metrics.kms_unlocks_total.inc();
                self.metrics.kms_audit_entries_total.inc();
                Ok(json!({"success": true, "enrollmentId": o.result}))
            }
            Err(e) => {
                self.metrics.kms_unlock_failures_total.inc();
                Err(finalize_unlock_error(e, &last_err))
            }
        }
    }

    async fn handle_remove_enrollment(&self, request_id: &str, p: RemoveEnrollmentParams, now_ms: u64) -> Result<Value, KmsError> {
        let record = self
            .store
            .get_enrollment(&p.enrollment_id)
            .await?
            .ok_or_else(|| KmsError::EnrollmentNotFound(p.enrollment_id.clone()))?;
        let enrollments = self.store.list_enrollments_by_user(&record.user_id).await?;

        let last_err = new_stash();
        let last_err_inner = last_err.clone();
        let store = &*self.store;
        let audit_head = &self.audit_head;
        let enrollment_id = p.enrollment_id;
        let user_id = record.user_id;
        let request_id_owned = request_id.to_string();

        let outcome = with_unlock(&self.guard, &enrollments, &self.config, &p.credentials, || now_ms, move |mkek, _ms| async move {
            store.delete_enrollment(&enrollment_id).await.map_err(|e| stash_err(&last_err_inner, e))?;
            audit::log_operation(
                audit_head,
                store,
                &mkek,
                LogOperationInput {
                    op: "remove-enrollment".to_string(),
                    kid: None,
                    request_id: request_id_owned,
                    user_id: Some(user_id),
                    origin: None,
                    duration_ms: None,
                    details: Some(json!({"enrollmentId": enrollment_id})),
                },
                now_ms,
            )
            .await
            .map_err(|e| stash_err(&last_err_inner, e))?;
            Ok(())
        })
        .await;

        match outcome {
            Ok(_) => {
                self.metrics.kms_unlocks_total.inc();
                self.metrics.kms_audit_entries_total.inc();
                Ok(json!({"success": true}))
            }
            Err(e) => {
                self.metrics.kms_unlock_failures_total.inc();
                Err(finalize_unlock_error(e, &last_err))
            }
        }
    }

    async fn handle_generate_vapid(&self, request_id: &str, p: CredentialsOnlyParams, now_ms: u64) -> Result<Value, KmsError> {
        let user_id = p.credentials.user_id().to_string();
        let enrollments = self.store.list_enrollments_by_user(&user_id).await?;
        let last_err = new_stash();
        let last_err_inner = last_err.clone();
        let store = &*self.store;
        let audit_head = &self.audit_head;
        let request_id_owned = request_id.to_string();

        let outcome = with_unlock(&self.guard, &enrollments, &self.config, &p.credentials, || now_ms, move |mkek, _ms| async move {
            let record = keyservice::generate_vapid(store, &mkek, now_ms)
                .await
                .map_err(|e| stash_err(&last_err_inner, e))?;
            audit::log_operation(
                audit_head,
                store,
                &mkek,
                LogOperationInput {
                    op: "generate-vapid".to_string(),
                    kid: Some(record.kid.clone()),
                    request_id: request_id_owned,
                    user_id: Some(user_id),
                    origin: None,
                    duration_ms: None,
                    details: None,
                },
                now_ms,
            )
            .await
            .map_err(|e| stash_err(&last_err_inner, e))?;
            Ok(record)
        })
        .await;

        match outcome {
            Ok(o) => {
                self.metrics.kms_unlocks_total.inc();
                self.metrics.kms_vapid_keys_generated_total.inc();
                self.metrics.kms_audit_entries_total.inc();
                Ok(json!({"kid": o.result.kid, "publicKey": primitives::base64url_encode(&o.result.public_key_raw)}))
            }
            Err(e) => {
                self.metrics.kms_unlock_failures_total.inc();
                Err(finalize_unlock_error(e, &last_err))
            }
        }
    }

    async fn handle_regenerate_vapid(&self, request_id: &str, p: CredentialsOnlyParams, now_ms: u64) -> Result<Value, KmsError> {
        let user_id = p.credentials.user_id().to_string();
        let enrollments = self.store.list_enrollments_by_user(&user_id).await?;
        let last_err = new_stash();
        let last_err_inner = last_err.clone();
        let store = &*self.store;
        let audit_head = &self.audit_head;
        let request_id_owned = request_id.to_string();

        let outcome = with_unlock(&self.guard, &enrollments, &self.config, &p.credentials, || now_ms, move |mkek, _ms| async move {
            let (deleted_kids, record) = keyservice::regenerate_vapid(store, &mkek, now_ms)
                .await
                .map_err(|e| stash_err(&last_err_inner, e))?;
            audit::log_operation(
                audit_head,
                store,
                &mkek,
                LogOperationInput {
                    op: "regenerate-vapid".to_string(),
                    kid: Some(record.kid.clone()),
                    request_id: request_id_owned,
                    user_id: Some(user_id),
                    origin: None,
                    duration_ms: None,
                    details: Some(json!({"deletedKids": deleted_kids, "newKid": record.kid})),
                },
                now_ms,
            )
            .await
            .map_err(|e| stash_err(&last_err_inner, e))?;
            Ok(record)
        })
        .await;

        match outcome {
            Ok(o) => {
                self.metrics.kms_unlocks_total.inc();
                self.metrics.kms_vapid_keys_generated_total.inc();
                self.metrics.kms_audit_entries_total.inc();
                Ok(json!({"kid": o.result.kid, "publicKey": primitives::base64url_encode(&o.result.public_key_raw)}))
            }
            Err(e) => {
                self.metrics.kms_unlock_failures_total.inc();
                Err(finalize_unlock_error(e, &last_err))
            }
        }
    }

    async fn handle_sign_jwt(&self, request_id: &str, p: SignJwtParams, now_ms: u64) -> Result<Value, KmsError> {
        let user_id = p.credentials.user_id().to_string();
        let enrollments = self.store.list_enrollments_by_user(&user_id).await?;
        let last_err = new_stash();
        let last_err_inner = last_err.clone();
        let store = &*self.store;
        let audit_head = &self.audit_head;
        let kid = p.kid;
        let payload = p.payload;
        let now_secs = now_ms / 1000;
        let request_id_owned = request_id.to_string();

        let outcome = with_unlock(&self.guard, &enrollments, &self.config, &p.credentials, || now_ms, move |mkek, _ms| async move {
            let signed = keyservice::sign_jwt(store, &mkek, &kid, payload, now_secs)
                .await
                .map_err(|e| stash_err(&last_err_inner, e))?;
            audit::log_operation(
                audit_head,
                store,
                &mkek,
                LogOperationInput {
                    op: "sign-jwt".to_string(),
                    kid: Some(kid),
                    request_id: request_id_owned,
                    user_id: Some(user_id),
                    origin: None,
                    duration_ms: None,
                    details: None,
                },
                now_ms,
            )
            .await
            .map_err(|e| stash_err(&last_err_inner, e))?;
            Ok(signed)
        })
        .await;

        match outcome {
            Ok(o) => {
                self.metrics.kms_unlocks_total.inc();
                self.metrics.kms_jwt_signed_total.inc();
                self.metrics.kms_audit_entries_total.inc();
                Ok(json!({"jwt": o.result.jwt, "jti": o.result.jti, "exp": o.result.exp}))
            }
            Err(e) => {
                self.metrics.kms_unlock_failures_total.inc();
                Err(finalize_unlock_error(e, &last_err))
            }
        }
    }

    async fn handle_create_lease(&self, request_id: &str, p: CreateLeaseParams, now_ms: u64) -> Result<Value, KmsError> {
        let enrollments = self.store.list_enrollments_by_user(&p.user_id).await?;
        let last_err = new_stash();
        let last_err_inner = last_err.clone();
        let store = &*self.store;
        let audit_head = &self.audit_head;
        let user_id = p.user_id;
        let subs = p.subs;
        let ttl_hours = p.ttl_hours;
        let auto_extend = p.auto_extend;
        let request_id_owned = request_id.to_string();

        let outcome = with_unlock(&self.guard, &enrollments, &self.config, &p.credentials, || now_ms, move |mkek, _ms| async move {
            let created = lease::create_lease(
                store,
                lease::CreateLeaseInput {
                    user_id: user_id.clone(),
                    subs,
                    ttl_hours,
                    auto_extend,
                },
                now_ms,
            )
            .await
            .map_err(|e| stash_err(&last_err_inner, e))?;
            audit::log_operation(
                audit_head,
                store,
                &mkek,
                LogOperationInput {
                    op: "create-lease".to_string(),
                    kid: Some(created.kid.clone()),
                    request_id: request_id_owned,
                    user_id: Some(user_id),
                    origin: None,
                    duration_ms: None,
                    details: Some(json!({"leaseId": created.lease_id})),
                },
                now_ms,
            )
            .await
            .map_err(|e| stash_err(&last_err_inner, e))?;
            Ok(created)
        })
        .await;

        match outcome {
            Ok(o) => {
                self.metrics.kms_unlocks_total.inc();
                self.metrics.kms_leases_created_total.inc();
                self.metrics.kms_audit_entries_total.inc();
                Ok(json!({
                    "leaseId": o.result.lease_id,
                    "exp": o.result.exp,
                    "quotas": quotas_to_json(&o.result.quotas),
                    "autoExtend": o.result.auto_extend,
                    "kid": o.result.kid,
                }))
            }
            Err(e) => {
                self.metrics.kms_unlock_failures_total.inc();
                Err(finalize_unlock_error(e, &last_err))
            }
        }
    }

    async fn handle_verify_lease(&self, p: VerifyLeaseParams, now_ms: u64) -> Result<Value, KmsError> {
        let v = lease::verify_lease(&*self.store, &p.lease_id, now_ms).await?;
        Ok(json!({
            "valid": v.valid,
            "leaseId": v.lease_id,
            "kid": v.kid,
            "reason": v.reason.map(|r| r.as_str()),
        }))
    }

    async fn handle_issue_vapid_jwt(&self, request_id: &str, p: IssueVapidJwtParams, now_ms: u64) -> Result<Value, KmsError> {
        let user_id = p.credentials.user_id().to_string();
        let enrollments = self.store.list_enrollments_by_user(&user_id).await?;
        let last_err = new_stash();
        let last_err_inner = last_err.clone();
        let store = &*self.store;
        let audit_head = &self.audit_head;
        let lease_id = p.lease_id;
        let kid_hint = p.kid;
        let endpoint = p.endpoint;
        let jwt_sub = self.config.lease_jwt_sub.clone();
        let request_id_owned = request_id.to_string();

        let outcome = with_unlock(&self.guard, &enrollments, &self.config, &p.credentials, || now_ms, move |mkek, _ms| async move {
            let signed = lease::issue_vapid_jwt(
                store,
                &mkek,
                &jwt_sub,
                lease::IssueJwtInput {
                    lease_id: lease_id.clone(),
                    kid: kid_hint,
                    eid: endpoint,
                },
                now_ms,
            )
            .await
            .map_err(|e| stash_err(&last_err_inner, e))?;
            audit::log_operation(
                audit_head,
                store,
                &mkek,
                LogOperationInput {
                    op: "issue-vapid-jwt".to_string(),
                    kid: None,
                    request_id: request_id_owned,
                    user_id: Some(user_id),
                    origin: None,
                    duration_ms: None,
                    details: Some(json!({"leaseId": lease_id, "jti": signed.jti})),
                },
                now_ms,
            )
            .await
            .map_err(|e| stash_err(&last_err_inner, e))?;
            Ok(signed)
        })
        .await;

        match outcome {
            Ok(o) => {
                self.metrics.kms_unlocks_total.inc();
                self.metrics.kms_jwt_signed_total.inc();
                self.metrics.kms_audit_entries_total.inc();
                Ok(json!({"jwt": o.result.jwt, "jti": o.result.jti, "exp": o.result.exp}))
            }
            Err(e) => {
                self.metrics.kms_unlock_failures_total.inc();
                let kms_err = finalize_unlock_error(e, &last_err);
                if matches!(&kms_err, KmsError::Lease(le) if is_quota_error(le)) {
                    self.metrics.kms_quota_rejections_total.inc();
                }
                Err(kms_err)
            }
        }
    }

    async fn handle_issue_vapid_jwts(&self, request_id: &str, p: IssueVapidJwtsParams, now_ms: u64) -> Result<Value, KmsError> {
        let user_id = p.credentials.user_id().to_string();
        let enrollments = self.store.list_enrollments_by_user(&user_id).await?;
        let last_err = new_stash();
        let last_err_inner = last_err.clone();
        let store = &*self.store;
        let audit_head = &self.audit_head;
        let lease_id = p.lease_id;
        let kid_hint = p.kid;
        let endpoint = p.endpoint;
        let count = p.count;
        let jwt_sub = self.config.lease_jwt_sub.clone();
        let request_id_owned = request_id.to_string();

        let outcome = with_unlock(&self.guard, &enrollments, &self.config, &p.credentials, || now_ms, move |mkek, _ms| async move {
            let signed = lease::issue_vapid_jwts(
                store,
                &mkek,
                &jwt_sub,
                lease::IssueJwtInput {
                    lease_id: lease_id.clone(),
                    kid: kid_hint,
                    eid: endpoint,
                },
                count,
                now_ms,
            )
            .await
            .map_err(|e| stash_err(&last_err_inner, e))?;
            audit::log_operation(
                audit_head,
                store,
                &mkek,
                LogOperationInput {
                    op: "issue-vapid-jwts".to_string(),
                    kid: None,
                    request_id: request_id_owned,
                    user_id: Some(user_id),
                    origin: None,
                    duration_ms: None,
                    details: Some(json!({"leaseId": lease_id, "count": count})),
                },
                now_ms,
            )
            .await
            .map_err(|e| stash_err(&last_err_inner, e))?;
            Ok(signed)
        })
        .await;

        match outcome {
            Ok(o) => {
                self.metrics.kms_unlocks_total.inc();
                self.metrics.kms_jwt_signed_total.inc_by(o.result.len() as u64);
                self.metrics.kms_audit_entries_total.inc();
                let jwts: Vec<Value> = o
                    .result
                    .iter()
                    .map(|s| json!({"jwt": s.jwt, "jti": s.jti, "exp": s.exp}))
                    .collect();
                Ok(json!({"jwts": jwts}))
            }
            Err(e) => {
                self.metrics.kms_unlock_failures_total.inc();
                let kms_err = finalize_unlock_error(e, &last_err);
                if matches!(&kms_err, KmsError::Lease(le) if is_quota_error(le)) {
                    self.metrics.kms_quota_rejections_total.inc();
                }
                Err(kms_err)
            }
        }
    }

    // `extendLeases` audits each extended lease under the recovered MKEK
    // only when credentials were supplied for the call. A pure
    // autoExtend:true renewal batch carries no credentials and therefore
    // no MKEK to sign an entry with; it is treated the same as
    // `deleteExpiredLeases`' maintenance path, which spec.md also leaves
    // unaudited.
    async fn handle_extend_leases(&self, request_id: &str, p: ExtendLeasesParams, now_ms: u64) -> Result<Value, KmsError> {
        match p.credentials {
            Some(credentials) => {
                let enrollments = self.store.list_enrollments_by_user(&p.user_id).await?;
                let last_err = new_stash();
                let last_err_inner = last_err.clone();
                let store = &*self.store;
                let audit_head = &self.audit_head;
                let lease_ids = p.lease_ids;
                let request_auth = p.request_auth;
                let user_id = p.user_id;
                let request_id_owned = request_id.to_string();

                let outcome = with_unlock(&self.guard, &enrollments, &self.config, &credentials, || now_ms, move |mkek, _ms| async move {
                    let result = lease::extend_leases(store, &lease_ids, request_auth, true, now_ms)
                        .await
                        .map_err(|e| stash_err(&last_err_inner, e))?;
                    for item in &result.results {
                        if let lease::ExtendStatus::Extended { exp } = item.status {
                            audit::log_operation(
                                audit_head,
                                store,
                                &mkek,
                                LogOperationInput {
                                    op: "extend-lease".to_string(),
                                    kid: None,
                                    request_id: request_id_owned.clone(),
                                    user_id: Some(user_id.clone()),
                                    origin: None,
                                    duration_ms: None,
                                    details: Some(json!({"leaseId": item.lease_id, "exp": exp})),
                                },
                                now_ms,
                            )
                            .await
                            .map_err(|e| stash_err(&last_err_inner, e))?;
                        }
                    }
                    Ok(result)
                })
                .await;

                match outcome {
                    Ok(o) => {
                        self.metrics.kms_unlocks_total.inc();
                        self.metrics.kms_leases_extended_total.inc_by(o.result.extended as u64);
                        if o.result.extended > 0 {
                            self.metrics.kms_audit_entries_total.inc_by(o.result.extended as u64);
                        }
                        Ok(extend_result_to_json(&o.result))
                    }
                    Err(e) => {
                        self.metrics.kms_unlock_failures_total.inc();
                        Err(finalize_unlock_error(e, &last_err))
                    }
                }
            }
            None => {
                let result = lease::extend_leases(&*self.store, &p.lease_ids, p.request_auth, false, now_ms).await?;
                self.metrics.kms_leases_extended_total.inc_by(result.extended as u64);
                Ok(extend_result_to_json(&result))
            }
        }
    }

    async fn handle_get_public_key(&self, p: GetPublicKeyParams) -> Result<Value, KmsError> {
        let raw = keyservice::get_public_key(&*self.store, &p.kid).await?;
        Ok(json!({"publicKey": primitives::base64url_encode(&raw)}))
    }

    async fn handle_get_audit_public_key(&self) -> Result<Value, KmsError> {
        let record = self
            .store
            .get_wrapped_key(AUDIT_INSTANCE_KID)
            .await?
            .ok_or(crate::core::audit::AuditError::NotInitialized)?;
        let spki = match record.alg {
            KeyAlg::Ed25519 => primitives::ed25519_spki(&record.public_key_raw)?,
            KeyAlg::Es256 => primitives::p256_spki(&record.public_key_raw)?,
        };
        Ok(json!({"publicKey": primitives::base64url_encode(&spki)}))
    }

    async fn handle_verify_audit_chain(&self) -> Result<Value, KmsError> {
        let result = audit::verify_audit_chain(&*self.store).await?;
        if !result.valid {
            self.metrics.kms_audit_verify_errors_total.inc();
        }
        Ok(json!({"valid": result.valid, "verified": result.verified, "errors": result.errors}))
    }

    async fn handle_get_audit_log(&self) -> Result<Value, KmsError> {
        let entries = self.store.scan_audit().await?;
        let wire: Vec<Value> = entries.iter().map(audit_entry_to_wire_json).collect();
        Ok(json!({"entries": wire}))
    }

    async fn handle_is_setup(&self, p: UserScopedParams) -> Result<Value, KmsError> {
        match p.user_id {
            Some(uid) => {
                let enrollments = self.store.list_enrollments_by_user(&uid).await?;
                let methods: Vec<&str> = enrollments.iter().map(|e| e.inputs.method().as_str()).collect();
                Ok(json!({"isSetup": !enrollments.is_empty(), "methods": methods}))
            }
            None => {
                let all = self.store.list_all_enrollments().await?;
                Ok(json!({"isSetup": !all.is_empty(), "methods": Vec::<&str>::new()}))
            }
        }
    }

    async fn handle_get_enrollments(&self, p: UserScopedParams) -> Result<Value, KmsError> {
        let records = match p.user_id {
            Some(uid) => self.store.list_enrollments_by_user(&uid).await?,
            None => self.store.list_all_enrollments().await?,
        };
        let wire: Vec<Value> = records.iter().map(enrollment_record_to_wire_json).collect();
        Ok(json!({"enrollments": wire}))
    }

    // `resetKMS` drops the entire database (spec.md §3); a `userId`
    // scoping filter cannot be honored once the store is gone, so it is
    // accepted but has no effect.
    async fn handle_reset_kms(&self, p: UserScopedParams) -> Result<Value, KmsError> {
        let _ = p.user_id;
        self.store.reset().await?;
        Ok(json!({"success": true}))
    }
}

trait SetupInputsExt {
    fn method_tag(&self) -> crate::core::types::EnrollmentMethod;
    fn existing_ms_provided(&self) -> bool;
}

impl SetupInputsExt for crate::core::security::enrollment::SetupInputs {
    fn method_tag(&self) -> crate::core::types::EnrollmentMethod {
        use crate::core::security::enrollment::SetupInputs;
        use crate::core::types::EnrollmentMethod;
        match self {
            SetupInputs::Passphrase { .. } => EnrollmentMethod::Passphrase,
            SetupInputs::PasskeyPrf { .. } => EnrollmentMethod::PasskeyPrf,
            SetupInputs::PasskeyGate { .. } => EnrollmentMethod::PasskeyGate,
        }
    }

    fn existing_ms_provided(&self) -> bool {
        use crate::core::security::enrollment::SetupInputs;
        match self {
            SetupInputs::Passphrase { existing_ms, .. }
            | SetupInputs::PasskeyPrf { existing_ms, .. }
            | SetupInputs::PasskeyGate { existing_ms, .. } => existing_ms.is_some(),
        }
    }
}

// Quiets an unused-import lint if a future trim drops `Cell`/`SecretBytes`
// usage from this file without remembering to prune the import list.
#[allow(dead_code)]
fn _assert_unused_imports_stay_wired(_: Cell<()>, _: &SecretBytes) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::persistence::SledStore;
    use serde_json::json;

    fn orchestrator() -> Orchestrator {
        let store: Arc<dyn Store> = Arc::new(SledStore::open_temporary().unwrap());
        let mut config = KmsConfig::default();
        config.pbkdf2_iter_bounds = (1_000, 2_000_000);
        config.pbkdf2_calibration_target_ms = (1, 50);
        Orchestrator::new(store, config, Metrics::new().unwrap())
    }

    #[tokio::test]
    async fn unknown_method_reports_fixed_error() {
        let orch = orchestrator();
        let resp = orch
            .handle(
                RpcEnvelopeRequest {
                    id: "r1".into(),
                    method: "bogusMethod".into(),
                    params: json!({}),
                },
                1000,
            )
            .await;
        assert_eq!(resp.error.as_deref(), Some("Unknown RPC method"));
        assert!(resp.result.is_none());
    }

    #[tokio::test]
    async fn validation_error_names_method_and_param() {
        let orch = orchestrator();
        let resp = orch
            .handle(
                RpcEnvelopeRequest {
                    id: "r1".into(),
                    method: "setupPassphrase".into(),
                    params: json!({}),
                },
                1000,
            )
            .await;
        assert_eq!(
            resp.error.as_deref(),
            Some("setupPassphrase: missing parameter `userId`")
        );
    }

    #[tokio::test]
    async fn first_setup_auto_generates_a_vapid_key_and_sign_jwt_succeeds() {
        let orch = orchestrator();
        let setup = orch
            .handle(
                RpcEnvelopeRequest {
                    id: "r1".into(),
                    method: "setupPassphrase".into(),
                    params: json!({"userId": "u1", "passphrase": "correct horse battery staple"}),
                },
                1000,
            )
            .await;
        assert!(setup.error.is_none(), "{:?}", setup.error);
        let result = setup.result.unwrap();
        assert_eq!(result["success"], json!(true));
        let kid = result["vapidKid"].as_str().unwrap().to_string();

        let signed = orch
            .handle(
                RpcEnvelopeRequest {
                    id: "r2".into(),
                    method: "signJWT".into(),
                    params: json!({
                        "kid": kid,
                        "payload": {"aud": "https://fcm.googleapis.com", "sub": "mailto:a@example.com", "exp": 1000 + 600},
                        "credentials": {"method": "passphrase", "userId": "u1", "passphrase": "correct horse battery staple"},
                    }),
                },
                1500,
            )
            .await;
        assert!(signed.error.is_none(), "{:?}", signed.error);
        let jwt = signed.result.unwrap()["jwt"].as_str().unwrap().to_string();
        assert_eq!(jwt.split('.').count(), 3);

        let chain = orch
            .handle(
                RpcEnvelopeRequest {
                    id: "r3".into(),
                    method: "verifyAuditChain".into(),
                    params: json!({}),
                },
                2000,
            )
            .await;
        assert_eq!(chain.result.unwrap()["valid"], json!(true));
    }

    #[tokio::test]
    async fn duplicate_enrollment_method_is_rejected() {
        let orch = orchestrator();
        orch.handle(
            RpcEnvelopeRequest {
                id: "r1".into(),
                method: "setupPassphrase".into(),
                params: json!({"userId": "u1", "passphrase": "p1"}),
            },
            1000,
        )
        .await;

        let second = orch
            .handle(
                RpcEnvelopeRequest {
                    id: "r2".into(),
                    method: "setupPassphrase".into(),
                    params: json!({"userId": "u1", "passphrase": "p2"}),
                },
                2000,
            )
            .await;
        assert_eq!(second.error.as_deref(), Some("enrollment already exists for this method"));
    }

    #[tokio::test]
    async fn wrong_passphrase_on_generate_vapid_fails_unlock() {
        let orch = orchestrator();
        orch.handle(
            RpcEnvelopeRequest {
                id: "r1".into(),
                method: "setupPassphrase".into(),
                params: json!({"userId": "u1", "passphrase": "right"}),
            },
            1000,
        )
        .await;

        let resp = orch
            .handle(
                RpcEnvelopeRequest {
                    id: "r2".into(),
                    method: "regenerateVAPID".into(),
                    params: json!({"credentials": {"method": "passphrase", "userId": "u1", "passphrase": "wrong"}}),
                },
                2000,
            )
            .await;
        assert_eq!(resp.error.as_deref(), Some("Invalid passphrase"));
    }

    #[tokio::test]
    async fn reset_kms_drops_everything() {
        let orch = orchestrator();
        orch.handle(
            RpcEnvelopeRequest {
                id: "r1".into(),
                method: "setupPassphrase".into(),
                params: json!({"userId": "u1", "passphrase": "p1"}),
            },
            1000,
        )
        .await;

        let reset = orch
            .handle(
                RpcEnvelopeRequest {
                    id: "r2".into(),
                    method: "resetKMS".into(),
                    params: json!({}),
                },
                2000,
            )
            .await;
        assert_eq!(reset.result.unwrap()["success"], json!(true));

        let is_setup = orch
            .handle(
                RpcEnvelopeRequest {
                    id: "r3".into(),
                    method: "isSetup".into(),
                    params: json!({"userId": "u1"}),
                },
                3000,
            )
            .await;
        assert_eq!(is_setup.result.unwrap()["isSetup"], json!(false));
    }
}
