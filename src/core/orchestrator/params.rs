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

//! Typed decoders from an untyped `params: Value` into one validated
//! parameter struct per method, per spec.md §4.7: a decoder either
//! returns a fully validated object or a [`RpcValidationError`] naming
//! the method, the offending parameter, and what was expected.

use serde_json::Value;
use thiserror::Error;

use crate::core::crypto::primitives;
use crate::core::keyservice::JwtPayloadInput;
use crate::core::security::enrollment::{Credentials, SetupInputs};
use crate::core::security::secret::SecretBytes;
use crate::core::types::{EnrollmentMethod, LeaseSubscription};

/// A request's parameters were missing or the wrong type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RpcValidationError {
    /// A required parameter was absent.
    #[error("{method}: missing parameter `{param}`")]
    Missing {
        /// The method being validated.
        method: String,
        /// The missing parameter's name.
        param: String,
    },
    /// A parameter was present but not the expected JSON type/shape.
    #[error("{method}: parameter `{param}` expected {expected}, got {got}")]
    WrongType {
        /// The method being validated.
        method: String,
        /// The malformed parameter's name.
        param: String,
        /// A short description of the expected shape.
        expected: String,
        /// A short description of what was actually supplied.
        got: String,
    },
    /// `method` named something this orchestrator does not dispatch.
    #[error("Unknown RPC method")]
    UnknownMethod,
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn missing(method: &str, param: &str) -> RpcValidationError {
    RpcValidationError::Missing {
        method: method.to_string(),
        param: param.to_string(),
    }
}

fn wrong_type(method: &str, param: &str, expected: &str, got: &Value) -> RpcValidationError {
    RpcValidationError::WrongType {
        method: method.to_string(),
        param: param.to_string(),
        expected: expected.to_string(),
        got: type_name(got).to_string(),
    }
}

fn field<'a>(params: &'a Value, method: &str, name: &str) -> Result<&'a Value, RpcValidationError> {
    params
        .get(name)
        .filter(|v| !v.is_null())
        .ok_or_else(|| missing(method, name))
}

fn opt_field<'a>(params: &'a Value, name: &str) -> Option<&'a Value> {
    params.get(name).filter(|v| !v.is_null())
}

fn get_str(params: &Value, method: &str, name: &str) -> Result<String, RpcValidationError> {
    let v = field(params, method, name)?;
    v.as_str()
        .map(str::to_string)
        .ok_or_else(|| wrong_type(method, name, "a string", v))
}

fn get_opt_str(params: &Value, method: &str, name: &str) -> Result<Option<String>, RpcValidationError> {
    match opt_field(params, name) {
        None => Ok(None),
        Some(v) => v
            .as_str()
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| wrong_type(method, name, "a string", v)),
    }
}

fn get_u64(params: &Value, method: &str, name: &str) -> Result<u64, RpcValidationError> {
    let v = field(params, method, name)?;
    v.as_u64().ok_or_else(|| wrong_type(method, name, "a non-negative integer", v))
}

fn get_opt_u64(params: &Value, method: &str, name: &str) -> Result<Option<u64>, RpcValidationError> {
    match opt_field(params, name) {
        None => Ok(None),
        Some(v) => v
            .as_u64()
            .map(Some)
            .ok_or_else(|| wrong_type(method, name, "a non-negative integer", v)),
    }
}

fn get_u32(params: &Value, method: &str, name: &str) -> Result<u32, RpcValidationError> {
    let n = get_u64(params, method, name)?;
    u32::try_from(n).map_err(|_| wrong_type(method, name, "a 32-bit integer", &Value::from(n)))
}

fn get_bool_or(params: &Value, name: &str, default: bool) -> bool {
    opt_field(params, name).and_then(Value::as_bool).unwrap_or(default)
}

fn get_bytes_b64(params: &Value, method: &str, name: &str) -> Result<Vec<u8>, RpcValidationError> {
    let s = get_str(params, method, name)?;
    primitives::base64url_decode(&s)
        .map_err(|_| wrong_type(method, name, "a base64url-encoded byte string", &Value::String(s)))
}

fn get_opt_bytes_b64(params: &Value, method: &str, name: &str) -> Result<Option<Vec<u8>>, RpcValidationError> {
    match get_opt_str(params, method, name)? {
        None => Ok(None),
        Some(s) => primitives::base64url_decode(&s)
            .map(Some)
            .map_err(|_| wrong_type(method, name, "a base64url-encoded byte string", &Value::String(s))),
    }
}

fn get_prf_output(params: &Value, method: &str, name: &str) -> Result<[u8; 32], RpcValidationError> {
    let bytes = get_bytes_b64(params, method, name)?;
    if bytes.len() != 32 {
        return Err(wrong_type(method, name, "32 bytes of base64url-encoded PRF output", &Value::Null));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

fn get_opt_secret_b64(params: &Value, method: &str, name: &str) -> Result<Option<SecretBytes>, RpcValidationError> {
    Ok(get_opt_bytes_b64(params, method, name)?.map(SecretBytes::new))
}

fn enrollment_method_from_str(method: &str, name: &str, s: &str) -> Result<EnrollmentMethod, RpcValidationError> {
    match s {
        "passphrase" => Ok(EnrollmentMethod::Passphrase),
        "passkey-prf" => Ok(EnrollmentMethod::PasskeyPrf),
        "passkey-gate" => Ok(EnrollmentMethod::PasskeyGate),
        _ => Err(wrong_type(
            method,
            name,
            "one of \"passphrase\", \"passkey-prf\", \"passkey-gate\"",
            &Value::String(s.to_string()),
        )),
    }
}

/// Parse a `credentials` object, keyed on its own `method` field.
pub fn parse_credentials(method: &str, params: &Value) -> Result<Credentials, RpcValidationError> {
    let creds = field(params, method, "credentials")?;
    let cred_method_str = get_str(creds, method, "credentials.method")?;
    let user_id = get_str(creds, method, "credentials.userId")?;
    match enrollment_method_from_str(method, "credentials.method", &cred_method_str)? {
        EnrollmentMethod::Passphrase => Ok(Credentials::Passphrase {
            user_id,
            passphrase: get_str(creds, method, "credentials.passphrase")?,
        }),
        EnrollmentMethod::PasskeyPrf => Ok(Credentials::PasskeyPrf {
            user_id,
            credential_id: get_bytes_b64(creds, method, "credentials.credentialId")?,
            prf_output: get_prf_output(creds, method, "credentials.prfOutput")?,
        }),
        EnrollmentMethod::PasskeyGate => Ok(Credentials::PasskeyGate {
            user_id,
            credential_id: get_bytes_b64(creds, method, "credentials.credentialId")?,
        }),
    }
}

fn parse_opt_credentials(method: &str, params: &Value) -> Result<Option<Credentials>, RpcValidationError> {
    match opt_field(params, "credentials") {
        None => Ok(None),
        Some(_) => Ok(Some(parse_credentials(method, params)?)),
    }
}

/// Build [`SetupInputs`] for a `setupPassphrase`/`setupPasskeyPRF`/
/// `setupPasskeyGate` top-level call.
pub fn parse_top_level_setup_inputs(
    method: &str,
    target: EnrollmentMethod,
    params: &Value,
) -> Result<SetupInputs, RpcValidationError> {
    let user_id = get_str(params, method, "userId")?;
    let existing_ms = get_opt_secret_b64(params, method, "existingMS")?;
    match target {
        EnrollmentMethod::Passphrase => Ok(SetupInputs::Passphrase {
            user_id,
            passphrase: get_str(params, method, "passphrase")?,
            existing_ms,
        }),
        EnrollmentMethod::PasskeyPrf => Ok(SetupInputs::PasskeyPrf {
            user_id,
            credential_id: get_bytes_b64(params, method, "credentialId")?,
            prf_output: get_prf_output(params, method, "prfOutput")?,
            rp_id: get_opt_str(params, method, "rpId")?,
            existing_ms,
        }),
        EnrollmentMethod::PasskeyGate => Ok(SetupInputs::PasskeyGate {
            user_id,
            credential_id: get_bytes_b64(params, method, "credentialId")?,
            rp_id: get_opt_str(params, method, "rpId")?,
            existing_ms,
        }),
    }
}

/// Build [`SetupInputs`] for `addEnrollment`'s `newCredentials` object,
/// given the already-parsed target `method` and `userId`. `existing_ms`
/// is filled in by the caller once MS has been recovered via
/// `withUnlock`.
pub fn parse_new_credentials(
    target: EnrollmentMethod,
    user_id: String,
    new_creds: &Value,
) -> Result<SetupInputs, RpcValidationError> {
    const M: &str = "addEnrollment";
    match target {
        EnrollmentMethod::Passphrase => Ok(SetupInputs::Passphrase {
            user_id,
            passphrase: get_str(new_creds, M, "newCredentials.passphrase")?,
            existing_ms: None,
        }),
        EnrollmentMethod::PasskeyPrf => Ok(SetupInputs::PasskeyPrf {
            user_id,
            credential_id: get_bytes_b64(new_creds, M, "newCredentials.credentialId")?,
            prf_output: get_prf_output(new_creds, M, "newCredentials.prfOutput")?,
            rp_id: get_opt_str(new_creds, M, "newCredentials.rpId")?,
            existing_ms: None,
        }),
        EnrollmentMethod::PasskeyGate => Ok(SetupInputs::PasskeyGate {
            user_id,
            credential_id: get_bytes_b64(new_creds, M, "newCredentials.credentialId")?,
            rp_id: get_opt_str(new_creds, M, "newCredentials.rpId")?,
            existing_ms: None,
        }),
    }
}

/// Replace a [`SetupInputs`]' `existing_ms` field, regardless of variant.
pub fn with_existing_ms(inputs: SetupInputs, ms: SecretBytes) -> SetupInputs {
    match inputs {
        SetupInputs::Passphrase { user_id, passphrase, .. } => SetupInputs::Passphrase {
            user_id,
            passphrase,
            existing_ms: Some(ms),
        },
        SetupInputs::PasskeyPrf {
            user_id,
            credential_id,
            prf_output,
            rp_id,
            ..
        } => SetupInputs::PasskeyPrf {
            user_id,
            credential_id,
            prf_output,
            rp_id,
            existing_ms: Some(ms),
        },
        SetupInputs::PasskeyGate {
            user_id,
            credential_id,
            rp_id,
            ..
        } => SetupInputs::PasskeyGate {
            user_id,
            credential_id,
            rp_id,
            existing_ms: Some(ms),
        },
    }
}

/// Parameters for `setupPassphrase`/`setupPasskeyPRF`/`setupPasskeyGate`.
pub struct SetupParams {
    /// The decoded setup inputs.
    pub inputs: SetupInputs,
}

/// Parameters for `addEnrollment`.
pub struct AddEnrollmentParams {
    /// The user this enrollment is added for.
    pub user_id: String,
    /// The method being added.
    pub target_method: EnrollmentMethod,
    /// Credentials for an existing enrollment, used to recover MS.
    pub credentials: Credentials,
    /// Raw `newCredentials` object, decoded once MS is in hand.
    pub new_credentials: Value,
}

/// Parameters for `removeEnrollment`.
pub struct RemoveEnrollmentParams {
    /// The enrollment id to remove.
    pub enrollment_id: String,
    /// Credentials authorizing the removal.
    pub credentials: Credentials,
}

/// Parameters for `generateVAPID`/`regenerateVAPID`.
pub struct CredentialsOnlyParams {
    /// The credentials unlocking MS for this call.
    pub credentials: Credentials,
}

/// Parameters for `signJWT`.
pub struct SignJwtParams {
    /// The VAPID key to sign under.
    pub kid: String,
    /// The claim set to embed.
    pub payload: JwtPayloadInput,
    /// Credentials unlocking MS for this call.
    pub credentials: Credentials,
}

/// Parameters for `createLease`.
pub struct CreateLeaseParams {
    /// The user this lease belongs to.
    pub user_id: String,
    /// Endpoints the lease may sign for.
    pub subs: Vec<LeaseSubscription>,
    /// Requested TTL in hours.
    pub ttl_hours: u32,
    /// Credentials unlocking MS for this call.
    pub credentials: Credentials,
    /// Whether `extendLeases` may renew this lease without fresh auth.
    pub auto_extend: bool,
}

/// Parameters for `verifyLease`.
pub struct VerifyLeaseParams {
    /// The lease id to check.
    pub lease_id: String,
}

/// Parameters for `issueVAPIDJWT`.
pub struct IssueVapidJwtParams {
    /// The lease to issue under.
    pub lease_id: String,
    /// Caller's expectation of the lease's bound `kid`, if any.
    pub kid: Option<String>,
    /// Which of the lease's subscriptions to sign for (`eid`).
    pub endpoint: Option<String>,
    /// Credentials unlocking MS for this call.
    pub credentials: Credentials,
}

/// Parameters for `issueVAPIDJWTs`.
pub struct IssueVapidJwtsParams {
    /// The lease to issue under.
    pub lease_id: String,
    /// How many JWTs to issue, `1..=10`.
    pub count: u32,
    /// Caller's expectation of the lease's bound `kid`, if any.
    pub kid: Option<String>,
    /// Which of the lease's subscriptions to sign for (`eid`).
    pub endpoint: Option<String>,
    /// Credentials unlocking MS for this call.
    pub credentials: Credentials,
}

/// Parameters for `extendLeases`.
pub struct ExtendLeasesParams {
    /// The lease ids to attempt to extend.
    pub lease_ids: Vec<String>,
    /// The user these leases belong to.
    pub user_id: String,
    /// Whether the caller is asserting fresh authentication out-of-band.
    pub request_auth: bool,
    /// Credentials to validate via `withUnlock` when required.
    pub credentials: Option<Credentials>,
}

/// Parameters for `getPublicKey`.
pub struct GetPublicKeyParams {
    /// The `kid` to look up.
    pub kid: String,
}

/// Parameters for `isSetup`/`getEnrollments`/`resetKMS`, all of which
/// take an optional `userId` scoping filter.
pub struct UserScopedParams {
    /// The user to scope to, if supplied.
    pub user_id: Option<String>,
}

fn parse_subs(method: &str, params: &Value) -> Result<Vec<LeaseSubscription>, RpcValidationError> {
    let v = field(params, method, "subs")?;
    let arr = v.as_array().ok_or_else(|| wrong_type(method, "subs", "an array", v))?;
    arr.iter()
        .map(|item| {
            serde_json::from_value::<LeaseSubscription>(item.clone())
                .map_err(|_| wrong_type(method, "subs[]", "{url, aud, eid}", item))
        })
        .collect()
}

fn parse_jwt_payload(method: &str, params: &Value) -> Result<JwtPayloadInput, RpcValidationError> {
    let payload = field(params, method, "payload")?;
    Ok(JwtPayloadInput {
        aud: get_str(payload, method, "payload.aud")?,
        sub: get_str(payload, method, "payload.sub")?,
        exp: get_u64(payload, method, "payload.exp")?,
        jti: get_opt_str(payload, method, "payload.jti")?,
    })
}

/// Parse `setupPassphrase` parameters.
pub fn parse_setup_passphrase(params: &Value) -> Result<SetupParams, RpcValidationError> {
    Ok(SetupParams {
        inputs: parse_top_level_setup_inputs("setupPassphrase", EnrollmentMethod::Passphrase, params)?,
    })
}

/// Parse `setupPasskeyPRF` parameters.
pub fn parse_setup_passkey_prf(params: &Value) -> Result<SetupParams, RpcValidationError> {
    Ok(SetupParams {
        inputs: parse_top_level_setup_inputs("setupPasskeyPRF", EnrollmentMethod::PasskeyPrf, params)?,
    })
}

/// Parse `setupPasskeyGate` parameters.
pub fn parse_setup_passkey_gate(params: &Value) -> Result<SetupParams, RpcValidationError> {
    Ok(SetupParams {
        inputs: parse_top_level_setup_inputs("setupPasskeyGate", EnrollmentMethod::PasskeyGate, params)?,
    })
}

/// Parse `addEnrollment` parameters.
pub fn parse_add_enrollment(params: &Value) -> Result<AddEnrollmentParams, RpcValidationError> {
    const M: &str = "addEnrollment";
    let user_id = get_str(params, M, "userId")?;
    let method_str = get_str(params, M, "method")?;
    let target_method = enrollment_method_from_str(M, "method", &method_str)?;
    let credentials = parse_credentials(M, params)?;
    let new_credentials = field(params, M, "newCredentials")?.clone();
    Ok(AddEnrollmentParams {
        user_id,
        target_method,
        credentials,
        new_credentials,
    })
}

/// Parse `removeEnrollment` parameters.
pub fn parse_remove_enrollment(params: &Value) -> Result<RemoveEnrollmentParams, RpcValidationError> {
    const M: &str = "removeEnrollment";
    Ok(RemoveEnrollmentParams {
        enrollment_id: get_str(params, M, "enrollmentId")?,
        credentials: parse_credentials(M, params)?,
    })
}

/// Parse `generateVAPID`/`regenerateVAPID` parameters.
pub fn parse_credentials_only(method: &str, params: &Value) -> Result<CredentialsOnlyParams, RpcValidationError> {
    Ok(CredentialsOnlyParams {
        credentials: parse_credentials(method, params)?,
    })
}

/// Parse `signJWT` parameters.
pub fn parse_sign_jwt(params: &Value) -> Result<SignJwtParams, RpcValidationError> {
    const M: &str = "signJWT";
    Ok(SignJwtParams {
        kid: get_str(params, M, "kid")?,
        payload: parse_jwt_payload(M, params)?,
        credentials: parse_credentials(M, params)?,
    })
}

/// Parse `createLease` parameters.
pub fn parse_create_lease(params: &Value) -> Result<CreateLeaseParams, RpcValidationError> {
    const M: &str = "createLease";
    Ok(CreateLeaseParams {
        user_id: get_str(params, M, "userId")?,
        subs: parse_subs(M, params)?,
        ttl_hours: get_u32(params, M, "ttlHours")?,
        credentials: parse_credentials(M, params)?,
        auto_extend: get_bool_or(params, "autoExtend", true),
    })
}

/// Parse `verifyLease` parameters.
pub fn parse_verify_lease(params: &Value) -> Result<VerifyLeaseParams, RpcValidationError> {
    const M: &str = "verifyLease";
    Ok(VerifyLeaseParams {
        lease_id: get_str(params, M, "leaseId")?,
    })
}

/// Parse `issueVAPIDJWT` parameters.
pub fn parse_issue_vapid_jwt(params: &Value) -> Result<IssueVapidJwtParams, RpcValidationError> {
    const M: &str = "issueVAPIDJWT";
    Ok(IssueVapidJwtParams {
        lease_id: get_str(params, M, "leaseId")?,
        kid: get_opt_str(params, M, "kid")?,
        endpoint: get_opt_str(params, M, "endpoint")?,
        credentials: parse_credentials(M, params)?,
    })
}

/// Parse `issueVAPIDJWTs` parameters.
pub fn parse_issue_vapid_jwts(params: &Value) -> Result<IssueVapidJwtsParams, RpcValidationError> {
    const M: &str = "issueVAPIDJWTs";
    Ok(IssueVapidJwtsParams {
        lease_id: get_str(params, M, "leaseId")?,
        count: get_u32(params, M, "count")?,
        kid: get_opt_str(params, M, "kid")?,
        endpoint: get_opt_str(params, M, "endpoint")?,
        credentials: parse_credentials(M, params)?,
    })
}

/// Parse `extendLeases` parameters.
pub fn parse_extend_leases(params: &Value) -> Result<ExtendLeasesParams, RpcValidationError> {
    const M: &str = "extendLeases";
    let v = field(params, M, "leaseIds")?;
    let arr = v.as_array().ok_or_else(|| wrong_type(M, "leaseIds", "an array of strings", v))?;
    let lease_ids = arr
        .iter()
        .map(|item| item.as_str().map(str::to_string).ok_or_else(|| wrong_type(M, "leaseIds[]", "a string", item)))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ExtendLeasesParams {
        lease_ids,
        user_id: get_str(params, M, "userId")?,
        request_auth: get_bool_or(params, "requestAuth", false),
        credentials: parse_opt_credentials(M, params)?,
    })
}

/// Parse `getPublicKey` parameters.
pub fn parse_get_public_key(params: &Value) -> Result<GetPublicKeyParams, RpcValidationError> {
    const M: &str = "getPublicKey";
    Ok(GetPublicKeyParams {
        kid: get_str(params, M, "kid")?,
    })
}

/// Parse the optional `{userId?}` shape shared by `isSetup`,
/// `getEnrollments`, and `resetKMS`.
pub fn parse_user_scoped(method: &str, params: &Value) -> Result<UserScopedParams, RpcValidationError> {
    Ok(UserScopedParams {
        user_id: get_opt_str(params, method, "userId")?,
    })
}

/// Also accept a bare `{}`/missing-params object for the no-parameter
/// methods (`getAuditPublicKey`, `verifyAuditChain`, `getAuditLog`).
pub fn require_object(method: &str, params: &Value) -> Result<(), RpcValidationError> {
    if params.is_null() || params.is_object() {
        Ok(())
    } else {
        Err(wrong_type(method, "params", "an object", params))
    }
}
