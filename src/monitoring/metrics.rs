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

use prometheus::{IntCounter, Registry};
use thiserror::Error;

/// Metrics errors.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// A counter or gauge could not be created or registered.
    #[error("prometheus")]
    Prom,
}

/// Process-wide Prometheus counters for the KMS core. One instance is
/// constructed at startup and cloned (it's a bundle of `Arc`-backed
/// handles) into every handler that needs to record an observation.
#[derive(Clone)]
pub struct Metrics {
    /// Registry all counters below are registered against.
    pub registry: Registry,

    /// Successful `withUnlock` entries.
    pub kms_unlocks_total: IntCounter,
    /// Failed unlock attempts (wrong passphrase, unknown user, reentrancy).
    pub kms_unlock_failures_total: IntCounter,
    /// VAPID keys generated, including rotations.
    pub kms_vapid_keys_generated_total: IntCounter,
    /// VAPID JWTs signed.
    pub kms_jwt_signed_total: IntCounter,
    /// Leases created.
    pub kms_leases_created_total: IntCounter,
    /// Leases extended via `extendLeases`.
    pub kms_leases_extended_total: IntCounter,
    /// JWT issuance requests rejected for quota exhaustion.
    pub kms_quota_rejections_total: IntCounter,
    /// Audit entries appended.
    pub kms_audit_entries_total: IntCounter,
    /// Chain-verification runs that found at least one error.
    pub kms_audit_verify_errors_total: IntCounter,
}

impl Metrics {
    /// Create and register every counter against a fresh registry.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let kms_unlocks_total = IntCounter::new("kms_unlocks_total", "Successful unlock contexts entered")
            .map_err(|_| MetricsError::Prom)?;
        let kms_unlock_failures_total =
            IntCounter::new("kms_unlock_failures_total", "Failed unlock attempts")
                .map_err(|_| MetricsError::Prom)?;
        let kms_vapid_keys_generated_total = IntCounter::new(
            "kms_vapid_keys_generated_total",
            "VAPID keypairs generated, including rotations",
        )
        .map_err(|_| MetricsError::Prom)?;
        let kms_jwt_signed_total = IntCounter::new("kms_jwt_signed_total", "VAPID JWTs signed")
            .map_err(|_| MetricsError::Prom)?;
        let kms_leases_created_total =
            IntCounter::new("kms_leases_created_total", "Leases created").map_err(|_| MetricsError::Prom)?;
        let kms_leases_extended_total =
            IntCounter::new("kms_leases_extended_total", "Leases extended via extendLeases")
                .map_err(|_| MetricsError::Prom)?;
        let kms_quota_rejections_total = IntCounter::new(
            "kms_quota_rejections_total",
            "JWT issuance requests rejected for quota exhaustion",
        )
        .map_err(|_| MetricsError::Prom)?;
        let kms_audit_entries_total =
            IntCounter::new("kms_audit_entries_total", "Audit entries appended")
                .map_err(|_| MetricsError::Prom)?;
        let kms_audit_verify_errors_total = IntCounter::new(
            "kms_audit_verify_errors_total",
            "Chain verification runs that found at least one error",
        )
        .map_err(|_| MetricsError::Prom)?;

        registry.register(Box::new(kms_unlocks_total.clone())).map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(kms_unlock_failures_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(kms_vapid_keys_generated_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry.register(Box::new(kms_jwt_signed_total.clone())).map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(kms_leases_created_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(kms_leases_extended_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(kms_quota_rejections_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(kms_audit_entries_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(kms_audit_verify_errors_total.clone()))
            .map_err(|_| MetricsError::Prom)?;

        Ok(Self {
            registry,
            kms_unlocks_total,
            kms_unlock_failures_total,
            kms_vapid_keys_generated_total,
            kms_jwt_signed_total,
            kms_leases_created_total,
            kms_leases_extended_total,
            kms_quota_rejections_total,
            kms_audit_entries_total,
            kms_audit_verify_errors_total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_counter_registers_without_collision() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.registry.gather().len(), 9);
    }

    #[test]
    fn counters_start_at_zero_and_increment() {
        let metrics = Metrics::new().unwrap();
        metrics.kms_unlocks_total.inc();
        metrics.kms_jwt_signed_total.inc_by(3);
        assert_eq!(metrics.kms_unlocks_total.get(), 1);
        assert_eq!(metrics.kms_jwt_signed_total.get(), 3);
    }
}
