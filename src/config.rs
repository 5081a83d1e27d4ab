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

//! Crate-wide configuration, loadable from a TOML file the same way the
//! donor loads `NodeConfig`. Every field has a code default matching
//! spec.md's literal defaults; overriding any subset via TOML is
//! supported since every field implements `Default` through `serde`'s
//! `#[serde(default)]`.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::core::types::Quotas;

/// Errors loading configuration from disk.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    /// The file's contents were not valid TOML for this shape.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Tunable parameters for the KMS core. Defaults match spec.md §4.1,
/// §4.6, and §4.5 exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KmsConfig {
    /// Target wall-clock window (inclusive, milliseconds) that PBKDF2
    /// calibration aims to land the measured cost of one derivation in.
    pub pbkdf2_calibration_target_ms: (u32, u32),
    /// Hard floor/ceiling clamp applied to the calibrated iteration count.
    pub pbkdf2_iter_bounds: (u32, u32),
    /// Quota schedule assigned to newly created leases.
    pub default_quotas: Quotas,
    /// Default VAPID JWT lifetime issued by the lease engine.
    pub default_token_ttl_secs: u64,
    /// Ceiling on `createLease`'s requested `ttlHours`.
    pub max_lease_ttl_hours: u32,
    /// Ceiling on `signJWT`'s accepted `payload.exp` horizon, in hours.
    pub max_jwt_ttl_hours: u32,
    /// `sub` claim used for JWTs synthesized by `issueVAPIDJWT`/
    /// `issueVAPIDJWTs`, which carry no caller-supplied `sub` (spec.md
    /// §6). Operators override this to their own contact URI.
    pub lease_jwt_sub: String,
}

impl Default for KmsConfig {
    fn default() -> Self {
        KmsConfig {
            pbkdf2_calibration_target_ms: (150, 300),
            pbkdf2_iter_bounds: (50_000, 2_000_000),
            default_quotas: Quotas::default(),
            default_token_ttl_secs: 900,
            max_lease_ttl_hours: 720,
            max_jwt_ttl_hours: 24,
            lease_jwt_sub: "mailto:kms-operator@example.com".to_string(),
        }
    }
}

impl KmsConfig {
    /// Load configuration from a TOML file, falling back to
    /// [`KmsConfig::default`] for any field the file omits.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config = toml::from_str(&contents)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_literals() {
        let c = KmsConfig::default();
        assert_eq!(c.pbkdf2_calibration_target_ms, (150, 300));
        assert_eq!(c.pbkdf2_iter_bounds, (50_000, 2_000_000));
        assert_eq!(c.max_lease_ttl_hours, 720);
        assert_eq!(c.max_jwt_ttl_hours, 24);
        assert_eq!(c.default_token_ttl_secs, 900);
        assert_eq!(c.default_quotas, Quotas::default());
    }

    #[test]
    fn loads_partial_overrides_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kms.toml");
        std::fs::write(&path, "max_lease_ttl_hours = 48\n").unwrap();
        let c = KmsConfig::load(&path).unwrap();
        assert_eq!(c.max_lease_ttl_hours, 48);
        assert_eq!(c.max_jwt_ttl_hours, 24);
    }

    #[test]
    fn rejects_malformed_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kms.toml");
        std::fs::write(&path, "max_lease_ttl_hours = \"not a number\"\n").unwrap();
        assert!(KmsConfig::load(&path).is_err());
    }
}
