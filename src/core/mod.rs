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

//! The cryptographic state machine: derivation hierarchy, multi-enrollment
//! unlock protocol, key service, lease/quota engine, audit chain, and the
//! request orchestrator tying them together. Everything outside `core` is
//! ambient stack (config, error composition, metrics, the demo binary).

/// Instance Audit Key lifecycle and the hash-chained, signed audit log.
pub mod audit;
/// AEAD, HKDF/PBKDF2, ECDSA/Ed25519, thumbprints, canonical JSON, encodings.
pub mod crypto;
/// VAPID key generation/rotation and RFC 8292-policed JWT signing.
pub mod keyservice;
/// Lease issuance, verification, quota enforcement, and maintenance.
pub mod lease;
/// The storage seam (`Store` trait) and the `sled`-backed implementation.
pub mod persistence;
/// Tagged-enum RPC dispatch: the orchestrator's sole externally facing
/// surface.
pub mod orchestrator;
/// Enrollment, unlock, and secret handling.
pub mod security;
/// The persisted data model shared across every module above.
pub mod types;
