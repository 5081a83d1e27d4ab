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

//! A browser-resident key management service for long-lived asymmetric
//! signing keys, under user-controlled authentication.
//!
//! This crate provides:
//! - A derivation hierarchy from authenticator material to a Master
//!   Secret to a non-extractable wrapping key, with guaranteed
//!   zeroization on every exit path
//! - A multi-enrollment unlock protocol (passphrase, passkey PRF,
//!   passkey gate) that lets several distinct authenticators unlock
//!   the same secret
//! - VAPID (RFC 8292) key generation, rotation, and policy-enforced
//!   JWT signing
//! - An attenuated lease and quota engine issuing rate-limited,
//!   endpoint-bound signing capabilities
//! - A hash-chained, signed audit log making the operation history
//!   tamper-evident
//! - A tagged-enum request orchestrator as the sole externally facing
//!   surface

/// The cryptographic state machine (types, crypto, security, audit,
/// key service, lease engine, persistence, orchestrator).
pub mod core;
/// Observability (metrics, structured logging helpers).
pub mod monitoring;
/// Crate-wide configuration.
pub mod config;
/// Crate-root error type composing every subsystem's errors.
pub mod error;
