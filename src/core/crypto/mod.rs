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

//! Cryptographic primitives and encodings. Nothing in this module touches
//! storage, enrollment state, or the audit chain; it is the lowest layer
//! everything else is built from.

pub mod canonical_json;
pub mod primitives;
pub mod sigformat;
pub mod thumbprint;

pub use primitives::CryptoError;
pub use sigformat::SigFormatError;
