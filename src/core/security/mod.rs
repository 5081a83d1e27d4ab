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

//! Enrollment, unlock, and secret-handling: the only place MS and MKEK
//! are ever held in plaintext.

pub mod enrollment;
pub mod secret;
pub mod unlock;

pub use enrollment::Credentials;
pub use secret::SecretBytes;
pub use unlock::{UnlockError, UnlockGuard, UnlockOutcome};
