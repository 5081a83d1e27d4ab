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

//! A secret byte buffer that is never cloned and is zeroized on every
//! exit path — normal drop, error return, or panic unwind — since it owns
//! no destructor-skipping shortcuts.

use zeroize::Zeroize;

/// An owned secret byte buffer (MS, MKEK material in transit). Never
/// implements `Clone` or `Display`/`Debug` with content; the only way out
/// is [`SecretBytes::expose`], and callers must not let the returned slice
/// outlive the guard.
pub struct SecretBytes {
    bytes: Vec<u8>,
}

impl SecretBytes {
    /// Take ownership of `bytes`; they are zeroized when this value drops.
    pub fn new(bytes: Vec<u8>) -> Self {
        SecretBytes { bytes }
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True if empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Borrow the underlying bytes. The borrow cannot outlive `self`.
    pub fn expose(&self) -> &[u8] {
        &self.bytes
    }

    /// Copy the bytes into a new `SecretBytes`. Named distinctly from
    /// `Clone` so call sites make a deliberate, visible choice to
    /// duplicate secret material rather than doing so implicitly.
    pub fn duplicate(&self) -> SecretBytes {
        SecretBytes::new(self.bytes.clone())
    }
}

impl Drop for SecretBytes {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretBytes({} bytes, redacted)", self.bytes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposes_original_bytes() {
        let s = SecretBytes::new(vec![1, 2, 3]);
        assert_eq!(s.expose(), &[1, 2, 3]);
        assert_eq!(s.len(), 3);
    }

    #[test]
    fn debug_does_not_leak_content() {
        let s = SecretBytes::new(vec![0xAA; 32]);
        let rendered = format!("{s:?}");
        assert!(!rendered.contains("170"));
        assert!(rendered.contains("32 bytes"));
    }

    #[test]
    fn duplicate_is_independent() {
        let s = SecretBytes::new(vec![9; 4]);
        let d = s.duplicate();
        assert_eq!(s.expose(), d.expose());
    }
}
