//! Development-only message obfuscation.
//!
//! [`InsecureDevCipher`] XORs bytes with a repeating key and base64-encodes
//! the result. It keeps transcripts unreadable at a glance in logs and demo
//! output. It offers no confidentiality: anyone holding two ciphertexts or
//! one known plaintext recovers the key.

use crate::error::SecurityError;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use caseflow_core::Result;
use std::sync::Arc;

const DEFAULT_KEY: &[u8] = b"caseflow-dev-key";

/// Repeating-key XOR plus base64. Not encryption.
#[derive(Debug, Clone)]
pub struct InsecureDevCipher {
    key: Arc<[u8]>,
}

impl Default for InsecureDevCipher {
    fn default() -> Self {
        Self {
            key: Arc::from(DEFAULT_KEY),
        }
    }
}

impl InsecureDevCipher {
    /// Creates a cipher with the given key. An empty key falls back to the
    /// built-in development key.
    #[must_use]
    pub fn new(key: impl AsRef<[u8]>) -> Self {
        let key = key.as_ref();
        if key.is_empty() {
            return Self::default();
        }
        Self { key: Arc::from(key) }
    }

    /// Obfuscates text into base64.
    #[must_use]
    pub fn seal(&self, plaintext: &str) -> String {
        let mut bytes = plaintext.as_bytes().to_vec();
        self.xor(&mut bytes);
        STANDARD.encode(bytes)
    }

    /// Reverses [`seal`](Self::seal).
    ///
    /// # Errors
    ///
    /// Returns `InvalidCiphertext` if the input is not base64 or does not
    /// decode to UTF-8 under this key.
    pub fn open(&self, ciphertext: &str) -> Result<String, SecurityError> {
        let mut bytes = STANDARD
            .decode(ciphertext)
            .map_err(|e| SecurityError::InvalidCiphertext {
                details: e.to_string(),
            })?;
        self.xor(&mut bytes);
        let plaintext = String::from_utf8(bytes).map_err(|e| SecurityError::InvalidCiphertext {
            details: e.to_string(),
        })?;
        Ok(plaintext)
    }

    fn xor(&self, bytes: &mut [u8]) {
        for (byte, k) in bytes.iter_mut().zip(self.key.iter().cycle()) {
            *byte ^= k;
        }
    }
}
