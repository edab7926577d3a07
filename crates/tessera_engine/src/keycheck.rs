//! Encryption key verification for engine files.
//!
//! The reference engine keeps data in process memory, so keys are not used
//! to encrypt anything. It still has to refuse a file opened with the wrong
//! key. A file created with a key stores a verifier derived from it with
//! HKDF-SHA256; the key itself is never kept.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

/// Size of an encryption key in bytes.
pub const KEY_SIZE: usize = 64;

const VERIFIER_SALT: &[u8] = b"tessera-key-verifier";
const VERIFIER_INFO: &[u8] = b"tessera-engine-v1";

/// Verifier derived from an encryption key.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyCheck {
    digest: [u8; 32],
}

impl KeyCheck {
    /// Derives the verifier for `key`.
    #[must_use]
    pub fn derive(key: &[u8; KEY_SIZE]) -> Self {
        let hk = Hkdf::<Sha256>::new(Some(VERIFIER_SALT), key);
        let mut digest = [0u8; 32];
        // 32 bytes is far below the HKDF-SHA256 output limit.
        if hk.expand(VERIFIER_INFO, &mut digest).is_err() {
            digest.zeroize();
        }
        Self { digest }
    }

    /// Returns true if `key` produces this verifier.
    #[must_use]
    pub fn matches(&self, key: &[u8; KEY_SIZE]) -> bool {
        Self::derive(key) == *self
    }
}

impl std::fmt::Debug for KeyCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyCheck")
            .field("digest", &"[REDACTED]")
            .finish()
    }
}
