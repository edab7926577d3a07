//! Encryption key handling.
//!
//! Keys are 64-byte secrets handed to the engine, which encrypts the file.
//! This layer only validates them. [`EncryptionGuard`] is consulted whenever
//! a key enters the runtime: at registration, at open and for `write_copy`.
//!
//! ## Rules
//!
//! - A key must be exactly [`KEY_SIZE`] bytes
//! - No key is accepted while a debugger is attached to the process
//! - `wasm32` targets cannot use encryption at rest
//! - Setting `TESSERA_DISABLE_ENCRYPTION` turns every key into "no key"

use crate::error::{CoreError, CoreResult};
use rand::RngCore;
use std::sync::OnceLock;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub use tessera_engine::KEY_SIZE;

/// Environment variable that disables encryption for the whole process.
pub const DISABLE_ENCRYPTION_ENV: &str = "TESSERA_DISABLE_ENCRYPTION";

/// A validated encryption key.
///
/// The key is automatically zeroized when dropped.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    bytes: [u8; KEY_SIZE],
}

impl EncryptionKey {
    /// Generates a new random encryption key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Creates a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKeyLength` if `bytes` is not exactly 64 bytes.
    pub fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(CoreError::invalid_key_length(bytes.len(), KEY_SIZE));
        }

        let mut key_bytes = [0u8; KEY_SIZE];
        key_bytes.copy_from_slice(bytes);
        Ok(Self { bytes: key_bytes })
    }

    /// Returns the key bytes.
    ///
    /// # Security
    ///
    /// Don't log or serialize the result.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Validates encryption keys before they reach the engine.
#[derive(Debug, Clone, Copy)]
pub struct EncryptionGuard {
    disabled: bool,
    debugger_probe: fn() -> bool,
}

impl EncryptionGuard {
    /// Creates a guard with an explicit disable flag and debugger probe.
    #[must_use]
    pub const fn new(disabled: bool, debugger_probe: fn() -> bool) -> Self {
        Self {
            disabled,
            debugger_probe,
        }
    }

    /// Creates a guard from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(encryption_disabled_by_env(), debugger_attached)
    }

    /// Whether encryption is force-disabled.
    #[must_use]
    pub const fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Validates `key` and returns the key to hand to the engine.
    ///
    /// `None` stays `None`. When encryption is disabled every key becomes
    /// `None` without further checks.
    ///
    /// # Errors
    ///
    /// `InvalidKeyLength`, `UnsupportedPlatform` or `DebuggerAttached`.
    pub fn validate(&self, key: Option<&[u8]>) -> CoreResult<Option<EncryptionKey>> {
        let Some(bytes) = key else {
            return Ok(None);
        };
        if self.disabled {
            return Ok(None);
        }

        let key = EncryptionKey::from_bytes(bytes)?;
        if cfg!(target_arch = "wasm32") {
            return Err(CoreError::UnsupportedPlatform);
        }
        if (self.debugger_probe)() {
            return Err(CoreError::DebuggerAttached);
        }
        Ok(Some(key))
    }
}

impl Default for EncryptionGuard {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Reads [`DISABLE_ENCRYPTION_ENV`] once per process.
///
/// Any non-empty value other than `0` disables encryption.
#[must_use]
pub fn encryption_disabled_by_env() -> bool {
    static DISABLED: OnceLock<bool> = OnceLock::new();
    *DISABLED.get_or_init(|| {
        std::env::var_os(DISABLE_ENCRYPTION_ENV).is_some_and(|v| !v.is_empty() && v != "0")
    })
}

/// Returns true when a tracer is attached to this process.
#[cfg(target_os = "linux")]
#[must_use]
pub fn debugger_attached() -> bool {
    std::fs::read_to_string("/proc/self/status")
        .ok()
        .and_then(|status| {
            status
                .lines()
                .find_map(|line| line.strip_prefix("TracerPid:"))
                .map(|pid| pid.trim() != "0")
        })
        .unwrap_or(false)
}

/// Returns true when a tracer is attached to this process.
#[cfg(not(target_os = "linux"))]
#[must_use]
pub fn debugger_attached() -> bool {
    false
}
