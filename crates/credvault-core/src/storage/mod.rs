//! Secret storage backends.
//!
//! Every backend implements [`SecretStore`]. The set of backends is closed and
//! carried by the [`Backend`] enum; [`crate::vault::SecretVault`] picks one
//! per process.
//!
//! - `EncryptedFileBackend`: AEAD blob per key on disk, always available
//! - `ProtectedBlobBackend`: blob per key protected by the OS per-user primitive
//! - `KeychainBackend`: macOS `security` CLI
//! - `SecretServiceBackend`: freedesktop Secret Service via `secret-tool`

pub mod command;
pub mod file;
pub mod fs;
pub mod keychain;
pub mod protected;
pub mod secret_service;

use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use tracing::warn;
use zeroize::Zeroizing;

use crate::error::VaultError;
use crate::keys::SESSION_KEYS;

pub use command::{CommandOutput, CommandRunner, CommandSpec, SystemCommandRunner};
pub use file::EncryptedFileBackend;
pub use keychain::KeychainBackend;
pub use protected::{BlobProtector, ProtectedBlobBackend};
pub use secret_service::SecretServiceBackend;

/// Plaintext secret bytes, wiped on drop.
pub type SecretBytes = Zeroizing<Vec<u8>>;

/// Capability contract shared by every backend.
pub trait SecretStore: fmt::Debug + Send + Sync {
    /// Create or replace the value stored under `key`.
    fn put(&self, key: &str, value: &[u8]) -> Result<(), VaultError>;

    /// `Ok(None)` when absent or when the stored value is unreadable.
    fn get(&self, key: &str) -> Result<Option<SecretBytes>, VaultError>;

    /// Removing an absent key succeeds.
    fn delete(&self, key: &str) -> Result<(), VaultError>;

    /// Keys currently held. CLI-backed stores can only report keys from
    /// [`crate::keys::SESSION_KEYS`].
    fn list_known_keys(&self) -> Result<Vec<String>, VaultError>;

    /// Remove everything `list_known_keys` can reach. Idempotent.
    fn clear(&self) -> Result<(), VaultError>;
}

/// Observable tag for the backend a vault ended up with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackendKind {
    WindowsDpapi,
    MacosKeychain,
    LinuxSecretService,
    File,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::WindowsDpapi => "WINDOWS_DPAPI",
            BackendKind::MacosKeychain => "MACOS_KEYCHAIN",
            BackendKind::LinuxSecretService => "LINUX_SECRET_SERVICE",
            BackendKind::File => "FILE",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The closed set of backends a vault can own.
#[derive(Debug)]
pub enum Backend {
    EncryptedFile(EncryptedFileBackend),
    ProtectedBlob(ProtectedBlobBackend),
    Keychain(KeychainBackend),
    SecretService(SecretServiceBackend),
}

impl Backend {
    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::EncryptedFile(_) => BackendKind::File,
            Backend::ProtectedBlob(_) => BackendKind::WindowsDpapi,
            Backend::Keychain(_) => BackendKind::MacosKeychain,
            Backend::SecretService(_) => BackendKind::LinuxSecretService,
        }
    }

    fn store(&self) -> &dyn SecretStore {
        match self {
            Backend::EncryptedFile(b) => b,
            Backend::ProtectedBlob(b) => b,
            Backend::Keychain(b) => b,
            Backend::SecretService(b) => b,
        }
    }
}

impl SecretStore for Backend {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), VaultError> {
        self.store().put(key, value)
    }

    fn get(&self, key: &str) -> Result<Option<SecretBytes>, VaultError> {
        self.store().get(key)
    }

    fn delete(&self, key: &str) -> Result<(), VaultError> {
        self.store().delete(key)
    }

    fn list_known_keys(&self) -> Result<Vec<String>, VaultError> {
        self.store().list_known_keys()
    }

    fn clear(&self) -> Result<(), VaultError> {
        self.store().clear()
    }
}

// ============================================================================
// Helpers for the CLI-backed stores
// ============================================================================

/// Values travel through argv/stdin/stdout as base64 so any byte survives.
pub(crate) fn encode_cli_value(value: &[u8]) -> Zeroizing<String> {
    Zeroizing::new(STANDARD.encode(value))
}

/// Empty output reads as absent; undecodable output is a corrupted secret.
pub(crate) fn decode_cli_value(key: &str, raw: &str) -> Option<SecretBytes> {
    if raw.is_empty() {
        return None;
    }
    match STANDARD.decode(raw.as_bytes()) {
        Ok(bytes) if !bytes.is_empty() => Some(Zeroizing::new(bytes)),
        Ok(_) => None,
        Err(e) => {
            let e = VaultError::CorruptedSecret {
                key: key.to_string(),
                reason: e.to_string(),
            };
            warn!(error = %e, "Ignoring stored secret");
            None
        }
    }
}

/// Registry keys that currently resolve to a value.
pub(crate) fn present_registry_keys(store: &dyn SecretStore) -> Result<Vec<String>, VaultError> {
    let mut present = Vec::new();
    for key in SESSION_KEYS {
        if store.get(key)?.is_some() {
            present.push(key.to_string());
        }
    }
    Ok(present)
}

/// Delete every registry key. Keys outside the registry are not reachable.
pub(crate) fn clear_registry_keys(store: &dyn SecretStore) -> Result<(), VaultError> {
    for key in SESSION_KEYS {
        store.delete(key)?;
    }
    Ok(())
}
