//! Backend selection and the key/value facade over the chosen backend.
//!
//! A [`SecretVault`] picks exactly one backend when it is built and forwards
//! every call to it afterwards. The process-wide instance lives in a
//! [`VaultCell`]: the first caller runs the selection, concurrent first
//! callers block until it finishes, later callers get the same `Arc`.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::VaultError;
use crate::keys::{validate_key, validate_value};
use crate::storage::command::DEFAULT_COMMAND_TIMEOUT;
use crate::storage::{
    Backend, BackendKind, BlobProtector, CommandRunner, EncryptedFileBackend, KeychainBackend,
    ProtectedBlobBackend, SecretBytes, SecretServiceBackend, SecretStore, SystemCommandRunner,
};

/// Service namespace used by the credential-manager backends
pub const DEFAULT_SERVICE_NAME: &str = "CredVault-Client";

// ============================================================================
// Configuration
// ============================================================================

/// Which backends the selector may consider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    /// Platform store first, encrypted file store as fallback
    #[default]
    Auto,
    /// Encrypted file store only
    File,
}

impl std::str::FromStr for BackendPreference {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(BackendPreference::Auto),
            "file" => Ok(BackendPreference::File),
            other => Err(VaultError::invalid(format!("unknown backend '{}'", other))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct VaultConfig {
    pub base_dir: PathBuf,
    pub preference: BackendPreference,
    pub service_name: String,
    pub subprocess_timeout: Duration,
}

impl VaultConfig {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            preference: BackendPreference::Auto,
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            subprocess_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn file_only(mut self) -> Self {
        self.preference = BackendPreference::File;
        self
    }
}

/// Make `dir` absolute and refuse any `..` component.
pub fn normalize_base_dir(dir: &Path) -> Result<PathBuf, VaultError> {
    if dir.as_os_str().is_empty() {
        return Err(VaultError::invalid("base directory cannot be empty"));
    }
    if dir.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(VaultError::invalid("base directory may not contain '..'"));
    }
    let absolute = if dir.is_absolute() {
        dir.to_path_buf()
    } else {
        std::env::current_dir()?.join(dir)
    };
    Ok(absolute
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect())
}

// ============================================================================
// Platform detection
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    MacOs,
    Linux,
    Other,
}

impl Platform {
    pub fn current() -> Self {
        match std::env::consts::OS {
            "windows" => Platform::Windows,
            "macos" => Platform::MacOs,
            "linux" => Platform::Linux,
            _ => Platform::Other,
        }
    }
}

/// OS facilities the platform backends are built on.
#[derive(Debug, Clone)]
pub struct HostFacilities {
    pub runner: Arc<dyn CommandRunner>,
    /// `None` where no per-user protection primitive exists
    pub protector: Option<Arc<dyn BlobProtector>>,
}

impl HostFacilities {
    /// Real subprocesses, plus DPAPI on Windows.
    pub fn system() -> Self {
        Self {
            runner: Arc::new(SystemCommandRunner),
            protector: system_protector(),
        }
    }
}

#[cfg(windows)]
fn system_protector() -> Option<Arc<dyn BlobProtector>> {
    match crate::storage::protected::DpapiProtector::probe() {
        Ok(protector) => Some(Arc::new(protector)),
        Err(e) => {
            warn!(error = %e, "DPAPI probe failed");
            None
        }
    }
}

#[cfg(not(windows))]
fn system_protector() -> Option<Arc<dyn BlobProtector>> {
    None
}

// ============================================================================
// SecretVault
// ============================================================================

/// Immutable facade over the single backend chosen for this vault.
#[derive(Debug)]
pub struct SecretVault {
    backend: Backend,
}

impl SecretVault {
    /// Select a backend for the running OS.
    pub fn select(config: &VaultConfig) -> Result<Self, VaultError> {
        Self::select_with(config, Platform::current(), &HostFacilities::system())
    }

    /// Select a backend for `platform` using the given facilities.
    ///
    /// A platform backend that fails to initialize is replaced by the
    /// encrypted file store; only a failure of the file store itself is
    /// returned.
    pub fn select_with(
        config: &VaultConfig,
        platform: Platform,
        host: &HostFacilities,
    ) -> Result<Self, VaultError> {
        let base_dir = normalize_base_dir(&config.base_dir)?;

        let platform_backend = match config.preference {
            BackendPreference::File => None,
            BackendPreference::Auto => open_platform_backend(config, &base_dir, platform, host),
        };

        let backend = match platform_backend {
            Some(backend) => backend,
            None => Backend::EncryptedFile(EncryptedFileBackend::open(&base_dir)?),
        };
        info!(backend = %backend.kind(), base_dir = %base_dir.display(), "Secret vault ready");
        Ok(Self { backend })
    }

    /// Wrap an already-built backend.
    pub fn with_backend(backend: Backend) -> Self {
        Self { backend }
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn put(&self, key: &str, value: &[u8]) -> Result<(), VaultError> {
        validate_key(key)?;
        validate_value(value)?;
        self.backend.put(key, value)
    }

    pub fn put_str(&self, key: &str, value: &str) -> Result<(), VaultError> {
        self.put(key, value.as_bytes())
    }

    pub fn get(&self, key: &str) -> Result<Option<SecretBytes>, VaultError> {
        validate_key(key)?;
        self.backend.get(key)
    }

    /// `get` decoded as UTF-8. Non-UTF-8 content reads as absent.
    pub fn get_string(&self, key: &str) -> Result<Option<String>, VaultError> {
        let Some(bytes) = self.get(key)? else {
            return Ok(None);
        };
        match std::str::from_utf8(&bytes) {
            Ok(text) => Ok(Some(text.to_string())),
            Err(reason) => {
                let e = VaultError::CorruptedSecret {
                    key: key.to_string(),
                    reason: reason.to_string(),
                };
                warn!(error = %e, "Ignoring stored secret");
                Ok(None)
            }
        }
    }

    pub fn delete(&self, key: &str) -> Result<(), VaultError> {
        validate_key(key)?;
        self.backend.delete(key)
    }

    /// Write every entry in order.
    ///
    /// All entries are validated before the first write. If a write fails,
    /// the entries this call already wrote are deleted (best effort) and the
    /// write error is returned.
    pub fn put_many<V: AsRef<[u8]>>(&self, entries: &[(&str, V)]) -> Result<(), VaultError> {
        for (key, value) in entries {
            validate_key(key)?;
            validate_value(value.as_ref())?;
        }

        for (index, (key, value)) in entries.iter().enumerate() {
            if let Err(e) = self.backend.put(key, value.as_ref()) {
                warn!(key = *key, error = %e, "Batched write failed, removing partial batch");
                for (written, _) in &entries[..index] {
                    if let Err(cleanup) = self.backend.delete(written) {
                        warn!(key = *written, error = %cleanup, "Failed to remove partial write");
                    }
                }
                return Err(e);
            }
        }
        debug!(count = entries.len(), "Batched write complete");
        Ok(())
    }

    /// Every readable value for the keys the backend can list.
    pub fn load_all(&self) -> Result<BTreeMap<String, SecretBytes>, VaultError> {
        let mut values = BTreeMap::new();
        for key in self.backend.list_known_keys()? {
            if let Some(value) = self.backend.get(&key)? {
                values.insert(key, value);
            }
        }
        Ok(values)
    }

    pub fn list_known_keys(&self) -> Result<Vec<String>, VaultError> {
        self.backend.list_known_keys()
    }

    pub fn clear(&self) -> Result<(), VaultError> {
        self.backend.clear()?;
        info!(backend = %self.backend.kind(), "Secret vault cleared");
        Ok(())
    }
}

/// `None` means "use the file store"; the reason has already been logged.
fn open_platform_backend(
    config: &VaultConfig,
    base_dir: &Path,
    platform: Platform,
    host: &HostFacilities,
) -> Option<Backend> {
    let attempt = match platform {
        Platform::Windows => match &host.protector {
            Some(protector) => ProtectedBlobBackend::open(base_dir, protector.clone())
                .map(Backend::ProtectedBlob),
            None => Err(VaultError::unavailable(
                BackendKind::WindowsDpapi,
                "no per-user protection primitive",
            )),
        },
        Platform::MacOs => KeychainBackend::open(
            &config.service_name,
            host.runner.clone(),
            config.subprocess_timeout,
        )
        .map(Backend::Keychain),
        Platform::Linux => SecretServiceBackend::open(
            &config.service_name,
            host.runner.clone(),
            config.subprocess_timeout,
        )
        .map(Backend::SecretService),
        Platform::Other => return None,
    };

    match attempt {
        Ok(backend) => Some(backend),
        Err(e) => {
            warn!(platform = ?platform, error = %e, "Platform secret store unavailable, falling back to encrypted file store");
            None
        }
    }
}

// ============================================================================
// Process-wide instance
// ============================================================================

/// Init-once holder for a shared vault.
#[derive(Debug, Default)]
pub struct VaultCell {
    cell: OnceCell<Arc<SecretVault>>,
}

impl VaultCell {
    pub const fn new() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }

    /// Run `init` unless a vault is already present. A failed `init` leaves
    /// the cell empty so a later call can retry.
    pub fn get_or_try_init<F>(&self, init: F) -> Result<Arc<SecretVault>, VaultError>
    where
        F: FnOnce() -> Result<SecretVault, VaultError>,
    {
        self.cell.get_or_try_init(|| init().map(Arc::new)).cloned()
    }

    pub fn get(&self) -> Option<Arc<SecretVault>> {
        self.cell.get().cloned()
    }
}

static GLOBAL_VAULT: VaultCell = VaultCell::new();

/// Initialize the process-wide vault. Later calls return the first vault
/// and ignore their `config`.
pub fn init(config: &VaultConfig) -> Result<Arc<SecretVault>, VaultError> {
    GLOBAL_VAULT.get_or_try_init(|| SecretVault::select(config))
}

/// The process-wide vault, once [`init`] has succeeded.
pub fn global() -> Result<Arc<SecretVault>, VaultError> {
    GLOBAL_VAULT.get().ok_or(VaultError::NotInitialized)
}
