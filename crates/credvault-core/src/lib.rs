//! credvault-core - encrypted per-user credential storage and session management.
//!
//! This crate provides:
//! - `SecretVault`: picks one secret store per process (DPAPI blobs, macOS
//!   keychain, Secret Service, or the AEAD-encrypted file store as fallback)
//!   and exposes a flat key/value API over it
//! - `SessionManager`: an all-or-nothing session record (tokens, profile,
//!   metadata) on top of the vault, with categorized auth events
//! - `api`: the remote auth API seam and the refresh/validate/logout flows
//! - `Config`: on-disk JSON configuration with environment overrides

pub mod api;
pub mod config;
pub mod crypto;
pub mod error;
pub mod keys;
pub mod session;
pub mod storage;
pub mod vault;

pub use config::{Config, ConfigError};
pub use error::{SessionError, VaultError};
pub use session::{AuthEvent, SessionManager, SessionMetadata, SessionStats, UserData, UserSession};
pub use storage::{BackendKind, SecretStore};
pub use vault::{BackendPreference, SecretVault, VaultConfig};
