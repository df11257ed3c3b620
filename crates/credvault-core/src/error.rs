use thiserror::Error;

use crate::storage::BackendKind;

/// Failures raised by the vault and its backends.
#[derive(Error, Debug)]
pub enum VaultError {
    /// Only produced while a backend is being initialized. The vault recovers
    /// from it by falling back to the encrypted file store.
    #[error("{backend} backend unavailable: {reason}")]
    BackendUnavailable { backend: BackendKind, reason: String },

    /// A stored value failed to decrypt or decode. Backends log this and
    /// report the value as absent; it never reaches vault callers.
    #[error("stored secret '{key}' is corrupted: {reason}")]
    CorruptedSecret { key: String, reason: String },

    #[error("invalid key or value: {0}")]
    InvalidKeyOrValue(String),

    #[error("{program} failed: {reason}")]
    Subprocess { program: String, reason: String },

    #[error("keyset error: {0}")]
    Keyset(String),

    #[error("cryptographic failure: {0}")]
    Crypto(String),

    #[error("vault not initialized")]
    NotInitialized,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl VaultError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        VaultError::InvalidKeyOrValue(msg.into())
    }

    pub fn subprocess(program: &str, reason: impl Into<String>) -> Self {
        VaultError::Subprocess {
            program: program.to_string(),
            reason: reason.into(),
        }
    }

    pub fn unavailable(backend: BackendKind, reason: impl Into<String>) -> Self {
        VaultError::BackendUnavailable {
            backend,
            reason: reason.into(),
        }
    }
}

/// Failures surfaced by the session manager.
///
/// `Display` carries the cause for logs; [`SessionError::user_message`] is
/// the only text meant to cross a user-facing boundary.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session storage failed: {0}")]
    Store(#[source] VaultError),

    #[error("session load failed: {0}")]
    Load(#[source] VaultError),

    #[error("session update failed: {0}")]
    Update(#[source] VaultError),

    #[error("session clear failed: {0}")]
    Clear(#[source] VaultError),

    #[error("session data could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("no active session")]
    NoSession,
}

impl SessionError {
    /// Generic message that never exposes the underlying cause.
    pub fn user_message(&self) -> &'static str {
        match self {
            SessionError::Store(_) | SessionError::Encode(_) => "Session storage failed",
            SessionError::Load(_) => "Session load failed",
            SessionError::Update(_) => "Session update failed",
            SessionError::Clear(_) => "Session clear failed",
            SessionError::NoSession => "No active session. Please log in again.",
        }
    }
}
