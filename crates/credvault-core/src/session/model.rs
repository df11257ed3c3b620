use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::BackendKind;

/// Profile snapshot of the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserData {
    pub user_id: i64,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_login: Option<String>,
}

impl UserData {
    pub fn new(user_id: i64, username: impl Into<String>) -> Self {
        Self {
            user_id,
            username: username.into(),
            email: None,
            email_verified: false,
            created_at: None,
            last_login: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>, verified: bool) -> Self {
        self.email = Some(email.into());
        self.email_verified = verified;
        self
    }
}

/// Written alongside the tokens at login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    pub login_time: DateTime<Utc>,
    /// Equal to `login_time` until the first access-token rotation
    pub last_token_refresh: DateTime<Utc>,
    pub operating_system: String,
    /// Kernel or OS release; `None` where the platform doesn't expose one cheaply
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    /// CPU architecture, e.g. `x86_64`
    #[serde(default)]
    pub architecture: String,
    pub backend_type: BackendKind,
}

impl SessionMetadata {
    pub fn new(backend_type: BackendKind) -> Self {
        let now = Utc::now();
        Self {
            login_time: now,
            last_token_refresh: now,
            operating_system: std::env::consts::OS.to_string(),
            os_version: os_version(),
            architecture: std::env::consts::ARCH.to_string(),
            backend_type,
        }
    }
}

#[cfg(target_os = "linux")]
fn os_version() -> Option<String> {
    let release = std::fs::read_to_string("/proc/sys/kernel/osrelease").ok()?;
    let release = release.trim();
    (!release.is_empty()).then(|| release.to_string())
}

// TODO: read kern.osproductversion on macOS and RtlGetVersion on Windows.
#[cfg(not(target_os = "linux"))]
fn os_version() -> Option<String> {
    None
}

/// A complete stored session.
#[derive(Clone, PartialEq, Eq)]
pub struct UserSession {
    pub access_token: String,
    pub refresh_token: String,
    pub user_data: UserData,
    /// `None` when the metadata record is missing or unreadable
    pub metadata: Option<SessionMetadata>,
}

impl fmt::Debug for UserSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserSession")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("user_data", &self.user_data)
            .field("metadata", &self.metadata)
            .finish()
    }
}

impl UserSession {
    pub fn username(&self) -> &str {
        &self.user_data.username
    }
}

/// Monitoring view of the current session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub login_time: DateTime<Utc>,
    pub last_token_refresh: DateTime<Utc>,
    pub operating_system: String,
    pub backend_type: BackendKind,
    pub username: String,
    pub email_verified: bool,
}

impl SessionStats {
    pub fn from_session(session: &UserSession) -> Option<Self> {
        let metadata = session.metadata.as_ref()?;
        Some(Self {
            login_time: metadata.login_time,
            last_token_refresh: metadata.last_token_refresh,
            operating_system: metadata.operating_system.clone(),
            backend_type: metadata.backend_type,
            username: session.user_data.username.clone(),
            email_verified: session.user_data.email_verified,
        })
    }
}
