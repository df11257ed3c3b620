use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use super::events::{emit, AuthEvent};
use super::model::{SessionMetadata, SessionStats, UserData, UserSession};
use crate::error::{SessionError, VaultError};
use crate::keys::{ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, SESSION_METADATA_KEY, USER_DATA_KEY};
use crate::storage::BackendKind;
use crate::vault::{self, SecretVault};

/// Username reported for events raised outside a user's own action
const SYSTEM_USER: &str = "system";

/// Username reported when no session is known
const UNKNOWN_USER: &str = "unknown";

/// All-or-nothing session record on top of a [`SecretVault`].
///
/// A session counts only when the access token, refresh token and user data
/// are all readable. The last stored or loaded session is mirrored in memory.
#[derive(Debug)]
pub struct SessionManager {
    vault: Arc<SecretVault>,
    current: RwLock<Option<UserSession>>,
}

impl SessionManager {
    pub fn new(vault: Arc<SecretVault>) -> Self {
        Self {
            vault,
            current: RwLock::new(None),
        }
    }

    /// Manager over the process-wide vault.
    pub fn from_global() -> Result<Self, VaultError> {
        Ok(Self::new(vault::global()?))
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.vault.backend_kind()
    }

    /// Persist a fresh session.
    ///
    /// If any of the four writes fails, the facets already written by this
    /// call are removed before the error is returned.
    pub fn store_session(
        &self,
        access_token: &str,
        refresh_token: &str,
        user_data: UserData,
    ) -> Result<UserSession, SessionError> {
        info!(user = %user_data.username, user_id = user_data.user_id, "Storing user session");

        let metadata = SessionMetadata::new(self.backend_kind());
        let result = serde_json::to_string(&user_data)
            .and_then(|user| Ok((user, serde_json::to_string(&metadata)?)))
            .map_err(SessionError::from)
            .and_then(|(user_json, metadata_json)| {
                self.vault
                    .put_many(&[
                        (ACCESS_TOKEN_KEY, access_token),
                        (REFRESH_TOKEN_KEY, refresh_token),
                        (USER_DATA_KEY, user_json.as_str()),
                        (SESSION_METADATA_KEY, metadata_json.as_str()),
                    ])
                    .map_err(SessionError::Store)
            });

        if let Err(e) = result {
            self.record_event(
                AuthEvent::SecurityViolation,
                &user_data.username,
                &format!("Session storage failed: {}", e),
            );
            return Err(e);
        }

        let session = UserSession {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.to_string(),
            user_data,
            metadata: Some(metadata),
        };
        self.record_event(
            AuthEvent::LoginSuccess,
            session.username(),
            &format!("Session stored with {} backend", self.backend_kind()),
        );
        *self.current.write() = Some(session.clone());
        Ok(session)
    }

    /// Read the stored session back.
    ///
    /// `Ok(None)` when any mandatory facet is missing or unreadable. Missing
    /// or unparsable metadata leaves the session valid with `metadata: None`.
    pub fn load_session(&self) -> Result<Option<UserSession>, SessionError> {
        let session = self.read_session().map_err(SessionError::Load)?;
        match &session {
            Some(s) => debug!(user = %s.username(), "Loaded user session"),
            None => debug!("No complete user session in storage"),
        }
        *self.current.write() = session.clone();
        Ok(session)
    }

    fn read_session(&self) -> Result<Option<UserSession>, VaultError> {
        let Some(access_token) = self.vault.get_string(ACCESS_TOKEN_KEY)? else {
            return Ok(None);
        };
        let Some(refresh_token) = self.vault.get_string(REFRESH_TOKEN_KEY)? else {
            return Ok(None);
        };
        let Some(user_data) = self.read_json::<UserData>(USER_DATA_KEY)? else {
            return Ok(None);
        };
        let metadata = self.read_json::<SessionMetadata>(SESSION_METADATA_KEY)?;

        Ok(Some(UserSession {
            access_token,
            refresh_token,
            user_data,
            metadata,
        }))
    }

    /// Unparsable JSON reads as absent.
    fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, VaultError> {
        let Some(raw) = self.vault.get(key)? else {
            return Ok(None);
        };
        match serde_json::from_slice(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(key = key, error = %e, "Ignoring unparsable session record");
                Ok(None)
            }
        }
    }

    /// Replace the access token and bump `last_token_refresh`.
    pub fn update_access_token(&self, new_access_token: &str) -> Result<(), SessionError> {
        let user = self.current_username(SYSTEM_USER);
        match self.write_access_token(new_access_token) {
            Ok(()) => {
                self.record_event(AuthEvent::TokenRefreshed, &user, "Access token refreshed");
                Ok(())
            }
            Err(e) => {
                self.record_event(
                    AuthEvent::TokenRefreshFailed,
                    &user,
                    &format!("Token refresh failed: {}", e),
                );
                Err(e)
            }
        }
    }

    fn write_access_token(&self, new_access_token: &str) -> Result<(), SessionError> {
        self.vault
            .put_str(ACCESS_TOKEN_KEY, new_access_token)
            .map_err(SessionError::Update)?;

        let metadata = self
            .read_json::<SessionMetadata>(SESSION_METADATA_KEY)
            .map_err(SessionError::Update)?
            .map(|mut metadata| {
                metadata.last_token_refresh = Utc::now();
                metadata
            });
        if let Some(metadata) = &metadata {
            self.vault
                .put_str(SESSION_METADATA_KEY, &serde_json::to_string(metadata)?)
                .map_err(SessionError::Update)?;
        }

        if let Some(session) = self.current.write().as_mut() {
            session.access_token = new_access_token.to_string();
            if metadata.is_some() {
                session.metadata = metadata;
            }
        }
        Ok(())
    }

    /// Replace the stored profile, e.g. after email verification.
    pub fn update_user_data(&self, user_data: UserData) -> Result<(), SessionError> {
        let json = serde_json::to_string(&user_data)?;
        self.vault
            .put_str(USER_DATA_KEY, &json)
            .map_err(SessionError::Update)?;

        self.record_event(
            AuthEvent::EmailVerified,
            &user_data.username,
            &format!("User data updated - email verified: {}", user_data.email_verified),
        );
        if let Some(session) = self.current.write().as_mut() {
            session.user_data = user_data;
        }
        Ok(())
    }

    /// Remove everything the vault can reach and drop the in-memory session.
    ///
    /// Succeeds when nothing was stored. The mirror is dropped even when the
    /// vault fails to clear.
    pub fn clear_session(&self) -> Result<(), SessionError> {
        let mirrored = self.current.write().take();
        let user = match mirrored {
            Some(session) => session.user_data.username,
            None => self
                .read_json::<UserData>(USER_DATA_KEY)
                .ok()
                .flatten()
                .map_or_else(|| UNKNOWN_USER.to_string(), |u| u.username),
        };

        info!(user = %user, backend = %self.backend_kind(), "Clearing user session");
        if let Err(e) = self.vault.clear() {
            warn!(error = %e, "Failed to clear session data");
            return Err(SessionError::Clear(e));
        }
        self.record_event(
            AuthEvent::Logout,
            &user,
            "Session data cleared from secure storage",
        );
        Ok(())
    }

    /// `None` without a session or without readable metadata.
    pub fn session_stats(&self) -> Result<Option<SessionStats>, SessionError> {
        Ok(self
            .load_session()?
            .as_ref()
            .and_then(SessionStats::from_session))
    }

    /// A stored session with non-blank tokens and a positive user id.
    pub fn is_valid_session(&self) -> bool {
        match self.load_session() {
            Ok(Some(session)) => {
                !session.access_token.trim().is_empty()
                    && !session.refresh_token.trim().is_empty()
                    && session.user_data.user_id > 0
            }
            Ok(None) => false,
            Err(e) => {
                warn!(error = %e, "Session validation failed");
                false
            }
        }
    }

    /// The last session stored or loaded through this manager.
    pub fn current(&self) -> Option<UserSession> {
        self.current.read().clone()
    }

    /// Report an auth event tagged with this manager's backend.
    pub fn record_event(&self, event: AuthEvent, user: &str, detail: &str) {
        emit(event, user, detail, self.backend_kind());
    }

    fn current_username(&self, fallback: &str) -> String {
        self.current
            .read()
            .as_ref()
            .map_or_else(|| fallback.to_string(), |s| s.user_data.username.clone())
    }
}
