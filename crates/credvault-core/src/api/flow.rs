//! Session flows that pair a remote auth call with the local session update.

use tracing::{info, warn};

use super::{ApiError, AuthApi, AuthFlowError};
use crate::session::{AuthEvent, SessionManager, UserSession};

fn require_session(manager: &SessionManager) -> Result<UserSession, AuthFlowError> {
    manager.load_session()?.ok_or(AuthFlowError::NoSession)
}

/// Exchange the stored refresh token for a new access token and store it.
/// No retry: a failure is reported and returned.
pub async fn refresh_session<A: AuthApi>(
    api: &A,
    manager: &SessionManager,
) -> Result<(), AuthFlowError> {
    let session = require_session(manager)?;

    let response = match api.refresh_tokens(&session.refresh_token).await {
        Ok(response) => response,
        Err(e) => {
            manager.record_event(
                AuthEvent::TokenRefreshFailed,
                session.username(),
                &format!("Refresh rejected: {}", e),
            );
            return Err(e.into());
        }
    };
    manager.update_access_token(&response.access_token)?;
    Ok(())
}

/// Ask the server whether the stored tokens are still good.
///
/// Returns `Ok(false)` for rejected tokens. A profile sent back with a valid
/// answer replaces the stored user data.
pub async fn validate_session<A: AuthApi>(
    api: &A,
    manager: &SessionManager,
) -> Result<bool, AuthFlowError> {
    let session = require_session(manager)?;

    let response = match api
        .validate_tokens(&session.access_token, &session.refresh_token)
        .await
    {
        Ok(response) => response,
        Err(ApiError::Unauthorized) => {
            manager.record_event(
                AuthEvent::InvalidToken,
                session.username(),
                "Token validation rejected",
            );
            return Ok(false);
        }
        Err(e) => return Err(e.into()),
    };

    if !response.valid {
        let detail = response
            .message
            .unwrap_or_else(|| "Token validation rejected".to_string());
        manager.record_event(AuthEvent::InvalidToken, session.username(), &detail);
        return Ok(false);
    }

    if let Some(user) = response.user {
        if user != session.user_data {
            manager.update_user_data(user)?;
        }
    }
    Ok(true)
}

/// Revoke the tokens remotely, then clear the local session no matter what
/// the server said.
///
/// Returns whether the server acknowledged the logout. Only a failure to
/// clear local storage is an error.
pub async fn logout<A: AuthApi>(api: &A, manager: &SessionManager) -> Result<bool, AuthFlowError> {
    let session = match manager.load_session() {
        Ok(session) => session,
        Err(e) => {
            warn!(error = %e, "Could not read session before logout");
            None
        }
    };

    let acknowledged = match &session {
        Some(s) => match api.logout(&s.access_token, &s.refresh_token).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Remote logout failed, clearing local session anyway");
                false
            }
        },
        None => false,
    };

    manager.clear_session()?;
    info!(remote = acknowledged, "Logout complete");
    Ok(acknowledged)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::api::{RefreshResponse, ValidateResponse};
    use crate::session::UserData;
    use crate::vault::{SecretVault, VaultConfig};

    /// Scripted [`AuthApi`] recording the calls it receives.
    #[derive(Default)]
    struct FakeAuthApi {
        calls: Mutex<Vec<&'static str>>,
        reject: bool,
        invalid: bool,
        user: Option<UserData>,
    }

    impl FakeAuthApi {
        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().clone()
        }
    }

    impl AuthApi for FakeAuthApi {
        async fn validate_tokens(
            &self,
            _access_token: &str,
            _refresh_token: &str,
        ) -> Result<ValidateResponse, ApiError> {
            self.calls.lock().push("validate-tokens");
            if self.reject {
                return Err(ApiError::Unauthorized);
            }
            Ok(ValidateResponse {
                valid: !self.invalid,
                user: self.user.clone(),
                message: None,
            })
        }

        async fn refresh_tokens(&self, refresh_token: &str) -> Result<RefreshResponse, ApiError> {
            self.calls.lock().push("refresh-tokens");
            if self.reject {
                return Err(ApiError::Unauthorized);
            }
            Ok(RefreshResponse {
                access_token: format!("new-for-{}", refresh_token),
                expires_in: Some(900),
            })
        }

        async fn logout(&self, _access_token: &str, _refresh_token: &str) -> Result<(), ApiError> {
            self.calls.lock().push("logout");
            if self.reject {
                return Err(ApiError::ServerError("down".to_string()));
            }
            Ok(())
        }
    }

    fn manager_with_session() -> (tempfile::TempDir, SessionManager) {
        let dir = tempfile::tempdir().unwrap();
        let vault = SecretVault::select(&VaultConfig::new(dir.path()).file_only()).unwrap();
        let manager = SessionManager::new(Arc::new(vault));
        manager
            .store_session("A1", "R1", UserData::new(42, "john#1234"))
            .unwrap();
        (dir, manager)
    }

    #[tokio::test]
    async fn test_refresh_updates_access_token() {
        let (_dir, manager) = manager_with_session();
        let api = FakeAuthApi::default();

        refresh_session(&api, &manager).await.unwrap();

        let session = manager.load_session().unwrap().unwrap();
        assert_eq!(session.access_token, "new-for-R1");
        assert_eq!(session.refresh_token, "R1");
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_old_token() {
        let (_dir, manager) = manager_with_session();
        let api = FakeAuthApi {
            reject: true,
            ..FakeAuthApi::default()
        };

        let err = refresh_session(&api, &manager).await.unwrap_err();
        assert!(matches!(err, AuthFlowError::Api(ApiError::Unauthorized)));
        assert_eq!(api.calls(), vec!["refresh-tokens"]);
        assert_eq!(manager.load_session().unwrap().unwrap().access_token, "A1");
    }

    #[tokio::test]
    async fn test_refresh_without_session() {
        let dir = tempfile::tempdir().unwrap();
        let vault = SecretVault::select(&VaultConfig::new(dir.path()).file_only()).unwrap();
        let manager = SessionManager::new(Arc::new(vault));
        let api = FakeAuthApi::default();

        let err = refresh_session(&api, &manager).await.unwrap_err();
        assert!(matches!(err, AuthFlowError::NoSession));
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_validate_outcomes() {
        let (_dir, manager) = manager_with_session();

        assert!(validate_session(&FakeAuthApi::default(), &manager).await.unwrap());

        let invalid = FakeAuthApi {
            invalid: true,
            ..FakeAuthApi::default()
        };
        assert!(!validate_session(&invalid, &manager).await.unwrap());

        let rejected = FakeAuthApi {
            reject: true,
            ..FakeAuthApi::default()
        };
        assert!(!validate_session(&rejected, &manager).await.unwrap());
        // Validation never clears the session by itself.
        assert!(manager.is_valid_session());
    }

    #[tokio::test]
    async fn test_validate_refreshes_profile() {
        let (_dir, manager) = manager_with_session();
        let verified = UserData::new(42, "john#1234").with_email("john@example.com", true);
        let api = FakeAuthApi {
            user: Some(verified.clone()),
            ..FakeAuthApi::default()
        };

        assert!(validate_session(&api, &manager).await.unwrap());
        assert_eq!(manager.load_session().unwrap().unwrap().user_data, verified);
    }

    #[tokio::test]
    async fn test_logout_clears_even_when_remote_fails() {
        let (_dir, manager) = manager_with_session();
        let api = FakeAuthApi {
            reject: true,
            ..FakeAuthApi::default()
        };

        assert!(!logout(&api, &manager).await.unwrap());
        assert_eq!(api.calls(), vec!["logout"]);
        assert!(manager.load_session().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_logout_without_session_skips_remote() {
        let (_dir, manager) = manager_with_session();
        manager.clear_session().unwrap();
        let api = FakeAuthApi::default();

        assert!(!logout(&api, &manager).await.unwrap());
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_logout_acknowledged() {
        let (_dir, manager) = manager_with_session();
        let api = FakeAuthApi::default();
        assert!(logout(&api, &manager).await.unwrap());
        assert!(!manager.is_valid_session());
    }
}
