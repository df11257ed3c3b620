use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::storage::BackendKind;

/// Security-relevant authentication events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthEvent {
    LoginSuccess,
    LoginFailed,
    RegistrationSuccess,
    RegistrationFailed,
    EmailVerified,
    EmailVerificationFailed,
    TokenRefreshed,
    TokenRefreshFailed,
    PasswordChanged,
    Logout,
    SessionExpired,
    SecurityViolation,
    InvalidToken,
}

/// How loudly an event is reported. Never affects session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventSeverity {
    Info,
    Warning,
    Error,
}

impl AuthEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthEvent::LoginSuccess => "LOGIN_SUCCESS",
            AuthEvent::LoginFailed => "LOGIN_FAILED",
            AuthEvent::RegistrationSuccess => "REGISTRATION_SUCCESS",
            AuthEvent::RegistrationFailed => "REGISTRATION_FAILED",
            AuthEvent::EmailVerified => "EMAIL_VERIFIED",
            AuthEvent::EmailVerificationFailed => "EMAIL_VERIFICATION_FAILED",
            AuthEvent::TokenRefreshed => "TOKEN_REFRESHED",
            AuthEvent::TokenRefreshFailed => "TOKEN_REFRESH_FAILED",
            AuthEvent::PasswordChanged => "PASSWORD_CHANGED",
            AuthEvent::Logout => "LOGOUT",
            AuthEvent::SessionExpired => "SESSION_EXPIRED",
            AuthEvent::SecurityViolation => "SECURITY_VIOLATION",
            AuthEvent::InvalidToken => "INVALID_TOKEN",
        }
    }

    pub fn severity(self) -> EventSeverity {
        match self {
            AuthEvent::LoginSuccess
            | AuthEvent::RegistrationSuccess
            | AuthEvent::EmailVerified
            | AuthEvent::PasswordChanged
            | AuthEvent::TokenRefreshed
            | AuthEvent::Logout
            | AuthEvent::SessionExpired => EventSeverity::Info,
            AuthEvent::LoginFailed
            | AuthEvent::RegistrationFailed
            | AuthEvent::EmailVerificationFailed
            | AuthEvent::TokenRefreshFailed => EventSeverity::Warning,
            AuthEvent::SecurityViolation | AuthEvent::InvalidToken => EventSeverity::Error,
        }
    }
}

impl fmt::Display for AuthEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Report `event` on the tracing channel at its severity's level.
pub fn emit(event: AuthEvent, user: &str, detail: &str, backend: BackendKind) {
    let event_name = event.as_str();
    match event.severity() {
        EventSeverity::Info => {
            info!(event = event_name, user = user, info = detail, backend = %backend, "Auth event")
        }
        EventSeverity::Warning => {
            warn!(event = event_name, user = user, info = detail, backend = %backend, "Auth event")
        }
        EventSeverity::Error => {
            error!(event = event_name, user = user, info = detail, backend = %backend, "Auth event")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_classes() {
        assert_eq!(AuthEvent::LoginSuccess.severity(), EventSeverity::Info);
        assert_eq!(AuthEvent::Logout.severity(), EventSeverity::Info);
        assert_eq!(AuthEvent::LoginFailed.severity(), EventSeverity::Warning);
        assert_eq!(AuthEvent::TokenRefreshFailed.severity(), EventSeverity::Warning);
        assert_eq!(AuthEvent::SecurityViolation.severity(), EventSeverity::Error);
        assert_eq!(AuthEvent::InvalidToken.severity(), EventSeverity::Error);
    }

    #[test]
    fn test_event_names_match_serde() {
        for event in [
            AuthEvent::EmailVerificationFailed,
            AuthEvent::SessionExpired,
            AuthEvent::PasswordChanged,
        ] {
            assert_eq!(
                serde_json::to_string(&event).unwrap(),
                format!("\"{}\"", event.as_str())
            );
        }
    }
}
