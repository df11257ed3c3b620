//! Logical key names, key/value validation and backend-safe account names.
//!
//! The credential-manager CLIs cannot enumerate what they hold, so listing and
//! clearing on those backends walks [`SESSION_KEYS`]. A key written outside
//! this registry is invisible to `clear()` on those backends.

use crate::error::VaultError;

pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
pub const USER_DATA_KEY: &str = "user_data";
pub const SESSION_METADATA_KEY: &str = "session_metadata";

/// Every key the session manager writes. Probing order for CLI backends.
pub const SESSION_KEYS: [&str; 4] = [
    ACCESS_TOKEN_KEY,
    REFRESH_TOKEN_KEY,
    USER_DATA_KEY,
    SESSION_METADATA_KEY,
];

/// Keys that must all be present for a stored session to count.
pub const MANDATORY_SESSION_KEYS: [&str; 3] = [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_DATA_KEY];

/// Longest logical key accepted by any backend.
///
/// Blob names are the hex key plus extension and a 16-hex-digit temp tag,
/// which must stay under the 255-byte file name limit.
pub const MAX_KEY_LEN: usize = 112;

/// Reject keys no backend can address.
pub fn validate_key(key: &str) -> Result<(), VaultError> {
    if key.trim().is_empty() {
        return Err(VaultError::invalid("key cannot be empty"));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(VaultError::invalid(format!(
            "key longer than {} bytes",
            MAX_KEY_LEN
        )));
    }
    if key.chars().any(char::is_control) {
        return Err(VaultError::invalid("key contains control characters"));
    }
    Ok(())
}

/// Empty values are rejected: the CLI stores report empty output as absent.
pub fn validate_value(value: &[u8]) -> Result<(), VaultError> {
    if value.is_empty() {
        return Err(VaultError::invalid("value cannot be empty"));
    }
    Ok(())
}

/// Map a logical key onto the account name used by credential-manager CLIs.
///
/// Every character outside `[A-Za-z0-9._-]` becomes `_`. The mapping is
/// deterministic but lossy: `user#1` and `user$1` both become `user_1` and
/// would share one entry.
pub fn sanitize_account(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_sanitize_account() {
        assert_eq!(sanitize_account("access_token"), "access_token");
        assert_eq!(sanitize_account("app.user-data_1"), "app.user-data_1");
        assert_eq!(sanitize_account("john#1234"), "john_1234");
        assert_eq!(sanitize_account("a b/c"), "a_b_c");
        assert_eq!(sanitize_account("café"), "caf_");
    }

    #[test]
    fn test_sanitize_collision_is_possible() {
        assert_eq!(sanitize_account("user#1"), sanitize_account("user$1"));
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key("access_token").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("   ").is_err());
        assert!(validate_key("line\nbreak").is_err());
        assert!(validate_key(&"k".repeat(MAX_KEY_LEN + 1)).is_err());
        assert!(validate_key(&"k".repeat(MAX_KEY_LEN)).is_ok());
    }

    #[test]
    fn test_validate_value() {
        assert!(validate_value(b"x").is_ok());
        assert!(matches!(
            validate_value(b""),
            Err(VaultError::InvalidKeyOrValue(_))
        ));
    }

    #[test]
    fn test_session_registry_covers_mandatory_keys() {
        for key in MANDATORY_SESSION_KEYS {
            assert!(SESSION_KEYS.contains(&key));
        }
    }

    proptest! {
        #[test]
        fn sanitize_is_deterministic(key in ".{0,64}") {
            let a = sanitize_account(&key);
            let b = sanitize_account(&key);
            prop_assert_eq!(&a, &b);
            prop_assert_eq!(a.chars().count(), key.chars().count());
            prop_assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || ".-_".contains(c)));
        }
    }
}
