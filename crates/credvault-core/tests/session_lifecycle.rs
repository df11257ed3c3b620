//! End-to-end session lifecycle over the encrypted file store.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use credvault_core::keys::{ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, SESSION_METADATA_KEY};
use credvault_core::{vault, BackendKind, SecretVault, SessionManager, UserData, VaultConfig};

fn file_vault(dir: &std::path::Path) -> Arc<SecretVault> {
    Arc::new(SecretVault::select(&VaultConfig::new(dir).file_only()).unwrap())
}

#[test]
fn test_login_refresh_logout() {
    let dir = tempfile::tempdir().unwrap();
    let manager = SessionManager::new(file_vault(dir.path()));

    manager
        .store_session("A1", "R1", UserData::new(42, "john#1234"))
        .unwrap();
    let session = manager.load_session().unwrap().unwrap();
    assert_eq!(
        (session.access_token.as_str(), session.refresh_token.as_str()),
        ("A1", "R1")
    );
    assert_eq!(session.user_data.user_id, 42);
    assert_eq!(session.user_data.username, "john#1234");
    let first_refresh = session.metadata.unwrap().last_token_refresh;

    thread::sleep(Duration::from_millis(5));
    manager.update_access_token("A2").unwrap();
    let session = manager.load_session().unwrap().unwrap();
    assert_eq!(session.access_token, "A2");
    assert_eq!(session.refresh_token, "R1");
    assert!(session.metadata.unwrap().last_token_refresh > first_refresh);

    manager.clear_session().unwrap();
    assert!(manager.load_session().unwrap().is_none());
    manager.clear_session().unwrap();
}

#[test]
fn test_session_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    SessionManager::new(file_vault(dir.path()))
        .store_session("A1", "R1", UserData::new(7, "amy"))
        .unwrap();

    let reopened = SessionManager::new(file_vault(dir.path()));
    assert!(reopened.is_valid_session());
    let stats = reopened.session_stats().unwrap().unwrap();
    assert_eq!(stats.username, "amy");
    assert_eq!(stats.backend_type, BackendKind::File);
}

#[test]
fn test_partial_write_is_no_session() {
    let dir = tempfile::tempdir().unwrap();
    let vault = file_vault(dir.path());
    vault.put(ACCESS_TOKEN_KEY, b"A1").unwrap();
    vault.put(REFRESH_TOKEN_KEY, b"R1").unwrap();
    vault
        .put(SESSION_METADATA_KEY, br#"{"loginTime":"2024-01-01T00:00:00Z"}"#)
        .unwrap();

    let manager = SessionManager::new(vault);
    assert!(manager.load_session().unwrap().is_none());
    assert!(!manager.is_valid_session());
}

#[test]
fn test_global_vault_initializes_once() {
    let dir = tempfile::tempdir().unwrap();
    let config = VaultConfig::new(dir.path()).file_only();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let config = config.clone();
            thread::spawn(move || vault::init(&config).unwrap())
        })
        .collect();
    let vaults: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(vaults.iter().all(|v| Arc::ptr_eq(v, &vaults[0])));
    assert_eq!(vault::global().unwrap().backend_kind(), BackendKind::File);

    let manager = SessionManager::from_global().unwrap();
    manager
        .store_session("A1", "R1", UserData::new(1, "solo"))
        .unwrap();
    assert!(manager.is_valid_session());
    manager.clear_session().unwrap();
}
