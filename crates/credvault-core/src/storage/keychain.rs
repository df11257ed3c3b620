use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use super::{
    clear_registry_keys, decode_cli_value, encode_cli_value, present_registry_keys, BackendKind,
    CommandOutput, CommandRunner, CommandSpec, SecretBytes, SecretStore,
};
use crate::error::VaultError;
use crate::keys::{sanitize_account, validate_key, validate_value};

/// macOS keychain command-line tool
const PROGRAM: &str = "security";

/// `security` exit status for "The specified item could not be found"
const ITEM_NOT_FOUND: i32 = 44;

/// Generic-password items in the login keychain, driven through `security`.
///
/// Items live under one service name; the account is the sanitized logical
/// key. `security add-generic-password` only accepts the secret via `-w`, so
/// the encoded value is briefly visible in the process table.
#[derive(Debug)]
pub struct KeychainBackend {
    service: String,
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

impl KeychainBackend {
    /// Fails with `BackendUnavailable` when `security` cannot be run or has
    /// no user keychain to talk to.
    pub fn open(
        service: &str,
        runner: Arc<dyn CommandRunner>,
        timeout: Duration,
    ) -> Result<Self, VaultError> {
        let backend = Self {
            service: service.to_string(),
            runner,
            timeout,
        };
        let probe = backend
            .run(backend.command("list-keychains").args(["-d", "user"]))
            .map_err(|e| VaultError::unavailable(BackendKind::MacosKeychain, e.to_string()))?;
        if !probe.success() {
            return Err(VaultError::unavailable(
                BackendKind::MacosKeychain,
                probe.describe(),
            ));
        }
        info!(service = %backend.service, "Keychain backend ready");
        Ok(backend)
    }

    fn command(&self, verb: &str) -> CommandSpec {
        CommandSpec::new(PROGRAM)
            .arg(verb)
            .clear_env()
            .timeout(self.timeout)
    }

    fn item(&self, verb: &str, account: &str) -> CommandSpec {
        self.command(verb)
            .args(["-a", account, "-s", self.service.as_str()])
    }

    fn run(&self, spec: CommandSpec) -> Result<CommandOutput, VaultError> {
        self.runner.run(&spec)
    }

    fn delete_account(&self, account: &str) -> Result<(), VaultError> {
        let out = self.run(self.item("delete-generic-password", account))?;
        match out.code {
            Some(0) | Some(ITEM_NOT_FOUND) => Ok(()),
            _ => Err(VaultError::subprocess(PROGRAM, out.describe())),
        }
    }
}

impl SecretStore for KeychainBackend {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), VaultError> {
        validate_key(key)?;
        validate_value(value)?;
        let account = sanitize_account(key);

        // Delete first so a stale item never lingers beside the new one.
        self.delete_account(&account)?;
        let encoded = encode_cli_value(value);
        let out = self.run(
            self.item("add-generic-password", &account)
                .args(["-w", encoded.as_str(), "-U"]),
        )?;
        if !out.success() {
            return Err(VaultError::subprocess(PROGRAM, out.describe()));
        }
        debug!(key = key, account = %account, "Stored secret in keychain");
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<SecretBytes>, VaultError> {
        validate_key(key)?;
        let account = sanitize_account(key);

        let out = self.run(self.item("find-generic-password", &account).arg("-w"))?;
        match out.code {
            Some(0) => Ok(decode_cli_value(key, &out.stdout_trimmed())),
            Some(ITEM_NOT_FOUND) => Ok(None),
            _ => Err(VaultError::subprocess(PROGRAM, out.describe())),
        }
    }

    fn delete(&self, key: &str) -> Result<(), VaultError> {
        validate_key(key)?;
        self.delete_account(&sanitize_account(key))
    }

    fn list_known_keys(&self) -> Result<Vec<String>, VaultError> {
        present_registry_keys(self)
    }

    fn clear(&self) -> Result<(), VaultError> {
        clear_registry_keys(self)?;
        debug!(service = %self.service, "Cleared keychain session items");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::command::testing::FakeCredentialCli;

    const SERVICE: &str = "CredVault-Test";

    fn backend(cli: FakeCredentialCli) -> (Arc<FakeCredentialCli>, KeychainBackend) {
        let cli = Arc::new(cli);
        let backend = KeychainBackend::open(SERVICE, cli.clone(), Duration::from_secs(1)).unwrap();
        (cli, backend)
    }

    #[test]
    fn test_roundtrip_binary_value() {
        let (_cli, store) = backend(FakeCredentialCli::default());
        let value = b"{\"a\":1}\nsecond line\0";
        store.put("user_data", value).unwrap();
        assert_eq!(store.get("user_data").unwrap().unwrap().as_slice(), value);
        assert!(store.get("access_token").unwrap().is_none());
    }

    #[test]
    fn test_put_deletes_before_adding() {
        let (cli, store) = backend(FakeCredentialCli::default());
        store.put("access_token", b"A1").unwrap();
        store.put("access_token", b"A2").unwrap();

        let verbs: Vec<String> = cli.calls().iter().map(|c| c.args[0].clone()).collect();
        assert_eq!(
            verbs,
            vec![
                "list-keychains",
                "delete-generic-password",
                "add-generic-password",
                "delete-generic-password",
                "add-generic-password",
            ]
        );
        assert_eq!(cli.entry_count(), 1);
        assert_eq!(store.get("access_token").unwrap().unwrap().as_slice(), b"A2");
    }

    #[test]
    fn test_account_is_sanitized_and_env_cleared() {
        let (cli, store) = backend(FakeCredentialCli::default());
        store.put("john#1234", b"v").unwrap();

        let add = cli
            .calls()
            .into_iter()
            .find(|c| c.args[0] == "add-generic-password")
            .unwrap();
        assert_eq!(add.flag_value("-a"), Some("john_1234"));
        assert_eq!(add.flag_value("-s"), Some(SERVICE));
        assert!(add.clear_env);
        assert!(cli.raw_entry(SERVICE, "john_1234").is_some());
    }

    #[test]
    fn test_clear_only_reaches_registry_keys() {
        let (cli, store) = backend(FakeCredentialCli::default());
        store.put("access_token", b"A1").unwrap();
        store.put("refresh_token", b"R1").unwrap();
        store.put("outside_registry", b"x").unwrap();

        assert_eq!(
            store.list_known_keys().unwrap(),
            vec!["access_token".to_string(), "refresh_token".to_string()]
        );

        store.clear().unwrap();
        store.clear().unwrap();

        assert!(store.list_known_keys().unwrap().is_empty());
        // Documented limitation: unregistered keys survive clear().
        assert!(cli.raw_entry(SERVICE, "outside_registry").is_some());
    }

    #[test]
    fn test_missing_cli_is_unavailable() {
        let cli = Arc::new(FakeCredentialCli {
            missing: true,
            ..FakeCredentialCli::default()
        });
        let err = KeychainBackend::open(SERVICE, cli, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(
            err,
            VaultError::BackendUnavailable {
                backend: BackendKind::MacosKeychain,
                ..
            }
        ));
    }

    #[test]
    fn test_failed_add_is_subprocess_failure() {
        let (_cli, store) = backend(FakeCredentialCli {
            fail_verb: Some("add-generic-password".to_string()),
            ..FakeCredentialCli::default()
        });
        assert!(matches!(
            store.put("access_token", b"A1"),
            Err(VaultError::Subprocess { .. })
        ));
    }

    #[test]
    fn test_unexpected_find_exit_is_surfaced() {
        let (_cli, store) = backend(FakeCredentialCli {
            fail_verb: Some("find-generic-password".to_string()),
            ..FakeCredentialCli::default()
        });
        assert!(matches!(
            store.get("access_token"),
            Err(VaultError::Subprocess { .. })
        ));
    }
}
