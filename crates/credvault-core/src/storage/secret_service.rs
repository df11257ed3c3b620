use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use super::{
    clear_registry_keys, decode_cli_value, encode_cli_value, present_registry_keys, BackendKind,
    CommandOutput, CommandRunner, CommandSpec, SecretBytes, SecretStore,
};
use crate::error::VaultError;
use crate::keys::{sanitize_account, validate_key, validate_value};

/// libsecret command-line tool
const PROGRAM: &str = "secret-tool";

/// Account looked up once at startup to prove the Secret Service answers
const PROBE_ACCOUNT: &str = "credvault-probe";

/// Freedesktop Secret Service items, driven through `secret-tool`.
///
/// Each item carries `service`, `account` and `datakey` attributes; lookups
/// and deletes match on `service` + `account` only. The value travels on
/// stdin, never in argv.
#[derive(Debug)]
pub struct SecretServiceBackend {
    service: String,
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

/// `secret-tool` exits 1 with no output when nothing matched.
fn is_no_match(out: &CommandOutput) -> bool {
    out.code == Some(1) && out.stdout.is_empty() && out.stderr.trim().is_empty()
}

impl SecretServiceBackend {
    /// Fails with `BackendUnavailable` when `secret-tool` is missing or no
    /// Secret Service daemon is reachable on the session bus.
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
            .runner
            .run(&backend.lookup_spec(PROBE_ACCOUNT))
            .map_err(|e| VaultError::unavailable(BackendKind::LinuxSecretService, e.to_string()))?;
        if !probe.success() && !is_no_match(&probe) {
            return Err(VaultError::unavailable(
                BackendKind::LinuxSecretService,
                probe.describe(),
            ));
        }
        info!(service = %backend.service, "Secret Service backend ready");
        Ok(backend)
    }

    fn command(&self, verb: &str) -> CommandSpec {
        CommandSpec::new(PROGRAM).arg(verb).timeout(self.timeout)
    }

    fn attributes(&self, spec: CommandSpec, account: &str) -> CommandSpec {
        spec.args(["service", self.service.as_str(), "account", account])
    }

    fn lookup_spec(&self, account: &str) -> CommandSpec {
        self.attributes(self.command("lookup"), account)
    }

    fn clear_account(&self, account: &str) -> Result<(), VaultError> {
        let out = self
            .runner
            .run(&self.attributes(self.command("clear"), account))?;
        if out.success() || is_no_match(&out) {
            Ok(())
        } else {
            Err(VaultError::subprocess(PROGRAM, out.describe()))
        }
    }
}

impl SecretStore for SecretServiceBackend {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), VaultError> {
        validate_key(key)?;
        validate_value(value)?;
        let account = sanitize_account(key);

        self.clear_account(&account)?;
        let label = format!("{}: {}", self.service, account);
        let encoded = encode_cli_value(value);
        let spec = self
            .attributes(self.command("store").args(["--label", label.as_str()]), &account)
            .args(["datakey", key])
            .stdin(encoded.as_bytes());
        let out = self.runner.run(&spec)?;
        if !out.success() {
            return Err(VaultError::subprocess(PROGRAM, out.describe()));
        }
        debug!(key = key, account = %account, "Stored secret in Secret Service");
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<SecretBytes>, VaultError> {
        validate_key(key)?;
        let out = self.runner.run(&self.lookup_spec(&sanitize_account(key)))?;
        if out.success() {
            Ok(decode_cli_value(key, &out.stdout_trimmed()))
        } else if is_no_match(&out) {
            Ok(None)
        } else {
            Err(VaultError::subprocess(PROGRAM, out.describe()))
        }
    }

    fn delete(&self, key: &str) -> Result<(), VaultError> {
        validate_key(key)?;
        self.clear_account(&sanitize_account(key))
    }

    fn list_known_keys(&self) -> Result<Vec<String>, VaultError> {
        present_registry_keys(self)
    }

    fn clear(&self) -> Result<(), VaultError> {
        clear_registry_keys(self)?;
        debug!(service = %self.service, "Cleared Secret Service session items");
        Ok(())
    }
}
