use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing::{debug, warn};

use super::fs::{blob_file_name, ensure_private_dir, list_blobs, set_owner_only, shred_and_remove, write_atomic};
use super::{SecretBytes, SecretStore};
use crate::crypto::{AeadAlgorithm, AeadCipher, Keyset, ASSOCIATED_DATA};
use crate::error::VaultError;
use crate::keys::{validate_key, validate_value};

/// Keyset file name in the vault base directory
const KEYSET_FILE: &str = "keys.json";

/// Subdirectory holding one ciphertext file per key
const SECRET_DIR: &str = "secret";

/// Blob file extension
const BLOB_EXT: &str = "enc";

/// Default and fallback backend: one AEAD ciphertext file per key.
///
/// The keyset is created on the first write and loaded lazily on the first
/// read that needs it. Anything that fails to decrypt reads as absent.
#[derive(Debug)]
pub struct EncryptedFileBackend {
    keyset_path: PathBuf,
    secret_dir: PathBuf,
    algorithm: AeadAlgorithm,
    cipher: OnceCell<AeadCipher>,
}

impl EncryptedFileBackend {
    pub fn open(base_dir: &Path) -> Result<Self, VaultError> {
        Self::with_algorithm(base_dir, AeadAlgorithm::default())
    }

    /// `algorithm` only applies when a new keyset has to be generated; an
    /// existing keyset keeps its own algorithm.
    pub fn with_algorithm(base_dir: &Path, algorithm: AeadAlgorithm) -> Result<Self, VaultError> {
        let secret_dir = base_dir.join(SECRET_DIR);
        ensure_private_dir(&secret_dir)?;
        Ok(Self {
            keyset_path: base_dir.join(KEYSET_FILE),
            secret_dir,
            algorithm,
            cipher: OnceCell::new(),
        })
    }

    pub fn secret_dir(&self) -> &Path {
        &self.secret_dir
    }

    pub fn keyset_path(&self) -> &Path {
        &self.keyset_path
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.secret_dir.join(blob_file_name(key, BLOB_EXT))
    }

    fn load_cipher(&self) -> Result<AeadCipher, VaultError> {
        let keyset = Keyset::load_or_create(&self.keyset_path, self.algorithm)?;
        AeadCipher::new(&keyset)
    }

    fn write_cipher(&self) -> Result<&AeadCipher, VaultError> {
        self.cipher.get_or_try_init(|| self.load_cipher())
    }

    /// `None` when no keyset exists yet or it cannot be read.
    fn read_cipher(&self) -> Option<&AeadCipher> {
        if let Some(cipher) = self.cipher.get() {
            return Some(cipher);
        }
        if !self.keyset_path.exists() {
            return None;
        }
        match self.cipher.get_or_try_init(|| self.load_cipher()) {
            Ok(cipher) => Some(cipher),
            Err(e) => {
                warn!(error = %e, "Keyset unreadable, treating secrets as absent");
                None
            }
        }
    }
}

impl SecretStore for EncryptedFileBackend {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), VaultError> {
        validate_key(key)?;
        validate_value(value)?;

        let ciphertext = self.write_cipher()?.encrypt(value, ASSOCIATED_DATA)?;
        let path = self.blob_path(key);
        write_atomic(&path, &ciphertext)?;
        set_owner_only(&path)?;

        debug!(key = key, bytes = value.len(), "Stored encrypted secret");
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<SecretBytes>, VaultError> {
        validate_key(key)?;

        let ciphertext = match fs::read(self.blob_path(key)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(key = key, "No stored secret");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let Some(cipher) = self.read_cipher() else {
            let e = VaultError::CorruptedSecret {
                key: key.to_string(),
                reason: "no usable keyset".to_string(),
            };
            warn!(error = %e, "Ignoring stored secret");
            return Ok(None);
        };

        match cipher.decrypt(&ciphertext, ASSOCIATED_DATA) {
            Ok(plaintext) => Ok(Some(plaintext)),
            Err(reason) => {
                let e = VaultError::CorruptedSecret {
                    key: key.to_string(),
                    reason: reason.to_string(),
                };
                warn!(error = %e, "Ignoring stored secret");
                Ok(None)
            }
        }
    }

    fn delete(&self, key: &str) -> Result<(), VaultError> {
        validate_key(key)?;
        shred_and_remove(&self.blob_path(key))?;
        debug!(key = key, "Deleted encrypted secret");
        Ok(())
    }

    fn list_known_keys(&self) -> Result<Vec<String>, VaultError> {
        let (blobs, _) = list_blobs(&self.secret_dir, BLOB_EXT)?;
        Ok(blobs.into_iter().map(|(key, _)| key).collect())
    }

    fn clear(&self) -> Result<(), VaultError> {
        let (blobs, stray) = list_blobs(&self.secret_dir, BLOB_EXT)?;
        let count = blobs.len();
        for path in blobs.into_iter().map(|(_, path)| path).chain(stray) {
            shred_and_remove(&path)?;
        }
        debug!(removed = count, "Cleared encrypted file store");
        Ok(())
    }
}
