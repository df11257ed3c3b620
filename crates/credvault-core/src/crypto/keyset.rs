use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::error::VaultError;
use crate::storage::fs::set_owner_only;

/// AEAD algorithms a keyset can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AeadAlgorithm {
    #[default]
    #[serde(rename = "AES128_GCM")]
    Aes128Gcm,
    #[serde(rename = "CHACHA20_POLY1305")]
    ChaCha20Poly1305,
}

impl AeadAlgorithm {
    pub fn key_len(self) -> usize {
        match self {
            AeadAlgorithm::Aes128Gcm => 16,
            AeadAlgorithm::ChaCha20Poly1305 => 32,
        }
    }
}

/// On-disk form of a keyset.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeysetFile {
    primary_key_id: u32,
    algorithm: AeadAlgorithm,
    key: String,
    created_at: DateTime<Utc>,
}

/// Symmetric key material for the encrypted file store.
///
/// Generated once per storage directory and never replaced: every blob in the
/// directory is bound to it.
pub struct Keyset {
    pub id: u32,
    pub algorithm: AeadAlgorithm,
    pub created_at: DateTime<Utc>,
    key: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for Keyset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keyset")
            .field("id", &self.id)
            .field("algorithm", &self.algorithm)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl Keyset {
    pub fn generate(algorithm: AeadAlgorithm) -> Self {
        let mut key = Zeroizing::new(vec![0u8; algorithm.key_len()]);
        OsRng.fill_bytes(&mut key);
        Self {
            id: OsRng.next_u32(),
            algorithm,
            created_at: Utc::now(),
            key,
        }
    }

    pub fn key_bytes(&self) -> &[u8] {
        &self.key
    }

    /// Read an existing keyset file.
    pub fn load(path: &Path) -> Result<Self, VaultError> {
        let contents = Zeroizing::new(fs::read(path)?);
        let file: KeysetFile = serde_json::from_slice(&contents)
            .map_err(|e| VaultError::Keyset(format!("unreadable keyset: {}", e)))?;
        let key = Zeroizing::new(
            STANDARD
                .decode(file.key.as_bytes())
                .map_err(|e| VaultError::Keyset(format!("bad key encoding: {}", e)))?,
        );
        if key.len() != file.algorithm.key_len() {
            return Err(VaultError::Keyset(format!(
                "key length {} does not match {:?}",
                key.len(),
                file.algorithm
            )));
        }
        Ok(Self {
            id: file.primary_key_id,
            algorithm: file.algorithm,
            created_at: file.created_at,
            key,
        })
    }

    /// Load the keyset at `path`, generating and persisting one if none exists.
    ///
    /// Publishing goes through a hard link from a private temp file, so a
    /// keyset that appeared concurrently wins and is loaded instead of being
    /// overwritten.
    pub fn load_or_create(path: &Path, algorithm: AeadAlgorithm) -> Result<Self, VaultError> {
        if path.exists() {
            debug!(path = %path.display(), "Loading existing keyset");
            return Self::load(path);
        }

        let keyset = Self::generate(algorithm);
        let file = KeysetFile {
            primary_key_id: keyset.id,
            algorithm: keyset.algorithm,
            key: STANDARD.encode(keyset.key_bytes()),
            created_at: keyset.created_at,
        };
        let contents = Zeroizing::new(serde_json::to_vec_pretty(&file)?);

        let tmp = path.with_extension(format!("{}.tmp", keyset.id));
        {
            let mut f = fs::File::create(&tmp)?;
            set_owner_only(&tmp)?;
            f.write_all(&contents)?;
            f.sync_all()?;
        }

        let published = fs::hard_link(&tmp, path);
        let _ = fs::remove_file(&tmp);
        match published {
            Ok(()) => {
                info!(algorithm = ?keyset.algorithm, "Generated new encryption keyset");
                Ok(keyset)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Self::load(path),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_key_length() {
        assert_eq!(Keyset::generate(AeadAlgorithm::Aes128Gcm).key_bytes().len(), 16);
        assert_eq!(
            Keyset::generate(AeadAlgorithm::ChaCha20Poly1305).key_bytes().len(),
            32
        );
    }

    #[test]
    fn test_load_or_create_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.json");

        let first = Keyset::load_or_create(&path, AeadAlgorithm::Aes128Gcm).unwrap();
        let second = Keyset::load_or_create(&path, AeadAlgorithm::ChaCha20Poly1305).unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.algorithm, AeadAlgorithm::Aes128Gcm);
        assert_eq!(first.key_bytes(), second.key_bytes());
    }

    #[test]
    fn test_keyset_file_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.json");
        Keyset::load_or_create(&path, AeadAlgorithm::Aes128Gcm).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["algorithm"], "AES128_GCM");
        assert!(json["primaryKeyId"].is_u64());
        assert!(json["key"].is_string());
        assert!(json["createdAt"].is_string());
    }

    #[cfg(unix)]
    #[test]
    fn test_keyset_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.json");
        Keyset::load_or_create(&path, AeadAlgorithm::Aes128Gcm).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_corrupted_keyset_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.json");
        fs::write(&path, b"{not json").unwrap();

        assert!(matches!(Keyset::load(&path), Err(VaultError::Keyset(_))));
    }
}
