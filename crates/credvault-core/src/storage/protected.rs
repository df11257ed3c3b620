use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use super::fs::{blob_file_name, ensure_private_dir, list_blobs, set_owner_only, shred_and_remove, write_atomic};
use super::{SecretBytes, SecretStore};
use crate::error::VaultError;
use crate::keys::{validate_key, validate_value};

/// Blob directory relative to the vault base directory
const DATA_DIR: &str = "secret/data";

/// Blob file extension
const BLOB_EXT: &str = "dpapi";

/// An OS primitive that seals data to the current user without a caller key.
pub trait BlobProtector: fmt::Debug + Send + Sync {
    fn protect(&self, plaintext: &[u8]) -> Result<Vec<u8>, VaultError>;

    fn unprotect(&self, blob: &[u8]) -> Result<SecretBytes, VaultError>;
}

/// One protector-sealed blob file per key.
#[derive(Debug)]
pub struct ProtectedBlobBackend {
    dir: PathBuf,
    protector: Arc<dyn BlobProtector>,
}

impl ProtectedBlobBackend {
    pub fn open(base_dir: &Path, protector: Arc<dyn BlobProtector>) -> Result<Self, VaultError> {
        let dir = base_dir.join(DATA_DIR);
        ensure_private_dir(&dir)?;
        Ok(Self { dir, protector })
    }

    pub fn data_dir(&self) -> &Path {
        &self.dir
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.dir.join(blob_file_name(key, BLOB_EXT))
    }
}

impl SecretStore for ProtectedBlobBackend {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), VaultError> {
        validate_key(key)?;
        validate_value(value)?;

        let blob = self.protector.protect(value)?;
        let path = self.blob_path(key);
        write_atomic(&path, &blob)?;
        set_owner_only(&path)?;
        debug!(key = key, "Stored protected secret");
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<SecretBytes>, VaultError> {
        validate_key(key)?;

        let blob = match fs::read(self.blob_path(key)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match self.protector.unprotect(&blob) {
            Ok(plaintext) if !plaintext.is_empty() => Ok(Some(plaintext)),
            Ok(_) => Ok(None),
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
        Ok(())
    }

    fn list_known_keys(&self) -> Result<Vec<String>, VaultError> {
        let (blobs, _) = list_blobs(&self.dir, BLOB_EXT)?;
        Ok(blobs.into_iter().map(|(key, _)| key).collect())
    }

    fn clear(&self) -> Result<(), VaultError> {
        let (blobs, stray) = list_blobs(&self.dir, BLOB_EXT)?;
        for path in blobs.into_iter().map(|(_, path)| path).chain(stray) {
            shred_and_remove(&path)?;
        }
        debug!(dir = %self.dir.display(), "Cleared protected blob store");
        Ok(())
    }
}

// ============================================================================
// Windows DPAPI
// ============================================================================

#[cfg(windows)]
pub use dpapi::DpapiProtector;

#[cfg(windows)]
mod dpapi {
    use std::ptr;

    use windows_sys::Win32::Foundation::LocalFree;
    use windows_sys::Win32::Security::Cryptography::{
        CryptProtectData, CryptUnprotectData, CRYPTPROTECT_UI_FORBIDDEN, CRYPT_INTEGER_BLOB,
    };
    use zeroize::Zeroizing;

    use super::BlobProtector;
    use crate::error::VaultError;
    use crate::storage::{BackendKind, SecretBytes};

    /// `CryptProtectData` scoped to the current user, never prompting.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct DpapiProtector;

    impl DpapiProtector {
        /// Round-trips a probe value so a broken DPAPI surfaces at startup.
        pub fn probe() -> Result<Self, VaultError> {
            let protector = DpapiProtector;
            protector
                .protect(b"credvault-probe")
                .and_then(|blob| protector.unprotect(&blob))
                .map_err(|e| VaultError::unavailable(BackendKind::WindowsDpapi, e.to_string()))?;
            Ok(protector)
        }
    }

    fn input_blob(data: &[u8]) -> Result<CRYPT_INTEGER_BLOB, VaultError> {
        let len = u32::try_from(data.len()).map_err(|_| VaultError::invalid("value too large"))?;
        Ok(CRYPT_INTEGER_BLOB {
            cbData: len,
            pbData: data.as_ptr() as *mut u8,
        })
    }

    /// Copy out and release a buffer allocated by DPAPI.
    ///
    /// # Safety
    /// `blob` must have been filled in by a successful DPAPI call.
    unsafe fn take_output(blob: CRYPT_INTEGER_BLOB) -> Vec<u8> {
        let out = std::slice::from_raw_parts(blob.pbData, blob.cbData as usize).to_vec();
        LocalFree(blob.pbData as _);
        out
    }

    impl BlobProtector for DpapiProtector {
        fn protect(&self, plaintext: &[u8]) -> Result<Vec<u8>, VaultError> {
            let input = input_blob(plaintext)?;
            let mut output = CRYPT_INTEGER_BLOB {
                cbData: 0,
                pbData: ptr::null_mut(),
            };
            // SAFETY: input points at live memory for the call; output is
            // written by DPAPI and released in take_output.
            let ok = unsafe {
                CryptProtectData(
                    &input,
                    ptr::null(),
                    ptr::null(),
                    ptr::null(),
                    ptr::null(),
                    CRYPTPROTECT_UI_FORBIDDEN,
                    &mut output,
                )
            };
            if ok == 0 {
                return Err(VaultError::Crypto(format!(
                    "CryptProtectData failed: {}",
                    std::io::Error::last_os_error()
                )));
            }
            Ok(unsafe { take_output(output) })
        }

        fn unprotect(&self, blob: &[u8]) -> Result<SecretBytes, VaultError> {
            let input = input_blob(blob)?;
            let mut output = CRYPT_INTEGER_BLOB {
                cbData: 0,
                pbData: ptr::null_mut(),
            };
            // SAFETY: as in protect.
            let ok = unsafe {
                CryptUnprotectData(
                    &input,
                    ptr::null_mut(),
                    ptr::null(),
                    ptr::null(),
                    ptr::null(),
                    CRYPTPROTECT_UI_FORBIDDEN,
                    &mut output,
                )
            };
            if ok == 0 {
                return Err(VaultError::Crypto(format!(
                    "CryptUnprotectData failed: {}",
                    std::io::Error::last_os_error()
                )));
            }
            Ok(Zeroizing::new(unsafe { take_output(output) }))
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use zeroize::Zeroizing;

    const MAGIC: &[u8] = b"FAKE";

    /// XOR "protection" with a header, so foreign bytes fail to unprotect.
    #[derive(Debug, Default)]
    pub(crate) struct FakeProtector;

    impl BlobProtector for FakeProtector {
        fn protect(&self, plaintext: &[u8]) -> Result<Vec<u8>, VaultError> {
            let mut out = MAGIC.to_vec();
            out.extend(plaintext.iter().map(|b| b ^ 0x5a));
            Ok(out)
        }

        fn unprotect(&self, blob: &[u8]) -> Result<SecretBytes, VaultError> {
            let body = blob
                .strip_prefix(MAGIC)
                .ok_or_else(|| VaultError::Crypto("bad blob header".to_string()))?;
            Ok(Zeroizing::new(body.iter().map(|b| b ^ 0x5a).collect()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeProtector;
    use super::*;

    fn backend() -> (tempfile::TempDir, ProtectedBlobBackend) {
        let dir = tempfile::tempdir().unwrap();
        let backend = ProtectedBlobBackend::open(dir.path(), Arc::new(FakeProtector)).unwrap();
        (dir, backend)
    }

    #[test]
    fn test_roundtrip_and_layout() {
        let (dir, store) = backend();
        store.put("user_data", b"{\"userId\":42}").unwrap();
        assert_eq!(
            store.get("user_data").unwrap().unwrap().as_slice(),
            b"{\"userId\":42}"
        );
        let expected = dir
            .path()
            .join("secret")
            .join("data")
            .join(format!("{}.dpapi", hex::encode("user_data")));
        assert!(expected.exists());
    }

    #[test]
    fn test_longest_key_roundtrip() {
        let (_dir, store) = backend();
        let key = "k".repeat(crate::keys::MAX_KEY_LEN);
        store.put(&key, b"v").unwrap();
        assert_eq!(store.get(&key).unwrap().unwrap().as_slice(), b"v");
    }

    #[test]
    fn test_foreign_blob_reads_absent() {
        let (_dir, store) = backend();
        store.put("access_token", b"A1").unwrap();
        fs::write(store.blob_path("access_token"), b"garbage").unwrap();
        assert!(store.get("access_token").unwrap().is_none());
    }

    #[test]
    fn test_clear_removes_blobs_and_strays() {
        let (_dir, store) = backend();
        store.put("access_token", b"A1").unwrap();
        store.put("custom", b"v").unwrap();
        let stray = store.data_dir().join("00.dpapi.tmp");
        fs::write(&stray, b"partial").unwrap();

        assert_eq!(store.list_known_keys().unwrap().len(), 2);
        store.clear().unwrap();
        store.clear().unwrap();
        assert!(store.list_known_keys().unwrap().is_empty());
        assert!(!stray.exists());
    }

    #[test]
    fn test_delete_absent_is_ok() {
        let (_dir, store) = backend();
        store.delete("refresh_token").unwrap();
        assert!(store.get("refresh_token").unwrap().is_none());
    }
}
