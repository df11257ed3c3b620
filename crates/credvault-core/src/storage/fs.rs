//! File helpers shared by the blob-per-key backends.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use rand::{rngs::OsRng, RngCore};

/// Suffix for in-flight writes; leftovers are swept by `clear()`
pub const TMP_SUFFIX: &str = "tmp";

/// Random bytes in each temp name, so concurrent writers never share one
const TMP_NONCE_LEN: usize = 8;

/// Create `dir` (and parents) restricted to the current user.
pub fn ensure_private_dir(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

/// Restrict `path` to owner read/write. No-op where POSIX modes don't exist.
pub fn set_owner_only(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

/// Write `bytes` to a sibling temp file, then rename it over `path`.
/// Readers see either the old blob or the new one, never a partial write.
/// Each call gets its own temp file; concurrent writers of one key race only
/// on the rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = tmp_path(path);
    let mut f = fs::OpenOptions::new().write(true).create_new(true).open(&tmp)?;
    let written = set_owner_only(&tmp)
        .and_then(|()| f.write_all(bytes))
        .and_then(|()| f.sync_all());
    drop(f);
    if let Err(e) = written.and_then(|()| fs::rename(&tmp, path)) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

/// Overwrite a file with random bytes of the same length, then unlink it.
/// Missing files are fine.
pub fn shred_and_remove(path: &Path) -> io::Result<()> {
    let len = match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if len > 0 && len < u32::MAX as u64 {
        let mut noise = vec![0u8; len as usize];
        OsRng.fill_bytes(&mut noise);
        // Best effort: the unlink below is what matters.
        if let Ok(mut f) = fs::OpenOptions::new().write(true).open(path) {
            let _ = f.write_all(&noise);
            let _ = f.sync_all();
        }
    }
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Blob file name for a logical key: hex of the key bytes plus `ext`.
/// Reversible, so the directory listing yields the exact keys back.
pub fn blob_file_name(key: &str, ext: &str) -> String {
    format!("{}.{}", hex::encode(key.as_bytes()), ext)
}

/// Inverse of [`blob_file_name`]; `None` for files this backend didn't write.
pub fn key_from_file_name(name: &str, ext: &str) -> Option<String> {
    let stem = name.strip_suffix(ext)?.strip_suffix('.')?;
    let bytes = hex::decode(stem).ok()?;
    String::from_utf8(bytes).ok()
}

/// Every blob with extension `ext` in `dir`, plus stray temp files.
pub fn list_blobs(dir: &Path, ext: &str) -> io::Result<(Vec<(String, PathBuf)>, Vec<PathBuf>)> {
    let mut blobs = Vec::new();
    let mut stray = Vec::new();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((blobs, stray)),
        Err(e) => return Err(e),
    };
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if is_tmp_name(name, ext) {
            stray.push(entry.path());
        } else if let Some(key) = key_from_file_name(name, ext) {
            blobs.push((key, entry.path()));
        }
    }
    blobs.sort();
    Ok((blobs, stray))
}

/// `<blob>.<random hex>.tmp` next to `path`.
fn tmp_path(path: &Path) -> PathBuf {
    let mut nonce = [0u8; TMP_NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{}.{}", hex::encode(nonce), TMP_SUFFIX));
    path.with_file_name(name)
}

fn is_tmp_name(name: &str, ext: &str) -> bool {
    name.strip_suffix(TMP_SUFFIX)
        .and_then(|rest| rest.strip_suffix('.'))
        .is_some_and(|rest| {
            rest.ends_with(&format!(".{}", ext)) || rest.contains(&format!(".{}.", ext))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_file_name_roundtrip() {
        let name = blob_file_name("access_token", "enc");
        assert_eq!(name, "6163636573735f746f6b656e.enc");
        assert_eq!(key_from_file_name(&name, "enc").as_deref(), Some("access_token"));
    }

    #[test]
    fn test_key_from_foreign_file_name() {
        assert_eq!(key_from_file_name("keys.json", "enc"), None);
        assert_eq!(key_from_file_name("zz.enc", "enc"), None);
        assert_eq!(key_from_file_name("616263.dpapi", "enc"), None);
    }

    #[test]
    fn test_write_atomic_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.enc");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");
        let (_, stray) = list_blobs(dir.path(), "enc").unwrap();
        assert!(stray.is_empty());
    }

    #[test]
    fn test_tmp_paths_are_unique() {
        let path = Path::new("/vault/6162.enc");
        let a = tmp_path(path);
        let b = tmp_path(path);
        assert_ne!(a, b);
        let name = a.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("6162.enc."));
        assert!(is_tmp_name(name, "enc"));
        assert!(!is_tmp_name(name, "dpapi"));
    }

    #[test]
    fn test_concurrent_writers_of_one_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(blob_file_name("access_token", "enc"));
        let payloads: Vec<Vec<u8>> = (0..8u8).map(|i| vec![i; 4096]).collect();

        std::thread::scope(|scope| {
            for payload in &payloads {
                let path = &path;
                scope.spawn(move || {
                    for _ in 0..100 {
                        write_atomic(path, payload).unwrap();
                        let read = fs::read(path).unwrap();
                        assert_eq!(read.len(), 4096);
                        assert!(read.iter().all(|b| *b == read[0]));
                    }
                });
            }
        });

        let (blobs, stray) = list_blobs(dir.path(), "enc").unwrap();
        assert_eq!(blobs.len(), 1);
        assert!(stray.is_empty());
    }

    #[test]
    fn test_shred_and_remove_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nothing.enc");
        shred_and_remove(&path).unwrap();
        fs::write(&path, b"data").unwrap();
        shred_and_remove(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_list_blobs_separates_strays() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(blob_file_name("a", "enc")), b"1").unwrap();
        fs::write(dir.path().join(format!("{}.00ff00ff00ff00ff.tmp", blob_file_name("b", "enc"))), b"2").unwrap();
        fs::write(dir.path().join("unrelated.txt"), b"3").unwrap();

        let (blobs, stray) = list_blobs(dir.path(), "enc").unwrap();
        assert_eq!(blobs.len(), 1);
        assert_eq!(blobs[0].0, "a");
        assert_eq!(stray.len(), 1);
    }
}
