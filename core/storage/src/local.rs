//! Single-file local storage backend.

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::backend::{EncryptedPayload, StorageBackend};
use crate::format;
use prasword_common::{Error, Result};

/// Local file storage backend.
///
/// Stores the whole vault in one file using the layout in [`crate::format`].
/// Saves go to a sibling temporary file which is fsynced and renamed over the
/// target, so readers never observe a torn write.
pub struct LocalFileStore {
    path: PathBuf,
    /// Set once the file has been seen on disk; a later disappearance is
    /// reported as `StorageVanished` instead of silently recreating it.
    seen: AtomicBool,
}

impl LocalFileStore {
    /// Create a backend for the vault file at `path`.
    ///
    /// The file itself is not touched until the first load or save.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            seen: AtomicBool::new(false),
        }
    }

    /// Path of the vault file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fresh sibling temp path; unique per call so concurrent saves never
    /// share one.
    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "vault".to_string());
        self.path
            .with_file_name(format!(".{}.tmp-{}", name, Uuid::new_v4().simple()))
    }

    fn parent_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    async fn write_temp(&self, temp: &Path, bytes: &[u8]) -> io::Result<()> {
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            options.mode(0o600);
        }

        let mut file = options.open(temp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        Ok(())
    }
}

/// Atomically replace `destination` with `temp`.
///
/// `rename` replaces an existing destination on every supported platform
/// (`MoveFileExW` with `MOVEFILE_REPLACE_EXISTING` on Windows), so a failure
/// is final. Only the temp file is cleaned up; `destination` is never
/// touched.
async fn replace_file(temp: &Path, destination: &Path) -> io::Result<()> {
    if let Err(e) = fs::rename(temp, destination).await {
        let _ = fs::remove_file(temp).await;
        return Err(io::Error::new(
            e.kind(),
            format!("Atomic rename failed: {}", e),
        ));
    }
    Ok(())
}

#[async_trait]
impl StorageBackend for LocalFileStore {
    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }

    async fn exists(&self) -> Result<bool> {
        Ok(fs::try_exists(&self.path).await?)
    }

    async fn load_encrypted_payload(&self) -> Result<EncryptedPayload> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!(
                    "Vault file not found: {}",
                    self.path.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let payload = format::decode(&bytes)?;
        self.seen.store(true, Ordering::SeqCst);
        debug!(path = %self.path.display(), size = bytes.len(), "Vault file loaded");
        Ok(payload)
    }

    async fn save_encrypted_payload(&self, payload: &EncryptedPayload) -> Result<()> {
        let parent = self.parent_dir();
        if !fs::try_exists(&parent).await? {
            return Err(Error::StorageVanished(format!(
                "Directory no longer exists: {}",
                parent.display()
            )));
        }
        if self.seen.load(Ordering::SeqCst) && !fs::try_exists(&self.path).await? {
            return Err(Error::StorageVanished(format!(
                "Vault file was removed: {}",
                self.path.display()
            )));
        }

        let bytes = format::encode(payload);
        let temp = self.temp_path();

        if let Err(e) = self.write_temp(&temp, &bytes).await {
            warn!(path = %temp.display(), error = %e, "Failed to write temporary vault file");
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }
        replace_file(&temp, &self.path).await?;

        // Persist the rename itself.
        #[cfg(unix)]
        {
            if let Ok(dir) = fs::File::open(&parent).await {
                let _ = dir.sync_all().await;
            }
        }

        self.seen.store(true, Ordering::SeqCst);
        debug!(path = %self.path.display(), size = bytes.len(), "Vault file saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::FORMAT_VERSION;
    use prasword_crypto::{encrypt, KdfParams, Salt, SessionKey, KEY_LENGTH};
    use tempfile::TempDir;

    fn payload(plaintext: &[u8]) -> EncryptedPayload {
        let key = SessionKey::from_bytes([3u8; KEY_LENGTH]);
        EncryptedPayload {
            format_version: FORMAT_VERSION,
            kdf_params: KdfParams::minimal(),
            salt: Salt::generate(),
            sealed: encrypt(&key, plaintext).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let temp = TempDir::new().unwrap();
        let store = LocalFileStore::new(temp.path().join("vault.prsv"));
        let saved = payload(b"first");

        assert!(!store.exists().await.unwrap());
        store.save_encrypted_payload(&saved).await.unwrap();
        assert!(store.exists().await.unwrap());

        let loaded = store.load_encrypted_payload().await.unwrap();
        assert_eq!(loaded, saved);
    }

    #[tokio::test]
    async fn test_save_replaces_and_leaves_no_temp() {
        let temp = TempDir::new().unwrap();
        let store = LocalFileStore::new(temp.path().join("vault.prsv"));

        store.save_encrypted_payload(&payload(b"one")).await.unwrap();
        let second = payload(b"two");
        store.save_encrypted_payload(&second).await.unwrap();

        assert_eq!(store.load_encrypted_payload().await.unwrap(), second);
        let names: Vec<_> = std::fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }

    #[tokio::test]
    async fn test_stale_temp_file_does_not_affect_load() {
        let temp = TempDir::new().unwrap();
        let store = LocalFileStore::new(temp.path().join("vault.prsv"));
        let saved = payload(b"durable");
        store.save_encrypted_payload(&saved).await.unwrap();

        // A crash mid-save leaves a half-written temp file behind.
        std::fs::write(store.temp_path(), b"PRSV\x01").unwrap();

        assert_eq!(store.load_encrypted_payload().await.unwrap(), saved);
    }

    #[tokio::test]
    async fn test_failed_rename_keeps_previous_file() {
        let temp = TempDir::new().unwrap();
        let store = LocalFileStore::new(temp.path().join("vault.prsv"));
        store.save_encrypted_payload(&payload(b"keep me")).await.unwrap();
        let before = std::fs::read(store.path()).unwrap();

        // The temp file was never written, so the rename cannot succeed.
        let missing = store.temp_path();
        assert!(replace_file(&missing, store.path()).await.is_err());

        assert_eq!(std::fs::read(store.path()).unwrap(), before);
    }

    #[tokio::test]
    async fn test_concurrent_stores_do_not_share_temp_files() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("vault.prsv");
        let first = LocalFileStore::new(&path);
        let second = LocalFileStore::new(&path);
        assert_ne!(first.temp_path(), second.temp_path());

        let payload_a = payload(b"a");
        let payload_b = payload(b"b");
        let (a, b) = tokio::join!(
            first.save_encrypted_payload(&payload_a),
            second.save_encrypted_payload(&payload_b),
        );
        a.unwrap();
        b.unwrap();

        first.load_encrypted_payload().await.unwrap();
        let names: Vec<_> = std::fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }

    #[tokio::test]
    async fn test_load_missing_is_not_found() {
        let temp = TempDir::new().unwrap();
        let store = LocalFileStore::new(temp.path().join("absent.prsv"));

        assert!(matches!(
            store.load_encrypted_payload().await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_load_foreign_file_is_unsupported() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("notes.txt");
        std::fs::write(&path, b"just some text, definitely not a vault").unwrap();

        let store = LocalFileStore::new(&path);
        assert!(matches!(
            store.load_encrypted_payload().await,
            Err(Error::UnsupportedFormat(_))
        ));
    }

    #[tokio::test]
    async fn test_save_after_file_removed_reports_vanished() {
        let temp = TempDir::new().unwrap();
        let store = LocalFileStore::new(temp.path().join("vault.prsv"));
        store.save_encrypted_payload(&payload(b"a")).await.unwrap();

        std::fs::remove_file(store.path()).unwrap();

        assert!(matches!(
            store.save_encrypted_payload(&payload(b"b")).await,
            Err(Error::StorageVanished(_))
        ));
    }

    #[tokio::test]
    async fn test_save_into_missing_directory_reports_vanished() {
        let temp = TempDir::new().unwrap();
        let store = LocalFileStore::new(temp.path().join("gone").join("vault.prsv"));

        assert!(matches!(
            store.save_encrypted_payload(&payload(b"a")).await,
            Err(Error::StorageVanished(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let store = LocalFileStore::new(temp.path().join("vault.prsv"));
        store.save_encrypted_payload(&payload(b"a")).await.unwrap();

        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
