//! In-memory storage backend for testing.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::backend::{EncryptedPayload, StorageBackend};
use crate::format;
use prasword_common::{Error, Result};

#[derive(Default)]
struct Shared {
    payload: Mutex<Option<EncryptedPayload>>,
    fail_saves: AtomicBool,
    vanished: AtomicBool,
    saves: AtomicUsize,
}

/// In-memory storage backend.
///
/// Useful for testing and development. Clones share the same slot, so a
/// test can keep a handle, hand a clone to a session, and inspect what was
/// persisted. Failures can be injected to exercise rollback paths.
#[derive(Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent saves fail with an I/O error until cleared.
    pub fn set_fail_saves(&self, fail: bool) {
        self.shared.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Simulate the target disappearing: loads report `NotFound`, saves
    /// report `StorageVanished`.
    pub fn set_vanished(&self, vanished: bool) {
        self.shared.vanished.store(vanished, Ordering::SeqCst);
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> usize {
        self.shared.saves.load(Ordering::SeqCst)
    }

    /// Snapshot of the currently stored payload.
    pub fn stored(&self) -> Option<EncryptedPayload> {
        self.slot().ok().and_then(|slot| slot.clone())
    }

    /// Overwrite the stored payload directly, bypassing save bookkeeping.
    pub fn replace(&self, payload: Option<EncryptedPayload>) {
        if let Ok(mut slot) = self.slot() {
            *slot = payload;
        }
    }

    fn slot(&self) -> Result<std::sync::MutexGuard<'_, Option<EncryptedPayload>>> {
        self.shared
            .payload
            .lock()
            .map_err(|_| Error::Storage("Memory store poisoned".to_string()))
    }
}

#[async_trait]
impl StorageBackend for MemoryStore {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    async fn exists(&self) -> Result<bool> {
        if self.shared.vanished.load(Ordering::SeqCst) {
            return Ok(false);
        }
        Ok(self.slot()?.is_some())
    }

    async fn load_encrypted_payload(&self) -> Result<EncryptedPayload> {
        if self.shared.vanished.load(Ordering::SeqCst) {
            return Err(Error::NotFound("Memory vault vanished".to_string()));
        }
        let payload = self
            .slot()?
            .clone()
            .ok_or_else(|| Error::NotFound("No vault stored in memory".to_string()))?;

        if !format::is_supported(payload.format_version) {
            return Err(Error::UnsupportedFormat(format!(
                "Vault format version {} is not supported",
                payload.format_version
            )));
        }
        payload.kdf_params.check_stored()?;
        Ok(payload)
    }

    async fn save_encrypted_payload(&self, payload: &EncryptedPayload) -> Result<()> {
        if self.shared.vanished.load(Ordering::SeqCst) {
            return Err(Error::StorageVanished("Memory vault vanished".to_string()));
        }
        if self.shared.fail_saves.load(Ordering::SeqCst) {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "Injected save failure",
            )));
        }

        *self.slot()? = Some(payload.clone());
        self.shared.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
