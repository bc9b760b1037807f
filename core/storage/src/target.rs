//! Storage target resolution.
//!
//! Callers name where a vault lives with a [`StorageTarget`]; the session
//! turns it into a backend once and never looks at the target again.

use std::path::PathBuf;
use std::sync::Arc;

use crate::backend::StorageBackend;
use crate::local::LocalFileStore;
use crate::memory::MemoryStore;
use crate::relational::{RelationalHandle, RelationalStore};
use prasword_common::{Result, VaultId};

/// Where a vault is persisted.
#[derive(Clone)]
pub enum StorageTarget {
    /// A single file on the local filesystem.
    File(PathBuf),
    /// A named row in a relational database reached through `handle`.
    Relational {
        handle: RelationalHandle,
        vault_name: String,
    },
    /// Process memory (tests and tooling).
    Memory(MemoryStore),
}

impl StorageTarget {
    /// Short description of the target, safe to log.
    pub fn describe(&self) -> String {
        match self {
            StorageTarget::File(path) => format!("file:{}", path.display()),
            StorageTarget::Relational { vault_name, .. } => format!("relational:{}", vault_name),
            StorageTarget::Memory(_) => "memory".to_string(),
        }
    }

    /// Resolve the target into a backend.
    ///
    /// # Errors
    /// - `InvalidInput` if a relational vault name is empty
    /// - `Storage` if the relational schema cannot be created
    pub fn into_backend(self) -> Result<Arc<dyn StorageBackend>> {
        match self {
            StorageTarget::File(path) => Ok(Arc::new(LocalFileStore::new(path))),
            StorageTarget::Relational { handle, vault_name } => {
                let vault = VaultId::new(vault_name)?;
                Ok(Arc::new(RelationalStore::attach(handle, vault)?))
            }
            StorageTarget::Memory(store) => Ok(Arc::new(store)),
        }
    }
}

impl std::fmt::Debug for StorageTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("StorageTarget").field(&self.describe()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prasword_common::Error;
    use rusqlite::Connection;
    use std::sync::Mutex;

    #[test]
    fn test_file_target_resolves() {
        let target = StorageTarget::File(PathBuf::from("/tmp/personal.prsv"));
        assert_eq!(target.describe(), "file:/tmp/personal.prsv");

        let backend = target.into_backend().unwrap();
        assert_eq!(backend.describe(), "file:/tmp/personal.prsv");
    }

    #[test]
    fn test_relational_target_requires_name() {
        let handle = Arc::new(Mutex::new(Connection::open_in_memory().unwrap()));
        let target = StorageTarget::Relational {
            handle,
            vault_name: "   ".to_string(),
        };

        assert!(matches!(target.into_backend(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_relational_target_resolves() {
        let handle = Arc::new(Mutex::new(Connection::open_in_memory().unwrap()));
        let target = StorageTarget::Relational {
            handle,
            vault_name: "team".to_string(),
        };

        assert_eq!(target.into_backend().unwrap().describe(), "relational:team");
    }

    #[tokio::test]
    async fn test_memory_target_shares_store() {
        let store = MemoryStore::new();
        let backend = StorageTarget::Memory(store.clone()).into_backend().unwrap();

        assert!(!backend.exists().await.unwrap());
        assert_eq!(store.save_count(), 0);
    }
}
