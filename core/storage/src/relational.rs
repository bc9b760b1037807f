//! Relational storage backend.
//!
//! One logical vault maps to one row of `vault_payloads`, keyed by vault
//! name, holding the same fields the file header carries. The connection is
//! resolved by the caller; this module never parses connection strings.
//!
//! The backend talks to the database through [`RelationalConnection`].
//! SQLite (via `rusqlite`) is the bundled driver; a server-backed driver
//! plugs in by implementing the same trait.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use crate::backend::{EncryptedPayload, StorageBackend};
use crate::format;
use prasword_common::{Error, Result, VaultId};
use prasword_crypto::{KdfParams, Salt, Sealed, NONCE_SIZE, TAG_SIZE};

/// Shared handle to an open database connection.
pub type RelationalHandle = Arc<Mutex<dyn RelationalConnection>>;

/// Column values of one vault row, unvalidated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadRow {
    pub format_version: u16,
    pub memory_cost: u32,
    pub time_cost: u32,
    pub parallelism: u32,
    pub salt: Vec<u8>,
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
    pub tag: Vec<u8>,
}

impl PayloadRow {
    /// Split a payload into columns.
    pub fn from_payload(payload: &EncryptedPayload) -> Self {
        Self {
            format_version: payload.format_version,
            memory_cost: payload.kdf_params.memory_cost,
            time_cost: payload.kdf_params.time_cost,
            parallelism: payload.kdf_params.parallelism,
            salt: payload.salt.as_bytes().to_vec(),
            nonce: payload.sealed.nonce().to_vec(),
            ciphertext: payload.sealed.ciphertext().to_vec(),
            tag: payload.sealed.tag().to_vec(),
        }
    }

    /// Validate the columns and rebuild the payload.
    ///
    /// # Errors
    /// - `UnsupportedFormat` for an unknown version, KDF costs out of range
    ///   or malformed binary columns
    pub fn into_payload(self) -> Result<EncryptedPayload> {
        // Version is checked before any cryptographic column is interpreted.
        if !format::is_supported(self.format_version) {
            return Err(Error::UnsupportedFormat(format!(
                "Vault format version {} is not supported (expected {})",
                self.format_version,
                format::FORMAT_VERSION
            )));
        }

        let kdf_params = KdfParams {
            memory_cost: self.memory_cost,
            time_cost: self.time_cost,
            parallelism: self.parallelism,
        };
        kdf_params.check_stored()?;

        let salt = Salt::from_slice(&self.salt)
            .ok_or_else(|| Error::UnsupportedFormat("Malformed salt column".to_string()))?;
        let nonce: [u8; NONCE_SIZE] = self
            .nonce
            .as_slice()
            .try_into()
            .map_err(|_| Error::UnsupportedFormat("Malformed nonce column".to_string()))?;
        let tag: [u8; TAG_SIZE] = self
            .tag
            .as_slice()
            .try_into()
            .map_err(|_| Error::UnsupportedFormat("Malformed tag column".to_string()))?;

        Ok(EncryptedPayload {
            format_version: self.format_version,
            kdf_params,
            salt,
            sealed: Sealed::from_parts(nonce, self.ciphertext, tag),
        })
    }
}

/// Database operations the relational backend needs.
///
/// Calls are blocking; the backend runs them on the blocking pool.
pub trait RelationalConnection: Send {
    /// Create the `vault_payloads` table if it does not exist.
    fn ensure_schema(&mut self) -> Result<()>;

    /// Whether a row exists for `vault`.
    fn row_exists(&mut self, vault: &str) -> Result<bool>;

    /// Fetch the row for `vault`, if any.
    fn load_row(&mut self, vault: &str) -> Result<Option<PayloadRow>>;

    /// Insert or replace the row for `vault` in a single transaction.
    ///
    /// With `must_exist` set, a missing row fails with `StorageVanished`
    /// and nothing is written. On any error the previous row is untouched.
    fn upsert_row_in_tx(&mut self, vault: &str, row: &PayloadRow, must_exist: bool) -> Result<()>;
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS vault_payloads (
    vault_name TEXT PRIMARY KEY,
    format_version INTEGER NOT NULL,
    kdf_memory_cost INTEGER NOT NULL,
    kdf_time_cost INTEGER NOT NULL,
    kdf_parallelism INTEGER NOT NULL,
    salt BLOB NOT NULL,
    nonce BLOB NOT NULL,
    ciphertext BLOB NOT NULL,
    tag BLOB NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

fn sqlite_error(e: rusqlite::Error) -> Error {
    Error::Storage(format!("SQLite error: {}", e))
}

impl RelationalConnection for Connection {
    fn ensure_schema(&mut self) -> Result<()> {
        self.execute_batch(SCHEMA).map_err(sqlite_error)
    }

    fn row_exists(&mut self, vault: &str) -> Result<bool> {
        let found: Option<i64> = self
            .query_row(
                "SELECT 1 FROM vault_payloads WHERE vault_name = ?1",
                params![vault],
                |row| row.get(0),
            )
            .optional()
            .map_err(sqlite_error)?;
        Ok(found.is_some())
    }

    fn load_row(&mut self, vault: &str) -> Result<Option<PayloadRow>> {
        self.query_row(
            r#"
            SELECT format_version, kdf_memory_cost, kdf_time_cost, kdf_parallelism,
                   salt, nonce, ciphertext, tag
            FROM vault_payloads WHERE vault_name = ?1
            "#,
            params![vault],
            |row| {
                Ok(PayloadRow {
                    format_version: row.get(0)?,
                    memory_cost: row.get(1)?,
                    time_cost: row.get(2)?,
                    parallelism: row.get(3)?,
                    salt: row.get(4)?,
                    nonce: row.get(5)?,
                    ciphertext: row.get(6)?,
                    tag: row.get(7)?,
                })
            },
        )
        .optional()
        .map_err(sqlite_error)
    }

    fn upsert_row_in_tx(&mut self, vault: &str, row: &PayloadRow, must_exist: bool) -> Result<()> {
        let tx = self.transaction().map_err(sqlite_error)?;

        if must_exist {
            let present: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM vault_payloads WHERE vault_name = ?1",
                    params![vault],
                    |r| r.get(0),
                )
                .optional()
                .map_err(sqlite_error)?;
            if present.is_none() {
                return Err(Error::StorageVanished(format!(
                    "Vault row '{}' was removed",
                    vault
                )));
            }
        }

        tx.execute(
            r#"
            INSERT INTO vault_payloads
                (vault_name, format_version, kdf_memory_cost, kdf_time_cost,
                 kdf_parallelism, salt, nonce, ciphertext, tag, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(vault_name) DO UPDATE SET
                format_version = excluded.format_version,
                kdf_memory_cost = excluded.kdf_memory_cost,
                kdf_time_cost = excluded.kdf_time_cost,
                kdf_parallelism = excluded.kdf_parallelism,
                salt = excluded.salt,
                nonce = excluded.nonce,
                ciphertext = excluded.ciphertext,
                tag = excluded.tag,
                updated_at = excluded.updated_at
            "#,
            params![
                vault,
                row.format_version,
                row.memory_cost,
                row.time_cost,
                row.parallelism,
                row.salt,
                row.nonce,
                row.ciphertext,
                row.tag,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(sqlite_error)?;

        // Dropping an uncommitted transaction rolls it back.
        tx.commit().map_err(sqlite_error)
    }
}

/// Relational storage backend over a caller-supplied connection.
pub struct RelationalStore {
    handle: RelationalHandle,
    vault: VaultId,
    seen: Arc<AtomicBool>,
}

impl RelationalStore {
    /// Attach to a vault row, creating the table if needed.
    ///
    /// # Errors
    /// - `Storage` if the schema cannot be created
    pub fn attach(handle: RelationalHandle, vault: VaultId) -> Result<Self> {
        lock(&handle)?.ensure_schema()?;
        Ok(Self {
            handle,
            vault,
            seen: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Name of the vault row.
    pub fn vault(&self) -> &VaultId {
        &self.vault
    }

    /// Run a closure against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn RelationalConnection) -> Result<T> + Send + 'static,
    {
        let handle = self.handle.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = lock(&handle)?;
            f(&mut *conn)
        })
        .await
        .map_err(|e| Error::Storage(format!("Database task failed: {}", e)))?
    }
}

fn lock(handle: &RelationalHandle) -> Result<MutexGuard<'_, dyn RelationalConnection + 'static>> {
    handle
        .lock()
        .map_err(|_| Error::Storage("Database connection poisoned".to_string()))
}

#[async_trait]
impl StorageBackend for RelationalStore {
    fn describe(&self) -> String {
        format!("relational:{}", self.vault)
    }

    async fn exists(&self) -> Result<bool> {
        let name = self.vault.as_str().to_string();
        self.with_conn(move |conn| conn.row_exists(&name)).await
    }

    async fn load_encrypted_payload(&self) -> Result<EncryptedPayload> {
        let name = self.vault.as_str().to_string();
        let row = self.with_conn(move |conn| conn.load_row(&name)).await?;

        let row = row.ok_or_else(|| {
            Error::NotFound(format!("No vault named '{}' in database", self.vault))
        })?;
        let payload = row.into_payload()?;
        self.seen.store(true, Ordering::SeqCst);
        debug!(vault = %self.vault, "Vault row loaded");
        Ok(payload)
    }

    async fn save_encrypted_payload(&self, payload: &EncryptedPayload) -> Result<()> {
        let name = self.vault.as_str().to_string();
        let row = PayloadRow::from_payload(payload);
        let must_exist = self.seen.load(Ordering::SeqCst);

        self.with_conn(move |conn| conn.upsert_row_in_tx(&name, &row, must_exist))
            .await?;

        self.seen.store(true, Ordering::SeqCst);
        debug!(vault = %self.vault, "Vault row saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::FORMAT_VERSION;
    use prasword_crypto::{encrypt, SessionKey, KEY_LENGTH};

    fn database() -> Arc<Mutex<Connection>> {
        Arc::new(Mutex::new(Connection::open_in_memory().unwrap()))
    }

    fn payload(plaintext: &[u8]) -> EncryptedPayload {
        let key = SessionKey::from_bytes([2u8; KEY_LENGTH]);
        EncryptedPayload {
            format_version: FORMAT_VERSION,
            kdf_params: KdfParams::minimal(),
            salt: Salt::generate(),
            sealed: encrypt(&key, plaintext).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let store = RelationalStore::attach(database(), VaultId::new("personal").unwrap()).unwrap();
        let saved = payload(b"row");

        assert!(!store.exists().await.unwrap());
        store.save_encrypted_payload(&saved).await.unwrap();
        assert!(store.exists().await.unwrap());
        assert_eq!(store.load_encrypted_payload().await.unwrap(), saved);
    }

    #[tokio::test]
    async fn test_vaults_are_isolated_by_name() {
        let db = database();
        let work = RelationalStore::attach(db.clone(), VaultId::new("work").unwrap()).unwrap();
        let home = RelationalStore::attach(db, VaultId::new("home").unwrap()).unwrap();

        let work_payload = payload(b"work");
        let home_payload = payload(b"home");
        work.save_encrypted_payload(&work_payload).await.unwrap();
        home.save_encrypted_payload(&home_payload).await.unwrap();
        work.save_encrypted_payload(&work_payload).await.unwrap();

        assert_eq!(work.load_encrypted_payload().await.unwrap(), work_payload);
        assert_eq!(home.load_encrypted_payload().await.unwrap(), home_payload);
    }

    #[tokio::test]
    async fn test_missing_row_is_not_found() {
        let store = RelationalStore::attach(database(), VaultId::new("none").unwrap()).unwrap();
        assert!(matches!(
            store.load_encrypted_payload().await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_unsupported_version_rejected() {
        let db = database();
        let store = RelationalStore::attach(db.clone(), VaultId::new("v").unwrap()).unwrap();
        store.save_encrypted_payload(&payload(b"x")).await.unwrap();

        db.lock()
            .unwrap()
            .execute("UPDATE vault_payloads SET format_version = 99", [])
            .unwrap();

        assert!(matches!(
            store.load_encrypted_payload().await,
            Err(Error::UnsupportedFormat(_))
        ));
    }

    #[tokio::test]
    async fn test_oversized_kdf_cost_rejected() {
        let db = database();
        let store = RelationalStore::attach(db.clone(), VaultId::new("v").unwrap()).unwrap();
        store.save_encrypted_payload(&payload(b"x")).await.unwrap();

        db.lock()
            .unwrap()
            .execute(
                "UPDATE vault_payloads SET kdf_memory_cost = kdf_memory_cost | 2147483648",
                [],
            )
            .unwrap();

        assert!(matches!(
            store.load_encrypted_payload().await,
            Err(Error::UnsupportedFormat(_))
        ));
    }

    #[tokio::test]
    async fn test_deleted_row_reports_vanished() {
        let db = database();
        let store = RelationalStore::attach(db.clone(), VaultId::new("v").unwrap()).unwrap();
        store.save_encrypted_payload(&payload(b"x")).await.unwrap();

        db.lock()
            .unwrap()
            .execute("DELETE FROM vault_payloads", [])
            .unwrap();

        assert!(matches!(
            store.save_encrypted_payload(&payload(b"y")).await,
            Err(Error::StorageVanished(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_update_keeps_previous_row() {
        let db = database();
        let store = RelationalStore::attach(db.clone(), VaultId::new("v").unwrap()).unwrap();
        let first = payload(b"first");
        store.save_encrypted_payload(&first).await.unwrap();

        db.lock()
            .unwrap()
            .execute_batch(
                r#"
                CREATE TRIGGER refuse_update BEFORE UPDATE ON vault_payloads
                BEGIN
                    SELECT RAISE(ABORT, 'read-only');
                END;
                "#,
            )
            .unwrap();

        assert!(matches!(
            store.save_encrypted_payload(&payload(b"second")).await,
            Err(Error::Storage(_))
        ));
        assert_eq!(store.load_encrypted_payload().await.unwrap(), first);
    }

    /// Connection that keeps rows in a map, standing in for another driver.
    #[derive(Default)]
    struct MapConnection {
        rows: std::collections::HashMap<String, PayloadRow>,
    }

    impl RelationalConnection for MapConnection {
        fn ensure_schema(&mut self) -> Result<()> {
            Ok(())
        }

        fn row_exists(&mut self, vault: &str) -> Result<bool> {
            Ok(self.rows.contains_key(vault))
        }

        fn load_row(&mut self, vault: &str) -> Result<Option<PayloadRow>> {
            Ok(self.rows.get(vault).cloned())
        }

        fn upsert_row_in_tx(&mut self, vault: &str, row: &PayloadRow, must_exist: bool) -> Result<()> {
            if must_exist && !self.rows.contains_key(vault) {
                return Err(Error::StorageVanished(vault.to_string()));
            }
            self.rows.insert(vault.to_string(), row.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_other_driver_plugs_in() {
        let handle: RelationalHandle = Arc::new(Mutex::new(MapConnection::default()));
        let store = RelationalStore::attach(handle, VaultId::new("team").unwrap()).unwrap();
        let saved = payload(b"elsewhere");

        store.save_encrypted_payload(&saved).await.unwrap();
        assert_eq!(store.load_encrypted_payload().await.unwrap(), saved);
    }
}
