//! Vault session management.
//!
//! A session owns the derived key and the decrypted model while unlocked.
//! Every path out of the unlocked state drops both, which zeroizes the key
//! and every secret the model held.
//!
//! Mutations, open and lock are serialized through one async mutex. Reads
//! take a short synchronous lock on the current phase and never wait on a
//! save in progress.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use subtle::ConstantTimeEq;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::config::SessionConfig;
use crate::export::{self, PlaintextExport};
use crate::model::{Entry, EntryPatch, Group, NewEntry, RemovePolicy, VaultModel};
use crate::search::SearchIndex;
use prasword_common::{EntryId, Error, GroupId, Result};
use prasword_crypto::{decrypt, derive_key, encrypt, KdfParams, Salt, SessionKey};
use prasword_storage::{EncryptedPayload, StorageBackend, StorageTarget, FORMAT_VERSION};

/// Observable state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No key in memory.
    Locked,
    /// An `open` or `create` is in progress.
    Unlocking,
    /// Key and model are live.
    Unlocked,
    /// Storage disappeared mid-session. Only a fresh `open` leaves this state.
    Error,
}

/// Summary of the unlocked vault, free of secrets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultInfo {
    pub backend: String,
    pub format_version: u16,
    pub kdf_params: KdfParams,
    pub groups: usize,
    pub entries: usize,
}

struct UnlockedVault {
    key: SessionKey,
    model: VaultModel,
    index: SearchIndex,
    backend: Arc<dyn StorageBackend>,
    salt: Salt,
    kdf_params: KdfParams,
    last_activity: Instant,
}

enum Phase {
    Locked,
    Unlocking,
    Unlocked(Box<UnlockedVault>),
    Failed(String),
}

impl Phase {
    fn state(&self) -> SessionState {
        match self {
            Phase::Locked => SessionState::Locked,
            Phase::Unlocking => SessionState::Unlocking,
            Phase::Unlocked(_) => SessionState::Unlocked,
            Phase::Failed(_) => SessionState::Error,
        }
    }
}

/// How the search index follows a committed mutation.
enum IndexPatch {
    Unchanged,
    Upsert(EntryId),
    Remove(Vec<EntryId>),
    Rebuild,
}

struct Inner {
    config: SessionConfig,
    phase: RwLock<Phase>,
    ops: Mutex<()>,
    /// Bumped on every unlock and lock so stale idle timers exit.
    generation: AtomicU64,
}

impl Inner {
    fn read(&self) -> RwLockReadGuard<'_, Phase> {
        self.phase.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Phase> {
        self.phase.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop the unlocked vault, if any. Caller holds `ops`.
    fn lock_now(&self, reason: &str) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let previous = {
            let mut phase = self.write();
            if !matches!(*phase, Phase::Unlocked(_)) {
                return;
            }
            std::mem::replace(&mut *phase, Phase::Locked)
        };
        drop(previous);
        info!(reason, "Vault locked");
    }

    /// Enter the terminal error state, discarding the key.
    fn fail(&self, message: String) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let previous = std::mem::replace(&mut *self.write(), Phase::Failed(message));
        drop(previous);
    }

    fn idle_deadline(&self, generation: u64) -> Option<Instant> {
        if self.generation.load(Ordering::SeqCst) != generation {
            return None;
        }
        match &*self.read() {
            Phase::Unlocked(vault) => Some(vault.last_activity + self.config.idle_timeout),
            _ => None,
        }
    }
}

/// Returns the session to `Locked` unless the unlock completed. Dropping an
/// `open` future mid-flight runs this.
struct UnlockingGuard<'a> {
    inner: &'a Inner,
    armed: bool,
}

impl Drop for UnlockingGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut phase = self.inner.write();
        if matches!(*phase, Phase::Unlocking) {
            *phase = Phase::Locked;
        }
        debug!("Unlock abandoned");
    }
}

/// Handle to a vault session.
///
/// Cheap to clone; all clones share one state. The key never leaves the
/// session and is never logged.
#[derive(Clone)]
pub struct VaultSession {
    inner: Arc<Inner>,
}

impl VaultSession {
    /// Create a locked session.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                phase: RwLock::new(Phase::Locked),
                ops: Mutex::new(()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.inner.read().state()
    }

    pub fn is_unlocked(&self) -> bool {
        self.state() == SessionState::Unlocked
    }

    /// Reason the session entered the error state, if it did.
    pub fn last_error(&self) -> Option<String> {
        match &*self.inner.read() {
            Phase::Failed(message) => Some(message.clone()),
            _ => None,
        }
    }

    // -- lifecycle -----------------------------------------------------------

    /// Create a new vault at `target` and unlock it.
    ///
    /// # Errors
    /// - `WeakInput` for an empty passphrase
    /// - `AlreadyExists` if the target already holds a vault
    /// - `Io`/`Storage` if the first save fails
    pub async fn create(
        &self,
        passphrase: &[u8],
        target: StorageTarget,
        root_name: &str,
    ) -> Result<()> {
        let backend = target.into_backend()?;
        self.create_with_backend(passphrase, backend, root_name).await
    }

    /// Like [`create`](Self::create) with an already resolved backend.
    pub async fn create_with_backend(
        &self,
        passphrase: &[u8],
        backend: Arc<dyn StorageBackend>,
        root_name: &str,
    ) -> Result<()> {
        if passphrase.is_empty() {
            return Err(Error::WeakInput("Passphrase cannot be empty".to_string()));
        }
        let model = VaultModel::new(root_name)?;

        let _ops = self.inner.ops.lock().await;
        self.inner.lock_now("create");
        if backend.exists().await? {
            return Err(Error::AlreadyExists(format!(
                "A vault already exists at {}",
                backend.describe()
            )));
        }

        let guard = self.begin_unlocking();
        let salt = Salt::generate();
        let kdf_params = self.inner.config.kdf_params;
        let key = derive_blocking(passphrase, salt.clone(), kdf_params).await?;

        let payload = seal(&key, &model, &salt, kdf_params)?;
        backend.save_encrypted_payload(&payload).await?;
        info!(backend = %backend.describe(), "Vault created");

        self.install(
            guard,
            UnlockedVault {
                index: SearchIndex::build(&model),
                key,
                model,
                backend,
                salt,
                kdf_params,
                last_activity: Instant::now(),
            },
        );
        Ok(())
    }

    /// Unlock the vault stored at `target`.
    ///
    /// An already unlocked vault is locked first. On any failure the session
    /// ends `Locked`; dropping the returned future does the same.
    ///
    /// # Errors
    /// - `Authentication` for a wrong passphrase or tampered payload
    /// - `NotFound` if the target holds no vault
    /// - `UnsupportedFormat`/`Corruption` for unreadable payloads
    /// - `Io`/`Storage` for backend failures
    pub async fn open(&self, passphrase: &[u8], target: StorageTarget) -> Result<()> {
        let backend = target.into_backend()?;
        self.open_with_backend(passphrase, backend).await
    }

    /// Like [`open`](Self::open) with an already resolved backend.
    pub async fn open_with_backend(
        &self,
        passphrase: &[u8],
        backend: Arc<dyn StorageBackend>,
    ) -> Result<()> {
        let _ops = self.inner.ops.lock().await;
        self.inner.lock_now("reopen");
        let guard = self.begin_unlocking();

        let payload = backend.load_encrypted_payload().await?;
        payload.kdf_params.check_stored()?;
        let key = derive_blocking(passphrase, payload.salt.clone(), payload.kdf_params).await?;
        let model = {
            let plaintext = decrypt(&key, &payload.sealed)?;
            VaultModel::from_bytes(&plaintext)?
        };
        let index = SearchIndex::build(&model);

        info!(
            backend = %backend.describe(),
            groups = model.group_count(),
            entries = model.len(),
            "Vault unlocked"
        );
        self.install(
            guard,
            UnlockedVault {
                key,
                model,
                index,
                backend,
                salt: payload.salt,
                kdf_params: payload.kdf_params,
                last_activity: Instant::now(),
            },
        );
        Ok(())
    }

    /// Lock the session, clearing the key, model and index.
    pub async fn lock(&self) {
        let _ops = self.inner.ops.lock().await;
        self.inner.lock_now("explicit");
    }

    /// Re-encrypt the vault under a new passphrase and fresh salt.
    ///
    /// `kdf_params` replaces the stored cost parameters when given.
    ///
    /// # Errors
    /// - `Locked` unless unlocked
    /// - `Authentication` if `current` is wrong
    /// - `WeakInput` for an empty new passphrase
    pub async fn change_passphrase(
        &self,
        current: &[u8],
        new: &[u8],
        kdf_params: Option<KdfParams>,
    ) -> Result<()> {
        if new.is_empty() {
            return Err(Error::WeakInput("Passphrase cannot be empty".to_string()));
        }
        let _ops = self.inner.ops.lock().await;

        let (salt, params) = self.read(|vault| Ok((vault.salt.clone(), vault.kdf_params)))?;
        let check = derive_blocking(current, salt, params).await?;
        let matches = self.read(|vault| {
            Ok(bool::from(vault.key.as_bytes()[..].ct_eq(&check.as_bytes()[..])))
        })?;
        drop(check);
        if !matches {
            return Err(Error::Authentication);
        }

        let new_salt = Salt::generate();
        let new_params = kdf_params.unwrap_or(params);
        let new_key = derive_blocking(new, new_salt.clone(), new_params).await?;

        let (payload, backend) = self.read(|vault| {
            let payload = seal(&new_key, &vault.model, &new_salt, new_params)?;
            Ok((payload, vault.backend.clone()))
        })?;
        if let Err(e) = backend.save_encrypted_payload(&payload).await {
            return Err(self.persist_failed("change_passphrase", e));
        }

        let mut phase = self.inner.write();
        let Phase::Unlocked(vault) = &mut *phase else {
            return Err(Error::Locked);
        };
        vault.key = new_key;
        vault.salt = new_salt;
        vault.kdf_params = new_params;
        vault.last_activity = Instant::now();
        info!(backend = %vault.backend.describe(), "Passphrase changed");
        Ok(())
    }

    fn begin_unlocking(&self) -> UnlockingGuard<'_> {
        let previous = std::mem::replace(&mut *self.inner.write(), Phase::Unlocking);
        drop(previous);
        UnlockingGuard {
            inner: &self.inner,
            armed: true,
        }
    }

    fn install(&self, mut guard: UnlockingGuard<'_>, vault: UnlockedVault) {
        guard.armed = false;
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.inner.write() = Phase::Unlocked(Box::new(vault));
        self.spawn_idle_timer(generation);
    }

    fn spawn_idle_timer(&self, generation: u64) {
        if self.inner.config.idle_timeout.is_zero() {
            return;
        }
        tokio::spawn(idle_watch(Arc::downgrade(&self.inner), generation));
    }

    // -- reads ---------------------------------------------------------------

    fn read<T>(&self, f: impl FnOnce(&UnlockedVault) -> Result<T>) -> Result<T> {
        match &*self.inner.read() {
            Phase::Unlocked(vault) => f(vault),
            _ => Err(Error::Locked),
        }
    }

    /// The root group.
    pub fn root_group(&self) -> Result<Group> {
        self.read(|vault| Ok(vault.model.root().clone()))
    }

    pub fn group(&self, id: GroupId) -> Result<Group> {
        self.read(|vault| vault.model.group(id).cloned())
    }

    /// Direct subgroups of a group.
    pub fn children(&self, id: GroupId) -> Result<Vec<Group>> {
        self.read(|vault| {
            Ok(vault
                .model
                .children(id)?
                .into_iter()
                .cloned()
                .collect())
        })
    }

    /// A single entry, secret included.
    pub fn entry(&self, id: EntryId) -> Result<Entry> {
        self.read(|vault| vault.model.entry(id).cloned())
    }

    /// Entries directly inside a group.
    pub fn entries_in(&self, id: GroupId) -> Result<Vec<Entry>> {
        self.read(|vault| {
            Ok(vault
                .model
                .entries_in(id)?
                .into_iter()
                .cloned()
                .collect())
        })
    }

    /// Number of entries directly inside each group.
    pub fn entry_counts(&self) -> Result<BTreeMap<GroupId, usize>> {
        self.read(|vault| Ok(vault.model.entry_counts()))
    }

    /// Ids of entries whose title, username, URL or notes contain `text`.
    pub fn search(&self, text: &str) -> Result<Vec<EntryId>> {
        self.read(|vault| Ok(vault.index.query(text)))
    }

    /// Export a group subtree as a plaintext document.
    ///
    /// The result contains every secret below `id` in clear.
    pub fn export_group(&self, id: GroupId) -> Result<PlaintextExport> {
        let export = self.read(|vault| export::export_group(&vault.model, id))?;
        info!(group = %id, "Plaintext export produced");
        Ok(export)
    }

    /// Summary of the unlocked vault.
    pub fn info(&self) -> Result<VaultInfo> {
        self.read(|vault| {
            Ok(VaultInfo {
                backend: vault.backend.describe(),
                format_version: FORMAT_VERSION,
                kdf_params: vault.kdf_params,
                groups: vault.model.group_count(),
                entries: vault.model.len(),
            })
        })
    }

    // -- mutations -----------------------------------------------------------

    pub async fn add_group(&self, parent: GroupId, name: &str) -> Result<GroupId> {
        self.mutate("add_group", |model| {
            Ok((model.add_group(parent, name)?, IndexPatch::Unchanged))
        })
        .await
    }

    pub async fn rename_group(&self, id: GroupId, name: &str) -> Result<()> {
        self.mutate("rename_group", |model| {
            model.rename_group(id, name)?;
            Ok(((), IndexPatch::Unchanged))
        })
        .await
    }

    /// Remove a group; see [`RemovePolicy`].
    pub async fn remove_group(&self, id: GroupId, policy: RemovePolicy) -> Result<()> {
        self.mutate("remove_group", |model| {
            let removed = model.remove_group(id, policy)?;
            Ok(((), IndexPatch::Remove(removed)))
        })
        .await
    }

    pub async fn move_group(&self, id: GroupId, new_parent: GroupId) -> Result<()> {
        self.mutate("move_group", |model| {
            model.move_group(id, new_parent)?;
            Ok(((), IndexPatch::Unchanged))
        })
        .await
    }

    pub async fn add_entry(&self, group: GroupId, entry: NewEntry) -> Result<EntryId> {
        self.mutate("add_entry", move |model| {
            let id = model.add_entry(group, entry)?;
            Ok((id, IndexPatch::Upsert(id)))
        })
        .await
    }

    pub async fn update_entry(&self, id: EntryId, patch: EntryPatch) -> Result<()> {
        self.mutate("update_entry", move |model| {
            model.update_entry(id, patch)?;
            Ok(((), IndexPatch::Upsert(id)))
        })
        .await
    }

    pub async fn remove_entry(&self, id: EntryId) -> Result<()> {
        self.mutate("remove_entry", |model| {
            model.remove_entry(id)?;
            Ok(((), IndexPatch::Remove(vec![id])))
        })
        .await
    }

    pub async fn move_entry(&self, id: EntryId, group: GroupId) -> Result<()> {
        self.mutate("move_entry", |model| {
            model.move_entry(id, group)?;
            Ok(((), IndexPatch::Unchanged))
        })
        .await
    }

    /// Re-import an exported subtree under `parent` with fresh ids.
    pub async fn import_group(&self, parent: GroupId, export: &PlaintextExport) -> Result<GroupId> {
        self.mutate("import_group", |model| {
            let id = export::import_group(model, parent, export)?;
            Ok((id, IndexPatch::Rebuild))
        })
        .await
    }

    /// Apply `change` to a copy of the model, persist it, then swap it in.
    ///
    /// The live model is untouched unless the save succeeds.
    async fn mutate<T, F>(&self, op: &'static str, change: F) -> Result<T>
    where
        T: Send,
        F: FnOnce(&mut VaultModel) -> Result<(T, IndexPatch)> + Send,
    {
        let _ops = self.inner.ops.lock().await;

        let (draft, payload, backend, value, patch) = {
            let phase = self.inner.read();
            let Phase::Unlocked(vault) = &*phase else {
                return Err(Error::Locked);
            };
            let mut draft = vault.model.clone();
            let (value, patch) = change(&mut draft)?;
            let payload = seal(&vault.key, &draft, &vault.salt, vault.kdf_params)?;
            (draft, payload, vault.backend.clone(), value, patch)
        };

        if let Err(e) = backend.save_encrypted_payload(&payload).await {
            return Err(self.persist_failed(op, e));
        }

        let mut phase = self.inner.write();
        let Phase::Unlocked(vault) = &mut *phase else {
            return Err(Error::Locked);
        };
        let vault = &mut **vault;
        vault.model = draft;
        match patch {
            IndexPatch::Unchanged => {}
            IndexPatch::Upsert(id) => {
                if let Ok(entry) = vault.model.entry(id) {
                    vault.index.upsert(entry);
                }
            }
            IndexPatch::Remove(ids) => {
                for id in ids {
                    vault.index.remove(id);
                }
            }
            IndexPatch::Rebuild => vault.index.rebuild(&vault.model),
        }
        vault.last_activity = Instant::now();
        debug!(op, entries = vault.model.len(), "Mutation committed");
        Ok(value)
    }

    fn persist_failed(&self, op: &str, error: Error) -> Error {
        match &error {
            Error::StorageVanished(message) => {
                warn!(op, error = %error, "Storage vanished; session disabled");
                self.inner.fail(message.clone());
            }
            _ => warn!(op, error = %error, "Save failed; change rolled back"),
        }
        error
    }
}

impl Default for VaultSession {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl fmt::Debug for VaultSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultSession")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn seal(
    key: &SessionKey,
    model: &VaultModel,
    salt: &Salt,
    kdf_params: KdfParams,
) -> Result<EncryptedPayload> {
    let plaintext = model.to_bytes()?;
    Ok(EncryptedPayload {
        format_version: FORMAT_VERSION,
        kdf_params,
        salt: salt.clone(),
        sealed: encrypt(key, &plaintext)?,
    })
}

/// Run Argon2 on the blocking pool. If the caller goes away the derived key
/// is dropped (and wiped) when the task finishes.
async fn derive_blocking(passphrase: &[u8], salt: Salt, params: KdfParams) -> Result<SessionKey> {
    let passphrase = Zeroizing::new(passphrase.to_vec());
    tokio::task::spawn_blocking(move || derive_key(&passphrase, &salt, &params))
        .await
        .map_err(|e| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Key derivation task failed: {}", e),
            ))
        })?
}

/// Lock the session once it has been idle past the configured timeout.
async fn idle_watch(inner: Weak<Inner>, generation: u64) {
    loop {
        let Some(deadline) = inner
            .upgrade()
            .and_then(|inner| inner.idle_deadline(generation))
        else {
            return;
        };
        tokio::time::sleep_until(deadline).await;

        let Some(inner) = inner.upgrade() else {
            return;
        };
        let _ops = inner.ops.lock().await;
        match inner.idle_deadline(generation) {
            Some(deadline) if deadline <= Instant::now() => {
                inner.lock_now("idle");
                return;
            }
            Some(_) => continue,
            None => return,
        }
    }
}
