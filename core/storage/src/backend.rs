//! Storage backend trait definition.

use async_trait::async_trait;

use prasword_common::Result;
use prasword_crypto::{KdfParams, Salt, Sealed};

/// Everything a backend persists for one vault.
///
/// Only `format_version`, `kdf_params` and `salt` are meaningful without the
/// key; `sealed` is the opaque encrypted model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedPayload {
    /// Storage format version.
    pub format_version: u16,
    /// Argon2id cost parameters used to derive the key.
    pub kdf_params: KdfParams,
    /// Key derivation salt.
    pub salt: Salt,
    /// Nonce, ciphertext and tag of the serialized model.
    pub sealed: Sealed,
}

/// Storage backend for one vault.
///
/// A backend is bound to its target when constructed; the session never sees
/// paths or connection details. Implementations must make
/// `save_encrypted_payload` atomic: a later load observes either the previous
/// payload or the new one, never a mix.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Short human-readable description of the target (no secrets).
    fn describe(&self) -> String;

    /// Whether a vault payload is present at the target.
    async fn exists(&self) -> Result<bool>;

    /// Load the stored payload.
    ///
    /// # Errors
    /// - `NotFound` if no vault exists at the target
    /// - `UnsupportedFormat` for unknown magic or version, checked before any
    ///   cryptographic field is interpreted
    /// - `Io`/`Storage` for backend failures
    async fn load_encrypted_payload(&self) -> Result<EncryptedPayload>;

    /// Replace the stored payload.
    ///
    /// # Postconditions
    /// - On success the new payload is durably in place
    /// - On failure the previous payload is untouched
    ///
    /// # Errors
    /// - `StorageVanished` if the target location no longer exists
    /// - `Io`/`Storage` for backend failures
    async fn save_encrypted_payload(&self, payload: &EncryptedPayload) -> Result<()>;
}
