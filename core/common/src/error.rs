//! Common error types for the Prasword vault engine.

use thiserror::Error;

/// Top-level error type for vault operations.
///
/// Every layer (crypto, storage, model, session) reports through this enum
/// so the caller sees one taxonomy regardless of where a failure started.
#[derive(Debug, Error)]
pub enum Error {
    /// Key derivation input failed a precondition (e.g. empty passphrase).
    #[error("Weak input: {0}")]
    WeakInput(String),

    /// Wrong passphrase or tampered/corrupted ciphertext.
    ///
    /// The two causes are deliberately merged and carry no detail.
    #[error("cannot open vault")]
    Authentication,

    /// Unknown magic marker or unsupported format version.
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Storage backend failed for a reason other than plain I/O.
    #[error("Storage error: {0}")]
    Storage(String),

    /// The storage target disappeared while a session was using it.
    #[error("Storage target vanished: {0}")]
    StorageVanished(String),

    /// Group still has children and no cascade was requested.
    #[error("Not empty: {0}")]
    NotEmpty(String),

    /// Re-parenting would introduce a cycle.
    #[error("Cycle: {0}")]
    Cycle(String),

    /// Decrypted payload is structurally invalid.
    #[error("Corrupted vault data: {0}")]
    Corruption(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The session holds no key; unlock first.
    #[error("Vault is locked")]
    Locked,

    /// Serialization of a plaintext document failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Whether this error belongs to the backend read/write class.
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::Storage(_) | Error::StorageVanished(_)
        )
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
