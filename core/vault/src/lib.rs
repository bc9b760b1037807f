//! Vault engine for Prasword.
//!
//! This module provides:
//! - The in-memory group/entry model and its serialized envelope
//! - Session handling: unlock, auto-lock and persisted mutations
//! - Substring search over entry metadata
//! - Plaintext export and re-import of group subtrees
//!
//! # Architecture
//! The session sits between callers and a storage backend. It owns the key
//! while unlocked and re-encrypts the whole model on every committed change.

pub mod config;
pub mod export;
pub mod model;
pub mod search;
pub mod session;

pub use config::SessionConfig;
pub use export::PlaintextExport;
pub use model::{Entry, EntryPatch, Group, NewEntry, RemovePolicy, VaultModel};
pub use search::SearchIndex;
pub use session::{SessionState, VaultInfo, VaultSession};
