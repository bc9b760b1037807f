//! Storage backend abstraction for the Prasword vault engine.
//!
//! A vault is persisted as one encrypted payload. This module defines the
//! backend trait that loads and saves that payload and its implementations:
//! a single local file, a row in a relational database, and an in-memory
//! store used by tests.
//!
//! # Design Principles
//! - Backend isolation: no backend-specific logic in vault or crypto modules
//! - Async operations: all I/O is async; blocking drivers run on the blocking pool
//! - Atomic replace: a save is either fully visible or not at all

pub mod backend;
pub mod format;
pub mod local;
pub mod memory;
pub mod relational;
pub mod target;

pub use backend::{EncryptedPayload, StorageBackend};
pub use format::{FORMAT_VERSION, MAGIC};
pub use local::LocalFileStore;
pub use memory::MemoryStore;
pub use relational::{PayloadRow, RelationalConnection, RelationalHandle, RelationalStore};
pub use target::StorageTarget;
