//! Common utilities and types shared across the Prasword vault crates.
//!
//! This module provides the shared error taxonomy and the identifier and
//! secret-holding types used by the model, storage and session layers.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{EntryId, GroupId, SecretString, VaultId};
