//! Cryptographic primitives for the Prasword vault engine.
//!
//! This module provides:
//! - Key derivation using Argon2id
//! - Authenticated encryption using XChaCha20-Poly1305
//! - Session key and salt types with automatic zeroization
//! - Random secret generation for new entries
//!
//! # Security Guarantees
//! - All key material is zeroized on drop
//! - No plaintext or key material is ever logged
//! - Nonces are generated internally for every encryption

pub mod aead;
pub mod generate;
pub mod kdf;
pub mod keys;

pub use aead::{decrypt, encrypt, Sealed, NONCE_SIZE, TAG_SIZE};
pub use generate::{generate_secret, DEFAULT_SECRET_LENGTH};
pub use kdf::{derive_key, KdfParams, MAX_MEMORY_COST, MAX_PARALLELISM, MAX_TIME_COST};
pub use keys::{Salt, SessionKey, KEY_LENGTH, SALT_LENGTH};
