//! Key derivation using Argon2id.
//!
//! Argon2id is a memory-hard password hashing function that provides
//! resistance to both GPU and time-memory trade-off attacks. Its cost
//! parameters travel with the vault so they can be raised later without
//! breaking vaults created under older settings.

use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::keys::{Salt, SessionKey, KEY_LENGTH};
use prasword_common::{Error, Result};

/// Largest memory cost accepted, in KiB (1 GiB).
pub const MAX_MEMORY_COST: u32 = 1 << 20;

/// Largest iteration count accepted.
pub const MAX_TIME_COST: u32 = 64;

/// Largest degree of parallelism accepted.
pub const MAX_PARALLELISM: u32 = 64;

/// Parameters for Argon2id key derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB (e.g., 65536 = 64 MiB).
    pub memory_cost: u32,
    /// Number of iterations.
    pub time_cost: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl KdfParams {
    /// Create parameters suitable for interactive use.
    ///
    /// Targets roughly 0.5-1 second of derivation time on desktop hardware.
    pub fn interactive() -> Self {
        Self {
            memory_cost: 65536, // 64 MiB
            time_cost: 3,
            parallelism: 4,
        }
    }

    /// Create parameters suitable for sensitive data.
    ///
    /// Higher security parameters that may take several seconds.
    pub fn sensitive() -> Self {
        Self {
            memory_cost: 262144, // 256 MiB
            time_cost: 4,
            parallelism: 4,
        }
    }

    /// Create moderate parameters for constrained machines.
    pub fn moderate() -> Self {
        Self {
            memory_cost: 32768, // 32 MiB
            time_cost: 3,
            parallelism: 2,
        }
    }

    /// Lowest cost Argon2 accepts. Only for tests; offers no real protection.
    pub fn minimal() -> Self {
        Self {
            memory_cost: Params::MIN_M_COST,
            time_cost: Params::MIN_T_COST,
            parallelism: Params::MIN_P_COST,
        }
    }

    /// Resolve a preset by name ("interactive", "moderate", "sensitive").
    pub fn preset(name: &str) -> Result<Self> {
        match name {
            "interactive" => Ok(Self::interactive()),
            "moderate" => Ok(Self::moderate()),
            "sensitive" => Ok(Self::sensitive()),
            other => Err(Error::InvalidInput(format!(
                "Unknown KDF strength '{}'; use interactive, moderate, or sensitive",
                other
            ))),
        }
    }

    /// Whether every cost lies between Argon2's minimum and this crate's
    /// maximum.
    pub fn within_bounds(&self) -> bool {
        (Params::MIN_M_COST..=MAX_MEMORY_COST).contains(&self.memory_cost)
            && (Params::MIN_T_COST..=MAX_TIME_COST).contains(&self.time_cost)
            && (Params::MIN_P_COST..=MAX_PARALLELISM).contains(&self.parallelism)
            && self.memory_cost >= 8 * self.parallelism
    }

    /// Check parameters read back from storage before any derivation.
    ///
    /// The header carrying them is not authenticated, so a corrupt value
    /// must be refused here rather than handed to Argon2.
    ///
    /// # Errors
    /// - `UnsupportedFormat` if any cost is out of range
    pub fn check_stored(&self) -> Result<()> {
        if self.within_bounds() {
            Ok(())
        } else {
            Err(Error::UnsupportedFormat(format!(
                "Stored KDF parameters out of range (m={} KiB, t={}, p={})",
                self.memory_cost, self.time_cost, self.parallelism
            )))
        }
    }

    fn to_argon2(self) -> Result<Params> {
        if !self.within_bounds() {
            return Err(Error::WeakInput(format!(
                "KDF parameters out of range (m={} KiB, t={}, p={})",
                self.memory_cost, self.time_cost, self.parallelism
            )));
        }
        Params::new(
            self.memory_cost,
            self.time_cost,
            self.parallelism,
            Some(KEY_LENGTH),
        )
        .map_err(|e| Error::WeakInput(format!("Invalid KDF parameters: {}", e)))
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::interactive()
    }
}

/// Derive a session key from a passphrase and salt using Argon2id.
///
/// # Preconditions
/// - `passphrase` must not be empty
/// - `params` must be accepted by Argon2
///
/// # Postconditions
/// - The derived key is deterministic given the same inputs
///
/// # Errors
/// - `WeakInput` if the passphrase is empty or the parameters are invalid
///
/// # Security
/// - Passphrase is not stored or logged
/// - The intermediate output buffer is zeroized
pub fn derive_key(passphrase: &[u8], salt: &Salt, params: &KdfParams) -> Result<SessionKey> {
    if passphrase.is_empty() {
        return Err(Error::WeakInput("Passphrase cannot be empty".to_string()));
    }

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params.to_argon2()?);

    let mut key_bytes = Zeroizing::new([0u8; KEY_LENGTH]);
    argon2
        .hash_password_into(passphrase, salt.as_bytes(), &mut key_bytes[..])
        .map_err(|e| Error::WeakInput(format!("Key derivation failed: {}", e)))?;

    Ok(SessionKey::from_bytes(*key_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_key_deterministic() {
        let passphrase = b"correct-horse";
        let salt = Salt::from_bytes([42u8; 32]);
        let params = KdfParams::minimal();

        let key1 = derive_key(passphrase, &salt, &params).unwrap();
        let key2 = derive_key(passphrase, &salt, &params).unwrap();

        assert_eq!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_derive_key_stable_after_params_roundtrip() {
        // Same inputs in a fresh derivation context must give the same bytes;
        // a stored vault depends on this across process restarts.
        let salt = Salt::from_bytes([9u8; 32]);
        let params = KdfParams {
            memory_cost: 64,
            time_cost: 1,
            parallelism: 1,
        };
        let first = *derive_key(b"stable", &salt, &params).unwrap().as_bytes();
        let params_roundtrip: KdfParams =
            serde_json::from_str(&serde_json::to_string(&params).unwrap()).unwrap();
        let second = *derive_key(b"stable", &salt, &params_roundtrip)
            .unwrap()
            .as_bytes();
        assert_eq!(first, second);
    }

    #[test]
    fn test_derive_key_different_salt() {
        let passphrase = b"test-password-123";
        let salt1 = Salt::from_bytes([1u8; 32]);
        let salt2 = Salt::from_bytes([2u8; 32]);
        let params = KdfParams::minimal();

        let key1 = derive_key(passphrase, &salt1, &params).unwrap();
        let key2 = derive_key(passphrase, &salt2, &params).unwrap();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_derive_key_different_params() {
        let salt = Salt::from_bytes([3u8; 32]);
        let cheap = KdfParams::minimal();
        let dearer = KdfParams {
            time_cost: cheap.time_cost + 1,
            ..cheap
        };

        let key1 = derive_key(b"pw", &salt, &cheap).unwrap();
        let key2 = derive_key(b"pw", &salt, &dearer).unwrap();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_derive_key_empty_passphrase_fails() {
        let salt = Salt::generate();
        let params = KdfParams::minimal();

        assert!(matches!(
            derive_key(b"", &salt, &params),
            Err(Error::WeakInput(_))
        ));
    }

    #[test]
    fn test_invalid_params_rejected() {
        let salt = Salt::generate();
        let params = KdfParams {
            memory_cost: 1,
            time_cost: 0,
            parallelism: 0,
        };

        assert!(matches!(
            derive_key(b"pw", &salt, &params),
            Err(Error::WeakInput(_))
        ));
    }

    #[test]
    fn test_oversized_params_rejected_before_derivation() {
        let salt = Salt::generate();
        let huge = KdfParams {
            memory_cost: KdfParams::minimal().memory_cost | (1 << 31),
            ..KdfParams::minimal()
        };

        assert!(matches!(huge.check_stored(), Err(Error::UnsupportedFormat(_))));
        assert!(matches!(
            derive_key(b"pw", &salt, &huge),
            Err(Error::WeakInput(_))
        ));
    }

    #[test]
    fn test_presets_within_bounds() {
        for params in [
            KdfParams::minimal(),
            KdfParams::moderate(),
            KdfParams::interactive(),
            KdfParams::sensitive(),
        ] {
            params.check_stored().unwrap();
        }
        let wide = KdfParams {
            parallelism: MAX_PARALLELISM + 1,
            ..KdfParams::minimal()
        };
        assert!(wide.check_stored().is_err());
    }

    #[test]
    fn test_preset_lookup() {
        assert_eq!(KdfParams::preset("moderate").unwrap(), KdfParams::moderate());
        assert!(KdfParams::preset("extreme").is_err());
    }
}
