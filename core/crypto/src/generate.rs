//! Random secret generation.

use rand::rngs::OsRng;
use rand::Rng;

use prasword_common::{Error, Result, SecretString};

/// Characters drawn from when generating a secret.
pub const SECRET_ALPHABET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789!@#$%^&*";

/// Default generated secret length.
pub const DEFAULT_SECRET_LENGTH: usize = 16;

/// Generate a random secret of `length` characters from the OS RNG.
///
/// # Errors
/// - `InvalidInput` if `length` is zero
pub fn generate_secret(length: usize) -> Result<SecretString> {
    if length == 0 {
        return Err(Error::InvalidInput(
            "Secret length must be at least 1".to_string(),
        ));
    }

    let mut rng = OsRng;
    let secret: String = (0..length)
        .map(|_| char::from(SECRET_ALPHABET[rng.gen_range(0..SECRET_ALPHABET.len())]))
        .collect();
    Ok(SecretString::new(secret))
}
