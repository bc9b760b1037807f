//! Authenticated encryption using XChaCha20-Poly1305.
//!
//! XChaCha20-Poly1305 provides both confidentiality and authenticity,
//! with a 24-byte nonce that is safe for random generation. The nonce is
//! always produced inside [`encrypt`]; no public function accepts one.

use chacha20poly1305::{
    aead::{AeadCore, AeadInPlace, KeyInit, OsRng},
    Key, Tag, XChaCha20Poly1305, XNonce,
};
use zeroize::{Zeroize, Zeroizing};

use crate::keys::SessionKey;
use prasword_common::{Error, Result};

/// Nonce size for XChaCha20-Poly1305 (24 bytes).
pub const NONCE_SIZE: usize = 24;

/// Authentication tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

/// Output of one encryption: nonce, ciphertext and detached tag.
#[derive(Clone, PartialEq, Eq)]
pub struct Sealed {
    nonce: [u8; NONCE_SIZE],
    ciphertext: Vec<u8>,
    tag: [u8; TAG_SIZE],
}

impl Sealed {
    /// Reassemble a sealed payload read back from storage.
    pub fn from_parts(nonce: [u8; NONCE_SIZE], ciphertext: Vec<u8>, tag: [u8; TAG_SIZE]) -> Self {
        Self {
            nonce,
            ciphertext,
            tag,
        }
    }

    /// Nonce used for this encryption.
    pub fn nonce(&self) -> &[u8; NONCE_SIZE] {
        &self.nonce
    }

    /// Encrypted bytes, same length as the plaintext.
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// Poly1305 authentication tag.
    pub fn tag(&self) -> &[u8; TAG_SIZE] {
        &self.tag
    }

    /// Mutable access for tamper tests.
    #[cfg(test)]
    pub(crate) fn ciphertext_mut(&mut self) -> &mut Vec<u8> {
        &mut self.ciphertext
    }
}

impl std::fmt::Debug for Sealed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sealed")
            .field("ciphertext_len", &self.ciphertext.len())
            .finish_non_exhaustive()
    }
}

/// Encrypt plaintext using XChaCha20-Poly1305.
///
/// # Postconditions
/// - A fresh random nonce is generated for this call
/// - `ciphertext.len() == plaintext.len()`
///
/// # Errors
/// - Returns error if the cipher rejects the input length
pub fn encrypt(key: &SessionKey, plaintext: &[u8]) -> Result<Sealed> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);

    let mut buffer = plaintext.to_vec();
    let tag = match cipher.encrypt_in_place_detached(&nonce, b"", &mut buffer) {
        Ok(tag) => tag,
        Err(_) => {
            buffer.zeroize();
            return Err(Error::InvalidInput("Plaintext too large to encrypt".to_string()));
        }
    };

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    nonce_bytes.copy_from_slice(&nonce);
    let mut tag_bytes = [0u8; TAG_SIZE];
    tag_bytes.copy_from_slice(&tag);

    Ok(Sealed {
        nonce: nonce_bytes,
        ciphertext: buffer,
        tag: tag_bytes,
    })
}

/// Decrypt a sealed payload.
///
/// # Postconditions
/// - The tag is verified before any plaintext is returned
///
/// # Errors
/// - `Authentication` on any failure: wrong key, altered nonce, ciphertext or
///   tag. The causes are not distinguished.
pub fn decrypt(key: &SessionKey, sealed: &Sealed) -> Result<Zeroizing<Vec<u8>>> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let nonce = XNonce::from_slice(&sealed.nonce);
    let tag = Tag::from_slice(&sealed.tag);

    let mut buffer = Zeroizing::new(sealed.ciphertext.clone());
    cipher
        .decrypt_in_place_detached(nonce, b"", buffer.as_mut_slice(), tag)
        .map_err(|_| Error::Authentication)?;

    Ok(buffer)
}
