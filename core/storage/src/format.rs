//! Binary layout of a vault file.
//!
//! ```text
//! [magic "PRSV":4][format_version:u16 LE]
//! [memory_cost:u32 LE][time_cost:u32 LE][parallelism:u32 LE]
//! [salt:32][nonce:24][ciphertext ...][tag:16]
//! ```

use prasword_common::{Error, Result};
use prasword_crypto::{KdfParams, Salt, Sealed, NONCE_SIZE, SALT_LENGTH, TAG_SIZE};

use crate::backend::EncryptedPayload;

/// Magic marker at the start of every vault file.
pub const MAGIC: [u8; 4] = *b"PRSV";

/// Current storage format version.
pub const FORMAT_VERSION: u16 = 1;

const MAGIC_END: usize = 4;
const VERSION_END: usize = MAGIC_END + 2;
const KDF_END: usize = VERSION_END + 12;
const SALT_END: usize = KDF_END + SALT_LENGTH;
const NONCE_END: usize = SALT_END + NONCE_SIZE;

/// Fixed header length preceding the ciphertext.
pub const HEADER_LEN: usize = NONCE_END;

/// Whether this build can read the given format version.
pub fn is_supported(version: u16) -> bool {
    version == FORMAT_VERSION
}

/// Encode a payload into the file layout.
pub fn encode(payload: &EncryptedPayload) -> Vec<u8> {
    let sealed = &payload.sealed;
    let mut out = Vec::with_capacity(HEADER_LEN + sealed.ciphertext().len() + TAG_SIZE);
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&payload.format_version.to_le_bytes());
    out.extend_from_slice(&payload.kdf_params.memory_cost.to_le_bytes());
    out.extend_from_slice(&payload.kdf_params.time_cost.to_le_bytes());
    out.extend_from_slice(&payload.kdf_params.parallelism.to_le_bytes());
    out.extend_from_slice(payload.salt.as_bytes());
    out.extend_from_slice(sealed.nonce());
    out.extend_from_slice(sealed.ciphertext());
    out.extend_from_slice(sealed.tag());
    out
}

/// Decode the file layout.
///
/// Magic and version are validated before anything else is read.
///
/// # Errors
/// - `UnsupportedFormat` for unknown magic, unsupported version, KDF costs
///   out of range or a file too short to hold the header and tag
pub fn decode(bytes: &[u8]) -> Result<EncryptedPayload> {
    if bytes.len() < VERSION_END || bytes[..MAGIC_END] != MAGIC {
        return Err(Error::UnsupportedFormat(
            "Not a vault file (bad magic)".to_string(),
        ));
    }

    let format_version = u16::from_le_bytes([bytes[MAGIC_END], bytes[MAGIC_END + 1]]);
    if !is_supported(format_version) {
        return Err(Error::UnsupportedFormat(format!(
            "Vault format version {} is not supported (expected {})",
            format_version, FORMAT_VERSION
        )));
    }

    if bytes.len() < HEADER_LEN + TAG_SIZE {
        return Err(Error::UnsupportedFormat(
            "Vault file is truncated".to_string(),
        ));
    }

    let kdf_params = KdfParams {
        memory_cost: read_u32(&bytes[VERSION_END..VERSION_END + 4]),
        time_cost: read_u32(&bytes[VERSION_END + 4..VERSION_END + 8]),
        parallelism: read_u32(&bytes[VERSION_END + 8..KDF_END]),
    };
    kdf_params.check_stored()?;

    let salt = Salt::from_slice(&bytes[KDF_END..SALT_END])
        .ok_or_else(|| Error::UnsupportedFormat("Invalid salt length".to_string()))?;

    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(&bytes[SALT_END..NONCE_END]);

    let tag_start = bytes.len() - TAG_SIZE;
    let mut tag = [0u8; TAG_SIZE];
    tag.copy_from_slice(&bytes[tag_start..]);

    let ciphertext = bytes[NONCE_END..tag_start].to_vec();

    Ok(EncryptedPayload {
        format_version,
        kdf_params,
        salt,
        sealed: Sealed::from_parts(nonce, ciphertext, tag),
    })
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    u32::from_le_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use prasword_crypto::{encrypt, SessionKey, KEY_LENGTH};

    fn sample_payload() -> EncryptedPayload {
        let key = SessionKey::from_bytes([5u8; KEY_LENGTH]);
        EncryptedPayload {
            format_version: FORMAT_VERSION,
            kdf_params: KdfParams::moderate(),
            salt: Salt::from_bytes([8u8; SALT_LENGTH]),
            sealed: encrypt(&key, b"model bytes").unwrap(),
        }
    }

    #[test]
    fn test_layout_offsets() {
        let payload = sample_payload();
        let bytes = encode(&payload);

        assert_eq!(&bytes[..4], b"PRSV");
        assert_eq!(&bytes[4..6], &FORMAT_VERSION.to_le_bytes());
        assert_eq!(&bytes[6..10], &32768u32.to_le_bytes());
        assert_eq!(&bytes[KDF_END..SALT_END], &[8u8; SALT_LENGTH]);
        assert_eq!(&bytes[SALT_END..NONCE_END], payload.sealed.nonce());
        assert_eq!(bytes.len(), HEADER_LEN + b"model bytes".len() + TAG_SIZE);
        assert_eq!(&bytes[bytes.len() - TAG_SIZE..], payload.sealed.tag());
    }

    #[test]
    fn test_decode_restores_payload() {
        let payload = sample_payload();
        assert_eq!(decode(&encode(&payload)).unwrap(), payload);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut bytes = encode(&sample_payload());
        bytes[0] = b'X';
        assert!(matches!(decode(&bytes), Err(Error::UnsupportedFormat(_))));
    }

    #[test]
    fn test_future_version_rejected() {
        let mut bytes = encode(&sample_payload());
        bytes[4..6].copy_from_slice(&(FORMAT_VERSION + 1).to_le_bytes());
        assert!(matches!(decode(&bytes), Err(Error::UnsupportedFormat(_))));
    }

    #[test]
    fn test_oversized_memory_cost_rejected() {
        let mut bytes = encode(&sample_payload());
        bytes[VERSION_END..VERSION_END + 4].copy_from_slice(&(32768u32 | (1 << 31)).to_le_bytes());
        assert!(matches!(decode(&bytes), Err(Error::UnsupportedFormat(_))));
    }

    #[test]
    fn test_zero_parallelism_rejected() {
        let mut bytes = encode(&sample_payload());
        bytes[VERSION_END + 8..KDF_END].copy_from_slice(&0u32.to_le_bytes());
        assert!(matches!(decode(&bytes), Err(Error::UnsupportedFormat(_))));
    }

    #[test]
    fn test_truncated_rejected() {
        let bytes = encode(&sample_payload());
        assert!(matches!(
            decode(&bytes[..HEADER_LEN]),
            Err(Error::UnsupportedFormat(_))
        ));
        assert!(matches!(decode(&bytes[..2]), Err(Error::UnsupportedFormat(_))));
        assert!(matches!(decode(&[]), Err(Error::UnsupportedFormat(_))));
    }
}
