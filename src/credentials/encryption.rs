//! AES-256-GCM sealing for token columns.
//!
//! A sealed value is a single text column: `enc:v1:<nonce>:<ciphertext>`, both
//! parts base64. Values without the prefix are plaintext and pass through
//! untouched, so a store can start encrypting without migrating old rows.

use super::StoreError;
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

/// Size of the encryption key in bytes (256 bits)
const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits, standard for GCM)
const NONCE_SIZE: usize = 12;

const SEALED_PREFIX: &str = "enc:v1:";

/// Validates that the key is exactly 32 bytes when base64 decoded.
pub fn validate_key(key_base64: &str) -> Result<Vec<u8>, StoreError> {
    let key_bytes = BASE64
        .decode(key_base64.trim())
        .map_err(|e| StoreError::InvalidKey(format!("not valid base64: {}", e)))?;

    if key_bytes.len() != KEY_SIZE {
        return Err(StoreError::InvalidKey(format!(
            "must be {} bytes (256 bits), got {} bytes",
            KEY_SIZE,
            key_bytes.len()
        )));
    }

    Ok(key_bytes)
}

/// Generates a fresh random key, base64-encoded.
pub fn generate_key() -> String {
    BASE64.encode(Aes256Gcm::generate_key(&mut OsRng))
}

/// Seals `plaintext` under a random nonce (never reused).
pub(super) fn seal(plaintext: &str, key: &[u8]) -> Result<String, StoreError> {
    let cipher = cipher(key)?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|e| StoreError::Crypto(format!("encryption failed: {}", e)))?;

    Ok(format!(
        "{}{}:{}",
        SEALED_PREFIX,
        BASE64.encode(nonce),
        BASE64.encode(ciphertext)
    ))
}

/// Opens a value produced by [`seal`]. Plaintext values are returned as-is.
pub(super) fn open(value: &str, key: Option<&[u8]>) -> Result<String, StoreError> {
    let Some(sealed) = value.strip_prefix(SEALED_PREFIX) else {
        return Ok(value.to_string());
    };
    let key = key.ok_or(StoreError::MissingKey)?;

    let (nonce_b64, ciphertext_b64) = sealed
        .split_once(':')
        .ok_or_else(|| StoreError::Crypto("malformed sealed value".to_string()))?;

    let nonce_bytes = BASE64
        .decode(nonce_b64)
        .map_err(|e| StoreError::Crypto(format!("failed to decode nonce: {}", e)))?;
    if nonce_bytes.len() != NONCE_SIZE {
        return Err(StoreError::Crypto(format!(
            "invalid nonce size: expected {}, got {}",
            NONCE_SIZE,
            nonce_bytes.len()
        )));
    }
    let ciphertext = BASE64
        .decode(ciphertext_b64)
        .map_err(|e| StoreError::Crypto(format!("failed to decode ciphertext: {}", e)))?;

    let plaintext = cipher(key)?
        .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
        .map_err(|e| StoreError::Crypto(format!("decryption failed (wrong key or corrupted data): {}", e)))?;

    String::from_utf8(plaintext).map_err(|_| StoreError::Crypto("decrypted token is not valid UTF-8".to_string()))
}

fn cipher(key: &[u8]) -> Result<Aes256Gcm, StoreError> {
    if key.len() != KEY_SIZE {
        return Err(StoreError::InvalidKey(format!("must be {} bytes", KEY_SIZE)));
    }
    Aes256Gcm::new_from_slice(key).map_err(|e| StoreError::Crypto(format!("failed to create cipher: {}", e)))
}
