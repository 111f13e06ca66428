use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use argon2::Argon2;
use base64::{engine::general_purpose::STANDARD, Engine};
use rand_core::{OsRng, RngCore};

const NONCE_LEN: usize = 12;
const SALT_LEN: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Encryption error: {0}")]
    Encrypt(String),
    #[error("Decryption error: {0}")]
    Decrypt(String),
    #[error("Base64 decode error: {0}")]
    Decode(String),
    #[error("Key derivation error: {0}")]
    Kdf(String),
}

/// Derive a 32-byte AES key from a master password and a per-user salt (Argon2id).
pub fn derive_key(master_password: &str, salt: &str) -> Result<[u8; 32], CryptoError> {
    let salt = STANDARD
        .decode(salt)
        .map_err(|e| CryptoError::Decode(e.to_string()))?;

    let mut key = [0u8; 32];
    Argon2::default()
        .hash_password_into(master_password.as_bytes(), &salt, &mut key)
        .map_err(|e| CryptoError::Kdf(e.to_string()))?;
    Ok(key)
}

/// Fresh random salt, base64-encoded for storage.
pub fn generate_salt() -> String {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    STANDARD.encode(salt)
}

/// Encrypt a secret with AES-256-GCM.
/// Returns base64(12-byte nonce ‖ ciphertext+tag).
pub fn encrypt(plaintext: &str, key: &[u8; 32]) -> Result<String, CryptoError> {
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let cipher = Aes256Gcm::new(key.into());
    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|e| CryptoError::Encrypt(e.to_string()))?;

    let mut combined = nonce_bytes.to_vec();
    combined.extend_from_slice(&ciphertext);

    Ok(STANDARD.encode(&combined))
}

/// Decrypt a value produced by [`encrypt`].
pub fn decrypt(encoded: &str, key: &[u8; 32]) -> Result<String, CryptoError> {
    let data = STANDARD
        .decode(encoded)
        .map_err(|e| CryptoError::Decode(e.to_string()))?;

    if data.len() < NONCE_LEN {
        return Err(CryptoError::Decrypt(
            "Ciphertext too short (< 12 bytes)".to_string(),
        ));
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
    let nonce = Nonce::from_slice(nonce_bytes);

    let cipher = Aes256Gcm::new(key.into());
    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| CryptoError::Decrypt(e.to_string()))?;

    String::from_utf8(plaintext).map_err(|e| CryptoError::Decrypt(e.to_string()))
}
