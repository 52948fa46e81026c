//! Secret encryption.
//!
//! Each value is sealed with AES-256-GCM under a fresh random 96-bit nonce.
//! The stored form is `base64(nonce || ciphertext || tag)`. Decryption fails
//! closed: a truncated blob or an authentication-tag mismatch is an error,
//! never garbled plaintext.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use thiserror::Error;

/// Length of an AES-256 key in bytes.
pub const KEY_LEN: usize = 32;

/// Length of the GCM nonce prepended to every ciphertext.
pub const NONCE_LEN: usize = 12;

pub type CipherResult<T> = Result<T, CipherError>;

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("encryption key must be {KEY_LEN} bytes, got {0}")]
    InvalidKey(usize),

    #[error("invalid encoding: {0}")]
    Encoding(String),

    #[error("ciphertext too short")]
    CiphertextTooShort,

    #[error("encryption failed")]
    Encrypt,

    #[error("decryption failed: message authentication failed")]
    Decrypt,
}

/// Encrypts and decrypts environment secrets with one 32-byte key.
#[derive(Clone)]
pub struct SecretCipher {
    aead: Aes256Gcm,
}

impl std::fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretCipher(..)")
    }
}

impl SecretCipher {
    /// Build a cipher from raw key bytes.
    pub fn new(key: &[u8]) -> CipherResult<Self> {
        let aead = Aes256Gcm::new_from_slice(key).map_err(|_| CipherError::InvalidKey(key.len()))?;
        Ok(Self { aead })
    }

    /// Build a cipher from a base64-encoded key.
    pub fn from_base64(encoded: &str) -> CipherResult<Self> {
        let key = BASE64
            .decode(encoded.trim())
            .map_err(|e| CipherError::Encoding(e.to_string()))?;
        Self::new(&key)
    }

    /// Generate a random key, base64-encoded.
    pub fn generate_key() -> String {
        BASE64.encode(Aes256Gcm::generate_key(OsRng))
    }

    pub fn encrypt(&self, plaintext: &str) -> CipherResult<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .aead
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CipherError::Encrypt)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(blob))
    }

    pub fn decrypt(&self, encoded: &str) -> CipherResult<String> {
        let blob = BASE64
            .decode(encoded)
            .map_err(|e| CipherError::Encoding(e.to_string()))?;
        if blob.len() < NONCE_LEN {
            return Err(CipherError::CiphertextTooShort);
        }
        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        let plaintext = self
            .aead
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CipherError::Decrypt)?;
        String::from_utf8(plaintext).map_err(|e| CipherError::Encoding(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cipher() -> SecretCipher {
        SecretCipher::new(&[7u8; KEY_LEN]).unwrap()
    }

    #[test]
    fn roundtrip_various_values() {
        let cipher = test_cipher();
        let long = "x".repeat(4096);
        for value in ["", "s3cr3t", "postgres://user:pa ss@db/app", "ключ 🔑", long.as_str()] {
            let sealed = cipher.encrypt(value).unwrap();
            assert_ne!(sealed, value);
            assert_eq!(cipher.decrypt(&sealed).unwrap(), value);
        }
    }

    #[test]
    fn nonce_is_fresh_per_value() {
        let cipher = test_cipher();
        let a = cipher.encrypt("same").unwrap();
        let b = cipher.encrypt("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn tampered_ciphertext_fails_closed() {
        let cipher = test_cipher();
        let sealed = cipher.encrypt("database-password").unwrap();
        let mut blob = BASE64.decode(&sealed).unwrap();

        for idx in [0, NONCE_LEN, blob.len() - 1] {
            blob[idx] ^= 0x01;
            let tampered = BASE64.encode(&blob);
            assert!(matches!(cipher.decrypt(&tampered), Err(CipherError::Decrypt)));
            blob[idx] ^= 0x01;
        }
    }

    #[test]
    fn short_blob_is_rejected() {
        let cipher = test_cipher();
        let short = BASE64.encode([1u8; NONCE_LEN - 1]);
        assert!(matches!(cipher.decrypt(&short), Err(CipherError::CiphertextTooShort)));

        // Nonce present but no tag: authentication cannot pass.
        let nonce_only = BASE64.encode([1u8; NONCE_LEN]);
        assert!(matches!(cipher.decrypt(&nonce_only), Err(CipherError::Decrypt)));
    }

    #[test]
    fn wrong_key_cannot_decrypt() {
        let sealed = test_cipher().encrypt("token").unwrap();
        let other = SecretCipher::new(&[9u8; KEY_LEN]).unwrap();
        assert!(matches!(other.decrypt(&sealed), Err(CipherError::Decrypt)));
    }

    #[test]
    fn invalid_keys_and_encodings() {
        assert!(matches!(SecretCipher::new(&[0u8; 16]), Err(CipherError::InvalidKey(16))));
        assert!(matches!(
            test_cipher().decrypt("not base64!"),
            Err(CipherError::Encoding(_))
        ));

        let key = SecretCipher::generate_key();
        let cipher = SecretCipher::from_base64(&key).unwrap();
        assert_eq!(cipher.decrypt(&cipher.encrypt("ok").unwrap()).unwrap(), "ok");
    }
}
