//! AES-256-GCM field cipher. Substitutes for the original system's
//! Fernet-based secret columns (see DESIGN.md); ciphertext is a single
//! base64 string of `nonce || ciphertext` so it fits in one TEXT column.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use thiserror::Error;

const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("ciphertext is not valid base64: {0}")]
    InvalidEncoding(#[from] base64::DecodeError),
    #[error("ciphertext shorter than the nonce prefix")]
    Truncated,
    #[error("AES-GCM operation failed")]
    Crypto,
}

/// Encrypts/decrypts individual string fields. Empty plaintext is stored
/// as an empty string with no cipher applied, so an unset secret never
/// round-trips through AES.
pub struct FieldCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for FieldCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldCipher").finish_non_exhaustive()
    }
}

impl FieldCipher {
    pub fn new(key: [u8; 32]) -> Self {
        Self { cipher: Aes256Gcm::new_from_slice(&key).expect("key is exactly 32 bytes") }
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from(nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CipherError::Crypto)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(out))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String, CipherError> {
        if encoded.is_empty() {
            return Ok(String::new());
        }

        let raw = BASE64.decode(encoded)?;
        if raw.len() < NONCE_LEN {
            return Err(CipherError::Truncated);
        }
        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self.cipher.decrypt(nonce, ciphertext).map_err(|_| CipherError::Crypto)?;
        String::from_utf8(plaintext).map_err(|_| CipherError::Crypto)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> FieldCipher {
        FieldCipher::new([7u8; 32])
    }

    #[test]
    fn round_trips_plaintext() {
        let c = cipher();
        let encrypted = c.encrypt("sk-live-secret").unwrap();
        assert_ne!(encrypted, "sk-live-secret");
        assert_eq!(c.decrypt(&encrypted).unwrap(), "sk-live-secret");
    }

    #[test]
    fn empty_plaintext_bypasses_encryption() {
        let c = cipher();
        assert_eq!(c.encrypt("").unwrap(), "");
        assert_eq!(c.decrypt("").unwrap(), "");
    }

    #[test]
    fn two_encryptions_of_same_plaintext_differ() {
        let c = cipher();
        let a = c.encrypt("same value").unwrap();
        let b = c.encrypt("same value").unwrap();
        assert_ne!(a, b, "random nonce should make ciphertexts differ");
    }

    #[test]
    fn decrypt_rejects_truncated_ciphertext() {
        let c = cipher();
        let short = BASE64.encode([0u8; 4]);
        assert!(matches!(c.decrypt(&short), Err(CipherError::Truncated)));
    }

    #[test]
    fn decrypt_rejects_wrong_key() {
        let c1 = FieldCipher::new([1u8; 32]);
        let c2 = FieldCipher::new([2u8; 32]);
        let encrypted = c1.encrypt("secret").unwrap();
        assert!(c2.decrypt(&encrypted).is_err());
    }
}
