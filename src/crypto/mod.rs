//! Symmetric encryption for opaque session payloads.
//!
//! The key is derived once at process start from the configured secret and
//! salt (PBKDF2 is deliberately expensive) and reused for every operation.
//!
//! The wire format is: base64(nonce || ciphertext || tag)
//! where nonce is 12 bytes and tag is 16 bytes (AES-GCM authentication tag).

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use anyhow::Result;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64, Engine};
use ring::pbkdf2;
use std::num::NonZeroU32;

/// The length of the AES-256 key in bytes
const KEY_LENGTH: usize = 32;

/// The length of the AES-GCM nonce in bytes
const NONCE_LENGTH: usize = 12;

/// Number of PBKDF2 iterations for key derivation
pub const PBKDF2_ITERATIONS: u32 = 390_000;

/// Error for any ciphertext that cannot be decrypted: malformed encoding,
/// truncated input, or failed authentication. Callers react by discarding
/// the stored credential, so the variants are deliberately not distinguished.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid token")]
    InvalidToken,
}

/// Authenticated encryption keyed by a PBKDF2-derived secret.
pub struct TokenCrypto {
    key: [u8; KEY_LENGTH],
}

impl TokenCrypto {
    /// Derive the encryption key and build the crypto handle.
    ///
    /// This runs the full PBKDF2 derivation and must be called once at
    /// startup, not per request.
    pub fn new(secret: &str, salt: &str) -> Self {
        let mut key = [0u8; KEY_LENGTH];
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            NonZeroU32::new(PBKDF2_ITERATIONS).unwrap(),
            salt.as_bytes(),
            secret.as_bytes(),
            &mut key,
        );
        Self { key }
    }

    /// Encrypt a plaintext, returning base64(nonce || ciphertext || tag).
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String> {
        use rand::RngCore;

        let mut nonce_bytes = [0u8; NONCE_LENGTH];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| anyhow::anyhow!("Failed to create cipher: {}", e))?;
        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| anyhow::anyhow!("Encryption failed: {}", e))?;

        let mut combined = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(&combined))
    }

    /// Decrypt a token produced by [`encrypt`](Self::encrypt).
    ///
    /// Any malformed, truncated or tampered input yields
    /// [`CryptoError::InvalidToken`].
    pub fn decrypt(&self, token: &str) -> Result<Vec<u8>, CryptoError> {
        let combined = BASE64.decode(token).map_err(|_| CryptoError::InvalidToken)?;

        if combined.len() < NONCE_LENGTH + 1 {
            return Err(CryptoError::InvalidToken);
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LENGTH);
        let nonce = Nonce::from_slice(nonce_bytes);

        let cipher =
            Aes256Gcm::new_from_slice(&self.key).map_err(|_| CryptoError::InvalidToken)?;
        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CryptoError::InvalidToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crypto() -> TokenCrypto {
        TokenCrypto::new("test-secret-key", "test-salt")
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let crypto = crypto();
        let plaintext = b"my-session-payload-123!@#";

        let encrypted = crypto.encrypt(plaintext).unwrap();
        let decrypted = crypto.decrypt(&encrypted).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_encrypt_produces_different_ciphertext() {
        // Random nonce: same plaintext, different ciphertext
        let crypto = crypto();

        let encrypted1 = crypto.encrypt(b"same-plaintext").unwrap();
        let encrypted2 = crypto.encrypt(b"same-plaintext").unwrap();
        assert_ne!(encrypted1, encrypted2);

        assert_eq!(crypto.decrypt(&encrypted1).unwrap(), b"same-plaintext");
        assert_eq!(crypto.decrypt(&encrypted2).unwrap(), b"same-plaintext");
    }

    #[test]
    fn test_decrypt_with_wrong_key_fails() {
        let crypto1 = TokenCrypto::new("correct-key", "salt");
        let crypto2 = TokenCrypto::new("wrong-key", "salt");

        let encrypted = crypto1.encrypt(b"secret-value").unwrap();
        assert_eq!(crypto2.decrypt(&encrypted), Err(CryptoError::InvalidToken));
    }

    #[test]
    fn test_different_salts_derive_different_keys() {
        let crypto1 = TokenCrypto::new("secret", "salt-one");
        let crypto2 = TokenCrypto::new("secret", "salt-two");

        let encrypted = crypto1.encrypt(b"value").unwrap();
        assert_eq!(crypto2.decrypt(&encrypted), Err(CryptoError::InvalidToken));
    }

    #[test]
    fn test_tampered_ciphertext_is_invalid() {
        let crypto = crypto();
        let encrypted = crypto.encrypt(b"payload").unwrap();

        // Flip every position in turn; authentication must fail each time
        for i in 0..encrypted.len() {
            let mut tampered: Vec<u8> = encrypted.clone().into_bytes();
            tampered[i] = if tampered[i] == b'A' { b'B' } else { b'A' };
            let tampered = String::from_utf8(tampered).unwrap();
            if tampered == encrypted {
                continue;
            }
            assert_eq!(
                crypto.decrypt(&tampered),
                Err(CryptoError::InvalidToken),
                "byte {} survived tampering",
                i
            );
        }
    }

    #[test]
    fn test_malformed_inputs_are_invalid() {
        let crypto = crypto();
        assert_eq!(crypto.decrypt(""), Err(CryptoError::InvalidToken));
        assert_eq!(crypto.decrypt("not base64!!!"), Err(CryptoError::InvalidToken));
        // Valid base64 but shorter than nonce + one byte
        assert_eq!(
            crypto.decrypt(&BASE64.encode([0u8; 8])),
            Err(CryptoError::InvalidToken)
        );
    }

    #[test]
    fn test_empty_plaintext() {
        let crypto = crypto();
        let encrypted = crypto.encrypt(b"").unwrap();
        assert_eq!(crypto.decrypt(&encrypted).unwrap(), b"");
    }
}
