use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const PBKDF2_ITERATIONS: u32 = 100_000;
/// Fixed salt, matched verbatim from the system this was ported from. Not
/// a secret; kept stable so a key re-derived from the same passphrase
/// always decrypts existing ciphertext.
const FIXED_SALT: &[u8] = b"openai_proxy_salt_2024";

#[derive(Debug, thiserror::Error)]
pub enum EncryptionError {
    #[error("encryption_secret must be a 32-byte base64 key or a passphrase")]
    InvalidKeyMaterial,
    #[error("ciphertext too short")]
    CiphertextTooShort,
    #[error("aead failure")]
    Aead,
}

/// AES-256-GCM credential encryption, substituting Fernet (AES-128-CBC +
/// HMAC) with an AEAD cipher while preserving the
/// PBKDF2-HMAC-SHA-256 passphrase fallback exactly: 100,000 iterations,
/// fixed salt, 32-byte derived key.
pub struct Encryptor {
    cipher: Aes256Gcm,
}

impl Encryptor {
    /// `secret` is either a base64-encoded 32-byte key, or a passphrase to
    /// derive one from.
    pub fn new(secret: &str) -> Result<Self, EncryptionError> {
        let key_bytes = match base64::engine::general_purpose::STANDARD.decode(secret) {
            Ok(bytes) if bytes.len() == KEY_LEN => bytes,
            _ => derive_key_from_passphrase(secret.as_bytes()),
        };
        let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<Vec<u8>, EncryptionError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| EncryptionError::Aead)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn decrypt(&self, stored: &[u8]) -> Result<String, EncryptionError> {
        if stored.len() < NONCE_LEN {
            return Err(EncryptionError::CiphertextTooShort);
        }
        let (nonce_bytes, ciphertext) = stored.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| EncryptionError::Aead)?;
        String::from_utf8(plaintext).map_err(|_| EncryptionError::Aead)
    }
}

fn derive_key_from_passphrase(passphrase: &[u8]) -> Vec<u8> {
    let mut key = vec![0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(passphrase, FIXED_SALT, PBKDF2_ITERATIONS, &mut key);
    key
}

/// Masks all but the last four characters for safe logging.
pub fn mask_secret(secret: &str) -> String {
    modelgate_provider_core::mask(secret)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_with_passphrase_derived_key() {
        let enc = Encryptor::new("a test passphrase").unwrap();
        let ciphertext = enc.encrypt("sk-super-secret").unwrap();
        assert_eq!(enc.decrypt(&ciphertext).unwrap(), "sk-super-secret");
    }

    #[test]
    fn different_secrets_cannot_decrypt_each_other() {
        let a = Encryptor::new("passphrase-a").unwrap();
        let b = Encryptor::new("passphrase-b").unwrap();
        let ciphertext = a.encrypt("sk-super-secret").unwrap();
        assert!(b.decrypt(&ciphertext).is_err());
    }

    #[test]
    fn accepts_base64_32_byte_key_directly() {
        let raw_key = [7u8; 32];
        let secret = base64::engine::general_purpose::STANDARD.encode(raw_key);
        let enc = Encryptor::new(&secret).unwrap();
        let ciphertext = enc.encrypt("value").unwrap();
        assert_eq!(enc.decrypt(&ciphertext).unwrap(), "value");
    }
}
