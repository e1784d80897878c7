//! AES-256-GCM sealing for respondent PII (email, IP address).
//!
//! Sealed values are `base64(nonce || ciphertext)` so they fit in TEXT columns.

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose, Engine as _};
use rand_core::RngCore;
use thiserror::Error;

const NONCE_LEN: usize = 12;

#[derive(Error, Debug, PartialEq)]
pub enum CryptoError {
    #[error("encryption error")]
    Encrypt,
    #[error("decryption error")]
    Decrypt,
    #[error("invalid key")]
    InvalidKey,
}

#[derive(Clone)]
pub struct Crypto {
    cipher: Aes256Gcm,
}

impl Crypto {
    pub fn new(key_bytes: &[u8]) -> Result<Self, CryptoError> {
        if key_bytes.len() != 32 {
            return Err(CryptoError::InvalidKey);
        }
        let cipher = Aes256Gcm::new_from_slice(key_bytes).map_err(|_| CryptoError::InvalidKey)?;
        Ok(Self { cipher })
    }

    pub fn seal(&self, value: &str) -> Result<String, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, value.as_bytes())
            .map_err(|_| CryptoError::Encrypt)?;
        let mut combined = nonce_bytes.to_vec();
        combined.extend_from_slice(&ciphertext);
        Ok(general_purpose::STANDARD.encode(combined))
    }

    pub fn open(&self, sealed: &str) -> Result<String, CryptoError> {
        let data = general_purpose::STANDARD
            .decode(sealed)
            .map_err(|_| CryptoError::Decrypt)?;
        if data.len() <= NONCE_LEN {
            return Err(CryptoError::Decrypt);
        }
        let (nonce_bytes, cipher_bytes) = data.split_at(NONCE_LEN);
        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), cipher_bytes)
            .map_err(|_| CryptoError::Decrypt)?;
        String::from_utf8(plain).map_err(|_| CryptoError::Decrypt)
    }

    pub fn seal_optional(&self, value: Option<&str>) -> Result<Option<String>, CryptoError> {
        value.map(|v| self.seal(v)).transpose()
    }

    /// Opens an optional sealed column. Undecryptable values are logged and
    /// treated as absent so one bad row never breaks a listing or export.
    pub fn open_optional(&self, sealed: Option<&str>) -> Option<String> {
        let sealed = sealed?;
        match self.open(sealed) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Failed to open sealed column: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crypto() -> Crypto {
        Crypto::new(&[3u8; 32]).unwrap()
    }

    #[test]
    fn seal_and_open() {
        let c = crypto();
        let sealed = c.seal("ana@example.com").unwrap();
        assert_ne!(sealed, "ana@example.com");
        assert_eq!(c.open(&sealed).unwrap(), "ana@example.com");
        // fresh nonce per call
        assert_ne!(sealed, c.seal("ana@example.com").unwrap());
    }

    #[test]
    fn rejects_wrong_key_and_garbage() {
        let sealed = crypto().seal("10.0.0.1").unwrap();
        let other = Crypto::new(&[9u8; 32]).unwrap();
        assert_eq!(other.open(&sealed), Err(CryptoError::Decrypt));
        assert_eq!(crypto().open("short"), Err(CryptoError::Decrypt));
        assert!(Crypto::new(&[1u8; 16]).is_err());
    }

    #[test]
    fn optional_helpers() {
        let c = crypto();
        assert_eq!(c.seal_optional(None).unwrap(), None);
        let sealed = c.seal_optional(Some("x")).unwrap();
        assert_eq!(c.open_optional(sealed.as_deref()), Some("x".to_string()));
        assert_eq!(c.open_optional(Some("garbage")), None);
    }
}
