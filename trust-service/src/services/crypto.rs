//! Document encryption envelope.
//!
//! Each document gets its own AES-256-GCM key, derived with HKDF-SHA256 from
//! the master key and the document id. The document id is also bound as
//! associated data, so a ciphertext moved to another document fails to open.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::{ExposeSecret, Secret};
use sha2::Sha256;
use std::sync::Arc;

use super::watermark::Watermarker;
use super::ServiceError;
use crate::models::EncryptedContent;

pub const KEY_VERSION: u32 = 1;
const NONCE_LEN: usize = 12;
const KDF_INFO_PREFIX: &[u8] = b"trust-core/document-key/v1:";

#[derive(Clone)]
pub struct DocumentCipher {
    master_key: Arc<Secret<Vec<u8>>>,
}

impl DocumentCipher {
    /// `master_key_b64` must decode to exactly 32 bytes.
    pub fn new(master_key_b64: &Secret<String>) -> Result<Self, ServiceError> {
        let key = STANDARD
            .decode(master_key_b64.expose_secret().trim())
            .map_err(|e| ServiceError::Encryption(format!("Invalid master key encoding: {}", e)))?;
        if key.len() != 32 {
            return Err(ServiceError::Encryption(format!(
                "Master key must be 32 bytes, got {}",
                key.len()
            )));
        }
        Ok(Self {
            master_key: Arc::new(Secret::new(key)),
        })
    }

    /// Watermark tag signer keyed off the same master key.
    pub fn watermarker(&self) -> Result<Watermarker, ServiceError> {
        Watermarker::new(self.master_key.expose_secret())
    }

    fn document_cipher(&self, document_id: &str) -> Result<Aes256Gcm, ServiceError> {
        let hkdf = Hkdf::<Sha256>::new(None, self.master_key.expose_secret());
        let mut info = KDF_INFO_PREFIX.to_vec();
        info.extend_from_slice(document_id.as_bytes());

        let mut okm = [0u8; 32];
        hkdf.expand(&info, &mut okm)
            .map_err(|e| ServiceError::Encryption(format!("HKDF expansion failed: {:?}", e)))?;
        Aes256Gcm::new_from_slice(&okm)
            .map_err(|e| ServiceError::Encryption(format!("Invalid derived key: {}", e)))
    }

    pub fn encrypt(
        &self,
        document_id: &str,
        plaintext: &[u8],
    ) -> Result<EncryptedContent, ServiceError> {
        let cipher = self.document_cipher(document_id)?;
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: document_id.as_bytes(),
                },
            )
            .map_err(|e| ServiceError::Encryption(format!("AES-GCM encryption failed: {}", e)))?;

        Ok(EncryptedContent {
            key_version: KEY_VERSION,
            nonce: STANDARD.encode(nonce),
            ciphertext: STANDARD.encode(ciphertext),
        })
    }

    pub fn decrypt(
        &self,
        document_id: &str,
        content: &EncryptedContent,
    ) -> Result<Vec<u8>, ServiceError> {
        if content.key_version != KEY_VERSION {
            return Err(ServiceError::Encryption(format!(
                "Unsupported key version {}",
                content.key_version
            )));
        }
        let nonce = STANDARD
            .decode(&content.nonce)
            .map_err(|e| ServiceError::Encryption(format!("Invalid nonce encoding: {}", e)))?;
        if nonce.len() != NONCE_LEN {
            return Err(ServiceError::Encryption("Invalid nonce length".to_string()));
        }
        let ciphertext = STANDARD
            .decode(&content.ciphertext)
            .map_err(|e| ServiceError::Encryption(format!("Invalid ciphertext encoding: {}", e)))?;

        self.document_cipher(document_id)?
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &ciphertext,
                    aad: document_id.as_bytes(),
                },
            )
            .map_err(|e| ServiceError::Encryption(format!("AES-GCM decryption failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher(byte: u8) -> DocumentCipher {
        DocumentCipher::new(&Secret::new(STANDARD.encode([byte; 32]))).unwrap()
    }

    #[test]
    fn test_encrypt_decrypt() {
        let cipher = cipher(7);
        let sealed = cipher.encrypt("doc-1", b"term sheet v2").unwrap();
        assert_ne!(sealed.ciphertext, STANDARD.encode(b"term sheet v2"));
        assert_eq!(cipher.decrypt("doc-1", &sealed).unwrap(), b"term sheet v2");
    }

    #[test]
    fn test_ciphertext_bound_to_document() {
        let cipher = cipher(7);
        let sealed = cipher.encrypt("doc-1", b"term sheet").unwrap();
        assert!(matches!(
            cipher.decrypt("doc-2", &sealed),
            Err(ServiceError::Encryption(_))
        ));
    }

    #[test]
    fn test_wrong_master_key_fails() {
        let sealed = cipher(7).encrypt("doc-1", b"term sheet").unwrap();
        assert!(cipher(8).decrypt("doc-1", &sealed).is_err());
    }

    #[test]
    fn test_nonce_is_fresh_per_encryption() {
        let cipher = cipher(7);
        let a = cipher.encrypt("doc-1", b"same").unwrap();
        let b = cipher.encrypt("doc-1", b"same").unwrap();
        assert_ne!(a.nonce, b.nonce);
    }

    #[test]
    fn test_rejects_short_master_key() {
        assert!(DocumentCipher::new(&Secret::new(STANDARD.encode([1u8; 16]))).is_err());
    }
}
