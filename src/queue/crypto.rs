//! Optional authenticated encryption of queue payloads.
//!
//! Enabled by setting `QueueConfig::symmetric_encryption_keys`. Disabled
//! (default), payloads are stored as plain msgpack bytes.

#[cfg(feature = "encryption")]
mod enabled {
    use chacha20poly1305::aead::{Aead, KeyInit, OsRng};
    use chacha20poly1305::{XChaCha20Poly1305, XNonce};
    use rand::RngCore;
    use sha2::{Digest, Sha256};

    use crate::error::{ChannelLayerError, Result};

    const NONCE_LEN: usize = 24;

    fn derive_key(key_material: &str) -> [u8; 32] {
        let digest = Sha256::digest(key_material.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        key
    }

    /// Seals `plaintext` with the first configured key. Output is
    /// `nonce || ciphertext`.
    pub fn seal(keys: &[String], plaintext: &[u8]) -> Result<Vec<u8>> {
        let key = keys
            .first()
            .ok_or_else(|| ChannelLayerError::backend_unavailable("no encryption key configured"))?;
        let cipher = XChaCha20Poly1305::new(&derive_key(key).into());

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = XNonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| ChannelLayerError::Codec(format!("encryption failed: {e}")))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Opens `sealed`, trying every configured key in order to support
    /// rotation.
    pub fn open(keys: &[String], sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < NONCE_LEN {
            return Err(ChannelLayerError::Codec("sealed payload too short".into()));
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let nonce = XNonce::from_slice(nonce_bytes);

        for key in keys {
            let cipher = XChaCha20Poly1305::new(&derive_key(key).into());
            if let Ok(plaintext) = cipher.decrypt(nonce, ciphertext) {
                return Ok(plaintext);
            }
        }
        Err(ChannelLayerError::Codec("no configured key could open payload".into()))
    }
}

#[cfg(feature = "encryption")]
pub use enabled::{open, seal};

#[cfg(not(feature = "encryption"))]
pub fn seal(_keys: &[String], _plaintext: &[u8]) -> crate::error::Result<Vec<u8>> {
    Err(crate::error::ChannelLayerError::backend_unavailable(
        "encryption feature not enabled",
    ))
}

#[cfg(not(feature = "encryption"))]
pub fn open(_keys: &[String], _sealed: &[u8]) -> crate::error::Result<Vec<u8>> {
    Err(crate::error::ChannelLayerError::backend_unavailable(
        "encryption feature not enabled",
    ))
}

#[cfg(all(test, feature = "encryption"))]
mod tests {
    use super::*;

    #[test]
    fn seal_then_open_round_trips() {
        let keys = vec!["test-key".to_string()];
        let sealed = seal(&keys, b"hello").unwrap();
        assert_eq!(open(&keys, &sealed).unwrap(), b"hello");
    }

    #[test]
    fn wrong_key_fails_to_open() {
        let sealed = seal(&["key-a".to_string()], b"hello").unwrap();
        assert!(open(&["key-b".to_string()], &sealed).is_err());
    }
}
