use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use async_trait::async_trait;
use page_store_common::BackendError;

use crate::transform::PageDataTransform;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// AES-256-GCM page encryption.
///
/// Every write picks a fresh random 12-byte nonce; the stored blob is
/// `nonce || ciphertext || tag`, a fixed 28 bytes larger than the
/// plaintext. The GCM tag authenticates the page, so a wrong key or a
/// tampered blob fails with `DecryptionFailed` instead of yielding
/// garbage bytes.
pub struct AesGcmTransform {
    cipher: Aes256Gcm,
}

impl AesGcmTransform {
    /// Build a transform from a 32-byte AES-256 key. Any other key length
    /// fails with `InvalidKey`.
    pub fn new(key: &[u8]) -> Result<Self, BackendError> {
        let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| BackendError::InvalidKey)?;
        Ok(Self { cipher })
    }
}

#[async_trait]
impl PageDataTransform for AesGcmTransform {
    fn overhead(&self) -> u32 {
        (NONCE_LEN + TAG_LEN) as u32
    }

    async fn transform(&self, data: Vec<u8>) -> Result<Vec<u8>, BackendError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, data.as_ref())
            .map_err(|_| BackendError::Other("AES-GCM encryption failed".to_string()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(nonce.as_slice());
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    async fn reverse_transform(&self, data: Vec<u8>) -> Result<Vec<u8>, BackendError> {
        if data.len() < NONCE_LEN + TAG_LEN {
            return Err(BackendError::DecryptionFailed);
        }
        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| BackendError::DecryptionFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> [u8; 32] {
        [0x11; 32]
    }

    #[tokio::test]
    async fn test_round_trip() {
        let transform = AesGcmTransform::new(&key()).unwrap();
        let data = b"page bytes under encryption".to_vec();

        let stored = transform.transform(data.clone()).await.unwrap();
        assert_eq!(stored.len(), data.len() + NONCE_LEN + TAG_LEN);
        assert_eq!(transform.reverse_transform(stored).await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_fresh_nonce_per_write() {
        let transform = AesGcmTransform::new(&key()).unwrap();
        let a = transform.transform(vec![1, 2, 3]).await.unwrap();
        let b = transform.transform(vec![1, 2, 3]).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_wrong_key_length_rejected() {
        assert!(matches!(
            AesGcmTransform::new(&[0u8; 16]),
            Err(BackendError::InvalidKey)
        ));
    }

    #[tokio::test]
    async fn test_tampered_blob_rejected() {
        let transform = AesGcmTransform::new(&key()).unwrap();
        let mut stored = transform.transform(vec![5; 64]).await.unwrap();
        let last = stored.len() - 1;
        stored[last] ^= 1;
        assert!(matches!(
            transform.reverse_transform(stored).await,
            Err(BackendError::DecryptionFailed)
        ));
    }

    #[tokio::test]
    async fn test_wrong_key_fails_decryption() {
        let writer = AesGcmTransform::new(&key()).unwrap();
        let reader = AesGcmTransform::new(&[0x22; 32]).unwrap();
        let stored = writer.transform(vec![5; 64]).await.unwrap();
        assert!(matches!(
            reader.reverse_transform(stored).await,
            Err(BackendError::DecryptionFailed)
        ));
    }

    #[tokio::test]
    async fn test_short_blob_rejected() {
        let transform = AesGcmTransform::new(&key()).unwrap();
        assert!(matches!(
            transform.reverse_transform(vec![0; 27]).await,
            Err(BackendError::DecryptionFailed)
        ));
    }
}
