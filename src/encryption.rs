//! The encryption collaborator (§6): an external dependency the core calls
//! through but never implements itself. Embedders wire in whatever
//! authenticated-encryption scheme fits their platform; the core only needs
//! encrypt/decrypt and a way to recognize authentication failures so it can
//! surface `auth_required` rather than silently corrupting queued payloads.

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum EncryptionError {
    #[error("authentication failed while decrypting: {0}")]
    AuthenticationFailed(String),

    #[error("encryption backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait Encryption: Send + Sync {
    async fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError>;
    async fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, EncryptionError>;
}

/// Identity implementation for tests and embedders that encrypt at a layer
/// below the core (full-disk encryption, an encrypted filesystem, etc).
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEncryption;

#[async_trait]
impl Encryption for NoopEncryption {
    async fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        Ok(plaintext.to_vec())
    }

    async fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        Ok(ciphertext.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_round_trips() {
        let enc = NoopEncryption;
        let ciphertext = enc.encrypt(b"payload").await.unwrap();
        let plaintext = enc.decrypt(&ciphertext).await.unwrap();
        assert_eq!(plaintext, b"payload");
    }
}
