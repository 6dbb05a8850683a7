//! The server's RSA keypair for the login handshake.

use rsa::pkcs8::EncodePublicKey;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};

use crate::CryptoError;

/// RSA-1024 keypair generated once at startup. The DER form of the public
/// key goes out in EncryptionRequest and into the session-server hash.
pub struct ServerKeyPair {
    private: RsaPrivateKey,
    public_der: Vec<u8>,
}

impl ServerKeyPair {
    /// Generate a fresh 1024-bit keypair.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, 1024)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        let public_der = RsaPublicKey::from(&private)
            .to_public_key_der()
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?
            .into_vec();
        Ok(Self {
            private,
            public_der,
        })
    }

    /// DER-encoded SubjectPublicKeyInfo.
    pub fn public_key_der(&self) -> &[u8] {
        &self.public_der
    }

    /// Decrypt a PKCS#1 v1.5 ciphertext from the client.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.private
            .decrypt(Pkcs1v15Encrypt, ciphertext)
            .map_err(|_| CryptoError::RsaDecrypt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decrypts_what_the_public_key_encrypted() {
        use rsa::pkcs8::DecodePublicKey;

        let keys = ServerKeyPair::generate().unwrap();
        let public = RsaPublicKey::from_public_key_der(keys.public_key_der()).unwrap();

        let secret = [0x42u8; 16];
        let mut rng = rand::thread_rng();
        let ciphertext = public.encrypt(&mut rng, Pkcs1v15Encrypt, &secret).unwrap();
        assert_eq!(keys.decrypt(&ciphertext).unwrap(), secret);
    }

    #[test]
    fn der_is_subject_public_key_info() {
        let keys = ServerKeyPair::generate().unwrap();
        // DER SEQUENCE tag.
        assert_eq!(keys.public_key_der()[0], 0x30);
        assert!(keys.public_key_der().len() > 100);
    }

    #[test]
    fn garbage_ciphertext_rejected() {
        let keys = ServerKeyPair::generate().unwrap();
        assert!(keys.decrypt(&[0u8; 128]).is_err());
    }
}
