//! AES-128/CFB8 stream cipher.
//!
//! The protocol layers one AES-128 key over the socket after the encryption
//! handshake, using the 16-byte shared secret as both key and IV. Encrypt
//! and decrypt keep independent feedback registers, so each direction gets
//! its own cipher instance. State is continuous across packets.

use aes::Aes128;
use cfb8::cipher::generic_array::GenericArray;
use cfb8::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use cfb8::{Decryptor, Encryptor};

use crate::CryptoError;

/// Outbound CFB8 stream.
pub struct Cfb8Encryptor {
    cipher: Encryptor<Aes128>,
}

/// Inbound CFB8 stream.
pub struct Cfb8Decryptor {
    cipher: Decryptor<Aes128>,
}

fn secret_key(shared_secret: &[u8]) -> Result<[u8; 16], CryptoError> {
    shared_secret
        .try_into()
        .map_err(|_| CryptoError::BadSecretLength(shared_secret.len()))
}

impl Cfb8Encryptor {
    /// Create from the 16-byte shared secret (key = IV).
    pub fn new(shared_secret: &[u8]) -> Result<Self, CryptoError> {
        let key = secret_key(shared_secret)?;
        Ok(Self {
            cipher: Encryptor::<Aes128>::new((&key).into(), (&key).into()),
        })
    }

    /// Encrypt in place, one byte of feedback at a time.
    pub fn encrypt(&mut self, data: &mut [u8]) {
        for byte in data.iter_mut() {
            let mut block = GenericArray::clone_from_slice(std::slice::from_ref(byte));
            self.cipher.encrypt_block_mut(&mut block);
            *byte = block[0];
        }
    }
}

impl Cfb8Decryptor {
    /// Create from the 16-byte shared secret (key = IV).
    pub fn new(shared_secret: &[u8]) -> Result<Self, CryptoError> {
        let key = secret_key(shared_secret)?;
        Ok(Self {
            cipher: Decryptor::<Aes128>::new((&key).into(), (&key).into()),
        })
    }

    /// Decrypt in place, one byte of feedback at a time.
    pub fn decrypt(&mut self, data: &mut [u8]) {
        for byte in data.iter_mut() {
            let mut block = GenericArray::clone_from_slice(std::slice::from_ref(byte));
            self.cipher.decrypt_block_mut(&mut block);
            *byte = block[0];
        }
    }
}
