//! Cryptography for the 1.8 login handshake and packet stream.

mod cfb8;
mod hash;
mod keys;
mod offline;

pub use cfb8::{Cfb8Decryptor, Cfb8Encryptor};
pub use hash::server_hash;
pub use keys::ServerKeyPair;
pub use offline::offline_uuid;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("RSA key generation failed: {0}")]
    KeyGeneration(String),

    #[error("RSA decryption failed")]
    RsaDecrypt,

    #[error("verify token mismatch")]
    VerifyTokenMismatch,

    #[error("invalid shared secret length: {0}")]
    BadSecretLength(usize),
}
