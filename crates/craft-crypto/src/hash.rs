//! The Minecraft session-server hash.

use num_bigint::BigInt;
use sha1::{Digest, Sha1};

/// Compute the hash sent to the Mojang session server: SHA-1 of
/// `server_id ++ shared_secret ++ public_key_der`, interpreted as a signed
/// 160-bit two's-complement integer and printed as minimal lowercase hex
/// (negative values prefixed with `-`).
pub fn server_hash(server_id: &str, shared_secret: &[u8], public_key_der: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(server_id.as_bytes());
    hasher.update(shared_secret);
    hasher.update(public_key_der);
    let digest = hasher.finalize();

    BigInt::from_signed_bytes_be(&digest).to_str_radix(16)
}
