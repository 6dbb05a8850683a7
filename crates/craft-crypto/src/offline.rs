//! Offline-mode UUID derivation.

/// Version-3 UUID over `"OfflinePlayer:" ++ username`, matching vanilla's
/// `nameUUIDFromBytes`: MD5 with the version nibble forced to 3 and the
/// RFC 4122 variant bits set.
pub fn offline_uuid(username: &str) -> [u8; 16] {
    let digest = md5::compute(format!("OfflinePlayer:{username}"));
    let mut uuid: [u8; 16] = digest.0;
    uuid[6] = (uuid[6] & 0x0F) | 0x30;
    uuid[8] = (uuid[8] & 0x3F) | 0x80;
    uuid
}
