//! Minecraft Java Edition protocol types and packet definitions.

pub mod codec;
pub mod error;
pub mod frame;
pub mod packets;
pub mod slot;
pub mod types;

/// Protocol version implemented by this server (Minecraft 1.8.x).
pub const PROTOCOL_VERSION: i32 = 47;

/// Game version string reported in the status response.
pub const GAME_VERSION: &str = "1.8.9";

/// Entity metadata terminator byte for protocol versions below 110.
pub const METADATA_END: u8 = 0x7F;
