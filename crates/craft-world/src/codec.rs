//! MC 1.8 chunk-data wire encoding.
//!
//! Payload layout for a ground-up chunk: per set section 4096 little-endian
//! u16 block states, then per set section 2048 bytes block light and 2048
//! bytes sky light (always full-bright here), then 256 biome bytes.

use std::collections::HashMap;

use bytes::{BufMut, BytesMut};
use craft_proto::types::BlockPos;

use crate::chunk::{ChunkData, SECTION_COUNT};

const SECTION_LIGHT_BYTES: usize = 2048;

/// Encode the chunk payload, overlaying overrides. Returns the section
/// bitmap and the payload bytes.
pub fn encode_chunk(
    cx: i32,
    cz: i32,
    chunk: &ChunkData,
    overrides: &HashMap<BlockPos, i32>,
) -> (u16, Vec<u8>) {
    let mut bitmap = chunk.section_bitmap();
    // Sections reachable only through overrides still need their bit set.
    for pos in overrides.keys() {
        if (0..256).contains(&pos.y) {
            bitmap |= 1 << (pos.y >> 4);
        }
    }
    // Clients need at least one section in a ground-up chunk.
    if bitmap == 0 {
        bitmap = 0x0001;
    }

    let section_count = bitmap.count_ones() as usize;
    let mut buf = BytesMut::with_capacity(section_count * (8192 + 2 * SECTION_LIGHT_BYTES) + 256);

    for sec in 0..SECTION_COUNT {
        if bitmap & (1 << sec) == 0 {
            continue;
        }
        let base_y = (sec * 16) as i32;
        for y in 0..16usize {
            for z in 0..16usize {
                for x in 0..16usize {
                    let wy = base_y + y as i32;
                    let pos = BlockPos::new(cx * 16 + x as i32, wy, cz * 16 + z as i32);
                    let state = match overrides.get(&pos) {
                        Some(v) => *v as u16,
                        None => chunk.get_block(x, wy as usize, z),
                    };
                    buf.put_u16_le(state);
                }
            }
        }
    }

    // Block light, then sky light: full brightness, no lighting engine.
    for _ in 0..2 * section_count {
        buf.put_bytes(0xFF, SECTION_LIGHT_BYTES);
    }

    buf.put_slice(&chunk.biomes);

    (bitmap, buf.to_vec())
}

/// Payload for unloading a chunk: ground-up with an empty bitmap.
pub fn unload_payload() -> (u16, Vec<u8>) {
    (0, Vec::new())
}
