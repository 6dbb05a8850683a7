//! Anvil region file persistence (.mca).
//!
//! Each region holds up to 32×32 chunks in 4096-byte sectors: sector 0 is
//! the location table, sector 1 the timestamp table, and the rest zlib'd
//! chunk NBT prefixed with a length and compression-type header.

use std::collections::HashMap;
use std::io::{self, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::BytesMut;
use craft_nbt::{NbtCompound, NbtRoot, NbtTag};
use craft_proto::types::{BlockPos, ChunkPos};
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::chunk::{ChunkData, SECTION_COUNT};

const SECTOR_SIZE: usize = 4096;
const HEADER_SECTORS: usize = 2;
const COMPRESSION_ZLIB: u8 = 2;

/// Encode a chunk as the MC 1.8 Anvil NBT compound, with overrides for this
/// chunk overlaid.
pub fn encode_chunk_nbt(
    cx: i32,
    cz: i32,
    chunk: &ChunkData,
    overrides: &HashMap<BlockPos, i32>,
) -> Vec<u8> {
    // Sections present in the base chunk, plus sections that only exist
    // because of overrides.
    let mut has_section = [false; SECTION_COUNT];
    for (i, sec) in chunk.sections.iter().enumerate() {
        has_section[i] = sec.is_some();
    }
    for pos in overrides.keys() {
        if (0..256).contains(&pos.y) {
            has_section[(pos.y >> 4) as usize] = true;
        }
    }

    let mut sections = Vec::new();
    for (sec_y, present) in has_section.iter().enumerate() {
        if !present {
            continue;
        }

        let mut blocks = vec![0u8; 4096];
        let mut data = vec![0u8; 2048];
        let mut add = vec![0u8; 2048];
        let mut has_add = false;

        let state_at = |x: usize, ly: usize, z: usize| -> u16 {
            let wy = (sec_y * 16 + ly) as i32;
            let pos = BlockPos::new(cx * 16 + x as i32, wy, cz * 16 + z as i32);
            match overrides.get(&pos) {
                Some(v) => *v as u16,
                None => chunk.get_block(x, wy as usize, z),
            }
        };

        for ly in 0..16usize {
            for z in 0..16usize {
                for x in 0..16usize {
                    let i = ly * 256 + z * 16 + x;
                    let state = state_at(x, ly, z);
                    let block_id = state >> 4;
                    blocks[i] = block_id as u8;
                    set_nibble(&mut data, i, (state & 0xF) as u8);
                    if block_id > 255 {
                        has_add = true;
                        set_nibble(&mut add, i, (block_id >> 8) as u8);
                    }
                }
            }
        }

        let mut section = NbtCompound::new();
        section.insert("Y".into(), NbtTag::Byte(sec_y as i8));
        section.insert("Blocks".into(), NbtTag::ByteArray(blocks));
        if has_add {
            section.insert("Add".into(), NbtTag::ByteArray(add));
        }
        section.insert("Data".into(), NbtTag::ByteArray(data));
        section.insert("BlockLight".into(), NbtTag::ByteArray(vec![0xFF; 2048]));
        section.insert("SkyLight".into(), NbtTag::ByteArray(vec![0xFF; 2048]));
        sections.push(NbtTag::Compound(section));
    }

    let mut level = NbtCompound::new();
    level.insert("xPos".into(), NbtTag::Int(cx));
    level.insert("zPos".into(), NbtTag::Int(cz));
    level.insert("TerrainPopulated".into(), NbtTag::Byte(1));
    level.insert("LastUpdate".into(), NbtTag::Long(0));
    level.insert("Sections".into(), NbtTag::List(sections));
    level.insert("Biomes".into(), NbtTag::ByteArray(chunk.biomes.to_vec()));
    level.insert(
        "HeightMap".into(),
        NbtTag::IntArray(compute_height_map(chunk, overrides)),
    );

    let mut root = NbtCompound::new();
    root.insert("Level".into(), NbtTag::Compound(level));

    let mut buf = BytesMut::new();
    craft_nbt::write_nbt(&mut buf, &NbtRoot::new("", root));
    buf.to_vec()
}

/// Write all given chunks into `dir/r.<rx>.<rz>.mca` atomically.
///
/// `chunks` maps chunk positions (in world chunk coordinates) to their
/// uncompressed NBT payloads.
pub fn save_region(
    dir: &Path,
    rx: i32,
    rz: i32,
    chunks: &HashMap<ChunkPos, Vec<u8>>,
) -> io::Result<()> {
    std::fs::create_dir_all(dir)?;

    let mut locations = vec![0u8; SECTOR_SIZE];
    let mut timestamps = vec![0u8; SECTOR_SIZE];
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as u32;

    let mut data_buf: Vec<u8> = Vec::new();
    let mut current_sector = HEADER_SECTORS as u32;

    for (pos, nbt_data) in chunks {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(nbt_data)?;
        let compressed = encoder.finish()?;

        // Chunk payload: length (4) + compression type (1) + compressed NBT,
        // padded to a sector boundary.
        let payload_len = compressed.len() as u32 + 1;
        let total_len = 4 + payload_len as usize;
        let sector_count = total_len.div_ceil(SECTOR_SIZE);

        let index = ((pos.x & 31) + (pos.z & 31) * 32) as usize;
        let entry = (current_sector << 8) | (sector_count as u32 & 0xFF);
        locations[index * 4..index * 4 + 4].copy_from_slice(&entry.to_be_bytes());
        timestamps[index * 4..index * 4 + 4].copy_from_slice(&now.to_be_bytes());

        data_buf.extend_from_slice(&payload_len.to_be_bytes());
        data_buf.push(COMPRESSION_ZLIB);
        data_buf.extend_from_slice(&compressed);

        let padded = sector_count * SECTOR_SIZE;
        data_buf.resize(data_buf.len() + (padded - total_len), 0);

        current_sector += sector_count as u32;
    }

    let path = dir.join(format!("r.{rx}.{rz}.mca"));
    let tmp = dir.join(format!("r.{rx}.{rz}.mca.tmp"));

    let mut file_data = Vec::with_capacity(2 * SECTOR_SIZE + data_buf.len());
    file_data.extend_from_slice(&locations);
    file_data.extend_from_slice(&timestamps);
    file_data.extend_from_slice(&data_buf);

    std::fs::write(&tmp, &file_data)?;
    if let Err(e) = std::fs::rename(&tmp, &path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

/// Region coordinates containing the given chunk.
pub fn region_for_chunk(pos: ChunkPos) -> (i32, i32) {
    (pos.x >> 5, pos.z >> 5)
}

fn set_nibble(arr: &mut [u8], index: usize, val: u8) {
    let byte = index / 2;
    if index % 2 == 0 {
        arr[byte] = (arr[byte] & 0xF0) | (val & 0x0F);
    } else {
        arr[byte] = (arr[byte] & 0x0F) | ((val & 0x0F) << 4);
    }
}

/// Highest non-air block per column, including overrides.
fn compute_height_map(chunk: &ChunkData, overrides: &HashMap<BlockPos, i32>) -> Vec<i32> {
    let mut hm = vec![0i32; 256];

    for z in 0..16usize {
        for x in 0..16usize {
            for y in (0..256usize).rev() {
                if chunk.get_block(x, y, z) != 0 {
                    hm[z * 16 + x] = y as i32 + 1;
                    break;
                }
            }
        }
    }

    for (pos, state) in overrides {
        let idx = ((pos.z & 15) * 16 + (pos.x & 15)) as usize;
        if *state != 0 && pos.y + 1 > hm[idx] {
            hm[idx] = pos.y + 1;
        }
    }

    hm
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block;
    use crate::flat::FlatGenerator;
    use crate::Generator;
    use flate2::read::ZlibDecoder;
    use std::io::Read;
    use std::path::PathBuf;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "craft_anvil_{}_{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn chunk_nbt_structure() {
        let chunk = FlatGenerator::new(0).generate(3, -5);
        let data = encode_chunk_nbt(3, -5, &chunk, &HashMap::new());

        let root = craft_nbt::read_nbt(&mut bytes::Bytes::from(data.clone())).unwrap();
        assert_eq!(root.name, "");
        let level = root.compound["Level"].as_compound().unwrap();
        assert_eq!(level["xPos"].as_int(), Some(3));
        assert_eq!(level["zPos"].as_int(), Some(-5));
        assert_eq!(level["TerrainPopulated"].as_byte(), Some(1));
        assert_eq!(level["LastUpdate"].as_long(), Some(0));

        let sections = level["Sections"].as_list().unwrap();
        assert_eq!(sections.len(), 1);
        let section = sections[0].as_compound().unwrap();
        assert_eq!(section["Y"].as_byte(), Some(0));

        let blocks = section["Blocks"].as_byte_array().unwrap();
        assert_eq!(blocks.len(), 4096);
        // y=0 is bedrock, y=4 is grass.
        assert_eq!(blocks[0], block::BEDROCK as u8);
        assert_eq!(blocks[4 * 256], block::GRASS as u8);

        assert_eq!(section["Data"].as_byte_array().unwrap().len(), 2048);
        assert!(section["BlockLight"]
            .as_byte_array()
            .unwrap()
            .iter()
            .all(|&b| b == 0xFF));
        assert!(section.get("Add").is_none());

        assert_eq!(level["Biomes"].as_byte_array().unwrap().len(), 256);
        let height_map = level["HeightMap"].as_int_array().unwrap();
        assert_eq!(height_map.len(), 256);
        assert!(height_map.iter().all(|&h| h == 5));
    }

    #[test]
    fn overrides_reflected_in_nbt() {
        let chunk = FlatGenerator::new(0).generate(0, 0);
        let mut overrides = HashMap::new();
        overrides.insert(
            BlockPos::new(5, 100, 5),
            (block::state(block::STONE, 0)) as i32,
        );

        let data = encode_chunk_nbt(0, 0, &chunk, &overrides);
        let root = craft_nbt::read_nbt(&mut bytes::Bytes::from(data)).unwrap();
        let level = root.compound["Level"].as_compound().unwrap();
        let sections = level["Sections"].as_list().unwrap();
        // Section 0 from terrain plus section 6 from the override.
        assert_eq!(sections.len(), 2);

        let sec6 = sections
            .iter()
            .map(|s| s.as_compound().unwrap())
            .find(|s| s["Y"].as_byte() == Some(6))
            .unwrap();
        let blocks = sec6["Blocks"].as_byte_array().unwrap();
        assert_eq!(blocks[4 * 256 + 5 * 16 + 5], block::STONE as u8);

        let height_map = level["HeightMap"].as_int_array().unwrap();
        assert_eq!(height_map[5 * 16 + 5], 101);
    }

    #[test]
    fn region_file_sector_layout() {
        let dir = temp_dir();
        let chunk = FlatGenerator::new(0).generate(0, 0);
        let nbt = encode_chunk_nbt(0, 0, &chunk, &HashMap::new());

        let mut chunks = HashMap::new();
        chunks.insert(ChunkPos::new(0, 0), nbt.clone());
        save_region(&dir, 0, 0, &chunks).unwrap();

        let raw = std::fs::read(dir.join("r.0.0.mca")).unwrap();
        assert!(raw.len() >= 3 * SECTOR_SIZE);
        assert_eq!(raw.len() % SECTOR_SIZE, 0);

        // Location entry for chunk (0,0).
        let entry = u32::from_be_bytes(raw[0..4].try_into().unwrap());
        let offset = (entry >> 8) as usize;
        let sector_count = (entry & 0xFF) as usize;
        assert_eq!(offset, 2);
        assert!(sector_count >= 1);

        // Chunk header: payload length + zlib marker.
        let base = offset * SECTOR_SIZE;
        let payload_len = u32::from_be_bytes(raw[base..base + 4].try_into().unwrap()) as usize;
        assert_eq!(raw[base + 4], COMPRESSION_ZLIB);

        // Decompress and compare against the original NBT.
        let compressed = &raw[base + 5..base + 4 + payload_len];
        let mut decoder = ZlibDecoder::new(compressed);
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed).unwrap();
        assert_eq!(decompressed, nbt);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn negative_chunk_coordinates_map_into_region() {
        let dir = temp_dir();
        let chunk = FlatGenerator::new(0).generate(-1, -1);
        let nbt = encode_chunk_nbt(-1, -1, &chunk, &HashMap::new());

        let mut chunks = HashMap::new();
        chunks.insert(ChunkPos::new(-1, -1), nbt);
        assert_eq!(region_for_chunk(ChunkPos::new(-1, -1)), (-1, -1));
        save_region(&dir, -1, -1, &chunks).unwrap();

        let raw = std::fs::read(dir.join("r.-1.-1.mca")).unwrap();
        // Chunk (-1,-1) lands at local (31,31) = index 1023.
        let entry = u32::from_be_bytes(raw[1023 * 4..1023 * 4 + 4].try_into().unwrap());
        assert_eq!(entry >> 8, 2);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn no_temp_file_left_behind() {
        let dir = temp_dir();
        let chunks = HashMap::new();
        save_region(&dir, 0, 0, &chunks).unwrap();
        assert!(dir.join("r.0.0.mca").exists());
        assert!(!dir.join("r.0.0.mca.tmp").exists());
        std::fs::remove_dir_all(&dir).ok();
    }
}
