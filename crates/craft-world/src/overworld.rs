//! Overworld terrain generator.
//!
//! Four deterministic passes per chunk: terrain + surface layers, cave
//! carving, ore veins, and tree/vegetation decoration. All randomness is
//! derived from the world seed, so the same seed and chunk coordinates
//! always produce identical output.

use crate::biome::{self, BiomeSelector};
use crate::block;
use crate::chunk::ChunkData;
use crate::noise::{OctaveNoise, PerlinNoise};
use crate::{Generator, SEA_LEVEL};

const CAVE_THRESHOLD: f64 = 0.55;
const LAVA_LEVEL: i32 = 10;

struct OreConfig {
    block: u16,
    min_y: i32,
    max_y: i32,
    vein_size: u32,
    attempts: u32,
}

const ORES: [OreConfig; 6] = [
    OreConfig {
        block: block::COAL_ORE,
        min_y: 0,
        max_y: 128,
        vein_size: 12,
        attempts: 20,
    },
    OreConfig {
        block: block::IRON_ORE,
        min_y: 0,
        max_y: 64,
        vein_size: 8,
        attempts: 20,
    },
    OreConfig {
        block: block::GOLD_ORE,
        min_y: 0,
        max_y: 32,
        vein_size: 8,
        attempts: 2,
    },
    OreConfig {
        block: block::DIAMOND_ORE,
        min_y: 0,
        max_y: 16,
        vein_size: 6,
        attempts: 1,
    },
    OreConfig {
        block: block::REDSTONE_ORE,
        min_y: 0,
        max_y: 16,
        vein_size: 6,
        attempts: 8,
    },
    OreConfig {
        block: block::LAPIS_ORE,
        min_y: 0,
        max_y: 32,
        vein_size: 6,
        attempts: 1,
    },
];

/// Deterministic per-chunk RNG (LCG), seeded from the world seed, the chunk
/// coordinates, and a per-pass salt.
pub(crate) struct ChunkRng {
    state: i64,
}

impl ChunkRng {
    pub(crate) fn new(seed: i64, cx: i32, cz: i32, salt: i64) -> Self {
        let mix = (cx as i64)
            .wrapping_mul(341_873_128_712)
            .wrapping_add((cz as i64).wrapping_mul(132_897_987_541))
            .wrapping_add(salt);
        Self { state: seed ^ mix }
    }

    fn next(&mut self) -> i64 {
        self.state = self
            .state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        self.state
    }

    pub(crate) fn next_n(&mut self, n: i32) -> i32 {
        let v = ((self.next() >> 33) % n as i64) as i32;
        v.abs()
    }
}

pub struct OverworldGenerator {
    seed: i64,
    terrain_noise: OctaveNoise,
    detail_noise: OctaveNoise,
    bedrock_noise: PerlinNoise,
    biome_selector: BiomeSelector,
    cave_noise_1: PerlinNoise,
    cave_noise_2: PerlinNoise,
}

impl OverworldGenerator {
    pub fn new(seed: i64) -> Self {
        let useed = seed as u64;
        Self {
            seed,
            terrain_noise: OctaveNoise::new(useed, 6, 0.5),
            detail_noise: OctaveNoise::new(useed.wrapping_add(1), 3, 0.5),
            bedrock_noise: PerlinNoise::new(useed),
            biome_selector: BiomeSelector::new(seed),
            cave_noise_1: PerlinNoise::new(useed.wrapping_add(300)),
            cave_noise_2: PerlinNoise::new(useed.wrapping_add(400)),
        }
    }

    fn terrain_height(&self, bx: i32, bz: i32, biome_id: u8) -> i32 {
        let base = self
            .terrain_noise
            .sample_2d(bx as f64 / 128.0, bz as f64 / 128.0);
        let detail = self
            .detail_noise
            .sample_2d(bx as f64 / 32.0, bz as f64 / 32.0);

        let (amplitude, base_height) = biome::terrain_params(biome_id);
        let height = base_height + base * amplitude + detail * 4.0;
        (height as i32).clamp(1, 250)
    }

    fn fill_column(&self, chunk: &mut ChunkData, x: usize, z: usize, height: i32, biome_id: u8) {
        chunk.set_block(x, 0, z, block::state(block::BEDROCK, 0));
        // y=1..3: pseudo-random bedrock/stone mix.
        for y in 1..=3usize {
            let bx = x + y * 7;
            let v = self.bedrock_noise.noise_2d(bx as f64 * 0.5, z as f64 * 0.5);
            if v > 0.0 {
                chunk.set_block(x, y, z, block::state(block::BEDROCK, 0));
            } else {
                chunk.set_block(x, y, z, block::state(block::STONE, 0));
            }
        }

        let depth = surface_layer_depth(biome_id);
        let stone_top = (height - depth).max(4);
        for y in 4..=stone_top.min(height) {
            chunk.set_block(x, y as usize, z, block::state(block::STONE, 0));
        }

        apply_surface(chunk, x, z, height, biome_id);

        if height < SEA_LEVEL {
            for y in (height + 1)..=SEA_LEVEL {
                chunk.set_block(x, y as usize, z, block::state(block::WATER, 0));
            }
        }
    }

    fn carve_caves(&self, chunk: &mut ChunkData, cx: i32, cz: i32, heights: &[[i32; 16]; 16]) {
        for x in 0..16usize {
            for z in 0..16usize {
                let max_y = heights[x][z];
                if max_y < 5 {
                    continue;
                }
                let bx = (cx * 16 + x as i32) as f64;
                let bz = (cz * 16 + z as i32) as f64;

                for y in 4..(max_y - 4) {
                    let by = y as f64;
                    let n1 = self.cave_noise_1.noise_3d(bx / 32.0, by / 24.0, bz / 32.0);
                    let n2 = self.cave_noise_2.noise_3d(bx / 48.0, by / 32.0, bz / 48.0);
                    if (n1 + n2) / 2.0 > CAVE_THRESHOLD {
                        let state = if y < LAVA_LEVEL {
                            block::state(block::LAVA, 0)
                        } else {
                            0
                        };
                        chunk.set_block(x, y as usize, z, state);
                    }
                }
            }
        }
    }

    fn place_ores(&self, chunk: &mut ChunkData, cx: i32, cz: i32, heights: &[[i32; 16]; 16]) {
        let mut rng = ChunkRng::new(self.seed, cx, cz, 500);

        for ore in &ORES {
            for _ in 0..ore.attempts {
                let x = rng.next_n(16);
                let y = ore.min_y + rng.next_n(ore.max_y - ore.min_y);
                let z = rng.next_n(16);

                if y >= heights[x as usize][z as usize] {
                    continue;
                }
                self.place_vein(chunk, x, y, z, ore.block, ore.vein_size, heights, &mut rng);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn place_vein(
        &self,
        chunk: &mut ChunkData,
        mut cx: i32,
        mut cy: i32,
        mut cz: i32,
        ore_block: u16,
        size: u32,
        heights: &[[i32; 16]; 16],
        rng: &mut ChunkRng,
    ) {
        let stone = block::state(block::STONE, 0);
        for _ in 0..size {
            if (0..16).contains(&cx)
                && (0..16).contains(&cz)
                && cy >= 1
                && cy < heights[cx as usize][cz as usize]
                && chunk.get_block(cx as usize, cy as usize, cz as usize) == stone
            {
                chunk.set_block(cx as usize, cy as usize, cz as usize, block::state(ore_block, 0));
            }
            match rng.next_n(6) {
                0 => cx += 1,
                1 => cx -= 1,
                2 => cy += 1,
                3 => cy -= 1,
                4 => cz += 1,
                _ => cz -= 1,
            }
        }
    }

    fn decorate(&self, chunk: &mut ChunkData, cx: i32, cz: i32, heights: &[[i32; 16]; 16]) {
        let mut rng = ChunkRng::new(self.seed, cx, cz, 600);

        // Tree density from the chunk-center biome.
        let center_biome = chunk.biome(8, 8);
        let grass = block::state(block::GRASS, 0);

        for _ in 0..biome::trees_for_biome(center_biome) {
            let x = rng.next_n(16) as usize;
            let z = rng.next_n(16) as usize;
            let y = heights[x][z];

            if y <= SEA_LEVEL || y >= 250 {
                continue;
            }
            if chunk.get_block(x, y as usize, z) != grass {
                continue;
            }
            let local_biome = chunk.biome(x, z);
            self.place_tree(chunk, x, y + 1, z, local_biome, &mut rng);
        }

        self.place_vegetation(chunk, heights, &mut rng);
    }

    fn place_tree(
        &self,
        chunk: &mut ChunkData,
        x: usize,
        base_y: i32,
        z: usize,
        biome_id: u8,
        rng: &mut ChunkRng,
    ) {
        match biome_id {
            biome::TAIGA | biome::SNOWY_TAIGA => place_spruce(chunk, x, base_y, z, rng),
            biome::FOREST | biome::DARK_FOREST => {
                if rng.next_n(3) == 0 {
                    place_canopy_tree(chunk, x, base_y, z, block::META_BIRCH, 5, 2, rng);
                } else {
                    place_canopy_tree(chunk, x, base_y, z, block::META_OAK, 4, 3, rng);
                }
            }
            _ => place_canopy_tree(chunk, x, base_y, z, block::META_OAK, 4, 3, rng),
        }
    }

    fn place_vegetation(&self, chunk: &mut ChunkData, heights: &[[i32; 16]; 16], rng: &mut ChunkRng) {
        let grass = block::state(block::GRASS, 0);
        let sand = block::state(block::SAND, 0);

        for _ in 0..20 {
            let x = rng.next_n(16) as usize;
            let z = rng.next_n(16) as usize;
            let y = heights[x][z];
            if y <= SEA_LEVEL || y >= 255 {
                continue;
            }
            let biome_id = chunk.biome(x, z);
            let top = chunk.get_block(x, y as usize, z);

            match biome_id {
                biome::DESERT => {
                    if top != sand {
                        continue;
                    }
                    if rng.next_n(8) == 0 {
                        let h = 1 + rng.next_n(3);
                        for dy in 1..=h {
                            if y + dy < 256 {
                                chunk.set_block(
                                    x,
                                    (y + dy) as usize,
                                    z,
                                    block::state(block::CACTUS, 0),
                                );
                            }
                        }
                    } else if rng.next_n(4) == 0 {
                        chunk.set_block(x, (y + 1) as usize, z, block::state(block::DEAD_BUSH, 0));
                    }
                }
                biome::PLAINS
                | biome::FOREST
                | biome::DARK_FOREST
                | biome::SAVANNA
                | biome::JUNGLE => {
                    if top != grass {
                        continue;
                    }
                    if rng.next_n(3) == 0 {
                        // Metadata 1 = tall grass, not dead shrub.
                        chunk.set_block(x, (y + 1) as usize, z, block::state(block::TALL_GRASS, 1));
                    } else if rng.next_n(8) == 0 {
                        chunk.set_block(x, (y + 1) as usize, z, block::state(block::FLOWER, 0));
                    }
                }
                biome::TAIGA | biome::SNOWY_TAIGA | biome::TUNDRA => {
                    if top != grass {
                        continue;
                    }
                    if rng.next_n(6) == 0 {
                        chunk.set_block(x, (y + 1) as usize, z, block::state(block::TALL_GRASS, 1));
                    }
                }
                _ => {}
            }
        }
    }
}

impl Generator for OverworldGenerator {
    fn generate(&self, chunk_x: i32, chunk_z: i32) -> ChunkData {
        let mut chunk = ChunkData::new();

        // Pass 1: heightmap, biomes, terrain columns.
        let mut heights = [[0i32; 16]; 16];
        for x in 0..16usize {
            for z in 0..16usize {
                let bx = chunk_x * 16 + x as i32;
                let bz = chunk_z * 16 + z as i32;

                let biome_id = self.biome_selector.biome_at(bx, bz);
                chunk.set_biome(x, z, biome_id);

                let height = self.terrain_height(bx, bz, biome_id);
                heights[x][z] = height;

                self.fill_column(&mut chunk, x, z, height, biome_id);
            }
        }

        // Pass 2: caves.
        self.carve_caves(&mut chunk, chunk_x, chunk_z, &heights);

        // Pass 3: ores.
        self.place_ores(&mut chunk, chunk_x, chunk_z, &heights);

        // Pass 4: trees and vegetation.
        self.decorate(&mut chunk, chunk_x, chunk_z, &heights);

        chunk
    }

    fn height_at(&self, block_x: i32, block_z: i32) -> i32 {
        let biome_id = self.biome_selector.biome_at(block_x, block_z);
        self.terrain_height(block_x, block_z, biome_id)
    }
}

/// Surface material layers below the top block.
fn surface_layer_depth(biome_id: u8) -> i32 {
    match biome_id {
        biome::DESERT => 5,
        _ => 4,
    }
}

fn apply_surface(chunk: &mut ChunkData, x: usize, z: usize, height: i32, biome_id: u8) {
    match biome_id {
        biome::DESERT => {
            let mut y = height;
            while y > height - 4 && y > 3 {
                chunk.set_block(x, y as usize, z, block::state(block::SAND, 0));
                y -= 1;
            }
            if height - 4 > 3 {
                chunk.set_block(x, (height - 4) as usize, z, block::state(block::SANDSTONE, 0));
            }
            if height - 5 > 3 {
                chunk.set_block(x, (height - 5) as usize, z, block::state(block::SANDSTONE, 0));
            }
        }

        biome::OCEAN => {
            let mut y = height;
            while y > height - 3 && y > 3 {
                chunk.set_block(x, y as usize, z, block::state(block::GRAVEL, 0));
                y -= 1;
            }
            let mut y = height - 3;
            while y > height - 5 && y > 3 {
                chunk.set_block(x, y as usize, z, block::state(block::DIRT, 0));
                y -= 1;
            }
        }

        biome::BEACH => {
            let mut y = height;
            while y > height - 4 && y > 3 {
                chunk.set_block(x, y as usize, z, block::state(block::SAND, 0));
                y -= 1;
            }
            if height - 4 > 3 {
                chunk.set_block(x, (height - 4) as usize, z, block::state(block::SANDSTONE, 0));
            }
        }

        biome::MOUNTAINS if height > 100 => {
            // Bare stone peaks above the tree line.
            let mut y = height;
            while y > height - 4 && y > 3 {
                chunk.set_block(x, y as usize, z, block::state(block::STONE, 0));
                y -= 1;
            }
        }

        _ => apply_default_surface(chunk, x, z, height),
    }
}

/// Grass on top with dirt below; dirt on top when underwater.
fn apply_default_surface(chunk: &mut ChunkData, x: usize, z: usize, height: i32) {
    if height <= 3 {
        return;
    }
    if height > SEA_LEVEL {
        chunk.set_block(x, height as usize, z, block::state(block::GRASS, 0));
    } else {
        chunk.set_block(x, height as usize, z, block::state(block::DIRT, 0));
    }
    let mut y = height - 1;
    while y > height - 4 && y > 3 {
        chunk.set_block(x, y as usize, z, block::state(block::DIRT, 0));
        y -= 1;
    }
}

/// Oak/birch style tree: straight trunk plus a rounded two-radius canopy.
fn place_canopy_tree(
    chunk: &mut ChunkData,
    x: usize,
    base_y: i32,
    z: usize,
    variant: u16,
    min_trunk: i32,
    trunk_range: i32,
    rng: &mut ChunkRng,
) {
    let trunk_height = min_trunk + rng.next_n(trunk_range);
    if base_y + trunk_height + 2 > 255 {
        return;
    }

    let log = block::state(block::LOG, variant);
    let leaves = block::state(block::LEAVES, variant);

    for y in base_y..base_y + trunk_height {
        chunk.set_block(x, y as usize, z, log);
    }

    let leaf_base = base_y + trunk_height - 2;
    for dy in 0..4 {
        let y = leaf_base + dy;
        let radius: i32 = if dy >= 2 { 1 } else { 2 };
        for dx in -radius..=radius {
            for dz in -radius..=radius {
                let lx = x as i32 + dx;
                let lz = z as i32 + dz;
                if !(0..16).contains(&lx) || !(0..16).contains(&lz) {
                    continue;
                }
                // Don't replace the trunk.
                if dx == 0 && dz == 0 && dy < 2 {
                    continue;
                }
                // Thin the corners for a rounder shape.
                if radius == 2 && dx.abs() == 2 && dz.abs() == 2 && rng.next_n(2) == 0 {
                    continue;
                }
                if chunk.get_block(lx as usize, y as usize, lz as usize) == 0 {
                    chunk.set_block(lx as usize, y as usize, lz as usize, leaves);
                }
            }
        }
    }
}

/// Spruce: taller trunk with a conical canopy.
fn place_spruce(chunk: &mut ChunkData, x: usize, base_y: i32, z: usize, rng: &mut ChunkRng) {
    let trunk_height = 6 + rng.next_n(4);
    if base_y + trunk_height + 1 > 255 {
        return;
    }

    let log = block::state(block::LOG, block::META_SPRUCE);
    let leaves = block::state(block::LEAVES, block::META_SPRUCE);

    for y in base_y..base_y + trunk_height {
        chunk.set_block(x, y as usize, z, log);
    }

    for dy in 1..=trunk_height {
        let y = base_y + dy;
        let radius = ((trunk_height - dy) / 2).min(3);
        if radius <= 0 && dy < trunk_height {
            continue;
        }
        // Only every other row for the wider layers.
        if radius >= 2 && dy % 2 == 0 {
            continue;
        }
        for dx in -radius..=radius {
            for dz in -radius..=radius {
                let lx = x as i32 + dx;
                let lz = z as i32 + dz;
                if !(0..16).contains(&lx) || !(0..16).contains(&lz) {
                    continue;
                }
                if dx == 0 && dz == 0 {
                    continue;
                }
                if chunk.get_block(lx as usize, y as usize, lz as usize) == 0 {
                    chunk.set_block(lx as usize, y as usize, lz as usize, leaves);
                }
            }
        }
    }
    let top_y = base_y + trunk_height;
    if top_y < 256 {
        chunk.set_block(x, top_y as usize, z, leaves);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_gen() -> OverworldGenerator {
        OverworldGenerator::new(42)
    }

    #[test]
    fn deterministic_generation() {
        let gen1 = OverworldGenerator::new(42);
        let gen2 = OverworldGenerator::new(42);
        let c1 = gen1.generate(5, -3);
        let c2 = gen2.generate(5, -3);

        for y in 0..256 {
            for x in 0..16 {
                for z in 0..16 {
                    assert_eq!(
                        c1.get_block(x, y, z),
                        c2.get_block(x, y, z),
                        "mismatch at ({x}, {y}, {z})"
                    );
                }
            }
        }
        assert_eq!(c1.biomes, c2.biomes);
    }

    #[test]
    fn bedrock_floor() {
        let chunk = test_gen().generate(0, 0);
        for x in 0..16 {
            for z in 0..16 {
                assert_eq!(
                    chunk.get_block(x, 0, z),
                    block::state(block::BEDROCK, 0),
                    "bedrock missing at ({x}, 0, {z})"
                );
            }
        }
    }

    #[test]
    fn lower_bedrock_band_is_solid() {
        // y=1..3 is the pseudo-random bedrock/stone mix; ore veins may
        // wander in and replace stone, but the band never ends up hollow.
        let chunk = test_gen().generate(2, 2);
        for x in 0..16 {
            for z in 0..16 {
                for y in 1..=3 {
                    let b = chunk.get_block(x, y, z);
                    assert_ne!(b, 0, "air at ({x}, {y}, {z})");
                }
            }
        }
    }

    #[test]
    fn terrain_has_stone() {
        let chunk = test_gen().generate(0, 0);
        let stone = block::state(block::STONE, 0);
        let mut stone_count = 0;
        for y in 4..60 {
            if chunk.get_block(8, y, 8) == stone {
                stone_count += 1;
            }
        }
        assert!(stone_count > 10, "only {stone_count} stone blocks");
    }

    #[test]
    fn different_seeds_different_terrain() {
        let c1 = OverworldGenerator::new(1).generate(0, 0);
        let c2 = OverworldGenerator::new(9999).generate(0, 0);
        let mut differences = 0;
        for y in 40..90 {
            for x in 0..16 {
                if c1.get_block(x, y, 8) != c2.get_block(x, y, 8) {
                    differences += 1;
                }
            }
        }
        assert!(differences > 0);
    }

    #[test]
    fn low_terrain_is_flooded_to_sea_level() {
        let gen = test_gen();
        let water = block::state(block::WATER, 0);
        let mut found = false;
        'outer: for cx in -10..10 {
            for cz in -10..10 {
                let chunk = gen.generate(cx, cz);
                for x in 0..16 {
                    for z in 0..16 {
                        if chunk.get_block(x, SEA_LEVEL as usize, z) == water {
                            found = true;
                            break 'outer;
                        }
                    }
                }
            }
        }
        assert!(found, "no water at sea level in a 20x20 chunk area");
    }

    #[test]
    fn ores_replace_stone_only() {
        let gen = test_gen();
        let ore_states = [
            block::state(block::COAL_ORE, 0),
            block::state(block::IRON_ORE, 0),
            block::state(block::GOLD_ORE, 0),
            block::state(block::DIAMOND_ORE, 0),
            block::state(block::REDSTONE_ORE, 0),
            block::state(block::LAPIS_ORE, 0),
        ];
        let mut ore_count = 0;
        for cx in 0..4 {
            for cz in 0..4 {
                let chunk = gen.generate(cx, cz);
                for y in 1..128 {
                    for x in 0..16 {
                        for z in 0..16 {
                            if ore_states.contains(&chunk.get_block(x, y, z)) {
                                ore_count += 1;
                            }
                        }
                    }
                }
            }
        }
        assert!(ore_count > 0, "no ores generated in 16 chunks");
    }

    #[test]
    fn height_at_matches_heightmap_clamps() {
        let gen = test_gen();
        for (bx, bz) in [(0, 0), (100, -250), (-1000, 1000)] {
            let h = gen.height_at(bx, bz);
            assert!((1..=250).contains(&h), "height {h} out of range");
        }
    }

    #[test]
    fn chunk_rng_is_deterministic_and_salted() {
        let mut a = ChunkRng::new(42, 3, -7, 500);
        let mut b = ChunkRng::new(42, 3, -7, 500);
        let mut c = ChunkRng::new(42, 3, -7, 600);
        let series_a: Vec<i32> = (0..32).map(|_| a.next_n(16)).collect();
        let series_b: Vec<i32> = (0..32).map(|_| b.next_n(16)).collect();
        let series_c: Vec<i32> = (0..32).map(|_| c.next_n(16)).collect();
        assert_eq!(series_a, series_b);
        assert_ne!(series_a, series_c);
        assert!(series_a.iter().all(|v| (0..16).contains(v)));
    }
}
