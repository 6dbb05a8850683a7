//! Biome selection from temperature/rainfall noise fields.

use crate::noise::OctaveNoise;
use crate::SEA_LEVEL;

/// Biome ids matching the 1.8 protocol.
pub const OCEAN: u8 = 0;
pub const PLAINS: u8 = 1;
pub const DESERT: u8 = 2;
pub const MOUNTAINS: u8 = 3; // extreme hills
pub const FOREST: u8 = 4;
pub const TAIGA: u8 = 5;
pub const TUNDRA: u8 = 12; // ice plains
pub const BEACH: u8 = 16;
pub const JUNGLE: u8 = 21;
pub const DARK_FOREST: u8 = 29; // roofed forest
pub const SNOWY_TAIGA: u8 = 30; // cold taiga
pub const SAVANNA: u8 = 35;

/// Selects biomes from two uncorrelated noise fields plus a terrain
/// pre-check for oceans and beaches.
pub struct BiomeSelector {
    temp_noise: OctaveNoise,
    rain_noise: OctaveNoise,
    terrain: OctaveNoise,
}

impl BiomeSelector {
    pub fn new(seed: i64) -> Self {
        Self {
            temp_noise: OctaveNoise::new((seed as u64).wrapping_add(100), 4, 0.5),
            rain_noise: OctaveNoise::new((seed as u64).wrapping_add(200), 4, 0.5),
            terrain: OctaveNoise::new(seed as u64, 6, 0.5),
        }
    }

    /// Biome id at world block coordinates.
    pub fn biome_at(&self, bx: i32, bz: i32) -> u8 {
        let tx = bx as f64 / 512.0;
        let tz = bz as f64 / 512.0;
        // Remap to temperature in [-0.05, 1.55] and rainfall in [0, 1].
        let temp = self.temp_noise.sample_2d(tx, tz) * 0.8 + 0.75;
        let rain = self.rain_noise.sample_2d(tx + 100.0, tz + 100.0) * 0.5 + 0.5;

        // Very low terrain is ocean, terrain just below sea level is beach,
        // regardless of climate.
        let nx = bx as f64 / 128.0;
        let nz = bz as f64 / 128.0;
        let terrain_height = 62.0 + self.terrain.sample_2d(nx, nz) * 8.0;
        if terrain_height < (SEA_LEVEL - 8) as f64 {
            return OCEAN;
        }
        if terrain_height < (SEA_LEVEL - 2) as f64 {
            return BEACH;
        }

        select_biome(temp, rain)
    }
}

/// Map temperature and rainfall to a biome id.
///
///	Temp\Rain     | Dry (<0.3)    | Medium (0.3-0.6)  | Wet (>0.6)
///	Cold <0.3     | Tundra (12)   | Snowy Taiga (30)  | Taiga (5)
///	Mild 0.3-0.7  | Plains (1)    | Forest (4)        | Dark Forest (29)
///	Warm 0.7-1.2  | Savanna (35)  | Plains (1)        | Jungle (21)
///	Hot >1.2      | Desert (2)    | Desert (2)        | Jungle (21)
fn select_biome(temp: f64, rain: f64) -> u8 {
    if temp < 0.3 {
        if rain < 0.3 {
            TUNDRA
        } else if rain < 0.6 {
            SNOWY_TAIGA
        } else {
            TAIGA
        }
    } else if temp < 0.7 {
        if rain < 0.3 {
            PLAINS
        } else if rain < 0.6 {
            FOREST
        } else {
            DARK_FOREST
        }
    } else if temp < 1.2 {
        if rain < 0.3 {
            SAVANNA
        } else if rain < 0.6 {
            PLAINS
        } else {
            JUNGLE
        }
    } else if rain > 0.6 {
        JUNGLE
    } else {
        DESERT
    }
}

/// Terrain noise scaling per biome: (amplitude, base height).
pub fn terrain_params(biome: u8) -> (f64, f64) {
    let sea = SEA_LEVEL as f64;
    match biome {
        OCEAN => (8.0, 40.0),
        PLAINS | SAVANNA => (12.0, sea),
        FOREST | DARK_FOREST => (16.0, sea + 2.0),
        TAIGA | SNOWY_TAIGA => (18.0, sea + 4.0),
        DESERT => (10.0, sea + 2.0),
        JUNGLE => (18.0, sea + 4.0),
        MOUNTAINS => (40.0, sea + 10.0),
        BEACH => (3.0, sea),
        TUNDRA => (10.0, sea),
        _ => (14.0, sea),
    }
}

/// Trees placed per chunk, by biome.
pub fn trees_for_biome(biome: u8) -> u32 {
    match biome {
        DESERT | OCEAN | BEACH => 0,
        PLAINS | SAVANNA => 1,
        TUNDRA | SNOWY_TAIGA => 4,
        TAIGA => 6,
        FOREST => 8,
        DARK_FOREST => 10,
        JUNGLE => 12,
        _ => 2,
    }
}
