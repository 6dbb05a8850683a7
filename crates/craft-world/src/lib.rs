//! World model: deterministic chunk generation, the override store, the
//! MC 1.8 chunk wire encoding, and Anvil region persistence.

pub mod anvil;
pub mod biome;
pub mod block;
pub mod chunk;
pub mod codec;
pub mod flat;
pub mod noise;
pub mod overworld;
pub mod world;

pub use chunk::ChunkData;
pub use flat::FlatGenerator;
pub use overworld::OverworldGenerator;
pub use world::World;

/// Standard sea level.
pub const SEA_LEVEL: i32 = 62;

/// A chunk generator: same seed + same coordinates must yield byte-identical
/// output.
pub trait Generator: Send + Sync {
    fn generate(&self, chunk_x: i32, chunk_z: i32) -> ChunkData;

    /// Terrain height (top solid block) at world block coordinates.
    fn height_at(&self, block_x: i32, block_z: i32) -> i32;
}
