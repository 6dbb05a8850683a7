//! The live world: lazily generated chunk cache, block overrides, and time.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use craft_proto::types::{BlockPos, ChunkPos};
use tracing::debug;

use crate::chunk::ChunkData;
use crate::Generator;

/// Ticks in a full day/night cycle.
pub const DAY_LENGTH: i64 = 24000;

struct WorldState {
    chunks: HashMap<ChunkPos, Arc<ChunkData>>,
    /// Block states that differ from the generator output. Only these are
    /// persisted.
    overrides: HashMap<BlockPos, i32>,
    age: i64,
    time_of_day: i64,
}

/// World model shared between connections and the tick loop. A single
/// read-write lock covers chunks, overrides, and time; chunk generation
/// happens outside the lock.
pub struct World {
    generator: Box<dyn Generator>,
    state: RwLock<WorldState>,
}

impl World {
    pub fn new(generator: Box<dyn Generator>) -> Self {
        Self {
            generator,
            state: RwLock::new(WorldState {
                chunks: HashMap::new(),
                overrides: HashMap::new(),
                age: 0,
                time_of_day: 0,
            }),
        }
    }

    /// Block state at world coordinates. Out-of-range y reads as air.
    pub fn get_block(&self, x: i32, y: i32, z: i32) -> i32 {
        if !(0..256).contains(&y) {
            return 0;
        }
        let pos = BlockPos::new(x, y, z);
        if let Some(state) = self.state.read().unwrap().overrides.get(&pos) {
            return *state;
        }
        self.base_block(x, y, z)
    }

    /// Store a block override; writing the generator's base value removes
    /// the override instead.
    pub fn set_block(&self, x: i32, y: i32, z: i32, state_id: i32) {
        if !(0..256).contains(&y) {
            return;
        }
        let base = self.base_block(x, y, z);
        let pos = BlockPos::new(x, y, z);

        let mut state = self.state.write().unwrap();
        if state_id == base {
            state.overrides.remove(&pos);
        } else {
            state.overrides.insert(pos, state_id);
        }
    }

    /// Generator output at the given coordinates, ignoring overrides.
    fn base_block(&self, x: i32, y: i32, z: i32) -> i32 {
        let chunk = self.get_or_generate_chunk(x >> 4, z >> 4);
        chunk.get_block((x & 15) as usize, y as usize, (z & 15) as usize) as i32
    }

    /// Fetch a chunk, generating and caching it on first access.
    ///
    /// Generation runs without the lock held; a racing generation of the
    /// same chunk is resolved by the double-checked insert.
    pub fn get_or_generate_chunk(&self, cx: i32, cz: i32) -> Arc<ChunkData> {
        let pos = ChunkPos::new(cx, cz);
        if let Some(chunk) = self.state.read().unwrap().chunks.get(&pos) {
            return Arc::clone(chunk);
        }

        let generated = Arc::new(self.generator.generate(cx, cz));
        debug!(cx, cz, "generated chunk");

        let mut state = self.state.write().unwrap();
        Arc::clone(
            state
                .chunks
                .entry(pos)
                .or_insert(generated),
        )
    }

    /// Overrides that fall inside the given chunk.
    pub fn overrides_for_chunk(&self, cx: i32, cz: i32) -> HashMap<BlockPos, i32> {
        let state = self.state.read().unwrap();
        state
            .overrides
            .iter()
            .filter(|(pos, _)| pos.x >> 4 == cx && pos.z >> 4 == cz)
            .map(|(pos, v)| (*pos, *v))
            .collect()
    }

    /// Advance the world clock by one tick and return (age, time of day).
    /// A negative time of day is frozen.
    pub fn tick(&self) -> (i64, i64) {
        let mut state = self.state.write().unwrap();
        state.age += 1;
        if state.time_of_day >= 0 {
            state.time_of_day = (state.time_of_day + 1) % DAY_LENGTH;
        }
        (state.age, state.time_of_day)
    }

    pub fn get_time(&self) -> (i64, i64) {
        let state = self.state.read().unwrap();
        (state.age, state.time_of_day)
    }

    pub fn set_time_of_day(&self, time: i64) {
        self.state.write().unwrap().time_of_day = time;
    }

    /// Restore persisted age and time of day.
    pub fn set_time(&self, age: i64, time_of_day: i64) {
        let mut state = self.state.write().unwrap();
        state.age = age;
        state.time_of_day = time_of_day;
    }

    /// Bulk-load persisted overrides.
    pub fn load_overrides(&self, overrides: HashMap<BlockPos, i32>) {
        self.state.write().unwrap().overrides = overrides;
    }

    /// Visit every override under the read lock.
    pub fn for_each_override(&self, mut f: impl FnMut(BlockPos, i32)) {
        let state = self.state.read().unwrap();
        for (pos, v) in &state.overrides {
            f(*pos, *v);
        }
    }

    /// Visit every cached chunk under the read lock. The callback must not
    /// call back into the world.
    pub fn for_each_chunk(&self, mut f: impl FnMut(ChunkPos, &ChunkData)) {
        let state = self.state.read().unwrap();
        for (pos, chunk) in &state.chunks {
            f(*pos, chunk);
        }
    }

    /// Snapshot of all cached chunks, for work that needs world access
    /// while iterating.
    pub fn chunks_snapshot(&self) -> Vec<(ChunkPos, Arc<ChunkData>)> {
        let state = self.state.read().unwrap();
        state
            .chunks
            .iter()
            .map(|(pos, chunk)| (*pos, Arc::clone(chunk)))
            .collect()
    }

    pub fn override_count(&self) -> usize {
        self.state.read().unwrap().overrides.len()
    }

    /// Y coordinate players spawn at: one above the terrain at the origin.
    pub fn spawn_height(&self) -> i32 {
        self.generator.height_at(0, 0) + 1
    }

    pub fn height_at(&self, bx: i32, bz: i32) -> i32 {
        self.generator.height_at(bx, bz)
    }

    /// Generate every chunk inside the given radius up front.
    pub fn pre_generate_radius(&self, radius: i32) {
        for cx in -radius..=radius {
            for cz in -radius..=radius {
                self.get_or_generate_chunk(cx, cz);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block;
    use crate::flat::FlatGenerator;

    fn flat_world() -> World {
        World::new(Box::new(FlatGenerator::new(0)))
    }

    #[test]
    fn base_blocks_from_generator() {
        let world = flat_world();
        assert_eq!(world.get_block(0, 0, 0), (block::state(block::BEDROCK, 0)) as i32);
        assert_eq!(world.get_block(3, 4, 9), (block::state(block::GRASS, 0)) as i32);
        assert_eq!(world.get_block(0, 5, 0), 0);
    }

    #[test]
    fn out_of_range_y_is_air() {
        let world = flat_world();
        assert_eq!(world.get_block(0, -1, 0), 0);
        assert_eq!(world.get_block(0, 256, 0), 0);
        // Writes outside the column are dropped.
        world.set_block(0, 300, 0, 16);
        assert_eq!(world.override_count(), 0);
    }

    #[test]
    fn override_set_and_collapse() {
        let world = flat_world();
        let stone = (block::state(block::STONE, 0)) as i32;

        world.set_block(5, 10, 5, stone);
        assert_eq!(world.get_block(5, 10, 5), stone);
        assert_eq!(world.override_count(), 1);

        // Writing the base value back must remove the override.
        world.set_block(5, 10, 5, 0);
        assert_eq!(world.get_block(5, 10, 5), 0);
        assert_eq!(world.override_count(), 0);
    }

    #[test]
    fn base_value_write_is_not_stored() {
        let world = flat_world();
        let grass = (block::state(block::GRASS, 0)) as i32;
        world.set_block(1, 4, 1, grass);
        assert_eq!(world.override_count(), 0);
    }

    #[test]
    fn chunk_cache_returns_same_instance() {
        let world = flat_world();
        let a = world.get_or_generate_chunk(2, 3);
        let b = world.get_or_generate_chunk(2, 3);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn overrides_filtered_per_chunk() {
        let world = flat_world();
        world.set_block(5, 10, 5, 99);
        world.set_block(20, 10, 5, 98);
        world.set_block(-1, 10, -1, 97);

        let at_origin = world.overrides_for_chunk(0, 0);
        assert_eq!(at_origin.len(), 1);
        assert_eq!(at_origin[&BlockPos::new(5, 10, 5)], 99);

        assert_eq!(world.overrides_for_chunk(1, 0).len(), 1);
        assert_eq!(world.overrides_for_chunk(-1, -1).len(), 1);
    }

    #[test]
    fn tick_advances_clock() {
        let world = flat_world();
        let (age, time) = world.tick();
        assert_eq!((age, time), (1, 1));

        world.set_time_of_day(DAY_LENGTH - 1);
        let (_, time) = world.tick();
        assert_eq!(time, 0);
    }

    #[test]
    fn negative_time_is_frozen() {
        let world = flat_world();
        world.set_time_of_day(-6000);
        world.tick();
        let (age, time) = world.get_time();
        assert_eq!(age, 1);
        assert_eq!(time, -6000);
    }

    #[test]
    fn spawn_height_above_terrain() {
        assert_eq!(flat_world().spawn_height(), 5);
    }

    #[test]
    fn pre_generate_fills_cache() {
        let world = flat_world();
        world.pre_generate_radius(1);
        let mut count = 0;
        world.for_each_chunk(|_, _| count += 1);
        assert_eq!(count, 9);
    }
}
