//! File-based persistence: config, world overrides, Anvil regions, and
//! player snapshots. All writes are atomic (temp file + rename).

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use craft_proto::slot::Slot;
use craft_proto::types::{BlockPos, ChunkPos};
use craft_world::{anvil, World};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::{Config, PartialConfig};
use crate::player::inventory::Inventory;
use crate::player::manager::Manager;
use crate::player::{Player, PlayerPos};

/// Serializable player snapshot (players/<uuid>.json).
#[derive(Debug, Serialize, Deserialize)]
pub struct PlayerData {
    pub uuid: String,
    pub username: String,
    pub position: PositionData,
    #[serde(rename = "gamemode")]
    pub game_mode: u8,
    pub inventory: InventoryData,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PositionData {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: f32,
    pub pitch: f32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InventoryData {
    pub slots: Vec<SlotData>,
    pub armor: Vec<SlotData>,
    pub held_slot: i16,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SlotData {
    pub block_id: i16,
    pub item_count: i8,
    pub item_damage: i16,
}

impl SlotData {
    fn from_slot(slot: Slot) -> Self {
        Self {
            block_id: slot.block_id,
            item_count: slot.count,
            item_damage: slot.damage,
        }
    }

    fn to_slot(self) -> Slot {
        Slot {
            block_id: self.block_id,
            count: self.item_count,
            damage: self.item_damage,
        }
    }
}

/// World metadata plus the full override list (world/overrides.json).
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct WorldData {
    pub age: i64,
    pub time_of_day: i64,
    #[serde(default)]
    pub overrides: Vec<BlockOverride>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BlockOverride {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub state_id: i32,
}

impl PlayerData {
    pub fn from_player(player: &Player) -> Self {
        let pos = player.position();
        let inv = player.inventory();
        Self {
            uuid: player.uuid.clone(),
            username: player.username.clone(),
            position: PositionData {
                x: pos.x,
                y: pos.y,
                z: pos.z,
                yaw: pos.yaw,
                pitch: pos.pitch,
            },
            game_mode: player.game_mode(),
            inventory: InventoryData {
                slots: inv.slots.iter().copied().map(SlotData::from_slot).collect(),
                armor: inv.armor.iter().copied().map(SlotData::from_slot).collect(),
                held_slot: inv.held_slot,
            },
        }
    }

    /// Rebuild the runtime inventory, tolerating short or long slot lists.
    pub fn to_inventory(&self) -> Inventory {
        let mut inv = Inventory::new();
        for (i, slot) in self.inventory.slots.iter().take(36).enumerate() {
            inv.slots[i] = slot.to_slot();
        }
        for (i, slot) in self.inventory.armor.iter().take(4).enumerate() {
            inv.armor[i] = slot.to_slot();
        }
        inv.held_slot = self.inventory.held_slot.clamp(0, 8);
        inv
    }

    pub fn saved_position(&self) -> PlayerPos {
        PlayerPos {
            x: self.position.x,
            y: self.position.y,
            z: self.position.z,
            yaw: self.position.yaw,
            pitch: self.position.pitch,
            on_ground: true,
        }
    }
}

/// Root of the on-disk layout:
///
/// ```text
/// <data-dir>/
///   config.json
///   world/overrides.json
///   world/region/r.<rx>.<rz>.mca
///   players/<uuid>.json
/// ```
pub struct Storage {
    dir: PathBuf,
}

impl Storage {
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        for sub in [dir.clone(), dir.join("world"), dir.join("players")] {
            std::fs::create_dir_all(&sub)?;
        }
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Read config.json if present. A malformed file is a startup error.
    pub fn load_config(&self) -> io::Result<Option<PartialConfig>> {
        let path = self.dir.join("config.json");
        let data = match std::fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let partial = serde_json::from_str(&data)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        info!(path = %path.display(), "loaded config from file");
        Ok(Some(partial))
    }

    /// Write the effective config back.
    pub fn save_config(&self, cfg: &Config) -> io::Result<()> {
        self.atomic_write_json(&self.dir.join("config.json"), cfg)
    }

    /// Load persisted block overrides and world time.
    pub fn load_world(&self, world: &World) -> io::Result<()> {
        let path = self.dir.join("world").join("overrides.json");
        let data = match std::fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        let world_data: WorldData = serde_json::from_str(&data)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let mut overrides = HashMap::with_capacity(world_data.overrides.len());
        for entry in &world_data.overrides {
            overrides.insert(BlockPos::new(entry.x, entry.y, entry.z), entry.state_id);
        }
        let count = overrides.len();
        world.load_overrides(overrides);
        world.set_time(world_data.age, world_data.time_of_day);
        info!(count, "loaded world overrides");
        Ok(())
    }

    /// Write overrides.json.
    pub fn save_world(&self, world: &World) -> io::Result<()> {
        let (age, time_of_day) = world.get_time();
        let mut world_data = WorldData {
            age,
            time_of_day,
            overrides: Vec::new(),
        };
        world.for_each_override(|pos, state_id| {
            world_data.overrides.push(BlockOverride {
                x: pos.x,
                y: pos.y,
                z: pos.z,
                state_id,
            });
        });
        self.atomic_write_json(&self.dir.join("world").join("overrides.json"), &world_data)
    }

    /// Write every cached chunk into Anvil region files.
    pub fn save_world_anvil(&self, world: &World) -> io::Result<()> {
        let region_dir = self.dir.join("world").join("region");

        let mut regions: HashMap<(i32, i32), HashMap<ChunkPos, Vec<u8>>> = HashMap::new();
        for (pos, chunk) in world.chunks_snapshot() {
            let overrides = world.overrides_for_chunk(pos.x, pos.z);
            let nbt = anvil::encode_chunk_nbt(pos.x, pos.z, &chunk, &overrides);
            regions
                .entry(anvil::region_for_chunk(pos))
                .or_default()
                .insert(pos, nbt);
        }

        for ((rx, rz), chunks) in &regions {
            anvil::save_region(&region_dir, *rx, *rz, chunks)?;
        }
        Ok(())
    }

    /// Read a player snapshot, or None when absent or unparsable.
    pub fn load_player(&self, uuid: &str) -> Option<PlayerData> {
        let path = self.dir.join("players").join(format!("{uuid}.json"));
        let data = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&data) {
            Ok(player) => Some(player),
            Err(e) => {
                warn!(uuid, error = %e, "failed to parse player data");
                None
            }
        }
    }

    pub fn save_player(&self, player: &Player) -> io::Result<()> {
        let data = PlayerData::from_player(player);
        let path = self.dir.join("players").join(format!("{}.json", player.uuid));
        self.atomic_write_json(&path, &data)
    }

    /// Save the world (both formats) and every connected player. File
    /// failures are logged, never fatal.
    pub async fn save_all(&self, world: &World, players: &Manager) {
        if let Err(e) = self.save_world(world) {
            error!(error = %e, "saving world overrides failed");
        } else {
            info!(overrides = world.override_count(), "world saved");
        }
        if let Err(e) = self.save_world_anvil(world) {
            error!(error = %e, "saving anvil regions failed");
        }

        let mut saved = 0usize;
        for player in players.players().await {
            match self.save_player(&player) {
                Ok(()) => saved += 1,
                Err(e) => error!(player = %player.username, error = %e, "saving player failed"),
            }
        }
        info!(count = saved, "players saved");
    }

    fn atomic_write_json<T: Serialize>(&self, path: &Path, value: &T) -> io::Result<()> {
        let mut data = serde_json::to_vec_pretty(value)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        data.push(b'\n');

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, &data)?;
        if let Err(e) = std::fs::rename(&tmp, path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use craft_proto::slot::EMPTY_SLOT;
    use craft_world::FlatGenerator;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn empty_slots(n: usize) -> Vec<SlotData> {
        (0..n).map(|_| SlotData::from_slot(EMPTY_SLOT)).collect()
    }

    fn temp_storage() -> Storage {
        let dir = std::env::temp_dir().join(format!(
            "craft_persist_{}_{}",
            std::process::id(),
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        Storage::new(dir).unwrap()
    }

    fn flat_world() -> World {
        World::new(Box::new(FlatGenerator::new(0)))
    }

    #[test]
    fn storage_creates_layout() {
        let storage = temp_storage();
        assert!(storage.dir().join("world").is_dir());
        assert!(storage.dir().join("players").is_dir());
        std::fs::remove_dir_all(storage.dir()).ok();
    }

    #[test]
    fn world_overrides_roundtrip() {
        let storage = temp_storage();
        let world = flat_world();
        world.set_block(5, 10, 5, 16);
        world.set_block(-3, 200, 7, 0x20);
        world.set_time(123, 6000);

        storage.save_world(&world).unwrap();
        assert!(storage.dir().join("world").join("overrides.json").exists());

        let restored = flat_world();
        storage.load_world(&restored).unwrap();
        assert_eq!(restored.get_block(5, 10, 5), 16);
        assert_eq!(restored.get_block(-3, 200, 7), 0x20);
        assert_eq!(restored.get_time(), (123, 6000));
        assert_eq!(restored.override_count(), 2);

        std::fs::remove_dir_all(storage.dir()).ok();
    }

    #[test]
    fn anvil_save_writes_regions() {
        let storage = temp_storage();
        let world = flat_world();
        world.get_or_generate_chunk(0, 0);
        world.get_or_generate_chunk(-1, 0);

        storage.save_world_anvil(&world).unwrap();
        let region_dir = storage.dir().join("world").join("region");
        assert!(region_dir.join("r.0.0.mca").exists());
        assert!(region_dir.join("r.-1.0.mca").exists());

        std::fs::remove_dir_all(storage.dir()).ok();
    }

    #[test]
    fn player_data_roundtrip() {
        let storage = temp_storage();

        let mut inventory = InventoryData {
            slots: empty_slots(36),
            armor: empty_slots(4),
            held_slot: 3,
        };
        inventory.slots[0] = SlotData {
            block_id: 276,
            item_count: 1,
            item_damage: 0,
        };

        let data = PlayerData {
            uuid: "4566e69f-c907-48ee-8d71-d7ba5aa00d20".into(),
            username: "Alice".into(),
            position: PositionData {
                x: 10.5,
                y: 65.0,
                z: -20.25,
                yaw: 90.0,
                pitch: -5.0,
            },
            game_mode: 0,
            inventory,
        };

        let path = storage
            .dir()
            .join("players")
            .join(format!("{}.json", data.uuid));
        let json = serde_json::to_string_pretty(&data).unwrap();
        std::fs::write(&path, json).unwrap();

        let loaded = storage.load_player(&data.uuid).unwrap();
        assert_eq!(loaded.username, "Alice");
        assert_eq!(loaded.position.x, 10.5);
        assert_eq!(loaded.game_mode, 0);
        assert_eq!(loaded.inventory.held_slot, 3);

        let inv = loaded.to_inventory();
        assert_eq!(inv.slots[0].block_id, 276);
        assert_eq!(inv.held_slot, 3);
        assert!(inv.slots[1].is_empty());

        std::fs::remove_dir_all(storage.dir()).ok();
    }

    #[test]
    fn missing_player_returns_none() {
        let storage = temp_storage();
        assert!(storage.load_player("nonexistent").is_none());
        std::fs::remove_dir_all(storage.dir()).ok();
    }

    #[test]
    fn config_roundtrip_tolerates_unknown_fields() {
        let storage = temp_storage();

        std::fs::write(
            storage.dir().join("config.json"),
            r#"{"port": 25566, "motd": "Hi", "unknown_field": true}"#,
        )
        .unwrap();

        let partial = storage.load_config().unwrap().unwrap();
        assert_eq!(partial.port, Some(25566));
        assert_eq!(partial.motd.as_deref(), Some("Hi"));
        assert_eq!(partial.seed, None);

        let mut cfg = Config::default();
        cfg.apply_file(&partial);
        assert_eq!(cfg.port, 25566);
        assert_eq!(cfg.motd, "Hi");

        storage.save_config(&cfg).unwrap();
        let reloaded = storage.load_config().unwrap().unwrap();
        assert_eq!(reloaded.port, Some(25566));

        std::fs::remove_dir_all(storage.dir()).ok();
    }

    #[test]
    fn atomic_write_leaves_no_temp() {
        let storage = temp_storage();
        let world = flat_world();
        storage.save_world(&world).unwrap();
        let world_dir = storage.dir().join("world");
        let leftovers: Vec<_> = std::fs::read_dir(&world_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
        std::fs::remove_dir_all(storage.dir()).ok();
    }
}
