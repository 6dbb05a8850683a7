//! Connected player state and visibility tracking.

pub mod inventory;
pub mod item_entity;
pub mod manager;
pub mod metadata;

use std::collections::HashSet;
use std::sync::RwLock;

use craft_proto::codec::ProtoEncode;
use craft_proto::packets::{game_mode, Packet};
use craft_proto::slot::Slot;
use craft_proto::types::{fixed_point, Uuid};

use crate::connection::PacketSink;
use inventory::Inventory;

/// A signed Mojang profile property (skin, cape).
#[derive(Debug, Clone)]
pub struct SkinProperty {
    pub name: String,
    pub value: String,
    pub signature: String,
}

/// World position and orientation.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlayerPos {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: f32,
    pub pitch: f32,
    pub on_ground: bool,
}

struct PlayerState {
    pos: PlayerPos,
    last_fixed: (i32, i32, i32),
    game_mode: u8,
    /// bit 1 = sneaking, bit 3 = sprinting.
    entity_flags: u8,
    skin_parts: u8,
    flying: bool,
    inventory: Inventory,
    /// Entity ids this player currently sees.
    tracked: HashSet<i32>,
}

/// A connected player. Shared between its connection (sole writer of
/// position and inventory) and the manager (reader during broadcasts).
pub struct Player {
    pub entity_id: i32,
    /// Hyphenated string form, used as the persistence key.
    pub uuid: String,
    pub uuid_bytes: Uuid,
    pub username: String,
    pub properties: Vec<SkinProperty>,
    sink: PacketSink,
    state: RwLock<PlayerState>,
}

impl Player {
    pub fn new(
        entity_id: i32,
        uuid: String,
        uuid_bytes: Uuid,
        username: String,
        properties: Vec<SkinProperty>,
        sink: PacketSink,
    ) -> Self {
        let pos = PlayerPos {
            x: 0.5,
            y: 4.0,
            z: 0.5,
            ..Default::default()
        };
        Self {
            entity_id,
            uuid,
            uuid_bytes,
            username,
            properties,
            sink,
            state: RwLock::new(PlayerState {
                pos,
                last_fixed: (
                    fixed_point(pos.x),
                    fixed_point(pos.y),
                    fixed_point(pos.z),
                ),
                game_mode: game_mode::SURVIVAL,
                entity_flags: 0,
                skin_parts: 0,
                flying: false,
                inventory: Inventory::new(),
                tracked: HashSet::new(),
            }),
        }
    }

    /// Queue a packet on this player's connection. Send failures are the
    /// connection's problem; broadcasts ignore them.
    pub async fn send<P: Packet + ProtoEncode>(&self, packet: &P) -> std::io::Result<()> {
        self.sink.send(packet).await
    }

    pub fn position(&self) -> PlayerPos {
        self.state.read().unwrap().pos
    }

    /// Update the position and return the old and new fixed-point
    /// coordinates for delta encoding.
    #[allow(clippy::too_many_arguments)]
    pub fn set_position(
        &self,
        x: f64,
        y: f64,
        z: f64,
        yaw: f32,
        pitch: f32,
        on_ground: bool,
    ) -> ((i32, i32, i32), (i32, i32, i32)) {
        let mut state = self.state.write().unwrap();
        let old = state.last_fixed;
        state.pos = PlayerPos {
            x,
            y,
            z,
            yaw,
            pitch,
            on_ground,
        };
        let new = (fixed_point(x), fixed_point(y), fixed_point(z));
        state.last_fixed = new;
        (old, new)
    }

    pub fn update_look(&self, yaw: f32, pitch: f32, on_ground: bool) {
        let mut state = self.state.write().unwrap();
        state.pos.yaw = yaw;
        state.pos.pitch = pitch;
        state.pos.on_ground = on_ground;
    }

    pub fn chunk_x(&self) -> i32 {
        (self.state.read().unwrap().pos.x.floor() as i32) >> 4
    }

    pub fn chunk_z(&self) -> i32 {
        (self.state.read().unwrap().pos.z.floor() as i32) >> 4
    }

    pub fn is_tracking(&self, entity_id: i32) -> bool {
        self.state.read().unwrap().tracked.contains(&entity_id)
    }

    pub fn track(&self, entity_id: i32) {
        self.state.write().unwrap().tracked.insert(entity_id);
    }

    pub fn untrack(&self, entity_id: i32) {
        self.state.write().unwrap().tracked.remove(&entity_id);
    }

    pub fn set_sneaking(&self, sneaking: bool) {
        let mut state = self.state.write().unwrap();
        if sneaking {
            state.entity_flags |= 0x02;
        } else {
            state.entity_flags &= !0x02;
        }
    }

    pub fn set_sprinting(&self, sprinting: bool) {
        let mut state = self.state.write().unwrap();
        if sprinting {
            state.entity_flags |= 0x08;
        } else {
            state.entity_flags &= !0x08;
        }
    }

    pub fn is_sprinting(&self) -> bool {
        self.state.read().unwrap().entity_flags & 0x08 != 0
    }

    pub fn entity_flags(&self) -> u8 {
        self.state.read().unwrap().entity_flags
    }

    pub fn set_skin_parts(&self, parts: u8) {
        self.state.write().unwrap().skin_parts = parts;
    }

    pub fn skin_parts(&self) -> u8 {
        self.state.read().unwrap().skin_parts
    }

    pub fn set_flying(&self, flying: bool) {
        self.state.write().unwrap().flying = flying;
    }

    pub fn game_mode(&self) -> u8 {
        self.state.read().unwrap().game_mode
    }

    pub fn set_game_mode(&self, mode: u8) {
        self.state.write().unwrap().game_mode = mode;
    }

    /// Run a closure with mutable access to the inventory.
    pub fn with_inventory<R>(&self, f: impl FnOnce(&mut Inventory) -> R) -> R {
        f(&mut self.state.write().unwrap().inventory)
    }

    /// Snapshot of the inventory contents.
    pub fn inventory(&self) -> Inventory {
        self.state.read().unwrap().inventory.clone()
    }

    /// Held item plus armor in equipment-packet order (boots first).
    pub fn equipment_snapshot(&self) -> (Slot, [Slot; 4]) {
        let state = self.state.read().unwrap();
        (state.inventory.held_item(), state.inventory.armor)
    }

    /// Restore persisted position, game mode, and inventory.
    pub fn apply_data(&self, pos: PlayerPos, game_mode: u8, inventory: Inventory) {
        let mut state = self.state.write().unwrap();
        state.pos = pos;
        state.last_fixed = (fixed_point(pos.x), fixed_point(pos.y), fixed_point(pos.z));
        state.game_mode = game_mode;
        state.inventory = inventory;
    }
}

/// Chebyshev chunk-distance visibility check.
pub fn in_view_distance(cx1: i32, cz1: i32, cx2: i32, cz2: i32, view_dist: i32) -> bool {
    (cx1 - cx2).abs() <= view_dist && (cz1 - cz2).abs() <= view_dist
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_distance_is_chebyshev() {
        assert!(in_view_distance(0, 0, 8, 8, 8));
        assert!(!in_view_distance(0, 0, 9, 0, 8));
        assert!(!in_view_distance(0, 0, 0, -9, 8));
        assert!(in_view_distance(-4, 3, 4, -5, 8));
    }
}
