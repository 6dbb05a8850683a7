//! Player manager: membership, tab list, entity visibility, and dropped
//! items.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};
use std::sync::Arc;

use craft_proto::codec::{ProtoEncode, RestBytes};
use craft_proto::packets::{
    CollectItem, EntityDestroy, EntityHeadRotation, EntityMetadata, EntityTeleport,
    NamedEntitySpawn, Packet, PlayerInfo, SpawnEntity,
};
use craft_proto::slot::Slot;
use craft_proto::types::{degrees_to_angle, fixed_point, VarInt};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use super::item_entity::{
    build_spawn_entity, build_spawn_entity_at_rest, simulate_landing, throw_velocity, ItemEntity,
    PICKUP_RADIUS,
};
use super::metadata::{
    build_destroy_entities, build_entity_metadata, build_equipment_packets, build_item_metadata,
    build_named_entity_spawn, build_player_info_add, build_player_info_game_mode,
    build_player_info_remove, with_entity_id,
};
use super::{in_view_distance, Player};
use craft_proto::packets::EntityEquipment;

/// Ticks between absolute-position resyncs.
const RESYNC_INTERVAL: i64 = 400;

/// Ticks between expired-item sweeps.
const ITEM_CLEANUP_INTERVAL: i64 = 600;

struct PlayerMaps {
    players: HashMap<i32, Arc<Player>>,
    by_uuid: HashMap<String, i32>,
}

/// Tracks all connected players and routes visibility events. Broadcasts
/// hold the players read lock for their full duration, so a broadcast is
/// never interleaved with add/remove.
pub struct Manager {
    maps: RwLock<PlayerMaps>,
    /// Separate lock from the player maps; always acquired after it.
    items: Mutex<HashMap<i32, ItemEntity>>,
    next_entity_id: AtomicI32,
    current_tick: AtomicI64,
    view_distance: i32,
}

impl Manager {
    pub fn new(view_distance: i32) -> Self {
        Self {
            maps: RwLock::new(PlayerMaps {
                players: HashMap::new(),
                by_uuid: HashMap::new(),
            }),
            items: Mutex::new(HashMap::new()),
            next_entity_id: AtomicI32::new(0),
            current_tick: AtomicI64::new(0),
            view_distance,
        }
    }

    /// Next unique entity id (server scope, never reused).
    pub fn allocate_entity_id(&self) -> i32 {
        self.next_entity_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn current_tick(&self) -> i64 {
        self.current_tick.load(Ordering::Relaxed)
    }

    /// Advance one tick and run periodic maintenance.
    pub async fn tick(&self) {
        let tick = self.current_tick.fetch_add(1, Ordering::Relaxed) + 1;

        if tick % ITEM_CLEANUP_INTERVAL == 0 {
            self.cleanup_expired_items(tick).await;
        }
        if tick % RESYNC_INTERVAL == 0 {
            self.resync_positions().await;
        }
    }

    /// Register a player: cross-wise tab-list entries, spawns within view
    /// distance, and the current item entities.
    pub async fn add(&self, player: Arc<Player>) {
        {
            let mut maps = self.maps.write().await;
            maps.players.insert(player.entity_id, Arc::clone(&player));
            maps.by_uuid.insert(player.uuid.clone(), player.entity_id);

            let new_info = build_player_info_add(&player);
            let (cx, cz) = (player.chunk_x(), player.chunk_z());

            // The player needs their own entry so the client renders its
            // skin in the inventory.
            let _ = player
                .send(&PlayerInfo {
                    data: RestBytes::new(new_info.clone()),
                })
                .await;

            let others: Vec<Arc<Player>> = maps
                .players
                .values()
                .filter(|p| p.entity_id != player.entity_id)
                .cloned()
                .collect();
            for other in &others {
                let _ = player
                    .send(&PlayerInfo {
                        data: RestBytes::new(build_player_info_add(other)),
                    })
                    .await;
                let _ = other
                    .send(&PlayerInfo {
                        data: RestBytes::new(new_info.clone()),
                    })
                    .await;

                if in_view_distance(cx, cz, other.chunk_x(), other.chunk_z(), self.view_distance)
                {
                    self.spawn_player_for(other, &player).await;
                    self.spawn_player_for(&player, other).await;
                }
            }
        }

        // Send live item entities to the newcomer.
        let item_packets: Vec<(Vec<u8>, Vec<u8>)> = {
            let items = self.items.lock().await;
            items
                .values()
                .map(|ie| {
                    (
                        build_spawn_entity_at_rest(ie),
                        with_entity_id(ie.entity_id, &build_item_metadata(ie.item)),
                    )
                })
                .collect()
        };
        for (spawn, meta) in item_packets {
            let _ = player
                .send(&SpawnEntity {
                    data: RestBytes::new(spawn),
                })
                .await;
            let _ = player
                .send(&EntityMetadata {
                    data: RestBytes::new(meta),
                })
                .await;
        }

        debug!(player = %player.username, entity_id = player.entity_id, "player registered");
    }

    /// Unregister a player and clean up tab list and tracking for everyone
    /// else.
    pub async fn remove(&self, player: &Player) {
        let mut maps = self.maps.write().await;
        maps.players.remove(&player.entity_id);
        maps.by_uuid.remove(&player.uuid);

        let remove_info = build_player_info_remove(player);
        let destroy = build_destroy_entities(&[player.entity_id]);

        for other in maps.players.values() {
            let _ = other
                .send(&PlayerInfo {
                    data: RestBytes::new(remove_info.clone()),
                })
                .await;
            if other.is_tracking(player.entity_id) {
                let _ = other
                    .send(&EntityDestroy {
                        data: RestBytes::new(destroy.clone()),
                    })
                    .await;
                other.untrack(player.entity_id);
            }
        }
    }

    /// Send a packet to every connected player.
    pub async fn broadcast<P: Packet + ProtoEncode>(&self, packet: &P) {
        let maps = self.maps.read().await;
        for player in maps.players.values() {
            let _ = player.send(packet).await;
        }
    }

    /// Send a packet to every player except one.
    pub async fn broadcast_except<P: Packet + ProtoEncode>(&self, packet: &P, exclude: i32) {
        let maps = self.maps.read().await;
        for player in maps.players.values() {
            if player.entity_id != exclude {
                let _ = player.send(packet).await;
            }
        }
    }

    /// Send a packet to every player currently tracking the given entity.
    pub async fn broadcast_to_trackers<P: Packet + ProtoEncode>(&self, packet: &P, entity_id: i32) {
        let maps = self.maps.read().await;
        for player in maps.players.values() {
            if player.entity_id != entity_id && player.is_tracking(entity_id) {
                let _ = player.send(packet).await;
            }
        }
    }

    /// Re-evaluate visibility pairs after `moved` changed chunks.
    pub async fn update_tracking(&self, moved: &Arc<Player>) {
        let maps = self.maps.read().await;
        let (cx, cz) = (moved.chunk_x(), moved.chunk_z());

        for other in maps.players.values() {
            if other.entity_id == moved.entity_id {
                continue;
            }

            let in_range =
                in_view_distance(cx, cz, other.chunk_x(), other.chunk_z(), self.view_distance);
            let other_tracks_moved = other.is_tracking(moved.entity_id);
            let moved_tracks_other = moved.is_tracking(other.entity_id);

            if in_range && !other_tracks_moved {
                self.spawn_player_for(other, moved).await;
                if !moved_tracks_other {
                    self.spawn_player_for(moved, other).await;
                }
            } else if !in_range && other_tracks_moved {
                let _ = other
                    .send(&EntityDestroy {
                        data: RestBytes::new(build_destroy_entities(&[moved.entity_id])),
                    })
                    .await;
                other.untrack(moved.entity_id);

                if moved_tracks_other {
                    let _ = moved
                        .send(&EntityDestroy {
                            data: RestBytes::new(build_destroy_entities(&[other.entity_id])),
                        })
                        .await;
                    moved.untrack(other.entity_id);
                }
            }
        }
    }

    /// Push current entity flags and skin parts to all trackers.
    pub async fn broadcast_entity_metadata(&self, player: &Player) {
        let meta = build_entity_metadata(player.entity_flags(), player.skin_parts());
        self.broadcast_to_trackers(
            &EntityMetadata {
                data: RestBytes::new(with_entity_id(player.entity_id, &meta)),
            },
            player.entity_id,
        )
        .await;
    }

    /// Tab-list game mode update for everyone.
    pub async fn broadcast_game_mode(&self, player: &Player) {
        self.broadcast(&PlayerInfo {
            data: RestBytes::new(build_player_info_game_mode(player)),
        })
        .await;
    }

    pub async fn player_count(&self) -> usize {
        self.maps.read().await.players.len()
    }

    pub async fn get_by_entity_id(&self, entity_id: i32) -> Option<Arc<Player>> {
        self.maps.read().await.players.get(&entity_id).cloned()
    }

    pub async fn get_by_uuid(&self, uuid: &str) -> Option<Arc<Player>> {
        let maps = self.maps.read().await;
        let id = maps.by_uuid.get(uuid)?;
        maps.players.get(id).cloned()
    }

    pub async fn get_by_name(&self, name: &str) -> Option<Arc<Player>> {
        let maps = self.maps.read().await;
        maps.players
            .values()
            .find(|p| p.username.eq_ignore_ascii_case(name))
            .cloned()
    }

    /// Snapshot of all connected players.
    pub async fn players(&self) -> Vec<Arc<Player>> {
        self.maps.read().await.players.values().cloned().collect()
    }

    /// Spawn a dropped item. The visual spawn is the throw origin; the
    /// stored position is the simulated landing point.
    pub async fn spawn_item(
        &self,
        item: Slot,
        x: f64,
        y: f64,
        z: f64,
        yaw: f32,
        ground_at: impl Fn(i32, i32) -> f64,
    ) {
        let entity_id = self.allocate_entity_id();
        let velocity = throw_velocity(yaw);
        let (lx, ly, lz) = simulate_landing(x, y, z, velocity, ground_at);

        let spawn_data = build_spawn_entity(entity_id, x, y, z, velocity);
        let meta_data = with_entity_id(entity_id, &build_item_metadata(item));

        {
            let mut items = self.items.lock().await;
            items.insert(
                entity_id,
                ItemEntity {
                    entity_id,
                    item,
                    x: lx,
                    y: ly,
                    z: lz,
                    vel_x: velocity.0,
                    vel_y: velocity.1,
                    vel_z: velocity.2,
                    spawn_tick: self.current_tick(),
                },
            );
        }

        let maps = self.maps.read().await;
        for player in maps.players.values() {
            let _ = player
                .send(&SpawnEntity {
                    data: RestBytes::new(spawn_data.clone()),
                })
                .await;
            let _ = player
                .send(&EntityMetadata {
                    data: RestBytes::new(meta_data.clone()),
                })
                .await;
        }
    }

    /// Try to absorb nearby dropped items into the player's inventory.
    /// Returns how many item entities were collected from (fully or
    /// partially).
    pub async fn try_pickup_items(&self, player: &Arc<Player>) -> usize {
        let now = self.current_tick();
        let pos = player.position();
        // Distance is measured against the player's center.
        let (px, py, pz) = (pos.x, pos.y + 0.5, pos.z);

        struct Pickup {
            entity_id: i32,
            destroyed: bool,
        }
        let mut pickups: Vec<Pickup> = Vec::new();

        {
            let mut items = self.items.lock().await;
            let ids: Vec<i32> = items.keys().copied().collect();
            for id in ids {
                let Some(ie) = items.get_mut(&id) else {
                    continue;
                };
                if !ie.eligible_for_pickup(now) {
                    continue;
                }
                let (dx, dy, dz) = (ie.x - px, ie.y - py, ie.z - pz);
                if (dx * dx + dy * dy + dz * dz).sqrt() > PICKUP_RADIUS {
                    continue;
                }

                let before = ie.item.count;
                let remainder = player.with_inventory(|inv| inv.add(ie.item));
                if remainder.is_empty() {
                    items.remove(&id);
                    pickups.push(Pickup {
                        entity_id: id,
                        destroyed: true,
                    });
                } else if remainder.count < before {
                    ie.item = remainder;
                    pickups.push(Pickup {
                        entity_id: id,
                        destroyed: false,
                    });
                }
            }
        }

        for pickup in &pickups {
            self.broadcast(&CollectItem {
                collected_id: VarInt(pickup.entity_id),
                collector_id: VarInt(player.entity_id),
            })
            .await;
            if pickup.destroyed {
                self.broadcast(&EntityDestroy {
                    data: RestBytes::new(build_destroy_entities(&[pickup.entity_id])),
                })
                .await;
            }
        }

        pickups.len()
    }

    /// Drop expired item entities.
    async fn cleanup_expired_items(&self, now: i64) {
        let expired: Vec<i32> = {
            let mut items = self.items.lock().await;
            let ids: Vec<i32> = items
                .values()
                .filter(|ie| ie.expired(now))
                .map(|ie| ie.entity_id)
                .collect();
            for id in &ids {
                items.remove(id);
            }
            ids
        };

        if !expired.is_empty() {
            debug!(count = expired.len(), "despawning expired items");
            self.broadcast(&EntityDestroy {
                data: RestBytes::new(build_destroy_entities(&expired)),
            })
            .await;
        }
    }

    /// Broadcast absolute positions to correct accumulated delta drift.
    async fn resync_positions(&self) {
        let maps = self.maps.read().await;
        for player in maps.players.values() {
            let pos = player.position();
            let teleport = EntityTeleport {
                entity_id: VarInt(player.entity_id),
                x: fixed_point(pos.x),
                y: fixed_point(pos.y),
                z: fixed_point(pos.z),
                yaw: degrees_to_angle(pos.yaw),
                pitch: degrees_to_angle(pos.pitch),
                on_ground: pos.on_ground,
            };
            for other in maps.players.values() {
                if other.entity_id != player.entity_id && other.is_tracking(player.entity_id) {
                    let _ = other.send(&teleport).await;
                }
            }
        }
    }

    /// Make `target` visible to `viewer`: spawn, head rotation, an absolute
    /// teleport, metadata, and all five equipment slots.
    pub(crate) async fn spawn_player_for(&self, viewer: &Arc<Player>, target: &Arc<Player>) {
        let pos = target.position();

        let _ = viewer
            .send(&NamedEntitySpawn {
                data: RestBytes::new(build_named_entity_spawn(target, &pos)),
            })
            .await;

        let _ = viewer
            .send(&EntityHeadRotation {
                entity_id: VarInt(target.entity_id),
                head_yaw: degrees_to_angle(pos.yaw),
            })
            .await;

        let _ = viewer
            .send(&EntityTeleport {
                entity_id: VarInt(target.entity_id),
                x: fixed_point(pos.x),
                y: fixed_point(pos.y),
                z: fixed_point(pos.z),
                yaw: degrees_to_angle(pos.yaw),
                pitch: degrees_to_angle(pos.pitch),
                on_ground: pos.on_ground,
            })
            .await;

        let meta = build_entity_metadata(target.entity_flags(), target.skin_parts());
        let _ = viewer
            .send(&EntityMetadata {
                data: RestBytes::new(with_entity_id(target.entity_id, &meta)),
            })
            .await;

        for equipment in build_equipment_packets(target) {
            let _ = viewer
                .send(&EntityEquipment {
                    data: RestBytes::new(equipment),
                })
                .await;
        }

        viewer.track(target.entity_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::PacketSink;
    use craft_proto::frame;
    use craft_proto::types::Uuid;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    /// A player whose outbound packets land in an in-memory stream.
    fn test_player(manager: &Manager, name: &str) -> (Arc<Player>, tokio::io::DuplexStream) {
        let (client, server) = tokio::io::duplex(1 << 20);
        let entity_id = manager.allocate_entity_id();
        let mut uuid_bytes = [0u8; 16];
        uuid_bytes[0] = entity_id as u8;
        let uuid = Uuid(uuid_bytes);
        let player = Arc::new(Player::new(
            entity_id,
            uuid.hyphenated(),
            uuid,
            name.to_string(),
            Vec::new(),
            PacketSink::from_writer(Box::new(server)),
        ));
        (player, client)
    }

    /// Drain whatever has been written so far and return the packet ids.
    async fn drain_packet_ids(stream: &mut tokio::io::DuplexStream) -> Vec<i32> {
        let mut collected = bytes::BytesMut::new();
        let mut chunk = [0u8; 4096];
        loop {
            match tokio::time::timeout(Duration::from_millis(50), stream.read(&mut chunk)).await {
                Ok(Ok(n)) if n > 0 => collected.extend_from_slice(&chunk[..n]),
                _ => break,
            }
        }

        let mut ids = Vec::new();
        while let Ok(Some((id, _payload))) = frame::decode_frame(&mut collected) {
            ids.push(id);
        }
        ids
    }

    #[tokio::test]
    async fn players_in_same_chunk_see_each_other() {
        let manager = Manager::new(8);
        let (alice, mut alice_stream) = test_player(&manager, "Alice");
        let (bob, mut bob_stream) = test_player(&manager, "Bob");

        manager.add(Arc::clone(&alice)).await;
        manager.add(Arc::clone(&bob)).await;

        assert!(alice.is_tracking(bob.entity_id));
        assert!(bob.is_tracking(alice.entity_id));

        // Each received a NamedEntitySpawn (0x0C) for the other.
        let alice_ids = drain_packet_ids(&mut alice_stream).await;
        let bob_ids = drain_packet_ids(&mut bob_stream).await;
        assert!(alice_ids.contains(&0x0C), "alice got {alice_ids:?}");
        assert!(bob_ids.contains(&0x0C), "bob got {bob_ids:?}");
        // And a PlayerInfo (0x38) each.
        assert!(alice_ids.contains(&0x38));
        assert!(bob_ids.contains(&0x38));
    }

    #[tokio::test]
    async fn players_out_of_view_distance_are_not_spawned() {
        let manager = Manager::new(8);
        let (alice, _alice_stream) = test_player(&manager, "Alice");
        let (bob, mut bob_stream) = test_player(&manager, "Bob");

        // Bob is 10 chunks away on both axes.
        bob.set_position(165.0, 5.0, 165.0, 0.0, 0.0, true);

        manager.add(Arc::clone(&alice)).await;
        manager.add(Arc::clone(&bob)).await;

        assert!(!alice.is_tracking(bob.entity_id));
        assert!(!bob.is_tracking(alice.entity_id));

        // Bob still gets the tab-list entry, but no spawn.
        let bob_ids = drain_packet_ids(&mut bob_stream).await;
        assert!(bob_ids.contains(&0x38));
        assert!(!bob_ids.contains(&0x0C));
    }

    #[tokio::test]
    async fn leaving_range_destroys_both_ways() {
        let manager = Manager::new(8);
        let (alice, mut alice_stream) = test_player(&manager, "Alice");
        let (bob, mut bob_stream) = test_player(&manager, "Bob");

        manager.add(Arc::clone(&alice)).await;
        manager.add(Arc::clone(&bob)).await;
        drain_packet_ids(&mut alice_stream).await;
        drain_packet_ids(&mut bob_stream).await;

        // Alice walks to chunk (10, 10).
        alice.set_position(165.0, 5.0, 165.0, 0.0, 0.0, true);
        manager.update_tracking(&alice).await;

        assert!(!bob.is_tracking(alice.entity_id));
        assert!(!alice.is_tracking(bob.entity_id));

        let bob_ids = drain_packet_ids(&mut bob_stream).await;
        assert!(bob_ids.contains(&0x13), "bob got {bob_ids:?}");
        let alice_ids = drain_packet_ids(&mut alice_stream).await;
        assert!(alice_ids.contains(&0x13), "alice got {alice_ids:?}");
    }

    #[tokio::test]
    async fn reentering_range_spawns_again() {
        let manager = Manager::new(2);
        let (alice, mut alice_stream) = test_player(&manager, "Alice");
        let (bob, _bob_stream) = test_player(&manager, "Bob");

        alice.set_position(100.0, 5.0, 100.0, 0.0, 0.0, true);
        manager.add(Arc::clone(&alice)).await;
        manager.add(Arc::clone(&bob)).await;
        drain_packet_ids(&mut alice_stream).await;
        assert!(!alice.is_tracking(bob.entity_id));

        alice.set_position(0.5, 5.0, 0.5, 0.0, 0.0, true);
        manager.update_tracking(&alice).await;

        assert!(alice.is_tracking(bob.entity_id));
        assert!(bob.is_tracking(alice.entity_id));
        let alice_ids = drain_packet_ids(&mut alice_stream).await;
        assert!(alice_ids.contains(&0x0C));
    }

    #[tokio::test]
    async fn remove_cleans_tab_list_and_tracking() {
        let manager = Manager::new(8);
        let (alice, _alice_stream) = test_player(&manager, "Alice");
        let (bob, mut bob_stream) = test_player(&manager, "Bob");

        manager.add(Arc::clone(&alice)).await;
        manager.add(Arc::clone(&bob)).await;
        drain_packet_ids(&mut bob_stream).await;

        manager.remove(&alice).await;
        assert_eq!(manager.player_count().await, 1);
        assert!(!bob.is_tracking(alice.entity_id));
        assert!(manager.get_by_uuid(&alice.uuid).await.is_none());

        let bob_ids = drain_packet_ids(&mut bob_stream).await;
        assert!(bob_ids.contains(&0x38));
        assert!(bob_ids.contains(&0x13));
    }

    #[tokio::test]
    async fn entity_ids_are_unique_and_monotonic() {
        let manager = Manager::new(8);
        let a = manager.allocate_entity_id();
        let b = manager.allocate_entity_id();
        let c = manager.allocate_entity_id();
        assert!(a < b && b < c);
    }

    #[tokio::test]
    async fn item_pickup_absorbs_and_collects() {
        let manager = Manager::new(8);
        let (alice, mut alice_stream) = test_player(&manager, "Alice");
        manager.add(Arc::clone(&alice)).await;
        drain_packet_ids(&mut alice_stream).await;

        // Drop a stack right at the player's feet; flat ground at y=5.
        manager
            .spawn_item(Slot::new(1, 3, 0), 0.5, 5.3, 0.5, 0.0, |_, _| 5.0)
            .await;

        // Not eligible before the pickup delay has elapsed.
        assert_eq!(manager.try_pickup_items(&alice).await, 0);

        for _ in 0..20 {
            manager.tick().await;
        }
        // Stand where the throw came to rest.
        let (lx, ly, lz) = simulate_landing(0.5, 5.3, 0.5, throw_velocity(0.0), |_, _| 5.0);
        alice.set_position(lx, ly, lz, 0.0, 0.0, true);
        assert_eq!(manager.try_pickup_items(&alice).await, 1);

        let held = alice.with_inventory(|inv| inv.slots[0]);
        assert_eq!(held, Slot::new(1, 3, 0));

        let ids = drain_packet_ids(&mut alice_stream).await;
        // SpawnEntity + metadata from the drop, then Collect + destroy.
        assert!(ids.contains(&0x0E), "got {ids:?}");
        assert!(ids.contains(&0x0D), "got {ids:?}");
        assert!(ids.contains(&0x13), "got {ids:?}");
    }

    #[tokio::test]
    async fn far_items_are_not_picked_up() {
        let manager = Manager::new(8);
        let (alice, _stream) = test_player(&manager, "Alice");
        manager.add(Arc::clone(&alice)).await;

        manager
            .spawn_item(Slot::new(1, 1, 0), 50.0, 5.0, 50.0, 0.0, |_, _| 5.0)
            .await;
        for _ in 0..20 {
            manager.tick().await;
        }
        assert_eq!(manager.try_pickup_items(&alice).await, 0);
        assert!(alice.with_inventory(|inv| inv.slots[0].is_empty()));
    }
}
