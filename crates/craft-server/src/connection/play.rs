//! Play phase: join sequence, movement, block edits, chat, and the
//! keep-alive watchdog.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use bytes::{Buf, Bytes};
use craft_proto::codec::{ByteArray, ProtoDecode, RestBytes};
use craft_proto::packets::{
    ability, difficulty, dimension, game_mode, AbilitiesServerbound, AnimationClientbound,
    BlockBreakAnimation, BlockChange, BlockDig, ChatMessage, ChatMessageServerbound,
    ClientSettings, ClientStatus, CloseWindow, EntityAction, EntityEquipment, EntityHeadRotation,
    EntityLook, EntityMoveLook, EntityStatus, EntityTeleport, EntityVelocity,
    HeldItemChangeServerbound, JoinGame, KeepAliveClientbound, KeepAliveServerbound, MapChunk,
    PlayDisconnect, PlayerAbilities, PlayerLook, PlayerPosition, PlayerPositionAndLook,
    PlayerPositionAndLookServerbound, PluginMessage, RelEntityMove, Respawn, Spectate,
    SpawnPosition, TabCompleteClientbound, UpdateHealth, UpdateSign, UpdateTime, WorldEvent,
    WorldParticles,
};
use craft_proto::slot::Slot;
use craft_proto::types::{degrees_to_angle, delta_fits_in_byte, ChunkPos, Position, Uuid, VarInt};
use craft_proto::codec::{write_string, ProtoEncode};
use craft_world::World;
use tracing::{debug, info, warn};

use super::{ConnError, Connection};
use crate::player::metadata::build_equipment;
use crate::player::{in_view_distance, Player, PlayerPos, SkinProperty};

impl Connection {
    /// Enter the Play phase: send the join sequence in protocol order and
    /// register with the player manager.
    pub(crate) async fn start_play(
        &mut self,
        username: String,
        uuid: String,
        uuid_bytes: Uuid,
        properties: Vec<SkinProperty>,
    ) -> Result<(), ConnError> {
        let entity_id = self.players.allocate_entity_id();
        let player = Arc::new(Player::new(
            entity_id,
            uuid.clone(),
            uuid_bytes,
            username.clone(),
            properties,
            self.sink.clone(),
        ));

        let spawn_y = self.world.spawn_height();
        let mut mode = game_mode::CREATIVE;
        let mut pos = PlayerPos {
            x: 0.5,
            y: spawn_y as f64,
            z: 0.5,
            yaw: 0.0,
            pitch: 0.0,
            on_ground: true,
        };

        if let Some(saved) = self.storage.load_player(&uuid) {
            mode = saved.game_mode;
            pos = saved.saved_position();
            player.apply_data(pos, mode, saved.to_inventory());
            info!(player = %username, "restored saved player data");
        }
        player.set_position(pos.x, pos.y, pos.z, pos.yaw, pos.pitch, true);
        self.player = Some(Arc::clone(&player));

        // 1. Join Game
        self.sink
            .send(&JoinGame {
                entity_id,
                game_mode: mode,
                dimension: dimension::OVERWORLD,
                difficulty: difficulty::EASY,
                max_players: self.cfg.max_players.min(255) as u8,
                level_type: self.cfg.generator.clone(),
                reduced_debug_info: false,
            })
            .await?;

        // 2. Spawn Position
        self.sink
            .send(&SpawnPosition {
                location: Position::new(0, spawn_y, 0),
            })
            .await?;

        // 3. Player Abilities
        self.sink
            .send(&PlayerAbilities {
                flags: abilities_for_game_mode(mode),
                flying_speed: 0.05,
                walking_speed: 0.1,
            })
            .await?;

        // 4. Player Position And Look (absolute)
        self.sink
            .send(&PlayerPositionAndLook {
                x: pos.x,
                y: pos.y,
                z: pos.z,
                yaw: pos.yaw,
                pitch: pos.pitch,
                flags: 0x00,
            })
            .await?;

        // 5. Chunks around the player, closest first.
        self.send_initial_chunks().await?;

        // 6. World time.
        let (age, time_of_day) = self.world.get_time();
        self.sink
            .send(&UpdateTime {
                world_age: age,
                time_of_day,
            })
            .await?;

        // 7. Inventory.
        self.send_window_items().await?;

        // 8. Greeting.
        self.sink
            .send(&ChatMessage {
                json: r#"{"text":"Hello, world!","color":"gold"}"#.into(),
                position: 0,
            })
            .await?;

        // 9. Cross-wise tab list + spawns.
        self.players.add(Arc::clone(&player)).await;

        // 10. Keep-alive watchdog.
        self.spawn_keep_alive();

        info!(player = %username, entity_id, "join sequence complete");
        Ok(())
    }

    fn spawn_keep_alive(&self) {
        let sink = self.sink.clone();
        let state = Arc::clone(&self.keep_alive);
        let (cancel_tx, cancel_rx) = self.cancel_pair();
        tokio::spawn(keep_alive_watchdog(sink, state, cancel_tx, cancel_rx));
    }

    pub(crate) async fn handle_play(
        &mut self,
        packet_id: i32,
        mut data: Bytes,
    ) -> Result<(), ConnError> {
        match packet_id {
            0x00 => {
                let p = KeepAliveServerbound::proto_decode(&mut data)?;
                let mut st = self.keep_alive.lock().unwrap();
                if p.keep_alive_id.0 == st.last_id {
                    st.acked = true;
                }
            }

            0x01 => {
                let p = ChatMessageServerbound::proto_decode(&mut data)?;
                info!(player = %self.username(), message = %p.message, "chat");
                if self.handle_command(&p.message).await {
                    return Ok(());
                }
                let chat = format!(
                    r#"{{"translate":"chat.type.text","with":[{},{}]}}"#,
                    escape_json(&self.username()),
                    escape_json(&p.message),
                );
                self.players
                    .broadcast(&ChatMessage {
                        json: chat,
                        position: 0,
                    })
                    .await;
            }

            0x02 => self.handle_use_entity(data).await?,

            0x03 => {} // ground-state heartbeat

            0x04 => {
                let p = PlayerPosition::proto_decode(&mut data)?;
                self.handle_position_update(p.x, p.feet_y, p.z, 0.0, 0.0, p.on_ground, true, false)
                    .await;
            }

            0x05 => {
                let p = PlayerLook::proto_decode(&mut data)?;
                self.handle_look_update(p.yaw, p.pitch, p.on_ground).await;
            }

            0x06 => {
                let p = PlayerPositionAndLookServerbound::proto_decode(&mut data)?;
                self.handle_position_update(
                    p.x, p.feet_y, p.z, p.yaw, p.pitch, p.on_ground, true, true,
                )
                .await;
            }

            0x07 => self.handle_block_dig(data).await?,

            0x08 => self.handle_block_place(data).await?,

            0x09 => {
                let p = HeldItemChangeServerbound::proto_decode(&mut data)?;
                if !(0..=8).contains(&p.slot) {
                    return Ok(());
                }
                let player = self.require_player()?;
                let held = player.with_inventory(|inv| {
                    inv.held_slot = p.slot;
                    inv.held_item()
                });
                self.players
                    .broadcast_to_trackers(
                        &EntityEquipment {
                            data: RestBytes::new(build_equipment(player.entity_id, 0, held)),
                        },
                        player.entity_id,
                    )
                    .await;
            }

            0x0A => {
                let player = self.require_player()?;
                self.players
                    .broadcast_to_trackers(
                        &AnimationClientbound {
                            entity_id: VarInt(player.entity_id),
                            animation: 0, // swing arm
                        },
                        player.entity_id,
                    )
                    .await;
            }

            0x0B => {
                let p = EntityAction::proto_decode(&mut data)?;
                let player = self.require_player()?;
                match p.action_id.0 {
                    0 => {
                        player.set_sneaking(true);
                        self.players.broadcast_entity_metadata(&player).await;
                    }
                    1 => {
                        player.set_sneaking(false);
                        self.players.broadcast_entity_metadata(&player).await;
                    }
                    3 => {
                        player.set_sprinting(true);
                        self.players.broadcast_entity_metadata(&player).await;
                    }
                    4 => {
                        player.set_sprinting(false);
                        self.players.broadcast_entity_metadata(&player).await;
                    }
                    _ => {}
                }
            }

            0x0C => {} // steer vehicle: no vehicles

            0x0D => {
                let p = CloseWindow::proto_decode(&mut data)?;
                self.handle_close_window(p.window_id).await?;
            }

            0x0E => self.handle_window_click(data).await?,

            0x0F => {} // transaction echo: we accept everything

            0x10 => self.handle_creative_slot(data).await?,

            0x11 => {} // enchanting not supported

            0x12 => {
                let p = UpdateSign::proto_decode(&mut data)?;
                info!(
                    x = p.location.x,
                    y = p.location.y,
                    z = p.location.z,
                    line1 = %p.line1,
                    "update sign"
                );
            }

            0x13 => {
                let p = AbilitiesServerbound::proto_decode(&mut data)?;
                self.handle_abilities_update(p).await?;
            }

            0x14 => self.handle_tab_complete(data).await?,

            0x15 => {
                let p = ClientSettings::proto_decode(&mut data)?;
                debug!(locale = %p.locale, view_distance = p.view_distance, "client settings");
                let player = self.require_player()?;
                player.set_skin_parts(p.skin_parts);
                self.players.broadcast_entity_metadata(&player).await;
            }

            0x16 => {
                let p = ClientStatus::proto_decode(&mut data)?;
                if p.action_id.0 == 0 {
                    self.handle_respawn().await?;
                }
            }

            0x17 => self.handle_custom_payload(data).await?,

            0x18 => {
                let p = Spectate::proto_decode(&mut data)?;
                let player = self.require_player()?;
                if player.game_mode() != game_mode::SPECTATOR {
                    return Ok(());
                }
                if let Some(target) = self.players.get_by_uuid(&p.target.hyphenated()).await {
                    let pos = target.position();
                    self.teleport_self(pos.x, pos.y, pos.z).await?;
                }
            }

            0x19 => {
                debug!("resource pack status");
            }

            other => {
                // Unknown Play packets are ignored for forward compatibility.
                debug!(id = format!("0x{other:02X}"), "ignoring unknown play packet");
            }
        }
        Ok(())
    }

    pub(crate) fn username(&self) -> String {
        self.player
            .as_ref()
            .map(|p| p.username.clone())
            .unwrap_or_default()
    }

    pub(crate) fn require_player(&self) -> Result<Arc<Player>, ConnError> {
        self.player
            .clone()
            .ok_or_else(|| ConnError::InvalidData("play packet before join".into()))
    }

    // -- movement ----------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    async fn handle_position_update(
        &mut self,
        x: f64,
        y: f64,
        z: f64,
        yaw: f32,
        pitch: f32,
        on_ground: bool,
        pos_changed: bool,
        look_changed: bool,
    ) {
        let Some(player) = self.player.clone() else {
            return;
        };

        let (x, z) = if self.cfg.world_radius > 0 {
            self.clamp_to_world_bounds(x, y, z, yaw, pitch).await
        } else {
            (x, z)
        };

        // Keep the current look when only the position changed.
        let (yaw, pitch) = if look_changed {
            (yaw, pitch)
        } else {
            let pos = player.position();
            (pos.yaw, pos.pitch)
        };

        let (old, new) = self
            .set_position_and_update_chunks(&player, x, y, z, yaw, pitch, on_ground)
            .await;
        let (dx, dy, dz) = (new.0 - old.0, new.1 - old.1, new.2 - old.2);

        let yaw_angle = degrees_to_angle(yaw);
        let pitch_angle = degrees_to_angle(pitch);
        let eid = player.entity_id;

        match movement_packet_kind(pos_changed, look_changed, dx, dy, dz) {
            MoveKind::MoveLook => {
                self.players
                    .broadcast_to_trackers(
                        &EntityMoveLook {
                            entity_id: VarInt(eid),
                            dx: dx as i8,
                            dy: dy as i8,
                            dz: dz as i8,
                            yaw: yaw_angle,
                            pitch: pitch_angle,
                            on_ground,
                        },
                        eid,
                    )
                    .await;
            }
            MoveKind::Move => {
                self.players
                    .broadcast_to_trackers(
                        &RelEntityMove {
                            entity_id: VarInt(eid),
                            dx: dx as i8,
                            dy: dy as i8,
                            dz: dz as i8,
                            on_ground,
                        },
                        eid,
                    )
                    .await;
            }
            MoveKind::Teleport => {
                self.players
                    .broadcast_to_trackers(
                        &EntityTeleport {
                            entity_id: VarInt(eid),
                            x: new.0,
                            y: new.1,
                            z: new.2,
                            yaw: yaw_angle,
                            pitch: pitch_angle,
                            on_ground,
                        },
                        eid,
                    )
                    .await;
            }
            MoveKind::None => {}
        }

        if look_changed {
            self.players
                .broadcast_to_trackers(
                    &EntityHeadRotation {
                        entity_id: VarInt(eid),
                        head_yaw: yaw_angle,
                    },
                    eid,
                )
                .await;
        }

        // Sprinting kicks up block-crack particles at the feet.
        if pos_changed && player.is_sprinting() {
            let below = self
                .world
                .get_block(x.floor() as i32, y as i32 - 1, z.floor() as i32);
            if below != 0 {
                self.players
                    .broadcast_to_trackers(
                        &WorldParticles {
                            data: RestBytes::new(build_sprint_particles(x, y, z, below)),
                        },
                        eid,
                    )
                    .await;
            }
        }

        self.players.update_tracking(&player).await;

        if self.players.try_pickup_items(&player).await > 0 {
            let _ = self.send_window_items().await;
        }
    }

    async fn handle_look_update(&mut self, yaw: f32, pitch: f32, on_ground: bool) {
        let Some(player) = self.player.clone() else {
            return;
        };
        player.update_look(yaw, pitch, on_ground);

        let yaw_angle = degrees_to_angle(yaw);
        let eid = player.entity_id;

        self.players
            .broadcast_to_trackers(
                &EntityLook {
                    entity_id: VarInt(eid),
                    yaw: yaw_angle,
                    pitch: degrees_to_angle(pitch),
                    on_ground,
                },
                eid,
            )
            .await;
        self.players
            .broadcast_to_trackers(
                &EntityHeadRotation {
                    entity_id: VarInt(eid),
                    head_yaw: yaw_angle,
                },
                eid,
            )
            .await;
    }

    /// Update position and reload chunks if the player crossed a chunk
    /// boundary.
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn set_position_and_update_chunks(
        &mut self,
        player: &Arc<Player>,
        x: f64,
        y: f64,
        z: f64,
        yaw: f32,
        pitch: f32,
        on_ground: bool,
    ) -> ((i32, i32, i32), (i32, i32, i32)) {
        let (old_cx, old_cz) = (player.chunk_x(), player.chunk_z());
        let result = player.set_position(x, y, z, yaw, pitch, on_ground);
        let (new_cx, new_cz) = (player.chunk_x(), player.chunk_z());
        if old_cx != new_cx || old_cz != new_cz {
            self.update_loaded_chunks(new_cx, new_cz).await;
        }
        result
    }

    async fn clamp_to_world_bounds(
        &mut self,
        x: f64,
        y: f64,
        z: f64,
        yaw: f32,
        pitch: f32,
    ) -> (f64, f64) {
        let r = self.cfg.world_radius;
        let min_block = (-r * 16) as f64;
        let max_block = (r * 16 + 16) as f64;

        let clamped_x = x.clamp(min_block, max_block - 0.01);
        let clamped_z = z.clamp(min_block, max_block - 0.01);

        if clamped_x != x || clamped_z != z {
            let _ = self
                .sink
                .send(&PlayerPositionAndLook {
                    x: clamped_x,
                    y,
                    z: clamped_z,
                    yaw,
                    pitch,
                    flags: 0x00,
                })
                .await;
        }
        (clamped_x, clamped_z)
    }

    // -- chunk streaming ---------------------------------------------------

    /// Send every in-range chunk, sorted by squared distance from the
    /// player's chunk.
    pub(crate) async fn send_initial_chunks(&mut self) -> Result<(), ConnError> {
        let player = self.require_player()?;
        let (center_cx, center_cz) = (player.chunk_x(), player.chunk_z());
        let view_dist = self.cfg.view_distance;

        let mut chunks: Vec<ChunkPos> = Vec::new();
        for cx in (center_cx - view_dist)..=(center_cx + view_dist) {
            for cz in (center_cz - view_dist)..=(center_cz + view_dist) {
                if self.chunk_in_bounds(cx, cz) {
                    chunks.push(ChunkPos::new(cx, cz));
                }
            }
        }
        chunks.sort_by_key(|pos| {
            let dx = pos.x - center_cx;
            let dz = pos.z - center_cz;
            dx * dx + dz * dz
        });

        for pos in chunks {
            self.send_chunk(pos.x, pos.z).await?;
            self.loaded_chunks.insert(pos);
        }
        Ok(())
    }

    async fn send_chunk(&mut self, cx: i32, cz: i32) -> Result<(), ConnError> {
        let chunk = self.world.get_or_generate_chunk(cx, cz);
        let overrides = self.world.overrides_for_chunk(cx, cz);
        let (bitmap, data) = craft_world::codec::encode_chunk(cx, cz, &chunk, &overrides);
        self.sink
            .send(&MapChunk {
                chunk_x: cx,
                chunk_z: cz,
                ground_up: true,
                bitmap,
                data: ByteArray::new(data),
            })
            .await?;
        Ok(())
    }

    /// Send newly in-range chunks and unload ones that fell out of range.
    async fn update_loaded_chunks(&mut self, new_cx: i32, new_cz: i32) {
        let view_dist = self.cfg.view_distance;

        for cx in (new_cx - view_dist)..=(new_cx + view_dist) {
            for cz in (new_cz - view_dist)..=(new_cz + view_dist) {
                let pos = ChunkPos::new(cx, cz);
                if self.loaded_chunks.contains(&pos) || !self.chunk_in_bounds(cx, cz) {
                    continue;
                }
                if let Err(e) = self.send_chunk(cx, cz).await {
                    warn!(cx, cz, error = %e, "sending chunk");
                    return;
                }
                self.loaded_chunks.insert(pos);
            }
        }

        let to_unload: Vec<ChunkPos> = self
            .loaded_chunks
            .iter()
            .filter(|pos| !in_view_distance(pos.x, pos.z, new_cx, new_cz, view_dist))
            .copied()
            .collect();
        for pos in to_unload {
            // Ground-up, empty bitmap, empty data unloads the chunk.
            if let Err(e) = self
                .sink
                .send(&MapChunk {
                    chunk_x: pos.x,
                    chunk_z: pos.z,
                    ground_up: true,
                    bitmap: 0,
                    data: ByteArray::default(),
                })
                .await
            {
                warn!(cx = pos.x, cz = pos.z, error = %e, "unloading chunk");
            }
            self.loaded_chunks.remove(&pos);
        }
    }

    fn chunk_in_bounds(&self, cx: i32, cz: i32) -> bool {
        let r = self.cfg.world_radius;
        if r <= 0 {
            return true;
        }
        (-r..=r).contains(&cx) && (-r..=r).contains(&cz)
    }

    // -- block edits -------------------------------------------------------

    async fn handle_block_dig(&mut self, mut data: Bytes) -> Result<(), ConnError> {
        let p = BlockDig::proto_decode(&mut data)?;
        let player = self.require_player()?;
        let (x, y, z) = (p.location.x, p.location.y, p.location.z);

        match p.status {
            0 => {
                // Started digging.
                if player.game_mode() == game_mode::CREATIVE {
                    self.break_block(x, y, z).await?;
                } else {
                    self.players
                        .broadcast_to_trackers(
                            &BlockBreakAnimation {
                                entity_id: VarInt(player.entity_id),
                                location: p.location,
                                destroy_stage: 0,
                            },
                            player.entity_id,
                        )
                        .await;
                }
            }

            1 => {
                // Cancelled digging.
                self.players
                    .broadcast_to_trackers(
                        &BlockBreakAnimation {
                            entity_id: VarInt(player.entity_id),
                            location: p.location,
                            destroy_stage: -1,
                        },
                        player.entity_id,
                    )
                    .await;
            }

            2 => {
                // Finished digging.
                self.players
                    .broadcast_to_trackers(
                        &BlockBreakAnimation {
                            entity_id: VarInt(player.entity_id),
                            location: p.location,
                            destroy_stage: -1,
                        },
                        player.entity_id,
                    )
                    .await;
                self.break_block(x, y, z).await?;
            }

            3 | 4 => {
                // Drop the held stack (3) or a single item (4).
                let (dropped, new_held) = player.with_inventory(|inv| {
                    let held_slot = inv.held_slot as usize;
                    let held = inv.held_item();
                    if held.is_empty() {
                        return (None, held);
                    }
                    let dropped = if p.status == 4 {
                        inv.remove_one(held_slot)
                    } else {
                        inv.slots[held_slot] = craft_proto::slot::EMPTY_SLOT;
                        held
                    };
                    (Some(dropped), inv.held_item())
                });

                if let Some(dropped) = dropped {
                    if !dropped.is_empty() {
                        let pos = player.position();
                        let ground_at = self.ground_at_fn();
                        self.players
                            .spawn_item(dropped, pos.x, pos.y + 1.3, pos.z, pos.yaw, ground_at)
                            .await;
                    }

                    // Resync the held slot and tell trackers about the new
                    // held item.
                    let held_slot = player.with_inventory(|inv| inv.held_slot);
                    self.send_set_slot(0, 36 + held_slot, new_held).await?;
                    self.players
                        .broadcast_to_trackers(
                            &EntityEquipment {
                                data: RestBytes::new(build_equipment(
                                    player.entity_id,
                                    0,
                                    new_held,
                                )),
                            },
                            player.entity_id,
                        )
                        .await;
                }
            }

            _ => {}
        }
        Ok(())
    }

    /// Remove a block, broadcast the change and break effect, and drop the
    /// block as an item in survival.
    async fn break_block(&mut self, x: i32, y: i32, z: i32) -> Result<(), ConnError> {
        let player = self.require_player()?;
        let old_state = self.world.get_block(x, y, z);
        self.world.set_block(x, y, z, 0);

        let change = BlockChange {
            location: Position::new(x, y, z),
            block_state: VarInt(0),
        };
        self.players
            .broadcast_except(&change, player.entity_id)
            .await;

        if old_state != 0 {
            self.players
                .broadcast_to_trackers(
                    &WorldEvent {
                        effect_id: 2001, // block break particles + sound
                        location: Position::new(x, y, z),
                        data: old_state,
                        global: false,
                    },
                    player.entity_id,
                )
                .await;
        }

        self.sink.send(&change).await?;

        if player.game_mode() != game_mode::CREATIVE && old_state != 0 {
            let block_id = (old_state >> 4) as i16;
            let drop = Slot::new(block_id, 1, 0);
            let ground_at = self.ground_at_fn();
            self.players
                .spawn_item(
                    drop,
                    x as f64 + 0.5,
                    y as f64 + 0.5,
                    z as f64 + 0.5,
                    0.0,
                    ground_at,
                )
                .await;
        }
        Ok(())
    }

    async fn handle_block_place(&mut self, mut data: Bytes) -> Result<(), ConnError> {
        let pos_val = i64::proto_decode(&mut data)?;
        let face = i8::proto_decode(&mut data)?;
        let slot = Slot::proto_decode(&mut data)?;
        // Cursor position (3 × u8); an NBT-bearing slot already consumed
        // the remainder.
        if data.remaining() >= 3 {
            data.advance(3);
        }

        // Position -1 means "use item", not a placement.
        if pos_val == -1 {
            return Ok(());
        }
        if slot.block_id <= 0 {
            return Ok(());
        }

        let player = self.require_player()?;
        let clicked = Position::decode(pos_val);
        let (mut x, mut y, mut z) = (clicked.x, clicked.y, clicked.z);
        match face {
            0 => y -= 1,
            1 => y += 1,
            2 => z -= 1,
            3 => z += 1,
            4 => x -= 1,
            5 => x += 1,
            _ => return Ok(()),
        }

        if y < 0 || y >= self.cfg.max_build_height {
            // Revert the client's prediction.
            self.sink
                .send(&BlockChange {
                    location: Position::new(x, y, z),
                    block_state: VarInt(self.world.get_block(x, y, z)),
                })
                .await?;
            return Ok(());
        }

        let state_id = (slot.block_id as i32) << 4;
        self.world.set_block(x, y, z, state_id);

        let change = BlockChange {
            location: Position::new(x, y, z),
            block_state: VarInt(state_id),
        };
        self.players
            .broadcast_except(&change, player.entity_id)
            .await;
        self.sink.send(&change).await?;

        // Survival consumes the placed block.
        if player.game_mode() != game_mode::CREATIVE {
            let (held_slot, new_held) = player.with_inventory(|inv| {
                let idx = inv.held_slot as usize;
                inv.remove_one(idx);
                (inv.held_slot, inv.held_item())
            });
            self.send_set_slot(0, 36 + held_slot, new_held).await?;
            self.players
                .broadcast_to_trackers(
                    &EntityEquipment {
                        data: RestBytes::new(build_equipment(player.entity_id, 0, new_held)),
                    },
                    player.entity_id,
                )
                .await;
        }
        Ok(())
    }

    // -- interaction -------------------------------------------------------

    async fn handle_use_entity(&mut self, mut data: Bytes) -> Result<(), ConnError> {
        let target_id = VarInt::proto_decode(&mut data)?.0;
        let mouse = VarInt::proto_decode(&mut data)?.0;
        if mouse == 2 {
            // Interact-at carries a hit position we don't use.
            let _ = f32::proto_decode(&mut data)?;
            let _ = f32::proto_decode(&mut data)?;
            let _ = f32::proto_decode(&mut data)?;
        }
        if mouse != 1 {
            return Ok(());
        }

        let player = self.require_player()?;
        let Some(target) = self.players.get_by_entity_id(target_id).await else {
            return Ok(());
        };

        let hurt = EntityStatus {
            entity_id: target_id,
            status: 2, // hurt animation
        };
        self.players.broadcast_to_trackers(&hurt, target_id).await;
        let _ = target.send(&hurt).await;

        // Knockback away from the attacker.
        let attacker_pos = player.position();
        let target_pos = target.position();
        let (mut dx, mut dz) = (target_pos.x - attacker_pos.x, target_pos.z - attacker_pos.z);
        let dist = (dx * dx + dz * dz).sqrt();
        if dist > 0.0 {
            dx /= dist;
            dz /= dist;
        }
        let velocity = EntityVelocity {
            entity_id: VarInt(target_id),
            velocity_x: (dx * 0.4 * 8000.0) as i16,
            velocity_y: (0.36 * 8000.0) as i16,
            velocity_z: (dz * 0.4 * 8000.0) as i16,
        };
        let _ = target.send(&velocity).await;
        self.players
            .broadcast_to_trackers(&velocity, target_id)
            .await;
        Ok(())
    }

    async fn handle_abilities_update(&mut self, p: AbilitiesServerbound) -> Result<(), ConnError> {
        let player = self.require_player()?;
        let wants_flying = p.flags & ability::FLYING != 0;
        let mode = player.game_mode();

        if wants_flying && mode != game_mode::CREATIVE && mode != game_mode::SPECTATOR {
            self.sink
                .send(&PlayerAbilities {
                    flags: abilities_for_game_mode(mode),
                    flying_speed: 0.05,
                    walking_speed: 0.1,
                })
                .await?;
            return Ok(());
        }
        player.set_flying(wants_flying);
        Ok(())
    }

    async fn handle_respawn(&mut self) -> Result<(), ConnError> {
        if !self.dead {
            return Ok(());
        }
        self.dead = false;

        let player = self.require_player()?;
        self.sink
            .send(&Respawn {
                dimension: dimension::OVERWORLD as i32,
                difficulty: difficulty::EASY,
                game_mode: player.game_mode(),
                level_type: self.cfg.generator.clone(),
            })
            .await?;

        let spawn_y = self.world.spawn_height() as f64;
        player.set_position(0.5, spawn_y, 0.5, 0.0, 0.0, true);

        self.loaded_chunks.clear();
        self.send_initial_chunks().await?;

        self.sink
            .send(&PlayerPositionAndLook {
                x: 0.5,
                y: spawn_y,
                z: 0.5,
                yaw: 0.0,
                pitch: 0.0,
                flags: 0x00,
            })
            .await?;

        self.sink
            .send(&UpdateHealth {
                health: 20.0,
                food: VarInt(20),
                saturation: 5.0,
            })
            .await?;

        self.sink
            .send(&PlayerAbilities {
                flags: abilities_for_game_mode(player.game_mode()),
                flying_speed: 0.05,
                walking_speed: 0.1,
            })
            .await?;

        self.send_window_items().await?;
        self.players.update_tracking(&player).await;
        Ok(())
    }

    async fn handle_custom_payload(&mut self, mut data: Bytes) -> Result<(), ConnError> {
        let mut channel = String::new();
        if let Ok(name) = String::proto_decode(&mut data) {
            channel = name;
        }
        match channel.as_str() {
            "MC|Brand" => {
                self.sink
                    .send(&PluginMessage {
                        channel: "MC|Brand".into(),
                        data: RestBytes::new(brand_payload()),
                    })
                    .await?;
            }
            other => debug!(channel = %other, "plugin channel"),
        }
        Ok(())
    }

    async fn handle_tab_complete(&mut self, mut data: Bytes) -> Result<(), ConnError> {
        let text = String::proto_decode(&mut data)?;
        // has_position flag plus an optional looked-at block follow; neither
        // affects command completion.

        let completions = self.complete_command(&text);
        let mut payload = bytes::BytesMut::new();
        VarInt(completions.len() as i32).proto_encode(&mut payload);
        for completion in &completions {
            write_string(&mut payload, completion);
        }
        self.sink
            .send(&TabCompleteClientbound {
                data: RestBytes::new(payload.to_vec()),
            })
            .await?;
        Ok(())
    }

    // -- helpers -----------------------------------------------------------

    /// Ground-level probe for item landing simulation, anchored a little
    /// above the player's current height.
    pub(crate) fn ground_at_fn(&self) -> impl Fn(i32, i32) -> f64 {
        let world = Arc::clone(&self.world);
        let start_y = self
            .player
            .as_ref()
            .map(|p| p.position().y as i32)
            .unwrap_or(64);
        move |x, z| find_ground_level(&world, x, start_y + 10, z) as f64
    }
}

/// Keep-alive watchdog. Every 15 s: if the previous id is still unanswered,
/// disconnect once 30 s have passed since it was sent; otherwise send a new
/// id and record the send time.
pub(crate) async fn keep_alive_watchdog(
    sink: super::PacketSink,
    state: Arc<std::sync::Mutex<super::KeepAliveState>>,
    cancel_tx: tokio::sync::watch::Sender<bool>,
    mut cancel_rx: tokio::sync::watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(15));
    // The first tick fires immediately; the cadence starts after it.
    interval.tick().await;
    let mut id: i32 = 0;
    loop {
        tokio::select! {
            _ = cancel_rx.changed() => return,
            _ = interval.tick() => {}
        }

        enum Action {
            Wait,
            Disconnect,
            Send(i32),
        }
        let action = {
            let mut st = state.lock().unwrap();
            if id > 0 && !st.acked {
                // The timestamp stays on the first unanswered id.
                if st.last_sent.elapsed() >= Duration::from_secs(30) {
                    Action::Disconnect
                } else {
                    Action::Wait
                }
            } else {
                id += 1;
                st.last_id = id;
                st.last_sent = Instant::now();
                st.acked = false;
                Action::Send(id)
            }
        };

        match action {
            Action::Wait => {}
            Action::Disconnect => {
                let _ = sink
                    .send(&PlayDisconnect {
                        reason: r#"{"text":"Timed out"}"#.into(),
                    })
                    .await;
                let _ = cancel_tx.send(true);
                return;
            }
            Action::Send(id) => {
                if sink
                    .send(&KeepAliveClientbound {
                        keep_alive_id: VarInt(id),
                    })
                    .await
                    .is_err()
                {
                    let _ = cancel_tx.send(true);
                    return;
                }
            }
        }
    }
}

/// Movement broadcast variants, picked from the fixed-point deltas.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum MoveKind {
    MoveLook,
    Move,
    Teleport,
    None,
}

/// Delta-compressed when all three deltas fit in a signed byte; an absolute
/// teleport otherwise.
pub(crate) fn movement_packet_kind(
    pos_changed: bool,
    look_changed: bool,
    dx: i32,
    dy: i32,
    dz: i32,
) -> MoveKind {
    if !pos_changed {
        return MoveKind::None;
    }
    if delta_fits_in_byte(dx, dy, dz) {
        if look_changed {
            MoveKind::MoveLook
        } else {
            MoveKind::Move
        }
    } else {
        MoveKind::Teleport
    }
}

/// Scan downward for the first solid block; returns the Y an item rests at.
/// Capped at 64 blocks of depth.
pub(crate) fn find_ground_level(world: &World, x: i32, start_y: i32, z: i32) -> i32 {
    let mut y = start_y - 1;
    while y >= start_y - 64 && y >= 0 {
        if world.get_block(x, y, z) != 0 {
            return y + 1;
        }
        y -= 1;
    }
    0
}

/// Ability flags implied by a game mode.
pub(crate) fn abilities_for_game_mode(mode: u8) -> i8 {
    match mode {
        game_mode::CREATIVE => {
            ability::INVULNERABLE | ability::ALLOW_FLIGHT | ability::CREATIVE_MODE
        }
        game_mode::SPECTATOR => ability::INVULNERABLE | ability::ALLOW_FLIGHT,
        _ => 0,
    }
}

/// JSON string literal (with quotes) for chat interpolation.
pub(crate) fn escape_json(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".into())
}

fn brand_payload() -> Vec<u8> {
    let mut buf = bytes::BytesMut::new();
    write_string(&mut buf, "craft-server");
    buf.to_vec()
}

/// Block-crack particles (id 37) at a sprinting player's feet.
fn build_sprint_particles(x: f64, y: f64, z: f64, block_state: i32) -> Vec<u8> {
    let mut buf = bytes::BytesMut::new();
    use bytes::BufMut;
    buf.put_i32(37);
    buf.put_u8(0); // not long-distance
    buf.put_f32(x as f32);
    buf.put_f32(y as f32);
    buf.put_f32(z as f32);
    buf.put_f32(0.5); // offset x
    buf.put_f32(0.1); // offset y
    buf.put_f32(0.5); // offset z
    buf.put_f32(0.0); // speed
    buf.put_i32(5); // count
    VarInt(block_state).proto_encode(&mut buf);
    buf.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abilities_by_mode() {
        assert_eq!(abilities_for_game_mode(game_mode::CREATIVE), 0x0D);
        assert_eq!(abilities_for_game_mode(game_mode::SPECTATOR), 0x05);
        assert_eq!(abilities_for_game_mode(game_mode::SURVIVAL), 0);
        assert_eq!(abilities_for_game_mode(game_mode::ADVENTURE), 0);
    }

    #[test]
    fn json_escaping() {
        assert_eq!(escape_json("hi"), "\"hi\"");
        assert_eq!(escape_json("a\"b"), "\"a\\\"b\"");
    }

    #[test]
    fn movement_delta_encoding() {
        // Small move with look change: combined packet.
        assert_eq!(
            movement_packet_kind(true, true, 10, -5, 127),
            MoveKind::MoveLook
        );
        // Small move, no look change.
        assert_eq!(movement_packet_kind(true, false, 1, 0, 0), MoveKind::Move);
        // A large jump falls back to an absolute teleport: 10 blocks is
        // 320 fixed-point units, out of byte range.
        assert_eq!(
            movement_packet_kind(true, true, 320, 0, 0),
            MoveKind::Teleport
        );
        assert_eq!(
            movement_packet_kind(true, false, 0, -129, 0),
            MoveKind::Teleport
        );
        // Look-only updates emit no movement packet here.
        assert_eq!(movement_packet_kind(false, true, 0, 0, 0), MoveKind::None);
    }

    #[test]
    fn ground_scan_finds_surface() {
        let world = World::new(Box::new(craft_world::FlatGenerator::new(0)));
        assert_eq!(find_ground_level(&world, 0, 20, 0), 5);
        // Scanning from below the surface: nothing above, so fall through.
        assert_eq!(find_ground_level(&world, 0, 0, 0), 0);
    }

    mod keep_alive {
        use super::super::super::{KeepAliveState, PacketSink};
        use super::super::keep_alive_watchdog;
        use craft_proto::frame;
        use std::sync::{Arc, Mutex};
        use std::time::Duration;
        use tokio::io::AsyncReadExt;
        use tokio::sync::watch;
        use tokio::time::Instant;

        async fn drain_packet_ids(stream: &mut tokio::io::DuplexStream) -> Vec<i32> {
            let mut collected = bytes::BytesMut::new();
            let mut chunk = [0u8; 4096];
            loop {
                match tokio::time::timeout(Duration::from_millis(20), stream.read(&mut chunk))
                    .await
                {
                    Ok(Ok(n)) if n > 0 => collected.extend_from_slice(&chunk[..n]),
                    _ => break,
                }
            }
            let mut ids = Vec::new();
            while let Ok(Some((id, _))) = frame::decode_frame(&mut collected) {
                ids.push(id);
            }
            ids
        }

        #[tokio::test(start_paused = true)]
        async fn silent_client_is_disconnected() {
            let (mut client, server) = tokio::io::duplex(1 << 16);
            let sink = PacketSink::from_writer(Box::new(server));
            let state = Arc::new(Mutex::new(KeepAliveState {
                last_id: 0,
                last_sent: Instant::now(),
                acked: true,
            }));
            let (cancel_tx, cancel_rx) = watch::channel(false);
            let mut cancelled = cancel_rx.clone();

            tokio::spawn(keep_alive_watchdog(
                sink,
                Arc::clone(&state),
                cancel_tx,
                cancel_rx,
            ));

            // First keep-alive after 15 s.
            tokio::time::sleep(Duration::from_secs(16)).await;
            let ids = drain_packet_ids(&mut client).await;
            assert!(ids.contains(&0x00), "expected keep alive, got {ids:?}");

            // Never echo it: two more watchdog periods pass the 30 s cutoff.
            tokio::time::sleep(Duration::from_secs(31)).await;
            let ids = drain_packet_ids(&mut client).await;
            assert!(ids.contains(&0x40), "expected disconnect, got {ids:?}");
            assert!(*cancelled.borrow_and_update());
        }

        #[tokio::test(start_paused = true)]
        async fn acknowledged_client_stays_connected() {
            let (mut client, server) = tokio::io::duplex(1 << 16);
            let sink = PacketSink::from_writer(Box::new(server));
            let state = Arc::new(Mutex::new(KeepAliveState {
                last_id: 0,
                last_sent: Instant::now(),
                acked: true,
            }));
            let (cancel_tx, cancel_rx) = watch::channel(false);
            let cancelled = cancel_rx.clone();

            tokio::spawn(keep_alive_watchdog(
                sink,
                Arc::clone(&state),
                cancel_tx,
                cancel_rx,
            ));

            for _ in 0..6 {
                tokio::time::sleep(Duration::from_secs(15)).await;
                // Echo whatever was last sent, as a well-behaved client does.
                let mut st = state.lock().unwrap();
                st.acked = true;
                drop(st);
                let ids = drain_packet_ids(&mut client).await;
                assert!(!ids.contains(&0x40), "unexpected disconnect: {ids:?}");
            }
            assert!(!*cancelled.borrow());
        }
    }
}
