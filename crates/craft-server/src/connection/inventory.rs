//! Window-0 (player inventory) interaction handling.
//!
//! The crafting slots exist as storage so the client's window stays
//! coherent, but no recipes are matched: the output slot stays empty.

use bytes::{BufMut, Bytes, BytesMut};
use craft_proto::codec::{ProtoDecode, ProtoEncode, RestBytes};
use craft_proto::packets::{
    CreativeSlot, EntityEquipment, SetSlot, TransactionClientbound, WindowItems,
};
use craft_proto::slot::{Slot, EMPTY_SLOT};
use craft_proto::types::VarInt;
use tracing::debug;

use super::{ConnError, Connection};
use crate::player::inventory::{armor_slot_for_item, window, STACK_MAX};
use crate::player::metadata::build_equipment;

impl Connection {
    /// Full Window 0 sync, crafting slots overlaid from connection state.
    pub(crate) async fn send_window_items(&mut self) -> Result<(), ConnError> {
        let player = self.require_player()?;
        let mut proto = player.with_inventory(|inv| inv.to_protocol_slots());
        proto[window::CRAFT_OUTPUT as usize] = EMPTY_SLOT;
        for i in 0..4 {
            proto[window::CRAFT_START as usize + i] = self.crafting_grid[i];
        }

        let mut buf = BytesMut::new();
        buf.put_u8(0); // window id 0
        buf.put_i16(window::TOTAL);
        for slot in &proto {
            slot.proto_encode(&mut buf);
        }
        self.sink
            .send(&WindowItems {
                data: RestBytes::new(buf.to_vec()),
            })
            .await?;
        Ok(())
    }

    /// Single-slot update.
    pub(crate) async fn send_set_slot(
        &mut self,
        window_id: i8,
        slot_index: i16,
        slot: Slot,
    ) -> Result<(), ConnError> {
        let mut buf = BytesMut::new();
        buf.put_i8(window_id);
        buf.put_i16(slot_index);
        slot.proto_encode(&mut buf);
        self.sink
            .send(&SetSlot {
                data: RestBytes::new(buf.to_vec()),
            })
            .await?;
        Ok(())
    }

    pub(crate) async fn handle_window_click(&mut self, mut data: Bytes) -> Result<(), ConnError> {
        let window_id = u8::proto_decode(&mut data)?;
        let slot_index = i16::proto_decode(&mut data)?;
        let button = i8::proto_decode(&mut data)?;
        let action_id = i16::proto_decode(&mut data)?;
        let mode = VarInt::proto_decode(&mut data)?.0;
        // Clicked-item copy: consumed but the server state is authoritative.
        let _ = Slot::proto_decode(&mut data)?;

        if window_id != 0 {
            return self.send_transaction(0, action_id, false).await;
        }

        debug!(slot = slot_index, button, mode, "window click");
        self.dispatch_click(slot_index, button, mode).await;

        // Full resync so the client matches server state, plus the cursor.
        self.send_window_items().await?;
        let cursor = self.cursor;
        self.send_set_slot(-1, -1, cursor).await?;
        self.send_transaction(0, action_id, true).await
    }

    async fn send_transaction(
        &mut self,
        window_id: i8,
        action: i16,
        accepted: bool,
    ) -> Result<(), ConnError> {
        self.sink
            .send(&TransactionClientbound {
                window_id,
                action,
                accepted,
            })
            .await?;
        Ok(())
    }

    async fn dispatch_click(&mut self, slot: i16, button: i8, mode: i32) {
        match mode {
            0 => self.handle_normal_click(slot, button).await,
            1 => self.handle_shift_click(slot),
            2 => self.handle_number_key(slot, button),
            3 => self.handle_middle_click(slot),
            4 => self.handle_drop_click(slot, button).await,
            5 => self.handle_drag_click(slot, button),
            6 => self.handle_double_click(),
            _ => {}
        }
    }

    /// Read a window slot, craft slots included.
    fn window_slot(&self, slot: i16) -> Slot {
        match slot {
            window::CRAFT_OUTPUT => EMPTY_SLOT,
            window::CRAFT_START..=window::CRAFT_END => {
                self.crafting_grid[(slot - window::CRAFT_START) as usize]
            }
            window::HELMET..=window::HOTBAR_END => self
                .player
                .as_ref()
                .map(|p| p.with_inventory(|inv| inv.protocol_slot(slot)))
                .unwrap_or(EMPTY_SLOT),
            _ => EMPTY_SLOT,
        }
    }

    /// Write a window slot, broadcasting equipment changes where needed.
    fn set_window_slot(&mut self, slot: i16, item: Slot) {
        match slot {
            window::CRAFT_OUTPUT => {}
            window::CRAFT_START..=window::CRAFT_END => {
                self.crafting_grid[(slot - window::CRAFT_START) as usize] = item;
            }
            window::HELMET..=window::HOTBAR_END => {
                if let Some(player) = self.player.clone() {
                    player.with_inventory(|inv| inv.set_protocol_slot(slot, item));
                    self.pending_equipment_broadcast(slot);
                }
            }
            _ => {}
        }
    }

    /// Queue the equipment broadcast matching a changed protocol slot.
    fn pending_equipment_broadcast(&mut self, slot: i16) {
        let Some(player) = self.player.clone() else {
            return;
        };
        let eid = player.entity_id;
        let packet = match slot {
            window::HELMET => Some((4, player.with_inventory(|inv| inv.armor[3]))),
            window::CHESTPLATE => Some((3, player.with_inventory(|inv| inv.armor[2]))),
            window::LEGGINGS => Some((2, player.with_inventory(|inv| inv.armor[1]))),
            window::BOOTS => Some((1, player.with_inventory(|inv| inv.armor[0]))),
            window::HOTBAR_START..=window::HOTBAR_END => {
                let (held_slot, held) =
                    player.with_inventory(|inv| (inv.held_slot, inv.held_item()));
                if slot - window::HOTBAR_START == held_slot {
                    Some((0, held))
                } else {
                    None
                }
            }
            _ => None,
        };
        if let Some((equip_slot, item)) = packet {
            let players = std::sync::Arc::clone(&self.players);
            tokio::spawn(async move {
                players
                    .broadcast_to_trackers(
                        &EntityEquipment {
                            data: RestBytes::new(build_equipment(eid, equip_slot, item)),
                        },
                        eid,
                    )
                    .await;
            });
        }
    }

    /// Mode 0: left/right click pickup, place, merge, swap.
    async fn handle_normal_click(&mut self, slot: i16, button: i8) {
        if slot == window::OUTSIDE {
            if !self.cursor.is_empty() {
                let item = self.cursor;
                if button == 0 {
                    self.drop_item(item).await;
                    self.cursor = EMPTY_SLOT;
                } else {
                    self.drop_item(item.with_count(1)).await;
                    if item.count <= 1 {
                        self.cursor = EMPTY_SLOT;
                    } else {
                        self.cursor = item.with_count(item.count - 1);
                    }
                }
            }
            return;
        }

        if !(0..=window::HOTBAR_END).contains(&slot) || slot == window::CRAFT_OUTPUT {
            return;
        }

        let current = self.window_slot(slot);

        if button == 0 {
            // Left click.
            if self.cursor.is_empty() && current.is_empty() {
                return;
            }
            if self.cursor.is_empty() {
                self.cursor = current;
                self.set_window_slot(slot, EMPTY_SLOT);
            } else if current.is_empty() {
                let cursor = self.cursor;
                self.set_window_slot(slot, cursor);
                self.cursor = EMPTY_SLOT;
            } else if self.cursor.stacks_with(&current) {
                let space = (STACK_MAX - current.count) as i32;
                if space <= 0 {
                    let cursor = self.cursor;
                    self.cursor = current;
                    self.set_window_slot(slot, cursor);
                } else {
                    let transfer = (self.cursor.count as i32).min(space);
                    self.set_window_slot(slot, current.with_count(current.count + transfer as i8));
                    let left = self.cursor.count as i32 - transfer;
                    self.cursor = if left <= 0 {
                        EMPTY_SLOT
                    } else {
                        self.cursor.with_count(left as i8)
                    };
                }
            } else {
                let cursor = self.cursor;
                self.cursor = current;
                self.set_window_slot(slot, cursor);
            }
        } else {
            // Right click.
            if self.cursor.is_empty() && !current.is_empty() {
                let half = (current.count + 1) / 2;
                self.cursor = current.with_count(half);
                if current.count - half <= 0 {
                    self.set_window_slot(slot, EMPTY_SLOT);
                } else {
                    self.set_window_slot(slot, current.with_count(current.count - half));
                }
            } else if !self.cursor.is_empty() && current.is_empty() {
                let placed = self.cursor.with_count(1);
                self.set_window_slot(slot, placed);
                self.shrink_cursor(1);
            } else if !self.cursor.is_empty()
                && self.cursor.stacks_with(&current)
                && current.count < STACK_MAX
            {
                self.set_window_slot(slot, current.with_count(current.count + 1));
                self.shrink_cursor(1);
            } else if !self.cursor.is_empty() && !current.is_empty() {
                let cursor = self.cursor;
                self.cursor = current;
                self.set_window_slot(slot, cursor);
            }
        }
    }

    fn shrink_cursor(&mut self, by: i8) {
        if self.cursor.count <= by {
            self.cursor = EMPTY_SLOT;
        } else {
            self.cursor = self.cursor.with_count(self.cursor.count - by);
        }
    }

    /// Mode 1: shift-click between sections (armor auto-equip included).
    fn handle_shift_click(&mut self, slot: i16) {
        if !(window::CRAFT_START..=window::HOTBAR_END).contains(&slot) {
            return;
        }
        let item = self.window_slot(slot);
        if item.is_empty() {
            return;
        }

        let mut moved = false;
        match slot {
            window::HELMET..=window::BOOTS => {
                moved = self.try_add_to_section(item, window::MAIN_START, window::HOTBAR_END);
            }
            window::MAIN_START..=window::MAIN_END => {
                if let Some(armor_slot) = armor_slot_for_item(item.block_id) {
                    if self.window_slot(armor_slot).is_empty() {
                        self.set_window_slot(armor_slot, item);
                        moved = true;
                    }
                }
                if !moved {
                    moved = self.try_add_to_section(item, window::HOTBAR_START, window::HOTBAR_END);
                }
            }
            window::HOTBAR_START..=window::HOTBAR_END => {
                if let Some(armor_slot) = armor_slot_for_item(item.block_id) {
                    if self.window_slot(armor_slot).is_empty() {
                        self.set_window_slot(armor_slot, item);
                        moved = true;
                    }
                }
                if !moved {
                    moved = self.try_add_to_section(item, window::MAIN_START, window::MAIN_END);
                }
            }
            window::CRAFT_START..=window::CRAFT_END => {
                moved = self.try_add_to_section(item, window::MAIN_START, window::HOTBAR_END);
            }
            _ => {}
        }

        if moved {
            self.set_window_slot(slot, EMPTY_SLOT);
        }
    }

    /// Try to place an item into slots [lo, hi]; true if fully placed.
    fn try_add_to_section(&mut self, item: Slot, lo: i16, hi: i16) -> bool {
        let mut remaining = item.count as i32;

        for s in lo..=hi {
            if remaining <= 0 {
                break;
            }
            let existing = self.window_slot(s);
            if !existing.is_empty() && existing.stacks_with(&item) && existing.count < STACK_MAX {
                let transfer = remaining.min((STACK_MAX - existing.count) as i32);
                self.set_window_slot(s, existing.with_count(existing.count + transfer as i8));
                remaining -= transfer;
            }
        }
        for s in lo..=hi {
            if remaining <= 0 {
                break;
            }
            if self.window_slot(s).is_empty() {
                let place = remaining.min(STACK_MAX as i32);
                self.set_window_slot(s, item.with_count(place as i8));
                remaining -= place;
            }
        }

        remaining <= 0
    }

    /// Mode 2: number keys swap with the hotbar.
    fn handle_number_key(&mut self, slot: i16, button: i8) {
        if !(0..=window::HOTBAR_END).contains(&slot) {
            return;
        }
        let hotbar_slot = window::HOTBAR_START + button as i16;
        if !(window::HOTBAR_START..=window::HOTBAR_END).contains(&hotbar_slot) {
            return;
        }
        let a = self.window_slot(slot);
        let b = self.window_slot(hotbar_slot);
        self.set_window_slot(slot, b);
        self.set_window_slot(hotbar_slot, a);
    }

    /// Mode 3: middle-click clone (creative).
    fn handle_middle_click(&mut self, slot: i16) {
        if !(0..=window::HOTBAR_END).contains(&slot) {
            return;
        }
        let item = self.window_slot(slot);
        if !item.is_empty() {
            self.cursor = item.with_count(STACK_MAX);
        }
    }

    /// Mode 4: Q-key drop.
    async fn handle_drop_click(&mut self, slot: i16, button: i8) {
        if !(0..=window::HOTBAR_END).contains(&slot) {
            return;
        }
        let item = self.window_slot(slot);
        if item.is_empty() {
            return;
        }

        if button == 0 {
            self.drop_item(item.with_count(1)).await;
            if item.count <= 1 {
                self.set_window_slot(slot, EMPTY_SLOT);
            } else {
                self.set_window_slot(slot, item.with_count(item.count - 1));
            }
        } else {
            // Ctrl+Q drops the whole stack.
            self.set_window_slot(slot, EMPTY_SLOT);
            self.drop_item(item).await;
        }
    }

    /// Mode 5: paint-drag. Three phases keyed off the button value.
    fn handle_drag_click(&mut self, slot: i16, button: i8) {
        match button {
            0 => {
                self.drag_active = true;
                self.drag_mode = 0;
                self.drag_slots.clear();
            }
            4 => {
                self.drag_active = true;
                self.drag_mode = 1;
                self.drag_slots.clear();
            }
            1 | 5 => {
                if self.drag_active && (0..=window::HOTBAR_END).contains(&slot) {
                    self.drag_slots.push(slot);
                }
            }
            2 => {
                if self.drag_active && self.drag_mode == 0 {
                    self.finish_drag();
                }
                self.drag_active = false;
            }
            6 => {
                if self.drag_active && self.drag_mode == 1 {
                    self.finish_drag();
                }
                self.drag_active = false;
            }
            _ => self.drag_active = false,
        }
    }

    fn finish_drag(&mut self) {
        if self.cursor.is_empty() || self.drag_slots.is_empty() {
            return;
        }
        let targets = std::mem::take(&mut self.drag_slots);
        let cursor = self.cursor;
        let mut remaining = cursor.count as i32;

        let per_slot = if self.drag_mode == 0 {
            (remaining as usize / targets.len()).max(1) as i32
        } else {
            1
        };

        for slot in targets {
            if remaining <= 0 {
                break;
            }
            let existing = self.window_slot(slot);
            if !existing.is_empty() && !existing.stacks_with(&cursor) {
                continue;
            }
            let current = if existing.is_empty() { 0 } else { existing.count };
            let space = (STACK_MAX - current) as i32;
            let give = per_slot.min(remaining).min(space);
            if give <= 0 {
                continue;
            }
            self.set_window_slot(slot, cursor.with_count(current + give as i8));
            remaining -= give;
        }

        self.cursor = if remaining <= 0 {
            EMPTY_SLOT
        } else {
            cursor.with_count(remaining as i8)
        };
    }

    /// Mode 6: double-click collects matching items onto the cursor.
    fn handle_double_click(&mut self) {
        if self.cursor.is_empty() {
            return;
        }
        let mut needed = (STACK_MAX - self.cursor.count) as i32;

        for s in window::CRAFT_START..=window::HOTBAR_END {
            if needed <= 0 {
                break;
            }
            let item = self.window_slot(s);
            if item.is_empty() || !item.stacks_with(&self.cursor) {
                continue;
            }
            let take = (item.count as i32).min(needed);
            if item.count as i32 - take <= 0 {
                self.set_window_slot(s, EMPTY_SLOT);
            } else {
                self.set_window_slot(s, item.with_count(item.count - take as i8));
            }
            self.cursor = self.cursor.with_count(self.cursor.count + take as i8);
            needed -= take;
        }
    }

    pub(crate) async fn handle_creative_slot(&mut self, mut data: Bytes) -> Result<(), ConnError> {
        let p = CreativeSlot::proto_decode(&mut data)?;

        // Slot -1 throws the item out of the inventory.
        if p.slot_index == -1 {
            if p.item.block_id > 0 {
                self.drop_item(p.item).await;
            }
            return Ok(());
        }
        if !(0..=window::HOTBAR_END).contains(&p.slot_index) {
            return Ok(());
        }

        let slot = if p.item.block_id == -1 {
            EMPTY_SLOT
        } else {
            p.item
        };
        self.set_window_slot(p.slot_index, slot);
        Ok(())
    }

    pub(crate) async fn handle_close_window(&mut self, _window_id: u8) -> Result<(), ConnError> {
        // Return crafting grid contents, or drop what doesn't fit.
        for i in 0..4 {
            let item = self.crafting_grid[i];
            if item.is_empty() {
                continue;
            }
            self.crafting_grid[i] = EMPTY_SLOT;
            if !self.try_add_to_section(item, window::MAIN_START, window::HOTBAR_END) {
                self.drop_item(item).await;
            }
        }

        if !self.cursor.is_empty() {
            let item = self.cursor;
            self.cursor = EMPTY_SLOT;
            self.drop_item(item).await;
        }
        Ok(())
    }

    /// Spawn a dropped item entity in front of the player.
    async fn drop_item(&mut self, item: Slot) {
        let Some(player) = self.player.clone() else {
            return;
        };
        let pos = player.position();
        let ground_at = self.ground_at_fn();
        self.players
            .spawn_item(item, pos.x, pos.y + 1.3, pos.z, pos.yaw, ground_at)
            .await;
    }
}
