//! Raw payload builders for entity metadata, equipment, spawn, and tab-list
//! packets.

use bytes::{BufMut, BytesMut};
use craft_proto::codec::{write_string, ProtoEncode};
use craft_proto::slot::Slot;
use craft_proto::types::{degrees_to_angle, fixed_point, VarInt};
use craft_proto::METADATA_END;

use super::{Player, PlayerPos};

// Metadata type ids for the 1.8 entity metadata format.
const META_TYPE_BYTE: u8 = 0;
const META_TYPE_SLOT: u8 = 5;

fn write_meta_byte(buf: &mut BytesMut, index: u8, val: u8) {
    buf.put_u8((index & 0x1F) | (META_TYPE_BYTE << 5));
    buf.put_u8(val);
}

/// Entity metadata: flags (index 0) and skin parts (index 10).
pub fn build_entity_metadata(entity_flags: u8, skin_parts: u8) -> Vec<u8> {
    let mut buf = BytesMut::new();
    write_meta_byte(&mut buf, 0, entity_flags);
    write_meta_byte(&mut buf, 10, skin_parts);
    buf.put_u8(METADATA_END);
    buf.to_vec()
}

/// EntityMetadata payload: VarInt entity id + raw metadata entries.
pub fn with_entity_id(entity_id: i32, metadata: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    VarInt(entity_id).proto_encode(&mut buf);
    buf.put_slice(metadata);
    buf.to_vec()
}

/// Item entity metadata: a slot-typed entry at index 10.
pub fn build_item_metadata(item: Slot) -> Vec<u8> {
    let mut buf = BytesMut::new();
    buf.put_u8((10 & 0x1F) | (META_TYPE_SLOT << 5));
    item.proto_encode(&mut buf);
    buf.put_u8(METADATA_END);
    buf.to_vec()
}

/// A single EntityEquipment payload.
pub fn build_equipment(entity_id: i32, equip_slot: i16, item: Slot) -> Vec<u8> {
    let mut buf = BytesMut::new();
    VarInt(entity_id).proto_encode(&mut buf);
    buf.put_i16(equip_slot);
    item.proto_encode(&mut buf);
    buf.to_vec()
}

/// Five EntityEquipment payloads: held item then boots/leggings/chestplate/
/// helmet.
pub fn build_equipment_packets(player: &Player) -> Vec<Vec<u8>> {
    let (held, armor) = player.equipment_snapshot();
    let mut packets = Vec::with_capacity(5);
    packets.push(build_equipment(player.entity_id, 0, held));
    for (i, item) in armor.iter().enumerate() {
        packets.push(build_equipment(player.entity_id, i as i16 + 1, *item));
    }
    packets
}

/// NamedEntitySpawn payload.
pub fn build_named_entity_spawn(player: &Player, pos: &PlayerPos) -> Vec<u8> {
    let mut buf = BytesMut::new();
    VarInt(player.entity_id).proto_encode(&mut buf);
    buf.put_slice(&player.uuid_bytes.0);
    buf.put_i32(fixed_point(pos.x));
    buf.put_i32(fixed_point(pos.y));
    buf.put_i32(fixed_point(pos.z));
    buf.put_i8(degrees_to_angle(pos.yaw));
    buf.put_i8(degrees_to_angle(pos.pitch));

    let held = player.equipment_snapshot().0;
    if held.is_empty() {
        buf.put_i16(0);
    } else {
        buf.put_i16(held.block_id);
    }

    buf.put_slice(&build_entity_metadata(
        player.entity_flags(),
        player.skin_parts(),
    ));
    buf.to_vec()
}

/// PlayerInfo payload with action 0 (add player).
pub fn build_player_info_add(player: &Player) -> Vec<u8> {
    let mut buf = BytesMut::new();
    VarInt(0).proto_encode(&mut buf); // action: add player
    VarInt(1).proto_encode(&mut buf); // count
    buf.put_slice(&player.uuid_bytes.0);
    write_string(&mut buf, &player.username);

    VarInt(player.properties.len() as i32).proto_encode(&mut buf);
    for prop in &player.properties {
        write_string(&mut buf, &prop.name);
        write_string(&mut buf, &prop.value);
        if prop.signature.is_empty() {
            buf.put_u8(0);
        } else {
            buf.put_u8(1);
            write_string(&mut buf, &prop.signature);
        }
    }

    VarInt(player.game_mode() as i32).proto_encode(&mut buf);
    VarInt(0).proto_encode(&mut buf); // ping
    buf.put_u8(0); // no display name
    buf.to_vec()
}

/// PlayerInfo payload with action 1 (update game mode).
pub fn build_player_info_game_mode(player: &Player) -> Vec<u8> {
    let mut buf = BytesMut::new();
    VarInt(1).proto_encode(&mut buf);
    VarInt(1).proto_encode(&mut buf);
    buf.put_slice(&player.uuid_bytes.0);
    VarInt(player.game_mode() as i32).proto_encode(&mut buf);
    buf.to_vec()
}

/// PlayerInfo payload with action 4 (remove player).
pub fn build_player_info_remove(player: &Player) -> Vec<u8> {
    let mut buf = BytesMut::new();
    VarInt(4).proto_encode(&mut buf);
    VarInt(1).proto_encode(&mut buf);
    buf.put_slice(&player.uuid_bytes.0);
    buf.to_vec()
}

/// EntityDestroy payload.
pub fn build_destroy_entities(ids: &[i32]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    VarInt(ids.len() as i32).proto_encode(&mut buf);
    for id in ids {
        VarInt(*id).proto_encode(&mut buf);
    }
    buf.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_entry_headers() {
        let data = build_entity_metadata(0x02, 0x7F);
        // (0 & 0x1F) | (0 << 5) = 0x00, then flags; (10 & 0x1F) = 0x0A.
        assert_eq!(data, vec![0x00, 0x02, 0x0A, 0x7F, METADATA_END]);
    }

    #[test]
    fn item_metadata_slot_header() {
        let data = build_item_metadata(Slot::new(1, 5, 0));
        assert_eq!(data[0], (10 & 0x1F) | (5 << 5));
        assert_eq!(*data.last().unwrap(), METADATA_END);
        // i16 id + i8 count + i16 damage + nbt terminator.
        assert_eq!(data.len(), 1 + 6 + 1);
    }

    #[test]
    fn destroy_entities_payload() {
        let data = build_destroy_entities(&[1, 2, 300]);
        assert_eq!(data[0], 3);
        assert_eq!(data[1], 1);
        assert_eq!(data[2], 2);
        // 300 = 0xAC 0x02 as VarInt.
        assert_eq!(&data[3..], &[0xAC, 0x02]);
    }

    #[test]
    fn equipment_layout() {
        let data = build_equipment(5, 0, Slot::new(276, 1, 0));
        // varint eid + i16 slot + full item slot.
        assert_eq!(data.len(), 1 + 2 + 6);
        assert_eq!(data[0], 5);
        assert_eq!(&data[1..3], &[0, 0]);
    }
}
