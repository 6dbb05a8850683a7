//! Packet definitions for protocol 47, grouped by phase and direction.
//!
//! Each declaration expands to a struct plus its wire codec; fields encode
//! and decode in declaration order, with the Rust field type standing for
//! the wire tag. Packets whose payload the vanilla protocol structures in a
//! way we treat as opaque carry a single trailing [`RestBytes`] field and
//! are assembled by the caller.

use bytes::{Buf, BufMut};

use crate::codec::{ByteArray, ProtoDecode, ProtoEncode, RestBytes};
use crate::error::ProtoError;
use crate::slot::Slot;
use crate::types::{Position, Uuid, VarInt};

/// Connection phase a packet belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Handshake,
    Status,
    Login,
    Play,
}

/// Packet flow direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Clientbound,
    Serverbound,
}

/// A typed packet with a fixed (phase, direction, id) classification.
pub trait Packet: ProtoEncode + ProtoDecode {
    const ID: i32;
    const PHASE: Phase;
    const DIRECTION: Direction;
}

macro_rules! define_packets {
    (
        $(
            $(#[$attrs:meta])*
            $phase:ident $dir:ident $id:literal $name:ident {
                $( $field:ident: $ty:ty ),* $(,)?
            }
        )*
    ) => {
        $(
            $(#[$attrs])*
            #[derive(Debug, Clone, Default, PartialEq)]
            pub struct $name {
                $( pub $field: $ty, )*
            }

            impl ProtoEncode for $name {
                fn proto_encode(&self, _buf: &mut impl BufMut) {
                    $( self.$field.proto_encode(_buf); )*
                }
            }

            impl ProtoDecode for $name {
                fn proto_decode(_buf: &mut impl Buf) -> Result<Self, ProtoError> {
                    Ok(Self {
                        $( $field: <$ty>::proto_decode(_buf)?, )*
                    })
                }
            }

            impl Packet for $name {
                const ID: i32 = $id;
                const PHASE: Phase = Phase::$phase;
                const DIRECTION: Direction = Direction::$dir;
            }
        )*
    };
}

define_packets! {
    // -- Handshake --

    /// First packet of every connection; `next_state` selects Status (1) or
    /// Login (2).
    Handshake Serverbound 0x00 HandshakePacket {
        protocol_version: VarInt,
        server_address: String,
        server_port: u16,
        next_state: VarInt,
    }

    // -- Status --

    Status Serverbound 0x00 StatusRequest {}

    Status Clientbound 0x00 StatusResponse {
        json: String,
    }

    Status Serverbound 0x01 StatusPing {
        payload: i64,
    }

    Status Clientbound 0x01 StatusPong {
        payload: i64,
    }

    // -- Login --

    Login Clientbound 0x00 LoginDisconnect {
        reason: String,
    }

    Login Serverbound 0x00 LoginStart {
        name: String,
    }

    /// Server id is the empty string on 1.8; the public key is the
    /// DER-encoded SubjectPublicKeyInfo.
    Login Clientbound 0x01 EncryptionRequest {
        server_id: String,
        public_key: ByteArray,
        verify_token: ByteArray,
    }

    /// Both fields are RSA/PKCS#1-v1.5 encrypted with the server's key.
    Login Serverbound 0x01 EncryptionResponse {
        shared_secret: ByteArray,
        verify_token: ByteArray,
    }

    Login Clientbound 0x02 LoginSuccess {
        uuid: String,
        username: String,
    }

    Login Clientbound 0x03 SetCompression {
        threshold: VarInt,
    }

    // -- Play, clientbound --

    Play Clientbound 0x00 KeepAliveClientbound {
        keep_alive_id: VarInt,
    }

    Play Clientbound 0x01 JoinGame {
        entity_id: i32,
        game_mode: u8,
        dimension: i8,
        difficulty: u8,
        max_players: u8,
        level_type: String,
        reduced_debug_info: bool,
    }

    Play Clientbound 0x02 ChatMessage {
        json: String,
        position: i8,
    }

    Play Clientbound 0x03 UpdateTime {
        world_age: i64,
        time_of_day: i64,
    }

    /// VarInt entity id, i16 equipment slot, then the item slot.
    Play Clientbound 0x04 EntityEquipment {
        data: RestBytes,
    }

    Play Clientbound 0x05 SpawnPosition {
        location: Position,
    }

    Play Clientbound 0x06 UpdateHealth {
        health: f32,
        food: VarInt,
        saturation: f32,
    }

    Play Clientbound 0x07 Respawn {
        dimension: i32,
        difficulty: u8,
        game_mode: u8,
        level_type: String,
    }

    Play Clientbound 0x08 PlayerPositionAndLook {
        x: f64,
        y: f64,
        z: f64,
        yaw: f32,
        pitch: f32,
        flags: i8,
    }

    Play Clientbound 0x09 HeldItemChange {
        slot: i8,
    }

    Play Clientbound 0x0B AnimationClientbound {
        entity_id: VarInt,
        animation: u8,
    }

    /// VarInt entity id, 16 UUID bytes, fixed-point position, angle bytes,
    /// i16 held item, entity metadata.
    Play Clientbound 0x0C NamedEntitySpawn {
        data: RestBytes,
    }

    Play Clientbound 0x0D CollectItem {
        collected_id: VarInt,
        collector_id: VarInt,
    }

    /// VarInt entity id, i8 object type, fixed-point position, pitch/yaw,
    /// i32 data, then velocity when data is non-zero.
    Play Clientbound 0x0E SpawnEntity {
        data: RestBytes,
    }

    Play Clientbound 0x12 EntityVelocity {
        entity_id: VarInt,
        velocity_x: i16,
        velocity_y: i16,
        velocity_z: i16,
    }

    /// VarInt count followed by that many VarInt entity ids.
    Play Clientbound 0x13 EntityDestroy {
        data: RestBytes,
    }

    Play Clientbound 0x15 RelEntityMove {
        entity_id: VarInt,
        dx: i8,
        dy: i8,
        dz: i8,
        on_ground: bool,
    }

    Play Clientbound 0x16 EntityLook {
        entity_id: VarInt,
        yaw: i8,
        pitch: i8,
        on_ground: bool,
    }

    Play Clientbound 0x17 EntityMoveLook {
        entity_id: VarInt,
        dx: i8,
        dy: i8,
        dz: i8,
        yaw: i8,
        pitch: i8,
        on_ground: bool,
    }

    Play Clientbound 0x18 EntityTeleport {
        entity_id: VarInt,
        x: i32,
        y: i32,
        z: i32,
        yaw: i8,
        pitch: i8,
        on_ground: bool,
    }

    Play Clientbound 0x19 EntityHeadRotation {
        entity_id: VarInt,
        head_yaw: i8,
    }

    Play Clientbound 0x1A EntityStatus {
        entity_id: i32,
        status: i8,
    }

    /// VarInt entity id followed by raw metadata entries.
    Play Clientbound 0x1C EntityMetadata {
        data: RestBytes,
    }

    Play Clientbound 0x21 MapChunk {
        chunk_x: i32,
        chunk_z: i32,
        ground_up: bool,
        bitmap: u16,
        data: ByteArray,
    }

    Play Clientbound 0x23 BlockChange {
        location: Position,
        block_state: VarInt,
    }

    Play Clientbound 0x25 BlockBreakAnimation {
        entity_id: VarInt,
        location: Position,
        destroy_stage: i8,
    }

    Play Clientbound 0x28 WorldEvent {
        effect_id: i32,
        location: Position,
        data: i32,
        global: bool,
    }

    Play Clientbound 0x2A WorldParticles {
        data: RestBytes,
    }

    Play Clientbound 0x2B GameStateChange {
        reason: u8,
        value: f32,
    }

    /// i8 window id, i16 slot index, then the slot.
    Play Clientbound 0x2F SetSlot {
        data: RestBytes,
    }

    /// u8 window id, i16 count, then that many slots.
    Play Clientbound 0x30 WindowItems {
        data: RestBytes,
    }

    Play Clientbound 0x32 TransactionClientbound {
        window_id: i8,
        action: i16,
        accepted: bool,
    }

    /// Tab list updates; action-tagged variable body.
    Play Clientbound 0x38 PlayerInfo {
        data: RestBytes,
    }

    Play Clientbound 0x39 PlayerAbilities {
        flags: i8,
        flying_speed: f32,
        walking_speed: f32,
    }

    Play Clientbound 0x3A TabCompleteClientbound {
        data: RestBytes,
    }

    Play Clientbound 0x3F PluginMessage {
        channel: String,
        data: RestBytes,
    }

    Play Clientbound 0x40 PlayDisconnect {
        reason: String,
    }

    // -- Play, serverbound --

    Play Serverbound 0x00 KeepAliveServerbound {
        keep_alive_id: VarInt,
    }

    Play Serverbound 0x01 ChatMessageServerbound {
        message: String,
    }

    /// VarInt target, VarInt mouse, three floats when mouse is interact-at.
    Play Serverbound 0x02 UseEntity {
        data: RestBytes,
    }

    Play Serverbound 0x03 PlayerGround {
        on_ground: bool,
    }

    Play Serverbound 0x04 PlayerPosition {
        x: f64,
        feet_y: f64,
        z: f64,
        on_ground: bool,
    }

    Play Serverbound 0x05 PlayerLook {
        yaw: f32,
        pitch: f32,
        on_ground: bool,
    }

    Play Serverbound 0x06 PlayerPositionAndLookServerbound {
        x: f64,
        feet_y: f64,
        z: f64,
        yaw: f32,
        pitch: f32,
        on_ground: bool,
    }

    Play Serverbound 0x07 BlockDig {
        status: i8,
        location: Position,
        face: i8,
    }

    /// Position, face, held slot copy, three cursor bytes.
    Play Serverbound 0x08 BlockPlace {
        data: RestBytes,
    }

    Play Serverbound 0x09 HeldItemChangeServerbound {
        slot: i16,
    }

    Play Serverbound 0x0A ArmSwing {}

    Play Serverbound 0x0B EntityAction {
        entity_id: VarInt,
        action_id: VarInt,
        jump_boost: VarInt,
    }

    Play Serverbound 0x0C SteerVehicle {
        data: RestBytes,
    }

    Play Serverbound 0x0D CloseWindow {
        window_id: u8,
    }

    /// u8 window, i16 slot, i8 button, i16 action, VarInt mode, clicked slot.
    Play Serverbound 0x0E WindowClick {
        data: RestBytes,
    }

    Play Serverbound 0x0F TransactionServerbound {
        window_id: i8,
        action: i16,
        accepted: bool,
    }

    Play Serverbound 0x10 CreativeSlot {
        slot_index: i16,
        item: Slot,
    }

    Play Serverbound 0x11 EnchantItem {
        data: RestBytes,
    }

    Play Serverbound 0x12 UpdateSign {
        location: Position,
        line1: String,
        line2: String,
        line3: String,
        line4: String,
    }

    Play Serverbound 0x13 AbilitiesServerbound {
        flags: i8,
        flying_speed: f32,
        walking_speed: f32,
    }

    Play Serverbound 0x14 TabCompleteServerbound {
        data: RestBytes,
    }

    Play Serverbound 0x15 ClientSettings {
        locale: String,
        view_distance: i8,
        chat_mode: i8,
        chat_colors: bool,
        skin_parts: u8,
    }

    Play Serverbound 0x16 ClientStatus {
        action_id: VarInt,
    }

    Play Serverbound 0x17 CustomPayload {
        channel: String,
        data: RestBytes,
    }

    Play Serverbound 0x18 Spectate {
        target: Uuid,
    }

    Play Serverbound 0x19 ResourcePackStatus {
        hash: String,
        result: VarInt,
    }
}

/// Game mode ids.
pub mod game_mode {
    pub const SURVIVAL: u8 = 0;
    pub const CREATIVE: u8 = 1;
    pub const ADVENTURE: u8 = 2;
    pub const SPECTATOR: u8 = 3;
}

/// Dimension ids for JoinGame/Respawn.
pub mod dimension {
    pub const NETHER: i8 = -1;
    pub const OVERWORLD: i8 = 0;
    pub const END: i8 = 1;
}

/// Difficulty ids.
pub mod difficulty {
    pub const PEACEFUL: u8 = 0;
    pub const EASY: u8 = 1;
    pub const NORMAL: u8 = 2;
    pub const HARD: u8 = 3;
}

/// PlayerAbilities flag bits.
pub mod ability {
    pub const INVULNERABLE: i8 = 0x01;
    pub const FLYING: i8 = 0x02;
    pub const ALLOW_FLIGHT: i8 = 0x04;
    pub const CREATIVE_MODE: i8 = 0x08;
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn roundtrip<P: Packet + PartialEq + std::fmt::Debug>(pkt: &P) {
        let mut buf = BytesMut::new();
        pkt.proto_encode(&mut buf);
        let decoded = P::proto_decode(&mut buf.freeze()).unwrap();
        assert_eq!(&decoded, pkt);
    }

    #[test]
    fn handshake_roundtrip() {
        roundtrip(&HandshakePacket {
            protocol_version: VarInt(47),
            server_address: "localhost".into(),
            server_port: 25565,
            next_state: VarInt(2),
        });
    }

    #[test]
    fn join_game_roundtrip() {
        roundtrip(&JoinGame {
            entity_id: 1,
            game_mode: game_mode::CREATIVE,
            dimension: dimension::OVERWORLD,
            difficulty: difficulty::EASY,
            max_players: 20,
            level_type: "default".into(),
            reduced_debug_info: false,
        });
    }

    #[test]
    fn join_game_wire_layout() {
        let pkt = JoinGame {
            entity_id: 1,
            game_mode: 1,
            dimension: 0,
            difficulty: 1,
            max_players: 20,
            level_type: "flat".into(),
            reduced_debug_info: false,
        };
        let mut buf = BytesMut::new();
        pkt.proto_encode(&mut buf);
        // i32 + u8 + i8 + u8 + u8 + (varint 1 + "flat") + bool
        assert_eq!(buf.len(), 4 + 1 + 1 + 1 + 1 + 5 + 1);
        assert_eq!(&buf[..4], &[0, 0, 0, 1]);
    }

    #[test]
    fn movement_packets_roundtrip() {
        roundtrip(&RelEntityMove {
            entity_id: VarInt(7),
            dx: -3,
            dy: 0,
            dz: 127,
            on_ground: true,
        });
        roundtrip(&EntityMoveLook {
            entity_id: VarInt(7),
            dx: 1,
            dy: -1,
            dz: 0,
            yaw: 64,
            pitch: -32,
            on_ground: false,
        });
        roundtrip(&EntityTeleport {
            entity_id: VarInt(7),
            x: 32 * 100,
            y: 32 * 64,
            z: -32 * 5,
            yaw: 0,
            pitch: 0,
            on_ground: true,
        });
    }

    #[test]
    fn map_chunk_roundtrip() {
        roundtrip(&MapChunk {
            chunk_x: -3,
            chunk_z: 7,
            ground_up: true,
            bitmap: 0x0001,
            data: ByteArray::new(vec![0u8; 16]),
        });
    }

    #[test]
    fn block_change_roundtrip() {
        roundtrip(&BlockChange {
            location: Position::new(5, 10, 5),
            block_state: VarInt(16),
        });
    }

    #[test]
    fn status_packets_roundtrip() {
        roundtrip(&StatusRequest::default());
        roundtrip(&StatusPing { payload: 12345 });
        roundtrip(&StatusPong { payload: 12345 });
    }

    #[test]
    fn encryption_packets_roundtrip() {
        roundtrip(&EncryptionRequest {
            server_id: String::new(),
            public_key: ByteArray::new(vec![0x30, 0x81, 0x9F]),
            verify_token: ByteArray::new(vec![1, 2, 3, 4]),
        });
        roundtrip(&EncryptionResponse {
            shared_secret: ByteArray::new(vec![0u8; 128]),
            verify_token: ByteArray::new(vec![0u8; 128]),
        });
    }

    #[test]
    fn packet_classification() {
        assert_eq!(HandshakePacket::ID, 0x00);
        assert_eq!(HandshakePacket::PHASE, Phase::Handshake);
        assert_eq!(LoginStart::PHASE, Phase::Login);
        assert_eq!(LoginStart::DIRECTION, Direction::Serverbound);
        assert_eq!(MapChunk::ID, 0x21);
        assert_eq!(MapChunk::DIRECTION, Direction::Clientbound);
        assert_eq!(PlayDisconnect::ID, 0x40);
    }

    #[test]
    fn keep_alive_ids_shared_across_directions() {
        assert_eq!(KeepAliveClientbound::ID, KeepAliveServerbound::ID);
        assert_eq!(KeepAliveClientbound::DIRECTION, Direction::Clientbound);
        assert_eq!(KeepAliveServerbound::DIRECTION, Direction::Serverbound);
    }

    #[test]
    fn creative_slot_with_item() {
        roundtrip(&CreativeSlot {
            slot_index: 36,
            item: Slot::new(1, 64, 0),
        });
    }
}
