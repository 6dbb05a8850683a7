//! Dropped item entities.

use bytes::{BufMut, BytesMut};
use craft_proto::codec::ProtoEncode;
use craft_proto::slot::Slot;
use craft_proto::types::{fixed_point, VarInt};

/// Ticks before a dropped item may be picked up.
pub const PICKUP_DELAY_TICKS: i64 = 10;

/// Ticks a dropped item lives before despawning (5 minutes).
pub const LIFETIME_TICKS: i64 = 6000;

/// Pickup radius, measured from the player's center.
pub const PICKUP_RADIUS: f64 = 2.5;

/// A dropped item. The stored position is the estimated landing point,
/// which pickup distance is measured against; clients receive the visual
/// throw position plus a velocity and simulate the arc themselves.
pub struct ItemEntity {
    pub entity_id: i32,
    pub item: Slot,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Protocol velocity units: 1/8000 block per tick.
    pub vel_x: i16,
    pub vel_y: i16,
    pub vel_z: i16,
    pub spawn_tick: i64,
}

impl ItemEntity {
    pub fn eligible_for_pickup(&self, now: i64) -> bool {
        now - self.spawn_tick >= PICKUP_DELAY_TICKS
    }

    pub fn expired(&self, now: i64) -> bool {
        now - self.spawn_tick > LIFETIME_TICKS
    }
}

/// Throw velocity for a drop, derived from the dropper's yaw.
pub fn throw_velocity(yaw: f32) -> (i16, i16, i16) {
    let yaw_rad = (yaw as f64).to_radians();
    let speed = 4000.0; // ~0.5 blocks/tick
    (
        (-yaw_rad.sin() * speed) as i16,
        2000, // slight upward toss
        (yaw_rad.cos() * speed) as i16,
    )
}

/// Estimate where a thrown item comes to rest: 20-TPS projectile steps
/// (gravity 0.04, drag 0.98) for at most 80 ticks, stopping when falling
/// onto the ground level reported by `ground_at`.
pub fn simulate_landing(
    x: f64,
    y: f64,
    z: f64,
    velocity: (i16, i16, i16),
    ground_at: impl Fn(i32, i32) -> f64,
) -> (f64, f64, f64) {
    let (mut px, mut py, mut pz) = (x, y, z);
    let mut vx = velocity.0 as f64 / 8000.0;
    let mut vy = velocity.1 as f64 / 8000.0;
    let mut vz = velocity.2 as f64 / 8000.0;

    for _ in 0..80 {
        vy -= 0.04;
        px += vx;
        py += vy;
        pz += vz;
        vx *= 0.98;
        vy *= 0.98;
        vz *= 0.98;

        let ground = ground_at(px.floor() as i32, pz.floor() as i32);
        if vy < 0.0 && py <= ground {
            py = ground;
            break;
        }
    }
    (px, py, pz)
}

/// SpawnEntity payload for an item entity (object type 2) at the visual
/// throw position, with velocity.
pub fn build_spawn_entity(
    entity_id: i32,
    x: f64,
    y: f64,
    z: f64,
    velocity: (i16, i16, i16),
) -> Vec<u8> {
    let mut buf = BytesMut::new();
    VarInt(entity_id).proto_encode(&mut buf);
    buf.put_i8(2); // object type: item stack
    buf.put_i32(fixed_point(x));
    buf.put_i32(fixed_point(y));
    buf.put_i32(fixed_point(z));
    buf.put_i8(0); // pitch
    buf.put_i8(0); // yaw
    buf.put_i32(1); // data: non-zero, so velocity follows
    buf.put_i16(velocity.0);
    buf.put_i16(velocity.1);
    buf.put_i16(velocity.2);
    buf.to_vec()
}

/// SpawnEntity payload for an item already at rest (sent to late joiners).
pub fn build_spawn_entity_at_rest(ie: &ItemEntity) -> Vec<u8> {
    build_spawn_entity(ie.entity_id, ie.x, ie.y, ie.z, (0, 0, 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pickup_delay_and_lifetime() {
        let ie = ItemEntity {
            entity_id: 1,
            item: Slot::new(1, 1, 0),
            x: 0.0,
            y: 5.0,
            z: 0.0,
            vel_x: 0,
            vel_y: 0,
            vel_z: 0,
            spawn_tick: 100,
        };
        assert!(!ie.eligible_for_pickup(105));
        assert!(ie.eligible_for_pickup(110));
        assert!(!ie.expired(100 + LIFETIME_TICKS));
        assert!(ie.expired(100 + LIFETIME_TICKS + 1));
    }

    #[test]
    fn throw_velocity_follows_yaw() {
        // Facing yaw 0 throws toward +Z.
        let (vx, _, vz) = throw_velocity(0.0);
        assert_eq!(vx, 0);
        assert!(vz > 3000);

        // Facing yaw 90 throws toward -X.
        let (vx, _, vz) = throw_velocity(90.0);
        assert!(vx < -3000);
        assert!(vz.abs() < 100);
    }

    #[test]
    fn landing_settles_on_ground() {
        let (x, y, z) = simulate_landing(0.5, 5.3, 0.5, throw_velocity(0.0), |_, _| 5.0);
        assert_eq!(y, 5.0);
        // Thrown toward +Z.
        assert!(z > 0.5);
        assert!((x - 0.5).abs() < 0.5);
    }

    #[test]
    fn landing_caps_at_eighty_ticks() {
        // Bottomless pit: simulation must still terminate.
        let (_, y, _) = simulate_landing(0.5, 5.3, 0.5, (0, 0, 0), |_, _| f64::MIN);
        assert!(y < 5.3);
    }

    #[test]
    fn spawn_payload_layout() {
        let data = build_spawn_entity(7, 0.5, 5.0, 0.5, (100, 2000, -100));
        // varint eid + type + 3×i32 + 2×i8 + i32 data + 3×i16 velocity.
        assert_eq!(data.len(), 1 + 1 + 12 + 2 + 4 + 6);
        assert_eq!(data[1] as i8, 2);
    }
}
