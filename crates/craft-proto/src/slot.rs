//! Inventory slot wire format.

use bytes::{Buf, BufMut};

use crate::codec::{ensure, ProtoDecode, ProtoEncode};
use crate::error::ProtoError;

/// A single inventory slot. `block_id == -1` means empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub block_id: i16,
    pub count: i8,
    pub damage: i16,
}

/// The empty slot value.
pub const EMPTY_SLOT: Slot = Slot {
    block_id: -1,
    count: 0,
    damage: 0,
};

impl Default for Slot {
    fn default() -> Self {
        EMPTY_SLOT
    }
}

impl Slot {
    pub fn new(block_id: i16, count: i8, damage: i16) -> Self {
        Self {
            block_id,
            count,
            damage,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.block_id == -1
    }

    /// True if two slots can be merged into one stack.
    pub fn stacks_with(&self, other: &Slot) -> bool {
        self.block_id == other.block_id && self.damage == other.damage
    }

    /// Same item with a different count.
    pub fn with_count(&self, count: i8) -> Slot {
        Slot {
            block_id: self.block_id,
            count,
            damage: self.damage,
        }
    }
}

impl ProtoEncode for Slot {
    fn proto_encode(&self, buf: &mut impl BufMut) {
        buf.put_i16(self.block_id);
        if self.block_id == -1 {
            return;
        }
        buf.put_i8(self.count);
        buf.put_i16(self.damage);
        // No NBT payload.
        buf.put_u8(0x00);
    }
}

impl ProtoDecode for Slot {
    fn proto_decode(buf: &mut impl Buf) -> Result<Self, ProtoError> {
        ensure(buf, 2)?;
        let block_id = buf.get_i16();
        if block_id == -1 {
            return Ok(EMPTY_SLOT);
        }
        ensure(buf, 4)?;
        let count = buf.get_i8();
        let damage = buf.get_i16();
        let nbt_tag = buf.get_u8();
        if nbt_tag != 0x00 {
            // Clients may attach NBT (enchantments etc.); we don't model it,
            // so consume the remaining payload.
            buf.advance(buf.remaining());
        }
        Ok(Slot {
            block_id,
            count,
            damage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn empty_slot_is_two_bytes() {
        let mut buf = BytesMut::new();
        EMPTY_SLOT.proto_encode(&mut buf);
        assert_eq!(&buf[..], &[0xFF, 0xFF]);
        let decoded = Slot::proto_decode(&mut buf.freeze()).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn full_slot_roundtrip() {
        let slot = Slot::new(1, 64, 0);
        let mut buf = BytesMut::new();
        slot.proto_encode(&mut buf);
        assert_eq!(buf.len(), 6);
        let decoded = Slot::proto_decode(&mut buf.freeze()).unwrap();
        assert_eq!(decoded, slot);
    }

    #[test]
    fn nbt_payload_skipped() {
        let mut buf = BytesMut::new();
        buf.put_i16(276);
        buf.put_i8(1);
        buf.put_i16(0);
        buf.put_u8(0x0A); // TAG_Compound follows
        buf.put_slice(&[0x00, 0x00, 0x00]);
        let mut b = buf.freeze();
        let decoded = Slot::proto_decode(&mut b).unwrap();
        assert_eq!(decoded.block_id, 276);
        assert_eq!(b.remaining(), 0);
    }

    #[test]
    fn stacking_rules() {
        let stone = Slot::new(1, 10, 0);
        assert!(stone.stacks_with(&Slot::new(1, 30, 0)));
        assert!(!stone.stacks_with(&Slot::new(2, 30, 0)));
        assert!(!stone.stacks_with(&Slot::new(1, 30, 1)));
    }
}
