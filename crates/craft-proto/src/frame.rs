//! Length-prefixed packet framing.
//!
//! A frame is `VarInt(total length) + VarInt(packet id) + payload`, where
//! the length counts everything after itself.

use bytes::{Buf, Bytes, BytesMut};

use crate::codec::ProtoEncode;
use crate::error::ProtoError;
use crate::types::VarInt;

/// Maximum accepted frame length (2 MiB).
pub const MAX_FRAME_LEN: i32 = 1 << 21;

/// Encode a complete frame for the given packet id and payload.
pub fn encode_frame(packet_id: i32, payload: &[u8]) -> BytesMut {
    let total = VarInt::size(packet_id) + payload.len();
    let mut buf = BytesMut::with_capacity(VarInt::size(total as i32) + total);
    VarInt(total as i32).proto_encode(&mut buf);
    VarInt(packet_id).proto_encode(&mut buf);
    buf.extend_from_slice(payload);
    buf
}

/// Try to decode one frame from the front of `buf`.
///
/// Returns `Ok(None)` when more data is needed; on success the frame is
/// consumed from `buf` and `(packet_id, payload)` is returned. Length
/// violations fail before the payload has arrived.
pub fn decode_frame(buf: &mut BytesMut) -> Result<Option<(i32, Bytes)>, ProtoError> {
    let (length, header) = match VarInt::peek(buf)? {
        Some(v) => v,
        None => return Ok(None),
    };
    if length < 1 {
        return Err(ProtoError::FrameTooSmall(length));
    }
    if length > MAX_FRAME_LEN {
        return Err(ProtoError::FrameTooLarge(length));
    }
    if buf.len() < header + length as usize {
        return Ok(None);
    }

    buf.advance(header);
    let mut frame = buf.split_to(length as usize).freeze();
    let (packet_id, id_len) = match VarInt::peek(&frame)? {
        Some(v) => v,
        None => {
            return Err(ProtoError::BufferTooShort {
                needed: 1,
                remaining: 0,
            })
        }
    };
    frame.advance(id_len);
    Ok(Some((packet_id, frame)))
}
