//! Protocol encoding/decoding traits and primitive implementations.
//!
//! All multi-byte primitives are big-endian on the wire. Strings are a
//! VarInt byte length followed by UTF-8 data.

use bytes::{Buf, BufMut, Bytes};

use crate::error::ProtoError;
use crate::types::VarInt;

/// Longest string the protocol accepts: 32767 UTF-16 code units, up to
/// four bytes each.
pub const MAX_STRING_BYTES: i32 = 32767 * 4;

/// Encode a value onto a buffer.
pub trait ProtoEncode {
    fn proto_encode(&self, buf: &mut impl BufMut);
}

/// Decode a value from a buffer.
pub trait ProtoDecode: Sized {
    fn proto_decode(buf: &mut impl Buf) -> Result<Self, ProtoError>;
}

#[inline]
pub(crate) fn ensure(buf: &impl Buf, needed: usize) -> Result<(), ProtoError> {
    if buf.remaining() < needed {
        return Err(ProtoError::BufferTooShort {
            needed,
            remaining: buf.remaining(),
        });
    }
    Ok(())
}

macro_rules! impl_primitive {
    ($ty:ty, $size:expr, $put:ident, $get:ident) => {
        impl ProtoEncode for $ty {
            fn proto_encode(&self, buf: &mut impl BufMut) {
                buf.$put(*self);
            }
        }

        impl ProtoDecode for $ty {
            fn proto_decode(buf: &mut impl Buf) -> Result<Self, ProtoError> {
                ensure(buf, $size)?;
                Ok(buf.$get())
            }
        }
    };
}

impl_primitive!(i8, 1, put_i8, get_i8);
impl_primitive!(u8, 1, put_u8, get_u8);
impl_primitive!(i16, 2, put_i16, get_i16);
impl_primitive!(u16, 2, put_u16, get_u16);
impl_primitive!(i32, 4, put_i32, get_i32);
impl_primitive!(i64, 8, put_i64, get_i64);
impl_primitive!(f32, 4, put_f32, get_f32);
impl_primitive!(f64, 8, put_f64, get_f64);

impl ProtoEncode for bool {
    fn proto_encode(&self, buf: &mut impl BufMut) {
        buf.put_u8(*self as u8);
    }
}

impl ProtoDecode for bool {
    fn proto_decode(buf: &mut impl Buf) -> Result<Self, ProtoError> {
        ensure(buf, 1)?;
        Ok(buf.get_u8() != 0)
    }
}

impl ProtoEncode for String {
    fn proto_encode(&self, buf: &mut impl BufMut) {
        write_string(buf, self);
    }
}

impl ProtoDecode for String {
    fn proto_decode(buf: &mut impl Buf) -> Result<Self, ProtoError> {
        read_string(buf)
    }
}

/// Write a protocol string (VarInt length + UTF-8).
pub fn write_string(buf: &mut impl BufMut, s: &str) {
    VarInt(s.len() as i32).proto_encode(buf);
    buf.put_slice(s.as_bytes());
}

/// Read a protocol string (VarInt length + UTF-8).
pub fn read_string(buf: &mut impl Buf) -> Result<String, ProtoError> {
    let len = VarInt::proto_decode(buf)?.0;
    if !(0..=MAX_STRING_BYTES).contains(&len) {
        return Err(ProtoError::StringTooLong(len));
    }
    ensure(buf, len as usize)?;
    let data = buf.copy_to_bytes(len as usize);
    String::from_utf8(data.to_vec()).map_err(|_| ProtoError::InvalidUtf8)
}

/// Length-prefixed byte array (`bytearray` wire tag).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByteArray(pub Bytes);

impl ByteArray {
    pub fn new(data: impl Into<Bytes>) -> Self {
        ByteArray(data.into())
    }
}

impl ProtoEncode for ByteArray {
    fn proto_encode(&self, buf: &mut impl BufMut) {
        VarInt(self.0.len() as i32).proto_encode(buf);
        buf.put_slice(&self.0);
    }
}

impl ProtoDecode for ByteArray {
    fn proto_decode(buf: &mut impl Buf) -> Result<Self, ProtoError> {
        let len = VarInt::proto_decode(buf)?.0;
        if len < 0 {
            return Err(ProtoError::NegativeLength(len));
        }
        ensure(buf, len as usize)?;
        Ok(ByteArray(buf.copy_to_bytes(len as usize)))
    }
}

/// Trailing bytes with no length prefix (`rest` wire tag, terminal only).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestBytes(pub Bytes);

impl RestBytes {
    pub fn new(data: impl Into<Bytes>) -> Self {
        RestBytes(data.into())
    }
}

impl ProtoEncode for RestBytes {
    fn proto_encode(&self, buf: &mut impl BufMut) {
        buf.put_slice(&self.0);
    }
}

impl ProtoDecode for RestBytes {
    fn proto_decode(buf: &mut impl Buf) -> Result<Self, ProtoError> {
        Ok(RestBytes(buf.copy_to_bytes(buf.remaining())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn string_roundtrip() {
        let mut buf = BytesMut::new();
        write_string(&mut buf, "Hello, world!");
        let result = read_string(&mut buf.freeze()).unwrap();
        assert_eq!(result, "Hello, world!");
    }

    #[test]
    fn string_empty() {
        let mut buf = BytesMut::new();
        write_string(&mut buf, "");
        let result = read_string(&mut buf.freeze()).unwrap();
        assert_eq!(result, "");
    }

    #[test]
    fn string_unicode() {
        let mut buf = BytesMut::new();
        write_string(&mut buf, "„Grüße“ こんにちは");
        let result = read_string(&mut buf.freeze()).unwrap();
        assert_eq!(result, "„Grüße“ こんにちは");
    }

    #[test]
    fn string_truncated() {
        let mut buf = BytesMut::new();
        write_string(&mut buf, "Hello");
        let truncated = buf.freeze().slice(..3);
        assert!(read_string(&mut truncated.clone()).is_err());
    }

    #[test]
    fn string_oversize_length_rejected() {
        let mut buf = BytesMut::new();
        VarInt(MAX_STRING_BYTES + 1).proto_encode(&mut buf);
        assert!(matches!(
            read_string(&mut buf.freeze()),
            Err(ProtoError::StringTooLong(_))
        ));
    }

    #[test]
    fn primitives_are_big_endian() {
        let mut buf = BytesMut::new();
        0x1234i16.proto_encode(&mut buf);
        assert_eq!(&buf[..], &[0x12, 0x34]);

        let mut buf = BytesMut::new();
        1.0f32.proto_encode(&mut buf);
        assert_eq!(&buf[..], &[0x3F, 0x80, 0x00, 0x00]);
    }

    #[test]
    fn bool_wire_form() {
        let mut buf = BytesMut::new();
        true.proto_encode(&mut buf);
        false.proto_encode(&mut buf);
        assert_eq!(&buf[..], &[1, 0]);
        let mut b = buf.freeze();
        assert!(bool::proto_decode(&mut b).unwrap());
        assert!(!bool::proto_decode(&mut b).unwrap());
    }

    #[test]
    fn byte_array_roundtrip() {
        let arr = ByteArray::new(vec![1u8, 2, 3, 4, 5]);
        let mut buf = BytesMut::new();
        arr.proto_encode(&mut buf);
        let decoded = ByteArray::proto_decode(&mut buf.freeze()).unwrap();
        assert_eq!(decoded, arr);
    }

    #[test]
    fn rest_consumes_everything() {
        let mut buf = BytesMut::new();
        buf.put_slice(&[9u8, 8, 7]);
        let mut b = buf.freeze();
        let rest = RestBytes::proto_decode(&mut b).unwrap();
        assert_eq!(&rest.0[..], &[9, 8, 7]);
        assert_eq!(b.remaining(), 0);
    }
}
