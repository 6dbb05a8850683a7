//! NBT (Named Binary Tag) implementation, big-endian as used by the Java
//! edition's disk formats (Anvil region files, level data).

pub mod error;
mod io;
pub mod tag;

pub use error::NbtError;
pub use tag::{NbtCompound, NbtRoot, NbtTag};

use bytes::{Buf, BufMut};

/// Read a named root compound from a buffer.
pub fn read_nbt(buf: &mut impl Buf) -> Result<NbtRoot, NbtError> {
    io::read_nbt(buf)
}

/// Write a named root compound to a buffer.
pub fn write_nbt(buf: &mut impl BufMut, root: &NbtRoot) {
    io::write_nbt(buf, root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn roundtrip(root: &NbtRoot) {
        let mut buf = BytesMut::new();
        write_nbt(&mut buf, root);
        let decoded = read_nbt(&mut buf.freeze()).unwrap();
        assert_eq!(decoded, *root);
    }

    #[test]
    fn empty_compound() {
        roundtrip(&NbtRoot::new("", NbtCompound::new()));
    }

    #[test]
    fn root_name() {
        roundtrip(&NbtRoot::new("Level", NbtCompound::new()));
    }

    #[test]
    fn scalar_tags() {
        let mut c = NbtCompound::new();
        c.insert("byte".into(), NbtTag::Byte(-7));
        c.insert("short".into(), NbtTag::Short(-1234));
        c.insert("int".into(), NbtTag::Int(100_000));
        c.insert("long".into(), NbtTag::Long(i64::MIN));
        c.insert("float".into(), NbtTag::Float(3.125));
        c.insert("double".into(), NbtTag::Double(std::f64::consts::PI));
        c.insert("string".into(), NbtTag::String("hello world".into()));
        roundtrip(&NbtRoot::new("", c));
    }

    #[test]
    fn arrays() {
        let mut c = NbtCompound::new();
        c.insert("bytes".into(), NbtTag::ByteArray(vec![0xFFu8, 0, 0x7F]));
        c.insert("ints".into(), NbtTag::IntArray(vec![100, -200, 300]));
        roundtrip(&NbtRoot::new("", c));
    }

    #[test]
    fn list_of_compounds() {
        let mut section = NbtCompound::new();
        section.insert("Y".into(), NbtTag::Byte(0));
        section.insert("Blocks".into(), NbtTag::ByteArray(vec![7; 16]));

        let mut c = NbtCompound::new();
        c.insert(
            "Sections".into(),
            NbtTag::List(vec![NbtTag::Compound(section)]),
        );
        roundtrip(&NbtRoot::new("", c));
    }

    #[test]
    fn empty_list() {
        let mut c = NbtCompound::new();
        c.insert("list".into(), NbtTag::List(vec![]));
        roundtrip(&NbtRoot::new("", c));
    }

    #[test]
    fn nested_compound() {
        let mut inner = NbtCompound::new();
        inner.insert("xPos".into(), NbtTag::Int(3));
        inner.insert("zPos".into(), NbtTag::Int(-5));

        let mut c = NbtCompound::new();
        c.insert("Level".into(), NbtTag::Compound(inner));
        roundtrip(&NbtRoot::new("", c));
    }

    #[test]
    fn known_wire_layout() {
        // TAG_Compound("") { TAG_Int("xPos") = 3 } TAG_End
        let mut c = NbtCompound::new();
        c.insert("xPos".into(), NbtTag::Int(3));
        let mut buf = BytesMut::new();
        write_nbt(&mut buf, &NbtRoot::new("", c));
        assert_eq!(
            &buf[..],
            &[
                0x0A, 0x00, 0x00, // compound, empty name
                0x03, 0x00, 0x04, b'x', b'P', b'o', b's', // int "xPos"
                0x00, 0x00, 0x00, 0x03, // value 3
                0x00, // end
            ]
        );
    }

    #[test]
    fn empty_buffer_error() {
        let data = bytes::Bytes::new();
        assert!(read_nbt(&mut data.clone()).is_err());
    }

    #[test]
    fn wrong_root_type_error() {
        let data = bytes::Bytes::from_static(&[0x01]);
        assert!(matches!(
            read_nbt(&mut data.clone()),
            Err(NbtError::ExpectedCompound { got: 1 })
        ));
    }
}
