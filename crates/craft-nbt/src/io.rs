//! Big-endian NBT serialization.

use bytes::{Buf, BufMut};

use crate::error::NbtError;
use crate::tag::{id, NbtCompound, NbtRoot, NbtTag};

const MAX_DEPTH: usize = 64;

pub fn write_nbt(buf: &mut impl BufMut, root: &NbtRoot) {
    buf.put_u8(id::COMPOUND);
    write_string(buf, &root.name);
    write_compound_body(buf, &root.compound);
}

pub fn read_nbt(buf: &mut impl Buf) -> Result<NbtRoot, NbtError> {
    let tag_type = read_u8(buf)?;
    if tag_type != id::COMPOUND {
        return Err(NbtError::ExpectedCompound { got: tag_type });
    }
    let name = read_string(buf)?;
    let compound = read_compound_body(buf, 0)?;
    Ok(NbtRoot { name, compound })
}

// -- writing --

fn write_compound_body(buf: &mut impl BufMut, compound: &NbtCompound) {
    // Sort for a stable byte layout; HashMap order is arbitrary.
    let mut names: Vec<&String> = compound.keys().collect();
    names.sort();
    for name in names {
        let tag = &compound[name];
        buf.put_u8(tag.type_id());
        write_string(buf, name);
        write_payload(buf, tag);
    }
    buf.put_u8(id::END);
}

fn write_payload(buf: &mut impl BufMut, tag: &NbtTag) {
    match tag {
        NbtTag::Byte(v) => buf.put_i8(*v),
        NbtTag::Short(v) => buf.put_i16(*v),
        NbtTag::Int(v) => buf.put_i32(*v),
        NbtTag::Long(v) => buf.put_i64(*v),
        NbtTag::Float(v) => buf.put_f32(*v),
        NbtTag::Double(v) => buf.put_f64(*v),
        NbtTag::ByteArray(v) => {
            buf.put_i32(v.len() as i32);
            buf.put_slice(v);
        }
        NbtTag::String(v) => write_string(buf, v),
        NbtTag::List(items) => {
            let elem_type = items.first().map_or(id::END, NbtTag::type_id);
            buf.put_u8(elem_type);
            buf.put_i32(items.len() as i32);
            for item in items {
                write_payload(buf, item);
            }
        }
        NbtTag::Compound(c) => write_compound_body(buf, c),
        NbtTag::IntArray(v) => {
            buf.put_i32(v.len() as i32);
            for val in v {
                buf.put_i32(*val);
            }
        }
    }
}

fn write_string(buf: &mut impl BufMut, s: &str) {
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
}

// -- reading --

fn read_compound_body(buf: &mut impl Buf, depth: usize) -> Result<NbtCompound, NbtError> {
    if depth > MAX_DEPTH {
        return Err(NbtError::TooDeep);
    }
    let mut compound = NbtCompound::new();
    loop {
        let tag_type = read_u8(buf)?;
        if tag_type == id::END {
            return Ok(compound);
        }
        let name = read_string(buf)?;
        let tag = read_payload(buf, tag_type, depth)?;
        compound.insert(name, tag);
    }
}

fn read_payload(buf: &mut impl Buf, tag_type: u8, depth: usize) -> Result<NbtTag, NbtError> {
    Ok(match tag_type {
        id::BYTE => NbtTag::Byte(read_i8(buf)?),
        id::SHORT => {
            need(buf, 2)?;
            NbtTag::Short(buf.get_i16())
        }
        id::INT => {
            need(buf, 4)?;
            NbtTag::Int(buf.get_i32())
        }
        id::LONG => {
            need(buf, 8)?;
            NbtTag::Long(buf.get_i64())
        }
        id::FLOAT => {
            need(buf, 4)?;
            NbtTag::Float(buf.get_f32())
        }
        id::DOUBLE => {
            need(buf, 8)?;
            NbtTag::Double(buf.get_f64())
        }
        id::BYTE_ARRAY => {
            let len = read_len(buf)?;
            need(buf, len)?;
            let mut data = vec![0u8; len];
            buf.copy_to_slice(&mut data);
            NbtTag::ByteArray(data)
        }
        id::STRING => NbtTag::String(read_string(buf)?),
        id::LIST => {
            let elem_type = read_u8(buf)?;
            let len = read_len(buf)?;
            let mut items = Vec::with_capacity(len.min(4096));
            for _ in 0..len {
                items.push(read_payload(buf, elem_type, depth + 1)?);
            }
            NbtTag::List(items)
        }
        id::COMPOUND => NbtTag::Compound(read_compound_body(buf, depth + 1)?),
        id::INT_ARRAY => {
            let len = read_len(buf)?;
            need(buf, len * 4)?;
            let mut data = Vec::with_capacity(len.min(4096));
            for _ in 0..len {
                data.push(buf.get_i32());
            }
            NbtTag::IntArray(data)
        }
        other => return Err(NbtError::UnknownTag(other)),
    })
}

fn read_string(buf: &mut impl Buf) -> Result<String, NbtError> {
    need(buf, 2)?;
    let len = buf.get_u16() as usize;
    need(buf, len)?;
    let mut data = vec![0u8; len];
    buf.copy_to_slice(&mut data);
    String::from_utf8(data).map_err(|_| NbtError::InvalidUtf8)
}

fn read_len(buf: &mut impl Buf) -> Result<usize, NbtError> {
    need(buf, 4)?;
    let len = buf.get_i32();
    if len < 0 {
        return Err(NbtError::NegativeLength(len));
    }
    Ok(len as usize)
}

fn read_u8(buf: &mut impl Buf) -> Result<u8, NbtError> {
    need(buf, 1)?;
    Ok(buf.get_u8())
}

fn read_i8(buf: &mut impl Buf) -> Result<i8, NbtError> {
    need(buf, 1)?;
    Ok(buf.get_i8())
}

#[inline]
fn need(buf: &impl Buf, n: usize) -> Result<(), NbtError> {
    if buf.remaining() < n {
        return Err(NbtError::UnexpectedEof);
    }
    Ok(())
}
