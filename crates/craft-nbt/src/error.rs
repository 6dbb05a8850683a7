//! NBT errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NbtError {
    #[error("buffer too short while reading NBT")]
    UnexpectedEof,

    #[error("expected TAG_Compound at root, got tag {got}")]
    ExpectedCompound { got: u8 },

    #[error("unknown tag type {0}")]
    UnknownTag(u8),

    #[error("invalid UTF-8 in NBT string")]
    InvalidUtf8,

    #[error("negative length {0}")]
    NegativeLength(i32),

    #[error("NBT nesting too deep")]
    TooDeep,
}
