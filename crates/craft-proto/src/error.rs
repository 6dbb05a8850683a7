//! Protocol-level errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("buffer too short: need {needed} more bytes, have {remaining}")]
    BufferTooShort { needed: usize, remaining: usize },

    #[error("VarInt is too long (more than {max_bytes} bytes)")]
    VarIntTooLong { max_bytes: usize },

    #[error("string length out of range: {0}")]
    StringTooLong(i32),

    #[error("invalid UTF-8 string")]
    InvalidUtf8,

    #[error("negative byte array length: {0}")]
    NegativeLength(i32),

    #[error("packet length too small: {0}")]
    FrameTooSmall(i32),

    #[error("packet too large: {0} bytes")]
    FrameTooLarge(i32),

    #[error("unexpected packet id 0x{0:02X}")]
    UnexpectedPacket(i32),

    #[error("invalid data: {0}")]
    InvalidData(String),
}
