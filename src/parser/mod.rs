//! Binary format decoding.
//!
//! [`reader::Reader`] is the byte-level decoder; [`module`] holds the section
//! entry types and [`instruction`] the closed instruction set. Every entry
//! type can be re-encoded so that `encode(decode(bytes)) == bytes` holds for
//! canonically encoded input.

pub mod encoding;
pub mod instruction;
pub mod limits;
pub mod module;
pub mod reader;

use reader::ReadError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error(transparent)]
    Read(#[from] ReadError),

    #[error("illegal opcode {opcode:#04x} at offset {offset}")]
    UnknownOpcode { opcode: u8, offset: usize },

    #[error("illegal opcode {prefix:#04x} {sub} at offset {offset}")]
    UnknownPrefixedOpcode { prefix: u8, sub: u32, offset: usize },

    #[error("{message} at offset {offset}")]
    Malformed { message: String, offset: usize },
}

impl DecodeError {
    pub fn malformed(message: impl Into<String>, offset: usize) -> Self {
        DecodeError::Malformed {
            message: message.into(),
            offset,
        }
    }

    pub fn offset(&self) -> usize {
        match self {
            DecodeError::Read(e) => e.offset(),
            DecodeError::UnknownOpcode { offset, .. }
            | DecodeError::UnknownPrefixedOpcode { offset, .. }
            | DecodeError::Malformed { offset, .. } => *offset,
        }
    }

    /// The message without the trailing offset, for errors that report the
    /// offset separately.
    pub fn message(&self) -> String {
        match self {
            DecodeError::Read(e) => match e {
                ReadError::UnexpectedEndOfInput { .. } => "unexpected end of input".to_string(),
                ReadError::Overflow { .. } => "integer representation too long".to_string(),
                ReadError::InvalidUtf8 { .. } => "malformed UTF-8 encoding".to_string(),
            },
            DecodeError::UnknownOpcode { opcode, .. } => format!("illegal opcode {opcode:#04x}"),
            DecodeError::UnknownPrefixedOpcode { prefix, sub, .. } => {
                format!("illegal opcode {prefix:#04x} {sub}")
            }
            DecodeError::Malformed { message, .. } => message.clone(),
        }
    }
}
