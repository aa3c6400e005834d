use thiserror::Error;

use crate::parser::module::{BlockType, ValueType};
use crate::parser::reader::ReadError;
use crate::parser::DecodeError;

use super::context::MaybeValue;

fn join<T: std::fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Operand-stack and label typing failures. Each carries the mnemonic of the
/// instruction that detected it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("{opcode}: stack too small, {expected} operand(s) required but {actual} available")]
    StackTooSmall {
        opcode: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{opcode}: type mismatch, expected {expected} but found {actual}")]
    StackTypeInvalid {
        opcode: &'static str,
        expected: ValueType,
        actual: ValueType,
    },

    #[error("{opcode}: parameter mismatch, expected [{}] but found [{}]", join(.expected), join(.actual))]
    StackParameterMismatch {
        opcode: &'static str,
        expected: Vec<ValueType>,
        actual: Vec<MaybeValue>,
    },

    #[error("{opcode}: stack size incorrect, expected {expected} but found {actual}")]
    StackSizeIncorrect {
        opcode: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{opcode}: label type mismatch, expected {expected} but found {actual}")]
    LabelTypeMismatch {
        opcode: &'static str,
        expected: BlockType,
        actual: BlockType,
    },

    #[error("{opcode}: label {depth} does not refer to a catch block")]
    InvalidRethrowTarget { opcode: &'static str, depth: u32 },
}

/// Every import whose callable shape the host cannot provide.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("no callable shape for {} import(s): {}", .missing.len(), describe(.missing))]
pub struct MissingShapeError {
    pub missing: Vec<MissingShape>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingShape {
    pub module: String,
    pub field: String,
    pub parameters: usize,
    pub returns: usize,
}

fn describe(missing: &[MissingShape]) -> String {
    missing
        .iter()
        .map(|m| {
            format!(
                "{}::{} ({} parameters, {} returns)",
                m.module, m.field, m.parameters, m.returns
            )
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("module load error at offset {offset}: {message}")]
    ModuleLoad { message: String, offset: usize },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("compiler error: {0}")]
    Compiler(String),

    #[error(transparent)]
    MissingShape(#[from] MissingShapeError),
}

impl CompileError {
    pub fn load(message: impl Into<String>, offset: usize) -> Self {
        CompileError::ModuleLoad {
            message: message.into(),
            offset,
        }
    }

    pub fn compiler(message: impl Into<String>) -> Self {
        CompileError::Compiler(message.into())
    }

    /// Byte offset of a module load failure.
    pub fn offset(&self) -> Option<usize> {
        match self {
            CompileError::ModuleLoad { offset, .. } => Some(*offset),
            _ => None,
        }
    }
}

impl From<DecodeError> for CompileError {
    fn from(e: DecodeError) -> Self {
        CompileError::ModuleLoad {
            message: e.message(),
            offset: e.offset(),
        }
    }
}

impl From<ReadError> for CompileError {
    fn from(e: ReadError) -> Self {
        CompileError::from(DecodeError::from(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let e = ValidationError::StackTypeInvalid {
            opcode: "i32.add",
            expected: ValueType::I32,
            actual: ValueType::F64,
        };
        assert_eq!(
            e.to_string(),
            "i32.add: type mismatch, expected i32 but found f64"
        );

        let e = ValidationError::StackParameterMismatch {
            opcode: "call",
            expected: vec![ValueType::I32, ValueType::I64],
            actual: vec![MaybeValue::Val(ValueType::I32), MaybeValue::Unknown],
        };
        assert_eq!(
            e.to_string(),
            "call: parameter mismatch, expected [i32 i64] but found [i32 unknown]"
        );
    }

    #[test]
    fn test_read_error_becomes_module_load() {
        let e: CompileError = ReadError::UnexpectedEndOfInput { offset: 12 }.into();
        assert_eq!(e.offset(), Some(12));
        assert!(e.to_string().contains("unexpected end of input"));
    }

    #[test]
    fn test_missing_shape_lists_everything() {
        let e = MissingShapeError {
            missing: vec![
                MissingShape {
                    module: "env".into(),
                    field: "wide".into(),
                    parameters: 20,
                    returns: 1,
                },
                MissingShape {
                    module: "env".into(),
                    field: "wider".into(),
                    parameters: 30,
                    returns: 0,
                },
            ],
        };
        let text = e.to_string();
        assert!(text.starts_with("no callable shape for 2 import(s)"));
        assert!(text.contains("env::wide (20 parameters, 1 returns)"));
        assert!(text.contains("env::wider"));
    }
}
