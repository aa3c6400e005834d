//! Runtime values

use crate::parser::module::ValueType;
use fhex::ToHex;
use std::fmt;

/// A value on the host machine's operand stack, in a local or in a global.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl Value {
    pub fn typ(&self) -> ValueType {
        match self {
            Value::I32(_) => ValueType::I32,
            Value::I64(_) => ValueType::I64,
            Value::F32(_) => ValueType::F32,
            Value::F64(_) => ValueType::F64,
        }
    }

    /// The zero of a type, used for fresh locals.
    pub fn default_for(value_type: ValueType) -> Value {
        match value_type {
            ValueType::I32 => Value::I32(0),
            ValueType::I64 => Value::I64(0),
            ValueType::F32 => Value::F32(0.0),
            ValueType::F64 => Value::F64(0.0),
        }
    }

    /// Raw bits, zero-extended. Distinguishes NaN payloads and signed zeros.
    pub fn bits(&self) -> u64 {
        match self {
            Value::I32(v) => *v as u32 as u64,
            Value::I64(v) => *v as u64,
            Value::F32(v) => v.to_bits() as u64,
            Value::F64(v) => v.to_bits(),
        }
    }

    /// Parse a value from its type name and text.
    ///
    /// Integers are decimal, signed or unsigned. Floats are either `0x`-prefixed
    /// bit patterns or decimal literals, with `nan` and `inf` accepted.
    pub fn parse(typ: &str, text: &str) -> Result<Value, String> {
        match typ {
            "i32" => text
                .parse::<i32>()
                .or_else(|_| text.parse::<u32>().map(|v| v as i32))
                .map(Value::I32)
                .map_err(|e| format!("failed to parse i32 {text}: {e}")),
            "i64" => text
                .parse::<i64>()
                .or_else(|_| text.parse::<u64>().map(|v| v as i64))
                .map(Value::I64)
                .map_err(|e| format!("failed to parse i64 {text}: {e}")),
            "f32" => match text.strip_prefix("0x") {
                Some(hex) => u32::from_str_radix(hex, 16)
                    .map(|bits| Value::F32(f32::from_bits(bits)))
                    .map_err(|e| format!("failed to parse f32 bits {text}: {e}")),
                None => text
                    .parse::<f32>()
                    .map(Value::F32)
                    .map_err(|e| format!("failed to parse f32 {text}: {e}")),
            },
            "f64" => match text.strip_prefix("0x") {
                Some(hex) => u64::from_str_radix(hex, 16)
                    .map(|bits| Value::F64(f64::from_bits(bits)))
                    .map_err(|e| format!("failed to parse f64 bits {text}: {e}")),
                None => text
                    .parse::<f64>()
                    .map(Value::F64)
                    .map_err(|e| format!("failed to parse f64 {text}: {e}")),
            },
            t => Err(format!("unknown value type {t}")),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::I32(v) => write!(f, "i32:{v}"),
            Value::I64(v) => write!(f, "i64:{v}"),
            Value::F32(v) => write!(f, "f32:{}", v.to_hex()),
            Value::F64(v) => write!(f, "f64:{}", v.to_hex()),
        }
    }
}
