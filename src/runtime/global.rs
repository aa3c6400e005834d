use std::cell::Cell;

use super::{Trap, Value};
use crate::parser::module::{GlobalType, ValueType};

/// A typed global variable. Instances share slots with their importers by
/// handle, so writes are visible on both sides.
#[derive(Debug)]
pub struct GlobalSlot {
    value: Cell<Value>,
    mutable: bool,
}

impl GlobalSlot {
    pub fn immutable(value: Value) -> GlobalSlot {
        GlobalSlot {
            value: Cell::new(value),
            mutable: false,
        }
    }

    pub fn mutable(value: Value) -> GlobalSlot {
        GlobalSlot {
            value: Cell::new(value),
            mutable: true,
        }
    }

    pub fn get(&self) -> Value {
        self.value.get()
    }

    pub fn set(&self, value: Value) -> Result<(), Trap> {
        if !self.mutable {
            return Err(Trap::ImmutableGlobal);
        }
        if value.typ() != self.value_type() {
            return Err(Trap::GlobalTypeMismatch {
                expected: self.value_type(),
                actual: value.typ(),
            });
        }
        self.value.set(value);
        Ok(())
    }

    pub fn value_type(&self) -> ValueType {
        self.value.get().typ()
    }

    pub fn global_type(&self) -> GlobalType {
        GlobalType {
            content_type: self.value_type(),
            mutable: self.mutable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_immutable() {
        let g = GlobalSlot::immutable(Value::I32(4));
        assert_eq!(g.get(), Value::I32(4));
        assert_eq!(g.set(Value::I32(5)), Err(Trap::ImmutableGlobal));
        assert_eq!(g.get(), Value::I32(4));
    }

    #[test]
    fn test_mutable() {
        let g = GlobalSlot::mutable(Value::F64(0.5));
        g.set(Value::F64(2.0)).unwrap();
        assert_eq!(g.get(), Value::F64(2.0));
        assert_eq!(
            g.set(Value::I32(1)),
            Err(Trap::GlobalTypeMismatch {
                expected: ValueType::F64,
                actual: ValueType::I32
            })
        );
        assert_eq!(
            g.global_type(),
            GlobalType {
                content_type: ValueType::F64,
                mutable: true
            }
        );
    }
}
