//! Function table
//!
//! The targets of `call_indirect`. Each slot holds an optional [`FunctionRef`];
//! the signature of the first callable stored at an index is recorded and every
//! later write to that index must carry the same signature, so a slot can
//! never be silently redefined with a different shape.
//!
//! ## Security Considerations
//!
//! `call_indirect` compares the expected signature against the stored entry on
//! every call; an empty slot or a mismatch traps instead of calling through.

use super::{FunctionRef, InstantiationError, Trap};
use crate::parser::limits::MAX_TABLE_SIZE;
use crate::parser::module::{Limits, Signature};

pub struct FunctionTable {
    elements: Vec<Option<FunctionRef>>,
    /// First signature stored at each index.
    shapes: Vec<Option<Signature>>,
    limits: Limits,
}

impl FunctionTable {
    /// Create a table of `limits.minimum` empty slots.
    pub fn new(limits: Limits) -> Result<FunctionTable, InstantiationError> {
        if let Some(max) = limits.maximum {
            if limits.minimum > max {
                return Err(InstantiationError::Resource(format!(
                    "table minimum {} exceeds its maximum {max}",
                    limits.minimum
                )));
            }
        }
        if limits.minimum > MAX_TABLE_SIZE {
            return Err(InstantiationError::Resource(format!(
                "table minimum {} exceeds {MAX_TABLE_SIZE} entries",
                limits.minimum
            )));
        }
        let size = limits.minimum as usize;
        Ok(FunctionTable {
            elements: vec![None; size],
            shapes: vec![None; size],
            limits,
        })
    }

    pub fn size(&self) -> u32 {
        self.elements.len() as u32
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    /// # Errors
    ///
    /// Returns `TableIndexOutOfBounds` past the end.
    pub fn get(&self, index: u32) -> Result<Option<&FunctionRef>, Trap> {
        self.elements
            .get(index as usize)
            .map(|e| e.as_ref())
            .ok_or(Trap::TableIndexOutOfBounds(index))
    }

    /// Store or clear a slot.
    ///
    /// # Errors
    ///
    /// - Returns `TableIndexOutOfBounds` past the end.
    /// - Returns `IndirectCallTypeMismatch` if the slot was first assigned a
    ///   callable of a different signature.
    pub fn set(&mut self, index: u32, entry: Option<FunctionRef>) -> Result<(), Trap> {
        self.write(index, vec![entry])
    }

    /// Store `entries` in consecutive slots from `destination`. Every slot is
    /// checked before any is written, so a rejected write changes nothing.
    ///
    /// # Errors
    ///
    /// As for [`FunctionTable::set`], for any slot of the range.
    pub fn write(&mut self, destination: u32, entries: Vec<Option<FunctionRef>>) -> Result<(), Trap> {
        let start = destination as usize;
        let end = destination as u64 + entries.len() as u64;
        if end > self.elements.len() as u64 {
            return Err(Trap::TableIndexOutOfBounds(end.min(u32::MAX as u64) as u32));
        }
        for (i, entry) in entries.iter().enumerate() {
            if let (Some(new), Some(shape)) = (entry, &self.shapes[start + i]) {
                if !shape.same_shape(&new.signature) {
                    return Err(Trap::IndirectCallTypeMismatch {
                        expected: shape.to_string(),
                        actual: new.signature.to_string(),
                    });
                }
            }
        }
        for (i, entry) in entries.into_iter().enumerate() {
            if let Some(new) = &entry {
                self.shapes[start + i].get_or_insert_with(|| new.signature.clone());
            }
            self.elements[start + i] = entry;
        }
        Ok(())
    }

    /// Copy `n` slots from `source` to `destination`; the ranges may overlap.
    pub fn copy_within(&mut self, destination: u32, source: u32, n: u32) -> Result<(), Trap> {
        let end = source as u64 + n as u64;
        if end > self.elements.len() as u64 {
            return Err(Trap::TableIndexOutOfBounds(end.min(u32::MAX as u64) as u32));
        }
        let entries = self.elements[source as usize..end as usize].to_vec();
        self.write(destination, entries)
    }

    /// Grow by `delta` empty slots.
    ///
    /// Returns the previous size.
    ///
    /// # Errors
    ///
    /// Returns `TableSizeExceeded` if the result would exceed the maximum.
    pub fn grow(&mut self, delta: u32) -> Result<u32, Trap> {
        let previous = self.size();
        let size = previous
            .checked_add(delta)
            .filter(|s| *s <= self.limits.maximum.unwrap_or(MAX_TABLE_SIZE))
            .ok_or(Trap::TableSizeExceeded)?;
        self.elements.resize(size as usize, None);
        self.shapes.resize(size as usize, None);
        Ok(previous)
    }

    /// The entry `call_indirect` would call, checked against `expected`.
    pub fn resolve(&self, index: u32, expected: &Signature) -> Result<FunctionRef, Trap> {
        let entry = self.get(index)?.ok_or(Trap::UndefinedElement(index))?;
        if !entry.signature.same_shape(expected) {
            return Err(Trap::IndirectCallTypeMismatch {
                expected: expected.to_string(),
                actual: entry.signature.to_string(),
            });
        }
        Ok(entry.clone())
    }
}
