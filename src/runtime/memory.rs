//! Linear memory
//!
//! A growable, zero-initialised byte buffer sized in 64KiB pages. Every access
//! is range checked with overflow-checked arithmetic before the backing buffer
//! is touched; a failed check is a [`Trap::MemoryAccessOutOfRange`].
//!
//! Addresses are `u64` so that `address + static offset + length` never wraps
//! for any 32-bit address and offset.

use byteorder::{ByteOrder, LittleEndian};
use log::debug;

use super::{InstantiationError, Trap, Value};
use crate::parser::limits::MAX_MEMORY_PAGES;
use crate::parser::module::ValueType;

/// Page size in bytes (64KiB)
pub const PAGE_SIZE: usize = 65536;

#[derive(Debug)]
pub struct LinearMemory {
    data: Vec<u8>,
    pages: u32,
    minimum: u32,
    maximum: Option<u32>,
    released: bool,
}

impl LinearMemory {
    /// Create a memory of `minimum` pages.
    ///
    /// # Errors
    /// The minimum exceeds the maximum, or either exceeds [`MAX_MEMORY_PAGES`].
    pub fn new(minimum: u32, maximum: Option<u32>) -> Result<LinearMemory, InstantiationError> {
        if minimum > MAX_MEMORY_PAGES {
            return Err(InstantiationError::Resource(format!(
                "memory minimum {minimum} exceeds {MAX_MEMORY_PAGES} pages"
            )));
        }
        if let Some(max) = maximum {
            if minimum > max {
                return Err(InstantiationError::Resource(format!(
                    "memory minimum {minimum} exceeds its maximum {max}"
                )));
            }
            if max > MAX_MEMORY_PAGES {
                return Err(InstantiationError::Resource(format!(
                    "memory maximum {max} exceeds {MAX_MEMORY_PAGES} pages"
                )));
            }
        }
        debug!("creating memory of {minimum} pages, maximum {maximum:?}");
        Ok(LinearMemory {
            data: vec![0u8; minimum as usize * PAGE_SIZE],
            pages: minimum,
            minimum,
            maximum,
            released: false,
        })
    }

    /// Current size in pages.
    pub fn size(&self) -> u32 {
        self.pages
    }

    /// Current size in bytes.
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    pub fn minimum(&self) -> u32 {
        self.minimum
    }

    pub fn maximum(&self) -> Option<u32> {
        self.maximum
    }

    /// Grow by `delta` pages, zero-filling the new region.
    ///
    /// Returns the previous page count, or -1 without changing anything when
    /// the result would exceed the maximum or the allocation fails.
    pub fn grow(&mut self, delta: u32) -> i32 {
        if self.released {
            return -1;
        }
        let previous = self.pages;
        let Some(pages) = previous.checked_add(delta) else {
            return -1;
        };
        if pages > self.maximum.unwrap_or(MAX_MEMORY_PAGES) {
            return -1;
        }
        let bytes = pages as usize * PAGE_SIZE;
        if self.data.try_reserve(bytes - self.data.len()).is_err() {
            return -1;
        }
        self.data.resize(bytes, 0);
        self.pages = pages;
        previous as i32
    }

    /// Free the backing buffer. Later accesses trap and later growth fails.
    pub fn release(&mut self) {
        if !self.released {
            self.data = Vec::new();
            self.released = true;
        }
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Start of a `length`-byte access, if it lies within the memory.
    #[inline]
    pub fn check_range(&self, address: u64, length: u64) -> Result<usize, Trap> {
        let out_of_range = || Trap::MemoryAccessOutOfRange {
            offset: address,
            length,
        };
        let end = address.checked_add(length).ok_or_else(out_of_range)?;
        if end > self.data.len() as u64 {
            return Err(out_of_range());
        }
        Ok(address as usize)
    }

    fn slice(&self, address: u64, length: usize) -> Result<&[u8], Trap> {
        let start = self.check_range(address, length as u64)?;
        Ok(&self.data[start..start + length])
    }

    fn slice_mut(&mut self, address: u64, length: usize) -> Result<&mut [u8], Trap> {
        let start = self.check_range(address, length as u64)?;
        Ok(&mut self.data[start..start + length])
    }

    pub fn read_u8(&self, address: u64) -> Result<u8, Trap> {
        Ok(self.slice(address, 1)?[0])
    }

    pub fn read_u16(&self, address: u64) -> Result<u16, Trap> {
        Ok(LittleEndian::read_u16(self.slice(address, 2)?))
    }

    pub fn read_u32(&self, address: u64) -> Result<u32, Trap> {
        Ok(LittleEndian::read_u32(self.slice(address, 4)?))
    }

    pub fn read_u64(&self, address: u64) -> Result<u64, Trap> {
        Ok(LittleEndian::read_u64(self.slice(address, 8)?))
    }

    pub fn read_f32(&self, address: u64) -> Result<f32, Trap> {
        Ok(LittleEndian::read_f32(self.slice(address, 4)?))
    }

    pub fn read_f64(&self, address: u64) -> Result<f64, Trap> {
        Ok(LittleEndian::read_f64(self.slice(address, 8)?))
    }

    pub fn write_u8(&mut self, address: u64, value: u8) -> Result<(), Trap> {
        self.slice_mut(address, 1)?[0] = value;
        Ok(())
    }

    pub fn write_u16(&mut self, address: u64, value: u16) -> Result<(), Trap> {
        LittleEndian::write_u16(self.slice_mut(address, 2)?, value);
        Ok(())
    }

    pub fn write_u32(&mut self, address: u64, value: u32) -> Result<(), Trap> {
        LittleEndian::write_u32(self.slice_mut(address, 4)?, value);
        Ok(())
    }

    pub fn write_u64(&mut self, address: u64, value: u64) -> Result<(), Trap> {
        LittleEndian::write_u64(self.slice_mut(address, 8)?, value);
        Ok(())
    }

    pub fn write_f32(&mut self, address: u64, value: f32) -> Result<(), Trap> {
        LittleEndian::write_f32(self.slice_mut(address, 4)?, value);
        Ok(())
    }

    pub fn write_f64(&mut self, address: u64, value: f64) -> Result<(), Trap> {
        LittleEndian::write_f64(self.slice_mut(address, 8)?, value);
        Ok(())
    }

    /// Copy `length` bytes out of memory.
    pub fn read_bytes(&self, address: u64, length: usize) -> Result<Vec<u8>, Trap> {
        Ok(self.slice(address, length)?.to_vec())
    }

    pub fn write_bytes(&mut self, address: u64, bytes: &[u8]) -> Result<(), Trap> {
        self.slice_mut(address, bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }

    /// Set `length` bytes to `value`.
    pub fn fill(&mut self, address: u64, value: u8, length: u64) -> Result<(), Trap> {
        let start = self.check_range(address, length)?;
        self.data[start..start + length as usize].fill(value);
        Ok(())
    }

    /// Copy between possibly overlapping ranges. Both are checked first.
    pub fn copy_within(&mut self, destination: u64, source: u64, length: u64) -> Result<(), Trap> {
        let src = self.check_range(source, length)?;
        let dst = self.check_range(destination, length)?;
        self.data.copy_within(src..src + length as usize, dst);
        Ok(())
    }

    /// Load `bytes` bytes and extend them to `value_type`.
    pub fn load(
        &self,
        address: u64,
        value_type: ValueType,
        bytes: u8,
        signed: bool,
    ) -> Result<Value, Trap> {
        let raw: u64 = match bytes {
            1 => self.read_u8(address)? as u64,
            2 => self.read_u16(address)? as u64,
            4 => self.read_u32(address)? as u64,
            _ => self.read_u64(address)?,
        };
        let bits = match (signed, bytes) {
            (true, 1) => raw as u8 as i8 as i64 as u64,
            (true, 2) => raw as u16 as i16 as i64 as u64,
            (true, 4) => raw as u32 as i32 as i64 as u64,
            _ => raw,
        };
        Ok(match value_type {
            ValueType::I32 => Value::I32(bits as u32 as i32),
            ValueType::I64 => Value::I64(bits as i64),
            ValueType::F32 => Value::F32(f32::from_bits(bits as u32)),
            ValueType::F64 => Value::F64(f64::from_bits(bits)),
        })
    }

    /// Store the low `bytes` bytes of `value`.
    pub fn store(&mut self, address: u64, bytes: u8, value: Value) -> Result<(), Trap> {
        let bits = value.bits();
        match bytes {
            1 => self.write_u8(address, bits as u8),
            2 => self.write_u16(address, bits as u16),
            4 => self.write_u32(address, bits as u32),
            _ => self.write_u64(address, bits),
        }
    }
}
