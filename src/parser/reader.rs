//! Forward-only decoder over a WebAssembly binary.
//!
//! Every read either succeeds or fails with a [`ReadError`] carrying the byte
//! offset at which the failing value started. Integers use LEB128 with the
//! logical widths the binary format defines (1, 7, 32 and 64 bits); a value
//! whose encoding is too long or whose unused bits are not a proper extension
//! is reported as [`ReadError::Overflow`].

use byteorder::{LittleEndian, ReadBytesExt};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
    #[error("unexpected end of input at offset {offset}")]
    UnexpectedEndOfInput { offset: usize },

    #[error("integer representation too long or out of range at offset {offset}")]
    Overflow { offset: usize },

    #[error("malformed UTF-8 encoding at offset {offset}")]
    InvalidUtf8 { offset: usize },
}

impl ReadError {
    pub fn offset(&self) -> usize {
        match self {
            ReadError::UnexpectedEndOfInput { offset }
            | ReadError::Overflow { offset }
            | ReadError::InvalidUtf8 { offset } => *offset,
        }
    }
}

pub struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Reader<'a> {
        Reader { bytes, pos: 0 }
    }
}

impl<'a> Reader<'a> {
    // Basic operations --------------------------------------------------------
    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub fn has_at_least(&self, count: usize) -> bool {
        self.remaining() >= count
    }

    pub fn is_at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    pub fn read_byte(&mut self) -> Result<u8, ReadError> {
        match self.bytes.get(self.pos) {
            Some(byte) => {
                self.pos += 1;
                Ok(*byte)
            }
            None => Err(ReadError::UnexpectedEndOfInput { offset: self.pos }),
        }
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], ReadError> {
        let bytes = self.bytes;
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= bytes.len())
            .ok_or(ReadError::UnexpectedEndOfInput { offset: self.pos })?;
        let slice = &bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    // Fixed width, little endian ----------------------------------------------

    pub fn read_u32(&mut self) -> Result<u32, ReadError> {
        let start = self.pos;
        let mut bytes = self.read_bytes(4)?;
        bytes
            .read_u32::<LittleEndian>()
            .map_err(|_| ReadError::UnexpectedEndOfInput { offset: start })
    }

    pub fn read_f32(&mut self) -> Result<f32, ReadError> {
        let start = self.pos;
        let mut bytes = self.read_bytes(4)?;
        bytes
            .read_f32::<LittleEndian>()
            .map_err(|_| ReadError::UnexpectedEndOfInput { offset: start })
    }

    pub fn read_f64(&mut self) -> Result<f64, ReadError> {
        let start = self.pos;
        let mut bytes = self.read_bytes(8)?;
        bytes
            .read_f64::<LittleEndian>()
            .map_err(|_| ReadError::UnexpectedEndOfInput { offset: start })
    }

    // Variable length ---------------------------------------------------------

    pub fn read_var_u1(&mut self) -> Result<bool, ReadError> {
        self.read_unsigned(1).map(|v| v == 1)
    }

    pub fn read_var_u7(&mut self) -> Result<u8, ReadError> {
        self.read_unsigned(7).map(|v| v as u8)
    }

    /// Section ids are the one place where running out of input is not an
    /// error: the module simply ends.
    pub fn try_read_var_u7(&mut self) -> Result<Option<u8>, ReadError> {
        if self.is_at_end() {
            return Ok(None);
        }
        self.read_var_u7().map(Some)
    }

    pub fn read_var_i7(&mut self) -> Result<i8, ReadError> {
        self.read_signed(7).map(|v| v as i8)
    }

    pub fn read_var_u32(&mut self) -> Result<u32, ReadError> {
        self.read_unsigned(32).map(|v| v as u32)
    }

    pub fn read_var_i32(&mut self) -> Result<i32, ReadError> {
        self.read_signed(32).map(|v| v as i32)
    }

    pub fn read_var_u64(&mut self) -> Result<u64, ReadError> {
        self.read_unsigned(64)
    }

    pub fn read_var_i64(&mut self) -> Result<i64, ReadError> {
        self.read_signed(64)
    }

    /// A varuint32 length followed by that many raw bytes.
    pub fn read_byte_vec(&mut self) -> Result<&'a [u8], ReadError> {
        let len = self.read_var_u32()? as usize;
        self.read_bytes(len)
    }

    /// A varuint32 length followed by UTF-8 bytes.
    pub fn read_string(&mut self) -> Result<String, ReadError> {
        let len = self.read_var_u32()? as usize;
        let start = self.pos;
        let bytes = self.read_bytes(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| ReadError::InvalidUtf8 { offset: start })
    }

    fn read_unsigned(&mut self, bits: u32) -> Result<u64, ReadError> {
        let start = self.pos;
        let mut result: u64 = 0;
        let mut shift: u32 = 0;

        loop {
            let byte = self.read_byte()?;
            let payload = (byte & 0x7f) as u64;
            let room = bits - shift;
            if room < 7 && (payload >> room) != 0 {
                return Err(ReadError::Overflow { offset: start });
            }
            result |= payload << shift;
            shift += 7;

            if byte & 0x80 == 0 {
                return Ok(result);
            }
            if shift >= bits {
                return Err(ReadError::Overflow { offset: start });
            }
        }
    }

    fn read_signed(&mut self, bits: u32) -> Result<i64, ReadError> {
        let start = self.pos;
        let mut result: i64 = 0;
        let mut shift: u32 = 0;

        loop {
            let byte = self.read_byte()?;
            let room = bits - shift;
            if room < 7 {
                // the unused high bits of the final group must repeat the sign
                let group = ((byte << 1) as i8) >> 1;
                let limit = 1i8 << (room - 1);
                if byte & 0x80 != 0 || group < -limit || group >= limit {
                    return Err(ReadError::Overflow { offset: start });
                }
            }
            result |= ((byte & 0x7f) as i64) << shift;
            shift += 7;

            if byte & 0x80 == 0 {
                if shift < 64 && byte & 0x40 != 0 {
                    result |= -1i64 << shift;
                }
                return Ok(result);
            }
            if shift >= bits {
                return Err(ReadError::Overflow { offset: start });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_u32() {
        let read = |v: Vec<u8>| -> u32 {
            let mut reader = Reader::new(&v);
            reader.read_u32().expect("Failed to read u32")
        };

        assert_eq!(read(vec![0, 0, 0, 0]), 0);
        assert_eq!(read(vec![1, 0, 0, 0]), 1);
        assert_eq!(read(vec![0, 1, 0, 0]), 256);
        assert_eq!(read(vec![0x00, 0x61, 0x73, 0x6d]), 0x6d736100);
        assert_eq!(read(vec![0xff, 0xff, 0xff, 0xff]), u32::MAX);
    }

    #[test]
    fn test_read_var_u32() {
        let read = |v: Vec<u8>| {
            let mut reader = Reader::new(&v);
            reader.read_var_u32().expect("Failed to read varuint32")
        };

        assert_eq!(read(vec![0]), 0);
        assert_eq!(read(vec![1]), 1);
        assert_eq!(read(vec![0b11100101, 0b10001110, 0b00100110]), 624485);
        assert_eq!(read(vec![0x7f]), 127);
        assert_eq!(read(vec![0x80, 0x7f]), 16256);
        assert_eq!(read(vec![0xb4, 0x07]), 0x3b4);
        assert_eq!(read(vec![0xff, 0xff, 0xff, 0xff, 0xf]), 0xffffffff);
        assert_eq!(read(vec![128, 128, 128, 128, 8]), 0x80000000);
        // non-canonical but within width
        assert_eq!(read(vec![0x80, 0x00]), 0);
    }

    #[test]
    fn test_read_var_u32_overflow() {
        let read = |v: Vec<u8>| Reader::new(&v).read_var_u32();

        assert_eq!(
            read(vec![0xff, 0xff, 0xff, 0xff, 0x1f]),
            Err(ReadError::Overflow { offset: 0 })
        );
        assert_eq!(
            read(vec![0x80, 0x80, 0x80, 0x80, 0x80, 0x00]),
            Err(ReadError::Overflow { offset: 0 })
        );
        assert_eq!(
            read(vec![0x80, 0x80]),
            Err(ReadError::UnexpectedEndOfInput { offset: 2 })
        );
    }

    #[test]
    fn test_read_var_u1_and_u7() {
        assert_eq!(Reader::new(&[0]).read_var_u1(), Ok(false));
        assert_eq!(Reader::new(&[1]).read_var_u1(), Ok(true));
        assert_eq!(
            Reader::new(&[2]).read_var_u1(),
            Err(ReadError::Overflow { offset: 0 })
        );
        assert_eq!(Reader::new(&[0x7f]).read_var_u7(), Ok(0x7f));
        assert_eq!(
            Reader::new(&[0x80, 0x01]).read_var_u7(),
            Err(ReadError::Overflow { offset: 0 })
        );
        assert_eq!(Reader::new(&[]).try_read_var_u7(), Ok(None));
    }

    #[test]
    fn test_read_var_i7() {
        let read = |v: Vec<u8>| Reader::new(&v).read_var_i7().expect("Failed to read varint7");

        assert_eq!(read(vec![0x7f]), -1);
        assert_eq!(read(vec![0x7c]), -4);
        assert_eq!(read(vec![0x40]), -64);
        assert_eq!(read(vec![0x3f]), 63);
    }

    #[test]
    fn test_read_var_i32() {
        let read = |v: Vec<u8>| {
            let mut reader = Reader::new(&v);
            reader.read_var_i32().expect("Failed to read varint32")
        };

        assert_eq!(read(vec![0]), 0);
        assert_eq!(read(vec![1]), 1);
        assert_eq!(read(vec![0b11100101, 0b10001110, 0b00100110]), 624485);
        assert_eq!(read(vec![0x7f]), -1);
        assert_eq!(read(vec![0x80, 0x7f]), -128);
        assert_eq!(read(vec![0b10011011, 0b11110001, 0b01011001]), -624485);
        assert_eq!(read(vec![128, 128, 128, 128, 120]), i32::MIN);
        assert_eq!(read(vec![0xff, 0xff, 0xff, 0xff, 0x07]), i32::MAX);
    }

    #[test]
    fn test_read_var_i32_overflow() {
        // bits beyond the 32nd that are not sign extension
        assert_eq!(
            Reader::new(&[0xff, 0xff, 0xff, 0xff, 0x0f]).read_var_i32(),
            Err(ReadError::Overflow { offset: 0 })
        );
        assert_eq!(
            Reader::new(&[0x80, 0x80, 0x80, 0x80, 0x70]).read_var_i32(),
            Err(ReadError::Overflow { offset: 0 })
        );
    }

    #[test]
    fn test_read_var_i64() {
        let read = |v: Vec<u8>| {
            let mut reader = Reader::new(&v);
            reader.read_var_i64().expect("Failed to read varint64")
        };

        assert_eq!(read(vec![0x7f]), -1);
        assert_eq!(read(vec![0x80, 0x7f]), -128);
        assert_eq!(
            read(vec![128, 128, 128, 128, 128, 128, 128, 252, 255, 0]),
            0x7ff8000000000000
        );
        assert_eq!(
            read(vec![128, 128, 128, 128, 128, 128, 128, 128, 128, 127]),
            i64::MIN
        );
        assert_eq!(
            Reader::new(&[128, 128, 128, 128, 128, 128, 128, 128, 128, 1]).read_var_i64(),
            Err(ReadError::Overflow { offset: 0 })
        );
    }

    #[test]
    fn test_read_var_u64() {
        let read = |v: Vec<u8>| Reader::new(&v).read_var_u64();

        assert_eq!(
            read(vec![0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x01]),
            Ok(u64::MAX)
        );
        assert_eq!(
            read(vec![0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x02]),
            Err(ReadError::Overflow { offset: 0 })
        );
    }

    #[test]
    fn test_read_floats() {
        assert!(Reader::new(&[0, 0, 192, 127]).read_f32().unwrap().is_nan());
        assert_eq!(Reader::new(&[219, 15, 201, 64]).read_f32(), Ok(6.2831855));
        assert_eq!(
            Reader::new(&[24, 45, 68, 84, 251, 33, 25, 64]).read_f64(),
            Ok(6.283185307179586)
        );
        assert_eq!(
            Reader::new(&[0, 0, 128]).read_f32(),
            Err(ReadError::UnexpectedEndOfInput { offset: 0 })
        );
    }

    #[test]
    fn test_read_string() {
        let mut reader = Reader::new(&[3, b'a', b'd', b'd', 2, 0xc3, 0x28]);
        assert_eq!(reader.read_string(), Ok("add".to_string()));
        assert_eq!(reader.read_string(), Err(ReadError::InvalidUtf8 { offset: 5 }));
    }

    #[test]
    fn test_offsets_advance() {
        let mut reader = Reader::new(&[0x80, 0x01, 0x05, 0xaa]);
        assert_eq!(reader.read_var_u32(), Ok(128));
        assert_eq!(reader.pos(), 2);
        assert_eq!(reader.read_byte_vec(), Err(ReadError::UnexpectedEndOfInput { offset: 3 }));
    }
}
