//! Binary encoding primitives and format constants.
//!
//! Provides LEB128 integer encoding and IEEE 754 float encoding as used by
//! the WebAssembly binary format, writing directly into a caller-provided
//! `&mut Vec<u8>`. The constants here are shared by the decoder, the
//! instruction encoder and the module assembler.

use byteorder::{LittleEndian, WriteBytesExt};

// ---------------------------------------------------------------------------
// Preamble
// ---------------------------------------------------------------------------

/// `\0asm` read as a little-endian u32.
pub const MAGIC: u32 = 0x6d73_6100;

pub const VERSION: u32 = 0x1;

/// The last pre-release version; its binary layout is identical to version 1.
pub const VERSION_PRE_RELEASE: u32 = 0xd;

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

pub const SECTION_CUSTOM: u8 = 0;
pub const SECTION_TYPE: u8 = 1;
pub const SECTION_IMPORT: u8 = 2;
pub const SECTION_FUNCTION: u8 = 3;
pub const SECTION_TABLE: u8 = 4;
pub const SECTION_MEMORY: u8 = 5;
pub const SECTION_GLOBAL: u8 = 6;
pub const SECTION_EXPORT: u8 = 7;
pub const SECTION_START: u8 = 8;
pub const SECTION_ELEMENT: u8 = 9;
pub const SECTION_CODE: u8 = 10;
pub const SECTION_DATA: u8 = 11;
pub const SECTION_DATA_COUNT: u8 = 12;
pub const SECTION_TAG: u8 = 13;

/// Position of a known section in the canonical order, or `None` for ids the
/// format does not define. Tag and data count sections carry ids larger than
/// the sections they must precede.
pub fn section_rank(id: u8) -> Option<u8> {
    match id {
        SECTION_CUSTOM => Some(0),
        SECTION_TYPE => Some(1),
        SECTION_IMPORT => Some(2),
        SECTION_FUNCTION => Some(3),
        SECTION_TABLE => Some(4),
        SECTION_MEMORY => Some(5),
        SECTION_TAG => Some(6),
        SECTION_GLOBAL => Some(7),
        SECTION_EXPORT => Some(8),
        SECTION_START => Some(9),
        SECTION_ELEMENT => Some(10),
        SECTION_DATA_COUNT => Some(11),
        SECTION_CODE => Some(12),
        SECTION_DATA => Some(13),
        _ => None,
    }
}

pub fn section_name(id: u8) -> &'static str {
    match id {
        SECTION_CUSTOM => "custom",
        SECTION_TYPE => "type",
        SECTION_IMPORT => "import",
        SECTION_FUNCTION => "function",
        SECTION_TABLE => "table",
        SECTION_MEMORY => "memory",
        SECTION_GLOBAL => "global",
        SECTION_EXPORT => "export",
        SECTION_START => "start",
        SECTION_ELEMENT => "element",
        SECTION_CODE => "code",
        SECTION_DATA => "data",
        SECTION_DATA_COUNT => "data count",
        SECTION_TAG => "tag",
        _ => "unknown",
    }
}

// ---------------------------------------------------------------------------
// Types and descriptors
// ---------------------------------------------------------------------------

pub const TYPE_FUNC: u8 = 0x60;
pub const TYPE_FUNCREF: u8 = 0x70;

pub const TYPE_I32: u8 = 0x7f;
pub const TYPE_I64: u8 = 0x7e;
pub const TYPE_F32: u8 = 0x7d;
pub const TYPE_F64: u8 = 0x7c;

pub const BLOCK_TYPE_EMPTY: u8 = 0x40;

pub const DESC_FUNC: u8 = 0x00;
pub const DESC_TABLE: u8 = 0x01;
pub const DESC_MEMORY: u8 = 0x02;
pub const DESC_GLOBAL: u8 = 0x03;
pub const DESC_TAG: u8 = 0x04;

pub const LIMITS_MIN: u8 = 0x00;
pub const LIMITS_MIN_MAX: u8 = 0x01;

pub const TAG_ATTRIBUTE_EXCEPTION: u8 = 0x00;

// Element segment flags: bit 0 non-active, bit 1 explicit table (or
// declarative when bit 0 is set), bit 2 expressions
pub const ELEM_ACTIVE_FUNCS: u32 = 0;
pub const ELEM_PASSIVE_FUNCS: u32 = 1;
pub const ELEM_ACTIVE_TABLE_FUNCS: u32 = 2;
pub const ELEM_DECLARATIVE_FUNCS: u32 = 3;
pub const ELEMKIND_FUNCREF: u8 = 0x00;

pub const DATA_ACTIVE: u32 = 0;
pub const DATA_PASSIVE: u32 = 1;
pub const DATA_ACTIVE_EXPLICIT: u32 = 2;

// ---------------------------------------------------------------------------
// Opcodes with structural meaning
// ---------------------------------------------------------------------------

pub const OP_PREFIX_MISC: u8 = 0xfc;

// ---------------------------------------------------------------------------
// Unsigned LEB128
// ---------------------------------------------------------------------------

fn write_vu(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            break;
        }
        byte |= 0x80;
        buf.push(byte);
    }
}

pub fn write_vu1(buf: &mut Vec<u8>, v: bool) {
    buf.push(u8::from(v));
}

pub fn write_vu32(buf: &mut Vec<u8>, v: u32) {
    write_vu(buf, v as u64);
}

// ---------------------------------------------------------------------------
// Signed LEB128
// ---------------------------------------------------------------------------

fn write_vs(buf: &mut Vec<u8>, mut value: i64) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if (value == 0 && (byte & 0x40) == 0) || (value == -1 && (byte & 0x40) != 0) {
            buf.push(byte);
            break;
        }
        byte |= 0x80;
        buf.push(byte);
    }
}

pub fn write_vs32(buf: &mut Vec<u8>, v: i32) {
    write_vs(buf, v as i64);
}

pub fn write_vs64(buf: &mut Vec<u8>, v: i64) {
    write_vs(buf, v);
}

// ---------------------------------------------------------------------------
// Fixed width
// ---------------------------------------------------------------------------

pub fn write_u32(buf: &mut Vec<u8>, v: u32) {
    // Vec<u8> as io::Write never fails
    let _ = buf.write_u32::<LittleEndian>(v);
}

/// Writes the raw bit pattern so NaN payloads survive a round trip.
pub fn write_f32(buf: &mut Vec<u8>, v: f32) {
    let _ = buf.write_u32::<LittleEndian>(v.to_bits());
}

pub fn write_f64(buf: &mut Vec<u8>, v: f64) {
    let _ = buf.write_u64::<LittleEndian>(v.to_bits());
}

// ---------------------------------------------------------------------------
// Vectors
// ---------------------------------------------------------------------------

pub fn write_byte_vec(buf: &mut Vec<u8>, bytes: &[u8]) {
    write_vu32(buf, bytes.len() as u32);
    buf.extend_from_slice(bytes);
}

pub fn write_string(buf: &mut Vec<u8>, s: &str) {
    write_byte_vec(buf, s.as_bytes());
}

/// Appends a section header and payload: id, varuint32 length, contents.
pub fn write_section(buf: &mut Vec<u8>, id: u8, payload: &[u8]) {
    buf.push(id);
    write_byte_vec(buf, payload);
}
