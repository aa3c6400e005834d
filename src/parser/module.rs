//! Section entry types.
//!
//! These are the descriptors the module assembler builds while decoding: value
//! and block types, signatures, limits, import/export entries, tags and local
//! declarations. Each decodes from a [`Reader`] and re-encodes to the same
//! canonical bytes.

use std::fmt;

use super::encoding::*;
use super::reader::Reader;
use super::DecodeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    I32,
    I64,
    F32,
    F64,
}

impl ValueType {
    pub fn from_byte(byte: u8) -> Option<ValueType> {
        match byte {
            TYPE_I32 => Some(ValueType::I32),
            TYPE_I64 => Some(ValueType::I64),
            TYPE_F32 => Some(ValueType::F32),
            TYPE_F64 => Some(ValueType::F64),
            _ => None,
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            ValueType::I32 => TYPE_I32,
            ValueType::I64 => TYPE_I64,
            ValueType::F32 => TYPE_F32,
            ValueType::F64 => TYPE_F64,
        }
    }

    pub fn decode(reader: &mut Reader) -> Result<ValueType, DecodeError> {
        let offset = reader.pos();
        let byte = reader.read_byte()?;
        ValueType::from_byte(byte)
            .ok_or_else(|| DecodeError::malformed(format!("invalid value type {byte:#04x}"), offset))
    }

    pub fn encode(self, buf: &mut Vec<u8>) {
        buf.push(self.to_byte());
    }

    pub fn bit_width(self) -> u32 {
        match self {
            ValueType::I32 | ValueType::F32 => 32,
            ValueType::I64 | ValueType::F64 => 64,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                ValueType::I32 => "i32",
                ValueType::I64 => "i64",
                ValueType::F32 => "f32",
                ValueType::F64 => "f64",
            }
        )
    }
}

/// Result arity of a block is 0 or 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockType {
    Empty,
    Value(ValueType),
}

impl BlockType {
    pub fn decode(reader: &mut Reader) -> Result<BlockType, DecodeError> {
        let offset = reader.pos();
        let byte = reader.read_byte()?;
        if byte == BLOCK_TYPE_EMPTY {
            return Ok(BlockType::Empty);
        }
        ValueType::from_byte(byte)
            .map(BlockType::Value)
            .ok_or_else(|| DecodeError::malformed(format!("invalid block type {byte:#04x}"), offset))
    }

    pub fn encode(self, buf: &mut Vec<u8>) {
        match self {
            BlockType::Empty => buf.push(BLOCK_TYPE_EMPTY),
            BlockType::Value(v) => v.encode(buf),
        }
    }

    pub fn result(self) -> Option<ValueType> {
        match self {
            BlockType::Empty => None,
            BlockType::Value(v) => Some(v),
        }
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BlockType::Empty => write!(f, "[]"),
            BlockType::Value(v) => write!(f, "[{v}]"),
        }
    }
}

/// A function type addressed by its position in the type section.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    pub type_index: u32,
    pub parameters: Vec<ValueType>,
    pub returns: Vec<ValueType>,
}

impl Signature {
    pub fn new(parameters: Vec<ValueType>, returns: Vec<ValueType>) -> Signature {
        Signature {
            type_index: 0,
            parameters,
            returns,
        }
    }

    pub fn empty() -> Signature {
        Signature::new(vec![], vec![])
    }

    pub fn decode(reader: &mut Reader, type_index: u32) -> Result<Signature, DecodeError> {
        let offset = reader.pos();
        let form = reader.read_byte()?;
        if form != TYPE_FUNC {
            return Err(DecodeError::malformed(
                format!("expected function type form {TYPE_FUNC:#04x}, found {form:#04x}"),
                offset,
            ));
        }
        let parameters = decode_value_types(reader)?;
        let returns = decode_value_types(reader)?;
        Ok(Signature {
            type_index,
            parameters,
            returns,
        })
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(TYPE_FUNC);
        write_vu32(buf, self.parameters.len() as u32);
        self.parameters.iter().for_each(|p| p.encode(buf));
        write_vu32(buf, self.returns.len() as u32);
        self.returns.iter().for_each(|r| r.encode(buf));
    }

    /// Structural equality; the type index is ignored.
    pub fn same_shape(&self, other: &Signature) -> bool {
        self.parameters == other.parameters && self.returns == other.returns
    }

    pub fn result(&self) -> Option<ValueType> {
        self.returns.first().copied()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let join = |types: &[ValueType]| {
            types
                .iter()
                .map(|t| t.to_string())
                .collect::<Vec<_>>()
                .join(" ")
        };
        write!(f, "[{}] -> [{}]", join(&self.parameters), join(&self.returns))
    }
}

fn decode_value_types(reader: &mut Reader) -> Result<Vec<ValueType>, DecodeError> {
    let count = reader.read_var_u32()?;
    if count > super::limits::MAX_FUNCTION_PARAMS {
        return Err(DecodeError::malformed(
            format!("too many value types: {count}"),
            reader.pos(),
        ));
    }
    (0..count).map(|_| ValueType::decode(reader)).collect()
}

/// Page or element counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub minimum: u32,
    pub maximum: Option<u32>,
}

impl Limits {
    pub fn decode(reader: &mut Reader) -> Result<Limits, DecodeError> {
        let offset = reader.pos();
        let flags = reader.read_var_u7()?;
        let minimum = reader.read_var_u32()?;
        let maximum = match flags {
            LIMITS_MIN => None,
            LIMITS_MIN_MAX => Some(reader.read_var_u32()?),
            _ => {
                return Err(DecodeError::malformed(
                    format!("unsupported limits flags {flags:#04x}"),
                    offset,
                ))
            }
        };
        Ok(Limits { minimum, maximum })
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        match self.maximum {
            None => {
                buf.push(LIMITS_MIN);
                write_vu32(buf, self.minimum);
            }
            Some(max) => {
                buf.push(LIMITS_MIN_MAX);
                write_vu32(buf, self.minimum);
                write_vu32(buf, max);
            }
        }
    }

    /// Whether a provided resource with limits `self` can satisfy an import
    /// declared with `required`.
    pub fn satisfies(&self, required: &Limits) -> bool {
        if self.minimum < required.minimum {
            return false;
        }
        match (required.maximum, self.maximum) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(req), Some(have)) => have <= req,
        }
    }
}

impl fmt::Display for Limits {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.maximum {
            Some(max) => write!(f, "{}..{}", self.minimum, max),
            None => write!(f, "{}..", self.minimum),
        }
    }
}

/// The single supported table element type is funcref.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableType {
    pub limits: Limits,
}

impl TableType {
    pub fn decode(reader: &mut Reader) -> Result<TableType, DecodeError> {
        let offset = reader.pos();
        let element_type = reader.read_byte()?;
        if element_type != TYPE_FUNCREF {
            return Err(DecodeError::malformed(
                format!("unsupported table element type {element_type:#04x}"),
                offset,
            ));
        }
        Ok(TableType {
            limits: Limits::decode(reader)?,
        })
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(TYPE_FUNCREF);
        self.limits.encode(buf);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalType {
    pub content_type: ValueType,
    pub mutable: bool,
}

impl GlobalType {
    pub fn decode(reader: &mut Reader) -> Result<GlobalType, DecodeError> {
        let content_type = ValueType::decode(reader)?;
        let mutable = reader.read_var_u1()?;
        Ok(GlobalType {
            content_type,
            mutable,
        })
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        self.content_type.encode(buf);
        write_vu1(buf, self.mutable);
    }
}

impl fmt::Display for GlobalType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.mutable {
            write!(f, "mut {}", self.content_type)
        } else {
            write!(f, "{}", self.content_type)
        }
    }
}

/// An exception signature; the referenced type must have no results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag {
    pub type_index: u32,
}

impl Tag {
    pub fn decode(reader: &mut Reader) -> Result<Tag, DecodeError> {
        let offset = reader.pos();
        let attribute = reader.read_byte()?;
        if attribute != TAG_ATTRIBUTE_EXCEPTION {
            return Err(DecodeError::malformed(
                format!("unsupported tag attribute {attribute:#04x}"),
                offset,
            ));
        }
        Ok(Tag {
            type_index: reader.read_var_u32()?,
        })
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(TAG_ATTRIBUTE_EXCEPTION);
        write_vu32(buf, self.type_index);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalKind {
    Function,
    Table,
    Memory,
    Global,
    Tag,
}

impl ExternalKind {
    pub fn decode(reader: &mut Reader) -> Result<ExternalKind, DecodeError> {
        let offset = reader.pos();
        match reader.read_byte()? {
            DESC_FUNC => Ok(ExternalKind::Function),
            DESC_TABLE => Ok(ExternalKind::Table),
            DESC_MEMORY => Ok(ExternalKind::Memory),
            DESC_GLOBAL => Ok(ExternalKind::Global),
            DESC_TAG => Ok(ExternalKind::Tag),
            other => Err(DecodeError::malformed(
                format!("unknown external kind {other:#04x}"),
                offset,
            )),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            ExternalKind::Function => DESC_FUNC,
            ExternalKind::Table => DESC_TABLE,
            ExternalKind::Memory => DESC_MEMORY,
            ExternalKind::Global => DESC_GLOBAL,
            ExternalKind::Tag => DESC_TAG,
        }
    }
}

impl fmt::Display for ExternalKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                ExternalKind::Function => "function",
                ExternalKind::Table => "table",
                ExternalKind::Memory => "memory",
                ExternalKind::Global => "global",
                ExternalKind::Tag => "tag",
            }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportKind {
    Function { type_index: u32 },
    Table(TableType),
    Memory(Limits),
    Global(GlobalType),
    Tag(Tag),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    pub module: String,
    pub field: String,
    pub kind: ImportKind,
}

impl Import {
    pub fn decode(reader: &mut Reader) -> Result<Import, DecodeError> {
        let module = reader.read_string()?;
        let field = reader.read_string()?;
        let kind = match ExternalKind::decode(reader)? {
            ExternalKind::Function => ImportKind::Function {
                type_index: reader.read_var_u32()?,
            },
            ExternalKind::Table => ImportKind::Table(TableType::decode(reader)?),
            ExternalKind::Memory => ImportKind::Memory(Limits::decode(reader)?),
            ExternalKind::Global => ImportKind::Global(GlobalType::decode(reader)?),
            ExternalKind::Tag => ImportKind::Tag(Tag::decode(reader)?),
        };
        Ok(Import {
            module,
            field,
            kind,
        })
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        write_string(buf, &self.module);
        write_string(buf, &self.field);
        match &self.kind {
            ImportKind::Function { type_index } => {
                buf.push(DESC_FUNC);
                write_vu32(buf, *type_index);
            }
            ImportKind::Table(table) => {
                buf.push(DESC_TABLE);
                table.encode(buf);
            }
            ImportKind::Memory(limits) => {
                buf.push(DESC_MEMORY);
                limits.encode(buf);
            }
            ImportKind::Global(global) => {
                buf.push(DESC_GLOBAL);
                global.encode(buf);
            }
            ImportKind::Tag(tag) => {
                buf.push(DESC_TAG);
                tag.encode(buf);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Export {
    pub name: String,
    pub kind: ExternalKind,
    pub index: u32,
}

impl Export {
    pub fn decode(reader: &mut Reader) -> Result<Export, DecodeError> {
        let name = reader.read_string()?;
        let kind = ExternalKind::decode(reader)?;
        let index = reader.read_var_u32()?;
        Ok(Export { name, kind, index })
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        write_string(buf, &self.name);
        buf.push(self.kind.to_byte());
        write_vu32(buf, self.index);
    }
}

/// A run of `count` locals of one type, as declared at the head of a body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalGroup {
    pub count: u32,
    pub value_type: ValueType,
}

impl LocalGroup {
    pub fn decode(reader: &mut Reader) -> Result<LocalGroup, DecodeError> {
        let count = reader.read_var_u32()?;
        let value_type = ValueType::decode(reader)?;
        Ok(LocalGroup { count, value_type })
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        write_vu32(buf, self.count);
        self.value_type.encode(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reencode<T>(bytes: &[u8], decode: impl Fn(&mut Reader) -> Result<T, DecodeError>, encode: impl Fn(&T, &mut Vec<u8>)) -> Vec<u8> {
        let mut reader = Reader::new(bytes);
        let value = decode(&mut reader).expect("decode failed");
        assert!(reader.is_at_end(), "trailing bytes after decode");
        let mut buf = Vec::new();
        encode(&value, &mut buf);
        buf
    }

    #[test]
    fn test_signature_round_trip() {
        let bytes = [0x60, 0x02, 0x7f, 0x7e, 0x01, 0x7d];
        let out = reencode(&bytes, |r| Signature::decode(r, 3), |s, b| s.encode(b));
        assert_eq!(out, bytes);

        let sig = Signature::decode(&mut Reader::new(&bytes), 3).unwrap();
        assert_eq!(sig.type_index, 3);
        assert_eq!(sig.to_string(), "[i32 i64] -> [f32]");
        assert!(sig.same_shape(&Signature::new(
            vec![ValueType::I32, ValueType::I64],
            vec![ValueType::F32]
        )));
    }

    #[test]
    fn test_signature_bad_form() {
        let err = Signature::decode(&mut Reader::new(&[0x61, 0x00, 0x00]), 0).unwrap_err();
        assert_eq!(err.offset(), 0);
    }

    #[test]
    fn test_import_round_trip() {
        // "env" "add" func type 0
        let func = [3, b'e', b'n', b'v', 3, b'a', b'd', b'd', 0x00, 0x00];
        assert_eq!(reencode(&func, Import::decode, |i, b| i.encode(b)), func);

        // "env" "mem" memory 1..2
        let mem = [3, b'e', b'n', b'v', 3, b'm', b'e', b'm', 0x02, 0x01, 0x01, 0x02];
        assert_eq!(reencode(&mem, Import::decode, |i, b| i.encode(b)), mem);

        // "env" "g" global mut i64
        let global = [3, b'e', b'n', b'v', 1, b'g', 0x03, 0x7e, 0x01];
        assert_eq!(reencode(&global, Import::decode, |i, b| i.encode(b)), global);

        // "env" "t" table funcref 0..
        let table = [3, b'e', b'n', b'v', 1, b't', 0x01, 0x70, 0x00, 0x00];
        assert_eq!(reencode(&table, Import::decode, |i, b| i.encode(b)), table);
    }

    #[test]
    fn test_export_and_tag_round_trip() {
        let export = [3, b'r', b'u', b'n', 0x00, 0x01];
        assert_eq!(reencode(&export, Export::decode, |e, b| e.encode(b)), export);

        let tag = [0x00, 0x05];
        assert_eq!(reencode(&tag, Tag::decode, |t, b| t.encode(b)), tag);
        assert!(Tag::decode(&mut Reader::new(&[0x01, 0x00])).is_err());
    }

    #[test]
    fn test_limits_satisfy() {
        let provided = Limits {
            minimum: 2,
            maximum: Some(4),
        };
        assert!(provided.satisfies(&Limits {
            minimum: 1,
            maximum: None
        }));
        assert!(provided.satisfies(&Limits {
            minimum: 2,
            maximum: Some(4)
        }));
        assert!(!provided.satisfies(&Limits {
            minimum: 3,
            maximum: None
        }));
        assert!(!provided.satisfies(&Limits {
            minimum: 1,
            maximum: Some(3)
        }));
        let unbounded = Limits {
            minimum: 2,
            maximum: None,
        };
        assert!(!unbounded.satisfies(&Limits {
            minimum: 1,
            maximum: Some(8)
        }));
    }

    #[test]
    fn test_block_type() {
        assert_eq!(
            BlockType::decode(&mut Reader::new(&[0x40])).unwrap(),
            BlockType::Empty
        );
        assert_eq!(
            BlockType::decode(&mut Reader::new(&[0x7c])).unwrap(),
            BlockType::Value(ValueType::F64)
        );
        assert!(BlockType::decode(&mut Reader::new(&[0x00])).is_err());
    }

    #[test]
    fn test_local_group_and_global_type() {
        let locals = [0x03, 0x7f];
        assert_eq!(reencode(&locals, LocalGroup::decode, |l, b| l.encode(b)), locals);
        let global = [0x7d, 0x00];
        assert_eq!(reencode(&global, GlobalType::decode, |g, b| g.encode(b)), global);
        assert!(GlobalType::decode(&mut Reader::new(&[0x7f, 0x02])).is_err());
    }
}
