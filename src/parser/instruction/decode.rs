//! Instruction decoding from binary format

use super::super::limits;
use super::{
    Instruction, MemArg, MISC_DATA_DROP, MISC_ELEM_DROP, MISC_MEMORY_COPY, MISC_MEMORY_FILL,
    MISC_MEMORY_INIT, MISC_TABLE_COPY, MISC_TABLE_INIT,
};
use crate::parser::encoding::OP_PREFIX_MISC;
use crate::parser::module::BlockType;
use crate::parser::reader::Reader;
use crate::parser::DecodeError;

impl MemArg {
    /// Decode a memory argument from the reader
    pub fn decode(reader: &mut Reader) -> Result<Self, DecodeError> {
        let align = reader.read_var_u32()?;
        let offset = reader.read_var_u32()?;
        Ok(MemArg { align, offset })
    }
}

impl Instruction {
    /// Decode exactly one instruction, immediates included.
    pub fn decode(reader: &mut Reader) -> Result<Self, DecodeError> {
        let offset = reader.pos();
        let opcode = reader.read_byte()?;

        if let Some(inst) = Instruction::simple_from_opcode(opcode) {
            return Ok(inst);
        }

        if (0x28..=0x3e).contains(&opcode) {
            let memarg = MemArg::decode(reader)?;
            return Instruction::memory_from_opcode(opcode, memarg)
                .ok_or(DecodeError::UnknownOpcode { opcode, offset });
        }

        use Instruction::*;
        let inst = match opcode {
            0x02 => Block {
                block_type: BlockType::decode(reader)?,
            },
            0x03 => Loop {
                block_type: BlockType::decode(reader)?,
            },
            0x04 => If {
                block_type: BlockType::decode(reader)?,
            },
            0x06 => Try {
                block_type: BlockType::decode(reader)?,
            },
            0x07 => Catch {
                tag_idx: reader.read_var_u32()?,
            },
            0x08 => Throw {
                tag_idx: reader.read_var_u32()?,
            },
            0x09 => Rethrow {
                label_idx: reader.read_var_u32()?,
            },
            0x0c => Br {
                label_idx: reader.read_var_u32()?,
            },
            0x0d => BrIf {
                label_idx: reader.read_var_u32()?,
            },
            0x0e => {
                let count = reader.read_var_u32()?;
                if count > limits::MAX_BR_TABLE_LABELS {
                    return Err(DecodeError::malformed(
                        format!("br_table with {count} labels exceeds the limit"),
                        offset,
                    ));
                }
                let labels = (0..count)
                    .map(|_| reader.read_var_u32())
                    .collect::<Result<Vec<_>, _>>()?;
                let default = reader.read_var_u32()?;
                BrTable { labels, default }
            }
            0x10 => Call {
                func_idx: reader.read_var_u32()?,
            },
            0x11 => {
                let type_idx = reader.read_var_u32()?;
                let table_idx = reader.read_var_u32()?;
                CallIndirect { type_idx, table_idx }
            }
            0x20 => LocalGet {
                local_idx: reader.read_var_u32()?,
            },
            0x21 => LocalSet {
                local_idx: reader.read_var_u32()?,
            },
            0x22 => LocalTee {
                local_idx: reader.read_var_u32()?,
            },
            0x23 => GlobalGet {
                global_idx: reader.read_var_u32()?,
            },
            0x24 => GlobalSet {
                global_idx: reader.read_var_u32()?,
            },
            0x3f => MemorySize {
                mem_idx: reader.read_var_u32()?,
            },
            0x40 => MemoryGrow {
                mem_idx: reader.read_var_u32()?,
            },
            0x41 => I32Const {
                value: reader.read_var_i32()?,
            },
            0x42 => I64Const {
                value: reader.read_var_i64()?,
            },
            0x43 => F32Const {
                value: reader.read_f32()?,
            },
            0x44 => F64Const {
                value: reader.read_f64()?,
            },
            OP_PREFIX_MISC => Instruction::decode_misc(reader, offset)?,
            _ => return Err(DecodeError::UnknownOpcode { opcode, offset }),
        };

        Ok(inst)
    }

    fn decode_misc(reader: &mut Reader, offset: usize) -> Result<Self, DecodeError> {
        let sub = reader.read_var_u32()?;
        if let Some(inst) = Instruction::saturating_from_sub_opcode(sub) {
            return Ok(inst);
        }

        use Instruction::*;
        let inst = match sub {
            MISC_MEMORY_INIT => {
                let data_idx = reader.read_var_u32()?;
                let mem_idx = reader.read_var_u32()?;
                MemoryInit { data_idx, mem_idx }
            }
            MISC_DATA_DROP => DataDrop {
                data_idx: reader.read_var_u32()?,
            },
            MISC_MEMORY_COPY => {
                let dst_mem = reader.read_var_u32()?;
                let src_mem = reader.read_var_u32()?;
                MemoryCopy { dst_mem, src_mem }
            }
            MISC_MEMORY_FILL => MemoryFill {
                mem_idx: reader.read_var_u32()?,
            },
            MISC_TABLE_INIT => {
                let elem_idx = reader.read_var_u32()?;
                let table_idx = reader.read_var_u32()?;
                TableInit {
                    elem_idx,
                    table_idx,
                }
            }
            MISC_ELEM_DROP => ElemDrop {
                elem_idx: reader.read_var_u32()?,
            },
            MISC_TABLE_COPY => {
                let dst_table = reader.read_var_u32()?;
                let src_table = reader.read_var_u32()?;
                TableCopy {
                    dst_table,
                    src_table,
                }
            }
            _ => {
                return Err(DecodeError::UnknownPrefixedOpcode {
                    prefix: OP_PREFIX_MISC,
                    sub,
                    offset,
                })
            }
        };
        Ok(inst)
    }
}
