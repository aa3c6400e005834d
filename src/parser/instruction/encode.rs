//! Instruction encoding to binary format

use super::{
    Instruction, MemArg, MISC_DATA_DROP, MISC_ELEM_DROP, MISC_MEMORY_COPY, MISC_MEMORY_FILL,
    MISC_MEMORY_INIT, MISC_TABLE_COPY, MISC_TABLE_INIT,
};
use crate::parser::encoding::*;

impl MemArg {
    pub fn encode(&self, buf: &mut Vec<u8>) {
        write_vu32(buf, self.align);
        write_vu32(buf, self.offset);
    }
}

impl Instruction {
    /// Append the canonical binary encoding of this instruction.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        use Instruction::*;

        if let Some(opcode) = self.simple_opcode() {
            buf.push(opcode);
            return;
        }

        if let Some((opcode, memarg, _)) = self.memory_access() {
            buf.push(opcode);
            memarg.encode(buf);
            return;
        }

        if let Some(sub) = self.saturating_sub_opcode() {
            buf.push(OP_PREFIX_MISC);
            write_vu32(buf, sub);
            return;
        }

        match self {
            Block { block_type } => {
                buf.push(0x02);
                block_type.encode(buf);
            }
            Loop { block_type } => {
                buf.push(0x03);
                block_type.encode(buf);
            }
            If { block_type } => {
                buf.push(0x04);
                block_type.encode(buf);
            }
            Try { block_type } => {
                buf.push(0x06);
                block_type.encode(buf);
            }
            Catch { tag_idx } => with_index(buf, 0x07, *tag_idx),
            Throw { tag_idx } => with_index(buf, 0x08, *tag_idx),
            Rethrow { label_idx } => with_index(buf, 0x09, *label_idx),
            Br { label_idx } => with_index(buf, 0x0c, *label_idx),
            BrIf { label_idx } => with_index(buf, 0x0d, *label_idx),
            BrTable { labels, default } => {
                buf.push(0x0e);
                write_vu32(buf, labels.len() as u32);
                for label in labels {
                    write_vu32(buf, *label);
                }
                write_vu32(buf, *default);
            }
            Call { func_idx } => with_index(buf, 0x10, *func_idx),
            CallIndirect {
                type_idx,
                table_idx,
            } => {
                buf.push(0x11);
                write_vu32(buf, *type_idx);
                write_vu32(buf, *table_idx);
            }
            LocalGet { local_idx } => with_index(buf, 0x20, *local_idx),
            LocalSet { local_idx } => with_index(buf, 0x21, *local_idx),
            LocalTee { local_idx } => with_index(buf, 0x22, *local_idx),
            GlobalGet { global_idx } => with_index(buf, 0x23, *global_idx),
            GlobalSet { global_idx } => with_index(buf, 0x24, *global_idx),
            MemorySize { mem_idx } => with_index(buf, 0x3f, *mem_idx),
            MemoryGrow { mem_idx } => with_index(buf, 0x40, *mem_idx),
            I32Const { value } => {
                buf.push(0x41);
                write_vs32(buf, *value);
            }
            I64Const { value } => {
                buf.push(0x42);
                write_vs64(buf, *value);
            }
            F32Const { value } => {
                buf.push(0x43);
                write_f32(buf, *value);
            }
            F64Const { value } => {
                buf.push(0x44);
                write_f64(buf, *value);
            }
            MemoryInit { data_idx, mem_idx } => {
                misc(buf, MISC_MEMORY_INIT);
                write_vu32(buf, *data_idx);
                write_vu32(buf, *mem_idx);
            }
            DataDrop { data_idx } => {
                misc(buf, MISC_DATA_DROP);
                write_vu32(buf, *data_idx);
            }
            MemoryCopy { dst_mem, src_mem } => {
                misc(buf, MISC_MEMORY_COPY);
                write_vu32(buf, *dst_mem);
                write_vu32(buf, *src_mem);
            }
            MemoryFill { mem_idx } => {
                misc(buf, MISC_MEMORY_FILL);
                write_vu32(buf, *mem_idx);
            }
            TableInit {
                elem_idx,
                table_idx,
            } => {
                misc(buf, MISC_TABLE_INIT);
                write_vu32(buf, *elem_idx);
                write_vu32(buf, *table_idx);
            }
            ElemDrop { elem_idx } => {
                misc(buf, MISC_ELEM_DROP);
                write_vu32(buf, *elem_idx);
            }
            TableCopy {
                dst_table,
                src_table,
            } => {
                misc(buf, MISC_TABLE_COPY);
                write_vu32(buf, *dst_table);
                write_vu32(buf, *src_table);
            }
            // table-driven instructions returned above
            _ => {}
        }
    }
}

fn with_index(buf: &mut Vec<u8>, opcode: u8, index: u32) {
    buf.push(opcode);
    write_vu32(buf, index);
}

fn misc(buf: &mut Vec<u8>, sub: u32) {
    buf.push(OP_PREFIX_MISC);
    write_vu32(buf, sub);
}
