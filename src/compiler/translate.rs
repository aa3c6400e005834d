use log::trace;

use super::context::{BlockKind, CompilationContext, MaybeValue};
use super::emitter::{Conversion, HostOp, MathOp};
use super::error::{CompileError, ValidationError};
use super::helpers::HelperRoutineKey;
use crate::parser::instruction::{Instruction, MemArg};
use crate::parser::module::ValueType::{self, *};

impl Instruction {
    /// Instructions allowed in global and segment initializers.
    pub fn is_constant(&self) -> bool {
        matches!(
            self,
            Instruction::I32Const { .. }
                | Instruction::I64Const { .. }
                | Instruction::F32Const { .. }
                | Instruction::F64Const { .. }
                | Instruction::GlobalGet { .. }
                | Instruction::End
        )
    }

    /// Check the instruction against the operand stack and control frames of
    /// `ctx` and emit its host operations.
    pub fn validate_and_translate(&self, ctx: &mut CompilationContext) -> Result<(), CompileError> {
        use Instruction::*;

        let opcode = self.mnemonic();
        trace!("{:5} {}", ctx.position(), self);

        if ctx.is_ended() {
            return Err(CompileError::compiler(format!(
                "{opcode} after the end of the function"
            )));
        }
        if ctx.is_initializer() && !self.is_constant() {
            return Err(CompileError::compiler(format!(
                "{opcode} is not allowed in an initializer expression"
            )));
        }

        match self {
            // Control
            Unreachable => {
                ctx.emit(HostOp::Unreachable);
                ctx.mark_unreachable();
            }
            Nop => ctx.emit(HostOp::Nop),
            Block { block_type } => ctx.begin_block(BlockKind::Block, *block_type),
            Loop { block_type } => ctx.begin_block(BlockKind::Loop, *block_type),
            If { block_type } => ctx.begin_if(*block_type)?,
            Else => ctx.begin_else()?,
            End => ctx.end()?,
            Br { label_idx } => ctx.branch(*label_idx)?,
            BrIf { label_idx } => ctx.branch_if(*label_idx)?,
            BrTable { labels, default } => ctx.branch_table(labels, *default)?,
            Return => ctx.return_()?,
            Call { func_idx } => {
                let signature = ctx.env().function(*func_idx)?.clone();
                ctx.pop_parameters(opcode, &signature.parameters)?;
                ctx.emit(HostOp::Call(*func_idx));
                signature.returns.iter().for_each(|t| ctx.push_val(*t));
            }
            CallIndirect {
                type_idx,
                table_idx,
            } => {
                require_table(ctx, opcode, *table_idx)?;
                let signature = ctx.env().signature(*type_idx)?.clone();
                ctx.pop_expected(opcode, I32)?;
                ctx.pop_parameters(opcode, &signature.parameters)?;
                ctx.emit(HostOp::CallIndirect(*type_idx));
                signature.returns.iter().for_each(|t| ctx.push_val(*t));
            }

            // Exceptions
            Try { block_type } => ctx.begin_try(*block_type)?,
            Catch { tag_idx } => ctx.begin_catch(*tag_idx)?,
            CatchAll => ctx.begin_catch_all()?,
            Throw { tag_idx } => ctx.throw(*tag_idx)?,
            Rethrow { label_idx } => ctx.rethrow(*label_idx)?,

            // Parametric
            Drop => {
                ctx.pop_any(opcode)?;
                ctx.emit(HostOp::Pop);
            }
            Select => select(ctx)?,

            // Variables
            LocalGet { local_idx } => {
                let t = ctx.local_type(*local_idx)?;
                let (load, _) = ctx.local_ops(*local_idx);
                ctx.emit(load);
                ctx.push_val(t);
            }
            LocalSet { local_idx } => {
                let t = ctx.local_type(*local_idx)?;
                ctx.pop_expected(opcode, t)?;
                let (_, store) = ctx.local_ops(*local_idx);
                ctx.emit(store);
            }
            LocalTee { local_idx } => {
                let t = ctx.local_type(*local_idx)?;
                ctx.pop_expected(opcode, t)?;
                let (_, store) = ctx.local_ops(*local_idx);
                ctx.emit(HostOp::Dup);
                ctx.emit(store);
                ctx.push_val(t);
            }
            GlobalGet { global_idx } => {
                let global = *ctx.env().global(*global_idx)?;
                if ctx.is_initializer()
                    && (*global_idx as usize >= ctx.env().imported_globals || global.mutable)
                {
                    return Err(CompileError::compiler(format!(
                        "initializer expressions may only read imported immutable globals, \
                         global {global_idx} is not one"
                    )));
                }
                ctx.emit(HostOp::GlobalGet(*global_idx));
                ctx.push_val(global.content_type);
            }
            GlobalSet { global_idx } => {
                let global = *ctx.env().global(*global_idx)?;
                if !global.mutable {
                    return Err(CompileError::compiler(format!(
                        "global {global_idx} is immutable"
                    )));
                }
                ctx.pop_expected(opcode, global.content_type)?;
                ctx.emit(HostOp::GlobalSet(*global_idx));
            }

            // Memory
            MemorySize { mem_idx } => {
                require_memory(ctx, opcode, *mem_idx)?;
                ctx.emit(HostOp::MemorySize);
                ctx.push_val(I32);
            }
            MemoryGrow { mem_idx } => {
                require_memory(ctx, opcode, *mem_idx)?;
                ctx.sig_unary(opcode, I32, I32)?;
                ctx.emit(HostOp::MemoryGrow);
            }
            MemoryInit { data_idx, mem_idx } => {
                require_memory(ctx, opcode, *mem_idx)?;
                require_data(ctx, opcode, *data_idx)?;
                ctx.pop_expecteds(opcode, &[I32, I32, I32])?;
                ctx.emit(HostOp::MemoryInit(*data_idx));
            }
            DataDrop { data_idx } => {
                require_data(ctx, opcode, *data_idx)?;
                ctx.emit(HostOp::DataDrop(*data_idx));
            }
            MemoryCopy { dst_mem, src_mem } => {
                require_memory(ctx, opcode, *dst_mem)?;
                require_memory(ctx, opcode, *src_mem)?;
                ctx.pop_expecteds(opcode, &[I32, I32, I32])?;
                ctx.emit(HostOp::MemoryCopy);
            }
            MemoryFill { mem_idx } => {
                require_memory(ctx, opcode, *mem_idx)?;
                ctx.pop_expecteds(opcode, &[I32, I32, I32])?;
                ctx.emit(HostOp::MemoryFill);
            }
            TableInit {
                elem_idx,
                table_idx,
            } => {
                require_table(ctx, opcode, *table_idx)?;
                require_element(ctx, opcode, *elem_idx)?;
                ctx.pop_expecteds(opcode, &[I32, I32, I32])?;
                ctx.emit(HostOp::TableInit(*elem_idx));
            }
            ElemDrop { elem_idx } => {
                require_element(ctx, opcode, *elem_idx)?;
                ctx.emit(HostOp::ElemDrop(*elem_idx));
            }
            TableCopy {
                dst_table,
                src_table,
            } => {
                require_table(ctx, opcode, *dst_table)?;
                require_table(ctx, opcode, *src_table)?;
                ctx.pop_expecteds(opcode, &[I32, I32, I32])?;
                ctx.emit(HostOp::TableCopy);
            }

            // Constants
            I32Const { value } => {
                ctx.emit(HostOp::LdcI4(*value));
                ctx.push_val(I32);
            }
            I64Const { value } => {
                ctx.emit(HostOp::LdcI8(*value));
                ctx.push_val(I64);
            }
            F32Const { value } => {
                ctx.emit(HostOp::LdcR4(*value));
                ctx.push_val(F32);
            }
            F64Const { value } => {
                ctx.emit(HostOp::LdcR8(*value));
                ctx.push_val(F64);
            }

            // Comparisons
            I32Eqz => unary(ctx, opcode, I32, I32, &[HostOp::LdcI4(0), HostOp::Ceq])?,
            I64Eqz => unary(ctx, opcode, I64, I32, &[HostOp::LdcI8(0), HostOp::Ceq])?,
            I32Eq | I64Eq | F32Eq | F64Eq => compare(ctx, opcode, &[HostOp::Ceq])?,
            I32Ne | I64Ne | F32Ne | F64Ne => compare(ctx, opcode, &negated(HostOp::Ceq))?,
            I32LtS | I64LtS | F32Lt | F64Lt => compare(ctx, opcode, &[HostOp::Clt])?,
            I32LtU | I64LtU => compare(ctx, opcode, &[HostOp::CltUn])?,
            I32GtS | I64GtS | F32Gt | F64Gt => compare(ctx, opcode, &[HostOp::Cgt])?,
            I32GtU | I64GtU => compare(ctx, opcode, &[HostOp::CgtUn])?,
            I32LeS | I64LeS => compare(ctx, opcode, &negated(HostOp::Cgt))?,
            I32GeS | I64GeS => compare(ctx, opcode, &negated(HostOp::Clt))?,
            // unordered forms so that NaN operands compare false
            I32LeU | I64LeU | F32Le | F64Le => compare(ctx, opcode, &negated(HostOp::CgtUn))?,
            I32GeU | I64GeU | F32Ge | F64Ge => compare(ctx, opcode, &negated(HostOp::CltUn))?,

            // Integer arithmetic
            I32Clz => call_helper(ctx, opcode, HelperRoutineKey::Clz(I32))?,
            I64Clz => call_helper(ctx, opcode, HelperRoutineKey::Clz(I64))?,
            I32Ctz => call_helper(ctx, opcode, HelperRoutineKey::Ctz(I32))?,
            I64Ctz => call_helper(ctx, opcode, HelperRoutineKey::Ctz(I64))?,
            I32Popcnt => call_helper(ctx, opcode, HelperRoutineKey::Popcnt(I32))?,
            I64Popcnt => call_helper(ctx, opcode, HelperRoutineKey::Popcnt(I64))?,
            I32Add | I64Add | F32Add | F64Add => arithmetic(ctx, opcode, HostOp::Add)?,
            I32Sub | I64Sub | F32Sub | F64Sub => arithmetic(ctx, opcode, HostOp::Sub)?,
            I32Mul | I64Mul | F32Mul | F64Mul => arithmetic(ctx, opcode, HostOp::Mul)?,
            I32DivS | I64DivS | F32Div | F64Div => arithmetic(ctx, opcode, HostOp::Div)?,
            I32DivU | I64DivU => arithmetic(ctx, opcode, HostOp::DivUn)?,
            I32RemS | I64RemS => arithmetic(ctx, opcode, HostOp::Rem)?,
            I32RemU | I64RemU => arithmetic(ctx, opcode, HostOp::RemUn)?,
            I32And | I64And => arithmetic(ctx, opcode, HostOp::And)?,
            I32Or | I64Or => arithmetic(ctx, opcode, HostOp::Or)?,
            I32Xor | I64Xor => arithmetic(ctx, opcode, HostOp::Xor)?,
            I32Shl | I64Shl => shift(ctx, opcode, HostOp::Shl)?,
            I32ShrS | I64ShrS => shift(ctx, opcode, HostOp::Shr)?,
            I32ShrU | I64ShrU => shift(ctx, opcode, HostOp::ShrUn)?,
            I32Rotl => call_helper(ctx, opcode, HelperRoutineKey::Rotl(I32))?,
            I64Rotl => call_helper(ctx, opcode, HelperRoutineKey::Rotl(I64))?,
            I32Rotr => call_helper(ctx, opcode, HelperRoutineKey::Rotr(I32))?,
            I64Rotr => call_helper(ctx, opcode, HelperRoutineKey::Rotr(I64))?,

            // Float arithmetic
            F32Abs | F64Abs => math(ctx, opcode, MathOp::Abs)?,
            F32Neg | F64Neg => {
                let t = operand_type(opcode);
                unary(ctx, opcode, t, t, &[HostOp::Neg])?
            }
            F32Ceil | F64Ceil => math(ctx, opcode, MathOp::Ceil)?,
            F32Floor | F64Floor => math(ctx, opcode, MathOp::Floor)?,
            F32Trunc | F64Trunc => math(ctx, opcode, MathOp::Trunc)?,
            F32Nearest | F64Nearest => math(ctx, opcode, MathOp::Nearest)?,
            F32Sqrt | F64Sqrt => math(ctx, opcode, MathOp::Sqrt)?,
            F32Min | F64Min => {
                let t = operand_type(opcode);
                binary(ctx, opcode, t, t, &[HostOp::Math(MathOp::Min)])?
            }
            F32Max | F64Max => {
                let t = operand_type(opcode);
                binary(ctx, opcode, t, t, &[HostOp::Math(MathOp::Max)])?
            }
            F32Copysign => call_helper(ctx, opcode, HelperRoutineKey::Copysign(F32))?,
            F64Copysign => call_helper(ctx, opcode, HelperRoutineKey::Copysign(F64))?,

            // Conversions
            I32WrapI64 => convert(ctx, opcode, I64, I32, Conversion::Wrap)?,
            I32TruncF32S => convert(ctx, opcode, F32, I32, trunc(I32, true))?,
            I32TruncF32U => convert(ctx, opcode, F32, I32, trunc(I32, false))?,
            I32TruncF64S => convert(ctx, opcode, F64, I32, trunc(I32, true))?,
            I32TruncF64U => convert(ctx, opcode, F64, I32, trunc(I32, false))?,
            I64ExtendI32S => convert(ctx, opcode, I32, I64, Conversion::ExtendS)?,
            I64ExtendI32U => convert(ctx, opcode, I32, I64, Conversion::ExtendU)?,
            I64TruncF32S => convert(ctx, opcode, F32, I64, trunc(I64, true))?,
            I64TruncF32U => convert(ctx, opcode, F32, I64, trunc(I64, false))?,
            I64TruncF64S => convert(ctx, opcode, F64, I64, trunc(I64, true))?,
            I64TruncF64U => convert(ctx, opcode, F64, I64, trunc(I64, false))?,
            F32ConvertI32S => convert(ctx, opcode, I32, F32, Conversion::ToF32 { signed: true })?,
            F32ConvertI32U => convert(ctx, opcode, I32, F32, Conversion::ToF32 { signed: false })?,
            F32ConvertI64S => convert(ctx, opcode, I64, F32, Conversion::ToF32 { signed: true })?,
            F32ConvertI64U => convert(ctx, opcode, I64, F32, Conversion::ToF32 { signed: false })?,
            F32DemoteF64 => convert(ctx, opcode, F64, F32, Conversion::Demote)?,
            F64ConvertI32S => convert(ctx, opcode, I32, F64, Conversion::ToF64 { signed: true })?,
            F64ConvertI32U => convert(ctx, opcode, I32, F64, Conversion::ToF64 { signed: false })?,
            F64ConvertI64S => convert(ctx, opcode, I64, F64, Conversion::ToF64 { signed: true })?,
            F64ConvertI64U => convert(ctx, opcode, I64, F64, Conversion::ToF64 { signed: false })?,
            F64PromoteF32 => convert(ctx, opcode, F32, F64, Conversion::Promote)?,
            I32ReinterpretF32 => call_helper(ctx, opcode, HelperRoutineKey::Reinterpret(I32))?,
            I64ReinterpretF64 => call_helper(ctx, opcode, HelperRoutineKey::Reinterpret(I64))?,
            F32ReinterpretI32 => call_helper(ctx, opcode, HelperRoutineKey::Reinterpret(F32))?,
            F64ReinterpretI64 => call_helper(ctx, opcode, HelperRoutineKey::Reinterpret(F64))?,
            I32Extend8S => convert(ctx, opcode, I32, I32, Conversion::Extend8S)?,
            I32Extend16S => convert(ctx, opcode, I32, I32, Conversion::Extend16S)?,
            I64Extend8S => convert(ctx, opcode, I64, I64, Conversion::Extend8S)?,
            I64Extend16S => convert(ctx, opcode, I64, I64, Conversion::Extend16S)?,
            I64Extend32S => convert(ctx, opcode, I64, I64, Conversion::Extend32S)?,
            I32TruncSatF32S => trunc_sat(ctx, opcode, F32, I32, true)?,
            I32TruncSatF32U => trunc_sat(ctx, opcode, F32, I32, false)?,
            I32TruncSatF64S => trunc_sat(ctx, opcode, F64, I32, true)?,
            I32TruncSatF64U => trunc_sat(ctx, opcode, F64, I32, false)?,
            I64TruncSatF32S => trunc_sat(ctx, opcode, F32, I64, true)?,
            I64TruncSatF32U => trunc_sat(ctx, opcode, F32, I64, false)?,
            I64TruncSatF64S => trunc_sat(ctx, opcode, F64, I64, true)?,
            I64TruncSatF64U => trunc_sat(ctx, opcode, F64, I64, false)?,

            // Loads and stores
            _ => match self.memory_access() {
                Some((code, memarg, natural)) => memory_access(ctx, opcode, code, memarg, natural)?,
                None => {
                    return Err(CompileError::compiler(format!("{opcode} is not supported")));
                }
            },
        }

        ctx.previous_was_return = matches!(self, Return);
        Ok(())
    }
}

/// Operand type from the mnemonic prefix.
fn operand_type(opcode: &str) -> ValueType {
    match &opcode[..3] {
        "i64" => I64,
        "f32" => F32,
        "f64" => F64,
        _ => I32,
    }
}

fn negated(op: HostOp) -> [HostOp; 3] {
    [op, HostOp::LdcI4(0), HostOp::Ceq]
}

fn trunc(to: ValueType, signed: bool) -> Conversion {
    Conversion::TruncOverflow { to, signed }
}

fn unary(
    ctx: &mut CompilationContext,
    opcode: &'static str,
    input: ValueType,
    output: ValueType,
    ops: &[HostOp],
) -> Result<(), CompileError> {
    ctx.sig_unary(opcode, input, output)?;
    ops.iter().for_each(|op| ctx.emit(op.clone()));
    Ok(())
}

fn binary(
    ctx: &mut CompilationContext,
    opcode: &'static str,
    input: ValueType,
    output: ValueType,
    ops: &[HostOp],
) -> Result<(), CompileError> {
    ctx.sig_binary(opcode, input, output)?;
    ops.iter().for_each(|op| ctx.emit(op.clone()));
    Ok(())
}

fn compare(ctx: &mut CompilationContext, opcode: &'static str, ops: &[HostOp]) -> Result<(), CompileError> {
    binary(ctx, opcode, operand_type(opcode), I32, ops)
}

fn arithmetic(ctx: &mut CompilationContext, opcode: &'static str, op: HostOp) -> Result<(), CompileError> {
    let t = operand_type(opcode);
    binary(ctx, opcode, t, t, &[op])
}

fn math(ctx: &mut CompilationContext, opcode: &'static str, op: MathOp) -> Result<(), CompileError> {
    let t = operand_type(opcode);
    unary(ctx, opcode, t, t, &[HostOp::Math(op)])
}

/// The host shifts by an i32 count.
fn shift(ctx: &mut CompilationContext, opcode: &'static str, op: HostOp) -> Result<(), CompileError> {
    let t = operand_type(opcode);
    ctx.sig_binary(opcode, t, t)?;
    if t == I64 {
        ctx.emit(HostOp::Conv(Conversion::Wrap));
    }
    ctx.emit(op);
    Ok(())
}

fn convert(
    ctx: &mut CompilationContext,
    opcode: &'static str,
    from: ValueType,
    to: ValueType,
    conversion: Conversion,
) -> Result<(), CompileError> {
    unary(ctx, opcode, from, to, &[HostOp::Conv(conversion)])
}

fn trunc_sat(
    ctx: &mut CompilationContext,
    opcode: &'static str,
    from: ValueType,
    to: ValueType,
    signed: bool,
) -> Result<(), CompileError> {
    call_helper(ctx, opcode, HelperRoutineKey::TruncSat { from, to, signed })
}

fn call_helper(
    ctx: &mut CompilationContext,
    opcode: &'static str,
    key: HelperRoutineKey,
) -> Result<(), CompileError> {
    let signature = key.signature();
    ctx.pop_expecteds(opcode, &signature.parameters)?;
    let id = ctx.helper(key)?;
    ctx.emit(HostOp::CallHelper(id));
    signature.returns.iter().for_each(|t| ctx.push_val(*t));
    Ok(())
}

fn select(ctx: &mut CompilationContext) -> Result<(), CompileError> {
    const OPCODE: &str = "select";
    ctx.require(OPCODE, 3)?;
    ctx.pop_expected(OPCODE, I32)?;
    let second = ctx.pop_any(OPCODE)?;
    let first = ctx.pop_any(OPCODE)?;
    let result = match (first, second) {
        (MaybeValue::Val(a), MaybeValue::Val(b)) if a != b => {
            return Err(ValidationError::StackTypeInvalid {
                opcode: OPCODE,
                expected: a,
                actual: b,
            }
            .into());
        }
        (MaybeValue::Val(t), _) | (_, MaybeValue::Val(t)) => MaybeValue::Val(t),
        _ => MaybeValue::Unknown,
    };
    match result {
        MaybeValue::Val(t) => {
            let id = ctx.helper(HelperRoutineKey::Select(t))?;
            ctx.emit(HostOp::CallHelper(id));
        }
        // only reachable in dead code; keep the host stack balanced
        MaybeValue::Unknown => {
            ctx.emit(HostOp::Pop);
            ctx.emit(HostOp::Pop);
        }
    }
    ctx.push(result);
    Ok(())
}

fn require_memory(ctx: &CompilationContext, opcode: &str, index: u32) -> Result<(), CompileError> {
    if index != 0 || ctx.env().memory.is_none() {
        return Err(CompileError::compiler(format!("{opcode}: no memory {index}")));
    }
    Ok(())
}

fn require_table(ctx: &CompilationContext, opcode: &str, index: u32) -> Result<(), CompileError> {
    if index != 0 || ctx.env().table.is_none() {
        return Err(CompileError::compiler(format!("{opcode}: no table {index}")));
    }
    Ok(())
}

fn require_data(ctx: &CompilationContext, opcode: &str, index: u32) -> Result<(), CompileError> {
    match ctx.env().data_count {
        None => Err(CompileError::compiler(format!(
            "{opcode} requires a data count section"
        ))),
        Some(count) if index >= count => Err(CompileError::compiler(format!(
            "{opcode}: missing data segment {index}, {count} available"
        ))),
        Some(_) => Ok(()),
    }
}

fn require_element(ctx: &CompilationContext, opcode: &str, index: u32) -> Result<(), CompileError> {
    let count = ctx.env().element_count;
    if index >= count {
        return Err(CompileError::compiler(format!(
            "{opcode}: missing element segment {index}, {count} available"
        )));
    }
    Ok(())
}

/// Value type and signedness of a load or store opcode.
fn access_type(code: u8) -> (ValueType, bool) {
    match code {
        0x28 | 0x36 => (I32, false),
        0x29 | 0x37 => (I64, false),
        0x2a | 0x38 => (F32, false),
        0x2b | 0x39 => (F64, false),
        0x2c | 0x2e => (I32, true),
        0x2d | 0x2f | 0x3a | 0x3b => (I32, false),
        0x30 | 0x32 | 0x34 => (I64, true),
        _ => (I64, false),
    }
}

fn memory_access(
    ctx: &mut CompilationContext,
    opcode: &'static str,
    code: u8,
    memarg: MemArg,
    natural: u32,
) -> Result<(), CompileError> {
    require_memory(ctx, opcode, 0)?;
    if memarg.align > natural {
        return Err(CompileError::compiler(format!(
            "{opcode}: alignment 2^{} exceeds the natural alignment 2^{natural}",
            memarg.align
        )));
    }

    let (value_type, signed) = access_type(code);
    let bytes = 1u8 << natural;
    let range = HostOp::CheckRange {
        offset: memarg.offset,
        length: bytes,
    };
    let is_load = code <= 0x35;

    if is_load {
        ctx.sig_unary(opcode, I32, value_type)?;
        if memarg.align < natural {
            ctx.emit(HostOp::Unaligned(1 << memarg.align));
        }
        ctx.emit(range);
        ctx.emit(HostOp::Load {
            value_type,
            bytes,
            signed,
        });
    } else {
        ctx.pop_expecteds(opcode, &[I32, value_type])?;
        let scratch = ctx.scratch_local(value_type);
        ctx.emit(HostOp::StLoc(scratch));
        ctx.emit(range);
        ctx.emit(HostOp::LdLoc(scratch));
        if memarg.align < natural {
            ctx.emit(HostOp::Unaligned(1 << memarg.align));
        }
        ctx.emit(HostOp::Store { bytes });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::config::CompilerConfiguration;
    use crate::compiler::context::ModuleEnvironment;
    use crate::compiler::emitter::HostFunction;
    use crate::compiler::helpers::HelperCache;
    use crate::parser::module::{BlockType, GlobalType, Limits, LocalGroup, Signature, TableType};
    use rstest::rstest;
    use Instruction::*;

    fn environment() -> ModuleEnvironment {
        ModuleEnvironment {
            types: vec![Signature::new(vec![I32], vec![I32])],
            functions: vec![Signature::new(vec![I32, I64], vec![F64])],
            imported_functions: 1,
            globals: vec![
                GlobalType {
                    content_type: I32,
                    mutable: false,
                },
                GlobalType {
                    content_type: I64,
                    mutable: true,
                },
            ],
            imported_globals: 1,
            table: Some(TableType {
                limits: Limits {
                    minimum: 1,
                    maximum: None,
                },
            }),
            memory: Some(Limits {
                minimum: 1,
                maximum: None,
            }),
            tags: vec![Signature::new(vec![I32], vec![])],
            data_count: Some(1),
            element_count: 1,
        }
    }

    fn translate(
        signature: Signature,
        locals: &[LocalGroup],
        body: &[Instruction],
    ) -> Result<HostFunction, CompileError> {
        let env = environment();
        let mut helpers = HelperCache::new();
        let config = CompilerConfiguration::default();
        let mut ctx = CompilationContext::new(&env, &mut helpers, &config);
        ctx.reset(signature, locals)?;
        for inst in body {
            inst.validate_and_translate(&mut ctx)?;
        }
        ctx.finish("test")
    }

    fn sig(params: &[ValueType], returns: &[ValueType]) -> Signature {
        Signature::new(params.to_vec(), returns.to_vec())
    }

    fn too_small(opcode: &'static str, expected: usize, actual: usize) -> CompileError {
        ValidationError::StackTooSmall {
            opcode,
            expected,
            actual,
        }
        .into()
    }

    fn wrong_type(opcode: &'static str, expected: ValueType, actual: ValueType) -> CompileError {
        ValidationError::StackTypeInvalid {
            opcode,
            expected,
            actual,
        }
        .into()
    }

    #[test]
    fn test_add_translates_to_host_add() {
        let f = translate(
            sig(&[I32, I32], &[I32]),
            &[],
            &[LocalGet { local_idx: 0 }, LocalGet { local_idx: 1 }, I32Add, End],
        )
        .unwrap();
        assert_eq!(
            f.ops,
            vec![HostOp::LdArg(0), HostOp::LdArg(1), HostOp::Add, HostOp::Ret]
        );
    }

    #[rstest]
    #[case::empty(&[I32Add, End], too_small("i32.add", 2, 0))]
    #[case::one(&[I32Const { value: 1 }, I32Add, End], too_small("i32.add", 2, 1))]
    #[case::float_for_int(&[F64Const { value: 1.0 }, I32Eqz, End], wrong_type("i32.eqz", I32, F64))]
    #[case::int_for_float(&[I32Const { value: 1 }, I32Const { value: 1 }, F32Add, End], wrong_type("f32.add", F32, I32))]
    #[case::store_value(&[I32Const { value: 0 }, I32Const { value: 0 }, I64Store { memarg: MemArg { align: 3, offset: 0 } }, End], wrong_type("i64.store", I64, I32))]
    #[case::select_mixed(&[I32Const { value: 0 }, I64Const { value: 0 }, I32Const { value: 1 }, Select, End], wrong_type("select", I32, I64))]
    #[case::global_type(&[I32Const { value: 0 }, GlobalSet { global_idx: 1 }, End], wrong_type("global.set", I64, I32))]
    fn test_validation_failures(#[case] body: &[Instruction], #[case] expected: CompileError) {
        assert_eq!(translate(sig(&[], &[]), &[], body).unwrap_err(), expected);
    }

    #[test]
    fn test_leftover_values_at_end() {
        let err = translate(sig(&[], &[]), &[], &[I32Const { value: 1 }, End]).unwrap_err();
        assert_eq!(
            err,
            ValidationError::StackSizeIncorrect {
                opcode: "end",
                expected: 0,
                actual: 1
            }
            .into()
        );
    }

    #[test]
    fn test_return_requires_exact_stack() {
        let err = translate(
            sig(&[], &[I32]),
            &[],
            &[I32Const { value: 1 }, I32Const { value: 2 }, Return, End],
        )
        .unwrap_err();
        assert_eq!(
            err,
            ValidationError::StackSizeIncorrect {
                opcode: "return",
                expected: 1,
                actual: 2
            }
            .into()
        );
    }

    #[test]
    fn test_trailing_return_omits_epilogue() {
        let f = translate(
            sig(&[], &[I32]),
            &[],
            &[I32Const { value: 7 }, Return, End],
        )
        .unwrap();
        assert_eq!(f.ops, vec![HostOp::LdcI4(7), HostOp::Ret]);
    }

    #[test]
    fn test_dead_code_is_permissive() {
        let body = [
            Block {
                block_type: BlockType::Value(I32),
            },
            Unreachable,
            I64Add,
            Drop,
            F64Const { value: 1.0 },
            End,
            End,
        ];
        assert!(translate(sig(&[], &[I32]), &[], &body).is_ok());

        // values in unreachable code still type check against each other
        let body = [
            Unreachable,
            F64Const { value: 1.0 },
            I32Eqz,
            End,
        ];
        assert_eq!(
            translate(sig(&[], &[]), &[], &body).unwrap_err(),
            wrong_type("i32.eqz", I32, F64)
        );
    }

    #[test]
    fn test_loop_branch_carries_no_operand() {
        let body = [
            Loop {
                block_type: BlockType::Value(I32),
            },
            Br { label_idx: 0 },
            End,
            End,
        ];
        let f = translate(sig(&[], &[I32]), &[], &body).unwrap();
        assert_eq!(f.target(crate::compiler::emitter::Label(1)), Some(0));
        assert_eq!(f.ops[0], HostOp::Br(crate::compiler::emitter::Label(1)));
    }

    #[test]
    fn test_br_table_label_types_must_agree() {
        let body = [
            Block {
                block_type: BlockType::Empty,
            },
            Block {
                block_type: BlockType::Value(I32),
            },
            I32Const { value: 0 },
            I32Const { value: 0 },
            BrTable {
                labels: vec![0],
                default: 1,
            },
            End,
            Drop,
            End,
            End,
        ];
        assert_eq!(
            translate(sig(&[], &[]), &[], &body).unwrap_err(),
            ValidationError::LabelTypeMismatch {
                opcode: "br_table",
                expected: BlockType::Empty,
                actual: BlockType::Value(I32),
            }
            .into()
        );
    }

    #[test]
    fn test_if_with_result_requires_else() {
        let body = [
            I32Const { value: 1 },
            If {
                block_type: BlockType::Value(I32),
            },
            I32Const { value: 2 },
            End,
            Drop,
            End,
        ];
        assert_eq!(
            translate(sig(&[], &[]), &[], &body).unwrap_err(),
            ValidationError::StackSizeIncorrect {
                opcode: "end",
                expected: 1,
                actual: 0
            }
            .into()
        );
    }

    #[test]
    fn test_comparisons() {
        let f = translate(
            sig(&[F64, F64], &[I32]),
            &[],
            &[LocalGet { local_idx: 0 }, LocalGet { local_idx: 1 }, F64Le, End],
        )
        .unwrap();
        assert_eq!(
            &f.ops[2..5],
            &[HostOp::CgtUn, HostOp::LdcI4(0), HostOp::Ceq]
        );

        let f = translate(
            sig(&[I64], &[I32]),
            &[],
            &[LocalGet { local_idx: 0 }, I64Eqz, End],
        )
        .unwrap();
        assert_eq!(&f.ops[1..3], &[HostOp::LdcI8(0), HostOp::Ceq]);
    }

    #[test]
    fn test_i64_shift_count_is_wrapped() {
        let f = translate(
            sig(&[I64, I64], &[I64]),
            &[],
            &[LocalGet { local_idx: 0 }, LocalGet { local_idx: 1 }, I64ShrU, End],
        )
        .unwrap();
        assert_eq!(
            &f.ops[2..4],
            &[HostOp::Conv(Conversion::Wrap), HostOp::ShrUn]
        );
    }

    #[test]
    fn test_memory_access_shapes() {
        let f = translate(
            sig(&[I32], &[I64]),
            &[],
            &[
                LocalGet { local_idx: 0 },
                I64Load16S {
                    memarg: MemArg { align: 0, offset: 4 },
                },
                End,
            ],
        )
        .unwrap();
        assert_eq!(
            &f.ops[1..4],
            &[
                HostOp::Unaligned(1),
                HostOp::CheckRange {
                    offset: 4,
                    length: 2
                },
                HostOp::Load {
                    value_type: I64,
                    bytes: 2,
                    signed: true
                },
            ]
        );

        let f = translate(
            sig(&[I32, F32], &[]),
            &[LocalGroup {
                count: 1,
                value_type: I32,
            }],
            &[
                LocalGet { local_idx: 0 },
                LocalGet { local_idx: 1 },
                F32Store {
                    memarg: MemArg { align: 2, offset: 0 },
                },
                End,
            ],
        )
        .unwrap();
        // the scratch local follows the declared one
        assert_eq!(f.locals, vec![I32, F32]);
        assert_eq!(
            &f.ops[2..6],
            &[
                HostOp::StLoc(crate::compiler::emitter::LocalId(1)),
                HostOp::CheckRange {
                    offset: 0,
                    length: 4
                },
                HostOp::LdLoc(crate::compiler::emitter::LocalId(1)),
                HostOp::Store { bytes: 4 },
            ]
        );
    }

    #[test]
    fn test_over_aligned_access_is_rejected() {
        let body = [
            I32Const { value: 0 },
            I32Load {
                memarg: MemArg { align: 3, offset: 0 },
            },
            Drop,
            End,
        ];
        assert!(matches!(
            translate(sig(&[], &[]), &[], &body),
            Err(CompileError::Compiler(_))
        ));
    }

    #[test]
    fn test_call_checks_parameters() {
        let body = [
            I32Const { value: 1 },
            F32Const { value: 1.0 },
            Call { func_idx: 0 },
            Drop,
            End,
        ];
        assert_eq!(
            translate(sig(&[], &[]), &[], &body).unwrap_err(),
            ValidationError::StackParameterMismatch {
                opcode: "call",
                expected: vec![I32, I64],
                actual: vec![MaybeValue::Val(I32), MaybeValue::Val(F32)],
            }
            .into()
        );

        let err = translate(sig(&[], &[]), &[], &[Call { func_idx: 3 }, End]).unwrap_err();
        assert!(err.to_string().contains("missing function 3, 1 available"));
    }

    #[test]
    fn test_immutable_global_cannot_be_set() {
        let body = [I32Const { value: 1 }, GlobalSet { global_idx: 0 }, End];
        assert!(matches!(
            translate(sig(&[], &[]), &[], &body),
            Err(CompileError::Compiler(_))
        ));
    }

    #[test]
    fn test_helpers_shared_within_function() {
        let env = environment();
        let mut helpers = HelperCache::new();
        let config = CompilerConfiguration::default();
        let mut ctx = CompilationContext::new(&env, &mut helpers, &config);
        ctx.reset(sig(&[I32], &[I32]), &[]).unwrap();
        for inst in [
            LocalGet { local_idx: 0 },
            I32Popcnt,
            I32Popcnt,
            I32Clz,
            End,
        ] {
            inst.validate_and_translate(&mut ctx).unwrap();
        }
        let f = ctx.finish("count").unwrap();
        assert_eq!(
            f.count_ops(|op| matches!(op, HostOp::CallHelper(_))),
            3
        );
        assert_eq!(helpers.len(), 2);
    }

    #[test]
    fn test_try_catch_shape() {
        let body = [
            Try {
                block_type: BlockType::Value(I32),
            },
            I32Const { value: 1 },
            Throw { tag_idx: 0 },
            Catch { tag_idx: 0 },
            End,
            End,
        ];
        let f = translate(sig(&[], &[I32]), &[], &body).unwrap();
        assert_eq!(f.count_ops(|op| matches!(op, HostOp::TryEnter(_))), 1);
        assert_eq!(f.count_ops(|op| matches!(op, HostOp::CatchTag { tag: 0, .. })), 1);
        assert_eq!(f.count_ops(|op| *op == HostOp::ResumeUnwind), 1);
    }

    #[test]
    fn test_branch_out_of_catch_leaves_region() {
        let body = [
            Block {
                block_type: BlockType::Empty,
            },
            Try {
                block_type: BlockType::Empty,
            },
            CatchAll,
            Br { label_idx: 1 },
            End,
            End,
            End,
        ];
        let f = translate(sig(&[], &[]), &[], &body).unwrap();
        assert!(f.ops.contains(&HostOp::Leave {
            handlers: 0,
            caught: 0
        }));
    }

    #[test]
    fn test_rethrow_requires_catch() {
        let body = [
            Try {
                block_type: BlockType::Empty,
            },
            Rethrow { label_idx: 0 },
            End,
            End,
        ];
        assert_eq!(
            translate(sig(&[], &[]), &[], &body).unwrap_err(),
            ValidationError::InvalidRethrowTarget {
                opcode: "rethrow",
                depth: 0
            }
            .into()
        );
    }

    #[test]
    fn test_initializer_restrictions() {
        let env = environment();
        let mut helpers = HelperCache::new();
        let config = CompilerConfiguration::default();
        let mut ctx = CompilationContext::new(&env, &mut helpers, &config);

        ctx.reset_initializer(I32);
        GlobalGet { global_idx: 0 }.validate_and_translate(&mut ctx).unwrap();
        End.validate_and_translate(&mut ctx).unwrap();
        assert!(ctx.finish("init").is_ok());

        ctx.reset_initializer(I64);
        assert!(GlobalGet { global_idx: 1 }
            .validate_and_translate(&mut ctx)
            .is_err());

        ctx.reset_initializer(I32);
        I32Const { value: 1 }.validate_and_translate(&mut ctx).unwrap();
        assert!(I32Const { value: 2 }.validate_and_translate(&mut ctx).is_ok());
        assert!(I32Add.validate_and_translate(&mut ctx).is_err());
    }
}
