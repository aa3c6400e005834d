//! Generated helper routines.
//!
//! Operations with no single host operation (bit counts, rotates,
//! reinterpretation, copysign, saturating truncation and select) are built as
//! small host programs once per module and called by every instruction that
//! needs them.

use std::collections::HashMap;

use log::debug;

use super::emitter::{CodeBuilder, Conversion, Emitter, HelperId, HostFunction, HostOp};
use super::error::CompileError;
use crate::parser::module::{Signature, ValueType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HelperRoutineKey {
    Popcnt(ValueType),
    Clz(ValueType),
    Ctz(ValueType),
    Rotl(ValueType),
    Rotr(ValueType),
    Copysign(ValueType),
    /// Reinterpret the bits of the same-width counterpart as this type.
    Reinterpret(ValueType),
    TruncSat {
        from: ValueType,
        to: ValueType,
        signed: bool,
    },
    Select(ValueType),
}

/// Same-width type of the other class.
fn counterpart(value_type: ValueType) -> ValueType {
    match value_type {
        ValueType::I32 => ValueType::F32,
        ValueType::I64 => ValueType::F64,
        ValueType::F32 => ValueType::I32,
        ValueType::F64 => ValueType::I64,
    }
}

impl HelperRoutineKey {
    pub fn name(&self) -> String {
        match self {
            HelperRoutineKey::Popcnt(t) => format!("{t}.popcnt"),
            HelperRoutineKey::Clz(t) => format!("{t}.clz"),
            HelperRoutineKey::Ctz(t) => format!("{t}.ctz"),
            HelperRoutineKey::Rotl(t) => format!("{t}.rotl"),
            HelperRoutineKey::Rotr(t) => format!("{t}.rotr"),
            HelperRoutineKey::Copysign(t) => format!("{t}.copysign"),
            HelperRoutineKey::Reinterpret(t) => format!("{t}.reinterpret_{}", counterpart(*t)),
            HelperRoutineKey::TruncSat { from, to, signed } => {
                format!("{to}.trunc_sat_{from}_{}", if *signed { "s" } else { "u" })
            }
            HelperRoutineKey::Select(t) => format!("select.{t}"),
        }
    }

    pub fn signature(&self) -> Signature {
        use HelperRoutineKey::*;
        match *self {
            Popcnt(t) | Clz(t) | Ctz(t) => Signature::new(vec![t], vec![t]),
            Rotl(t) | Rotr(t) | Copysign(t) => Signature::new(vec![t, t], vec![t]),
            Reinterpret(t) => Signature::new(vec![counterpart(t)], vec![t]),
            TruncSat { from, to, .. } => Signature::new(vec![from], vec![to]),
            Select(t) => Signature::new(vec![t, t, ValueType::I32], vec![t]),
        }
    }

    /// Emit the routine body. Argument 0 is the first operand.
    pub fn build(&self, e: &mut dyn Emitter) {
        match *self {
            HelperRoutineKey::Popcnt(t) => {
                popcount_arg0(e, t);
            }
            HelperRoutineKey::Clz(t) => {
                // smear the highest set bit downwards, then count what is left
                let mut shift = 1;
                while shift < t.bit_width() {
                    e.emit(HostOp::LdArg(0));
                    e.emit(HostOp::LdArg(0));
                    e.emit(HostOp::LdcI4(shift as i32));
                    e.emit(HostOp::ShrUn);
                    e.emit(HostOp::Or);
                    e.emit(HostOp::StArg(0));
                    shift *= 2;
                }
                int_constant(e, t, t.bit_width() as i64);
                popcount_arg0(e, t);
                e.emit(HostOp::Sub);
            }
            HelperRoutineKey::Ctz(t) => {
                // popcnt((x & -x) - 1); zero yields the full width
                e.emit(HostOp::LdArg(0));
                e.emit(HostOp::LdArg(0));
                e.emit(HostOp::Neg);
                e.emit(HostOp::And);
                int_constant(e, t, 1);
                e.emit(HostOp::Sub);
                e.emit(HostOp::StArg(0));
                popcount_arg0(e, t);
            }
            HelperRoutineKey::Rotl(t) => rotate(e, t, HostOp::Shl, HostOp::ShrUn),
            HelperRoutineKey::Rotr(t) => rotate(e, t, HostOp::ShrUn, HostOp::Shl),
            HelperRoutineKey::Copysign(t) => {
                let bits = counterpart(t);
                e.emit(HostOp::LdArg(0));
                e.emit(HostOp::Conv(Conversion::Bitcast(bits)));
                int_constant(e, bits, sign_mask(t) ^ width_mask(t));
                e.emit(HostOp::And);
                e.emit(HostOp::LdArg(1));
                e.emit(HostOp::Conv(Conversion::Bitcast(bits)));
                int_constant(e, bits, sign_mask(t));
                e.emit(HostOp::And);
                e.emit(HostOp::Or);
                e.emit(HostOp::Conv(Conversion::Bitcast(t)));
            }
            HelperRoutineKey::Reinterpret(t) => {
                e.emit(HostOp::LdArg(0));
                e.emit(HostOp::Conv(Conversion::Bitcast(t)));
            }
            HelperRoutineKey::TruncSat { from, to, signed } => {
                truncate_saturating(e, from, to, signed)
            }
            HelperRoutineKey::Select(_) => {
                let second = e.define_label();
                e.emit(HostOp::LdArg(2));
                e.emit(HostOp::BrFalse(second));
                e.emit(HostOp::LdArg(0));
                e.emit(HostOp::Ret);
                e.mark_label(second);
                e.emit(HostOp::LdArg(1));
            }
        }
        e.emit(HostOp::Ret);
    }
}

fn int_constant(e: &mut dyn Emitter, t: ValueType, value: i64) {
    match t {
        ValueType::I64 | ValueType::F64 => e.emit(HostOp::LdcI8(value)),
        _ => e.emit(HostOp::LdcI4(value as i32)),
    }
}

fn float_constant(e: &mut dyn Emitter, t: ValueType, value: f64) {
    match t {
        ValueType::F32 => e.emit(HostOp::LdcR4(value as f32)),
        _ => e.emit(HostOp::LdcR8(value)),
    }
}

fn sign_mask(t: ValueType) -> i64 {
    match t.bit_width() {
        32 => 0x8000_0000,
        _ => i64::MIN,
    }
}

fn width_mask(t: ValueType) -> i64 {
    match t.bit_width() {
        32 => 0xffff_ffff,
        _ => -1,
    }
}

/// SWAR population count of argument 0, leaving the count on the stack.
fn popcount_arg0(e: &mut dyn Emitter, t: ValueType) {
    let wide = t.bit_width() == 64;
    let (m1, m2, m4, h01) = if wide {
        (
            0x5555_5555_5555_5555_i64,
            0x3333_3333_3333_3333_i64,
            0x0f0f_0f0f_0f0f_0f0f_i64,
            0x0101_0101_0101_0101_i64,
        )
    } else {
        (0x5555_5555, 0x3333_3333, 0x0f0f_0f0f, 0x0101_0101)
    };

    // x = x - ((x >> 1) & m1)
    e.emit(HostOp::LdArg(0));
    e.emit(HostOp::LdArg(0));
    e.emit(HostOp::LdcI4(1));
    e.emit(HostOp::ShrUn);
    int_constant(e, t, m1);
    e.emit(HostOp::And);
    e.emit(HostOp::Sub);
    e.emit(HostOp::StArg(0));

    // x = (x & m2) + ((x >> 2) & m2)
    e.emit(HostOp::LdArg(0));
    int_constant(e, t, m2);
    e.emit(HostOp::And);
    e.emit(HostOp::LdArg(0));
    e.emit(HostOp::LdcI4(2));
    e.emit(HostOp::ShrUn);
    int_constant(e, t, m2);
    e.emit(HostOp::And);
    e.emit(HostOp::Add);
    e.emit(HostOp::StArg(0));

    // x = (x + (x >> 4)) & m4
    e.emit(HostOp::LdArg(0));
    e.emit(HostOp::LdArg(0));
    e.emit(HostOp::LdcI4(4));
    e.emit(HostOp::ShrUn);
    e.emit(HostOp::Add);
    int_constant(e, t, m4);
    e.emit(HostOp::And);

    // (x * h01) >> (width - 8)
    int_constant(e, t, h01);
    e.emit(HostOp::Mul);
    e.emit(HostOp::LdcI4(t.bit_width() as i32 - 8));
    e.emit(HostOp::ShrUn);
}

/// (x `first` n) | (x `second` (width - n)); shift counts wrap at the width.
fn rotate(e: &mut dyn Emitter, t: ValueType, first: HostOp, second: HostOp) {
    e.emit(HostOp::LdArg(0));
    rotate_count(e, t);
    e.emit(first);
    e.emit(HostOp::LdArg(0));
    e.emit(HostOp::LdcI4(t.bit_width() as i32));
    rotate_count(e, t);
    e.emit(HostOp::Sub);
    e.emit(second);
    e.emit(HostOp::Or);
}

fn rotate_count(e: &mut dyn Emitter, t: ValueType) {
    e.emit(HostOp::LdArg(1));
    if t == ValueType::I64 {
        e.emit(HostOp::Conv(Conversion::Wrap));
    }
}

/// NaN to zero, clamp at the destination bounds, otherwise truncate.
fn truncate_saturating(e: &mut dyn Emitter, from: ValueType, to: ValueType, signed: bool) {
    let bits = to.bit_width() as i32;
    // exclusive bounds, exact powers of two in every float format
    let (upper, lower) = if signed {
        (2f64.powi(bits - 1), -(2f64.powi(bits - 1)))
    } else {
        (2f64.powi(bits), -1.0)
    };
    let (max, min) = match (to, signed) {
        (ValueType::I64, true) => (i64::MAX, i64::MIN),
        (ValueType::I64, false) => (-1, 0),
        (_, true) => (i32::MAX as i64, i32::MIN as i64),
        (_, false) => (-1, 0),
    };

    let not_nan = e.define_label();
    let below_max = e.define_label();
    let above_min = e.define_label();

    e.emit(HostOp::LdArg(0));
    e.emit(HostOp::LdArg(0));
    e.emit(HostOp::Ceq);
    e.emit(HostOp::BrTrue(not_nan));
    int_constant(e, to, 0);
    e.emit(HostOp::Ret);

    e.mark_label(not_nan);
    e.emit(HostOp::LdArg(0));
    float_constant(e, from, upper);
    e.emit(HostOp::Clt);
    e.emit(HostOp::BrTrue(below_max));
    int_constant(e, to, max);
    e.emit(HostOp::Ret);

    e.mark_label(below_max);
    e.emit(HostOp::LdArg(0));
    float_constant(e, from, lower);
    e.emit(HostOp::Cgt);
    e.emit(HostOp::BrTrue(above_min));
    int_constant(e, to, min);
    e.emit(HostOp::Ret);

    e.mark_label(above_min);
    e.emit(HostOp::LdArg(0));
    e.emit(HostOp::Conv(Conversion::Truncate { to, signed }));
}

/// Helper routines of one module, each built at most once.
#[derive(Debug, Default)]
pub struct HelperCache {
    routines: Vec<HostFunction>,
    index: HashMap<HelperRoutineKey, HelperId>,
}

impl HelperCache {
    pub fn new() -> HelperCache {
        HelperCache::default()
    }

    pub fn get_or_build(&mut self, key: HelperRoutineKey) -> Result<HelperId, CompileError> {
        if let Some(id) = self.index.get(&key) {
            return Ok(*id);
        }
        let mut builder = CodeBuilder::new();
        key.build(&mut builder);
        let routine = builder.finish(key.name(), key.signature())?;
        debug!(
            "materialized helper {} ({} ops)",
            routine.name,
            routine.ops.len()
        );

        let id = HelperId(self.routines.len() as u32);
        self.routines.push(routine);
        self.index.insert(key, id);
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.routines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routines.is_empty()
    }

    pub fn into_routines(self) -> Vec<HostFunction> {
        self.routines
    }
}
