//! Target code generation.
//!
//! The validator drives an [`Emitter`]: it emits host operations, defines and
//! marks labels and declares locals. [`CodeBuilder`] is the concrete backend
//! and produces [`HostFunction`] programs for the host machine in
//! [`crate::runtime::machine`].
//!
//! Host operations are untyped in the way a managed-runtime instruction set
//! is: `Add` adds whatever two values of the same type are on top of the
//! stack, compares push an `i32` boolean, and conversions name their source
//! and target explicitly only where the stack does not already determine
//! them.

use std::fmt;

use super::error::CompileError;
use super::helpers::{HelperCache, HelperRoutineKey};
use crate::parser::module::{Signature, ValueType};

/// A branch target. Resolved to an operation index when the function is
/// finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(pub(crate) u32);

/// A declared local, numbered after the parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalId(pub(crate) u32);

/// A materialized helper routine of the module being compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HelperId(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MathOp {
    Abs,
    Ceil,
    Floor,
    Trunc,
    Nearest,
    Sqrt,
    /// NaN-propagating, -0 is less than +0
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    /// i64 to i32, dropping the high bits
    Wrap,
    ExtendS,
    ExtendU,
    /// Sign-extend the low 8, 16 or 32 bits in place
    Extend8S,
    Extend16S,
    Extend32S,
    /// Integer to float
    ToF32 { signed: bool },
    ToF64 { signed: bool },
    Demote,
    Promote,
    /// Float to integer, trapping on NaN or out of range
    TruncOverflow { to: ValueType, signed: bool },
    /// Float to integer for a source already known to be in range
    Truncate { to: ValueType, signed: bool },
    /// Same bits, different type
    Bitcast(ValueType),
}

#[derive(Debug, Clone, PartialEq)]
pub enum HostOp {
    Nop,

    // Constants and variables
    LdcI4(i32),
    LdcI8(i64),
    LdcR4(f32),
    LdcR8(f64),
    LdArg(u32),
    StArg(u32),
    LdLoc(LocalId),
    StLoc(LocalId),
    Dup,
    Pop,

    // Arithmetic on two values of one type; the `Un` forms are unsigned
    Add,
    Sub,
    Mul,
    Div,
    DivUn,
    Rem,
    RemUn,
    And,
    Or,
    Xor,
    /// Shift count is an i32 taken modulo the operand width
    Shl,
    Shr,
    ShrUn,
    Neg,

    // Comparisons push an i32 of 0 or 1. For floats, the `Un` forms are also
    // true when either operand is NaN.
    Ceq,
    Clt,
    CltUn,
    Cgt,
    CgtUn,

    Math(MathOp),
    Conv(Conversion),

    // Control
    Br(Label),
    BrTrue(Label),
    BrFalse(Label),
    /// Pops an i32 index, jumps to that entry or falls through when out of range
    Switch(Vec<Label>),
    /// Truncate the operand stack to `height`, keeping the top `keep` values
    Unwind { height: u32, keep: u32 },
    /// Exit exception regions down to the given handler and caught depths
    Leave { handlers: u32, caught: u32 },
    Call(u32),
    CallIndirect(u32),
    CallHelper(HelperId),
    Ret,
    Unreachable,

    // Memory. `CheckRange` pops an i32 address, adds the static offset and
    // pushes the checked effective address as an i64.
    Unaligned(u8),
    CheckRange { offset: u32, length: u8 },
    Load {
        value_type: ValueType,
        bytes: u8,
        signed: bool,
    },
    Store { bytes: u8 },
    MemorySize,
    MemoryGrow,
    MemoryInit(u32),
    DataDrop(u32),
    MemoryCopy,
    MemoryFill,
    TableInit(u32),
    ElemDrop(u32),
    TableCopy,

    GlobalGet(u32),
    GlobalSet(u32),

    // Exceptions
    TryEnter(Label),
    TryLeave,
    /// Take the pending exception when its tag matches, else jump
    CatchTag { tag: u32, otherwise: Label },
    CatchAll,
    EndCatch,
    Throw(u32),
    /// Re-raise the caught exception `n` entries below the innermost
    Rethrow(u32),
    /// Re-raise a pending exception no clause matched
    ResumeUnwind,
}

impl fmt::Display for HostOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HostOp::Br(l) | HostOp::BrTrue(l) | HostOp::BrFalse(l) | HostOp::TryEnter(l) => {
                let name = format!("{self:?}");
                let name = name.split('(').next().unwrap_or_default();
                write!(f, "{} L{}", name.to_lowercase(), l.0)
            }
            HostOp::Switch(labels) => {
                write!(f, "switch")?;
                for l in labels {
                    write!(f, " L{}", l.0)?;
                }
                Ok(())
            }
            other => write!(f, "{}", format!("{other:?}").to_lowercase()),
        }
    }
}

/// The operations a validator needs from a code generator.
pub trait Emitter {
    fn emit(&mut self, op: HostOp);
    fn define_label(&mut self) -> Label;
    fn mark_label(&mut self, label: Label);
    fn declare_local(&mut self, value_type: ValueType) -> LocalId;
    /// Operations emitted so far.
    fn position(&self) -> usize;

    /// Handle of the helper routine for `key`, for `HostOp::CallHelper`.
    ///
    /// Routines live in the module's [`HelperCache`], not in any one function,
    /// and each is built at most once per module.
    fn helper(
        &mut self,
        helpers: &mut HelperCache,
        key: HelperRoutineKey,
    ) -> Result<HelperId, CompileError> {
        helpers.get_or_build(key)
    }
}

/// A finished host program.
#[derive(Debug, Clone, PartialEq)]
pub struct HostFunction {
    pub name: String,
    pub signature: Signature,
    /// Declared locals, excluding parameters.
    pub locals: Vec<ValueType>,
    pub ops: Vec<HostOp>,
    labels: Vec<usize>,
}

impl HostFunction {
    pub fn target(&self, label: Label) -> Option<usize> {
        self.labels.get(label.0 as usize).copied()
    }

    pub fn arity(&self) -> usize {
        self.signature.returns.len()
    }

    pub fn count_ops(&self, predicate: impl Fn(&HostOp) -> bool) -> usize {
        self.ops.iter().filter(|op| predicate(op)).count()
    }
}

impl fmt::Display for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "{} {}", self.name, self.signature)?;
        for (pc, op) in self.ops.iter().enumerate() {
            for (label, _) in self.labels.iter().enumerate().filter(|(_, t)| **t == pc) {
                writeln!(f, "L{label}:")?;
            }
            writeln!(f, "  {op}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct CodeBuilder {
    ops: Vec<HostOp>,
    labels: Vec<Option<usize>>,
    locals: Vec<ValueType>,
}

impl CodeBuilder {
    pub fn new() -> CodeBuilder {
        CodeBuilder::default()
    }

    /// Resolve labels and produce the program. Every defined label must have
    /// been marked.
    pub fn finish(
        self,
        name: impl Into<String>,
        signature: Signature,
    ) -> Result<HostFunction, CompileError> {
        let name = name.into();
        let labels = self
            .labels
            .iter()
            .enumerate()
            .map(|(i, target)| {
                target.ok_or_else(|| {
                    CompileError::compiler(format!("label {i} of {name} was never marked"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(HostFunction {
            name,
            signature,
            locals: self.locals,
            ops: self.ops,
            labels,
        })
    }
}

impl Emitter for CodeBuilder {
    fn emit(&mut self, op: HostOp) {
        self.ops.push(op);
    }

    fn define_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() as u32 - 1)
    }

    fn mark_label(&mut self, label: Label) {
        if let Some(slot) = self.labels.get_mut(label.0 as usize) {
            *slot = Some(self.ops.len());
        }
    }

    fn declare_local(&mut self, value_type: ValueType) -> LocalId {
        self.locals.push(value_type);
        LocalId(self.locals.len() as u32 - 1)
    }

    fn position(&self) -> usize {
        self.ops.len()
    }
}
