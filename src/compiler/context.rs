//! Validation state and control-flow bookkeeping for one function body or
//! initializer expression.
//!
//! The operand stack holds [`MaybeValue`]s: once a frame is unreachable, pops
//! below its entry height succeed and yield whatever the consumer expects,
//! which models the polymorphic stack of dead code. Control frames map 1:1 to
//! labels; loops mark their label on entry, everything else on exit.
//!
//! In reachable code the height of the type stack equals the height of the
//! host operand stack, so branches can compute exactly how many values to
//! discard and which exception regions to leave.

use std::collections::HashMap;
use std::fmt;

use log::debug;

use super::config::CompilerConfiguration;
use super::emitter::{CodeBuilder, Emitter, HelperId, HostFunction, HostOp, Label, LocalId};
use super::error::{CompileError, ValidationError};
use super::helpers::{HelperCache, HelperRoutineKey};
use crate::parser::module::{BlockType, GlobalType, Limits, LocalGroup, Signature, TableType, ValueType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaybeValue {
    Val(ValueType),
    Unknown,
}

impl fmt::Display for MaybeValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MaybeValue::Val(t) => write!(f, "{t}"),
            MaybeValue::Unknown => write!(f, "unknown"),
        }
    }
}

/// Module-wide declarations visible while compiling code.
#[derive(Debug, Clone, Default)]
pub struct ModuleEnvironment {
    pub types: Vec<Signature>,
    /// Signatures of the whole function index space, imports first.
    pub functions: Vec<Signature>,
    pub imported_functions: usize,
    pub globals: Vec<GlobalType>,
    pub imported_globals: usize,
    pub table: Option<TableType>,
    pub memory: Option<Limits>,
    /// Parameter signature of each tag.
    pub tags: Vec<Signature>,
    pub data_count: Option<u32>,
    pub element_count: u32,
}

impl ModuleEnvironment {
    pub fn function(&self, index: u32) -> Result<&Signature, CompileError> {
        self.functions.get(index as usize).ok_or_else(|| {
            CompileError::compiler(format!(
                "missing function {index}, {} available",
                self.functions.len()
            ))
        })
    }

    pub fn signature(&self, type_index: u32) -> Result<&Signature, CompileError> {
        self.types.get(type_index as usize).ok_or_else(|| {
            CompileError::compiler(format!(
                "missing type {type_index}, {} available",
                self.types.len()
            ))
        })
    }

    pub fn tag(&self, index: u32) -> Result<&Signature, CompileError> {
        self.tags.get(index as usize).ok_or_else(|| {
            CompileError::compiler(format!("missing tag {index}, {} available", self.tags.len()))
        })
    }

    pub fn global(&self, index: u32) -> Result<&GlobalType, CompileError> {
        self.globals.get(index as usize).ok_or_else(|| {
            CompileError::compiler(format!(
                "missing global {index}, {} available",
                self.globals.len()
            ))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Function,
    Block,
    Loop,
    If,
    Else,
    Try,
    Catch,
}

#[derive(Debug, Clone)]
pub struct BlockContext {
    pub kind: BlockKind,
    pub block_type: BlockType,
    /// Operand stack height at entry.
    pub height: usize,
    pub unreachable: bool,
    pub label: Label,
    /// Else entry of an `if`, next handler of a `try` or `catch`.
    pub alternative: Option<Label>,
    /// Exception handler and caught-exception depths outside this frame.
    pub handlers: u32,
    pub caught: u32,
    pub catch_all: bool,
}

impl BlockContext {
    /// Values a branch to this frame carries.
    pub fn label_types(&self) -> BlockType {
        match self.kind {
            BlockKind::Loop => BlockType::Empty,
            _ => self.block_type,
        }
    }

    fn inner_handlers(&self) -> u32 {
        self.handlers + (self.kind == BlockKind::Try) as u32
    }

    fn inner_caught(&self) -> u32 {
        self.caught + (self.kind == BlockKind::Catch) as u32
    }
}

pub struct CompilationContext<'a> {
    env: &'a ModuleEnvironment,
    helpers: &'a mut HelperCache,
    config: &'a CompilerConfiguration,
    emitter: CodeBuilder,
    signature: Signature,
    locals: Vec<ValueType>,
    vals: Vec<MaybeValue>,
    ctrls: Vec<BlockContext>,
    scratch: HashMap<ValueType, LocalId>,
    pub(crate) previous_was_return: bool,
    return_label_used: bool,
    initializer: bool,
    ended: bool,
}

impl<'a> CompilationContext<'a> {
    pub fn new(
        env: &'a ModuleEnvironment,
        helpers: &'a mut HelperCache,
        config: &'a CompilerConfiguration,
    ) -> CompilationContext<'a> {
        CompilationContext {
            env,
            helpers,
            config,
            emitter: CodeBuilder::new(),
            signature: Signature::empty(),
            locals: vec![],
            vals: vec![],
            ctrls: vec![],
            scratch: HashMap::new(),
            previous_was_return: false,
            return_label_used: false,
            initializer: false,
            ended: false,
        }
    }

    /// Start a function body.
    pub fn reset(&mut self, signature: Signature, groups: &[LocalGroup]) -> Result<(), CompileError> {
        let declared = groups
            .iter()
            .try_fold(0usize, |sum, g| sum.checked_add(g.count as usize))
            .unwrap_or(usize::MAX);
        let total = signature.parameters.len().saturating_add(declared);
        if total > self.config.max_function_locals {
            return Err(CompileError::compiler(format!(
                "{total} locals exceed the host limit of {}",
                self.config.max_function_locals
            )));
        }

        self.clear(signature, false);
        for group in groups {
            for _ in 0..group.count {
                self.locals.push(group.value_type);
                self.emitter.declare_local(group.value_type);
            }
        }
        Ok(())
    }

    /// Start an initializer expression producing one value.
    pub fn reset_initializer(&mut self, value_type: ValueType) {
        self.clear(Signature::new(vec![], vec![value_type]), true);
    }

    fn clear(&mut self, signature: Signature, initializer: bool) {
        self.emitter = CodeBuilder::new();
        self.locals = signature.parameters.clone();
        self.signature = signature;
        self.vals.clear();
        self.ctrls.clear();
        self.scratch.clear();
        self.previous_was_return = false;
        self.return_label_used = false;
        self.initializer = initializer;
        self.ended = false;

        let block_type = match self.signature.result() {
            Some(t) => BlockType::Value(t),
            None => BlockType::Empty,
        };
        self.push_ctrl(BlockKind::Function, block_type);
    }

    pub fn finish(&mut self, name: impl Into<String>) -> Result<HostFunction, CompileError> {
        let name = name.into();
        if !self.ended {
            return Err(CompileError::compiler(format!("{name} is not terminated by end")));
        }
        let emitter = std::mem::take(&mut self.emitter);
        let function = emitter.finish(name, self.signature.clone())?;
        debug!(
            "compiled {}: {} ops, {} locals",
            function.name,
            function.ops.len(),
            function.locals.len()
        );
        Ok(function)
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn is_initializer(&self) -> bool {
        self.initializer
    }

    pub fn env(&self) -> &ModuleEnvironment {
        self.env
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn position(&self) -> usize {
        self.emitter.position()
    }

    // =========================================================================
    // Emission
    // =========================================================================

    pub fn emit(&mut self, op: HostOp) {
        self.emitter.emit(op);
    }

    pub fn define_label(&mut self) -> Label {
        self.emitter.define_label()
    }

    pub fn mark_label(&mut self, label: Label) {
        self.emitter.mark_label(label);
    }

    /// One reusable temporary per value type.
    pub fn scratch_local(&mut self, value_type: ValueType) -> LocalId {
        *self
            .scratch
            .entry(value_type)
            .or_insert_with(|| self.emitter.declare_local(value_type))
    }

    pub fn helper(&mut self, key: HelperRoutineKey) -> Result<HelperId, CompileError> {
        self.emitter.helper(self.helpers, key)
    }

    pub fn local_type(&self, index: u32) -> Result<ValueType, CompileError> {
        self.locals.get(index as usize).copied().ok_or_else(|| {
            CompileError::compiler(format!(
                "missing local {index}, {} available",
                self.locals.len()
            ))
        })
    }

    /// Load and store operations for a local index.
    pub fn local_ops(&self, index: u32) -> (HostOp, HostOp) {
        let params = self.signature.parameters.len() as u32;
        if index < params {
            (HostOp::LdArg(index), HostOp::StArg(index))
        } else {
            let id = LocalId(index - params);
            (HostOp::LdLoc(id), HostOp::StLoc(id))
        }
    }

    // =========================================================================
    // Operand stack
    // =========================================================================

    fn current(&self) -> Result<&BlockContext, CompileError> {
        self.ctrls
            .last()
            .ok_or_else(|| CompileError::compiler("no open control frame"))
    }

    fn current_mut(&mut self) -> Result<&mut BlockContext, CompileError> {
        self.ctrls
            .last_mut()
            .ok_or_else(|| CompileError::compiler("no open control frame"))
    }

    pub fn is_unreachable(&self) -> bool {
        self.ctrls.last().map(|c| c.unreachable).unwrap_or(false)
    }

    fn floor(&self) -> usize {
        self.ctrls.last().map(|c| c.height).unwrap_or(0)
    }

    fn available(&self) -> usize {
        self.vals.len().saturating_sub(self.floor())
    }

    pub fn height(&self) -> usize {
        self.vals.len()
    }

    pub fn push(&mut self, value: MaybeValue) {
        self.vals.push(value);
    }

    pub fn push_val(&mut self, value_type: ValueType) {
        self.vals.push(MaybeValue::Val(value_type));
    }

    /// Fail unless `count` operands are available or the frame is unreachable.
    pub fn require(&self, opcode: &'static str, count: usize) -> Result<(), CompileError> {
        let available = self.available();
        if available < count && !self.is_unreachable() {
            return Err(ValidationError::StackTooSmall {
                opcode,
                expected: count,
                actual: available,
            }
            .into());
        }
        Ok(())
    }

    /// Pop a value of any type.
    pub fn pop_any(&mut self, opcode: &'static str) -> Result<MaybeValue, CompileError> {
        if self.vals.len() <= self.floor() {
            self.require(opcode, 1)?;
            return Ok(MaybeValue::Unknown);
        }
        Ok(self.vals.pop().unwrap_or(MaybeValue::Unknown))
    }

    pub fn pop_expected(
        &mut self,
        opcode: &'static str,
        expected: ValueType,
    ) -> Result<MaybeValue, CompileError> {
        self.pop_expecteds(opcode, &[expected])
            .map(|v| v.into_iter().next().unwrap_or(MaybeValue::Val(expected)))
    }

    /// Pop operands right to left, checking each against its expected type.
    pub fn pop_expecteds(
        &mut self,
        opcode: &'static str,
        expected: &[ValueType],
    ) -> Result<Vec<MaybeValue>, CompileError> {
        let available = self.available();
        let mut popped = Vec::with_capacity(expected.len());
        for &want in expected.iter().rev() {
            if self.vals.len() <= self.floor() {
                if !self.is_unreachable() {
                    return Err(ValidationError::StackTooSmall {
                        opcode,
                        expected: expected.len(),
                        actual: available,
                    }
                    .into());
                }
                popped.push(MaybeValue::Val(want));
                continue;
            }
            let got = self.vals.pop().unwrap_or(MaybeValue::Unknown);
            match got {
                MaybeValue::Val(actual) if actual != want => {
                    return Err(ValidationError::StackTypeInvalid {
                        opcode,
                        expected: want,
                        actual,
                    }
                    .into())
                }
                MaybeValue::Val(_) => popped.push(got),
                MaybeValue::Unknown => popped.push(MaybeValue::Val(want)),
            }
        }
        popped.reverse();
        Ok(popped)
    }

    /// Pop call arguments, reporting a mismatch against the whole list.
    pub fn pop_parameters(
        &mut self,
        opcode: &'static str,
        parameters: &[ValueType],
    ) -> Result<(), CompileError> {
        self.require(opcode, parameters.len())?;
        let take = parameters.len().min(self.available());
        let start = self.vals.len() - take;
        let mut actual: Vec<MaybeValue> = vec![MaybeValue::Unknown; parameters.len() - take];
        actual.extend_from_slice(&self.vals[start..]);

        let matches = actual.iter().zip(parameters).all(|(a, p)| match a {
            MaybeValue::Val(t) => t == p,
            MaybeValue::Unknown => true,
        });
        if !matches {
            return Err(ValidationError::StackParameterMismatch {
                opcode,
                expected: parameters.to_vec(),
                actual,
            }
            .into());
        }
        self.vals.truncate(start);
        Ok(())
    }

    /// Pop one operand of type `input`, push one of type `output`.
    pub fn sig_unary(
        &mut self,
        opcode: &'static str,
        input: ValueType,
        output: ValueType,
    ) -> Result<(), CompileError> {
        self.pop_expected(opcode, input)?;
        self.push_val(output);
        Ok(())
    }

    /// Pop two operands of type `input`, push one of type `output`.
    pub fn sig_binary(
        &mut self,
        opcode: &'static str,
        input: ValueType,
        output: ValueType,
    ) -> Result<(), CompileError> {
        self.pop_expecteds(opcode, &[input, input])?;
        self.push_val(output);
        Ok(())
    }

    // =========================================================================
    // Control frames
    // =========================================================================

    fn region_depths(&self) -> (u32, u32) {
        self.ctrls
            .last()
            .map(|c| (c.inner_handlers(), c.inner_caught()))
            .unwrap_or((0, 0))
    }

    pub fn push_ctrl(&mut self, kind: BlockKind, block_type: BlockType) -> Label {
        let (handlers, caught) = self.region_depths();
        let label = self.emitter.define_label();
        self.ctrls.push(BlockContext {
            kind,
            block_type,
            height: self.vals.len(),
            unreachable: false,
            label,
            alternative: None,
            handlers,
            caught,
            catch_all: false,
        });
        label
    }

    /// The frame `depth` levels out from the innermost.
    pub fn frame(&self, depth: u32) -> Option<&BlockContext> {
        let index = self.ctrls.len().checked_sub(1 + depth as usize)?;
        self.ctrls.get(index)
    }

    fn frame_index(&mut self, opcode: &'static str, depth: u32) -> Result<usize, CompileError> {
        let len = self.ctrls.len();
        let index = len.checked_sub(1 + depth as usize).ok_or_else(|| {
            CompileError::compiler(format!(
                "{opcode}: invalid branch depth {depth}, {len} available"
            ))
        })?;
        if index == 0 {
            self.return_label_used = true;
        }
        Ok(index)
    }

    /// Mark the rest of the current frame as dead code. Enclosing frames stay
    /// live: their code after this frame's `end` is reached by branches.
    pub fn mark_unreachable(&mut self) {
        let floor = self.floor();
        if let Some(c) = self.ctrls.last_mut() {
            c.unreachable = true;
        }
        self.vals.truncate(floor);
    }

    /// Validate the values a frame section leaves behind and clear them.
    fn check_results(&mut self, opcode: &'static str) -> Result<(), CompileError> {
        let frame = self.current()?.clone();
        if !frame.unreachable {
            let arity = frame.block_type.result().is_some() as usize;
            if let Some(t) = frame.block_type.result() {
                self.pop_expected(opcode, t)?;
            }
            let extra = self.vals.len().saturating_sub(frame.height);
            if extra != 0 {
                return Err(ValidationError::StackSizeIncorrect {
                    opcode,
                    expected: arity,
                    actual: arity + extra,
                }
                .into());
            }
        }
        self.vals.truncate(frame.height);
        Ok(())
    }

    /// Operations that bring the host state in line with a branch target:
    /// leave exception regions and discard operands above the target height.
    fn branch_fixups(&self, index: usize, height: usize) -> Vec<HostOp> {
        let mut ops = vec![];
        // a function-level branch returns, which discards everything
        if index == 0 {
            return ops;
        }
        let target = &self.ctrls[index];
        let keep = target.label_types().result().is_some() as u32;
        let (handlers, caught) = self.region_depths();
        if handlers > target.handlers || caught > target.caught {
            ops.push(HostOp::Leave {
                handlers: target.handlers,
                caught: target.caught,
            });
        }
        if height > target.height + keep as usize {
            ops.push(HostOp::Unwind {
                height: target.height as u32,
                keep,
            });
        }
        ops
    }

    pub fn begin_block(&mut self, kind: BlockKind, block_type: BlockType) {
        let label = self.push_ctrl(kind, block_type);
        if kind == BlockKind::Loop {
            self.mark_label(label);
        }
    }

    pub fn begin_if(&mut self, block_type: BlockType) -> Result<(), CompileError> {
        self.pop_expected("if", ValueType::I32)?;
        self.push_ctrl(BlockKind::If, block_type);
        let otherwise = self.define_label();
        self.current_mut()?.alternative = Some(otherwise);
        self.emit(HostOp::BrFalse(otherwise));
        Ok(())
    }

    pub fn begin_else(&mut self) -> Result<(), CompileError> {
        let frame = self.current()?.clone();
        if frame.kind != BlockKind::If {
            return Err(CompileError::compiler("else without a matching if"));
        }
        self.check_results("else")?;
        self.emit(HostOp::Br(frame.label));
        if let Some(otherwise) = frame.alternative {
            self.mark_label(otherwise);
        }
        let frame = self.current_mut()?;
        frame.kind = BlockKind::Else;
        frame.alternative = None;
        frame.unreachable = false;
        Ok(())
    }

    pub fn begin_try(&mut self, block_type: BlockType) -> Result<(), CompileError> {
        self.push_ctrl(BlockKind::Try, block_type);
        let handler = self.define_label();
        self.current_mut()?.alternative = Some(handler);
        self.emit(HostOp::TryEnter(handler));
        Ok(())
    }

    /// Close the try body or the previous handler ahead of a new handler.
    fn end_handler_section(&mut self, opcode: &'static str) -> Result<(), CompileError> {
        let frame = self.current()?.clone();
        match frame.kind {
            BlockKind::Try | BlockKind::Catch => {}
            _ => return Err(CompileError::compiler(format!("{opcode} without a matching try"))),
        }
        if frame.catch_all {
            return Err(CompileError::compiler(format!("{opcode} after catch_all")));
        }
        self.check_results(opcode)?;
        match frame.kind {
            BlockKind::Try => self.emit(HostOp::TryLeave),
            _ => self.emit(HostOp::EndCatch),
        }
        self.emit(HostOp::Br(frame.label));
        if let Some(next) = frame.alternative {
            self.mark_label(next);
        }
        Ok(())
    }

    pub fn begin_catch(&mut self, tag: u32) -> Result<(), CompileError> {
        let parameters = self.env.tag(tag)?.parameters.clone();
        self.end_handler_section("catch")?;
        let otherwise = self.define_label();
        self.emit(HostOp::CatchTag { tag, otherwise });
        let frame = self.current_mut()?;
        frame.kind = BlockKind::Catch;
        frame.alternative = Some(otherwise);
        frame.unreachable = false;
        for t in parameters {
            self.push_val(t);
        }
        Ok(())
    }

    pub fn begin_catch_all(&mut self) -> Result<(), CompileError> {
        self.end_handler_section("catch_all")?;
        self.emit(HostOp::CatchAll);
        let frame = self.current_mut()?;
        frame.kind = BlockKind::Catch;
        frame.alternative = None;
        frame.catch_all = true;
        frame.unreachable = false;
        Ok(())
    }

    pub fn end(&mut self) -> Result<(), CompileError> {
        let frame = self.current()?.clone();
        self.check_results("end")?;
        // the implicit else of an if produces nothing
        if frame.kind == BlockKind::If && frame.block_type.result().is_some() {
            return Err(ValidationError::StackSizeIncorrect {
                opcode: "end",
                expected: 1,
                actual: 0,
            }
            .into());
        }
        self.ctrls.pop();

        match frame.kind {
            BlockKind::Function => {
                self.mark_label(frame.label);
                if !(self.previous_was_return && !self.return_label_used) {
                    self.emit(HostOp::Ret);
                }
                self.ended = true;
                return Ok(());
            }
            BlockKind::Loop => {}
            BlockKind::Block | BlockKind::Else => self.mark_label(frame.label),
            BlockKind::If => {
                if let Some(otherwise) = frame.alternative {
                    self.mark_label(otherwise);
                }
                self.mark_label(frame.label);
            }
            BlockKind::Try => {
                let skip = frame.label;
                self.emit(HostOp::TryLeave);
                self.emit(HostOp::Br(skip));
                if let Some(handler) = frame.alternative {
                    self.mark_label(handler);
                }
                self.emit(HostOp::ResumeUnwind);
                self.mark_label(skip);
            }
            BlockKind::Catch => {
                self.emit(HostOp::EndCatch);
                if let Some(otherwise) = frame.alternative {
                    self.emit(HostOp::Br(frame.label));
                    self.mark_label(otherwise);
                    self.emit(HostOp::ResumeUnwind);
                }
                self.mark_label(frame.label);
            }
        }

        if let Some(t) = frame.block_type.result() {
            self.push_val(t);
        }
        Ok(())
    }

    pub fn branch(&mut self, depth: u32) -> Result<(), CompileError> {
        let index = self.frame_index("br", depth)?;
        let height = self.vals.len();
        if let Some(t) = self.ctrls[index].label_types().result() {
            self.pop_expected("br", t)?;
        }
        let target = self.ctrls[index].label;
        for op in self.branch_fixups(index, height) {
            self.emit(op);
        }
        self.emit(HostOp::Br(target));
        self.mark_unreachable();
        Ok(())
    }

    pub fn branch_if(&mut self, depth: u32) -> Result<(), CompileError> {
        self.pop_expected("br_if", ValueType::I32)?;
        let index = self.frame_index("br_if", depth)?;
        let height = self.vals.len();
        if let Some(t) = self.ctrls[index].label_types().result() {
            self.pop_expected("br_if", t)?;
            self.push_val(t);
        }
        let target = self.ctrls[index].label;
        let fixups = self.branch_fixups(index, height);
        if fixups.is_empty() {
            self.emit(HostOp::BrTrue(target));
        } else {
            let skip = self.define_label();
            self.emit(HostOp::BrFalse(skip));
            for op in fixups {
                self.emit(op);
            }
            self.emit(HostOp::Br(target));
            self.mark_label(skip);
        }
        Ok(())
    }

    pub fn branch_table(&mut self, labels: &[u32], default: u32) -> Result<(), CompileError> {
        const OPCODE: &str = "br_table";
        self.pop_expected(OPCODE, ValueType::I32)?;
        let default_index = self.frame_index(OPCODE, default)?;
        let expected = self.ctrls[default_index].label_types();

        let mut targets = Vec::with_capacity(labels.len());
        for &depth in labels {
            let index = self.frame_index(OPCODE, depth)?;
            let actual = self.ctrls[index].label_types();
            if actual != expected {
                return Err(ValidationError::LabelTypeMismatch {
                    opcode: OPCODE,
                    expected,
                    actual,
                }
                .into());
            }
            targets.push(index);
        }

        let height = self.vals.len();
        if let Some(t) = expected.result() {
            self.pop_expected(OPCODE, t)?;
        }

        let mut entries = Vec::with_capacity(targets.len());
        let mut trampolines = vec![];
        for index in targets {
            let fixups = self.branch_fixups(index, height);
            let target = self.ctrls[index].label;
            if fixups.is_empty() {
                entries.push(target);
            } else {
                let trampoline = self.define_label();
                entries.push(trampoline);
                trampolines.push((trampoline, fixups, target));
            }
        }
        self.emit(HostOp::Switch(entries));
        let default_target = self.ctrls[default_index].label;
        for op in self.branch_fixups(default_index, height) {
            self.emit(op);
        }
        self.emit(HostOp::Br(default_target));
        for (trampoline, fixups, target) in trampolines {
            self.mark_label(trampoline);
            for op in fixups {
                self.emit(op);
            }
            self.emit(HostOp::Br(target));
        }
        self.mark_unreachable();
        Ok(())
    }

    pub fn return_(&mut self) -> Result<(), CompileError> {
        let returns = self.signature.returns.clone();
        self.pop_expecteds("return", &returns)?;
        if !self.is_unreachable() {
            let extra = self.available();
            if extra != 0 {
                return Err(ValidationError::StackSizeIncorrect {
                    opcode: "return",
                    expected: returns.len(),
                    actual: returns.len() + extra,
                }
                .into());
            }
        }
        self.emit(HostOp::Ret);
        self.mark_unreachable();
        Ok(())
    }

    pub fn throw(&mut self, tag: u32) -> Result<(), CompileError> {
        let parameters = self.env.tag(tag)?.parameters.clone();
        self.pop_expecteds("throw", &parameters)?;
        self.emit(HostOp::Throw(tag));
        self.mark_unreachable();
        Ok(())
    }

    pub fn rethrow(&mut self, depth: u32) -> Result<(), CompileError> {
        let index = self.frame_index("rethrow", depth)?;
        if self.ctrls[index].kind != BlockKind::Catch {
            return Err(ValidationError::InvalidRethrowTarget {
                opcode: "rethrow",
                depth,
            }
            .into());
        }
        let inner = self.ctrls[index + 1..]
            .iter()
            .filter(|c| c.kind == BlockKind::Catch)
            .count() as u32;
        self.emit(HostOp::Rethrow(inner));
        self.mark_unreachable();
        Ok(())
    }
}
