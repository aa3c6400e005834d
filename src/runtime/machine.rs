//! Host machine
//!
//! Runs [`HostFunction`] programs. Each activation has its own operand stack,
//! locals, exception handler list and caught-exception list; branches jump to
//! resolved label positions and `Ret` hands the top `arity` values back to the
//! caller.
//!
//! Calls between functions of one instance, including helpers and table
//! entries the instance defines, push an activation onto a heap-allocated
//! stack instead of recursing, so `max_call_depth` is bounded by memory rather
//! than the host thread's stack. Only host callables are called natively.
//!
//! A [`WasmException`] raised by `Throw`, `Rethrow`, `ResumeUnwind` or by a
//! callee is delivered to the innermost handler of the current activation,
//! which restores the operand stack and caught list to their heights at
//! `TryEnter` and jumps to the handler code. With no handler left it
//! propagates to the caller's activation, and out as [`Trap::Exception`] once
//! none remain. Every other trap unwinds all activations.

use std::cell::Cell;

use log::trace;

use super::instance::{Callee, InstanceData};
use super::{Trap, Value, WasmException};
use crate::compiler::emitter::{Conversion, HostFunction, HostOp, Label, MathOp};
use crate::parser::module::ValueType;

/// Counts the activations one `execute` adds to its instance's depth, and
/// gives them back when it returns or unwinds.
struct DepthGuard<'a> {
    depth: &'a Cell<usize>,
    max: usize,
    entered: usize,
}

impl<'a> DepthGuard<'a> {
    fn new(depth: &'a Cell<usize>, max: usize) -> DepthGuard<'a> {
        DepthGuard {
            depth,
            max,
            entered: 0,
        }
    }

    fn enter(&mut self) -> Result<(), Trap> {
        if self.depth.get() >= self.max {
            return Err(Trap::CallStackExhausted);
        }
        self.depth.set(self.depth.get() + 1);
        self.entered += 1;
        Ok(())
    }

    fn leave(&mut self) {
        self.depth.set(self.depth.get() - 1);
        self.entered -= 1;
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.depth.set(self.depth.get() - self.entered);
    }
}

/// What the current activation does after one operation.
enum Flow<'a> {
    Next,
    Return,
    Enter(&'a HostFunction, Vec<Value>),
}

#[derive(Debug, Clone, Copy)]
struct Handler {
    target: usize,
    height: usize,
    caught: usize,
}

struct Frame<'f> {
    function: &'f HostFunction,
    locals: Vec<Value>,
    stack: Vec<Value>,
    handlers: Vec<Handler>,
    caught: Vec<WasmException>,
    pending: Option<WasmException>,
    pc: usize,
}

fn fault(message: impl Into<String>) -> Trap {
    Trap::Machine(message.into())
}

impl<'f> Frame<'f> {
    fn new(function: &'f HostFunction, args: &[Value]) -> Result<Frame<'f>, Trap> {
        if args.len() != function.signature.parameters.len() {
            return Err(fault(format!(
                "{} takes {} arguments, {} given",
                function.name,
                function.signature.parameters.len(),
                args.len()
            )));
        }
        let mut locals = Vec::with_capacity(args.len() + function.locals.len());
        locals.extend_from_slice(args);
        locals.extend(function.locals.iter().map(|t| Value::default_for(*t)));
        Ok(Frame {
            function,
            locals,
            stack: Vec::with_capacity(16),
            handlers: vec![],
            caught: vec![],
            pending: None,
            pc: 0,
        })
    }

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Result<Value, Trap> {
        self.stack
            .pop()
            .ok_or_else(|| fault(format!("operand stack underflow in {}", self.function.name)))
    }

    fn pop_n(&mut self, n: usize) -> Result<Vec<Value>, Trap> {
        if self.stack.len() < n {
            return Err(fault(format!(
                "{} needs {n} operands, {} available",
                self.function.name,
                self.stack.len()
            )));
        }
        Ok(self.stack.split_off(self.stack.len() - n))
    }

    fn pop_i32(&mut self) -> Result<i32, Trap> {
        match self.pop()? {
            Value::I32(v) => Ok(v),
            other => Err(fault(format!("expected i32, found {other}"))),
        }
    }

    fn pop_i64(&mut self) -> Result<i64, Trap> {
        match self.pop()? {
            Value::I64(v) => Ok(v),
            other => Err(fault(format!("expected i64, found {other}"))),
        }
    }

    /// Pop `n`, then `source`, then `destination` of a bulk operation.
    fn pop_bulk(&mut self) -> Result<(u64, u64, u64), Trap> {
        let n = self.pop_i32()? as u32 as u64;
        let source = self.pop_i32()? as u32 as u64;
        let destination = self.pop_i32()? as u32 as u64;
        Ok((destination, source, n))
    }

    fn local(&self, index: usize) -> Result<Value, Trap> {
        self.locals
            .get(index)
            .copied()
            .ok_or_else(|| fault(format!("no local {index} in {}", self.function.name)))
    }

    fn set_local(&mut self, index: usize) -> Result<(), Trap> {
        let value = self.pop()?;
        let slot = self
            .locals
            .get_mut(index)
            .ok_or_else(|| fault(format!("no local {index}")))?;
        *slot = value;
        Ok(())
    }

    fn jump(&mut self, label: Label) -> Result<(), Trap> {
        self.pc = self
            .function
            .target(label)
            .ok_or_else(|| fault(format!("unresolved label {label:?}")))?;
        Ok(())
    }

    /// Deliver an exception to the innermost handler, handing it back when
    /// there is none.
    fn raise(&mut self, exception: WasmException) -> Result<(), WasmException> {
        match self.handlers.pop() {
            Some(handler) => {
                trace!("{} catching {exception}", self.function.name);
                self.stack.truncate(handler.height);
                self.caught.truncate(handler.caught);
                self.pending = Some(exception);
                self.pc = handler.target;
                Ok(())
            }
            None => Err(exception),
        }
    }
}

/// Run `function` of `instance` with `args`.
pub(crate) fn execute<'a>(
    instance: &'a InstanceData,
    function: &'a HostFunction,
    args: &[Value],
) -> Result<Vec<Value>, Trap> {
    let mut depth = DepthGuard::new(&instance.depth, instance.max_call_depth);
    depth.enter()?;
    let mut frames = vec![Frame::new(function, args)?];

    while let Some(frame) = frames.last_mut() {
        let function = frame.function;
        let op = function
            .ops
            .get(frame.pc)
            .ok_or_else(|| fault(format!("{} ran past its last operation", function.name)))?;
        trace!("{} {:4} {}", function.name, frame.pc, op);
        frame.pc += 1;

        match step(instance, frame, op) {
            Ok(Flow::Next) => {}
            Ok(Flow::Enter(callee, args)) => {
                depth.enter()?;
                frames.push(Frame::new(callee, &args)?);
            }
            Ok(Flow::Return) => {
                let results = frame.pop_n(function.arity())?;
                frames.pop();
                depth.leave();
                match frames.last_mut() {
                    Some(caller) => caller.stack.extend(results),
                    None => return Ok(results),
                }
            }
            Err(Trap::Exception(mut exception)) => loop {
                // unwind activations until one has a handler
                let Some(frame) = frames.last_mut() else {
                    return Err(Trap::Exception(exception));
                };
                match frame.raise(exception) {
                    Ok(()) => break,
                    Err(unhandled) => {
                        frames.pop();
                        depth.leave();
                        exception = unhandled;
                    }
                }
            },
            Err(trap) => return Err(trap),
        }
    }
    Err(fault(format!("{} returned without results", function.name)))
}

/// Execute one operation of the current activation.
fn step<'a>(
    instance: &'a InstanceData,
    frame: &mut Frame<'a>,
    op: &'a HostOp,
) -> Result<Flow<'a>, Trap> {
    let parameters = frame.function.signature.parameters.len();
    match op {
        HostOp::Nop | HostOp::Unaligned(_) => {}
        HostOp::LdcI4(v) => frame.push(Value::I32(*v)),
        HostOp::LdcI8(v) => frame.push(Value::I64(*v)),
        HostOp::LdcR4(v) => frame.push(Value::F32(*v)),
        HostOp::LdcR8(v) => frame.push(Value::F64(*v)),
        HostOp::LdArg(i) => {
            let value = frame.local(*i as usize)?;
            frame.push(value);
        }
        HostOp::StArg(i) => frame.set_local(*i as usize)?,
        HostOp::LdLoc(id) => {
            let value = frame.local(parameters + id.0 as usize)?;
            frame.push(value);
        }
        HostOp::StLoc(id) => frame.set_local(parameters + id.0 as usize)?,
        HostOp::Dup => {
            let value = frame.pop()?;
            frame.push(value);
            frame.push(value);
        }
        HostOp::Pop => {
            frame.pop()?;
        }

        HostOp::Add
        | HostOp::Sub
        | HostOp::Mul
        | HostOp::Div
        | HostOp::DivUn
        | HostOp::Rem
        | HostOp::RemUn
        | HostOp::And
        | HostOp::Or
        | HostOp::Xor => {
            let b = frame.pop()?;
            let a = frame.pop()?;
            frame.push(arithmetic(op, a, b)?);
        }
        HostOp::Shl | HostOp::Shr | HostOp::ShrUn => {
            let count = frame.pop_i32()? as u32;
            let value = frame.pop()?;
            frame.push(shift(op, value, count)?);
        }
        HostOp::Neg => {
            let value = match frame.pop()? {
                Value::I32(v) => Value::I32(v.wrapping_neg()),
                Value::I64(v) => Value::I64(v.wrapping_neg()),
                Value::F32(v) => Value::F32(-v),
                Value::F64(v) => Value::F64(-v),
            };
            frame.push(value);
        }
        HostOp::Ceq | HostOp::Clt | HostOp::CltUn | HostOp::Cgt | HostOp::CgtUn => {
            let b = frame.pop()?;
            let a = frame.pop()?;
            frame.push(Value::I32(compare(op, a, b)? as i32));
        }
        HostOp::Math(m) => {
            let value = match m {
                MathOp::Min | MathOp::Max => {
                    let b = frame.pop()?;
                    let a = frame.pop()?;
                    min_max(*m, a, b)?
                }
                _ => math(*m, frame.pop()?)?,
            };
            frame.push(value);
        }
        HostOp::Conv(c) => {
            let value = convert(*c, frame.pop()?)?;
            frame.push(value);
        }

        HostOp::Br(label) => frame.jump(*label)?,
        HostOp::BrTrue(label) => {
            if frame.pop_i32()? != 0 {
                frame.jump(*label)?;
            }
        }
        HostOp::BrFalse(label) => {
            if frame.pop_i32()? == 0 {
                frame.jump(*label)?;
            }
        }
        HostOp::Switch(labels) => {
            let index = frame.pop_i32()? as u32 as usize;
            if let Some(label) = labels.get(index) {
                frame.jump(*label)?;
            }
        }
        HostOp::Unwind { height, keep } => {
            let kept = frame.pop_n(*keep as usize)?;
            frame.stack.truncate(*height as usize);
            frame.stack.extend(kept);
        }
        HostOp::Leave { handlers, caught } => {
            frame.handlers.truncate(*handlers as usize);
            frame.caught.truncate(*caught as usize);
        }
        HostOp::Call(index) => {
            let arity = instance.function_signature(*index)?.parameters.len();
            let args = frame.pop_n(arity)?;
            match instance.callee(*index)? {
                Callee::Defined(callee) => return Ok(Flow::Enter(callee, args)),
                Callee::Host(callee) => {
                    let results = callee.call(&args)?;
                    frame.stack.extend(results);
                }
            }
        }
        HostOp::CallIndirect(type_index) => {
            let element = frame.pop_i32()? as u32;
            let expected = instance
                .types
                .get(*type_index as usize)
                .ok_or_else(|| fault(format!("no type {type_index}")))?;
            let callee = instance.table()?.borrow().resolve(element, expected)?;
            let args = frame.pop_n(expected.parameters.len())?;
            if let Some(index) = instance.defined_index(&callee) {
                if let Callee::Defined(function) = instance.callee(index)? {
                    return Ok(Flow::Enter(function, args));
                }
            }
            let results = callee.call(&args)?;
            frame.stack.extend(results);
        }
        HostOp::CallHelper(id) => {
            let helper = instance
                .helpers
                .get(id.0 as usize)
                .ok_or_else(|| fault(format!("no helper {}", id.0)))?;
            let args = frame.pop_n(helper.signature.parameters.len())?;
            return Ok(Flow::Enter(helper, args));
        }
        HostOp::Ret => return Ok(Flow::Return),
        HostOp::Unreachable => return Err(Trap::Unreachable),

        HostOp::CheckRange { offset, length } => {
            let address = frame.pop_i32()? as u32 as u64 + *offset as u64;
            instance.memory()?.borrow().check_range(address, *length as u64)?;
            frame.push(Value::I64(address as i64));
        }
        HostOp::Load {
            value_type,
            bytes,
            signed,
        } => {
            let address = frame.pop_i64()? as u64;
            let value = instance
                .memory()?
                .borrow()
                .load(address, *value_type, *bytes, *signed)?;
            frame.push(value);
        }
        HostOp::Store { bytes } => {
            let value = frame.pop()?;
            let address = frame.pop_i64()? as u64;
            instance.memory()?.borrow_mut().store(address, *bytes, value)?;
        }
        HostOp::MemorySize => {
            let pages = instance.memory()?.borrow().size();
            frame.push(Value::I32(pages as i32));
        }
        HostOp::MemoryGrow => {
            let delta = frame.pop_i32()? as u32;
            let previous = instance.memory()?.borrow_mut().grow(delta);
            frame.push(Value::I32(previous));
        }
        HostOp::MemoryInit(segment) => {
            let (destination, source, n) = frame.pop_bulk()?;
            let data = instance.data.borrow();
            let bytes = data
                .get(*segment as usize)
                .ok_or_else(|| fault(format!("no data segment {segment}")))?
                .as_deref()
                .unwrap_or_default();
            let end = source + n;
            if end > bytes.len() as u64 {
                return Err(Trap::MemoryAccessOutOfRange {
                    offset: source,
                    length: n,
                });
            }
            instance
                .memory()?
                .borrow_mut()
                .write_bytes(destination, &bytes[source as usize..end as usize])?;
        }
        HostOp::DataDrop(segment) => {
            if let Some(slot) = instance.data.borrow_mut().get_mut(*segment as usize) {
                *slot = None;
            }
        }
        HostOp::MemoryCopy => {
            let (destination, source, n) = frame.pop_bulk()?;
            instance
                .memory()?
                .borrow_mut()
                .copy_within(destination, source, n)?;
        }
        HostOp::MemoryFill => {
            let n = frame.pop_i32()? as u32 as u64;
            let value = frame.pop_i32()? as u8;
            let destination = frame.pop_i32()? as u32 as u64;
            instance.memory()?.borrow_mut().fill(destination, value, n)?;
        }
        HostOp::TableInit(segment) => {
            let (destination, source, n) = frame.pop_bulk()?;
            let functions: Vec<u32> = {
                let elements = instance.elements.borrow();
                let entries = elements
                    .get(*segment as usize)
                    .ok_or_else(|| fault(format!("no element segment {segment}")))?
                    .as_deref()
                    .unwrap_or_default();
                if source + n > entries.len() as u64 {
                    return Err(Trap::TableIndexOutOfBounds((source + n) as u32));
                }
                entries[source as usize..(source + n) as usize].to_vec()
            };
            let entries = functions
                .into_iter()
                .map(|function| instance.function_ref(function).map(Some))
                .collect::<Result<Vec<_>, _>>()?;
            instance.table()?.borrow_mut().write(destination as u32, entries)?;
        }
        HostOp::ElemDrop(segment) => {
            if let Some(slot) = instance.elements.borrow_mut().get_mut(*segment as usize) {
                *slot = None;
            }
        }
        HostOp::TableCopy => {
            let (destination, source, n) = frame.pop_bulk()?;
            instance
                .table()?
                .borrow_mut()
                .copy_within(destination as u32, source as u32, n as u32)?;
        }

        HostOp::GlobalGet(index) => {
            let value = instance.global(*index)?.get();
            frame.push(value);
        }
        HostOp::GlobalSet(index) => {
            let value = frame.pop()?;
            instance.global(*index)?.set(value)?;
        }

        HostOp::TryEnter(label) => {
            let target = frame
                .function
                .target(*label)
                .ok_or_else(|| fault(format!("unresolved handler {label:?}")))?;
            frame.handlers.push(Handler {
                target,
                height: frame.stack.len(),
                caught: frame.caught.len(),
            });
        }
        HostOp::TryLeave => {
            frame.handlers.pop();
        }
        HostOp::CatchTag { tag, otherwise } => {
            let matches = frame.pending.as_ref().map(|e| e.tag) == Some(*tag);
            if matches {
                if let Some(exception) = frame.pending.take() {
                    frame.stack.extend(exception.payload.iter().copied());
                    frame.caught.push(exception);
                }
            } else {
                frame.jump(*otherwise)?;
            }
        }
        HostOp::CatchAll => {
            let exception = frame
                .pending
                .take()
                .ok_or_else(|| fault("catch_all without a pending exception"))?;
            frame.caught.push(exception);
        }
        HostOp::EndCatch => {
            frame.caught.pop();
        }
        HostOp::Throw(tag) => {
            let arity = instance
                .tags
                .get(*tag as usize)
                .ok_or_else(|| fault(format!("no tag {tag}")))?
                .parameters
                .len();
            let payload = frame.pop_n(arity)?;
            return Err(Trap::Exception(WasmException { tag: *tag, payload }));
        }
        HostOp::Rethrow(n) => {
            let exception = frame
                .caught
                .len()
                .checked_sub(1 + *n as usize)
                .and_then(|i| frame.caught.get(i))
                .cloned()
                .ok_or_else(|| fault(format!("no caught exception {n}")))?;
            return Err(Trap::Exception(exception));
        }
        HostOp::ResumeUnwind => {
            let exception = frame
                .pending
                .take()
                .ok_or_else(|| fault("nothing to resume"))?;
            return Err(Trap::Exception(exception));
        }
    }
    Ok(Flow::Next)
}

fn mismatch(op: &HostOp, a: Value, b: Value) -> Trap {
    fault(format!("{op} on {} and {}", a.typ(), b.typ()))
}

macro_rules! integer {
    ($op:expr, $a:expr, $b:expr, |$x:ident, $y:ident| $body:expr) => {
        match ($a, $b) {
            (Value::I32($x), Value::I32($y)) => Value::I32($body),
            (Value::I64($x), Value::I64($y)) => Value::I64($body),
            (a, b) => return Err(mismatch($op, a, b)),
        }
    };
}

macro_rules! numeric {
    ($op:expr, $a:expr, $b:expr, |$x:ident, $y:ident| $int:expr, $float:expr) => {
        match ($a, $b) {
            (Value::I32($x), Value::I32($y)) => Value::I32($int),
            (Value::I64($x), Value::I64($y)) => Value::I64($int),
            (Value::F32($x), Value::F32($y)) => Value::F32($float),
            (Value::F64($x), Value::F64($y)) => Value::F64($float),
            (a, b) => return Err(mismatch($op, a, b)),
        }
    };
}

macro_rules! unsigned {
    ($op:expr, $a:expr, $b:expr, |$x:ident, $y:ident| $body:expr) => {
        match ($a, $b) {
            (Value::I32(x), Value::I32(y)) => {
                let ($x, $y) = (x as u32, y as u32);
                Value::I32($body as i32)
            }
            (Value::I64(x), Value::I64(y)) => {
                let ($x, $y) = (x as u64, y as u64);
                Value::I64($body as i64)
            }
            (a, b) => return Err(mismatch($op, a, b)),
        }
    };
}

fn is_zero(value: Value) -> bool {
    matches!(value, Value::I32(0) | Value::I64(0))
}

fn arithmetic(op: &HostOp, a: Value, b: Value) -> Result<Value, Trap> {
    let integer_division = matches!(op, HostOp::Div | HostOp::DivUn | HostOp::Rem | HostOp::RemUn);
    if integer_division && is_zero(b) {
        return Err(Trap::DivideByZero);
    }
    Ok(match op {
        HostOp::Add => numeric!(op, a, b, |x, y| x.wrapping_add(y), x + y),
        HostOp::Sub => numeric!(op, a, b, |x, y| x.wrapping_sub(y), x - y),
        HostOp::Mul => numeric!(op, a, b, |x, y| x.wrapping_mul(y), x * y),
        HostOp::Div => numeric!(
            op,
            a,
            b,
            |x, y| x.checked_div(y).ok_or(Trap::IntegerOverflow)?,
            x / y
        ),
        HostOp::DivUn => unsigned!(op, a, b, |x, y| x / y),
        HostOp::Rem => integer!(op, a, b, |x, y| x.wrapping_rem(y)),
        HostOp::RemUn => unsigned!(op, a, b, |x, y| x % y),
        HostOp::And => integer!(op, a, b, |x, y| x & y),
        HostOp::Or => integer!(op, a, b, |x, y| x | y),
        HostOp::Xor => integer!(op, a, b, |x, y| x ^ y),
        _ => return Err(fault(format!("{op} is not arithmetic"))),
    })
}

fn shift(op: &HostOp, value: Value, count: u32) -> Result<Value, Trap> {
    Ok(match (op, value) {
        (HostOp::Shl, Value::I32(v)) => Value::I32(v.wrapping_shl(count)),
        (HostOp::Shl, Value::I64(v)) => Value::I64(v.wrapping_shl(count)),
        (HostOp::Shr, Value::I32(v)) => Value::I32(v.wrapping_shr(count)),
        (HostOp::Shr, Value::I64(v)) => Value::I64(v.wrapping_shr(count)),
        (HostOp::ShrUn, Value::I32(v)) => Value::I32((v as u32).wrapping_shr(count) as i32),
        (HostOp::ShrUn, Value::I64(v)) => Value::I64((v as u64).wrapping_shr(count) as i64),
        (op, v) => return Err(fault(format!("{op} on {}", v.typ()))),
    })
}

fn compare(op: &HostOp, a: Value, b: Value) -> Result<bool, Trap> {
    macro_rules! ordered {
        ($x:expr, $y:expr) => {
            match op {
                HostOp::Ceq => $x == $y,
                HostOp::Clt => $x < $y,
                HostOp::Cgt => $x > $y,
                // true when unordered
                HostOp::CltUn => !($x >= $y),
                _ => !($x <= $y),
            }
        };
    }
    Ok(match (a, b) {
        (Value::I32(x), Value::I32(y)) => match op {
            HostOp::CltUn => (x as u32) < (y as u32),
            HostOp::CgtUn => (x as u32) > (y as u32),
            _ => ordered!(x, y),
        },
        (Value::I64(x), Value::I64(y)) => match op {
            HostOp::CltUn => (x as u64) < (y as u64),
            HostOp::CgtUn => (x as u64) > (y as u64),
            _ => ordered!(x, y),
        },
        (Value::F32(x), Value::F32(y)) => ordered!(x, y),
        (Value::F64(x), Value::F64(y)) => ordered!(x, y),
        (a, b) => return Err(mismatch(op, a, b)),
    })
}

macro_rules! float_unary {
    ($value:expr, |$x:ident| $body:expr) => {
        match $value {
            Value::F32($x) => Value::F32($body),
            Value::F64($x) => Value::F64($body),
            other => return Err(fault(format!("float operation on {}", other.typ()))),
        }
    };
}

fn math(op: MathOp, value: Value) -> Result<Value, Trap> {
    Ok(match op {
        MathOp::Abs => float_unary!(value, |x| x.abs()),
        MathOp::Ceil => float_unary!(value, |x| x.ceil()),
        MathOp::Floor => float_unary!(value, |x| x.floor()),
        MathOp::Trunc => float_unary!(value, |x| x.trunc()),
        MathOp::Nearest => float_unary!(value, |x| x.round_ties_even()),
        MathOp::Sqrt => float_unary!(value, |x| x.sqrt()),
        MathOp::Min | MathOp::Max => return Err(fault("min and max take two operands")),
    })
}

fn min_max(op: MathOp, a: Value, b: Value) -> Result<Value, Trap> {
    macro_rules! pick {
        ($x:expr, $y:expr) => {
            if $x.is_nan() || $y.is_nan() {
                $x + $y
            } else if $x == $y {
                // equal only differ in the sign of zero
                match (op, $x.is_sign_negative()) {
                    (MathOp::Min, true) | (MathOp::Max, false) => $x,
                    _ => $y,
                }
            } else if (op == MathOp::Min) == ($x < $y) {
                $x
            } else {
                $y
            }
        };
    }
    Ok(match (a, b) {
        (Value::F32(x), Value::F32(y)) => Value::F32(pick!(x, y)),
        (Value::F64(x), Value::F64(y)) => Value::F64(pick!(x, y)),
        (a, b) => return Err(fault(format!("{op:?} on {} and {}", a.typ(), b.typ()))),
    })
}

/// Float operand of a truncation, widened.
fn float_operand(value: Value) -> Result<f64, Trap> {
    match value {
        Value::F32(x) => Ok(x as f64),
        Value::F64(x) => Ok(x),
        other => Err(fault(format!("truncation of {}", other.typ()))),
    }
}

/// Exclusive bounds of the truncated values that fit the target.
fn trunc_bounds(to: ValueType, signed: bool) -> (f64, f64) {
    match (to, signed) {
        (ValueType::I32, true) => (-2147483649.0, 2147483648.0),
        (ValueType::I32, false) => (-1.0, 4294967296.0),
        (_, true) => (-9223372036854777856.0, 9223372036854775808.0),
        (_, false) => (-1.0, 18446744073709551616.0),
    }
}

fn truncate(x: f64, to: ValueType, signed: bool) -> Value {
    match (to, signed) {
        (ValueType::I32, true) => Value::I32(x as i32),
        (ValueType::I32, false) => Value::I32(x as u32 as i32),
        (_, true) => Value::I64(x as i64),
        (_, false) => Value::I64(x as u64 as i64),
    }
}

fn convert(conversion: Conversion, value: Value) -> Result<Value, Trap> {
    let unsupported = |value: Value| fault(format!("{conversion:?} of {}", value.typ()));
    Ok(match (conversion, value) {
        (Conversion::Wrap, Value::I64(v)) => Value::I32(v as i32),
        (Conversion::ExtendS, Value::I32(v)) => Value::I64(v as i64),
        (Conversion::ExtendU, Value::I32(v)) => Value::I64(v as u32 as i64),
        (Conversion::Extend8S, Value::I32(v)) => Value::I32(v as i8 as i32),
        (Conversion::Extend8S, Value::I64(v)) => Value::I64(v as i8 as i64),
        (Conversion::Extend16S, Value::I32(v)) => Value::I32(v as i16 as i32),
        (Conversion::Extend16S, Value::I64(v)) => Value::I64(v as i16 as i64),
        (Conversion::Extend32S, Value::I64(v)) => Value::I64(v as i32 as i64),
        (Conversion::ToF32 { signed }, Value::I32(v)) => {
            Value::F32(if signed { v as f32 } else { v as u32 as f32 })
        }
        (Conversion::ToF32 { signed }, Value::I64(v)) => {
            Value::F32(if signed { v as f32 } else { v as u64 as f32 })
        }
        (Conversion::ToF64 { signed }, Value::I32(v)) => {
            Value::F64(if signed { v as f64 } else { v as u32 as f64 })
        }
        (Conversion::ToF64 { signed }, Value::I64(v)) => {
            Value::F64(if signed { v as f64 } else { v as u64 as f64 })
        }
        (Conversion::Demote, Value::F64(v)) => Value::F32(v as f32),
        (Conversion::Promote, Value::F32(v)) => Value::F64(v as f64),
        (Conversion::TruncOverflow { to, signed }, v) => {
            let x = float_operand(v)?;
            let (low, high) = trunc_bounds(to, signed);
            if x.is_nan() || x <= low || x >= high {
                return Err(Trap::IntegerOverflow);
            }
            truncate(x, to, signed)
        }
        (Conversion::Truncate { to, signed }, v) => truncate(float_operand(v)?, to, signed),
        (Conversion::Bitcast(to), v) => match (to, v) {
            (ValueType::I32, Value::F32(x)) => Value::I32(x.to_bits() as i32),
            (ValueType::I64, Value::F64(x)) => Value::I64(x.to_bits() as i64),
            (ValueType::F32, Value::I32(x)) => Value::F32(f32::from_bits(x as u32)),
            (ValueType::F64, Value::I64(x)) => Value::F64(f64::from_bits(x as u64)),
            (_, v) => return Err(unsupported(v)),
        },
        (_, v) => return Err(unsupported(v)),
    })
}
