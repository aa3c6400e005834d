//! Module instances
//!
//! Instantiation binds every import through an [`ImportResolver`], checking
//! its shape against the declaration, then creates the memory and table the
//! module defines, evaluates global initializers, applies active element and
//! data segments and finally runs the start function. Any failure abandons the
//! instance.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use log::debug;

use super::machine;
use super::{
    FunctionRef, FunctionTable, GlobalSlot, ImportError, ImportResolver, InstantiationError,
    LinearMemory, RuntimeImport, Trap, Value,
};
use crate::compiler::assembler::{CompiledModule, SegmentMode};
use crate::compiler::emitter::{HostFunction, HostOp};
use crate::parser::module::{Export, ExternalKind, Import, ImportKind, Limits, Signature};

/// State shared by an instance and the callables it hands out.
pub(crate) struct InstanceData {
    pub(crate) types: Vec<Signature>,
    imported: Vec<FunctionRef>,
    functions: Vec<HostFunction>,
    pub(crate) helpers: Vec<HostFunction>,
    pub(crate) tags: Vec<Signature>,
    memory: Option<Rc<RefCell<LinearMemory>>>,
    table: Option<Rc<RefCell<FunctionTable>>>,
    globals: Vec<Rc<GlobalSlot>>,
    /// Segment contents; `None` once dropped
    pub(crate) data: RefCell<Vec<Option<Vec<u8>>>>,
    pub(crate) elements: RefCell<Vec<Option<Vec<u32>>>>,
    exports: Vec<Export>,
    pub(crate) depth: Cell<usize>,
    pub(crate) max_call_depth: usize,
    this: Weak<InstanceData>,
}

impl InstanceData {
    pub(crate) fn memory(&self) -> Result<&Rc<RefCell<LinearMemory>>, Trap> {
        self.memory
            .as_ref()
            .ok_or_else(|| Trap::Machine("no memory".into()))
    }

    pub(crate) fn table(&self) -> Result<&Rc<RefCell<FunctionTable>>, Trap> {
        self.table
            .as_ref()
            .ok_or_else(|| Trap::Machine("no table".into()))
    }

    pub(crate) fn global(&self, index: u32) -> Result<&GlobalSlot, Trap> {
        self.globals
            .get(index as usize)
            .map(|g| g.as_ref())
            .ok_or_else(|| Trap::Machine(format!("no global {index}")))
    }

    pub(crate) fn function_signature(&self, index: u32) -> Result<&Signature, Trap> {
        let i = index as usize;
        match self.imported.get(i) {
            Some(import) => Ok(&import.signature),
            None => self
                .functions
                .get(i - self.imported.len())
                .map(|f| &f.signature)
                .ok_or_else(|| Trap::Machine(format!("no function {index}"))),
        }
    }

    pub(crate) fn callee(&self, index: u32) -> Result<Callee<'_>, Trap> {
        let i = index as usize;
        match self.imported.get(i) {
            Some(import) => Ok(Callee::Host(import)),
            None => self
                .functions
                .get(i - self.imported.len())
                .map(Callee::Defined)
                .ok_or_else(|| Trap::Machine(format!("no function {index}"))),
        }
    }

    /// Index of `function` if this instance defines it.
    pub(crate) fn defined_index(&self, function: &FunctionRef) -> Option<u32> {
        match &function.origin {
            Some((instance, index)) if Weak::ptr_eq(instance, &self.this) => Some(*index),
            _ => None,
        }
    }

    pub(crate) fn call_function(&self, index: u32, args: &[Value]) -> Result<Vec<Value>, Trap> {
        match self.callee(index)? {
            Callee::Host(import) => import.call(args),
            Callee::Defined(function) => machine::execute(self, function, args),
        }
    }

    /// A table entry for function `index`. Defined functions refer back to the
    /// instance weakly, so a table never keeps its own instance alive.
    pub(crate) fn function_ref(&self, index: u32) -> Result<FunctionRef, Trap> {
        if let Some(import) = self.imported.get(index as usize) {
            return Ok(import.clone());
        }
        let signature = self.function_signature(index)?.clone();
        let instance = self.this.clone();
        Ok(FunctionRef::new(signature, move |args| {
            instance
                .upgrade()
                .ok_or_else(|| Trap::Machine("instance has been dropped".into()))?
                .call_function(index, args)
        })
        .with_origin(self.this.clone(), index))
    }
}

/// Target of a direct call.
pub(crate) enum Callee<'a> {
    Host(&'a FunctionRef),
    Defined(&'a HostFunction),
}

/// Evaluate a compiled initializer expression.
fn evaluate(initializer: &HostFunction, globals: &[Rc<GlobalSlot>]) -> Result<Value, Trap> {
    let mut value = None;
    for op in &initializer.ops {
        value = match op {
            HostOp::LdcI4(v) => Some(Value::I32(*v)),
            HostOp::LdcI8(v) => Some(Value::I64(*v)),
            HostOp::LdcR4(v) => Some(Value::F32(*v)),
            HostOp::LdcR8(v) => Some(Value::F64(*v)),
            HostOp::GlobalGet(i) => Some(
                globals
                    .get(*i as usize)
                    .ok_or_else(|| Trap::Machine(format!("no global {i}")))?
                    .get(),
            ),
            HostOp::Ret => break,
            other => {
                return Err(Trap::Machine(format!(
                    "{other} in initializer {}",
                    initializer.name
                )))
            }
        };
    }
    value.ok_or_else(|| Trap::Machine(format!("initializer {} is empty", initializer.name)))
}

fn offset_of(initializer: &HostFunction, globals: &[Rc<GlobalSlot>]) -> Result<u32, Trap> {
    match evaluate(initializer, globals)? {
        Value::I32(v) => Ok(v as u32),
        other => Err(Trap::Machine(format!("segment offset {other} is not an i32"))),
    }
}

fn mismatch(import: &Import, expected: impl ToString, actual: impl ToString) -> InstantiationError {
    ImportError::Mismatch {
        module: import.module.clone(),
        field: import.field.clone(),
        expected: expected.to_string(),
        actual: actual.to_string(),
    }
    .into()
}

#[derive(Default)]
struct Bindings {
    functions: Vec<FunctionRef>,
    memory: Option<Rc<RefCell<LinearMemory>>>,
    table: Option<Rc<RefCell<FunctionTable>>>,
    globals: Vec<Rc<GlobalSlot>>,
}

fn bind_imports(
    imports: &[Import],
    types: &[Signature],
    resolver: &dyn ImportResolver,
) -> Result<Bindings, InstantiationError> {
    let mut bindings = Bindings::default();
    for import in imports {
        // tags need no host binding
        if let ImportKind::Tag(_) = import.kind {
            continue;
        }
        let provided = resolver
            .resolve(&import.module, &import.field)
            .ok_or_else(|| ImportError::Missing {
                module: import.module.clone(),
                field: import.field.clone(),
            })?;

        match (&import.kind, provided) {
            (ImportKind::Function { type_index }, RuntimeImport::Function(f)) => {
                let expected = types.get(*type_index as usize).ok_or_else(|| {
                    InstantiationError::Resource(format!("missing type {type_index}"))
                })?;
                if !f.signature.same_shape(expected) {
                    return Err(mismatch(import, expected, &f.signature));
                }
                bindings.functions.push(f);
            }
            (ImportKind::Memory(declared), RuntimeImport::Memory(m)) => {
                let actual = {
                    let memory = m.borrow();
                    Limits {
                        minimum: memory.size(),
                        maximum: memory.maximum(),
                    }
                };
                if !actual.satisfies(declared) {
                    return Err(mismatch(import, declared, actual));
                }
                bindings.memory = Some(m);
            }
            (ImportKind::Table(declared), RuntimeImport::Table(t)) => {
                let actual = {
                    let table = t.borrow();
                    Limits {
                        minimum: table.size(),
                        maximum: table.limits().maximum,
                    }
                };
                if !actual.satisfies(&declared.limits) {
                    return Err(mismatch(import, declared.limits, actual));
                }
                bindings.table = Some(t);
            }
            (ImportKind::Global(declared), RuntimeImport::Global(g)) => {
                if g.global_type() != *declared {
                    return Err(mismatch(import, declared, g.global_type()));
                }
                bindings.globals.push(g);
            }
            (kind, provided) => {
                let expected = match kind {
                    ImportKind::Function { .. } => "function",
                    ImportKind::Table(_) => "table",
                    ImportKind::Memory(_) => "memory",
                    ImportKind::Global(_) => "global",
                    ImportKind::Tag(_) => "tag",
                };
                return Err(mismatch(import, expected, provided.kind()));
            }
        }
        debug!("bound import {}::{}", import.module, import.field);
    }
    Ok(bindings)
}

/// An instantiated module.
#[derive(Clone)]
pub struct Instance {
    data: Rc<InstanceData>,
}

impl Instance {
    pub(crate) fn new(
        module: &CompiledModule,
        resolver: &dyn ImportResolver,
    ) -> Result<Instance, InstantiationError> {
        let env = &module.env;
        let mut bindings = bind_imports(&module.imports, &env.types, resolver)?;

        let memory = match (bindings.memory.take(), env.memory) {
            (Some(imported), _) => Some(imported),
            (None, Some(limits)) => {
                debug!("creating memory {limits}");
                Some(Rc::new(RefCell::new(LinearMemory::new(
                    limits.minimum,
                    limits.maximum,
                )?)))
            }
            (None, None) => None,
        };
        let table = match (bindings.table.take(), env.table) {
            (Some(imported), _) => Some(imported),
            (None, Some(table)) => {
                debug!("creating table {}", table.limits);
                Some(Rc::new(RefCell::new(FunctionTable::new(table.limits)?)))
            }
            (None, None) => None,
        };

        let mut globals = bindings.globals;
        for global in &module.globals {
            let value = evaluate(&global.initializer, &globals)?;
            let slot = if global.global_type.mutable {
                GlobalSlot::mutable(value)
            } else {
                GlobalSlot::immutable(value)
            };
            globals.push(Rc::new(slot));
        }

        let data = module
            .data
            .iter()
            .map(|s| match s.mode {
                SegmentMode::Declarative => None,
                _ => Some(s.bytes.clone()),
            })
            .collect();
        let elements = module
            .elements
            .iter()
            .map(|s| match s.mode {
                SegmentMode::Declarative => None,
                _ => Some(s.functions.clone()),
            })
            .collect();

        let instance = Rc::new_cyclic(|this| InstanceData {
            types: env.types.clone(),
            imported: bindings.functions,
            functions: module.functions.clone(),
            helpers: module.helpers.clone(),
            tags: env.tags.clone(),
            memory,
            table,
            globals,
            data: RefCell::new(data),
            elements: RefCell::new(elements),
            exports: module.exports.clone(),
            depth: Cell::new(0),
            max_call_depth: module.config.max_call_depth,
            this: this.clone(),
        });

        for (i, segment) in module.elements.iter().enumerate() {
            let SegmentMode::Active { offset } = &segment.mode else {
                continue;
            };
            let start = offset_of(offset, &instance.globals)?;
            let table = instance.table()?;
            let end = start as u64 + segment.functions.len() as u64;
            let size = table.borrow().size() as u64;
            if end > size {
                let delta = u32::try_from(end - size).map_err(|_| Trap::TableSizeExceeded)?;
                table.borrow_mut().grow(delta)?;
            }
            let entries = segment
                .functions
                .iter()
                .map(|function| instance.function_ref(*function).map(Some))
                .collect::<Result<Vec<_>, _>>()?;
            table.borrow_mut().write(start, entries)?;
            instance.elements.borrow_mut()[i] = None;
            debug!(
                "element segment {i}: {} entries at {start}",
                segment.functions.len()
            );
        }

        for (i, segment) in module.data.iter().enumerate() {
            let SegmentMode::Active { offset } = &segment.mode else {
                continue;
            };
            let start = offset_of(offset, &instance.globals)?;
            instance
                .memory()?
                .borrow_mut()
                .write_bytes(start as u64, &segment.bytes)?;
            instance.data.borrow_mut()[i] = None;
            debug!("data segment {i}: {} bytes at {start}", segment.bytes.len());
        }

        if let Some(start) = module.start {
            debug!("running start function {start}");
            instance.call_function(start, &[])?;
        }

        Ok(Instance { data: instance })
    }

    /// Call an exported function.
    pub fn invoke(&self, name: &str, args: &[Value]) -> Result<Vec<Value>, Trap> {
        let function = self
            .function(name)
            .ok_or_else(|| Trap::Host(format!("no exported function {name:?}")))?;
        debug!("invoking {name}");
        function.call(args)
    }

    fn export(&self, name: &str, kind: ExternalKind) -> Option<u32> {
        self.data
            .exports
            .iter()
            .find(|e| e.name == name && e.kind == kind)
            .map(|e| e.index)
    }

    /// An exported function as a host callable.
    pub fn function(&self, name: &str) -> Option<FunctionRef> {
        let index = self.export(name, ExternalKind::Function)?;
        if let Some(import) = self.data.imported.get(index as usize) {
            return Some(import.clone());
        }
        let signature = self.data.function_signature(index).ok()?.clone();
        let data = self.data.clone();
        Some(FunctionRef::new(signature, move |args| {
            data.call_function(index, args)
        }))
    }

    pub fn memory(&self, name: &str) -> Option<Rc<RefCell<LinearMemory>>> {
        self.export(name, ExternalKind::Memory)?;
        self.data.memory.clone()
    }

    pub fn table(&self, name: &str) -> Option<Rc<RefCell<FunctionTable>>> {
        self.export(name, ExternalKind::Table)?;
        self.data.table.clone()
    }

    pub fn global(&self, name: &str) -> Option<Rc<GlobalSlot>> {
        let index = self.export(name, ExternalKind::Global)?;
        self.data.globals.get(index as usize).cloned()
    }

    pub fn exports(&self) -> &[Export] {
        &self.data.exports
    }
}
