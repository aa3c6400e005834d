//! Import resolution
//!
//! Instantiation asks an [`ImportResolver`] for every import by its
//! `(module, field)` pair. [`ImportObject`] is the map-backed resolver most
//! embedders need; memories and tables are shared handles so that the
//! embedder keeps access to what it provides.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use super::{FunctionRef, FunctionTable, GlobalSlot, LinearMemory, Trap, Value};
use crate::parser::module::Signature;

/// A host-provided binding for one import.
#[derive(Clone)]
pub enum RuntimeImport {
    Function(FunctionRef),
    Memory(Rc<RefCell<LinearMemory>>),
    Table(Rc<RefCell<FunctionTable>>),
    Global(Rc<GlobalSlot>),
}

impl RuntimeImport {
    /// Kind name for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            RuntimeImport::Function(_) => "function",
            RuntimeImport::Memory(_) => "memory",
            RuntimeImport::Table(_) => "table",
            RuntimeImport::Global(_) => "global",
        }
    }
}

/// Supplies imports during instantiation.
pub trait ImportResolver {
    fn resolve(&self, module: &str, field: &str) -> Option<RuntimeImport>;
}

#[derive(Clone, Default)]
pub struct ImportObject {
    entries: HashMap<(String, String), RuntimeImport>,
}

impl ImportObject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, module: impl Into<String>, field: impl Into<String>, import: RuntimeImport) {
        self.entries.insert((module.into(), field.into()), import);
    }

    /// Add a host function.
    pub fn add_function(
        &mut self,
        module: impl Into<String>,
        field: impl Into<String>,
        signature: Signature,
        callable: impl Fn(&[Value]) -> Result<Vec<Value>, Trap> + 'static,
    ) {
        self.add(
            module,
            field,
            RuntimeImport::Function(FunctionRef::new(signature, callable)),
        );
    }

    pub fn add_memory(
        &mut self,
        module: impl Into<String>,
        field: impl Into<String>,
        memory: Rc<RefCell<LinearMemory>>,
    ) {
        self.add(module, field, RuntimeImport::Memory(memory));
    }

    pub fn add_table(
        &mut self,
        module: impl Into<String>,
        field: impl Into<String>,
        table: Rc<RefCell<FunctionTable>>,
    ) {
        self.add(module, field, RuntimeImport::Table(table));
    }

    pub fn add_global(&mut self, module: impl Into<String>, field: impl Into<String>, global: Rc<GlobalSlot>) {
        self.add(module, field, RuntimeImport::Global(global));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ImportResolver for ImportObject {
    fn resolve(&self, module: &str, field: &str) -> Option<RuntimeImport> {
        self.entries
            .get(&(module.to_string(), field.to_string()))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::module::ValueType;

    #[test]
    fn test_resolve_by_pair() {
        let mut imports = ImportObject::new();
        imports.add_function(
            "env",
            "one",
            Signature::new(vec![], vec![ValueType::I32]),
            |_| Ok(vec![Value::I32(1)]),
        );
        imports.add_global("env", "g", Rc::new(GlobalSlot::immutable(Value::I64(3))));
        assert_eq!(imports.len(), 2);

        assert!(matches!(
            imports.resolve("env", "one"),
            Some(RuntimeImport::Function(_))
        ));
        assert_eq!(imports.resolve("env", "g").map(|i| i.kind()), Some("global"));
        assert!(imports.resolve("env", "two").is_none());
        assert!(imports.resolve("other", "one").is_none());
    }

    #[test]
    fn test_memory_is_shared() {
        let memory = Rc::new(RefCell::new(LinearMemory::new(1, None).unwrap()));
        let mut imports = ImportObject::new();
        imports.add_memory("env", "memory", memory.clone());
        if let Some(RuntimeImport::Memory(m)) = imports.resolve("env", "memory") {
            m.borrow_mut().write_u8(0, 42).unwrap();
        }
        assert_eq!(memory.borrow().read_u8(0).unwrap(), 42);
    }
}
