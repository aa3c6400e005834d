//! Runtime resources and the host machine
//!
//! Compiled modules are instantiated against an [`ImportResolver`], producing
//! an [`Instance`] that owns its linear memory, function table and globals.
//! Translated host programs run on the [`machine`], which reaches those
//! resources only through the instance's handles.

pub mod global;
pub mod imports;
pub mod instance;
pub mod machine;
pub mod memory;
pub mod table;
pub mod value;

use std::fmt;
use std::rc::{Rc, Weak};

pub use global::GlobalSlot;
pub use imports::{ImportObject, ImportResolver, RuntimeImport};
pub use instance::Instance;
pub use memory::LinearMemory;
pub use table::FunctionTable;
pub use value::Value;

use crate::parser::module::{Signature, ValueType};
use instance::InstanceData;

/// A raised WebAssembly exception.
#[derive(Debug, Clone, PartialEq)]
pub struct WasmException {
    pub tag: u32,
    pub payload: Vec<Value>,
}

impl fmt::Display for WasmException {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "tag {}", self.tag)?;
        if !self.payload.is_empty() {
            let payload: Vec<String> = self.payload.iter().map(|v| v.to_string()).collect();
            write!(f, " [{}]", payload.join(" "))?;
        }
        Ok(())
    }
}

/// Errors raised while translated code runs.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Trap {
    #[error("out of bounds memory access at offset {offset} with length {length}")]
    MemoryAccessOutOfRange { offset: u64, length: u64 },
    #[error("unreachable executed")]
    Unreachable,
    #[error("integer overflow")]
    IntegerOverflow,
    #[error("integer divide by zero")]
    DivideByZero,
    #[error("indirect call type mismatch: expected {expected}, got {actual}")]
    IndirectCallTypeMismatch { expected: String, actual: String },
    #[error("uninitialized element {0}")]
    UndefinedElement(u32),
    #[error("table index out of bounds: {0}")]
    TableIndexOutOfBounds(u32),
    #[error("table size exceeded")]
    TableSizeExceeded,
    #[error("global is immutable")]
    ImmutableGlobal,
    #[error("global type mismatch: expected {expected}, got {actual}")]
    GlobalTypeMismatch { expected: ValueType, actual: ValueType },
    #[error("call stack exhausted")]
    CallStackExhausted,
    #[error("uncaught exception: {0}")]
    Exception(WasmException),
    #[error("host error: {0}")]
    Host(String),
    /// An inconsistency in translated code, never raised by valid programs.
    #[error("machine fault: {0}")]
    Machine(String),
}

/// A host-callable function.
pub type HostCallable = Rc<dyn Fn(&[Value]) -> Result<Vec<Value>, Trap>>;

/// A callable with its signature: an import, an export or a table entry.
#[derive(Clone)]
pub struct FunctionRef {
    pub signature: Signature,
    pub callable: HostCallable,
    /// Defining instance and function index, for functions defined in wasm.
    pub(crate) origin: Option<(Weak<InstanceData>, u32)>,
}

impl FunctionRef {
    pub fn new(
        signature: Signature,
        callable: impl Fn(&[Value]) -> Result<Vec<Value>, Trap> + 'static,
    ) -> FunctionRef {
        FunctionRef {
            signature,
            callable: Rc::new(callable),
            origin: None,
        }
    }

    pub(crate) fn with_origin(mut self, instance: Weak<InstanceData>, index: u32) -> FunctionRef {
        self.origin = Some((instance, index));
        self
    }

    /// Call after checking the arguments against the signature.
    pub fn call(&self, args: &[Value]) -> Result<Vec<Value>, Trap> {
        let types: Vec<ValueType> = args.iter().map(|a| a.typ()).collect();
        if types != self.signature.parameters {
            return Err(Trap::Host(format!(
                "arguments [{}] do not match {}",
                types.iter().map(|t| t.to_string()).collect::<Vec<_>>().join(" "),
                self.signature
            )));
        }
        (self.callable)(args)
    }
}

impl fmt::Debug for FunctionRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "FunctionRef({})", self.signature)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ImportError {
    #[error("missing import {module}::{field}")]
    Missing { module: String, field: String },
    #[error("import {module}::{field} has the wrong shape: expected {expected}, got {actual}")]
    Mismatch {
        module: String,
        field: String,
        expected: String,
        actual: String,
    },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InstantiationError {
    #[error(transparent)]
    Import(#[from] ImportError),
    #[error("trap during instantiation: {0}")]
    Trap(#[from] Trap),
    #[error("{0}")]
    Resource(String),
}
