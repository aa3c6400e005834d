//! A WebAssembly compiler for a managed host machine.
//!
//! wasmc validates a binary module and translates every function body into a
//! program of untyped host operations in a single pass, then instantiates the
//! result against host-supplied imports:
//!
//! - [`parser`] -- Binary format decoder and re-encoder, and the closed
//!   instruction set.
//! - [`compiler`] -- Stack validator, code emitter, helper routines and the
//!   module assembler.
//! - [`runtime`] -- Linear memory, function table, globals, import binding and
//!   the host machine that runs translated code.
//!
//! # Example
//!
//! Compile a module exporting `add`, instantiate it and call it:
//!
//! ```
//! use wasmc::runtime::{ImportObject, Value};
//!
//! let bytes = [
//!     0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00, // preamble
//!     0x01, 0x07, 0x01, 0x60, 0x02, 0x7f, 0x7f, 0x01, 0x7f, // (i32 i32) -> i32
//!     0x03, 0x02, 0x01, 0x00, // one function of type 0
//!     0x07, 0x07, 0x01, 0x03, b'a', b'd', b'd', 0x00, 0x00, // export "add"
//!     0x0a, 0x09, 0x01, 0x07, 0x00, 0x20, 0x00, 0x20, 0x01, 0x6a, 0x0b, // body
//! ];
//!
//! let module = wasmc::compile(&bytes).unwrap();
//! let instance = module.instantiate(&ImportObject::new()).unwrap();
//! let results = instance.invoke("add", &[Value::I32(2), Value::I32(3)]).unwrap();
//! assert_eq!(results, vec![Value::I32(5)]);
//! ```

pub mod compiler;
pub mod parser;
pub mod runtime;

pub use compiler::{
    compile, compile_with, CompileError, CompiledModule, CompilerConfiguration, ValidationError,
};
pub use runtime::{ImportObject, Instance, InstantiationError, Trap, Value};
