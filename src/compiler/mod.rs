//! Validation and translation.
//!
//! A module is compiled in one pass: the [`assembler`] walks the sections and,
//! for every function body and initializer, feeds decoded instructions one at
//! a time through [`translate`], which checks them against the operand stack
//! and control frames of a [`context::CompilationContext`] and emits host
//! operations through the [`emitter`]. The first error aborts the module.

pub mod assembler;
pub mod config;
pub mod context;
pub mod emitter;
pub mod error;
pub mod helpers;
pub mod translate;

use log::debug;

pub use assembler::{CompiledModule, ModuleAssembler};
pub use config::CompilerConfiguration;
pub use error::{CompileError, MissingShape, MissingShapeError, ValidationError};

/// Compile a binary module with the default configuration.
pub fn compile(bytes: &[u8]) -> Result<CompiledModule, CompileError> {
    compile_with(bytes, &CompilerConfiguration::default())
}

pub fn compile_with(
    bytes: &[u8],
    config: &CompilerConfiguration,
) -> Result<CompiledModule, CompileError> {
    debug!("compiling {} bytes", bytes.len());
    let module = ModuleAssembler::new(config).assemble(bytes)?;
    debug!(
        "compiled {} functions and {} helper routines",
        module.functions().len(),
        module.helpers().len()
    );
    Ok(module)
}
