//! Implementation limits for decoding and compiling modules.
//!
//! These guard against malformed input claiming unrealistic counts before any
//! allocation is made for them. They are aligned with the limits mainstream
//! engines apply; host-specific limits (locals, parameters) are configurable
//! through [`crate::compiler::config::CompilerConfiguration`].

// =============================================================================
// Module-level limits
// =============================================================================

/// Maximum number of type definitions in a module
pub const MAX_TYPES: u32 = 1_000_000;

/// Maximum number of defined functions in a module
pub const MAX_FUNCTIONS: u32 = 1_000_000;

/// Maximum number of imports in a module
pub const MAX_IMPORTS: u32 = 100_000;

/// Maximum number of exports in a module
pub const MAX_EXPORTS: u32 = 100_000;

/// Maximum number of globals in a module
pub const MAX_GLOBALS: u32 = 1_000_000;

/// Maximum number of data segments in a module
pub const MAX_DATA_SEGMENTS: u32 = 100_000;

/// Maximum number of element segments in a module
pub const MAX_ELEMENT_SEGMENTS: u32 = 100_000;

/// Maximum number of exception tags in a module
pub const MAX_TAGS: u32 = 1_000_000;

/// Maximum number of entries in a function table
pub const MAX_TABLE_SIZE: u32 = 10_000_000;

// =============================================================================
// Function-level limits
// =============================================================================

/// Maximum function body size in bytes
pub const MAX_FUNCTION_SIZE: u32 = 7_654_321;

/// Maximum number of function parameters
pub const MAX_FUNCTION_PARAMS: u32 = 1_000;

/// Maximum number of results; multi-value is not supported
pub const MAX_FUNCTION_RETURNS: u32 = 1;

// =============================================================================
// Instruction-level limits
// =============================================================================

/// Maximum number of labels in a br_table instruction
pub const MAX_BR_TABLE_LABELS: u32 = 65_536;

// =============================================================================
// Memory limits
// =============================================================================

/// Maximum number of 64KiB pages for a 32-bit memory (4GiB)
pub const MAX_MEMORY_PAGES: u32 = 65_536;
