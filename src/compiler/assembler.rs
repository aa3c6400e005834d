//! Module assembly
//!
//! [`ModuleAssembler`] decodes a binary module section by section, in
//! canonical order, building the [`ModuleEnvironment`] as it goes. Global
//! initializers, segment offsets and function bodies are compiled through a
//! [`CompilationContext`] as soon as they are decoded, one instruction at a
//! time. The result is a [`CompiledModule`]: host programs plus everything
//! instantiation needs.

use std::collections::{HashMap, HashSet};

use log::debug;

use super::config::CompilerConfiguration;
use super::context::{CompilationContext, ModuleEnvironment};
use super::emitter::{HostFunction, HostOp};
use super::error::{CompileError, MissingShape, MissingShapeError};
use super::helpers::HelperCache;
use crate::parser::encoding::*;
use crate::parser::instruction::Instruction;
use crate::parser::limits::*;
use crate::parser::module::{
    Export, ExternalKind, GlobalType, Import, ImportKind, Limits, LocalGroup, Signature, Tag,
    TableType, ValueType,
};
use crate::parser::reader::Reader;
use crate::runtime::instance::Instance;
use crate::runtime::memory::PAGE_SIZE;
use crate::runtime::{ImportResolver, InstantiationError};

/// Placement of an element or data segment.
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentMode {
    /// Applied at instantiation at the offset the initializer computes.
    Active { offset: HostFunction },
    /// Available to `memory.init` and `table.init`.
    Passive,
    /// Only declares references; dropped at instantiation.
    Declarative,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElementSegment {
    pub mode: SegmentMode,
    pub functions: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataSegment {
    pub mode: SegmentMode,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledGlobal {
    pub global_type: GlobalType,
    pub initializer: HostFunction,
}

/// A validated and translated module, ready to instantiate.
#[derive(Debug, Clone)]
pub struct CompiledModule {
    pub(crate) env: ModuleEnvironment,
    pub(crate) imports: Vec<Import>,
    pub(crate) functions: Vec<HostFunction>,
    pub(crate) helpers: Vec<HostFunction>,
    pub(crate) globals: Vec<CompiledGlobal>,
    pub(crate) exports: Vec<Export>,
    pub(crate) start: Option<u32>,
    pub(crate) elements: Vec<ElementSegment>,
    pub(crate) data: Vec<DataSegment>,
    pub(crate) config: CompilerConfiguration,
}

impl CompiledModule {
    /// Bind imports and run initializers.
    pub fn instantiate(&self, resolver: &dyn ImportResolver) -> Result<Instance, InstantiationError> {
        Instance::new(self, resolver)
    }

    pub fn environment(&self) -> &ModuleEnvironment {
        &self.env
    }

    pub fn imports(&self) -> &[Import] {
        &self.imports
    }

    /// Defined functions, in index order after the imports.
    pub fn functions(&self) -> &[HostFunction] {
        &self.functions
    }

    /// Helper routines shared by all functions.
    pub fn helpers(&self) -> &[HostFunction] {
        &self.helpers
    }

    pub fn globals(&self) -> &[CompiledGlobal] {
        &self.globals
    }

    pub fn exports(&self) -> &[Export] {
        &self.exports
    }

    pub fn start(&self) -> Option<u32> {
        self.start
    }

    pub fn elements(&self) -> &[ElementSegment] {
        &self.elements
    }

    pub fn data(&self) -> &[DataSegment] {
        &self.data
    }
}

pub struct ModuleAssembler<'c> {
    config: &'c CompilerConfiguration,
    env: ModuleEnvironment,
    helpers: HelperCache,
    imports: Vec<Import>,
    defined: Vec<u32>,
    functions: Vec<HostFunction>,
    globals: Vec<CompiledGlobal>,
    exports: Vec<Export>,
    start: Option<u32>,
    elements: Vec<ElementSegment>,
    data: Vec<DataSegment>,
    seen_function_section: bool,
}

fn count(reader: &mut Reader, limit: u32, what: &str) -> Result<u32, CompileError> {
    let offset = reader.pos();
    let n = reader.read_var_u32()?;
    if n > limit {
        return Err(CompileError::load(
            format!("too many {what}: {n}, limit {limit}"),
            offset,
        ));
    }
    Ok(n)
}

/// Compile one initializer expression producing `value_type`.
fn compile_initializer(
    reader: &mut Reader,
    env: &ModuleEnvironment,
    helpers: &mut HelperCache,
    config: &CompilerConfiguration,
    value_type: ValueType,
) -> Result<HostFunction, CompileError> {
    let mut ctx = CompilationContext::new(env, helpers, config);
    ctx.reset_initializer(value_type);
    while !ctx.is_ended() {
        Instruction::decode(reader)?.validate_and_translate(&mut ctx)?;
    }
    ctx.finish(format!("init@{}", reader.pos()))
}

/// Value of an initializer that is a single constant.
pub(crate) fn constant_offset(initializer: &HostFunction) -> Option<i32> {
    match initializer.ops.first() {
        Some(HostOp::LdcI4(v)) => Some(*v),
        _ => None,
    }
}

impl<'c> ModuleAssembler<'c> {
    pub fn new(config: &'c CompilerConfiguration) -> ModuleAssembler<'c> {
        ModuleAssembler {
            config,
            env: ModuleEnvironment::default(),
            helpers: HelperCache::new(),
            imports: vec![],
            defined: vec![],
            functions: vec![],
            globals: vec![],
            exports: vec![],
            start: None,
            elements: vec![],
            data: vec![],
            seen_function_section: false,
        }
    }

    pub fn assemble(mut self, bytes: &[u8]) -> Result<CompiledModule, CompileError> {
        let mut reader = Reader::new(bytes);
        let magic = reader.read_u32()?;
        if magic != MAGIC {
            return Err(CompileError::load(
                format!("bad magic number {magic:#010x}"),
                0,
            ));
        }
        let version = reader.read_u32()?;
        if version != VERSION && version != VERSION_PRE_RELEASE {
            return Err(CompileError::load(
                format!("unsupported version {version}"),
                4,
            ));
        }

        let mut last_rank = 0;
        while !reader.is_at_end() {
            let header = reader.pos();
            let id = reader.read_byte()?;
            let length = reader.read_var_u32()? as usize;
            let start = reader.pos();
            if !reader.has_at_least(length) {
                return Err(CompileError::load(
                    format!("{} section length {length} exceeds the input", section_name(id)),
                    start,
                ));
            }
            let end = start + length;

            if id == SECTION_CUSTOM {
                let name = reader.read_string()?;
                if reader.pos() > end {
                    return Err(CompileError::load("custom section name overruns", start));
                }
                reader.read_bytes(end - reader.pos())?;
                debug!("skipped custom section {name:?}, {length} bytes");
                continue;
            }

            let rank = section_rank(id)
                .ok_or_else(|| CompileError::load(format!("unknown section id {id}"), header))?;
            if rank <= last_rank {
                return Err(CompileError::load(
                    format!("{} section out of order", section_name(id)),
                    header,
                ));
            }
            last_rank = rank;
            debug!("section {} ({id}): {length} bytes", section_name(id));

            self.section(id, &mut reader)?;

            if reader.pos() != end {
                return Err(CompileError::load(
                    format!(
                        "{} section size mismatch: declared {length}, consumed {}",
                        section_name(id),
                        reader.pos() - start
                    ),
                    reader.pos(),
                ));
            }
        }

        if self.functions.len() != self.defined.len() {
            return Err(CompileError::load(
                format!(
                    "{} functions declared but {} bodies provided",
                    self.defined.len(),
                    self.functions.len()
                ),
                reader.pos(),
            ));
        }
        if let Some(n) = self.env.data_count {
            if n as usize != self.data.len() {
                return Err(CompileError::load(
                    format!("data count {n} does not match {} data segments", self.data.len()),
                    reader.pos(),
                ));
            }
        }

        Ok(CompiledModule {
            env: self.env,
            imports: self.imports,
            functions: self.functions,
            helpers: self.helpers.into_routines(),
            globals: self.globals,
            exports: self.exports,
            start: self.start,
            elements: self.elements,
            data: self.data,
            config: self.config.clone(),
        })
    }

    fn section(&mut self, id: u8, reader: &mut Reader) -> Result<(), CompileError> {
        match id {
            SECTION_TYPE => self.type_section(reader),
            SECTION_IMPORT => self.import_section(reader),
            SECTION_FUNCTION => self.function_section(reader),
            SECTION_TABLE => self.table_section(reader),
            SECTION_MEMORY => self.memory_section(reader),
            SECTION_TAG => self.tag_section(reader),
            SECTION_GLOBAL => self.global_section(reader),
            SECTION_EXPORT => self.export_section(reader),
            SECTION_START => self.start_section(reader),
            SECTION_ELEMENT => self.element_section(reader),
            SECTION_DATA_COUNT => {
                self.env.data_count = Some(reader.read_var_u32()?);
                Ok(())
            }
            SECTION_CODE => self.code_section(reader),
            SECTION_DATA => self.data_section(reader),
            _ => Err(CompileError::compiler(format!("unhandled section {id}"))),
        }
    }

    fn type_section(&mut self, reader: &mut Reader) -> Result<(), CompileError> {
        let n = count(reader, MAX_TYPES, "types")?;
        for i in 0..n {
            let signature = Signature::decode(reader, i)?;
            if signature.returns.len() > MAX_FUNCTION_RETURNS as usize {
                return Err(CompileError::compiler(format!(
                    "type {i} has {} results, multiple results are not supported",
                    signature.returns.len()
                )));
            }
            self.env.types.push(signature);
        }
        debug!("{n} types");
        Ok(())
    }

    fn tag_signature(&self, tag: Tag) -> Result<Signature, CompileError> {
        let signature = self.env.signature(tag.type_index)?.clone();
        if !signature.returns.is_empty() {
            return Err(CompileError::compiler(format!(
                "tag type {} has results",
                tag.type_index
            )));
        }
        Ok(signature)
    }

    fn set_table(&mut self, table: TableType) -> Result<(), CompileError> {
        if self.env.table.is_some() {
            return Err(CompileError::compiler("multiple tables are not supported"));
        }
        if table.limits.minimum > MAX_TABLE_SIZE {
            return Err(CompileError::compiler(format!(
                "table minimum {} exceeds {MAX_TABLE_SIZE}",
                table.limits.minimum
            )));
        }
        self.env.table = Some(table);
        Ok(())
    }

    fn set_memory(&mut self, limits: Limits) -> Result<(), CompileError> {
        if self.env.memory.is_some() {
            return Err(CompileError::compiler("multiple memories are not supported"));
        }
        let largest = limits.maximum.unwrap_or(limits.minimum).max(limits.minimum);
        if largest > MAX_MEMORY_PAGES {
            return Err(CompileError::compiler(format!(
                "memory of {largest} pages exceeds {MAX_MEMORY_PAGES}"
            )));
        }
        self.env.memory = Some(limits);
        Ok(())
    }

    fn import_section(&mut self, reader: &mut Reader) -> Result<(), CompileError> {
        let n = count(reader, MAX_IMPORTS, "imports")?;
        let mut missing = vec![];
        for _ in 0..n {
            let import = Import::decode(reader)?;
            match &import.kind {
                ImportKind::Function { type_index } => {
                    let signature = self.env.signature(*type_index)?.clone();
                    if signature.parameters.len() > self.config.max_callable_parameters {
                        missing.push(MissingShape {
                            module: import.module.clone(),
                            field: import.field.clone(),
                            parameters: signature.parameters.len(),
                            returns: signature.returns.len(),
                        });
                    }
                    self.env.functions.push(signature);
                    self.env.imported_functions += 1;
                }
                ImportKind::Table(table) => self.set_table(*table)?,
                ImportKind::Memory(limits) => self.set_memory(*limits)?,
                ImportKind::Global(global) => {
                    self.env.globals.push(*global);
                    self.env.imported_globals += 1;
                }
                ImportKind::Tag(tag) => {
                    let signature = self.tag_signature(*tag)?;
                    self.env.tags.push(signature);
                }
            }
            self.imports.push(import);
        }
        if !missing.is_empty() {
            return Err(MissingShapeError { missing }.into());
        }
        debug!(
            "{n} imports: {} functions, {} globals",
            self.env.imported_functions, self.env.imported_globals
        );
        Ok(())
    }

    fn function_section(&mut self, reader: &mut Reader) -> Result<(), CompileError> {
        self.seen_function_section = true;
        let n = count(reader, MAX_FUNCTIONS, "functions")?;
        for _ in 0..n {
            let type_index = reader.read_var_u32()?;
            let signature = self.env.signature(type_index)?.clone();
            self.env.functions.push(signature);
            self.defined.push(type_index);
        }
        debug!("{n} functions");
        Ok(())
    }

    fn table_section(&mut self, reader: &mut Reader) -> Result<(), CompileError> {
        let n = reader.read_var_u32()?;
        for _ in 0..n {
            let table = TableType::decode(reader)?;
            self.set_table(table)?;
        }
        Ok(())
    }

    fn memory_section(&mut self, reader: &mut Reader) -> Result<(), CompileError> {
        let n = reader.read_var_u32()?;
        for _ in 0..n {
            let limits = Limits::decode(reader)?;
            self.set_memory(limits)?;
        }
        Ok(())
    }

    fn tag_section(&mut self, reader: &mut Reader) -> Result<(), CompileError> {
        let n = count(reader, MAX_TAGS, "tags")?;
        for _ in 0..n {
            let tag = Tag::decode(reader)?;
            let signature = self.tag_signature(tag)?;
            self.env.tags.push(signature);
        }
        debug!("{n} tags");
        Ok(())
    }

    fn global_section(&mut self, reader: &mut Reader) -> Result<(), CompileError> {
        let n = count(reader, MAX_GLOBALS, "globals")?;
        for _ in 0..n {
            let global_type = GlobalType::decode(reader)?;
            let initializer = compile_initializer(
                reader,
                &self.env,
                &mut self.helpers,
                self.config,
                global_type.content_type,
            )?;
            self.env.globals.push(global_type);
            self.globals.push(CompiledGlobal {
                global_type,
                initializer,
            });
        }
        debug!("{n} globals");
        Ok(())
    }

    fn export_section(&mut self, reader: &mut Reader) -> Result<(), CompileError> {
        let n = count(reader, MAX_EXPORTS, "exports")?;
        let mut names = HashSet::new();
        for _ in 0..n {
            let export = Export::decode(reader)?;
            if !names.insert(export.name.clone()) {
                return Err(CompileError::compiler(format!(
                    "duplicate export name {:?}",
                    export.name
                )));
            }
            let valid = match export.kind {
                ExternalKind::Function => (export.index as usize) < self.env.functions.len(),
                ExternalKind::Global => (export.index as usize) < self.env.globals.len(),
                ExternalKind::Table => export.index == 0 && self.env.table.is_some(),
                ExternalKind::Memory => export.index == 0 && self.env.memory.is_some(),
                ExternalKind::Tag => (export.index as usize) < self.env.tags.len(),
            };
            if !valid {
                return Err(CompileError::compiler(format!(
                    "export {:?} refers to missing {} {}",
                    export.name, export.kind, export.index
                )));
            }
            self.exports.push(export);
        }
        debug!("{n} exports");
        Ok(())
    }

    fn start_section(&mut self, reader: &mut Reader) -> Result<(), CompileError> {
        let index = reader.read_var_u32()?;
        let signature = self.env.function(index)?;
        if !signature.parameters.is_empty() || !signature.returns.is_empty() {
            return Err(CompileError::compiler(format!(
                "start function {index} must have type [] -> [], found {signature}"
            )));
        }
        self.start = Some(index);
        Ok(())
    }

    fn function_indices(&self, reader: &mut Reader) -> Result<Vec<u32>, CompileError> {
        let n = count(reader, MAX_TABLE_SIZE, "element entries")?;
        (0..n)
            .map(|_| {
                let index = reader.read_var_u32()?;
                self.env.function(index)?;
                Ok(index)
            })
            .collect()
    }

    fn element_kind(reader: &mut Reader) -> Result<(), CompileError> {
        let offset = reader.pos();
        let kind = reader.read_byte()?;
        if kind != ELEMKIND_FUNCREF {
            return Err(CompileError::load(
                format!("unsupported element kind {kind:#04x}"),
                offset,
            ));
        }
        Ok(())
    }

    fn active_offset(&mut self, reader: &mut Reader) -> Result<SegmentMode, CompileError> {
        let offset = compile_initializer(
            reader,
            &self.env,
            &mut self.helpers,
            self.config,
            ValueType::I32,
        )?;
        Ok(SegmentMode::Active { offset })
    }

    fn element_section(&mut self, reader: &mut Reader) -> Result<(), CompileError> {
        let n = count(reader, MAX_ELEMENT_SEGMENTS, "element segments")?;
        for i in 0..n {
            let flags_offset = reader.pos();
            let flags = reader.read_var_u32()?;
            let mode = match flags {
                ELEM_ACTIVE_FUNCS => self.active_offset(reader)?,
                ELEM_PASSIVE_FUNCS => {
                    Self::element_kind(reader)?;
                    SegmentMode::Passive
                }
                ELEM_ACTIVE_TABLE_FUNCS => {
                    let table = reader.read_var_u32()?;
                    if table != 0 {
                        return Err(CompileError::compiler(format!(
                            "element segment {i} targets table {table}, only table 0 is supported"
                        )));
                    }
                    let mode = self.active_offset(reader)?;
                    Self::element_kind(reader)?;
                    mode
                }
                ELEM_DECLARATIVE_FUNCS => {
                    Self::element_kind(reader)?;
                    SegmentMode::Declarative
                }
                4..=7 => {
                    return Err(CompileError::compiler(format!(
                        "element segment {i} uses expressions, which are not supported"
                    )))
                }
                _ => {
                    return Err(CompileError::load(
                        format!("malformed element segment flags {flags}"),
                        flags_offset,
                    ))
                }
            };
            if matches!(mode, SegmentMode::Active { .. }) && self.env.table.is_none() {
                return Err(CompileError::compiler(format!(
                    "element segment {i} without a table"
                )));
            }
            let functions = self.function_indices(reader)?;
            self.elements.push(ElementSegment { mode, functions });
        }
        self.env.element_count = n;
        debug!("{n} element segments");
        Ok(())
    }

    fn code_section(&mut self, reader: &mut Reader) -> Result<(), CompileError> {
        let offset = reader.pos();
        let n = count(reader, MAX_FUNCTIONS, "function bodies")?;
        if !self.seen_function_section && n > 0 {
            return Err(CompileError::load("code section without a function section", offset));
        }
        if n as usize != self.defined.len() {
            return Err(CompileError::load(
                format!(
                    "{} functions declared but {n} bodies provided",
                    self.defined.len()
                ),
                offset,
            ));
        }

        let names: HashMap<u32, String> = self
            .exports
            .iter()
            .filter(|e| e.kind == ExternalKind::Function)
            .map(|e| (e.index, e.name.clone()))
            .collect();

        let mut ctx = CompilationContext::new(&self.env, &mut self.helpers, self.config);
        for i in 0..n as usize {
            let index = (self.env.imported_functions + i) as u32;
            let size_offset = reader.pos();
            let size = reader.read_var_u32()?;
            if size > MAX_FUNCTION_SIZE {
                return Err(CompileError::load(
                    format!("function body of {size} bytes is too large"),
                    size_offset,
                ));
            }
            let end = reader.pos() + size as usize;

            let groups = (0..count(reader, self.config.max_function_locals as u32, "local groups")?)
                .map(|_| LocalGroup::decode(reader))
                .collect::<Result<Vec<_>, _>>()?;
            let signature = self.env.functions[index as usize].clone();
            ctx.reset(signature, &groups)?;

            while !ctx.is_ended() {
                if reader.pos() >= end {
                    return Err(CompileError::load("function body is not terminated by end", end));
                }
                Instruction::decode(reader)?.validate_and_translate(&mut ctx)?;
            }
            if reader.pos() != end {
                return Err(CompileError::load("function body size mismatch", end));
            }

            let name = names
                .get(&index)
                .cloned()
                .unwrap_or_else(|| format!("func[{index}]"));
            let function = ctx.finish(name)?;
            self.functions.push(function);
        }
        debug!("{n} bodies compiled, {} helper routines", self.helpers.len());
        Ok(())
    }

    fn data_section(&mut self, reader: &mut Reader) -> Result<(), CompileError> {
        let n = count(reader, MAX_DATA_SEGMENTS, "data segments")?;
        for i in 0..n {
            let flags_offset = reader.pos();
            let flags = reader.read_var_u32()?;
            let mode = match flags {
                DATA_ACTIVE => self.active_offset(reader)?,
                DATA_PASSIVE => SegmentMode::Passive,
                DATA_ACTIVE_EXPLICIT => {
                    let memory = reader.read_var_u32()?;
                    if memory != 0 {
                        return Err(CompileError::compiler(format!(
                            "data segment {i} targets memory {memory}, only memory 0 is supported"
                        )));
                    }
                    self.active_offset(reader)?
                }
                _ => {
                    return Err(CompileError::load(
                        format!("malformed data segment flags {flags}"),
                        flags_offset,
                    ))
                }
            };
            let bytes = reader.read_byte_vec()?;
            if bytes.len() > self.config.max_data_segment_length {
                return Err(CompileError::compiler(format!(
                    "data segment {i} of {} bytes exceeds the limit of {}",
                    bytes.len(),
                    self.config.max_data_segment_length
                )));
            }
            if let SegmentMode::Active { offset } = &mode {
                let memory = self
                    .env
                    .memory
                    .ok_or_else(|| CompileError::compiler(format!("data segment {i} without a memory")))?;
                if let (Some(start), Some(max)) = (constant_offset(offset), memory.maximum) {
                    let end = start as u32 as u64 + bytes.len() as u64;
                    if end > max as u64 * PAGE_SIZE as u64 {
                        return Err(CompileError::compiler(format!(
                            "data segment {i} ends at {end}, beyond the memory maximum of {max} pages"
                        )));
                    }
                }
            }
            self.data.push(DataSegment {
                mode,
                bytes: bytes.to_vec(),
            });
        }
        debug!("{n} data segments");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(sections: &[(u8, Vec<u8>)]) -> Vec<u8> {
        let mut buf = vec![0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00];
        for (id, payload) in sections {
            write_section(&mut buf, *id, payload);
        }
        buf
    }

    fn assemble(bytes: &[u8]) -> Result<CompiledModule, CompileError> {
        let config = CompilerConfiguration::default();
        ModuleAssembler::new(&config).assemble(bytes)
    }

    #[test]
    fn test_empty_module() {
        let m = assemble(&module(&[])).unwrap();
        assert!(m.functions().is_empty());
        assert!(m.helpers().is_empty());
    }

    #[test]
    fn test_bad_preamble() {
        let err = assemble(b"\0asx\x01\0\0\0").unwrap_err();
        assert_eq!(err.offset(), Some(0));
        let err = assemble(b"\0asm\x02\0\0\0").unwrap_err();
        assert_eq!(err.offset(), Some(4));
        assert!(assemble(b"\0asm\x0d\0\0\0").is_ok());
    }

    #[test]
    fn test_section_order() {
        // memory then type
        let bytes = module(&[
            (SECTION_MEMORY, vec![0x01, 0x00, 0x01]),
            (SECTION_TYPE, vec![0x00]),
        ]);
        let err = assemble(&bytes).unwrap_err();
        assert_eq!(err.offset(), Some(13));

        // tag ranks before global despite its id
        let bytes = module(&[
            (SECTION_TYPE, vec![0x01, 0x60, 0x00, 0x00]),
            (SECTION_TAG, vec![0x01, 0x00, 0x00]),
            (SECTION_GLOBAL, vec![0x00]),
        ]);
        assert!(assemble(&bytes).is_ok());

        // custom sections may repeat anywhere
        let custom = vec![0x01, b'x', 0xaa];
        let bytes = module(&[
            (SECTION_CUSTOM, custom.clone()),
            (SECTION_TYPE, vec![0x00]),
            (SECTION_CUSTOM, custom),
        ]);
        assert!(assemble(&bytes).is_ok());
    }

    #[test]
    fn test_section_size_mismatch() {
        let mut bytes = module(&[]);
        // type section claiming 3 bytes holding one empty vector plus padding
        bytes.extend_from_slice(&[SECTION_TYPE, 0x02, 0x00, 0x00]);
        assert!(matches!(
            assemble(&bytes),
            Err(CompileError::ModuleLoad { .. })
        ));
    }

    #[test]
    fn test_multiple_memories_rejected() {
        let bytes = module(&[(SECTION_MEMORY, vec![0x02, 0x00, 0x01, 0x00, 0x01])]);
        assert!(matches!(assemble(&bytes), Err(CompileError::Compiler(_))));
    }

    #[test]
    fn test_unknown_section_rejected() {
        let bytes = module(&[(14, vec![])]);
        assert!(matches!(
            assemble(&bytes),
            Err(CompileError::ModuleLoad { .. })
        ));
    }

    #[test]
    fn test_wide_imports_are_all_reported() {
        let config = CompilerConfiguration::default().with_max_callable_parameters(1);
        let mut types = vec![0x02];
        types.extend([0x60, 0x02, 0x7f, 0x7f, 0x00]);
        types.extend([0x60, 0x03, 0x7f, 0x7f, 0x7f, 0x01, 0x7f]);
        let mut imports = vec![0x02];
        imports.extend([3, b'e', b'n', b'v', 1, b'a', 0x00, 0x00]);
        imports.extend([3, b'e', b'n', b'v', 1, b'b', 0x00, 0x01]);
        let bytes = module(&[(SECTION_TYPE, types), (SECTION_IMPORT, imports)]);
        match ModuleAssembler::new(&config).assemble(&bytes) {
            Err(CompileError::MissingShape(e)) => {
                assert_eq!(e.missing.len(), 2);
                assert_eq!(e.missing[1].parameters, 3);
                assert_eq!(e.missing[1].returns, 1);
            }
            other => panic!("expected missing shapes, got {other:?}"),
        }
    }

    #[test]
    fn test_body_count_must_match() {
        let bytes = module(&[
            (SECTION_TYPE, vec![0x01, 0x60, 0x00, 0x00]),
            (SECTION_FUNCTION, vec![0x02, 0x00, 0x00]),
            (SECTION_CODE, vec![0x01, 0x02, 0x00, 0x0b]),
        ]);
        assert!(matches!(
            assemble(&bytes),
            Err(CompileError::ModuleLoad { .. })
        ));
    }

    #[test]
    fn test_data_beyond_maximum_rejected() {
        // memory 1..1, data at 65535 with two bytes
        let mut data = vec![0x01, 0x00, 0x41];
        write_vs32(&mut data, 65535);
        data.extend([0x0b, 0x02, 0xaa, 0xbb]);
        let bytes = module(&[
            (SECTION_MEMORY, vec![0x01, 0x01, 0x01, 0x01]),
            (SECTION_DATA, data),
        ]);
        assert!(matches!(assemble(&bytes), Err(CompileError::Compiler(_))));
    }

    #[test]
    fn test_start_must_be_nullary() {
        let bytes = module(&[
            (SECTION_TYPE, vec![0x01, 0x60, 0x01, 0x7f, 0x00]),
            (SECTION_FUNCTION, vec![0x01, 0x00]),
            (SECTION_START, vec![0x00]),
            (SECTION_CODE, vec![0x01, 0x02, 0x00, 0x0b]),
        ]);
        assert!(matches!(assemble(&bytes), Err(CompileError::Compiler(_))));
    }
}
