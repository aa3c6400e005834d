//! Common test utilities shared between integration tests

#![allow(dead_code)]

use wasmc::parser::encoding::*;
use wasmc::parser::instruction::Instruction;
use wasmc::parser::module::{
    Export, ExternalKind, GlobalType, Import, ImportKind, Limits, LocalGroup, Signature, Tag,
    TableType, ValueType,
};

/// Assembles binary modules section by section.
#[derive(Default)]
pub struct ModuleBuilder {
    types: Vec<Signature>,
    imports: Vec<Import>,
    imported_functions: u32,
    imported_globals: u32,
    functions: Vec<u32>,
    bodies: Vec<Vec<u8>>,
    table: Option<TableType>,
    memory: Option<Limits>,
    tags: Vec<Tag>,
    globals: Vec<(GlobalType, Vec<Instruction>)>,
    exports: Vec<Export>,
    start: Option<u32>,
    elements: Vec<Vec<u8>>,
    data: Vec<Vec<u8>>,
}

pub fn encode(instructions: &[Instruction]) -> Vec<u8> {
    let mut buf = vec![];
    for i in instructions {
        i.encode(&mut buf);
    }
    buf
}

impl ModuleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of a type, added if not present.
    pub fn type_index(&mut self, parameters: &[ValueType], returns: &[ValueType]) -> u32 {
        let wanted = Signature::new(parameters.to_vec(), returns.to_vec());
        match self.types.iter().position(|t| t.same_shape(&wanted)) {
            Some(i) => i as u32,
            None => {
                self.types.push(wanted);
                self.types.len() as u32 - 1
            }
        }
    }

    pub fn import_function(
        &mut self,
        module: &str,
        field: &str,
        parameters: &[ValueType],
        returns: &[ValueType],
    ) -> u32 {
        let type_index = self.type_index(parameters, returns);
        self.imports.push(Import {
            module: module.into(),
            field: field.into(),
            kind: ImportKind::Function { type_index },
        });
        self.imported_functions += 1;
        self.imported_functions - 1
    }

    pub fn import_global(&mut self, module: &str, field: &str, global: GlobalType) -> u32 {
        self.imports.push(Import {
            module: module.into(),
            field: field.into(),
            kind: ImportKind::Global(global),
        });
        self.imported_globals += 1;
        self.imported_globals - 1
    }

    pub fn import_memory(&mut self, module: &str, field: &str, limits: Limits) {
        self.imports.push(Import {
            module: module.into(),
            field: field.into(),
            kind: ImportKind::Memory(limits),
        });
    }

    /// Add a function; `body` must end with `End`.
    pub fn function(
        &mut self,
        parameters: &[ValueType],
        returns: &[ValueType],
        locals: &[ValueType],
        body: &[Instruction],
    ) -> u32 {
        let type_index = self.type_index(parameters, returns);
        self.functions.push(type_index);

        let mut code = vec![];
        write_vu32(&mut code, locals.len() as u32);
        for local in locals {
            LocalGroup {
                count: 1,
                value_type: *local,
            }
            .encode(&mut code);
        }
        code.extend(encode(body));
        self.bodies.push(code);
        self.imported_functions + self.functions.len() as u32 - 1
    }

    /// Add and export a function from encoded instructions, with no locals.
    pub fn exported_code(
        &mut self,
        name: &str,
        parameters: &[ValueType],
        returns: &[ValueType],
        instructions: &[u8],
    ) -> u32 {
        let type_index = self.type_index(parameters, returns);
        self.functions.push(type_index);
        let mut code = vec![0x00];
        code.extend_from_slice(instructions);
        self.bodies.push(code);
        let index = self.imported_functions + self.functions.len() as u32 - 1;
        self.export(name, ExternalKind::Function, index);
        index
    }

    /// Add a function and export it.
    pub fn exported(
        &mut self,
        name: &str,
        parameters: &[ValueType],
        returns: &[ValueType],
        locals: &[ValueType],
        body: &[Instruction],
    ) -> u32 {
        let index = self.function(parameters, returns, locals, body);
        self.export(name, ExternalKind::Function, index);
        index
    }

    pub fn export(&mut self, name: &str, kind: ExternalKind, index: u32) {
        self.exports.push(Export {
            name: name.into(),
            kind,
            index,
        });
    }

    pub fn memory(&mut self, minimum: u32, maximum: Option<u32>) {
        self.memory = Some(Limits { minimum, maximum });
    }

    pub fn table(&mut self, minimum: u32, maximum: Option<u32>) {
        self.table = Some(TableType {
            limits: Limits { minimum, maximum },
        });
    }

    pub fn tag(&mut self, parameters: &[ValueType]) -> u32 {
        let type_index = self.type_index(parameters, &[]);
        self.tags.push(Tag { type_index });
        self.tags.len() as u32 - 1
    }

    pub fn global(&mut self, global: GlobalType, initializer: &[Instruction]) -> u32 {
        self.globals.push((global, initializer.to_vec()));
        self.imported_globals + self.globals.len() as u32 - 1
    }

    pub fn start(&mut self, index: u32) {
        self.start = Some(index);
    }

    pub fn active_elements(&mut self, offset: i32, functions: &[u32]) {
        let mut segment = vec![];
        write_vu32(&mut segment, ELEM_ACTIVE_FUNCS);
        segment.extend(encode(&[Instruction::I32Const { value: offset }, Instruction::End]));
        write_vu32(&mut segment, functions.len() as u32);
        functions.iter().for_each(|f| write_vu32(&mut segment, *f));
        self.elements.push(segment);
    }

    pub fn passive_elements(&mut self, functions: &[u32]) {
        let mut segment = vec![];
        write_vu32(&mut segment, ELEM_PASSIVE_FUNCS);
        segment.push(ELEMKIND_FUNCREF);
        write_vu32(&mut segment, functions.len() as u32);
        functions.iter().for_each(|f| write_vu32(&mut segment, *f));
        self.elements.push(segment);
    }

    pub fn active_data(&mut self, offset: i32, bytes: &[u8]) {
        let mut segment = vec![];
        write_vu32(&mut segment, DATA_ACTIVE);
        segment.extend(encode(&[Instruction::I32Const { value: offset }, Instruction::End]));
        write_byte_vec(&mut segment, bytes);
        self.data.push(segment);
    }

    pub fn passive_data(&mut self, bytes: &[u8]) {
        let mut segment = vec![];
        write_vu32(&mut segment, DATA_PASSIVE);
        write_byte_vec(&mut segment, bytes);
        self.data.push(segment);
    }

    pub fn build(&self) -> Vec<u8> {
        let mut buf = vec![];
        write_u32(&mut buf, MAGIC);
        write_u32(&mut buf, VERSION);

        fn vector<T>(items: &[T], mut encode: impl FnMut(&T, &mut Vec<u8>)) -> Vec<u8> {
            let mut payload = vec![];
            write_vu32(&mut payload, items.len() as u32);
            items.iter().for_each(|item| encode(item, &mut payload));
            payload
        }

        if !self.types.is_empty() {
            write_section(&mut buf, SECTION_TYPE, &vector(&self.types, |t, b| t.encode(b)));
        }
        if !self.imports.is_empty() {
            write_section(&mut buf, SECTION_IMPORT, &vector(&self.imports, |i, b| i.encode(b)));
        }
        if !self.functions.is_empty() {
            let payload = vector(&self.functions, |f, b| write_vu32(b, *f));
            write_section(&mut buf, SECTION_FUNCTION, &payload);
        }
        if let Some(table) = &self.table {
            write_section(&mut buf, SECTION_TABLE, &vector(&[*table], |t, b| t.encode(b)));
        }
        if let Some(memory) = &self.memory {
            write_section(&mut buf, SECTION_MEMORY, &vector(&[*memory], |m, b| m.encode(b)));
        }
        if !self.tags.is_empty() {
            write_section(&mut buf, SECTION_TAG, &vector(&self.tags, |t, b| t.encode(b)));
        }
        if !self.globals.is_empty() {
            let payload = vector(&self.globals, |(global, init), b| {
                global.encode(b);
                b.extend(encode(init));
            });
            write_section(&mut buf, SECTION_GLOBAL, &payload);
        }
        if !self.exports.is_empty() {
            write_section(&mut buf, SECTION_EXPORT, &vector(&self.exports, |e, b| e.encode(b)));
        }
        if let Some(start) = self.start {
            let mut payload = vec![];
            write_vu32(&mut payload, start);
            write_section(&mut buf, SECTION_START, &payload);
        }
        if !self.elements.is_empty() {
            let payload = vector(&self.elements, |e, b| b.extend(e));
            write_section(&mut buf, SECTION_ELEMENT, &payload);
        }
        if !self.data.is_empty() {
            let mut payload = vec![];
            write_vu32(&mut payload, self.data.len() as u32);
            write_section(&mut buf, SECTION_DATA_COUNT, &payload);
        }
        if !self.bodies.is_empty() {
            let payload = vector(&self.bodies, |body, b| write_byte_vec(b, body));
            write_section(&mut buf, SECTION_CODE, &payload);
        }
        if !self.data.is_empty() {
            let payload = vector(&self.data, |d, b| b.extend(d));
            write_section(&mut buf, SECTION_DATA, &payload);
        }
        buf
    }
}
