//! Binary module under construction.
//!
//! Words are appended to one buffer per logical section and concatenated in
//! the fixed SPIR-V layout order by [`SpirvModule::assemble`]. Types and
//! constants are interned so each structurally distinct declaration is
//! written once.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::spirv::{self, capability, op};

/// Logical sections, in layout order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Section {
    Imports,
    Debug,
    Annotations,
    Types,
    Constants,
    Globals,
    Functions,
}

impl Section {
    const COUNT: usize = 7;

    const ALL: [Section; Self::COUNT] = [
        Self::Imports,
        Self::Debug,
        Self::Annotations,
        Self::Types,
        Self::Constants,
        Self::Globals,
        Self::Functions,
    ];
}

/// An `OpEntryPoint` waiting for its function.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryPoint {
    pub model: u32,
    pub function: u32,
    pub name: String,
    pub interface: Vec<u32>,
}

/// Most operand words a single instruction can carry.
pub const MAX_OPERAND_WORDS: usize = u16::MAX as usize - 1;

/// Appends one instruction to `out`. Writes nothing and returns `false`
/// when the operands overflow the 16-bit word count.
pub fn encode(out: &mut Vec<u32>, opcode: u16, operands: &[u32]) -> bool {
    let Ok(count) = u16::try_from(operands.len() + 1) else {
        return false;
    };
    out.push(spirv::instruction_header(count, opcode));
    out.extend_from_slice(operands);
    true
}

/// Appends an instruction whose operands embed a literal string.
pub fn encode_with_string(out: &mut Vec<u32>, opcode: u16, before: &[u32], s: &str, after: &[u32]) -> bool {
    let mut operands = before.to_vec();
    operands.extend(spirv::pack_string(s));
    operands.extend_from_slice(after);
    encode(out, opcode, &operands)
}

/// An instruction dropped because its operands did not fit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Oversized {
    pub opcode: u16,
    pub words: usize,
}

#[derive(Debug)]
pub struct SpirvModule {
    sections: [Vec<u32>; Section::COUNT],
    next_id: u32,
    types: HashMap<(u16, Vec<u32>), u32>,
    declarations: HashMap<u32, (u16, Vec<u32>)>,
    constants: HashMap<(u16, u32, Vec<u32>), u32>,
    constant_ids: HashSet<u32>,
    capabilities: BTreeSet<u32>,
    extensions: BTreeSet<&'static str>,
    imports: HashMap<&'static str, u32>,
    entry_points: Vec<EntryPoint>,
    execution_modes: Vec<(u32, u32, Vec<u32>)>,
    decorated: HashSet<(u32, u32)>,
    oversized: Vec<Oversized>,
}

impl Default for SpirvModule {
    fn default() -> Self {
        Self::new()
    }
}

impl SpirvModule {
    pub fn new() -> Self {
        let mut capabilities = BTreeSet::new();
        capabilities.insert(capability::SHADER);
        Self {
            sections: Default::default(),
            next_id: 1,
            types: HashMap::new(),
            declarations: HashMap::new(),
            constants: HashMap::new(),
            constant_ids: HashSet::new(),
            capabilities,
            extensions: BTreeSet::new(),
            imports: HashMap::new(),
            entry_points: Vec::new(),
            execution_modes: Vec::new(),
            decorated: HashSet::new(),
            oversized: Vec::new(),
        }
    }

    pub fn alloc_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// One past the largest id handed out.
    pub fn bound(&self) -> u32 {
        self.next_id
    }

    pub fn emit(&mut self, section: Section, opcode: u16, operands: &[u32]) {
        let written = encode(&mut self.sections[section as usize], opcode, operands);
        self.check(written, opcode, operands.len());
    }

    fn check(&mut self, written: bool, opcode: u16, words: usize) {
        if !written {
            log::debug!("dropped opcode {opcode}: {words} operand words");
            self.oversized.push(Oversized { opcode, words });
        }
    }

    /// Instructions dropped so far for overflowing the word count.
    pub fn take_oversized(&mut self) -> Vec<Oversized> {
        std::mem::take(&mut self.oversized)
    }

    pub fn append(&mut self, section: Section, words: &[u32]) {
        self.sections[section as usize].extend_from_slice(words);
    }

    pub fn section(&self, section: Section) -> &[u32] {
        &self.sections[section as usize]
    }

    pub fn require_capability(&mut self, cap: u32) {
        self.capabilities.insert(cap);
    }

    pub fn require_extension(&mut self, name: &'static str) {
        self.extensions.insert(name);
    }

    /// Id of the extended instruction set `name`, imported on first use.
    pub fn import(&mut self, name: &'static str) -> u32 {
        if let Some(&id) = self.imports.get(name) {
            return id;
        }
        let id = self.alloc_id();
        let written = encode_with_string(
            &mut self.sections[Section::Imports as usize],
            op::EXT_INST_IMPORT,
            &[id],
            name,
            &[],
        );
        self.check(written, op::EXT_INST_IMPORT, name.len() / 4 + 2);
        self.imports.insert(name, id);
        id
    }

    pub fn add_entry_point(&mut self, entry: EntryPoint) -> usize {
        self.entry_points.push(entry);
        self.entry_points.len() - 1
    }

    pub fn entry_point_mut(&mut self, index: usize) -> Option<&mut EntryPoint> {
        self.entry_points.get_mut(index)
    }

    pub fn add_execution_mode(&mut self, function: u32, mode: u32, literals: &[u32]) {
        self.execution_modes.push((function, mode, literals.to_vec()));
    }

    pub fn name(&mut self, id: u32, name: &str) {
        let written = encode_with_string(&mut self.sections[Section::Debug as usize], op::NAME, &[id], name, &[]);
        self.check(written, op::NAME, name.len() / 4 + 2);
    }

    pub fn member_name(&mut self, id: u32, member: u32, name: &str) {
        let written = encode_with_string(
            &mut self.sections[Section::Debug as usize],
            op::MEMBER_NAME,
            &[id, member],
            name,
            &[],
        );
        self.check(written, op::MEMBER_NAME, name.len() / 4 + 3);
    }

    pub fn decorate(&mut self, id: u32, decoration: u32, literals: &[u32]) {
        let mut operands = vec![id, decoration];
        operands.extend_from_slice(literals);
        self.emit(Section::Annotations, op::DECORATE, &operands);
    }

    /// Like [`decorate`](Self::decorate), but writes each `(id, decoration)`
    /// pair at most once.
    pub fn decorate_once(&mut self, id: u32, decoration: u32, literals: &[u32]) {
        if self.decorated.insert((id, decoration)) {
            self.decorate(id, decoration, literals);
        }
    }

    pub fn member_decorate(&mut self, id: u32, member: u32, decoration: u32, literals: &[u32]) {
        let mut operands = vec![id, member, decoration];
        operands.extend_from_slice(literals);
        self.emit(Section::Annotations, op::MEMBER_DECORATE, &operands);
    }

    /// Interned type declaration. `operands` excludes the result id.
    pub fn ty(&mut self, opcode: u16, operands: &[u32]) -> u32 {
        let key = (opcode, operands.to_vec());
        if let Some(&id) = self.types.get(&key) {
            return id;
        }
        let id = self.alloc_id();
        self.write_type(id, opcode, operands);
        self.types.insert(key, id);
        id
    }

    /// Type declaration that is never shared, for nominal types such as
    /// structs.
    pub fn unique_ty(&mut self, opcode: u16, operands: &[u32]) -> u32 {
        let id = self.alloc_id();
        self.write_type(id, opcode, operands);
        id
    }

    fn write_type(&mut self, id: u32, opcode: u16, operands: &[u32]) {
        let mut words = vec![id];
        words.extend_from_slice(operands);
        self.emit(Section::Types, opcode, &words);
        self.declarations.insert(id, (opcode, operands.to_vec()));
    }

    /// Opcode and operands a type id was declared with.
    pub fn declaration(&self, ty: u32) -> Option<(u16, &[u32])> {
        self.declarations
            .get(&ty)
            .map(|(opcode, operands)| (*opcode, operands.as_slice()))
    }

    pub fn type_void(&mut self) -> u32 {
        self.ty(op::TYPE_VOID, &[])
    }

    pub fn type_bool(&mut self) -> u32 {
        self.ty(op::TYPE_BOOL, &[])
    }

    pub fn type_int(&mut self, width: u32, signed: bool) -> u32 {
        match width {
            8 => self.require_capability(capability::INT8),
            16 => self.require_capability(capability::INT16),
            64 => self.require_capability(capability::INT64),
            _ => {}
        }
        self.ty(op::TYPE_INT, &[width, u32::from(signed)])
    }

    pub fn type_float(&mut self, width: u32) -> u32 {
        match width {
            16 => self.require_capability(capability::FLOAT16),
            64 => self.require_capability(capability::FLOAT64),
            _ => {}
        }
        self.ty(op::TYPE_FLOAT, &[width])
    }

    pub fn type_vector(&mut self, component: u32, lanes: u32) -> u32 {
        self.ty(op::TYPE_VECTOR, &[component, lanes])
    }

    pub fn type_array(&mut self, element: u32, length: u32) -> u32 {
        let u32_ = self.type_int(32, false);
        let length = self.constant_in(Section::Types, u32_, op::CONSTANT, &[length]);
        self.ty(op::TYPE_ARRAY, &[element, length])
    }

    pub fn type_pointer(&mut self, storage_class: u32, pointee: u32) -> u32 {
        self.ty(op::TYPE_POINTER, &[storage_class, pointee])
    }

    pub fn type_function(&mut self, ret: u32, params: &[u32]) -> u32 {
        let mut operands = vec![ret];
        operands.extend_from_slice(params);
        self.ty(op::TYPE_FUNCTION, &operands)
    }

    /// Interned constant of type `ty`. `operands` excludes the result type
    /// and id.
    pub fn constant(&mut self, ty: u32, opcode: u16, operands: &[u32]) -> u32 {
        self.constant_in(Section::Constants, ty, opcode, operands)
    }

    /// Interned constant written into `section`. Constants that types
    /// depend on (array lengths) go into the type section so they precede
    /// their users.
    pub fn constant_in(&mut self, section: Section, ty: u32, opcode: u16, operands: &[u32]) -> u32 {
        let key = (opcode, ty, operands.to_vec());
        if let Some(&id) = self.constants.get(&key) {
            return id;
        }
        let id = self.alloc_id();
        let mut words = vec![ty, id];
        words.extend_from_slice(operands);
        self.emit(section, opcode, &words);
        self.constants.insert(key, id);
        self.constant_ids.insert(id);
        id
    }

    pub fn is_constant(&self, id: u32) -> bool {
        self.constant_ids.contains(&id)
    }

    pub fn const_u32(&mut self, value: u32) -> u32 {
        let ty = self.type_int(32, false);
        self.constant(ty, op::CONSTANT, &[value])
    }

    pub fn const_i32(&mut self, value: i32) -> u32 {
        let ty = self.type_int(32, true);
        self.constant(ty, op::CONSTANT, &[value as u32])
    }

    pub fn null(&mut self, ty: u32) -> u32 {
        self.constant(ty, op::CONSTANT_NULL, &[])
    }

    /// Concatenates every section behind the module header.
    ///
    /// Entry points whose interface overflows one instruction are dropped
    /// and reported through [`take_oversized`](Self::take_oversized).
    pub fn assemble(&mut self, version: u32) -> Vec<u32> {
        let mut words = vec![spirv::MAGIC, version, spirv::GENERATOR, self.bound(), 0];

        for &cap in &self.capabilities {
            encode(&mut words, op::CAPABILITY, &[cap]);
        }
        for ext in &self.extensions {
            encode_with_string(&mut words, op::EXTENSION, &[], ext, &[]);
        }
        words.extend_from_slice(self.section(Section::Imports));
        encode(
            &mut words,
            op::MEMORY_MODEL,
            &[spirv::ADDRESSING_LOGICAL, spirv::MEMORY_MODEL_GLSL450],
        );
        let mut dropped = Vec::new();
        for entry in &self.entry_points {
            let written = encode_with_string(
                &mut words,
                op::ENTRY_POINT,
                &[entry.model, entry.function],
                &entry.name,
                &entry.interface,
            );
            if !written {
                dropped.push(Oversized {
                    opcode: op::ENTRY_POINT,
                    words: entry.interface.len() + entry.name.len() / 4 + 3,
                });
            }
        }
        self.oversized.extend(dropped);
        for (function, mode, literals) in &self.execution_modes {
            let mut operands = vec![*function, *mode];
            operands.extend_from_slice(literals);
            encode(&mut words, op::EXECUTION_MODE, &operands);
        }
        for section in Section::ALL.into_iter().skip(1) {
            log::trace!("section {section:?}: {} words", self.section(section).len());
            words.extend_from_slice(self.section(section));
        }
        words
    }
}
