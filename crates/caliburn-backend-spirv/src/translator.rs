//! Translation state shared by the per-opcode lowerings.

use std::collections::{HashMap, HashSet};
use std::fmt::Display;

use caliburn_ir::{
    Assembler, BuiltIn, CompileError, CompileStage, CompilerSettings, ErrorCollector, Handle,
    Instruction, LowType, Opcode, ShaderStage, Ssa,
};

use crate::builtins::{self, BuiltInType};
use crate::error::TranslateError;
use crate::lower::LOWERINGS;
use crate::module::{self, EntryPoint, Section, SpirvModule};
use crate::spirv::{self, decoration, op, storage_class};

/// Result of translating one IR stream.
#[derive(Clone, Debug, Default)]
pub struct Translation {
    /// The module words, header first. Empty when translation stopped.
    pub words: Vec<u32>,
    /// Recoverable problems. The module is best-effort when non-empty.
    pub errors: Vec<CompileError>,
    /// The problem translation stopped at, if any.
    pub fatal: Option<TranslateError>,
}

impl Translation {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.fatal.is_none()
    }

    /// Words serialized little-endian.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }
}

/// Translates a finished IR stream into a SPIR-V module.
pub fn translate(asm: &Assembler, settings: &CompilerSettings) -> Translation {
    let mut translator = Translator::new(asm);
    let fatal = translator.run().err();
    let (major, minor) = settings.spirv_version;
    let words = match &fatal {
        Some(err) => {
            log::error!("SPIR-V translation stopped: {err}");
            Vec::new()
        }
        None => translator.module.assemble(spirv::version(major, minor)),
    };
    for dropped in translator.module.take_oversized() {
        translator.errors.push(CompileError::new(
            CompileStage::OutEmit,
            oversized_message(dropped.opcode, dropped.words),
        ));
    }
    let errors = translator.errors.take();
    log::debug!(
        "translated {} instructions into {} words ({} errors)",
        asm.len(),
        words.len(),
        errors.len()
    );
    Translation {
        words,
        errors,
        fatal,
    }
}

fn oversized_message(opcode: u16, words: usize) -> String {
    format!(
        "opcode {opcode} needs {words} operand words, more than the {} one instruction holds",
        module::MAX_OPERAND_WORDS
    )
}

/// A pointer a value was loaded through, kept so assignments can store back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Place {
    pub pointer: u32,
    pub storage_class: u32,
    /// Binary type of the pointee.
    pub pointee: u32,
}

/// The function whose body is being written.
#[derive(Debug)]
pub(crate) struct FunctionState {
    pub ir: Ssa,
    pub returns_void: bool,
    /// `OpFunction` and its parameters.
    pub header: Vec<u32>,
    /// `OpVariable`s, hoisted to the top of the entry block.
    pub variables: Vec<u32>,
    pub body: Vec<u32>,
    pub labelled: bool,
    pub terminated: bool,
}

impl FunctionState {
    /// Entry label, hoisted variables, then the rest of the body.
    fn finish(self) -> Vec<u32> {
        let mut words = self.header;
        let (entry, rest) = split_first_instruction(&self.body);
        words.extend_from_slice(entry);
        words.extend_from_slice(&self.variables);
        words.extend_from_slice(rest);
        module::encode(&mut words, op::FUNCTION_END, &[]);
        words
    }
}

fn split_first_instruction(words: &[u32]) -> (&[u32], &[u32]) {
    let len = words.first().map_or(0, |w| (w >> 16) as usize);
    words.split_at(len.min(words.len()))
}

/// Scalar family of a type, looking through vectors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Scalar {
    Float(u32),
    Sint(u32),
    Uint(u32),
    Bool,
}

pub struct Translator<'a> {
    pub(crate) asm: &'a Assembler,
    pub(crate) code: Vec<Instruction>,
    pub(crate) module: SpirvModule,
    ids: HashMap<Ssa, u32>,
    type_ids: HashMap<Ssa, u32>,
    lowering: HashSet<Ssa>,
    pub(crate) places: HashMap<Ssa, Place>,
    pub(crate) params: HashSet<Ssa>,
    builtins: HashMap<(ShaderStage, BuiltIn), u32>,
    pub(crate) stage: Option<ShaderStage>,
    pub(crate) entry: Option<usize>,
    pub(crate) function: Option<FunctionState>,
    pub(crate) per_vertex: Option<u32>,
    pub(crate) frag_output: Option<u32>,
    errors: ErrorCollector,
}

impl<'a> Translator<'a> {
    pub fn new(asm: &'a Assembler) -> Self {
        Self {
            asm,
            code: asm.instructions().copied().collect(),
            module: SpirvModule::new(),
            ids: HashMap::new(),
            type_ids: HashMap::new(),
            lowering: HashSet::new(),
            places: HashMap::new(),
            params: HashSet::new(),
            builtins: HashMap::new(),
            stage: None,
            entry: None,
            function: None,
            per_vertex: None,
            frag_output: None,
            errors: ErrorCollector::new(CompileStage::OutEmit),
        }
    }

    /// Lowers every instruction through the dispatch table.
    pub fn run(&mut self) -> Result<(), TranslateError> {
        for index in 0..self.code.len() {
            let inst = self.code[index];
            LOWERINGS[inst.opcode as usize](self, index, &inst)?;
        }
        if let Some(function) = self.function.take() {
            self.errors.push(CompileError::new(
                CompileStage::OutEmit,
                format!("{} was never closed", function.ir),
            ));
            self.close_function(function);
        }
        if let Some(stage) = self.stage {
            self.errors.push(CompileError::new(
                CompileStage::OutEmit,
                format!("{stage} shader stage was never closed"),
            ));
        }
        let names: Vec<(Ssa, String)> = self
            .asm
            .debug_names()
            .map(|(ssa, name)| (ssa, name.to_string()))
            .collect();
        for (ssa, name) in names {
            if let Some(&id) = self.ids.get(&ssa) {
                self.module.name(id, &name);
            }
        }
        Ok(())
    }

    pub(crate) fn error(&mut self, inst: &Instruction, message: impl Display) {
        let message = format!("{} {}: {message}", inst.id, inst.opcode);
        log::debug!("{message}");
        self.errors
            .push(CompileError::new(CompileStage::OutEmit, message).at(inst.location));
    }

    /// Binary id standing for `ssa`, allocated on first use.
    pub(crate) fn id(&mut self, ssa: Ssa) -> u32 {
        if let Some(&id) = self.ids.get(&ssa) {
            return id;
        }
        let id = self.module.alloc_id();
        self.ids.insert(ssa, id);
        id
    }

    /// Makes `ssa` stand for an existing binary id.
    pub(crate) fn alias(&mut self, ssa: Ssa, id: u32) {
        self.ids.insert(ssa, id);
    }

    /// Binary type for the IR type `ty`.
    pub(crate) fn lower_type(&mut self, ty: Ssa) -> Option<u32> {
        if let Some(&id) = self.type_ids.get(&ty) {
            return Some(id);
        }
        let low = self.asm.low_type(ty)?.clone();
        if !self.lowering.insert(ty) {
            return None;
        }
        let id = self.lower_low_type(ty, &low);
        self.lowering.remove(&ty);
        let id = id?;
        self.type_ids.insert(ty, id);
        Some(id)
    }

    fn lower_low_type(&mut self, ty: Ssa, low: &LowType) -> Option<u32> {
        Some(match *low {
            LowType::Void => self.module.type_void(),
            LowType::Bool => self.module.type_bool(),
            LowType::Float { width } => self.module.type_float(width),
            LowType::Sint { width } => self.module.type_int(width, true),
            LowType::Uint { width } => self.module.type_int(width, false),
            LowType::Vector { inner, lanes } => {
                let component = self.lower_nested(inner)?;
                self.module.type_vector(component, lanes)
            }
            LowType::Matrix {
                inner,
                columns,
                rows,
            } => {
                let component = self.lower_nested(inner)?;
                let column = self.module.type_vector(component, rows);
                self.module.ty(op::TYPE_MATRIX, &[column, columns])
            }
            LowType::Array { inner, length } => {
                let element = self.lower_nested(inner)?;
                self.module.type_array(element, length)
            }
            LowType::Pointer { inner } => {
                let pointee = self.lower_nested(inner)?;
                self.module.type_pointer(storage_class::FUNCTION, pointee)
            }
            LowType::Tuple { a, b } => {
                let a = self.lower_nested(a)?;
                let b = self.lower_nested(b)?;
                self.module.ty(op::TYPE_STRUCT, &[a, b])
            }
            LowType::Struct(_) => {
                let layout = self.asm.struct_layout(ty)?.clone();
                let mut members = Vec::with_capacity(layout.members().len());
                for (_, member) in layout.members() {
                    members.push(self.lower_type(*member)?);
                }
                let id = self.module.unique_ty(op::TYPE_STRUCT, &members);
                self.module.name(id, &layout.name);
                for (index, (name, _)) in layout.members().iter().enumerate() {
                    self.module.member_name(id, index as u32, name);
                }
                id
            }
        })
    }

    fn lower_nested(&mut self, handle: Handle<LowType>) -> Option<u32> {
        let ssa = self.asm.type_id(handle)?;
        self.lower_type(ssa)
    }

    /// Like [`lower_type`](Self::lower_type), recording an error on failure.
    pub(crate) fn require_type(&mut self, inst: &Instruction, ty: Ssa) -> Option<u32> {
        let lowered = self.lower_type(ty);
        if lowered.is_none() {
            self.error(inst, format!("{ty} is not a type with a SPIR-V form"));
        }
        lowered
    }

    /// Scalar family of the IR type `ty`.
    pub(crate) fn scalar(&self, ty: Ssa) -> Option<Scalar> {
        let low = match self.asm.low_type(ty)? {
            LowType::Vector { inner, .. } => self.asm.resolve(*inner),
            other => other,
        };
        match *low {
            LowType::Float { width } => Some(Scalar::Float(width)),
            LowType::Sint { width } => Some(Scalar::Sint(width)),
            LowType::Uint { width } => Some(Scalar::Uint(width)),
            LowType::Bool => Some(Scalar::Bool),
            _ => None,
        }
    }

    /// IR type of a value or variable.
    pub(crate) fn type_of(&self, ssa: Ssa) -> Ssa {
        match self.asm.code_for(ssa) {
            Some(inst) if inst.opcode.is_var() => inst.refs[0],
            Some(inst) => inst.result_type,
            None => Ssa::VOID,
        }
    }

    /// Binary id of the value `ssa`. Variables are loaded.
    pub(crate) fn value(&mut self, inst: &Instruction, ssa: Ssa) -> u32 {
        if !self.params.contains(&ssa) && self.asm.opcode_for(ssa).is_var() {
            if let Some(place) = self.places.get(&ssa).copied() {
                let loaded = self.module.alloc_id();
                if self.load(inst, place, loaded) {
                    return loaded;
                }
            }
        }
        self.id(ssa)
    }

    /// Loads through `place` into `id`.
    pub(crate) fn load(&mut self, inst: &Instruction, place: Place, id: u32) -> bool {
        self.emit_fn(inst, op::LOAD, &[place.pointee, id, place.pointer])
    }

    /// Appends to the current function body. Records an error and returns
    /// `false` outside of a function or when the operands do not fit.
    pub(crate) fn emit_fn(&mut self, inst: &Instruction, opcode: u16, operands: &[u32]) -> bool {
        if self.function.is_none() {
            self.error(inst, "has no meaning outside of a function");
            return false;
        }
        self.open_block();
        let written = match self.function.as_mut() {
            Some(function) => module::encode(&mut function.body, opcode, operands),
            None => false,
        };
        if !written {
            self.error(inst, oversized_message(opcode, operands.len()));
        }
        written
    }

    /// Starts a block if the body has none open.
    fn open_block(&mut self) {
        let needs_label = match &self.function {
            Some(function) => !function.labelled || function.terminated,
            None => false,
        };
        if needs_label {
            let label = self.module.alloc_id();
            if let Some(function) = self.function.as_mut() {
                module::encode(&mut function.body, op::LABEL, &[label]);
                function.labelled = true;
                function.terminated = false;
            }
        }
    }

    /// Writes a block terminator.
    pub(crate) fn terminate(&mut self, inst: &Instruction, opcode: u16, operands: &[u32]) {
        if self.emit_fn(inst, opcode, operands) {
            if let Some(function) = self.function.as_mut() {
                function.terminated = true;
            }
        }
    }

    /// Starts the block named by `label`, closing the previous one with a
    /// branch when it falls through.
    pub(crate) fn begin_block(&mut self, inst: &Instruction, label: u32) {
        let Some(function) = self.function.as_mut() else {
            self.error(inst, "has no meaning outside of a function");
            return;
        };
        if function.labelled && !function.terminated {
            module::encode(&mut function.body, op::BRANCH, &[label]);
        }
        module::encode(&mut function.body, op::LABEL, &[label]);
        function.labelled = true;
        function.terminated = false;
    }

    pub(crate) fn close_function(&mut self, mut function: FunctionState) {
        if !function.labelled || !function.terminated {
            if !function.labelled {
                let label = self.module.alloc_id();
                module::encode(&mut function.body, op::LABEL, &[label]);
            }
            let opcode = if function.returns_void {
                op::RETURN
            } else {
                op::UNREACHABLE
            };
            module::encode(&mut function.body, opcode, &[]);
        }
        let words = function.finish();
        self.module.append(Section::Functions, &words);
    }

    /// Declares a variable. Function-local ones are hoisted into the entry
    /// block; the rest are module globals.
    pub(crate) fn declare_variable(
        &mut self,
        inst: &Instruction,
        id: u32,
        storage_class: u32,
        pointee: u32,
        init: Option<u32>,
    ) -> Option<Place> {
        let pointer_ty = self.module.type_pointer(storage_class, pointee);
        let mut operands = vec![pointer_ty, id, storage_class];
        operands.extend(init);
        if storage_class == storage_class::FUNCTION {
            let Some(function) = self.function.as_mut() else {
                self.error(inst, "function variable outside of a function");
                return None;
            };
            module::encode(&mut function.variables, op::VARIABLE, &operands);
        } else {
            self.module.emit(Section::Globals, op::VARIABLE, &operands);
        }
        Some(Place {
            pointer: id,
            storage_class,
            pointee,
        })
    }

    /// Adds a variable to the current entry point's interface.
    pub(crate) fn add_interface(&mut self, var: u32) {
        let Some(index) = self.entry else {
            return;
        };
        if let Some(entry) = self.module.entry_point_mut(index) {
            if !entry.interface.contains(&var) {
                entry.interface.push(var);
            }
        }
    }

    pub(crate) fn begin_entry_point(&mut self, model: u32, interface: Vec<u32>) {
        let index = self.module.add_entry_point(EntryPoint {
            model,
            function: 0,
            name: "main".into(),
            interface,
        });
        self.entry = Some(index);
    }

    /// Binary type for a built-in's value.
    pub(crate) fn builtin_type(&mut self, ty: BuiltInType) -> u32 {
        match ty {
            BuiltInType::Bool => self.module.type_bool(),
            BuiltInType::Int => self.module.type_int(32, true),
            BuiltInType::Uint => self.module.type_int(32, false),
            BuiltInType::Float => self.module.type_float(32),
            BuiltInType::Vec2 | BuiltInType::Vec3 | BuiltInType::Vec4 => {
                let f32_ = self.module.type_float(32);
                let lanes = match ty {
                    BuiltInType::Vec2 => 2,
                    BuiltInType::Vec3 => 3,
                    _ => 4,
                };
                self.module.type_vector(f32_, lanes)
            }
            BuiltInType::UVec3 => {
                let u32_ = self.module.type_int(32, false);
                self.module.type_vector(u32_, 3)
            }
        }
    }

    /// The variable backing `builtin` in the current stage, declared on
    /// first use.
    pub(crate) fn builtin_place(&mut self, builtin: BuiltIn) -> Result<Place, TranslateError> {
        let stage = self
            .stage
            .ok_or(TranslateError::BuiltInOutsideStage(builtin))?;
        let info = builtins::info(builtin);
        if !info.is_legal_in(stage) {
            return Err(TranslateError::IllegalBuiltIn { builtin, stage });
        }
        let pointee = self.builtin_type(info.ty);
        if let Some(&var) = self.builtins.get(&(stage, builtin)) {
            return Ok(Place {
                pointer: var,
                storage_class: info.storage_class,
                pointee,
            });
        }

        for &cap in info.capabilities {
            self.module.require_capability(cap);
        }
        let var = self.module.alloc_id();
        let pointer_ty = self.module.type_pointer(info.storage_class, pointee);
        self.module
            .emit(Section::Globals, op::VARIABLE, &[pointer_ty, var, info.storage_class]);
        self.module.decorate(var, decoration::BUILT_IN, &[info.spirv]);
        self.module.name(var, &format!("gl_{builtin}"));
        self.builtins.insert((stage, builtin), var);
        self.add_interface(var);
        log::trace!("declared built-in {builtin} for {stage} as %{var}");
        Ok(Place {
            pointer: var,
            storage_class: info.storage_class,
            pointee,
        })
    }

    /// The `count` trailers of `trailer` kind following the header at
    /// `index`. Fewer are returned when the stream runs short.
    pub(crate) fn trailers(&self, index: usize, trailer: Opcode, count: u32) -> Vec<Instruction> {
        self.code
            .iter()
            .skip(index + 1)
            .take(count as usize)
            .take_while(|inst| inst.opcode == trailer)
            .copied()
            .collect()
    }
}
