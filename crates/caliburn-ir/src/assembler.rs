//! The IR assembler: owner of the instruction stream.
//!
//! The assembler hands out SSA ids, keeps an exact reference count for every
//! id, tracks the open section and loop stacks, and records recoverable
//! problems in its [`ErrorCollector`] so that lowering can carry on and
//! report several errors in one pass.

use std::collections::{BTreeMap, HashMap};

use crate::arena::{Arena, Handle, Range};
use crate::error::{CompileStage, ErrorCollector, IrError};
use crate::instruction::{Instruction, SourceLocation, Ssa, TypedValue};
use crate::low_type::TypeRegistry;
use crate::opcode::{Opcode, SectionKind};

/// Break and continue targets of an enclosing loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoopContext {
    pub continue_label: Ssa,
    pub break_label: Ssa,
}

#[derive(Clone, Debug)]
pub(crate) struct OpenSection {
    pub(crate) kind: SectionKind,
    pub(crate) header: Ssa,
    pub(crate) start: Handle<Instruction>,
    pub(crate) loops: Vec<LoopContext>,
}

/// A section whose end marker has been pushed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Section {
    pub kind: SectionKind,
    /// Id of the header instruction.
    pub header: Ssa,
    /// Header through footer, inclusive.
    pub range: Range<Instruction>,
}

/// Direction of a shader interface variable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IoDirection {
    Input,
    Output,
}

impl IoDirection {
    fn describe(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
        }
    }
}

/// A shader interface variable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderIo {
    pub name: String,
    pub direction: IoDirection,
    pub var: Ssa,
    pub ty: Ssa,
    pub location: u32,
}

#[derive(Clone, Debug)]
pub struct Assembler {
    pub(crate) code: Arena<Instruction>,
    /// Registered opcode per id; slot 0 is the void id.
    pub(crate) ssa_opcodes: Vec<Opcode>,
    pub(crate) ref_counts: Vec<u32>,
    /// Defining instruction per id.
    pub(crate) ssa_code: Vec<Option<Handle<Instruction>>>,
    pub(crate) sections: Vec<OpenSection>,
    pub(crate) root_loops: Vec<LoopContext>,
    pub(crate) closed: Vec<Section>,
    pub(crate) strings: Vec<String>,
    string_index: HashMap<String, u32>,
    pub(crate) names: BTreeMap<Ssa, String>,
    pub(crate) io: Vec<ShaderIo>,
    pub(crate) types: TypeRegistry,
    pub(crate) errors: ErrorCollector,
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Assembler {
    pub fn new() -> Self {
        Self {
            code: Arena::new(),
            ssa_opcodes: vec![Opcode::Unknown],
            ref_counts: vec![0],
            ssa_code: vec![None],
            sections: Vec::new(),
            root_loops: Vec::new(),
            closed: Vec::new(),
            strings: Vec::new(),
            string_index: HashMap::new(),
            names: BTreeMap::new(),
            io: Vec::new(),
            types: TypeRegistry::default(),
            errors: ErrorCollector::new(CompileStage::CllrEmit),
        }
    }

    /// Allocates the next id for an instruction of `opcode`.
    pub fn create_ssa(&mut self, opcode: Opcode) -> Ssa {
        let id = Ssa(u32::try_from(self.ssa_opcodes.len()).unwrap_or_else(|_| {
            panic!("SSA id space exhausted")
        }));
        self.ssa_opcodes.push(opcode);
        self.ref_counts.push(0);
        self.ssa_code.push(None);
        id
    }

    /// The id the next `create_ssa` call will return.
    pub fn next_ssa(&self) -> Ssa {
        Ssa(self.ssa_opcodes.len() as u32)
    }

    fn is_allocated(&self, ssa: Ssa) -> bool {
        !ssa.is_void() && ssa.index() < self.ssa_opcodes.len()
    }

    /// Appends `inst` to the stream and counts its references.
    ///
    /// Bookkeeping problems (unallocated ids, opcode mismatches, a second
    /// definition) are recorded; the instruction is appended regardless.
    pub fn push(&mut self, inst: Instruction) -> Ssa {
        let handle = self.code.next_handle();
        if !inst.id.is_void() {
            if !self.is_allocated(inst.id) {
                self.report_at(IrError::UnknownSsa(inst.id), inst.location);
            } else {
                let registered = self.ssa_opcodes[inst.id.index()];
                if registered != inst.opcode {
                    self.report_at(
                        IrError::OpcodeMismatch {
                            id: inst.id,
                            registered,
                            found: inst.opcode,
                        },
                        inst.location,
                    );
                }
                if self.ssa_code[inst.id.index()].is_some() {
                    self.report_at(IrError::Redefinition(inst.id), inst.location);
                } else {
                    self.ssa_code[inst.id.index()] = Some(handle);
                }
            }
        }
        for r in inst.referenced() {
            if self.is_allocated(r) {
                self.ref_counts[r.index()] += 1;
            } else {
                self.report_at(IrError::UnknownSsa(r), inst.location);
            }
        }
        self.code.append(inst);
        inst.id
    }

    /// Allocates an id for `inst` and pushes it.
    pub fn push_new(&mut self, inst: Instruction) -> Ssa {
        let id = self.create_ssa(inst.opcode);
        self.push(inst.with_id(id))
    }

    /// Pushes a fresh value instruction typed `ty`.
    pub fn push_value(&mut self, inst: Instruction, ty: Ssa) -> TypedValue {
        let value = self.push_new(inst.with_result_type(ty));
        TypedValue::new(ty, value)
    }

    pub fn push_many(&mut self, insts: impl IntoIterator<Item = Instruction>) {
        for inst in insts {
            self.push(inst);
        }
    }

    /// Rewrites every reference to `old` into a reference to `new`.
    ///
    /// Returns the number of rewritten slots; `old`'s count moves to `new`.
    pub fn replace(&mut self, old: Ssa, new: Ssa) -> usize {
        if old.is_void() {
            self.report(IrError::ReplaceVoid);
            return 0;
        }
        for id in [old, new] {
            if !id.is_void() && !self.is_allocated(id) {
                self.report(IrError::UnknownSsa(id));
                return 0;
            }
        }
        if old == new {
            return 0;
        }

        let mut rewritten = 0;
        for (_, inst) in self.code.iter_mut() {
            for slot in inst.reference_slots_mut() {
                if *slot == old {
                    *slot = new;
                    rewritten += 1;
                }
            }
        }
        let moved = std::mem::take(&mut self.ref_counts[old.index()]);
        if !new.is_void() {
            self.ref_counts[new.index()] += moved;
        }
        log::trace!("replace {old} -> {new}: {rewritten} references");
        rewritten
    }

    /// Pushes a section header and opens the section.
    pub fn begin_section(&mut self, header: Instruction) -> Result<Ssa, IrError> {
        let kind = header
            .opcode
            .opens_section()
            .ok_or(IrError::NotASectionMarker(header.opcode))?;
        let start = self.code.next_handle();
        let id = self.push(header);
        log::debug!("begin {kind} {id}");
        self.sections.push(OpenSection {
            kind,
            header: id,
            start,
            loops: Vec::new(),
        });
        Ok(id)
    }

    /// Pushes a section footer and closes the innermost open section.
    ///
    /// A footer that does not match the innermost section is not appended.
    pub fn end_section(&mut self, footer: Instruction) -> Result<(), IrError> {
        let found = footer
            .opcode
            .closes_section()
            .ok_or(IrError::NotASectionMarker(footer.opcode))?;
        let expected = self.sections.last().map(|s| s.kind);
        if expected != Some(found) {
            return Err(IrError::SectionMismatch { expected, found });
        }
        let end = self.code.next_handle();
        self.push(footer);
        if let Some(open) = self.sections.pop() {
            log::debug!("end {found} {}", open.header);
            self.closed.push(Section {
                kind: open.kind,
                header: open.header,
                range: Range::inclusive(open.start, end),
            });
        }
        Ok(())
    }

    /// Kind and header of the innermost open section.
    pub fn current_section(&self) -> Option<(SectionKind, Ssa)> {
        self.sections.last().map(|s| (s.kind, s.header))
    }

    pub fn closed_sections(&self) -> &[Section] {
        &self.closed
    }

    /// Instructions of a closed section, header and footer included.
    pub fn section_body(&self, section: &Section) -> &[Instruction] {
        self.code.slice(section.range)
    }

    fn loops(&self) -> &Vec<LoopContext> {
        self.sections.last().map_or(&self.root_loops, |s| &s.loops)
    }

    fn loops_mut(&mut self) -> &mut Vec<LoopContext> {
        match self.sections.last_mut() {
            Some(section) => &mut section.loops,
            None => &mut self.root_loops,
        }
    }

    pub fn push_loop(&mut self, continue_label: Ssa, break_label: Ssa) {
        self.loops_mut().push(LoopContext {
            continue_label,
            break_label,
        });
    }

    pub fn pop_loop(&mut self) -> Option<LoopContext> {
        self.loops_mut().pop()
    }

    pub fn current_loop(&self) -> Option<LoopContext> {
        self.loops().last().copied()
    }

    /// Jumps to the innermost loop's break label.
    pub fn push_break(&mut self) -> Result<(), IrError> {
        let ctx = self
            .current_loop()
            .ok_or(IrError::NoEnclosingLoop { statement: "break" })?;
        self.push(Instruction::new(Opcode::Jump).with_refs([ctx.break_label, Ssa::VOID, Ssa::VOID]));
        Ok(())
    }

    /// Jumps to the innermost loop's continue label.
    pub fn push_continue(&mut self) -> Result<(), IrError> {
        let ctx = self
            .current_loop()
            .ok_or(IrError::NoEnclosingLoop { statement: "continue" })?;
        self.push(
            Instruction::new(Opcode::Jump).with_refs([ctx.continue_label, Ssa::VOID, Ssa::VOID]),
        );
        Ok(())
    }

    /// Reports every section that is still open.
    pub fn finish(&mut self) {
        let open = std::mem::take(&mut self.sections);
        for section in open.into_iter().rev() {
            self.report(IrError::UnclosedSection {
                kind: section.kind,
                header: section.header,
            });
        }
    }

    /// Interns a string and returns its index.
    pub fn add_string(&mut self, s: &str) -> u32 {
        if let Some(&index) = self.string_index.get(s) {
            return index;
        }
        let index = self.strings.len() as u32;
        self.strings.push(s.to_string());
        self.string_index.insert(s.to_string(), index);
        index
    }

    pub fn string(&self, index: u32) -> Option<&str> {
        self.strings.get(index as usize).map(String::as_str)
    }

    pub fn strings(&self) -> &[String] {
        &self.strings
    }

    pub fn set_debug_name(&mut self, ssa: Ssa, name: impl Into<String>) {
        if !ssa.is_void() {
            self.names.insert(ssa, name.into());
        }
    }

    pub fn debug_name(&self, ssa: Ssa) -> Option<&str> {
        self.names.get(&ssa).map(String::as_str)
    }

    /// Named ids, in id order.
    pub fn debug_names(&self) -> impl Iterator<Item = (Ssa, &str)> {
        self.names.iter().map(|(&ssa, name)| (ssa, name.as_str()))
    }

    /// Declares (or finds) the stage input called `name`.
    pub fn push_input(&mut self, name: &str, ty: Ssa) -> Result<Ssa, IrError> {
        self.push_io(name, ty, IoDirection::Input)
    }

    /// Declares (or finds) the stage output called `name`.
    pub fn push_output(&mut self, name: &str, ty: Ssa) -> Result<Ssa, IrError> {
        self.push_io(name, ty, IoDirection::Output)
    }

    fn push_io(&mut self, name: &str, ty: Ssa, direction: IoDirection) -> Result<Ssa, IrError> {
        if let Some(existing) = self.io.iter().find(|io| io.name == name) {
            if existing.direction != direction {
                return Err(IrError::IoDirectionMismatch {
                    name: name.to_string(),
                    existing: existing.direction.describe(),
                });
            }
            return Ok(existing.var);
        }
        let location = self.io.iter().filter(|io| io.direction == direction).count() as u32;
        let opcode = match direction {
            IoDirection::Input => Opcode::VarShaderIn,
            IoDirection::Output => Opcode::VarShaderOut,
        };
        let var = self.push_new(
            Instruction::new(opcode)
                .with_operands([location, 0, 0])
                .with_refs([ty, Ssa::VOID, Ssa::VOID]),
        );
        self.register_io(name, direction, var, ty, location);
        Ok(var)
    }

    pub(crate) fn register_io(
        &mut self,
        name: &str,
        direction: IoDirection,
        var: Ssa,
        ty: Ssa,
        location: u32,
    ) {
        self.set_debug_name(var, name);
        self.io.push(ShaderIo {
            name: name.to_string(),
            direction,
            var,
            ty,
            location,
        });
    }

    pub fn shader_io(&self) -> &[ShaderIo] {
        &self.io
    }

    /// The instruction defining `ssa`.
    pub fn code_for(&self, ssa: Ssa) -> Option<&Instruction> {
        let handle = (*self.ssa_code.get(ssa.index())?)?;
        self.code.try_get(handle)
    }

    /// Registered opcode of `ssa`, `Unknown` for void or unallocated ids.
    pub fn opcode_for(&self, ssa: Ssa) -> Opcode {
        if ssa.is_void() {
            return Opcode::Unknown;
        }
        self.ssa_opcodes
            .get(ssa.index())
            .copied()
            .unwrap_or(Opcode::Unknown)
    }

    /// Stream position of the instruction defining `ssa`.
    pub fn handle_for(&self, ssa: Ssa) -> Option<Handle<Instruction>> {
        self.ssa_code.get(ssa.index()).copied().flatten()
    }

    pub fn ref_count(&self, ssa: Ssa) -> u32 {
        self.ref_counts.get(ssa.index()).copied().unwrap_or(0)
    }

    pub fn instructions(&self) -> impl DoubleEndedIterator<Item = &Instruction> {
        self.code.iter().map(|(_, inst)| inst)
    }

    pub fn code(&self) -> &Arena<Instruction> {
        &self.code
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn errors(&self) -> &ErrorCollector {
        &self.errors
    }

    pub fn errors_mut(&mut self) -> &mut ErrorCollector {
        &mut self.errors
    }

    pub fn report(&mut self, error: IrError) {
        self.errors.record(&error, None);
    }

    pub fn report_at(&mut self, error: IrError, location: Option<SourceLocation>) {
        self.errors.record(&error, location);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(asm: &mut Assembler) -> Ssa {
        asm.push_new(Instruction::new(Opcode::Label))
    }

    #[test]
    fn ids_start_at_one() {
        let mut asm = Assembler::new();
        assert_eq!(asm.next_ssa(), Ssa(1));
        let a = asm.create_ssa(Opcode::Label);
        let b = asm.create_ssa(Opcode::Label);
        assert_eq!((a, b), (Ssa(1), Ssa(2)));
        assert_eq!(asm.opcode_for(b), Opcode::Label);
        assert_eq!(asm.opcode_for(Ssa::VOID), Opcode::Unknown);
    }

    #[test]
    fn push_counts_references() {
        let mut asm = Assembler::new();
        let target = label(&mut asm);
        asm.push(Instruction::new(Opcode::Jump).with_refs([target, Ssa::VOID, Ssa::VOID]));
        asm.push(Instruction::new(Opcode::Jump).with_refs([target, Ssa::VOID, Ssa::VOID]));
        assert_eq!(asm.ref_count(target), 2);
        assert!(asm.errors().is_empty());
    }

    #[test]
    fn opcode_mismatch_is_recorded_and_appended() {
        let mut asm = Assembler::new();
        let id = asm.create_ssa(Opcode::Label);
        asm.push(Instruction::new(Opcode::ValueNull).with_id(id));
        assert_eq!(asm.len(), 1);
        assert_eq!(asm.errors().len(), 1);
        assert!(asm.errors().errors()[0].message.contains("LABEL"));
    }

    #[test]
    fn replace_moves_counts() {
        let mut asm = Assembler::new();
        let a = label(&mut asm);
        let b = label(&mut asm);
        asm.push(Instruction::new(Opcode::Jump).with_refs([a, Ssa::VOID, Ssa::VOID]));
        asm.push(Instruction::new(Opcode::Jump).with_refs([b, Ssa::VOID, Ssa::VOID]));
        assert_eq!(asm.replace(a, b), 1);
        assert_eq!(asm.ref_count(a), 0);
        assert_eq!(asm.ref_count(b), 2);
        assert!(asm.instructions().all(|i| !i.refs.contains(&a)));
    }

    #[test]
    fn replace_void_fails() {
        let mut asm = Assembler::new();
        let a = label(&mut asm);
        assert_eq!(asm.replace(Ssa::VOID, a), 0);
        assert_eq!(asm.errors().len(), 1);
    }

    #[test]
    fn sections_nest_and_close() {
        let mut asm = Assembler::new();
        let stage = asm.create_ssa(Opcode::ShaderStage);
        asm.begin_section(Instruction::new(Opcode::ShaderStage).with_id(stage))
            .unwrap();
        let func = asm.create_ssa(Opcode::Function);
        asm.begin_section(Instruction::new(Opcode::Function).with_id(func))
            .unwrap();
        assert_eq!(asm.current_section(), Some((SectionKind::Function, func)));

        let err = asm
            .end_section(Instruction::new(Opcode::ShaderStageEnd))
            .unwrap_err();
        assert_eq!(
            err,
            IrError::SectionMismatch {
                expected: Some(SectionKind::Function),
                found: SectionKind::ShaderStage
            }
        );

        asm.end_section(Instruction::new(Opcode::FunctionEnd).with_refs([func, Ssa::VOID, Ssa::VOID]))
            .unwrap();
        asm.end_section(Instruction::new(Opcode::ShaderStageEnd))
            .unwrap();
        let closed = asm.closed_sections();
        assert_eq!(closed.len(), 2);
        assert_eq!(closed[0].header, func);
        assert_eq!(asm.section_body(&closed[1]).len(), 4);
    }

    #[test]
    fn end_without_begin_is_an_error() {
        let mut asm = Assembler::new();
        assert!(asm.end_section(Instruction::new(Opcode::FunctionEnd)).is_err());
        assert!(asm.is_empty());
    }

    #[test]
    fn unclosed_sections_reported_by_finish() {
        let mut asm = Assembler::new();
        let func = asm.create_ssa(Opcode::Function);
        asm.begin_section(Instruction::new(Opcode::Function).with_id(func))
            .unwrap();
        asm.finish();
        assert_eq!(asm.errors().len(), 1);
        assert!(asm.current_section().is_none());
    }

    #[test]
    fn break_needs_a_loop() {
        let mut asm = Assembler::new();
        assert_eq!(
            asm.push_break(),
            Err(IrError::NoEnclosingLoop { statement: "break" })
        );
        let cont = label(&mut asm);
        let brk = label(&mut asm);
        asm.push_loop(cont, brk);
        asm.push_break().unwrap();
        asm.push_continue().unwrap();
        assert_eq!(asm.ref_count(brk), 1);
        assert_eq!(asm.ref_count(cont), 1);
        assert_eq!(
            asm.pop_loop(),
            Some(LoopContext {
                continue_label: cont,
                break_label: brk
            })
        );
        assert!(asm.current_loop().is_none());
    }

    #[test]
    fn loops_are_scoped_to_sections() {
        let mut asm = Assembler::new();
        let cont = label(&mut asm);
        let brk = label(&mut asm);
        asm.push_loop(cont, brk);
        let func = asm.create_ssa(Opcode::Function);
        asm.begin_section(Instruction::new(Opcode::Function).with_id(func))
            .unwrap();
        assert!(asm.current_loop().is_none());
    }

    #[test]
    fn strings_are_interned() {
        let mut asm = Assembler::new();
        let a = asm.add_string("color");
        let b = asm.add_string("normal");
        assert_eq!(asm.add_string("color"), a);
        assert_ne!(a, b);
        assert_eq!(asm.string(b), Some("normal"));
    }

    #[test]
    fn io_locations_follow_first_use() {
        let mut asm = Assembler::new();
        let ty = asm.type_float(32).unwrap();
        let uv = asm.push_input("uv", ty).unwrap();
        let normal = asm.push_input("normal", ty).unwrap();
        let color = asm.push_output("color", ty).unwrap();
        assert_eq!(asm.push_input("uv", ty).unwrap(), uv);
        assert_eq!(asm.code_for(normal).map(|i| i.operands[0]), Some(1));
        assert_eq!(asm.code_for(color).map(|i| i.operands[0]), Some(0));
        assert_eq!(asm.debug_name(uv), Some("uv"));
        assert!(matches!(
            asm.push_output("uv", ty),
            Err(IrError::IoDirectionMismatch { .. })
        ));
    }
}
