//! The fixed-shape instruction tuple and SSA identifiers.

use std::fmt;

use crate::opcode::Opcode;

/// An SSA identifier. `Ssa::VOID` (0) means "no value".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ssa(pub u32);

impl Ssa {
    pub const VOID: Ssa = Ssa(0);

    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    pub const fn is_void(self) -> bool {
        self.0 == 0
    }

    /// Slot of this id in per-id tables.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Ssa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Position in the source text an instruction was lowered from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
}

impl SourceLocation {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// One IR operation.
///
/// Every non-void entry of `refs` and `result_type` names an instruction
/// that precedes this one in the stream, except branch targets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Instruction {
    pub id: Ssa,
    pub opcode: Opcode,
    pub operands: [u32; 3],
    pub refs: [Ssa; 3],
    pub result_type: Ssa,
    pub location: Option<SourceLocation>,
}

impl Instruction {
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: Ssa) -> Self {
        self.id = id;
        self
    }

    pub fn with_operands(mut self, operands: [u32; 3]) -> Self {
        self.operands = operands;
        self
    }

    pub fn with_refs(mut self, refs: [Ssa; 3]) -> Self {
        self.refs = refs;
        self
    }

    pub fn with_result_type(mut self, ty: Ssa) -> Self {
        self.result_type = ty;
        self
    }

    pub fn at(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    /// Non-void ids read by this instruction: `refs` then `result_type`.
    pub fn referenced(&self) -> impl Iterator<Item = Ssa> + '_ {
        self.refs
            .iter()
            .copied()
            .chain(std::iter::once(self.result_type))
            .filter(|ssa| !ssa.is_void())
    }

    /// Mutable access to every reference slot, void ones included.
    pub(crate) fn reference_slots_mut(&mut self) -> impl Iterator<Item = &mut Ssa> {
        self.refs
            .iter_mut()
            .chain(std::iter::once(&mut self.result_type))
    }

    /// Operand pair read as one 64-bit literal (low word first).
    pub fn wide_operand(&self) -> u64 {
        u64::from(self.operands[0]) | (u64::from(self.operands[1]) << 32)
    }
}

/// A value paired with its type, as produced by emitting an expression.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TypedValue {
    pub ty: Ssa,
    pub value: Ssa,
}

impl TypedValue {
    pub const VOID: TypedValue = TypedValue {
        ty: Ssa::VOID,
        value: Ssa::VOID,
    };

    pub fn new(ty: Ssa, value: Ssa) -> Self {
        Self { ty, value }
    }
}

/// Splits a 64-bit literal into the two operand words.
pub fn split_wide(value: u64) -> [u32; 2] {
    [value as u32, (value >> 32) as u32]
}
