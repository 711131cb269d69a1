//! Structural search over the instruction stream.

use crate::assembler::Assembler;
use crate::instruction::{Instruction, Ssa};
use crate::opcode::Opcode;

/// A pattern for [`Assembler::find_pattern`]. Unset fields match anything.
#[derive(Clone, Debug, Default)]
pub struct Finder {
    opcode: Option<Opcode>,
    operands: [Option<u32>; 3],
    refs: [Option<Ssa>; 3],
    result_type: Option<Ssa>,
    uses: Option<Ssa>,
    offset: usize,
    limit: Option<usize>,
}

impl Finder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn opcode(mut self, opcode: Opcode) -> Self {
        self.opcode = Some(opcode);
        self
    }

    /// Requires `operands[slot] == value`.
    pub fn operand(mut self, slot: usize, value: u32) -> Self {
        if let Some(o) = self.operands.get_mut(slot) {
            *o = Some(value);
        }
        self
    }

    /// Requires `refs[slot] == ssa`.
    pub fn reference(mut self, slot: usize, ssa: Ssa) -> Self {
        if let Some(r) = self.refs.get_mut(slot) {
            *r = Some(ssa);
        }
        self
    }

    pub fn result_type(mut self, ty: Ssa) -> Self {
        self.result_type = Some(ty);
        self
    }

    /// Requires `ssa` in any reference slot or as the result type.
    pub fn uses(mut self, ssa: Ssa) -> Self {
        self.uses = Some(ssa);
        self
    }

    /// Skips the first `offset` instructions of the stream.
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Stops after `limit` matches.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, inst: &Instruction) -> bool {
        if self.opcode.is_some_and(|op| op != inst.opcode) {
            return false;
        }
        let operands_ok = self
            .operands
            .iter()
            .zip(inst.operands)
            .all(|(want, have)| want.is_none_or(|w| w == have));
        let refs_ok = self
            .refs
            .iter()
            .zip(inst.refs)
            .all(|(want, have)| want.is_none_or(|w| w == have));
        operands_ok
            && refs_ok
            && self.result_type.is_none_or(|t| t == inst.result_type)
            && self
                .uses
                .is_none_or(|u| inst.refs.contains(&u) || inst.result_type == u)
    }
}

impl Assembler {
    /// Instructions matching `finder`, in stream order.
    pub fn find_pattern(&self, finder: &Finder) -> Vec<Instruction> {
        self.instructions()
            .skip(finder.offset)
            .filter(|inst| finder.matches(inst))
            .take(finder.limit.unwrap_or(usize::MAX))
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (Assembler, Ssa, Ssa) {
        let mut asm = Assembler::new();
        let i32_ = asm.type_int(true, 32).unwrap();
        let a = asm.push_value(Instruction::new(Opcode::ValueLitInt).with_operands([1, 0, 0]), i32_);
        let b = asm.push_value(Instruction::new(Opcode::ValueLitInt).with_operands([2, 0, 0]), i32_);
        for _ in 0..3 {
            asm.push_value(
                Instruction::new(Opcode::ValueExpr).with_refs([a.value, b.value, Ssa::VOID]),
                i32_,
            );
        }
        (asm, i32_, a.value)
    }

    #[test]
    fn filters_by_opcode_and_operand() {
        let (asm, _, _) = sample();
        let found = asm.find_pattern(&Finder::new().opcode(Opcode::ValueLitInt).operand(0, 2));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].operands[0], 2);
    }

    #[test]
    fn finds_uses_of_an_id() {
        let (asm, i32_, a) = sample();
        assert_eq!(asm.find_pattern(&Finder::new().uses(a)).len(), 3);
        assert_eq!(asm.find_pattern(&Finder::new().result_type(i32_)).len(), 5);
        assert_eq!(asm.find_pattern(&Finder::new().reference(1, a)).len(), 0);
    }

    #[test]
    fn respects_offset_and_limit() {
        let (asm, _, a) = sample();
        let exprs = Finder::new().opcode(Opcode::ValueExpr);
        assert_eq!(asm.find_pattern(&exprs.clone().limit(2)).len(), 2);
        assert_eq!(asm.find_pattern(&exprs.clone().offset(4)).len(), 2);
        let last = asm.find_pattern(&Finder::new().uses(a).offset(5));
        assert_eq!(last.len(), 1);
        assert!(asm.find_pattern(&exprs.offset(100)).is_empty());
    }
}
