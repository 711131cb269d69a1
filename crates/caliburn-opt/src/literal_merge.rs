//! Literal merging pass.
//!
//! Rewrites references to repeated literal values (same opcode, operands and
//! type) to the first occurrence. The duplicates are left unreferenced for
//! [`Flatten`](crate::Flatten) to remove.

use std::collections::HashMap;

use caliburn_ir::{Assembler, Opcode, Ssa};

use crate::Pass;

#[derive(Debug)]
pub struct LiteralMerge;

fn is_mergeable(opcode: Opcode) -> bool {
    matches!(
        opcode,
        Opcode::ValueLitInt
            | Opcode::ValueLitFp
            | Opcode::ValueLitBool
            | Opcode::ValueNull
            | Opcode::ValueZero
    )
}

impl Pass for LiteralMerge {
    fn name(&self) -> &str {
        "literal-merge"
    }

    fn run(&self, asm: &mut Assembler) -> bool {
        let mut canonical: HashMap<(Opcode, [u32; 3], Ssa), Ssa> = HashMap::new();
        let mut duplicates = Vec::new();
        for inst in asm.instructions() {
            if inst.id.is_void() || !is_mergeable(inst.opcode) {
                continue;
            }
            let key = (inst.opcode, inst.operands, inst.result_type);
            match canonical.get(&key) {
                Some(&first) => duplicates.push((inst.id, first)),
                None => {
                    canonical.insert(key, inst.id);
                }
            }
        }

        let mut rewritten = 0;
        for (duplicate, first) in duplicates {
            if asm.ref_count(duplicate) > 0 {
                rewritten += asm.replace(duplicate, first);
            }
        }
        if rewritten > 0 {
            log::debug!("literal-merge: {rewritten} references redirected");
        }
        rewritten > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caliburn_ir::{Instruction, Operator};

    #[test]
    fn equal_literals_share_one_id() {
        let mut asm = Assembler::new();
        let i32_ = asm.type_int(true, 32).unwrap();
        let a = asm.push_value(Instruction::new(Opcode::ValueLitInt).with_operands([7, 0, 0]), i32_);
        let b = asm.push_value(Instruction::new(Opcode::ValueLitInt).with_operands([7, 0, 0]), i32_);
        let sum = asm.push_value(
            Instruction::new(Opcode::ValueExpr)
                .with_operands([Operator::Add as u32, 0, 0])
                .with_refs([a.value, b.value, Ssa::VOID]),
            i32_,
        );

        assert!(LiteralMerge.run(&mut asm));
        let expr = asm.code_for(sum.value).unwrap();
        assert_eq!(expr.refs[..2], [a.value, a.value]);
        assert_eq!(asm.ref_count(b.value), 0);
        assert!(!LiteralMerge.run(&mut asm));
    }

    #[test]
    fn different_types_are_kept_apart() {
        let mut asm = Assembler::new();
        let i32_ = asm.type_int(true, 32).unwrap();
        let u32_ = asm.type_int(false, 32).unwrap();
        let a = asm.push_value(Instruction::new(Opcode::ValueLitInt).with_operands([1, 0, 0]), i32_);
        let b = asm.push_value(Instruction::new(Opcode::ValueLitInt).with_operands([1, 0, 0]), u32_);
        asm.push(Instruction::new(Opcode::ReturnValue).with_refs([a.value, Ssa::VOID, Ssa::VOID]));
        asm.push(Instruction::new(Opcode::ReturnValue).with_refs([b.value, Ssa::VOID, Ssa::VOID]));

        assert!(!LiteralMerge.run(&mut asm));
    }
}
