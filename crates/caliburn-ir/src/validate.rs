//! Structural validation of a finished instruction stream.
//!
//! [`ValidationLevel::Basic`] checks the invariants every backend relies on:
//! values carry a result type, nothing references itself, and references
//! point backwards (branch targets and callees excepted).
//! [`ValidationLevel::Full`] adds per-opcode shape rules.

use crate::arena::Handle;
use crate::assembler::Assembler;
use crate::error::{CompileError, CompileStage, ErrorCollector};
use crate::instruction::{Instruction, Ssa};
use crate::low_type::{
    MAX_FLOAT_BITS, MAX_INT_BITS, MAX_VECTOR_LANES, MIN_FLOAT_BITS, MIN_INT_BITS,
    MIN_VECTOR_LANES,
};
use crate::opcode::Opcode;
use crate::operator::{Operator, ShaderStage};
use crate::settings::{CompilerSettings, ValidationLevel};

/// Checks an [`Assembler`] against the configured validation level.
pub struct Validator<'a> {
    asm: &'a Assembler,
    errors: ErrorCollector,
}

impl<'a> Validator<'a> {
    /// Validates `asm` and returns every problem found.
    pub fn validate(asm: &'a Assembler, settings: &CompilerSettings) -> Vec<CompileError> {
        if settings.validation == ValidationLevel::None {
            return Vec::new();
        }
        let mut v = Validator {
            asm,
            errors: ErrorCollector::new(CompileStage::CllrValidation),
        };
        for (handle, inst) in asm.code().iter() {
            v.check_basic(handle, inst);
            if settings.validation == ValidationLevel::Full {
                v.check_shape(handle, inst);
            }
        }
        v.errors.take()
    }

    fn fail(&mut self, inst: &Instruction, message: impl std::fmt::Display) {
        let subject = if inst.id.is_void() {
            inst.opcode.to_string()
        } else {
            format!("{} {}", inst.id, inst.opcode)
        };
        self.errors
            .push(CompileError::new(CompileStage::CllrValidation, format!("{subject}: {message}")).at(inst.location));
    }

    fn check_basic(&mut self, handle: Handle<Instruction>, inst: &Instruction) {
        if inst.opcode.is_value() && inst.opcode != Opcode::ValueLitStr && inst.result_type.is_void() {
            self.fail(inst, "value has no result type");
        }
        if !inst.id.is_void() && inst.referenced().any(|r| r == inst.id) {
            self.fail(inst, "references itself");
        }
        for r in inst.referenced() {
            let target = self.asm.opcode_for(r);
            match self.asm.handle_for(r) {
                None => self.fail(inst, format_args!("{r} is never defined")),
                Some(def) if def >= handle => {
                    let forward_ok = inst.opcode.allows_forward_refs()
                        || matches!(target, Opcode::Label | Opcode::Function);
                    if !forward_ok && def != handle {
                        self.fail(inst, format_args!("{r} is used before its definition"));
                    }
                }
                Some(_) => {}
            }
        }
    }

    fn expect_type(&mut self, inst: &Instruction, ssa: Ssa, what: &str) {
        if !self.asm.opcode_for(ssa).is_type() {
            self.fail(inst, format_args!("{what} {ssa} is not a type"));
        }
    }

    fn expect_opcode(&mut self, inst: &Instruction, ssa: Ssa, want: Opcode, what: &str) {
        let found = self.asm.opcode_for(ssa);
        if found != want {
            self.fail(inst, format_args!("{what} {ssa} must be {want}, found {found}"));
        }
    }

    fn check_width(&mut self, inst: &Instruction, min: u32, max: u32) {
        let width = inst.operands[0];
        if !width.is_power_of_two() || !(min..=max).contains(&width) {
            self.fail(inst, format_args!("width {width} outside {min}..={max}"));
        }
    }

    fn check_trailers(&mut self, handle: Handle<Instruction>, inst: &Instruction, trailer: Opcode) {
        let count = inst.operands[0] as usize;
        let code = self.asm.code();
        let found = (handle.index() + 1..code.len())
            .take(count)
            .take_while(|&i| {
                code.try_get(Handle::new(i as u32))
                    .is_some_and(|next| next.opcode == trailer)
            })
            .count();
        if found != count {
            self.fail(
                inst,
                format_args!("expected {count} {trailer} trailers, found {found}"),
            );
        }
    }

    fn check_shape(&mut self, handle: Handle<Instruction>, inst: &Instruction) {
        let needs_id = inst.opcode.is_type()
            || inst.opcode.is_value()
            || inst.opcode.is_var()
            || matches!(
                inst.opcode,
                Opcode::Label | Opcode::Function | Opcode::ShaderStage
            );
        if needs_id && inst.id.is_void() {
            self.fail(inst, "missing result id");
        }
        if !needs_id && !inst.id.is_void() {
            self.fail(inst, "must not define an id");
        }
        if let Some(trailer) = inst.opcode.trailer() {
            self.check_trailers(handle, inst, trailer);
        }
        if inst.opcode.is_value() && !inst.result_type.is_void() {
            self.expect_type(inst, inst.result_type, "result type");
        }

        let [r0, r1, r2] = inst.refs;
        match inst.opcode {
            Opcode::Unknown => self.fail(inst, "unknown opcode"),
            Opcode::TypeFloat => self.check_width(inst, MIN_FLOAT_BITS, MAX_FLOAT_BITS),
            Opcode::TypeIntSign | Opcode::TypeIntUnsign => {
                self.check_width(inst, MIN_INT_BITS, MAX_INT_BITS)
            }
            Opcode::TypeVector => {
                self.expect_type(inst, r0, "element");
                if !(MIN_VECTOR_LANES..=MAX_VECTOR_LANES).contains(&inst.operands[0]) {
                    self.fail(inst, format_args!("{} lanes", inst.operands[0]));
                }
            }
            Opcode::TypeArray | Opcode::TypeMatrix | Opcode::TypePtr => {
                self.expect_type(inst, r0, "element")
            }
            Opcode::TypeTuple => {
                self.expect_type(inst, r0, "first");
                self.expect_type(inst, r1, "second");
            }
            Opcode::StructMember
            | Opcode::VarFuncArg
            | Opcode::VarLocal
            | Opcode::VarGlobal
            | Opcode::VarShaderIn
            | Opcode::VarShaderOut
            | Opcode::VarDescriptor => self.expect_type(inst, r0, "declared type"),
            Opcode::Function => {
                if !r0.is_void() {
                    self.expect_type(inst, r0, "return type");
                }
            }
            Opcode::FunctionEnd => self.expect_opcode(inst, r0, Opcode::Function, "closed function"),
            Opcode::StructEnd => self.expect_opcode(inst, r0, Opcode::TypeStruct, "closed struct"),
            Opcode::ShaderStage => {
                if ShaderStage::from_u32(inst.operands[0]).is_none() {
                    self.fail(inst, format_args!("unknown stage {}", inst.operands[0]));
                }
            }
            Opcode::ShaderStageEnd => {
                if !r0.is_void() {
                    self.expect_opcode(inst, r0, Opcode::Function, "entry point");
                }
            }
            Opcode::Jump => self.expect_opcode(inst, r0, Opcode::Label, "target"),
            Opcode::JumpCond => {
                self.expect_opcode(inst, r1, Opcode::Label, "true target");
                self.expect_opcode(inst, r2, Opcode::Label, "false target");
            }
            Opcode::Loop => {
                self.expect_opcode(inst, r0, Opcode::Label, "merge target");
                self.expect_opcode(inst, r1, Opcode::Label, "continue target");
            }
            Opcode::ValueExpr | Opcode::Compare | Opcode::ValueExprUnary => {
                if Operator::from_u32(inst.operands[0]).is_none() {
                    self.fail(inst, format_args!("unknown operator {}", inst.operands[0]));
                }
            }
            Opcode::Call => {
                self.expect_opcode(inst, r0, Opcode::Function, "callee");
                let takes = self
                    .asm
                    .code_for(r0)
                    .filter(|callee| callee.opcode == Opcode::Function)
                    .map(|callee| callee.operands[0]);
                if takes.is_some_and(|n| n != inst.operands[0]) {
                    self.fail(
                        inst,
                        format_args!(
                            "passes {} arguments, callee takes {}",
                            inst.operands[0],
                            takes.unwrap_or(0)
                        ),
                    );
                }
            }
            Opcode::ValueReadVar => {
                if !self.asm.opcode_for(r0).is_var() {
                    self.fail(inst, format_args!("{r0} is not a variable"));
                }
            }
            Opcode::Assign => {
                let target = self.asm.opcode_for(r0);
                if !target.is_var() && !target.is_lvalue() {
                    self.fail(inst, format_args!("cannot assign to {target}"));
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(level: ValidationLevel) -> CompilerSettings {
        CompilerSettings {
            validation: level,
            ..CompilerSettings::default()
        }
    }

    #[test]
    fn none_skips_everything() {
        let mut asm = Assembler::new();
        asm.push(Instruction::new(Opcode::Unknown).with_id(Ssa(1)));
        assert!(Validator::validate(&asm, &settings(ValidationLevel::None)).is_empty());
    }

    #[test]
    fn values_need_result_types() {
        let mut asm = Assembler::new();
        asm.push_new(Instruction::new(Opcode::ValueZero));
        let errors = Validator::validate(&asm, &settings(ValidationLevel::Basic));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("no result type"));
        assert_eq!(errors[0].stage, CompileStage::CllrValidation);
    }

    #[test]
    fn backward_references_only() {
        let mut asm = Assembler::new();
        let later = asm.create_ssa(Opcode::TypeFloat);
        asm.push_new(Instruction::new(Opcode::ValueZero).with_result_type(later));
        asm.push(Instruction::new(Opcode::TypeFloat).with_id(later).with_operands([32, 0, 0]));
        let errors = Validator::validate(&asm, &settings(ValidationLevel::Basic));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("before its definition"));
    }

    #[test]
    fn branches_may_point_forward() {
        let mut asm = Assembler::new();
        let exit = asm.create_ssa(Opcode::Label);
        asm.push(Instruction::new(Opcode::Jump).with_refs([exit, Ssa::VOID, Ssa::VOID]));
        asm.push(Instruction::new(Opcode::Label).with_id(exit));
        assert!(Validator::validate(&asm, &settings(ValidationLevel::Full)).is_empty());
    }

    #[test]
    fn full_checks_call_arity() {
        let mut asm = Assembler::new();
        let i32_ = asm.type_int(true, 32).unwrap();
        let f = asm.create_ssa(Opcode::Function);
        asm.begin_section(
            Instruction::new(Opcode::Function)
                .with_id(f)
                .with_operands([1, 0, 0])
                .with_refs([i32_, Ssa::VOID, Ssa::VOID]),
        )
        .unwrap();
        asm.push_new(Instruction::new(Opcode::VarFuncArg).with_refs([i32_, Ssa::VOID, Ssa::VOID]));
        asm.push(Instruction::new(Opcode::Return));
        asm.end_section(Instruction::new(Opcode::FunctionEnd).with_refs([f, Ssa::VOID, Ssa::VOID]))
            .unwrap();
        asm.push_value(
            Instruction::new(Opcode::Call).with_refs([f, Ssa::VOID, Ssa::VOID]),
            i32_,
        );

        assert!(Validator::validate(&asm, &settings(ValidationLevel::Basic)).is_empty());
        let errors = Validator::validate(&asm, &settings(ValidationLevel::Full));
        assert_eq!(errors.len(), 1, "{errors:?}");
        assert!(errors[0].message.contains("callee takes 1"));
    }

    #[test]
    fn full_checks_reference_categories() {
        let mut asm = Assembler::new();
        let label = asm.push_new(Instruction::new(Opcode::Label));
        asm.push_new(Instruction::new(Opcode::VarLocal).with_refs([label, Ssa::VOID, Ssa::VOID]));
        let errors = Validator::validate(&asm, &settings(ValidationLevel::Full));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("is not a type"));
    }

    #[test]
    fn full_checks_trailer_counts() {
        let mut asm = Assembler::new();
        let f32_ = asm.type_float(32).unwrap();
        let v2 = asm.type_vector(f32_, 2).unwrap();
        let x = asm.push_value(Instruction::new(Opcode::ValueLitFp), f32_);
        asm.push_value(Instruction::new(Opcode::ValueConstruct).with_operands([2, 0, 0]), v2);
        asm.push(Instruction::new(Opcode::ConstructArg).with_refs([x.value, Ssa::VOID, Ssa::VOID]));
        let errors = Validator::validate(&asm, &settings(ValidationLevel::Full));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("expected 2 CONSTRUCT_ARG"));
    }
}
