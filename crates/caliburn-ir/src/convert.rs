//! Type compatibility checks and conversion insertion.

use crate::assembler::Assembler;
use crate::error::IrError;
use crate::instruction::{Instruction, Ssa, TypedValue};
use crate::low_type::{LowType, MAX_FLOAT_BITS, MIN_FLOAT_BITS};
use crate::opcode::Opcode;
use crate::operator::Operator;

/// Upper bound on conversion steps taken by [`Assembler::apply_conversion`].
pub const MAX_CONVERSION_STEPS: usize = 8;

/// What it takes to turn a value into the required type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TypeCheckResult {
    Compatible,
    /// Produce a wider instance of the same category.
    Widen,
    /// Reinterpret as an integer.
    BitcastToInt,
    IntToFloat,
    /// Call a registered conversion function.
    MethodCall,
    Incompatible,
}

fn width_rule(current: u32, target: u32) -> TypeCheckResult {
    use std::cmp::Ordering::*;
    match target.cmp(&current) {
        Equal => TypeCheckResult::Compatible,
        Greater => TypeCheckResult::Widen,
        Less => TypeCheckResult::Incompatible,
    }
}

impl Assembler {
    /// Classifies how `value` must change to be used as `target` under `op`.
    pub fn check_conversion(&self, target: Ssa, value: TypedValue, op: Operator) -> TypeCheckResult {
        let (Some(want), Some(have)) = (self.low_type(target), self.low_type(value.ty)) else {
            return TypeCheckResult::Incompatible;
        };

        if op == Operator::Append && (have.is_int() || have.is_float()) {
            return TypeCheckResult::Incompatible;
        }
        if matches!(op, Operator::Neg | Operator::Abs) && matches!(have, LowType::Uint { .. }) {
            return TypeCheckResult::Incompatible;
        }
        if value.ty == target {
            return TypeCheckResult::Compatible;
        }

        match (have, want) {
            (LowType::Float { width: a }, LowType::Float { width: b })
            | (LowType::Sint { width: a }, LowType::Sint { width: b })
            | (LowType::Uint { width: a }, LowType::Uint { width: b }) => width_rule(*a, *b),
            (h, w) if h.is_int() && (w.is_float() || op == Operator::Div) => {
                TypeCheckResult::IntToFloat
            }
            (LowType::Bool, w) if w.is_int() || w.is_float() => TypeCheckResult::BitcastToInt,
            (LowType::Bool, _) if op.is_logical() => TypeCheckResult::Compatible,
            (LowType::Struct(layout), _)
                if self.types.structs[*layout].conversion(target).is_some() =>
            {
                TypeCheckResult::MethodCall
            }
            _ => TypeCheckResult::Incompatible,
        }
    }

    /// Inserts conversions until `value` is usable as `target`.
    ///
    /// Each step re-checks the newly produced value, so chains such as
    /// bool → int → float fall out of the single-step rules.
    pub fn apply_conversion(
        &mut self,
        target: Ssa,
        value: TypedValue,
        op: Operator,
    ) -> Result<TypedValue, IrError> {
        let mut current = value;
        for _ in 0..MAX_CONVERSION_STEPS {
            let result = self.check_conversion(target, current, op);
            log::trace!("convert {} to {target}: {result:?}", current.ty);
            current = match result {
                TypeCheckResult::Compatible => return Ok(current),
                TypeCheckResult::Incompatible => {
                    return Err(IrError::IncompatibleTypes {
                        from: current.ty,
                        to: target,
                        op,
                    });
                }
                TypeCheckResult::Widen => self.push_value(
                    Instruction::new(Opcode::ValueExpand).with_refs([current.value, Ssa::VOID, Ssa::VOID]),
                    target,
                ),
                TypeCheckResult::BitcastToInt => {
                    let ty = self.bitcast_target(target)?;
                    self.push_value(
                        Instruction::new(Opcode::ValueCast).with_refs([current.value, Ssa::VOID, Ssa::VOID]),
                        ty,
                    )
                }
                TypeCheckResult::IntToFloat => {
                    let ty = self.int_to_float_target(target, current.ty)?;
                    self.push_value(
                        Instruction::new(Opcode::ValueIntToFp)
                            .with_refs([current.value, Ssa::VOID, Ssa::VOID]),
                        ty,
                    )
                }
                TypeCheckResult::MethodCall => self.call_conversion(target, current)?,
            };
        }
        Err(IrError::ConversionLimit {
            from: value.ty,
            to: target,
            steps: MAX_CONVERSION_STEPS,
        })
    }

    /// The integer type a bool is reinterpreted as on the way to `target`.
    fn bitcast_target(&mut self, target: Ssa) -> Result<Ssa, IrError> {
        match self.low_type(target) {
            Some(low) if low.is_int() => Ok(target),
            Some(low) => {
                let width = low.scalar_width().unwrap_or(32);
                self.type_int(true, width)
            }
            None => Err(IrError::NotAType(target)),
        }
    }

    fn int_to_float_target(&mut self, target: Ssa, from: Ssa) -> Result<Ssa, IrError> {
        if self.low_type(target).is_some_and(LowType::is_float) {
            return Ok(target);
        }
        let width = self
            .low_type(from)
            .and_then(LowType::scalar_width)
            .unwrap_or(32)
            .clamp(MIN_FLOAT_BITS, MAX_FLOAT_BITS);
        self.type_float(width)
    }

    fn call_conversion(&mut self, target: Ssa, value: TypedValue) -> Result<TypedValue, IrError> {
        let function = self
            .struct_layout(value.ty)
            .and_then(|layout| layout.conversion(target))
            .ok_or(IrError::IncompatibleTypes {
                from: value.ty,
                to: target,
                op: Operator::None,
            })?;
        let call = self.push_value(
            Instruction::new(Opcode::Call)
                .with_operands([1, 0, 0])
                .with_refs([function, Ssa::VOID, Ssa::VOID]),
            target,
        );
        self.push(
            Instruction::new(Opcode::CallArg).with_refs([value.value, Ssa::VOID, Ssa::VOID]),
        );
        Ok(call)
    }

    /// Brings both operands of a binary expression to a common type by
    /// converting the narrower side toward the wider one.
    pub fn check_operands(
        &mut self,
        lhs: TypedValue,
        rhs: TypedValue,
        op: Operator,
    ) -> Result<(TypedValue, TypedValue), IrError> {
        if lhs.ty == rhs.ty {
            return Ok((lhs, rhs));
        }
        if self.check_conversion(lhs.ty, rhs, op) != TypeCheckResult::Incompatible {
            let rhs = self.apply_conversion(lhs.ty, rhs, op)?;
            return Ok((lhs, rhs));
        }
        let lhs = self.apply_conversion(rhs.ty, lhs, op)?;
        Ok((lhs, rhs))
    }
}
