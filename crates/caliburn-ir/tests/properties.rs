//! Stream-level properties of the assembler: id allocation, reference
//! counting, compaction, replacement, type interning and conversions.

use std::collections::HashMap;

use caliburn_ir::*;

/// A small function exercising every reference slot kind.
///
/// ```text
/// fn f(x: i32) -> i32 { return x + 1; }
/// ```
fn add_one(asm: &mut Assembler) -> (Ssa, Ssa) {
    let i32_ = asm.type_int(true, 32).unwrap();
    let func = asm.create_ssa(Opcode::Function);
    asm.begin_section(
        Instruction::new(Opcode::Function)
            .with_id(func)
            .with_operands([1, 0, 0])
            .with_refs([i32_, Ssa::VOID, Ssa::VOID]),
    )
    .unwrap();
    let x = asm.push_new(Instruction::new(Opcode::VarFuncArg).with_refs([i32_, Ssa::VOID, Ssa::VOID]));
    let one = asm.push_value(Instruction::new(Opcode::ValueLitInt).with_operands([1, 0, 0]), i32_);
    let read = asm.push_value(
        Instruction::new(Opcode::ValueReadVar).with_refs([x, Ssa::VOID, Ssa::VOID]),
        i32_,
    );
    let sum = asm.push_value(
        Instruction::new(Opcode::ValueExpr)
            .with_operands([Operator::Add as u32, 0, 0])
            .with_refs([read.value, one.value, Ssa::VOID]),
        i32_,
    );
    asm.push(Instruction::new(Opcode::ReturnValue).with_refs([sum.value, Ssa::VOID, Ssa::VOID]));
    asm.end_section(Instruction::new(Opcode::FunctionEnd).with_refs([func, Ssa::VOID, Ssa::VOID]))
        .unwrap();
    (func, sum.value)
}

fn counted_references(asm: &Assembler) -> HashMap<Ssa, u32> {
    let mut counts = HashMap::new();
    for inst in asm.instructions() {
        for r in inst.referenced() {
            *counts.entry(r).or_insert(0) += 1;
        }
    }
    counts
}

fn assert_counts_match(asm: &Assembler) {
    let counts = counted_references(asm);
    for raw in 1..asm.next_ssa().get() {
        let ssa = Ssa(raw);
        assert_eq!(
            asm.ref_count(ssa),
            counts.get(&ssa).copied().unwrap_or(0),
            "reference count of {ssa}"
        );
    }
}

/// The stream with every id replaced by the position of its definition.
fn shape(asm: &Assembler) -> Vec<(Opcode, [u32; 3], Vec<Option<usize>>)> {
    let position: HashMap<Ssa, usize> = asm
        .instructions()
        .enumerate()
        .filter(|(_, inst)| !inst.id.is_void())
        .map(|(i, inst)| (inst.id, i))
        .collect();
    asm.instructions()
        .map(|inst| {
            let refs = inst
                .refs
                .iter()
                .chain(std::iter::once(&inst.result_type))
                .map(|r| position.get(r).copied())
                .collect();
            (inst.opcode, inst.operands, refs)
        })
        .collect()
}

#[test]
fn ids_strictly_increase() {
    let mut asm = Assembler::new();
    let mut last = Ssa::VOID;
    for opcode in Opcode::ALL.iter().copied().cycle().take(500) {
        let id = asm.create_ssa(opcode);
        assert!(id > last, "{id} after {last}");
        assert_eq!(asm.opcode_for(id), opcode);
        last = id;
    }
    assert_eq!(asm.next_ssa(), Ssa(501));
}

#[test]
fn reference_counts_are_exact() {
    let mut asm = Assembler::new();
    add_one(&mut asm);
    assert_counts_match(&asm);

    let f32_ = asm.type_float(32).unwrap();
    asm.type_vector(f32_, 3).unwrap();
    asm.push_struct("Pair", &[("a", f32_), ("b", f32_)]).unwrap();
    assert_counts_match(&asm);
    assert!(asm.errors().is_empty(), "{:?}", asm.errors().errors());
}

#[test]
fn flatten_twice_is_a_no_op() {
    let mut asm = Assembler::new();
    asm.create_ssa(Opcode::Label);
    add_one(&mut asm);
    asm.create_ssa(Opcode::ValueLitInt);
    let i64_ = asm.type_int(true, 64).unwrap();
    asm.push_value(Instruction::new(Opcode::ValueLitInt).with_operands([9, 0, 0]), i64_);

    assert!(asm.flatten() > 0);
    assert_eq!(asm.flatten(), 0);
    assert_counts_match(&asm);
}

#[test]
fn flatten_preserves_live_shape() {
    let mut asm = Assembler::new();
    asm.create_ssa(Opcode::Label);
    asm.create_ssa(Opcode::Label);
    add_one(&mut asm);
    let before = shape(&asm);

    let renumbered = asm.flatten();
    assert!(renumbered > 0);
    assert_eq!(shape(&asm), before);
    assert_eq!(asm.next_ssa().get() as usize, asm.instructions().filter(|i| !i.id.is_void()).count() + 1);
}

#[test]
fn replace_moves_every_reference() {
    let mut asm = Assembler::new();
    let (_, sum) = add_one(&mut asm);
    let i32_ = asm.type_int(true, 32).unwrap();
    let two = asm.push_value(Instruction::new(Opcode::ValueLitInt).with_operands([2, 0, 0]), i32_);
    let (a, b) = (asm.ref_count(sum), asm.ref_count(two.value));

    let rewritten = asm.replace(sum, two.value);
    assert_eq!(rewritten as u32, a);
    assert_eq!(asm.ref_count(sum), 0);
    assert_eq!(asm.ref_count(two.value), a + b);
    assert!(asm.instructions().all(|inst| inst.referenced().all(|r| r != sum)));
    assert_counts_match(&asm);
}

#[test]
fn types_are_interned_in_any_order() {
    let mut asm = Assembler::new();
    let i32_ = asm.type_int(true, 32).unwrap();
    let arr = asm.type_array(i32_, 4).unwrap();
    let f32_ = asm.type_float(32).unwrap();
    let len = asm.len();

    assert_eq!(asm.type_float(32).unwrap(), f32_);
    assert_eq!(asm.type_array(i32_, 4).unwrap(), arr);
    assert_eq!(asm.type_int(true, 32).unwrap(), i32_);
    assert_eq!(asm.len(), len);
    assert_ne!(asm.type_int(false, 32).unwrap(), i32_);
}

#[test]
fn conversions_terminate() {
    let mut asm = Assembler::new();
    let bool_ = asm.type_bool().unwrap();
    let f32_ = asm.type_float(32).unwrap();
    let value = asm.push_value(Instruction::new(Opcode::ValueLitBool).with_operands([1, 0, 0]), bool_);
    let len = asm.len();

    let converted = asm.apply_conversion(f32_, value, Operator::LogicAnd).unwrap();
    assert_eq!(converted.ty, f32_);
    let added: Vec<Opcode> = asm.instructions().skip(len).map(|i| i.opcode).collect();
    assert_eq!(
        added,
        [Opcode::TypeIntSign, Opcode::ValueCast, Opcode::ValueIntToFp]
    );

    let mut kinds = vec![bool_, f32_];
    kinds.push(asm.type_int(true, 32).unwrap());
    kinds.push(asm.type_int(false, 16).unwrap());
    kinds.push(asm.type_float(64).unwrap());
    kinds.push(asm.type_vector(f32_, 2).unwrap());
    for &from in &kinds {
        for &to in &kinds {
            for op in [Operator::Add, Operator::Div, Operator::LogicOr, Operator::Neg] {
                let value = asm.push_value(Instruction::new(Opcode::ValueZero), from);
                match asm.apply_conversion(to, value, op) {
                    Ok(done) => assert!(done.ty == to || op.is_logical(), "{from} -> {to}"),
                    Err(err) => assert!(matches!(err, IrError::IncompatibleTypes { .. })),
                }
            }
        }
    }
}
