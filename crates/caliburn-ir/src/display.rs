//! Text dump of an assembler, in the listing format read by `parse_listing`.

use std::fmt;
use std::fmt::Write as _;

use crate::assembler::Assembler;
use crate::instruction::{Instruction, Ssa};
use crate::low_type::LowType;
use crate::opcode::Opcode;

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [o0, o1, o2] = self.operands;
        let [r0, r1, r2] = self.refs;
        write!(
            f,
            "{} = {} [{o0}, {o1}, {o2}] ({r0}, {r1}, {r2}) : {}",
            self.id, self.opcode, self.result_type
        )?;
        if let Some(loc) = self.location {
            write!(f, " !{loc}")?;
        }
        Ok(())
    }
}

/// Short human-readable spelling of a declared type, e.g. `vec3<f32>`.
pub fn format_low_type(asm: &Assembler, ty: Ssa) -> String {
    match asm.low_type(ty) {
        Some(low) => format_inner(asm, low, 0),
        None => format!("?{ty}"),
    }
}

fn format_inner(asm: &Assembler, low: &LowType, depth: usize) -> String {
    if depth > 16 {
        return "...".into();
    }
    let nested = |h| format_inner(asm, asm.resolve(h), depth + 1);
    match low {
        LowType::Void => "void".into(),
        LowType::Bool => "bool".into(),
        LowType::Float { width } => format!("f{width}"),
        LowType::Sint { width } => format!("i{width}"),
        LowType::Uint { width } => format!("u{width}"),
        LowType::Array { inner, length } => format!("array<{}, {length}>", nested(*inner)),
        LowType::Vector { inner, lanes } => format!("vec{lanes}<{}>", nested(*inner)),
        LowType::Matrix {
            inner,
            columns,
            rows,
        } => format!("mat{columns}x{rows}<{}>", nested(*inner)),
        LowType::Pointer { inner } => format!("ptr<{}>", nested(*inner)),
        LowType::Tuple { a, b } => format!("({}, {})", nested(*a), nested(*b)),
        LowType::Struct(_) => "struct".into(),
    }
}

/// Writes the whole stream plus the string and name tables.
pub fn dump_assembler(asm: &Assembler) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "@next {}", asm.next_ssa());
    for s in asm.strings() {
        let _ = writeln!(out, "@string {s:?}");
    }
    for (ssa, name) in asm.debug_names() {
        let _ = writeln!(out, "@name {ssa} {name:?}");
    }
    for inst in asm.instructions() {
        let _ = write!(out, "{inst}");
        if inst.opcode.is_type() && inst.opcode != Opcode::TypeStruct {
            let _ = write!(out, " ; {}", format_low_type(asm, inst.id));
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SourceLocation;

    #[test]
    fn instruction_line_format() {
        let inst = Instruction::new(Opcode::ValueExpr)
            .with_id(Ssa(5))
            .with_operands([1, 0, 0])
            .with_refs([Ssa(3), Ssa(4), Ssa::VOID])
            .with_result_type(Ssa(1));
        assert_eq!(
            inst.to_string(),
            "%5 = VALUE_EXPR [1, 0, 0] (%3, %4, %0) : %1"
        );
        let located = inst.at(SourceLocation::new(2, 9));
        assert!(located.to_string().ends_with(" !2:9"));
    }

    #[test]
    fn dump_includes_tables_and_type_names() {
        let mut asm = Assembler::new();
        let f32_ = asm.type_float(32).unwrap();
        let v4 = asm.type_vector(f32_, 4).unwrap();
        asm.type_matrix(f32_, 4, 4).unwrap();
        asm.set_debug_name(v4, "color");
        asm.add_string("main");
        let text = dump_assembler(&asm);
        assert!(text.starts_with("@next %4\n"));
        assert!(text.contains("@string \"main\""));
        assert!(text.contains("@name %2 \"color\""));
        assert!(text.contains("; vec4<f32>"));
        assert!(text.contains("; mat4x4<f32>"));
    }
}
