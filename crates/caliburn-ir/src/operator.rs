//! Operators, shader stages, built-in semantics and variable modifiers.
//!
//! These are carried in instruction operands as plain `u32` values; each
//! type here has a lossless `as u32` encoding and a fallible decoding.

use std::fmt;
use std::ops::BitOr;

/// Operator applied by expression, comparison and conversion instructions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Operator {
    #[default]
    None,
    Add,
    Sub,
    Mul,
    Div,
    IntDiv,
    Mod,
    Pow,
    BitAnd,
    BitOr,
    BitXor,
    ShiftLeft,
    ShiftRight,
    CompEq,
    CompNeq,
    CompGt,
    CompLt,
    CompGte,
    CompLte,
    LogicAnd,
    LogicOr,
    Append,
    Abs,
    Neg,
    BitNeg,
    BoolNot,
}

/// Broad operator families.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpCategory {
    Arithmetic,
    Bitwise,
    Logical,
    Unary,
    Misc,
}

impl Operator {
    const ALL: [Operator; 26] = [
        Self::None,
        Self::Add,
        Self::Sub,
        Self::Mul,
        Self::Div,
        Self::IntDiv,
        Self::Mod,
        Self::Pow,
        Self::BitAnd,
        Self::BitOr,
        Self::BitXor,
        Self::ShiftLeft,
        Self::ShiftRight,
        Self::CompEq,
        Self::CompNeq,
        Self::CompGt,
        Self::CompLt,
        Self::CompGte,
        Self::CompLte,
        Self::LogicAnd,
        Self::LogicOr,
        Self::Append,
        Self::Abs,
        Self::Neg,
        Self::BitNeg,
        Self::BoolNot,
    ];

    /// Decodes an operator stored in an instruction operand.
    pub fn from_u32(raw: u32) -> Option<Self> {
        Self::ALL.get(raw as usize).copied()
    }

    pub fn category(self) -> OpCategory {
        match self {
            Self::Add | Self::Sub | Self::Mul | Self::Div | Self::IntDiv | Self::Mod | Self::Pow => {
                OpCategory::Arithmetic
            }
            Self::BitAnd | Self::BitOr | Self::BitXor | Self::ShiftLeft | Self::ShiftRight => {
                OpCategory::Bitwise
            }
            Self::CompEq
            | Self::CompNeq
            | Self::CompGt
            | Self::CompLt
            | Self::CompGte
            | Self::CompLte
            | Self::LogicAnd
            | Self::LogicOr => OpCategory::Logical,
            Self::Abs | Self::Neg | Self::BitNeg | Self::BoolNot => OpCategory::Unary,
            Self::None | Self::Append => OpCategory::Misc,
        }
    }

    /// Operators whose operands are read as truth values.
    pub fn is_logical(self) -> bool {
        matches!(self, Self::LogicAnd | Self::LogicOr | Self::BoolNot)
    }

    /// Relational operators producing a bool.
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::CompEq | Self::CompNeq | Self::CompGt | Self::CompLt | Self::CompGte | Self::CompLte
        )
    }

    /// Source spelling, used by listings and diagnostics.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::IntDiv => "//",
            Self::Mod => "%",
            Self::Pow => "**",
            Self::BitAnd => "&",
            Self::BitOr => "|",
            Self::BitXor => "^",
            Self::ShiftLeft => "<<",
            Self::ShiftRight => ">>",
            Self::CompEq => "==",
            Self::CompNeq => "!=",
            Self::CompGt => ">",
            Self::CompLt => "<",
            Self::CompGte => ">=",
            Self::CompLte => "<=",
            Self::LogicAnd => "&&",
            Self::LogicOr => "||",
            Self::Append => "~",
            Self::Abs => "abs",
            Self::Neg => "neg",
            Self::BitNeg => "bitneg",
            Self::BoolNot => "!",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Pipeline stage a shader section is compiled for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum ShaderStage {
    #[default]
    Compute,
    Vertex,
    Fragment,
    TessCtrl,
    TessEval,
    Geometry,
    RayGen,
    RayClosestHit,
    RayAnyHit,
    RayIntersect,
    RayMiss,
    Task,
    Mesh,
}

impl ShaderStage {
    pub const ALL: [ShaderStage; 13] = [
        Self::Compute,
        Self::Vertex,
        Self::Fragment,
        Self::TessCtrl,
        Self::TessEval,
        Self::Geometry,
        Self::RayGen,
        Self::RayClosestHit,
        Self::RayAnyHit,
        Self::RayIntersect,
        Self::RayMiss,
        Self::Task,
        Self::Mesh,
    ];

    pub fn from_u32(raw: u32) -> Option<Self> {
        Self::ALL.get(raw as usize).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Compute => "compute",
            Self::Vertex => "vertex",
            Self::Fragment => "frag",
            Self::TessCtrl => "tessCtrl",
            Self::TessEval => "tessEval",
            Self::Geometry => "geom",
            Self::RayGen => "rayGen",
            Self::RayClosestHit => "rayClose",
            Self::RayAnyHit => "rayHit",
            Self::RayIntersect => "rayInt",
            Self::RayMiss => "rayMiss",
            Self::Task => "task",
            Self::Mesh => "mesh",
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Predefined stage inputs and outputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum BuiltIn {
    Position,
    PointSize,
    VertexIndex,
    InstanceIndex,
    PrimitiveId,
    InvocationId,
    TessCoord,
    PatchVertices,
    FragCoord,
    PointCoord,
    FrontFacing,
    SampleId,
    SamplePosition,
    FragDepth,
    HelperInvocation,
    NumWorkgroups,
    WorkgroupId,
    LocalInvocationId,
    GlobalInvocationId,
    LocalInvocationIndex,
}

impl BuiltIn {
    pub const ALL: [BuiltIn; 20] = [
        Self::Position,
        Self::PointSize,
        Self::VertexIndex,
        Self::InstanceIndex,
        Self::PrimitiveId,
        Self::InvocationId,
        Self::TessCoord,
        Self::PatchVertices,
        Self::FragCoord,
        Self::PointCoord,
        Self::FrontFacing,
        Self::SampleId,
        Self::SamplePosition,
        Self::FragDepth,
        Self::HelperInvocation,
        Self::NumWorkgroups,
        Self::WorkgroupId,
        Self::LocalInvocationId,
        Self::GlobalInvocationId,
        Self::LocalInvocationIndex,
    ];

    pub fn from_u32(raw: u32) -> Option<Self> {
        Self::ALL.get(raw as usize).copied()
    }
}

impl fmt::Display for BuiltIn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Position => "position",
            Self::PointSize => "point_size",
            Self::VertexIndex => "vertex_index",
            Self::InstanceIndex => "instance_index",
            Self::PrimitiveId => "primitive_id",
            Self::InvocationId => "invocation_id",
            Self::TessCoord => "tess_coord",
            Self::PatchVertices => "patch_vertices",
            Self::FragCoord => "frag_coord",
            Self::PointCoord => "point_coord",
            Self::FrontFacing => "front_facing",
            Self::SampleId => "sample_id",
            Self::SamplePosition => "sample_position",
            Self::FragDepth => "frag_depth",
            Self::HelperInvocation => "helper_invocation",
            Self::NumWorkgroups => "num_workgroups",
            Self::WorkgroupId => "workgroup_id",
            Self::LocalInvocationId => "local_invocation_id",
            Self::GlobalInvocationId => "global_invocation_id",
            Self::LocalInvocationIndex => "local_invocation_index",
        })
    }
}

/// Declaration modifiers stored in `VAR_LOCAL`/`VAR_GLOBAL` operands.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct VarModifiers(u32);

impl VarModifiers {
    pub const PUBLIC: Self = Self(0x1);
    pub const PRIVATE: Self = Self(0x2);
    /// Visible to every invocation of a workgroup.
    pub const SHARED: Self = Self(0x4);
    pub const STATIC: Self = Self(0x8);

    pub fn empty() -> Self {
        Self(0)
    }

    pub fn from_bits(bits: u32) -> Self {
        Self(bits & 0xF)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for VarModifiers {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_encoding_round_trips() {
        for op in Operator::ALL {
            assert_eq!(Operator::from_u32(op as u32), Some(op));
        }
        assert_eq!(Operator::from_u32(99), None);
    }

    #[test]
    fn operator_categories() {
        assert_eq!(Operator::Div.category(), OpCategory::Arithmetic);
        assert_eq!(Operator::ShiftLeft.category(), OpCategory::Bitwise);
        assert_eq!(Operator::CompLte.category(), OpCategory::Logical);
        assert_eq!(Operator::BoolNot.category(), OpCategory::Unary);
        assert!(Operator::LogicOr.is_logical());
        assert!(!Operator::CompEq.is_logical());
        assert!(Operator::CompEq.is_comparison());
    }

    #[test]
    fn stage_and_builtin_decoding() {
        assert_eq!(ShaderStage::from_u32(2), Some(ShaderStage::Fragment));
        assert_eq!(ShaderStage::from_u32(13), None);
        assert_eq!(BuiltIn::from_u32(BuiltIn::VertexIndex as u32), Some(BuiltIn::VertexIndex));
        assert_eq!(BuiltIn::VertexIndex.to_string(), "vertex_index");
    }

    #[test]
    fn modifiers_combine() {
        let m = VarModifiers::SHARED | VarModifiers::STATIC;
        assert!(m.contains(VarModifiers::SHARED));
        assert!(!m.contains(VarModifiers::PUBLIC));
        assert_eq!(VarModifiers::from_bits(m.bits()), m);
    }
}
