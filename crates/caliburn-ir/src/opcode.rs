//! The opcode catalogue and opcode classification.

use std::fmt;

macro_rules! opcodes {
    ($($variant:ident => $name:literal),* $(,)?) => {
        /// Operation performed by one IR instruction.
        ///
        /// The ordinal of each variant is its slot in backend dispatch tables.
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u32)]
        pub enum Opcode {
            #[default]
            $($variant),*
        }

        impl Opcode {
            /// Every opcode, in ordinal order.
            pub const ALL: &'static [Opcode] = &[$(Opcode::$variant),*];

            /// Canonical listing name, e.g. `VALUE_EXPR`.
            pub const fn name(self) -> &'static str {
                match self {
                    $(Opcode::$variant => $name),*
                }
            }
        }
    };
}

opcodes! {
    Unknown => "UNKNOWN",
    ShaderStage => "SHADER_STAGE",
    ShaderStageEnd => "SHADER_STAGE_END",
    Function => "FUNCTION",
    VarFuncArg => "VAR_FUNC_ARG",
    FunctionEnd => "FUNCTION_END",
    VarLocal => "VAR_LOCAL",
    VarGlobal => "VAR_GLOBAL",
    VarShaderIn => "VAR_SHADER_IN",
    VarShaderOut => "VAR_SHADER_OUT",
    VarDescriptor => "VAR_DESCRIPTOR",
    Call => "CALL",
    CallArg => "CALL_ARG",
    TypeVoid => "TYPE_VOID",
    TypeFloat => "TYPE_FLOAT",
    TypeIntSign => "TYPE_INT_SIGN",
    TypeIntUnsign => "TYPE_INT_UNSIGN",
    TypeArray => "TYPE_ARRAY",
    TypeVector => "TYPE_VECTOR",
    TypeMatrix => "TYPE_MATRIX",
    TypeStruct => "TYPE_STRUCT",
    StructMember => "STRUCT_MEMBER",
    StructEnd => "STRUCT_END",
    TypeBool => "TYPE_BOOL",
    TypePtr => "TYPE_PTR",
    TypeTuple => "TYPE_TUPLE",
    Label => "LABEL",
    Jump => "JUMP",
    JumpCond => "JUMP_COND",
    Loop => "LOOP",
    Assign => "ASSIGN",
    Compare => "COMPARE",
    ValueCast => "VALUE_CAST",
    ValueConstruct => "VALUE_CONSTRUCT",
    ConstructArg => "CONSTRUCT_ARG",
    ValueDeref => "VALUE_DEREF",
    ValueExpand => "VALUE_EXPAND",
    ValueExpr => "VALUE_EXPR",
    ValueExprUnary => "VALUE_EXPR_UNARY",
    ValueIntToFp => "VALUE_INT_TO_FP",
    ValueInvokePos => "VALUE_INVOKE_POS",
    ValueInvokeSize => "VALUE_INVOKE_SIZE",
    ValueBuiltIn => "VALUE_BUILTIN",
    ValueLitArray => "VALUE_LIT_ARRAY",
    LitArrayElem => "LIT_ARRAY_ELEM",
    ValueLitBool => "VALUE_LIT_BOOL",
    ValueLitFp => "VALUE_LIT_FP",
    ValueLitInt => "VALUE_LIT_INT",
    ValueLitStr => "VALUE_LIT_STR",
    ValueMember => "VALUE_MEMBER",
    ValueNull => "VALUE_NULL",
    ValueReadVar => "VALUE_READ_VAR",
    ValueSign => "VALUE_SIGN",
    ValueSubarray => "VALUE_SUBARRAY",
    ValueUnsign => "VALUE_UNSIGN",
    ValueVecSwizzle => "VALUE_VEC_SWIZZLE",
    ValueZero => "VALUE_ZERO",
    Return => "RETURN",
    ReturnValue => "RETURN_VALUE",
    Discard => "DISCARD",
}

/// Number of opcodes; the length of every per-opcode table.
pub const OPCODE_COUNT: usize = Opcode::ALL.len();

/// The kind of begin/end-bracketed region an opcode opens or closes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SectionKind {
    ShaderStage,
    Function,
    Struct,
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ShaderStage => "shader stage",
            Self::Function => "function",
            Self::Struct => "struct",
        })
    }
}

impl Opcode {
    /// Position of this opcode in per-opcode tables.
    pub const fn ordinal(self) -> usize {
        self as usize
    }

    /// Inverse of [`Opcode::ordinal`].
    pub fn from_ordinal(ordinal: u32) -> Option<Self> {
        Self::ALL.get(ordinal as usize).copied()
    }

    /// Looks an opcode up by its listing name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| op.name() == name)
    }

    /// Opcodes that declare a type.
    pub const fn is_type(self) -> bool {
        matches!(
            self,
            Self::TypeVoid
                | Self::TypeFloat
                | Self::TypeIntSign
                | Self::TypeIntUnsign
                | Self::TypeArray
                | Self::TypeVector
                | Self::TypeMatrix
                | Self::TypeStruct
                | Self::TypeBool
                | Self::TypePtr
                | Self::TypeTuple
        )
    }

    /// Opcodes that produce a typed value.
    pub const fn is_value(self) -> bool {
        matches!(
            self,
            Self::Call
                | Self::Compare
                | Self::ValueCast
                | Self::ValueConstruct
                | Self::ValueDeref
                | Self::ValueExpand
                | Self::ValueExpr
                | Self::ValueExprUnary
                | Self::ValueIntToFp
                | Self::ValueInvokePos
                | Self::ValueInvokeSize
                | Self::ValueBuiltIn
                | Self::ValueLitArray
                | Self::ValueLitBool
                | Self::ValueLitFp
                | Self::ValueLitInt
                | Self::ValueLitStr
                | Self::ValueMember
                | Self::ValueNull
                | Self::ValueReadVar
                | Self::ValueSign
                | Self::ValueSubarray
                | Self::ValueUnsign
                | Self::ValueVecSwizzle
                | Self::ValueZero
        )
    }

    /// Values that name a storage location.
    pub const fn is_lvalue(self) -> bool {
        matches!(
            self,
            Self::ValueDeref | Self::ValueMember | Self::ValueReadVar | Self::ValueSubarray
        )
    }

    /// Variable declarations.
    pub const fn is_var(self) -> bool {
        matches!(
            self,
            Self::VarLocal
                | Self::VarGlobal
                | Self::VarFuncArg
                | Self::VarShaderIn
                | Self::VarShaderOut
                | Self::VarDescriptor
        )
    }

    /// Literal and constant values that carry no references.
    pub const fn is_literal(self) -> bool {
        matches!(
            self,
            Self::ValueLitBool
                | Self::ValueLitFp
                | Self::ValueLitInt
                | Self::ValueLitStr
                | Self::ValueNull
                | Self::ValueZero
        )
    }

    /// Instructions that only ever follow a header instruction, which states
    /// how many of them follow in its `operands[0]`.
    pub const fn is_trailer(self) -> bool {
        matches!(
            self,
            Self::CallArg
                | Self::ConstructArg
                | Self::LitArrayElem
                | Self::StructMember
                | Self::VarFuncArg
        )
    }

    /// The trailer opcode this header is followed by, if any.
    pub const fn trailer(self) -> Option<Opcode> {
        match self {
            Self::Function => Some(Self::VarFuncArg),
            Self::Call => Some(Self::CallArg),
            Self::ValueConstruct => Some(Self::ConstructArg),
            Self::ValueLitArray => Some(Self::LitArrayElem),
            Self::TypeStruct => Some(Self::StructMember),
            _ => None,
        }
    }

    /// Opcodes whose result may be dropped when nothing references it.
    ///
    /// Calls have side effects and struct declarations carry member and
    /// method tables, so neither is pure.
    pub const fn is_pure(self) -> bool {
        (self.is_type() && !matches!(self, Self::TypeStruct))
            || (self.is_value() && !matches!(self, Self::Call))
    }

    /// The section this opcode opens, if it is a section header.
    pub const fn opens_section(self) -> Option<SectionKind> {
        match self {
            Self::ShaderStage => Some(SectionKind::ShaderStage),
            Self::Function => Some(SectionKind::Function),
            Self::TypeStruct => Some(SectionKind::Struct),
            _ => None,
        }
    }

    /// The section this opcode closes, if it is a section footer.
    pub const fn closes_section(self) -> Option<SectionKind> {
        match self {
            Self::ShaderStageEnd => Some(SectionKind::ShaderStage),
            Self::FunctionEnd => Some(SectionKind::Function),
            Self::StructEnd => Some(SectionKind::Struct),
            _ => None,
        }
    }

    /// Opcodes whose references may point at instructions later in the
    /// stream (branch targets).
    pub const fn allows_forward_refs(self) -> bool {
        matches!(self, Self::Jump | Self::JumpCond | Self::Loop)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordinals_round_trip() {
        for (i, op) in Opcode::ALL.iter().enumerate() {
            assert_eq!(op.ordinal(), i);
            assert_eq!(Opcode::from_ordinal(i as u32), Some(*op));
        }
        assert_eq!(Opcode::from_ordinal(OPCODE_COUNT as u32), None);
    }

    #[test]
    fn names_are_unique() {
        let mut names: Vec<_> = Opcode::ALL.iter().map(|op| op.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), OPCODE_COUNT);
        assert_eq!(Opcode::from_name("VALUE_EXPR"), Some(Opcode::ValueExpr));
        assert_eq!(Opcode::from_name("value_expr"), None);
    }

    #[test]
    fn section_pairs_match() {
        for op in Opcode::ALL {
            if let Some(kind) = op.opens_section() {
                let closer = Opcode::ALL
                    .iter()
                    .find(|o| o.closes_section() == Some(kind));
                assert!(closer.is_some(), "{op} has no closing opcode");
            }
        }
    }

    #[test]
    fn purity() {
        assert!(Opcode::ValueExpr.is_pure());
        assert!(Opcode::TypeFloat.is_pure());
        assert!(!Opcode::Call.is_pure());
        assert!(!Opcode::TypeStruct.is_pure());
        assert!(!Opcode::Label.is_pure());
        assert!(!Opcode::VarLocal.is_pure());
    }

    #[test]
    fn headers_name_trailers() {
        for op in Opcode::ALL {
            if let Some(t) = op.trailer() {
                assert!(t.is_trailer());
            }
        }
    }
}
