//! Caliburn low-level IR.
//!
//! A flat, append-only stream of fixed-shape SSA instructions built through
//! the [`Assembler`], together with the low type registry, the implicit
//! conversion checker and the IR validator.

pub mod arena;
mod assembler;
mod convert;
mod display;
mod error;
mod find;
mod flatten;
mod generics;
mod instruction;
mod listing;
mod low_type;
mod opcode;
mod operator;
mod settings;
mod symbols;
mod validate;

pub use arena::{Arena, Handle, Range, UniqueArena};
pub use assembler::{Assembler, IoDirection, LoopContext, Section, ShaderIo};
pub use convert::{MAX_CONVERSION_STEPS, TypeCheckResult};
pub use display::{dump_assembler, format_low_type};
pub use error::{CompileError, CompileStage, ErrorCollector, ErrorKind, IrError};
pub use find::Finder;
pub use generics::{GenericArg, GenericKind, GenericName, GenericSignature, InstantiationCache};
pub use instruction::{Instruction, SourceLocation, Ssa, TypedValue, split_wide};
pub use listing::parse_listing;
pub use low_type::{
    LowType, MAX_FLOAT_BITS, MAX_INT_BITS, MAX_VECTOR_LANES, MIN_FLOAT_BITS, MIN_INT_BITS,
    MIN_VECTOR_LANES, StructLayout, TypeRegistry,
};
pub use opcode::{OPCODE_COUNT, Opcode, SectionKind};
pub use operator::{BuiltIn, OpCategory, Operator, ShaderStage, VarModifiers};
pub use settings::{CompilerSettings, OptimizeLevel, SettingsError, ValidationLevel};
pub use symbols::{Emit, Symbol, SymbolTable};
pub use validate::Validator;
