//! Error types and multi-error collection.

use std::fmt;

use crate::instruction::{SourceLocation, Ssa};
use crate::opcode::{Opcode, SectionKind};
use crate::operator::Operator;

/// Broad classification of a compilation error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed instruction stream.
    Structural,
    /// Incompatible types or bad generic arguments.
    Type,
    /// Problems specific to the output format.
    BinaryTarget,
}

/// Errors raised while assembling or checking IR.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum IrError {
    #[error("{id} was allocated as {registered} but pushed as {found}")]
    OpcodeMismatch {
        id: Ssa,
        registered: Opcode,
        found: Opcode,
    },

    #[error("{0} was never allocated")]
    UnknownSsa(Ssa),

    #[error("{0} is defined more than once")]
    Redefinition(Ssa),

    #[error("cannot replace the void id")]
    ReplaceVoid,

    #[error("{0} does not open or close a section")]
    NotASectionMarker(Opcode),

    #[error("{found} end does not match the open {}", open_section(.expected))]
    SectionMismatch {
        expected: Option<SectionKind>,
        found: SectionKind,
    },

    #[error("{kind} opened by {header} is never closed")]
    UnclosedSection { kind: SectionKind, header: Ssa },

    #[error("`{statement}` outside of a loop")]
    NoEnclosingLoop { statement: &'static str },

    #[error("shader variable `{name}` is already declared as an {existing}")]
    IoDirectionMismatch { name: String, existing: &'static str },

    #[error("{0} is not a type")]
    NotAType(Ssa),

    #[error("{0} is not a struct type")]
    NotAStruct(Ssa),

    #[error("{opcode} cannot describe a type")]
    NotATypeOpcode { opcode: Opcode },

    #[error("invalid {kind} width {width}")]
    InvalidWidth { kind: &'static str, width: u32 },

    #[error("invalid {kind} length {length}")]
    InvalidLength { kind: &'static str, length: u32 },

    #[error("struct `{structure}` already has a member named `{member}`")]
    DuplicateMember { structure: String, member: String },

    #[error("cannot convert {from} to {to} for operator `{op}`")]
    IncompatibleTypes { from: Ssa, to: Ssa, op: Operator },

    #[error("conversion from {from} to {to} did not settle after {steps} steps")]
    ConversionLimit { from: Ssa, to: Ssa, steps: usize },

    #[error("expected between {min} and {max} generic arguments, found {found}")]
    GenericArity {
        min: usize,
        max: usize,
        found: usize,
    },

    #[error("generic argument `{name}` must be a {expected}")]
    GenericKind { name: String, expected: &'static str },

    #[error("listing line {line}: {message}")]
    Listing { line: usize, message: String },
}

fn open_section(expected: &Option<SectionKind>) -> String {
    match expected {
        Some(kind) => kind.to_string(),
        None => "(nothing)".to_string(),
    }
}

impl IrError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotAType(_)
            | Self::NotAStruct(_)
            | Self::NotATypeOpcode { .. }
            | Self::InvalidWidth { .. }
            | Self::InvalidLength { .. }
            | Self::DuplicateMember { .. }
            | Self::IncompatibleTypes { .. }
            | Self::ConversionLimit { .. }
            | Self::GenericArity { .. }
            | Self::GenericKind { .. } => ErrorKind::Type,
            _ => ErrorKind::Structural,
        }
    }
}

/// Pipeline phase an error was raised in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CompileStage {
    #[default]
    Unknown,
    Tokenizer,
    Parser,
    AstValidation,
    ConditionalCompilation,
    SymbolGeneration,
    CllrEmit,
    CllrValidation,
    OutEmit,
}

impl fmt::Display for CompileStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unknown => "unknown",
            Self::Tokenizer => "tokenizer",
            Self::Parser => "parser",
            Self::AstValidation => "ast validation",
            Self::ConditionalCompilation => "conditional compilation",
            Self::SymbolGeneration => "symbol generation",
            Self::CllrEmit => "cllr emit",
            Self::CllrValidation => "cllr validation",
            Self::OutEmit => "output emit",
        })
    }
}

/// One recorded error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompileError {
    pub stage: CompileStage,
    pub message: String,
    pub location: Option<SourceLocation>,
    pub notes: Vec<String>,
}

impl CompileError {
    pub fn new(stage: CompileStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            location: None,
            notes: Vec::new(),
        }
    }

    pub fn at(mut self, location: Option<SourceLocation>) -> Self {
        self.location = location;
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.stage, self.message)?;
        if let Some(loc) = self.location {
            write!(f, " (at {loc})")?;
        }
        for note in &self.notes {
            write!(f, "\n  note: {note}")?;
        }
        Ok(())
    }
}

/// Append-only error list for one pipeline stage.
#[derive(Clone, Debug, Default)]
pub struct ErrorCollector {
    stage: CompileStage,
    errors: Vec<CompileError>,
}

impl ErrorCollector {
    pub fn new(stage: CompileStage) -> Self {
        Self {
            stage,
            errors: Vec::new(),
        }
    }

    pub fn stage(&self) -> CompileStage {
        self.stage
    }

    /// Records `error` against this collector's stage.
    pub fn record(&mut self, error: &IrError, location: Option<SourceLocation>) {
        self.push(CompileError::new(self.stage, error.to_string()).at(location));
    }

    pub fn push(&mut self, error: CompileError) {
        log::debug!("{error}");
        self.errors.push(error);
    }

    pub fn errors(&self) -> &[CompileError] {
        &self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Drains every recorded error.
    pub fn take(&mut self) -> Vec<CompileError> {
        std::mem::take(&mut self.errors)
    }
}

impl Extend<CompileError> for ErrorCollector {
    fn extend<I: IntoIterator<Item = CompileError>>(&mut self, iter: I) {
        for error in iter {
            self.push(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds() {
        assert_eq!(IrError::ReplaceVoid.kind(), ErrorKind::Structural);
        assert_eq!(
            IrError::DuplicateMember {
                structure: "Light".into(),
                member: "color".into()
            }
            .kind(),
            ErrorKind::Type
        );
        assert_eq!(
            IrError::NoEnclosingLoop { statement: "break" }.kind(),
            ErrorKind::Structural
        );
    }

    #[test]
    fn collector_tags_stage_and_location() {
        let mut errors = ErrorCollector::new(CompileStage::CllrEmit);
        errors.record(&IrError::UnknownSsa(Ssa(9)), Some(SourceLocation::new(3, 14)));
        assert_eq!(errors.len(), 1);
        let err = &errors.errors()[0];
        assert_eq!(err.stage, CompileStage::CllrEmit);
        assert_eq!(err.to_string(), "[cllr emit] %9 was never allocated (at 3:14)");
        assert_eq!(errors.take().len(), 1);
        assert!(errors.is_empty());
    }

    #[test]
    fn section_mismatch_message() {
        let err = IrError::SectionMismatch {
            expected: None,
            found: SectionKind::Function,
        };
        assert_eq!(err.to_string(), "function end does not match the open (nothing)");
    }
}
