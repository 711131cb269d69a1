#![warn(missing_docs)]
//! Backend trait and plugin architecture for Caliburn.
//!
//! Defines the [`Backend`] trait that all code emitters implement, along
//! with supporting types ([`BackendOptions`], [`BackendOutput`],
//! [`BackendError`]) and a [`BackendRegistry`] for CLI dispatch.

use std::fmt::{self, Debug};

use caliburn_ir::{Assembler, CompileError, CompilerSettings};

/// A backend that compiles a finished IR stream to target-specific output.
pub trait Backend: Debug + Send + Sync {
    /// Human-readable name (e.g. "SPIR-V").
    fn name(&self) -> &str;

    /// Target identifiers this backend handles (for `--target` dispatch).
    fn targets(&self) -> &[&str];

    /// Compile a flattened, validated IR stream.
    fn compile(&self, asm: &Assembler, opts: &BackendOptions)
    -> Result<BackendOutput, BackendError>;
}

/// Options passed to a backend during compilation.
#[derive(Clone, Debug, Default)]
pub struct BackendOptions {
    /// Settings the rest of the pipeline ran with.
    pub settings: CompilerSettings,
}

impl BackendOptions {
    /// Wraps `settings`.
    pub fn new(settings: CompilerSettings) -> Self {
        Self { settings }
    }
}

impl fmt::Display for BackendOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (major, minor) = self.settings.spirv_version;
        write!(
            f,
            "BackendOptions {{ opt_level: {:?}, validation: {:?}, spirv: {major}.{minor} }}",
            self.settings.opt_level, self.settings.validation
        )
    }
}

/// The output produced by a backend.
#[derive(Clone, Debug)]
pub struct BackendOutput {
    /// One or more output files.
    pub files: Vec<OutputFile>,
    /// Non-fatal diagnostics.
    pub diagnostics: Vec<Diagnostic>,
}

impl BackendOutput {
    /// Whether any diagnostic is an error.
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.level == DiagnosticLevel::Error)
    }
}

/// A single output file.
#[derive(Clone, Debug)]
pub struct OutputFile {
    /// Suggested filename (e.g. "module.spv", "module.cllr").
    pub name: String,
    /// The file content.
    pub content: OutputContent,
}

/// Content of an output file.
#[derive(Clone, Debug)]
pub enum OutputContent {
    /// UTF-8 text.
    Text(String),
    /// Raw binary data.
    Binary(Vec<u8>),
}

/// A diagnostic message from a backend.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    /// Severity level.
    pub level: DiagnosticLevel,
    /// Human-readable message.
    pub message: String,
}

impl From<&CompileError> for Diagnostic {
    fn from(err: &CompileError) -> Self {
        Self {
            level: DiagnosticLevel::Error,
            message: err.to_string(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.level, self.message)
    }
}

/// Severity level for diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiagnosticLevel {
    /// A recorded error; the output is best-effort and must not be trusted.
    Error,
    /// An informational note.
    Info,
}

impl fmt::Display for DiagnosticLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Error => "Error",
            Self::Info => "Info",
        })
    }
}

/// Errors that can occur during backend compilation.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The stream holds an instruction this backend has no lowering for.
    #[error("unsupported: {0}")]
    Unsupported(String),
    /// Lowering hit an unrecoverable problem.
    #[error("fatal: {0}")]
    Fatal(String),
}

/// Registry of available backends, used for CLI `--target` dispatch.
#[derive(Debug, Default)]
pub struct BackendRegistry {
    backends: Vec<Box<dyn Backend>>,
}

impl BackendRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry pre-populated with built-in backends.
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        reg.register(Box::new(IrListingBackend));
        reg
    }

    /// Registers a backend.
    pub fn register(&mut self, backend: Box<dyn Backend>) {
        self.backends.push(backend);
    }

    /// Finds a backend that handles the given target identifier.
    pub fn find(&self, target: &str) -> Option<&dyn Backend> {
        self.backends
            .iter()
            .find(|b| b.targets().contains(&target))
            .map(|b| &**b)
    }

    /// Lists all supported target identifiers.
    pub fn list_targets(&self) -> Vec<&str> {
        self.backends
            .iter()
            .flat_map(|b| b.targets().iter().copied())
            .collect()
    }
}

/// Built-in backend that writes the IR listing using [`caliburn_ir::dump_assembler`].
#[derive(Debug)]
pub struct IrListingBackend;

impl Backend for IrListingBackend {
    fn name(&self) -> &str {
        "IR Listing"
    }

    fn targets(&self) -> &[&str] {
        &["ir", "cllr"]
    }

    fn compile(
        &self,
        asm: &Assembler,
        _opts: &BackendOptions,
    ) -> Result<BackendOutput, BackendError> {
        let text = caliburn_ir::dump_assembler(asm);
        Ok(BackendOutput {
            files: vec![OutputFile {
                name: "module.cllr".into(),
                content: OutputContent::Text(text),
            }],
            diagnostics: asm.errors().errors().iter().map(Diagnostic::from).collect(),
        })
    }
}
