use caliburn_backend_core::{Backend, BackendError, BackendOptions, BackendOutput, OutputContent};
use caliburn_ir::{CompilerSettings, OptimizeLevel};

/// `fn add_one(x: i32) -> i32 { return x + 1; }`
#[allow(dead_code)]
pub const ADD_ONE: &str = "\
@string \"add_one\"
@name %2 \"add_one\"
%1 = TYPE_INT_SIGN [32, 0, 0] (%0, %0, %0) : %0
%2 = FUNCTION [1, 0, 0] (%1, %0, %0) : %0
%3 = VAR_FUNC_ARG [0, 0, 0] (%1, %0, %0) : %0
%4 = VALUE_LIT_INT [1, 0, 0] (%0, %0, %0) : %1
%5 = VALUE_READ_VAR [0, 0, 0] (%3, %0, %0) : %1
%6 = VALUE_EXPR [1, 0, 0] (%5, %4, %0) : %1
%0 = RETURN_VALUE [0, 0, 0] (%6, %0, %0) : %0
%0 = FUNCTION_END [0, 0, 0] (%2, %0, %0) : %0
";

/// A fragment stage whose entry returns a zero `vec4<f32>`.
#[allow(dead_code)]
pub const FRAGMENT: &str = "\
%1 = TYPE_FLOAT [32, 0, 0] (%0, %0, %0) : %0
%2 = TYPE_VECTOR [4, 0, 0] (%1, %0, %0) : %0
%0 = SHADER_STAGE [2, 0, 0] (%0, %0, %0) : %0
%3 = FUNCTION [0, 0, 0] (%2, %0, %0) : %0
%4 = VALUE_ZERO [0, 0, 0] (%0, %0, %0) : %2
%0 = RETURN_VALUE [0, 0, 0] (%4, %0, %0) : %0
%0 = FUNCTION_END [0, 0, 0] (%3, %0, %0) : %0
%0 = SHADER_STAGE_END [0, 0, 0] (%3, %0, %0) : %0
";

/// Settings with flatten enabled.
#[allow(dead_code)]
pub fn basic_settings() -> CompilerSettings {
    CompilerSettings {
        opt_level: OptimizeLevel::Basic,
        ..CompilerSettings::default()
    }
}

/// Parse a listing, optimize it, and compile with the backend.
#[allow(dead_code)]
pub fn compile_listing(text: &str, backend: &dyn Backend, settings: &CompilerSettings) -> BackendOutput {
    try_compile_listing(text, backend, settings).expect("backend compilation failed")
}

/// Like `compile_listing` but returns the backend's error instead of panicking.
#[allow(dead_code)]
pub fn try_compile_listing(
    text: &str,
    backend: &dyn Backend,
    settings: &CompilerSettings,
) -> Result<BackendOutput, BackendError> {
    let mut asm = caliburn_ir::parse_listing(text).expect("listing parse failed");
    caliburn_opt::optimize(&mut asm, settings);
    backend.compile(&asm, &BackendOptions::new(settings.clone()))
}

/// Extract the first binary output from a `BackendOutput`.
#[allow(dead_code)]
pub fn first_binary(output: &BackendOutput) -> &[u8] {
    match &output.files[0].content {
        OutputContent::Binary(b) => b,
        OutputContent::Text(_) => panic!("expected binary output, got text"),
    }
}

/// Extract the first text output from a `BackendOutput`.
#[allow(dead_code)]
pub fn first_text(output: &BackendOutput) -> &str {
    match &output.files[0].content {
        OutputContent::Text(t) => t,
        OutputContent::Binary(_) => panic!("expected text output, got binary"),
    }
}

/// Reassemble little-endian bytes into SPIR-V words.
#[allow(dead_code)]
pub fn words(bytes: &[u8]) -> Vec<u32> {
    assert_eq!(bytes.len() % 4, 0, "SPIR-V output is not word aligned");
    bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Every instruction after the header as `(opcode, operand words)`.
#[allow(dead_code)]
pub fn instructions(words: &[u32]) -> Vec<(u16, Vec<u32>)> {
    let mut out = Vec::new();
    let mut i = caliburn_backend_spirv::spirv::HEADER_WORDS;
    while i < words.len() {
        let len = (words[i] >> 16) as usize;
        assert!(len > 0 && i + len <= words.len(), "malformed instruction at word {i}");
        out.push((words[i] as u16, words[i + 1..i + len].to_vec()));
        i += len;
    }
    out
}

#[allow(dead_code)]
pub fn count(words: &[u32], opcode: u16) -> usize {
    instructions(words).iter().filter(|(op, _)| *op == opcode).count()
}
