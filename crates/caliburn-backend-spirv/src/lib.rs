//! SPIR-V backend for Caliburn.
//!
//! Translates a finished IR stream into a SPIR-V binary module (`.spv`).
//! Recoverable problems become error diagnostics next to a best-effort
//! module; unrecoverable ones fail the compilation.

use caliburn_backend_core::{
    Backend, BackendError, BackendOptions, BackendOutput, Diagnostic, DiagnosticLevel,
    OutputContent, OutputFile,
};
use caliburn_ir::Assembler;

mod builtins;
mod error;
mod lower;
mod module;
pub mod spirv;
mod translator;

pub use error::TranslateError;
pub use translator::{Translation, Translator, translate};

/// Backend that compiles IR into SPIR-V modules.
#[derive(Debug)]
pub struct SpirvBackend;

impl Backend for SpirvBackend {
    fn name(&self) -> &str {
        "SPIR-V"
    }

    fn targets(&self) -> &[&str] {
        &["spirv", "spv"]
    }

    fn compile(
        &self,
        asm: &Assembler,
        opts: &BackendOptions,
    ) -> Result<BackendOutput, BackendError> {
        let translation = translate(asm, &opts.settings);
        match translation.fatal {
            Some(TranslateError::Unsupported(opcode)) => {
                return Err(BackendError::Unsupported(opcode.to_string()));
            }
            Some(fatal) => return Err(BackendError::Fatal(fatal.to_string())),
            None => {}
        }

        let mut diagnostics: Vec<Diagnostic> =
            asm.errors().errors().iter().map(Diagnostic::from).collect();
        diagnostics.extend(translation.errors.iter().map(Diagnostic::from));
        diagnostics.push(Diagnostic {
            level: DiagnosticLevel::Info,
            message: format!(
                "SPIR-V {}.{}: {} words",
                opts.settings.spirv_version.0,
                opts.settings.spirv_version.1,
                translation.words.len()
            ),
        });

        Ok(BackendOutput {
            files: vec![OutputFile {
                name: "module.spv".into(),
                content: OutputContent::Binary(translation.to_bytes()),
            }],
            diagnostics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caliburn_ir::{
        BuiltIn, CompilerSettings, Instruction, Opcode, Operator, ShaderStage, Ssa,
    };
    use spirv::{built_in, decoration, op};

    /// Opcode and operands of every instruction after the header.
    fn instructions(words: &[u32]) -> Vec<(u16, &[u32])> {
        let mut out = Vec::new();
        let mut i = spirv::HEADER_WORDS;
        while i < words.len() {
            let len = ((words[i] >> 16) as usize).max(1);
            out.push((words[i] as u16, &words[i + 1..i + len]));
            i += len;
        }
        out
    }

    /// Opens a `stage` whose entry function returns `ret`, runs `body` inside
    /// it and closes both sections.
    fn stage(asm: &mut Assembler, stage: ShaderStage, ret: Ssa, body: impl FnOnce(&mut Assembler)) {
        asm.begin_section(Instruction::new(Opcode::ShaderStage).with_operands([stage as u32, 0, 0]))
            .unwrap();
        let func = asm.create_ssa(Opcode::Function);
        asm.begin_section(
            Instruction::new(Opcode::Function)
                .with_id(func)
                .with_refs([ret, Ssa::VOID, Ssa::VOID]),
        )
        .unwrap();
        body(asm);
        asm.end_section(Instruction::new(Opcode::FunctionEnd).with_refs([func, Ssa::VOID, Ssa::VOID]))
            .unwrap();
        asm.end_section(Instruction::new(Opcode::ShaderStageEnd).with_refs([func, Ssa::VOID, Ssa::VOID]))
            .unwrap();
    }

    /// Binary id of the 32-bit integer type with the given signedness.
    fn int_type(words: &[u32], signed: bool) -> u32 {
        instructions(words)
            .into_iter()
            .find(|(opcode, operands)| *opcode == op::TYPE_INT && operands[1..] == [32, u32::from(signed)])
            .map(|(_, operands)| operands[0])
            .unwrap()
    }

    /// Opcodes of every instruction after the header.
    fn opcodes(words: &[u32]) -> Vec<u16> {
        let mut out = Vec::new();
        let mut i = spirv::HEADER_WORDS;
        while i < words.len() {
            out.push(words[i] as u16);
            i += ((words[i] >> 16) as usize).max(1);
        }
        out
    }

    fn count(words: &[u32], opcode: u16) -> usize {
        opcodes(words).into_iter().filter(|&o| o == opcode).count()
    }

    /// `fn add_one(x: i32) -> i32 { return x + 1; }`
    fn add_one(asm: &mut Assembler) -> Ssa {
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
        asm.set_debug_name(func, "add_one");
        func
    }

    #[test]
    fn backend_targets() {
        assert_eq!(SpirvBackend.name(), "SPIR-V");
        assert!(SpirvBackend.targets().contains(&"spirv"));
        assert!(SpirvBackend.targets().contains(&"spv"));
    }

    #[test]
    fn add_one_lowers_to_one_iadd() {
        let mut asm = Assembler::new();
        add_one(&mut asm);
        let out = translate(&asm, &CompilerSettings::default());
        assert!(out.is_clean(), "{:?}", out.errors);

        let words = &out.words;
        assert_eq!(words[0], spirv::MAGIC);
        assert_eq!(words[1], spirv::version(1, 5));
        assert!(words[3] > 1);
        assert_eq!(count(words, op::I_ADD), 1);
        assert_eq!(count(words, op::FUNCTION), 1);
        assert_eq!(count(words, op::FUNCTION_PARAMETER), 1);
        assert_eq!(count(words, op::RETURN_VALUE), 1);
        assert_eq!(count(words, op::LOAD), 0);
        assert_eq!(count(words, op::NAME), 1);
    }

    #[test]
    fn bare_add_one_uses_every_id_below_the_bound() {
        let mut asm = Assembler::new();
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
        let sum = asm.push_value(
            Instruction::new(Opcode::ValueExpr)
                .with_operands([Operator::Add as u32, 0, 0])
                .with_refs([x, one.value, Ssa::VOID]),
            i32_,
        );
        asm.push(Instruction::new(Opcode::ReturnValue).with_refs([sum.value, Ssa::VOID, Ssa::VOID]));
        asm.end_section(Instruction::new(Opcode::FunctionEnd).with_refs([func, Ssa::VOID, Ssa::VOID]))
            .unwrap();

        let stream: Vec<Opcode> = asm.instructions().map(|inst| inst.opcode).collect();
        assert_eq!(
            stream,
            [
                Opcode::TypeIntSign,
                Opcode::Function,
                Opcode::VarFuncArg,
                Opcode::ValueLitInt,
                Opcode::ValueExpr,
                Opcode::ReturnValue,
                Opcode::FunctionEnd,
            ]
        );

        let out = translate(&asm, &CompilerSettings::default());
        assert!(out.is_clean(), "{:?}", out.errors);
        let mut ids = std::collections::HashSet::new();
        for (opcode, operands) in instructions(&out.words) {
            let result = match opcode {
                op::TYPE_VOID | op::TYPE_INT | op::TYPE_FUNCTION | op::LABEL | op::EXT_INST_IMPORT => {
                    Some(operands[0])
                }
                op::FUNCTION | op::FUNCTION_PARAMETER | op::CONSTANT | op::I_ADD => Some(operands[1]),
                _ => None,
            };
            if let Some(id) = result {
                assert!(ids.insert(id), "%{id} defined twice");
            }
        }
        assert_eq!(out.words[3] as usize, ids.len() + 1);
        assert_eq!(count(&out.words, op::I_ADD), 1);
        assert_eq!(count(&out.words, op::LOAD), 0);
    }

    #[test]
    fn every_id_is_below_the_bound() {
        let mut asm = Assembler::new();
        add_one(&mut asm);
        let out = translate(&asm, &CompilerSettings::default());
        let bound = out.words[3];
        // OpFunction: result type, result id, control, function type.
        let mut i = spirv::HEADER_WORDS;
        while i < out.words.len() {
            let len = (out.words[i] >> 16) as usize;
            if out.words[i] as u16 == op::FUNCTION {
                assert!(out.words[i + 2] < bound);
                assert!(out.words[i + 4] < bound);
            }
            i += len;
        }
    }

    #[test]
    fn version_comes_from_settings() {
        let asm = Assembler::new();
        let settings = CompilerSettings {
            spirv_version: (1, 3),
            ..CompilerSettings::default()
        };
        assert_eq!(translate(&asm, &settings).words[1], 0x0001_0300);
    }

    #[test]
    fn compute_stage_gets_local_size() {
        let mut asm = Assembler::new();
        let void = asm.type_void().unwrap();
        let u32_ = asm.type_int(false, 32).unwrap();
        asm.begin_section(Instruction::new(Opcode::ShaderStage).with_operands([ShaderStage::Compute as u32, 0, 0]))
            .unwrap();
        let func = asm.create_ssa(Opcode::Function);
        asm.begin_section(
            Instruction::new(Opcode::Function)
                .with_id(func)
                .with_refs([void, Ssa::VOID, Ssa::VOID]),
        )
        .unwrap();
        asm.push_value(Instruction::new(Opcode::ValueInvokePos).with_operands([0, 0, 0]), u32_);
        asm.push(Instruction::new(Opcode::Return));
        asm.end_section(Instruction::new(Opcode::FunctionEnd).with_refs([func, Ssa::VOID, Ssa::VOID]))
            .unwrap();
        asm.end_section(
            Instruction::new(Opcode::ShaderStageEnd)
                .with_operands([64, 1, 0])
                .with_refs([func, Ssa::VOID, Ssa::VOID]),
        )
        .unwrap();

        let out = translate(&asm, &CompilerSettings::default());
        assert!(out.is_clean(), "{:?}", out.errors);
        let words = &out.words;
        assert_eq!(count(words, op::ENTRY_POINT), 1);
        assert_eq!(count(words, op::EXECUTION_MODE), 1);
        assert_eq!(count(words, op::ACCESS_CHAIN), 1);
        let mode = words
            .windows(6)
            .find(|w| w[0] == spirv::instruction_header(6, op::EXECUTION_MODE))
            .unwrap();
        assert_eq!(&mode[2..], &[spirv::execution_mode::LOCAL_SIZE, 64, 1, 1]);
    }

    #[test]
    fn illegal_builtin_is_fatal() {
        let mut asm = Assembler::new();
        let void = asm.type_void().unwrap();
        let i32_ = asm.type_int(true, 32).unwrap();
        asm.begin_section(Instruction::new(Opcode::ShaderStage).with_operands([ShaderStage::Fragment as u32, 0, 0]))
            .unwrap();
        let func = asm.create_ssa(Opcode::Function);
        asm.begin_section(
            Instruction::new(Opcode::Function)
                .with_id(func)
                .with_refs([void, Ssa::VOID, Ssa::VOID]),
        )
        .unwrap();
        asm.push_value(
            Instruction::new(Opcode::ValueBuiltIn).with_operands([BuiltIn::VertexIndex as u32, 0, 0]),
            i32_,
        );

        let out = translate(&asm, &CompilerSettings::default());
        assert_eq!(
            out.fatal,
            Some(TranslateError::IllegalBuiltIn {
                builtin: BuiltIn::VertexIndex,
                stage: ShaderStage::Fragment,
            })
        );
        assert!(out.words.is_empty());
        let err = SpirvBackend
            .compile(&asm, &BackendOptions::default())
            .unwrap_err();
        assert!(matches!(err, BackendError::Fatal(_)));
    }

    #[test]
    fn vertex_position_reuses_the_per_vertex_block() {
        let mut asm = Assembler::new();
        let f32_ = asm.type_float(32).unwrap();
        let vec4 = asm.type_vector(f32_, 4).unwrap();
        stage(&mut asm, ShaderStage::Vertex, vec4, |asm| {
            let position = asm.push_value(
                Instruction::new(Opcode::ValueBuiltIn).with_operands([BuiltIn::Position as u32, 0, 0]),
                vec4,
            );
            asm.push(Instruction::new(Opcode::ReturnValue).with_refs([position.value, Ssa::VOID, Ssa::VOID]));
        });

        let out = translate(&asm, &CompilerSettings::default());
        assert!(out.is_clean(), "{:?}", out.errors);
        let positions = instructions(&out.words)
            .into_iter()
            .filter(|(opcode, operands)| match *opcode {
                op::DECORATE => operands[1..] == [decoration::BUILT_IN, built_in::POSITION],
                op::MEMBER_DECORATE => operands[2..] == [decoration::BUILT_IN, built_in::POSITION],
                _ => false,
            })
            .count();
        assert_eq!(positions, 1);
        assert_eq!(count(&out.words, op::VARIABLE), 1);
        // One chain for the read, one for the wrapper's store.
        assert_eq!(count(&out.words, op::ACCESS_CHAIN), 2);
    }

    #[test]
    fn builtins_are_bitcast_to_the_declared_type() {
        let mut asm = Assembler::new();
        let void = asm.type_void().unwrap();
        let u32_ = asm.type_int(false, 32).unwrap();
        stage(&mut asm, ShaderStage::Vertex, void, |asm| {
            asm.push_value(
                Instruction::new(Opcode::ValueBuiltIn).with_operands([BuiltIn::VertexIndex as u32, 0, 0]),
                u32_,
            );
            asm.push(Instruction::new(Opcode::Return));
        });

        let out = translate(&asm, &CompilerSettings::default());
        assert!(out.is_clean(), "{:?}", out.errors);
        let signed = int_type(&out.words, true);
        let unsigned = int_type(&out.words, false);
        let insts = instructions(&out.words);
        let load = insts.iter().find(|(opcode, _)| *opcode == op::LOAD).unwrap();
        assert_eq!(load.1[0], signed);
        let cast = insts.iter().find(|(opcode, _)| *opcode == op::BITCAST).unwrap();
        assert_eq!(cast.1[0], unsigned);
        assert_eq!(cast.1[2], load.1[1]);
        assert_eq!(count(&out.words, op::BITCAST), 1);
    }

    #[test]
    fn bool_builtins_cannot_be_read_as_integers() {
        let mut asm = Assembler::new();
        let void = asm.type_void().unwrap();
        let u32_ = asm.type_int(false, 32).unwrap();
        stage(&mut asm, ShaderStage::Fragment, void, |asm| {
            asm.push_value(
                Instruction::new(Opcode::ValueBuiltIn).with_operands([BuiltIn::FrontFacing as u32, 0, 0]),
                u32_,
            );
            asm.push(Instruction::new(Opcode::Return));
        });

        let out = translate(&asm, &CompilerSettings::default());
        assert!(out.fatal.is_none());
        assert_eq!(out.errors.len(), 1);
        assert!(out.errors[0].to_string().contains("front_facing"), "{}", out.errors[0]);
        assert_eq!(count(&out.words, op::BITCAST), 0);
    }

    #[test]
    fn unknown_opcodes_are_unsupported() {
        let mut asm = Assembler::new();
        asm.push(Instruction::new(Opcode::Unknown));
        let err = SpirvBackend
            .compile(&asm, &BackendOptions::default())
            .unwrap_err();
        assert!(matches!(err, BackendError::Unsupported(_)), "{err}");
        assert_eq!(err.to_string(), "unsupported: UNKNOWN");
    }

    #[test]
    fn overlong_debug_names_are_reported() {
        let mut asm = Assembler::new();
        let func = add_one(&mut asm);
        asm.set_debug_name(func, "n".repeat(4 * u16::MAX as usize));

        let out = translate(&asm, &CompilerSettings::default());
        assert!(out.fatal.is_none());
        assert_eq!(out.errors.len(), 1);
        assert!(out.errors[0].to_string().contains("operand words"), "{}", out.errors[0]);
        assert_eq!(count(&out.words, op::NAME), 0);
        assert_eq!(count(&out.words, op::I_ADD), 1);
    }

    #[test]
    fn recorded_errors_become_diagnostics() {
        let mut asm = Assembler::new();
        let f32_ = asm.type_float(32).unwrap();
        // A non-constant value outside of any function.
        let zero = asm.push_value(Instruction::new(Opcode::ValueZero), f32_);
        asm.push_value(
            Instruction::new(Opcode::ValueExprUnary)
                .with_operands([Operator::Neg as u32, 0, 0])
                .with_refs([zero.value, Ssa::VOID, Ssa::VOID]),
            f32_,
        );
        let output = SpirvBackend
            .compile(&asm, &BackendOptions::default())
            .unwrap();
        assert!(output.has_errors());
        assert_eq!(output.files[0].name, "module.spv");
        match &output.files[0].content {
            OutputContent::Binary(bytes) => assert_eq!(&bytes[..4], &[0x03, 0x02, 0x23, 0x07]),
            OutputContent::Text(_) => panic!("expected binary output"),
        }
    }
}
