//! IR validation pass.
//!
//! Runs the [`Validator`] and records every finding in the assembler's
//! error collector. This pass never modifies the stream.

use caliburn_ir::{Assembler, CompilerSettings, ValidationLevel, Validator};

use crate::Pass;

#[derive(Debug)]
pub struct CllrValidation {
    settings: CompilerSettings,
}

impl CllrValidation {
    pub fn new(level: ValidationLevel) -> Self {
        Self {
            settings: CompilerSettings {
                validation: level,
                ..CompilerSettings::default()
            },
        }
    }
}

impl Pass for CllrValidation {
    fn name(&self) -> &str {
        "cllr-validation"
    }

    fn run(&self, asm: &mut Assembler) -> bool {
        let findings = Validator::validate(asm, &self.settings);
        for finding in &findings {
            log::warn!("{finding}");
        }
        asm.errors_mut().extend(findings);
        false
    }
}
