//! Dead-code removal and dense renumbering as a pipeline pass.

use caliburn_ir::Assembler;

use crate::Pass;

/// Runs [`Assembler::flatten`].
#[derive(Debug)]
pub struct Flatten;

impl Pass for Flatten {
    fn name(&self) -> &str {
        "flatten"
    }

    fn run(&self, asm: &mut Assembler) -> bool {
        let before = asm.len();
        let renumbered = asm.flatten();
        renumbered > 0 || asm.len() != before
    }
}
