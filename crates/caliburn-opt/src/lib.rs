//! Optimization and validation passes over the Caliburn IR.
//!
//! Provides a [`Pass`] trait, a [`PassManager`] with fixed-point iteration,
//! and the built-in passes (literal merging, flattening, validation).

mod flatten;
mod literal_merge;
mod validation;

pub use flatten::Flatten;
pub use literal_merge::LiteralMerge;
pub use validation::CllrValidation;

use std::fmt::Debug;

use caliburn_ir::{Assembler, CompilerSettings, OptimizeLevel, ValidationLevel};

/// A pass over an assembled instruction stream.
pub trait Pass: Debug {
    /// Human-readable name of the pass.
    fn name(&self) -> &str;

    /// Run the pass. Returns `true` if the stream was modified.
    fn run(&self, asm: &mut Assembler) -> bool;
}

/// Maximum number of fixed-point iterations before giving up.
const MAX_ITERATIONS: usize = 10;

/// Runs transforming passes to a fixed point, then every check once.
#[derive(Debug, Default)]
pub struct PassManager {
    passes: Vec<Box<dyn Pass>>,
    checks: Vec<Box<dyn Pass>>,
}

impl PassManager {
    /// Creates an empty pass manager with no passes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a pass manager with the transforms appropriate for `level`.
    pub fn for_level(level: OptimizeLevel) -> Self {
        let mut pm = Self::new();
        match level {
            OptimizeLevel::Debug => {}
            OptimizeLevel::Basic => {
                pm.add_pass(Box::new(Flatten));
            }
            OptimizeLevel::Balanced | OptimizeLevel::Performance => {
                pm.add_pass(Box::new(LiteralMerge));
                pm.add_pass(Box::new(Flatten));
            }
        }
        pm
    }

    /// [`for_level`](Self::for_level) plus validation at the configured level.
    pub fn for_settings(settings: &CompilerSettings) -> Self {
        let mut pm = Self::for_level(settings.opt_level);
        if settings.validation != ValidationLevel::None {
            pm.add_check(Box::new(CllrValidation::new(settings.validation)));
        }
        pm
    }

    /// Adds a transforming pass to the pipeline.
    pub fn add_pass(&mut self, pass: Box<dyn Pass>) {
        self.passes.push(pass);
    }

    /// Adds a pass that runs once, after the transforms settle.
    pub fn add_check(&mut self, check: Box<dyn Pass>) {
        self.checks.push(check);
    }

    pub fn pass_names(&self) -> impl Iterator<Item = &str> {
        self.passes.iter().chain(&self.checks).map(|p| p.name())
    }

    /// Runs all passes until a fixed point is reached or the iteration limit.
    pub fn run(&self, asm: &mut Assembler) {
        for iteration in 0..MAX_ITERATIONS {
            let mut changed = false;
            for pass in &self.passes {
                let modified = pass.run(asm);
                log::debug!("pass {} (iteration {iteration}): modified = {modified}", pass.name());
                changed |= modified;
            }
            if !changed {
                break;
            }
        }
        for check in &self.checks {
            check.run(asm);
        }
    }
}

/// Convenience function: runs the passes `settings` selects.
pub fn optimize(asm: &mut Assembler, settings: &CompilerSettings) {
    PassManager::for_settings(settings).run(asm);
}
