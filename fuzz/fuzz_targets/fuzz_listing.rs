#![no_main]

use caliburn_ir::{CompilerSettings, OptimizeLevel};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(source) = std::str::from_utf8(data) {
        // Parsing, flattening and translating must never panic.
        if let Ok(mut asm) = caliburn_ir::parse_listing(source) {
            let settings = CompilerSettings {
                opt_level: OptimizeLevel::Basic,
                ..CompilerSettings::default()
            };
            let _ = caliburn_backend_spirv::translate(&asm, &settings);
            caliburn_opt::optimize(&mut asm, &settings);
            let _ = caliburn_backend_spirv::translate(&asm, &settings);
        }
    }
});
