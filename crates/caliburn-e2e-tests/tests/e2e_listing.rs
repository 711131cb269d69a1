mod common;

use caliburn_backend_core::{BackendRegistry, IrListingBackend};
use caliburn_backend_spirv::SpirvBackend;
use caliburn_ir::CompilerSettings;

#[test]
fn ir_target_writes_a_parsable_listing() {
    let output = common::compile_listing(common::ADD_ONE, &IrListingBackend, &common::basic_settings());
    assert!(!output.has_errors(), "{:?}", output.diagnostics);
    assert_eq!(output.files[0].name, "module.cllr");

    let text = common::first_text(&output);
    assert!(text.contains("VALUE_EXPR"));
    let again = caliburn_ir::parse_listing(text).unwrap();
    assert!(again.errors().is_empty());
    assert_eq!(caliburn_ir::dump_assembler(&again), text);
}

#[test]
fn registry_dispatches_both_targets() {
    let mut registry = BackendRegistry::with_builtins();
    registry.register(Box::new(SpirvBackend));
    assert_eq!(registry.list_targets(), ["ir", "cllr", "spirv", "spv"]);

    let settings = CompilerSettings::default();
    let spirv = registry.find("spv").unwrap();
    let output = common::compile_listing(common::FRAGMENT, spirv, &settings);
    assert_eq!(output.files[0].name, "module.spv");

    let ir = registry.find("cllr").unwrap();
    let output = common::compile_listing(common::FRAGMENT, ir, &settings);
    assert!(common::first_text(&output).contains("SHADER_STAGE_END"));
}
