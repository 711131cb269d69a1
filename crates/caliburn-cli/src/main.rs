use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::LevelFilter;
use miette::{Context, IntoDiagnostic};

use caliburn_backend_core::{BackendOptions, BackendRegistry, OutputContent};
use caliburn_backend_spirv::SpirvBackend;
use caliburn_ir::{CompilerSettings, OptimizeLevel, ValidationLevel, Validator};
use caliburn_opt::PassManager;

/// Caliburn: compile IR listings to shader binaries
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Input IR listing (.cllr)
    input: PathBuf,

    /// Target backend
    #[arg(short, long, default_value = "spirv")]
    target: String,

    /// Output path (default: stdout, text targets only)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Settings file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Optimization level: 0, 1, 2, or 3 (overrides the settings file)
    #[arg(long, value_parser = parse_opt_level)]
    opt_level: Option<OptimizeLevel>,

    /// Validation level: none, basic, or full (overrides the settings file)
    #[arg(long)]
    validation: Option<ValidationLevel>,

    /// Dump IR to stderr before backend compilation
    #[arg(long)]
    emit_ir: bool,

    /// Validate and optimize without producing output
    #[arg(long)]
    dry_run: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn parse_opt_level(s: &str) -> Result<OptimizeLevel, String> {
    s.parse::<u8>()
        .ok()
        .and_then(OptimizeLevel::from_number)
        .ok_or_else(|| format!("invalid optimization level '{s}', expected 0, 1, 2, or 3"))
}

fn level_filter(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();

    let mut logger = env_logger::Builder::new();
    logger.filter_level(level_filter(cli.verbose));
    logger.parse_default_env();
    logger.init();

    // 1. Settings: file first, then flags.
    let mut settings = match &cli.config {
        Some(path) => CompilerSettings::load(path)
            .into_diagnostic()
            .wrap_err_with(|| format!("failed to load settings from {}", path.display()))?,
        None => CompilerSettings::default(),
    };
    if let Some(level) = cli.opt_level {
        settings.opt_level = level;
    }
    if let Some(level) = cli.validation {
        settings.validation = level;
    }
    log::debug!("settings: {settings:?}");

    // 2. Read the listing.
    let source = std::fs::read_to_string(&cli.input)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to read {}", cli.input.display()))?;

    // 3. Parse it back into an assembler.
    let mut asm = caliburn_ir::parse_listing(&source)
        .into_diagnostic()
        .wrap_err("IR listing parse failed")?;
    log::info!("parsed {} instructions", asm.code().len());

    // 4. Validate.
    let findings = Validator::validate(&asm, &settings);
    for finding in &findings {
        eprintln!("Error: {finding}");
    }
    if !findings.is_empty() {
        return Err(miette::miette!("validation failed with {} error(s)", findings.len()));
    }

    // 5. Optimize.
    PassManager::for_level(settings.opt_level).run(&mut asm);

    // 6. Optionally dump IR to stderr.
    if cli.emit_ir {
        eprintln!("{}", caliburn_ir::dump_assembler(&asm));
    }

    // 7. Dry-run: stop here.
    if cli.dry_run {
        return Ok(());
    }

    // 8. Backend dispatch.
    let mut registry = BackendRegistry::with_builtins();
    registry.register(Box::new(SpirvBackend));
    let backend = registry.find(&cli.target).ok_or_else(|| {
        let available = registry.list_targets().join(", ");
        miette::miette!("unknown target '{}' (available: {})", cli.target, available)
    })?;
    let opts = BackendOptions::new(settings);
    log::info!("compiling with the {} backend", backend.name());
    log::debug!("{opts}");

    let output = backend
        .compile(&asm, &opts)
        .map_err(|e| miette::miette!("{e}"))
        .wrap_err("backend compilation failed")?;

    // 9. Print diagnostics.
    for diag in &output.diagnostics {
        eprintln!("{diag}");
    }
    if output.has_errors() {
        return Err(miette::miette!("{} reported errors", backend.name()));
    }

    // 10. Write output.
    for file in &output.files {
        match (&cli.output, &file.content) {
            (Some(path), OutputContent::Text(text)) => {
                std::fs::write(path, text)
                    .into_diagnostic()
                    .wrap_err_with(|| format!("failed to write {}", path.display()))?;
            }
            (Some(path), OutputContent::Binary(data)) => {
                std::fs::write(path, data)
                    .into_diagnostic()
                    .wrap_err_with(|| format!("failed to write {}", path.display()))?;
            }
            (None, OutputContent::Text(text)) => {
                print!("{text}");
            }
            (None, OutputContent::Binary(_)) => {
                return Err(miette::miette!(
                    "backend produced binary output but no --output path was specified"
                ));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opt_levels_parse() {
        assert_eq!(parse_opt_level("0"), Ok(OptimizeLevel::Debug));
        assert_eq!(parse_opt_level("3"), Ok(OptimizeLevel::Performance));
        assert!(parse_opt_level("4").is_err());
        assert!(parse_opt_level("fast").is_err());
    }

    #[test]
    fn verbosity_raises_the_filter() {
        assert_eq!(level_filter(0), LevelFilter::Warn);
        assert_eq!(level_filter(2), LevelFilter::Debug);
        assert_eq!(level_filter(9), LevelFilter::Trace);
    }

    #[test]
    fn flags_parse() {
        let cli = Cli::try_parse_from([
            "caliburn",
            "shader.cllr",
            "-t",
            "ir",
            "--validation",
            "full",
            "--opt-level",
            "2",
            "-vv",
        ])
        .unwrap();
        assert_eq!(cli.target, "ir");
        assert_eq!(cli.validation, Some(ValidationLevel::Full));
        assert_eq!(cli.opt_level, Some(OptimizeLevel::Balanced));
        assert_eq!(cli.verbose, 2);
    }
}
