//! Corten VM command-line runner
//!
//! Entry point for the bytecode VM. Parses CLI arguments and delegates to
//! the Runtime for execution.

use clap::Parser as ClapParser;
use interpreter::VmConfig;
use js_cli::{logging, Cli, CliError, CliResult, Runtime};

fn run(cli: &Cli) -> CliResult<()> {
    let config = match &cli.config {
        Some(path) => Runtime::load_config(path)?,
        None => VmConfig::default(),
    };
    let config = cli.apply_overrides(config);
    let mut runtime = Runtime::new(config, cli.jit)?.with_print_bytecode(cli.print_bytecode);

    let outcome = match (&cli.file, &cli.eval) {
        (Some(path), _) => runtime.execute_file(path),
        (None, Some(text)) => runtime.execute_json(text),
        (None, None) => Err(CliError::NoProgram),
    };
    if cli.stats {
        eprint!("{}", runtime.stats_report());
    }

    let outcome = outcome?;
    if !outcome.value.is_undefined() {
        println!("{}", outcome.display);
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    if cli.tracing_enabled() {
        logging::init_tracing(cli.trace_json);
    }

    if let Err(error) = run(&cli) {
        match &error {
            CliError::Uncaught(report) => eprintln!("Uncaught {report}"),
            other => eprintln!("Error: {other}"),
        }
        std::process::exit(error.exit_code());
    }
}
