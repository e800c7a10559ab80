//! End-to-end runs through the command-line runtime
//!
//! Programs are serialized to disk, read back by the runtime and executed
//! with the options the command line would set.

use bytecode_system::{CodeBlock, Opcode};
use integration_tests::programs;
use interpreter::VmConfig;
use js_cli::{CliError, Runtime};
use std::io::Write;
use tempfile::NamedTempFile;

fn write_program(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();
    file
}

#[test]
fn test_program_file_runs_on_both_tiers() {
    let json = programs::summing_loop(10.0).to_json().unwrap();
    let file = write_program(&json);

    let mut interpreted = Runtime::new(VmConfig::default(), false).unwrap();
    let outcome = interpreted.execute_file(file.path()).unwrap();
    assert_eq!(outcome.display, "45");

    let config = VmConfig {
        tier_up_threshold: 0,
        ..VmConfig::default()
    };
    let mut compiled = Runtime::new(config, true).unwrap();
    let outcome = compiled.execute_file(file.path()).unwrap();
    assert_eq!(outcome.display, "45");
    assert!(compiled.stats_report().contains("jit: 1 compiled"));
}

#[test]
fn test_caught_exception_is_a_normal_result() {
    let json = programs::catch_three_frames_up("handled").to_json().unwrap();
    let file = write_program(&json);
    let mut runtime = Runtime::new(VmConfig::default(), false).unwrap();
    let outcome = runtime.execute_file(file.path()).unwrap();
    assert_eq!(outcome.display, "handled");
}

#[test]
fn test_uncaught_exception_reports_its_stack() {
    let chain = programs::forwarder("outer", programs::thrower("inner", "lost"));
    let mut program = CodeBlock::new();
    let (f, undef, out) = (program.temp(), program.temp(), program.temp());
    let template = program.add_function(chain);
    let cache = program.new_call_cache();
    program.emit(Opcode::NewFunction { dst: f, function: template });
    program.emit(Opcode::LoadUndefined { dst: undef });
    program.emit(Opcode::Call {
        dst: out,
        callee: f,
        this: undef,
        first_arg: undef,
        argc: 0,
        cache,
    });
    program.emit(Opcode::Return { src: out });

    let mut runtime = Runtime::new(VmConfig::default(), false).unwrap();
    let error = runtime.execute(program).unwrap_err();
    assert_eq!(error.exit_code(), 1);
    match error {
        CliError::Uncaught(report) => {
            assert_eq!(report.message, "lost");
            let names: Vec<_> = report
                .stack
                .iter()
                .map(|frame| frame.function_name.as_deref())
                .collect();
            assert_eq!(names, [Some("inner"), Some("outer"), None]);
        }
        other => panic!("expected an uncaught exception, got {other:?}"),
    }
    assert_eq!(runtime.vm().call_depth(), 0);
}
