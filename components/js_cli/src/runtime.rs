//! Runtime orchestration for program execution
//!
//! The Runtime owns one [`Vm`], optionally with the baseline compiler tier
//! installed, and turns program files into results or reportable errors.

use crate::error::{CliError, CliResult};
use bytecode_system::CodeBlock;
use core_types::{Value, VmError};
use interpreter::{Vm, VmConfig};
use jit_compiler::{BaselineJit, BaselineStats, StatsHandle};
use std::fmt::Write as _;
use std::path::Path;

/// What a finished run produced
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    /// The completion value
    pub value: Value,
    /// The completion value as the VM displays it
    pub display: String,
}

/// Runtime that loads and runs serialized programs
pub struct Runtime {
    vm: Vm,
    jit: Option<StatsHandle>,
    print_bytecode: bool,
}

impl Runtime {
    /// Create a runtime with `config`
    ///
    /// # Example
    /// ```
    /// use interpreter::VmConfig;
    /// use js_cli::Runtime;
    ///
    /// let runtime = Runtime::new(VmConfig::default(), true).unwrap();
    /// assert!(runtime.is_jit_enabled());
    /// ```
    pub fn new(config: VmConfig, enable_jit: bool) -> CliResult<Self> {
        let mut vm = Vm::new(config)?;
        let jit = enable_jit.then(|| {
            let jit = BaselineJit::new();
            let stats = jit.stats_handle();
            vm.install_tier(Box::new(jit));
            stats
        });
        Ok(Self {
            vm,
            jit,
            print_bytecode: false,
        })
    }

    /// Print the disassembly of each program before running it
    pub fn with_print_bytecode(mut self, enabled: bool) -> Self {
        self.print_bytecode = enabled;
        self
    }

    /// Read a configuration file
    pub fn load_config(path: &Path) -> CliResult<VmConfig> {
        let text = std::fs::read_to_string(path).map_err(|source| CliError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        VmConfig::from_json_str(&text).map_err(CliError::Config)
    }

    /// Whether the compiler tier is installed
    pub fn is_jit_enabled(&self) -> bool {
        self.jit.is_some()
    }

    /// Whether programs are disassembled before they run
    pub fn is_print_bytecode_enabled(&self) -> bool {
        self.print_bytecode
    }

    /// The underlying VM
    pub fn vm(&mut self) -> &mut Vm {
        &mut self.vm
    }

    /// Run the program stored in `path`
    ///
    /// # Example
    /// ```no_run
    /// use interpreter::VmConfig;
    /// use js_cli::Runtime;
    ///
    /// let mut runtime = Runtime::new(VmConfig::default(), false).unwrap();
    /// let outcome = runtime.execute_file("program.json".as_ref()).unwrap();
    /// println!("{}", outcome.display);
    /// ```
    pub fn execute_file(&mut self, path: &Path) -> CliResult<Outcome> {
        let text = std::fs::read_to_string(path).map_err(|source| CliError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.execute_json(&text)
    }

    /// Run a program given as JSON text
    pub fn execute_json(&mut self, text: &str) -> CliResult<Outcome> {
        let block = CodeBlock::from_json(text).map_err(CliError::Program)?;
        self.execute(block)
    }

    /// Run a program
    pub fn execute(&mut self, block: CodeBlock) -> CliResult<Outcome> {
        if self.print_bytecode {
            println!("{}", block.disassemble());
        }
        tracing::debug!(
            target: "interpreter",
            instructions = block.instructions.len(),
            functions = block.functions.len(),
            "running program"
        );
        let result = self.vm.run(block);
        let outcome = match result {
            Ok(value) => Outcome {
                value,
                display: self.vm.to_display_string(value),
            },
            Err(error @ VmError::Exception(_)) => {
                let report = self.vm.describe_exception(&error);
                self.vm.release_temporaries();
                return Err(CliError::Uncaught(report));
            }
            Err(error) => {
                self.vm.release_temporaries();
                return Err(CliError::Vm(error));
            }
        };
        self.vm.release_temporaries();
        Ok(outcome)
    }

    /// Compiler statistics, when the tier is installed
    pub fn jit_stats(&self) -> Option<BaselineStats> {
        self.jit.as_ref().map(StatsHandle::snapshot)
    }

    /// Human-readable collector and compiler statistics
    pub fn stats_report(&self) -> String {
        let gc = self.vm.gc_stats();
        let mut report = String::new();
        let _ = writeln!(
            report,
            "gc: {} collections, {} cells allocated, {} freed ({} bytes), {:?} paused",
            gc.collections, gc.cells_allocated, gc.cells_freed, gc.bytes_freed, gc.total_pause
        );
        if let Some(jit) = self.jit_stats() {
            let _ = writeln!(
                report,
                "jit: {} compiled, {} declined, {} ops, {} fused branches, {} stub calls",
                jit.functions_compiled, jit.functions_declined, jit.ops_emitted, jit.fused_branches, jit.stub_calls
            );
        }
        report
    }
}
