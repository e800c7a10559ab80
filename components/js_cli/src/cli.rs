//! Command-line arguments

use clap::Parser;
use interpreter::VmConfig;
use std::path::PathBuf;

/// Run a JSON-serialized bytecode program
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "corten-vm", version, about = "Bytecode virtual machine")]
pub struct Cli {
    /// Program file (a serialized code block)
    #[arg(short = 'f', long = "file", value_name = "FILE")]
    pub file: Option<PathBuf>,

    /// Program text given inline
    #[arg(short = 'e', long = "eval", value_name = "JSON", conflicts_with = "file")]
    pub eval: Option<String>,

    /// VM configuration file; flags below override it
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Abort the program after this many milliseconds
    #[arg(long = "timeout-ms", value_name = "MS")]
    pub timeout_ms: Option<u64>,

    /// Disable property and call inline caches
    #[arg(long = "no-ic")]
    pub no_ic: bool,

    /// Install the baseline compiler tier
    #[arg(long = "jit")]
    pub jit: bool,

    /// Calls before a function is compiled (with --jit)
    #[arg(long = "jit-threshold", value_name = "CALLS")]
    pub jit_threshold: Option<u32>,

    /// Throw on writes to read-only properties
    #[arg(long = "strict")]
    pub strict: bool,

    /// Print the disassembled program before running it
    #[arg(long = "print-bytecode")]
    pub print_bytecode: bool,

    /// Print collector and compiler statistics after the run
    #[arg(long = "stats")]
    pub stats: bool,

    /// Emit tracing events to stderr
    #[arg(long = "trace")]
    pub trace: bool,

    /// Emit tracing events as JSON lines (implies --trace)
    #[arg(long = "trace-json")]
    pub trace_json: bool,
}

impl Cli {
    /// Apply flag overrides on top of `config`
    pub fn apply_overrides(&self, mut config: VmConfig) -> VmConfig {
        if let Some(ms) = self.timeout_ms {
            config.time_limit_ms = Some(ms);
        }
        if self.no_ic {
            config.inline_caching = false;
        }
        if let Some(threshold) = self.jit_threshold {
            config.tier_up_threshold = threshold;
        }
        if self.strict {
            config.read_only_policy = interpreter::ReadOnlyPolicy::Throw;
        }
        config
    }

    /// Whether any tracing output was requested
    pub fn tracing_enabled(&self) -> bool {
        self.trace || self.trace_json
    }
}
