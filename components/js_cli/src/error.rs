//! Error types for the CLI

use core_types::{JsError, VmError};
use std::path::PathBuf;
use thiserror::Error;

/// CLI-specific errors
#[derive(Debug, Error)]
pub enum CliError {
    /// File I/O error
    #[error("could not read '{}': {source}", path.display())]
    Io {
        /// File that failed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The program is not a valid serialized code block
    #[error("malformed program: {0}")]
    Program(#[source] serde_json::Error),

    /// The configuration file could not be parsed
    #[error("malformed configuration: {0}")]
    Config(#[source] serde_json::Error),

    /// The program failed validation or the VM failed fatally
    #[error(transparent)]
    Vm(#[from] VmError),

    /// A script exception reached the top level
    #[error("{0}")]
    Uncaught(JsError),

    /// Neither a file nor inline program was given
    #[error("no program given; pass --file or --eval")]
    NoProgram,
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Uncaught(_) => 1,
            CliError::Vm(VmError::Interrupted) => 124,
            CliError::Vm(_) => 3,
            CliError::Io { .. } | CliError::Program(_) | CliError::Config(_) | CliError::NoProgram => 2,
        }
    }
}

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;
