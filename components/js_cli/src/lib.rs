//! Command-line runner for serialized bytecode programs
//!
//! Provides the [`Runtime`] that owns a configured [`interpreter::Vm`] and the
//! supporting modules for the `corten-vm` binary.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cli;
pub mod error;
pub mod logging;
pub mod runtime;

pub use cli::Cli;
pub use error::{CliError, CliResult};
pub use runtime::{Outcome, Runtime};
