//! Baseline compiler tier for the bytecode VM
//!
//! This crate provides:
//! - Lowering of code blocks to pre-decoded op lists
//! - Compiled functions that run on interpreter frames and reach the
//!   runtime only through the stub table
//! - A [`BaselineJit`] that plugs into [`interpreter::Vm::install_tier`]
//!
//! # Example
//!
//! ```
//! use bytecode_system::{CodeBlock, Opcode};
//! use core_types::Value;
//! use interpreter::{Vm, VmConfig};
//! use jit_compiler::BaselineJit;
//!
//! let mut vm = Vm::new(VmConfig {
//!     tier_up_threshold: 0,
//!     ..VmConfig::default()
//! })
//! .unwrap();
//! let jit = BaselineJit::new();
//! let stats = jit.stats_handle();
//! vm.install_tier(Box::new(jit));
//!
//! let mut block = CodeBlock::function("double", &["x"]);
//! let t = block.temp();
//! block.emit(Opcode::Add { dst: t, lhs: 0, rhs: 0 });
//! block.emit(Opcode::Return { src: t });
//! let double = vm.load(block).unwrap();
//!
//! let result = vm.call(double, Value::undefined(), &[Value::number(21.0)]).unwrap();
//! assert_eq!(result, Value::number(42.0));
//! assert_eq!(stats.snapshot().functions_compiled, 1);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod baseline;
pub mod codegen;
pub mod compiled_code;

// Re-export main types at crate root
pub use baseline::{BaselineJit, BaselineStats, StatsHandle};
pub use codegen::{lower, LowerError, Lowered, Op, Operand};
pub use compiled_code::CompiledFunction;
