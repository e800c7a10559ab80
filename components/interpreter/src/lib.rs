//! Bytecode interpreter and execution context
//!
//! This crate provides the register-based virtual machine with:
//! - A dispatch loop that keeps script-to-script calls off the Rust stack
//! - Per-site inline caches for property access and calls
//! - Activation tear-off so closures share variables with their frame
//! - Exception handler ranges unwound across interpreted and compiled frames
//! - The runtime stub table compiled code calls into
//! - Host functions, debugger hooks, interruption and a lockable [`Engine`]
//!
//! # Example
//!
//! ```
//! use interpreter::Vm;
//! use bytecode_system::{CodeBlock, Opcode};
//! use core_types::Value;
//!
//! let mut vm = Vm::default();
//! let mut block = CodeBlock::new();
//! let (a, b, sum) = (block.temp(), block.temp(), block.temp());
//! let forty = block.add_constant(40.0);
//! let two = block.add_constant(2.0);
//! block.emit(Opcode::LoadConst { dst: a, index: forty });
//! block.emit(Opcode::LoadConst { dst: b, index: two });
//! block.emit(Opcode::Add { dst: sum, lhs: a, rhs: b });
//! block.emit(Opcode::Return { src: sum });
//!
//! assert_eq!(vm.run(block).unwrap(), Value::number(42.0));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod call_frame;
pub mod config;
pub mod debugger;
mod dispatch;
pub mod engine;
pub mod inline_cache;
pub mod interrupt;
pub mod native;
pub mod property;
pub mod runtime;
pub mod scope;
pub mod stubs;
pub mod tier;
pub mod vm;

// Re-export main types at crate root
pub use call_frame::{CallFrame, RegisterFile};
pub use config::{ReadOnlyPolicy, VmConfig};
pub use debugger::{DebugEvent, DebugEventKind, DebugListener};
pub use engine::{Engine, EngineGuard};
pub use inline_cache::{CacheState, InlineCache, PropertyEntry, POLYMORPHIC_CACHE_SIZE};
pub use interrupt::InterruptHandle;
pub use native::{NativeCall, NativeFunction};
pub use property::PropertySite;
pub use runtime::{BinaryOp, UnaryOp};
pub use scope::Location;
pub use stubs::{StubArg, StubFrame, StubFunction, StubId, StubReturn, EXCEPTION_SENTINEL, NO_SITE, STUB_ARG_COUNT};
pub use tier::{CompiledCode, CompilerTier};
pub use vm::{Intrinsics, Unwind, Vm};
