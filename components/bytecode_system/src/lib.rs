//! Bytecode system for the execution core
//!
//! This crate defines the register-based instruction set, the code block
//! container the interpreter and baseline compiler consume, and the
//! structural validation run before a code block is loaded.
//!
//! # Features
//!
//! - Register-based bytecode with resolved operands
//! - Per-site inline-cache indices carried in the instructions
//! - Exception handler tables with scope depth restore
//! - JSON serialization via serde
//!
//! # Example
//!
//! ```
//! use bytecode_system::{CodeBlock, Opcode};
//!
//! let mut block = CodeBlock::new();
//! let r = block.temp();
//! let two = block.add_constant(2.0);
//! block.emit(Opcode::LoadConst { dst: r, index: two });
//! block.emit(Opcode::Return { src: r });
//!
//! assert!(block.validate().is_ok());
//! let restored = CodeBlock::from_json(&block.to_json().unwrap()).unwrap();
//! assert_eq!(restored, block);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod code_block;
pub mod constant;
pub mod instruction;
pub mod opcode;
pub mod validate;

// Re-export main types at crate root
pub use code_block::{CodeBlock, HandlerInfo};
pub use constant::Constant;
pub use instruction::Instruction;
pub use opcode::{Opcode, Operand, Register};
pub use validate::BytecodeError;
