//! Code blocks - the unit of compiled bytecode
//!
//! A code block holds one function's (or one program's) instructions together
//! with everything the instructions index into: the constant pool, the
//! identifier table, nested function templates, scope layouts and the
//! exception handler table. It also carries the builder helpers front ends
//! and tests use to assemble bytecode.

use crate::constant::Constant;
use crate::instruction::Instruction;
use crate::opcode::{Opcode, Register};
use core_types::SourcePosition;
use serde::{Deserialize, Serialize};

/// One exception handler range.
///
/// A throw from any instruction in `start..end` transfers to `target` after
/// popping block scopes until `scope_depth` remain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerInfo {
    /// First covered instruction
    pub start: u32,
    /// One past the last covered instruction
    pub end: u32,
    /// Handler entry (normally a `Catch`)
    pub target: u32,
    /// Block scope depth to restore before entering the handler
    pub scope_depth: u32,
}

impl HandlerInfo {
    /// Whether `pc` is covered.
    pub fn covers(&self, pc: u32) -> bool {
        self.start <= pc && pc < self.end
    }
}

/// A compiled function or program.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CodeBlock {
    /// Function name, `None` for programs and anonymous functions
    #[serde(default)]
    pub name: Option<String>,
    /// Sequence of bytecode instructions
    pub instructions: Vec<Instruction>,
    /// Constant pool for literal values
    #[serde(default)]
    pub constants: Vec<Constant>,
    /// Property-name identifiers
    #[serde(default)]
    pub identifiers: Vec<String>,
    /// Nested function templates (for closures)
    #[serde(default)]
    pub functions: Vec<CodeBlock>,
    /// Block scope layouts; each entry lists identifier indices
    #[serde(default)]
    pub scope_layouts: Vec<Vec<u32>>,
    /// Exception handler ranges, innermost first
    #[serde(default)]
    pub handlers: Vec<HandlerInfo>,
    /// Identifier index of every variable register, parameters first
    #[serde(default)]
    pub variables: Vec<u32>,
    /// Declared parameter count
    #[serde(default)]
    pub num_params: u32,
    /// Parameters plus declared variables
    #[serde(default)]
    pub num_vars: u32,
    /// Total registers including temporaries
    pub num_registers: u32,
    /// Whether nested closures or block scopes capture this frame's variables
    #[serde(default)]
    pub needs_activation: bool,
    /// Number of property inline-cache sites
    #[serde(default)]
    pub property_cache_count: u32,
    /// Number of call inline-cache sites
    #[serde(default)]
    pub call_cache_count: u32,
}

impl CodeBlock {
    /// Create an empty program block
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty function block with named parameters
    pub fn function(name: &str, params: &[&str]) -> Self {
        let mut block = CodeBlock {
            name: Some(name.to_string()),
            ..CodeBlock::default()
        };
        for param in params {
            block.declare_variable(param);
        }
        block.num_params = params.len() as u32;
        block
    }

    /// Emit an instruction without source position, returning its index
    pub fn emit(&mut self, opcode: Opcode) -> u32 {
        self.instructions.push(Instruction::new(opcode));
        (self.instructions.len() - 1) as u32
    }

    /// Emit an instruction with source position, returning its index
    pub fn emit_with_position(&mut self, opcode: Opcode, position: SourcePosition) -> u32 {
        self.instructions.push(Instruction::with_position(opcode, position));
        (self.instructions.len() - 1) as u32
    }

    /// Index the next emitted instruction will get
    pub fn next_pc(&self) -> u32 {
        self.instructions.len() as u32
    }

    /// Point the branch at `at` to `target`
    pub fn patch_jump(&mut self, at: u32, target: u32) {
        if let Some(instruction) = self.instructions.get_mut(at as usize) {
            match &mut instruction.opcode {
                Opcode::Jump { target: t }
                | Opcode::Loop { target: t }
                | Opcode::JumpIfTrue { target: t, .. }
                | Opcode::JumpIfFalse { target: t, .. } => *t = target,
                _ => debug_assert!(false, "patching a non-branch instruction"),
            }
        }
    }

    /// Add a constant to the constant pool and return its index
    pub fn add_constant(&mut self, constant: impl Into<Constant>) -> u32 {
        let constant = constant.into();
        if let Some(existing) = self.constants.iter().position(|c| *c == constant) {
            return existing as u32;
        }
        self.constants.push(constant);
        (self.constants.len() - 1) as u32
    }

    /// Add (or find) an identifier and return its index
    pub fn add_identifier(&mut self, name: &str) -> u32 {
        if let Some(existing) = self.identifiers.iter().position(|n| n == name) {
            return existing as u32;
        }
        self.identifiers.push(name.to_string());
        (self.identifiers.len() - 1) as u32
    }

    /// Add a nested function template and return its index
    pub fn add_function(&mut self, function: CodeBlock) -> u32 {
        self.functions.push(function);
        (self.functions.len() - 1) as u32
    }

    /// Add a block scope layout and return its index
    pub fn add_scope_layout(&mut self, names: &[&str]) -> u32 {
        let layout = names.iter().map(|name| self.add_identifier(name)).collect();
        self.scope_layouts.push(layout);
        (self.scope_layouts.len() - 1) as u32
    }

    /// Register a handler range
    pub fn add_handler(&mut self, start: u32, end: u32, target: u32, scope_depth: u32) {
        self.handlers.push(HandlerInfo {
            start,
            end,
            target,
            scope_depth,
        });
    }

    /// Declare a variable register; must precede temporaries
    pub fn declare_variable(&mut self, name: &str) -> Register {
        debug_assert_eq!(self.num_vars, self.num_registers, "variables must precede temporaries");
        let identifier = self.add_identifier(name);
        self.variables.push(identifier);
        self.num_vars += 1;
        self.num_registers = self.num_registers.max(self.num_vars);
        self.num_vars - 1
    }

    /// Reserve a temporary register
    pub fn temp(&mut self) -> Register {
        self.num_registers += 1;
        self.num_registers - 1
    }

    /// Reserve `count` consecutive temporaries and return the first
    pub fn temps(&mut self, count: u32) -> Register {
        let first = self.num_registers;
        self.num_registers += count;
        first
    }

    /// Allocate a property inline-cache site
    pub fn new_property_cache(&mut self) -> u32 {
        self.property_cache_count += 1;
        self.property_cache_count - 1
    }

    /// Allocate a call inline-cache site
    pub fn new_call_cache(&mut self) -> u32 {
        self.call_cache_count += 1;
        self.call_cache_count - 1
    }

    /// Innermost handler covering `pc`
    pub fn handler_for(&self, pc: u32) -> Option<&HandlerInfo> {
        self.handlers
            .iter()
            .filter(|handler| handler.covers(pc))
            .min_by_key(|handler| handler.end - handler.start)
    }

    /// Identifier text, empty if out of range
    pub fn identifier(&self, index: u32) -> &str {
        self.identifiers
            .get(index as usize)
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Line of the instruction at `pc`, 0 when unknown
    pub fn line_at(&self, pc: u32) -> u32 {
        self.instructions
            .get(pc as usize)
            .map(Instruction::line)
            .unwrap_or(0)
    }

    /// Get the number of instructions
    pub fn instruction_count(&self) -> usize {
        self.instructions.len()
    }

    /// Parse a block from its JSON form
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Serialize the block to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Human-readable listing of this block and its nested functions
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        self.disassemble_into(&mut out, 0);
        out
    }

    fn disassemble_into(&self, out: &mut String, indent: usize) {
        use std::fmt::Write;
        let pad = "  ".repeat(indent);
        let _ = writeln!(
            out,
            "{pad}function {} (params {}, vars {}, registers {})",
            self.name.as_deref().unwrap_or("<program>"),
            self.num_params,
            self.num_vars,
            self.num_registers
        );
        for (pc, instruction) in self.instructions.iter().enumerate() {
            let _ = writeln!(out, "{pad}  {pc:4}: {:?}", instruction.opcode);
        }
        for handler in &self.handlers {
            let _ = writeln!(
                out,
                "{pad}  handler [{}, {}) -> {} depth {}",
                handler.start, handler.end, handler.target, handler.scope_depth
            );
        }
        for function in &self.functions {
            function.disassemble_into(out, indent + 1);
        }
    }
}
