//! Register-based instruction set.
//!
//! Operands are resolved when the bytecode is generated: registers are
//! frame-relative indices, `name` operands index the code block's identifier
//! table, `cache` operands index its inline-cache sites, and jump targets are
//! absolute instruction indices.

use serde::{Deserialize, Serialize};

/// Frame-relative register index.
///
/// Registers `0..num_params` hold parameters, `num_params..num_vars` hold
/// declared variables, and everything above holds temporaries.
pub type Register = u32;

/// Bytecode opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Opcode {
    // Literals and moves
    /// Load constant `index` from the constant pool
    LoadConst { dst: Register, index: u32 },
    /// Load undefined
    LoadUndefined { dst: Register },
    /// Load null
    LoadNull { dst: Register },
    /// Load a boolean
    LoadBool { dst: Register, value: bool },
    /// Load the frame's `this` value
    LoadThis { dst: Register },
    /// Copy a register
    Move { dst: Register, src: Register },

    // Arithmetic
    /// `lhs + rhs` (numeric addition or string concatenation)
    Add { dst: Register, lhs: Register, rhs: Register },
    /// `lhs - rhs`
    Sub { dst: Register, lhs: Register, rhs: Register },
    /// `lhs * rhs`
    Mul { dst: Register, lhs: Register, rhs: Register },
    /// `lhs / rhs`
    Div { dst: Register, lhs: Register, rhs: Register },
    /// `lhs % rhs`
    Mod { dst: Register, lhs: Register, rhs: Register },
    /// `lhs & rhs`
    BitAnd { dst: Register, lhs: Register, rhs: Register },
    /// `lhs | rhs`
    BitOr { dst: Register, lhs: Register, rhs: Register },
    /// `lhs ^ rhs`
    BitXor { dst: Register, lhs: Register, rhs: Register },
    /// `lhs << rhs`
    ShiftLeft { dst: Register, lhs: Register, rhs: Register },
    /// `lhs >> rhs`
    ShiftRight { dst: Register, lhs: Register, rhs: Register },
    /// `lhs >>> rhs`
    UnsignedShiftRight { dst: Register, lhs: Register, rhs: Register },
    /// `-src`
    Negate { dst: Register, src: Register },
    /// `src + 1` after numeric conversion
    Increment { dst: Register, src: Register },
    /// `src - 1` after numeric conversion
    Decrement { dst: Register, src: Register },
    /// `!src`
    Not { dst: Register, src: Register },
    /// `typeof src`
    TypeOf { dst: Register, src: Register },
    /// Numeric conversion
    ToNumber { dst: Register, src: Register },

    // Comparison
    /// `lhs < rhs`
    Less { dst: Register, lhs: Register, rhs: Register },
    /// `lhs <= rhs`
    LessEq { dst: Register, lhs: Register, rhs: Register },
    /// `lhs > rhs`
    Greater { dst: Register, lhs: Register, rhs: Register },
    /// `lhs >= rhs`
    GreaterEq { dst: Register, lhs: Register, rhs: Register },
    /// `lhs == rhs`
    Equal { dst: Register, lhs: Register, rhs: Register },
    /// `lhs != rhs`
    NotEqual { dst: Register, lhs: Register, rhs: Register },
    /// `lhs === rhs`
    StrictEqual { dst: Register, lhs: Register, rhs: Register },
    /// `lhs !== rhs`
    StrictNotEqual { dst: Register, lhs: Register, rhs: Register },

    // Control flow
    /// Unconditional jump
    Jump { target: u32 },
    /// Jump when `cond` is truthy
    JumpIfTrue { cond: Register, target: u32 },
    /// Jump when `cond` is falsy
    JumpIfFalse { cond: Register, target: u32 },
    /// Loop back-edge: checks for interruption, then jumps
    Loop { target: u32 },

    // Objects
    /// Allocate an empty object
    NewObject { dst: Register },
    /// Allocate an array from `count` consecutive registers starting at `first`
    NewArray { dst: Register, first: Register, count: u32 },
    /// `dst = base.name`
    GetById { dst: Register, base: Register, name: u32, cache: u32 },
    /// `base.name = value`
    PutById { base: Register, name: u32, value: Register, cache: u32 },
    /// `dst = base[key]`
    GetByVal { dst: Register, base: Register, key: Register },
    /// `base[key] = value`
    PutByVal { base: Register, key: Register, value: Register },
    /// `dst = delete base.name`
    DeleteById { dst: Register, base: Register, name: u32 },
    /// `dst = key in base`
    In { dst: Register, key: Register, base: Register },
    /// `dst = value instanceof constructor`
    InstanceOf { dst: Register, value: Register, constructor: Register },

    // Globals
    /// Read a global; throws a reference error when undefined
    GetGlobal { dst: Register, name: u32, cache: u32 },
    /// Write a global
    PutGlobal { name: u32, value: Register, cache: u32 },

    // Scopes
    /// Push a block scope record with the given layout
    PushScope { layout: u32 },
    /// Pop the innermost block scope record
    PopScope,
    /// Read slot `index` of the scope `depth` links up the chain
    GetScopedVar { dst: Register, depth: u32, index: u32 },
    /// Write slot `index` of the scope `depth` links up the chain
    PutScopedVar { depth: u32, index: u32, value: Register },
    /// Dynamic name lookup through frame variables, scope chain and globals
    ResolveName { dst: Register, name: u32 },
    /// Materialize the `arguments` object
    ArgumentsObject { dst: Register },

    // Functions
    /// Create a closure over the current scope chain
    NewFunction { dst: Register, function: u32 },
    /// Call `callee` with `this` and `argc` arguments starting at `first_arg`
    Call {
        dst: Register,
        callee: Register,
        this: Register,
        first_arg: Register,
        argc: u32,
        cache: u32,
    },
    /// Call `base.name(...)` with `base` as `this`
    CallMethod {
        dst: Register,
        base: Register,
        name: u32,
        first_arg: Register,
        argc: u32,
        property_cache: u32,
        cache: u32,
    },
    /// `new callee(...)`
    Construct {
        dst: Register,
        callee: Register,
        first_arg: Register,
        argc: u32,
        cache: u32,
    },
    /// Return `src` to the caller
    Return { src: Register },

    // Exceptions
    /// Throw `src`
    Throw { src: Register },
    /// Move the pending exception into `dst`; first instruction of a handler
    Catch { dst: Register },

    // Debugger
    /// Statement boundary at `line`
    Debug { line: u32 },
}

/// Where an operand points, for validation and disassembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// Single register
    Register(Register),
    /// `count` consecutive registers starting at `first`
    RegisterRange(Register, u32),
    /// Constant pool index
    Constant(u32),
    /// Identifier table index
    Identifier(u32),
    /// Nested function template index
    Function(u32),
    /// Scope layout index
    ScopeLayout(u32),
    /// Property inline-cache site
    PropertyCache(u32),
    /// Call inline-cache site
    CallCache(u32),
    /// Instruction index
    Target(u32),
}

impl Opcode {
    /// Every operand of this instruction.
    pub fn operands(&self) -> Vec<Operand> {
        use Operand::*;
        match *self {
            Opcode::LoadConst { dst, index } => vec![Register(dst), Constant(index)],
            Opcode::LoadUndefined { dst }
            | Opcode::LoadNull { dst }
            | Opcode::LoadBool { dst, .. }
            | Opcode::LoadThis { dst }
            | Opcode::NewObject { dst }
            | Opcode::ArgumentsObject { dst }
            | Opcode::Catch { dst } => vec![Register(dst)],
            Opcode::Move { dst, src }
            | Opcode::Negate { dst, src }
            | Opcode::Increment { dst, src }
            | Opcode::Decrement { dst, src }
            | Opcode::Not { dst, src }
            | Opcode::TypeOf { dst, src }
            | Opcode::ToNumber { dst, src } => vec![Register(dst), Register(src)],
            Opcode::Add { dst, lhs, rhs }
            | Opcode::Sub { dst, lhs, rhs }
            | Opcode::Mul { dst, lhs, rhs }
            | Opcode::Div { dst, lhs, rhs }
            | Opcode::Mod { dst, lhs, rhs }
            | Opcode::BitAnd { dst, lhs, rhs }
            | Opcode::BitOr { dst, lhs, rhs }
            | Opcode::BitXor { dst, lhs, rhs }
            | Opcode::ShiftLeft { dst, lhs, rhs }
            | Opcode::ShiftRight { dst, lhs, rhs }
            | Opcode::UnsignedShiftRight { dst, lhs, rhs }
            | Opcode::Less { dst, lhs, rhs }
            | Opcode::LessEq { dst, lhs, rhs }
            | Opcode::Greater { dst, lhs, rhs }
            | Opcode::GreaterEq { dst, lhs, rhs }
            | Opcode::Equal { dst, lhs, rhs }
            | Opcode::NotEqual { dst, lhs, rhs }
            | Opcode::StrictEqual { dst, lhs, rhs }
            | Opcode::StrictNotEqual { dst, lhs, rhs } => {
                vec![Register(dst), Register(lhs), Register(rhs)]
            }
            Opcode::Jump { target } | Opcode::Loop { target } => vec![Target(target)],
            Opcode::JumpIfTrue { cond, target } | Opcode::JumpIfFalse { cond, target } => {
                vec![Register(cond), Target(target)]
            }
            Opcode::NewArray { dst, first, count } => vec![Register(dst), RegisterRange(first, count)],
            Opcode::GetById { dst, base, name, cache } => {
                vec![Register(dst), Register(base), Identifier(name), PropertyCache(cache)]
            }
            Opcode::PutById { base, name, value, cache } => {
                vec![Register(base), Identifier(name), Register(value), PropertyCache(cache)]
            }
            Opcode::GetByVal { dst, base, key } => vec![Register(dst), Register(base), Register(key)],
            Opcode::PutByVal { base, key, value } => vec![Register(base), Register(key), Register(value)],
            Opcode::DeleteById { dst, base, name } => vec![Register(dst), Register(base), Identifier(name)],
            Opcode::In { dst, key, base } => vec![Register(dst), Register(key), Register(base)],
            Opcode::InstanceOf { dst, value, constructor } => {
                vec![Register(dst), Register(value), Register(constructor)]
            }
            Opcode::GetGlobal { dst, name, cache } => {
                vec![Register(dst), Identifier(name), PropertyCache(cache)]
            }
            Opcode::PutGlobal { name, value, cache } => {
                vec![Identifier(name), Register(value), PropertyCache(cache)]
            }
            Opcode::PushScope { layout } => vec![ScopeLayout(layout)],
            Opcode::PopScope => vec![],
            Opcode::GetScopedVar { dst, .. } => vec![Register(dst)],
            Opcode::PutScopedVar { value, .. } => vec![Register(value)],
            Opcode::ResolveName { dst, name } => vec![Register(dst), Identifier(name)],
            Opcode::NewFunction { dst, function } => vec![Register(dst), Function(function)],
            Opcode::Call { dst, callee, this, first_arg, argc, cache } => vec![
                Register(dst),
                Register(callee),
                Register(this),
                RegisterRange(first_arg, argc),
                CallCache(cache),
            ],
            Opcode::CallMethod { dst, base, name, first_arg, argc, property_cache, cache } => vec![
                Register(dst),
                Register(base),
                Identifier(name),
                RegisterRange(first_arg, argc),
                PropertyCache(property_cache),
                CallCache(cache),
            ],
            Opcode::Construct { dst, callee, first_arg, argc, cache } => vec![
                Register(dst),
                Register(callee),
                RegisterRange(first_arg, argc),
                CallCache(cache),
            ],
            Opcode::Return { src } | Opcode::Throw { src } => vec![Register(src)],
            Opcode::Debug { .. } => vec![],
        }
    }

    /// Jump target, for branch instructions.
    pub fn jump_target(&self) -> Option<u32> {
        match *self {
            Opcode::Jump { target }
            | Opcode::Loop { target }
            | Opcode::JumpIfTrue { target, .. }
            | Opcode::JumpIfFalse { target, .. } => Some(target),
            _ => None,
        }
    }

    /// Whether control never falls through to the next instruction.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Opcode::Jump { .. } | Opcode::Loop { .. } | Opcode::Return { .. } | Opcode::Throw { .. }
        )
    }
}
