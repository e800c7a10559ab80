//! Lowering from bytecode to the baseline op list
//!
//! Every instruction is decoded once: identifier operands become atoms,
//! non-cell constants become values, register ranges are expanded and jump
//! targets are rewritten to op indices. A comparison whose result feeds the
//! conditional jump right after it is fused with that jump, unless something
//! else jumps to the branch.

use bytecode_system::{CodeBlock, Opcode, Register};
use core_types::Value;
use interpreter::{BinaryOp, StubArg, StubId, UnaryOp, Vm};
use memory_manager::{Atom, CodeId};
use std::collections::HashSet;

/// Where a stub argument word comes from
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand {
    /// Read a register when the op runs
    Register(Register),
    /// An interned identifier
    Atom(Atom),
    /// A small integer (template, layout, depth, site, line)
    Index(u32),
}

impl Operand {
    /// The argument word for this operand
    pub fn word(self, vm: &Vm) -> StubArg {
        match self {
            Operand::Register(register) => StubArg::from_value(vm.register(register)),
            Operand::Atom(atom) => StubArg::from_atom(atom),
            Operand::Index(index) => StubArg::from_index(index),
        }
    }
}

/// One pre-decoded operation
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// Store a value known at compile time
    LoadValue {
        /// Destination register
        dst: Register,
        /// The value
        value: Value,
    },
    /// Store a heap constant of the code block
    LoadConstant {
        /// Destination register
        dst: Register,
        /// Constant pool index
        index: u32,
    },
    /// Store the frame's `this`
    LoadThis {
        /// Destination register
        dst: Register,
    },
    /// Register copy
    Move {
        /// Destination register
        dst: Register,
        /// Source register
        src: Register,
    },
    /// Binary operator with a number fast path
    Binary {
        /// Operator
        op: BinaryOp,
        /// Destination register
        dst: Register,
        /// Left operand
        lhs: Register,
        /// Right operand
        rhs: Register,
    },
    /// Unary operator with a number fast path
    Unary {
        /// Operator
        op: UnaryOp,
        /// Destination register
        dst: Register,
        /// Operand
        src: Register,
    },
    /// Comparison fused with the conditional jump that consumes it
    CompareAndBranch {
        /// Comparison operator
        op: BinaryOp,
        /// Register receiving the comparison result
        dst: Register,
        /// Left operand
        lhs: Register,
        /// Right operand
        rhs: Register,
        /// Jump when the result equals this
        when: bool,
        /// Op index to jump to
        target: usize,
        /// Bytecode pc of the jump, for stub return addresses
        branch_pc: u32,
    },
    /// Unconditional jump
    Jump {
        /// Op index
        target: usize,
    },
    /// Conditional jump on a register's truthiness
    Branch {
        /// Condition register
        cond: Register,
        /// Jump when truthiness equals this
        when: bool,
        /// Op index
        target: usize,
    },
    /// Back-edge: interrupt check, then jump
    Loop {
        /// Op index
        target: usize,
    },
    /// Generic stub call
    Stub {
        /// Stub to call
        id: StubId,
        /// Register receiving the primary result
        dst: Option<Register>,
        /// Argument words
        args: Vec<Operand>,
    },
    /// `base.name(args...)`: property read then call with `base` as `this`
    CallMethod {
        /// Destination register
        dst: Register,
        /// Receiver register
        base: Register,
        /// Method name
        name: Atom,
        /// Property cache site
        property_site: u32,
        /// Call cache site
        call_site: u32,
        /// Argument registers
        args: Vec<Register>,
    },
    /// Move the pending exception into a register
    Catch {
        /// Destination register
        dst: Register,
    },
    /// Leave the function with a register's value
    Return {
        /// Source register
        src: Register,
    },
}

impl Op {
    /// Whether running this op goes through the stub table
    pub fn calls_stubs(&self) -> bool {
        matches!(
            self,
            Op::Stub { .. }
                | Op::CallMethod { .. }
                | Op::Loop { .. }
                | Op::Binary { .. }
                | Op::Unary { .. }
                | Op::CompareAndBranch { .. }
        )
    }
}

/// Result of lowering one code block
#[derive(Debug, Clone)]
pub struct Lowered {
    /// Pre-decoded ops
    pub ops: Vec<Op>,
    /// Bytecode pc each op starts at
    pub op_pcs: Vec<u32>,
    /// Op index of every bytecode pc that begins an op
    pub pc_to_op: Vec<Option<usize>>,
}

/// Why a block could not be lowered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LowerError {
    /// The block has no instructions
    Empty,
    /// An identifier operand does not resolve to an atom
    UnknownIdentifier(u32),
}

/// Lower `code` to an op list
pub fn lower(vm: &Vm, code: CodeId, block: &CodeBlock) -> Result<Lowered, LowerError> {
    if block.instructions.is_empty() {
        return Err(LowerError::Empty);
    }
    let atom = |index: u32| vm.identifier(code, index).ok_or(LowerError::UnknownIdentifier(index));
    let range = |first: Register, count: u32| (first..first + count).collect::<Vec<_>>();
    let registers = |first: Register, count: u32| {
        (first..first + count)
            .map(Operand::Register)
            .collect::<Vec<_>>()
    };

    let mut jump_targets: HashSet<u32> = block
        .instructions
        .iter()
        .filter_map(|instruction| instruction.opcode.jump_target())
        .collect();
    jump_targets.extend(block.handlers.iter().map(|handler| handler.target));

    let count = block.instructions.len();
    let mut ops = Vec::with_capacity(count);
    let mut op_pcs = Vec::with_capacity(count);
    let mut pc_to_op = vec![None; count];
    // Jump targets are still bytecode pcs here; they are patched afterwards
    let mut pending_targets = Vec::new();

    let mut pc = 0;
    while pc < count {
        let opcode = block.instructions[pc].opcode;
        pc_to_op[pc] = Some(ops.len());
        op_pcs.push(pc as u32);

        if let Some(op) = comparison(&opcode) {
            let next = block.instructions.get(pc + 1).map(|instruction| instruction.opcode);
            let fused = match (next, compare_dst(&opcode)) {
                (Some(Opcode::JumpIfTrue { cond, target }), Some(dst)) if cond == dst => Some((true, target)),
                (Some(Opcode::JumpIfFalse { cond, target }), Some(dst)) if cond == dst => Some((false, target)),
                _ => None,
            };
            if let (Some((when, target)), false) = (fused, jump_targets.contains(&(pc as u32 + 1))) {
                let (dst, lhs, rhs) = operands3(&opcode);
                pending_targets.push((ops.len(), target));
                ops.push(Op::CompareAndBranch {
                    op,
                    dst,
                    lhs,
                    rhs,
                    when,
                    target: 0,
                    branch_pc: pc as u32 + 1,
                });
                pc += 2;
                continue;
            }
        }

        let op = match opcode {
            Opcode::LoadConst { dst, index } => {
                let value = vm.constant(code, index);
                if value.is_cell() {
                    Op::LoadConstant { dst, index }
                } else {
                    Op::LoadValue { dst, value }
                }
            }
            Opcode::LoadUndefined { dst } => Op::LoadValue { dst, value: Value::undefined() },
            Opcode::LoadNull { dst } => Op::LoadValue { dst, value: Value::null() },
            Opcode::LoadBool { dst, value } => Op::LoadValue { dst, value: Value::boolean(value) },
            Opcode::LoadThis { dst } => Op::LoadThis { dst },
            Opcode::Move { dst, src } => Op::Move { dst, src },

            Opcode::Add { dst, lhs, rhs } => Op::Binary { op: BinaryOp::Add, dst, lhs, rhs },
            Opcode::Sub { dst, lhs, rhs } => Op::Binary { op: BinaryOp::Sub, dst, lhs, rhs },
            Opcode::Mul { dst, lhs, rhs } => Op::Binary { op: BinaryOp::Mul, dst, lhs, rhs },
            Opcode::Div { dst, lhs, rhs } => Op::Binary { op: BinaryOp::Div, dst, lhs, rhs },
            Opcode::Mod { dst, lhs, rhs } => Op::Binary { op: BinaryOp::Mod, dst, lhs, rhs },
            Opcode::BitAnd { dst, lhs, rhs } => Op::Binary { op: BinaryOp::BitAnd, dst, lhs, rhs },
            Opcode::BitOr { dst, lhs, rhs } => Op::Binary { op: BinaryOp::BitOr, dst, lhs, rhs },
            Opcode::BitXor { dst, lhs, rhs } => Op::Binary { op: BinaryOp::BitXor, dst, lhs, rhs },
            Opcode::ShiftLeft { dst, lhs, rhs } => Op::Binary { op: BinaryOp::ShiftLeft, dst, lhs, rhs },
            Opcode::ShiftRight { dst, lhs, rhs } => Op::Binary { op: BinaryOp::ShiftRight, dst, lhs, rhs },
            Opcode::UnsignedShiftRight { dst, lhs, rhs } => Op::Binary {
                op: BinaryOp::UnsignedShiftRight,
                dst,
                lhs,
                rhs,
            },
            Opcode::Less { dst, lhs, rhs } => Op::Binary { op: BinaryOp::Less, dst, lhs, rhs },
            Opcode::LessEq { dst, lhs, rhs } => Op::Binary { op: BinaryOp::LessEq, dst, lhs, rhs },
            Opcode::Greater { dst, lhs, rhs } => Op::Binary { op: BinaryOp::Greater, dst, lhs, rhs },
            Opcode::GreaterEq { dst, lhs, rhs } => Op::Binary { op: BinaryOp::GreaterEq, dst, lhs, rhs },
            Opcode::Equal { dst, lhs, rhs } => Op::Binary { op: BinaryOp::Equal, dst, lhs, rhs },
            Opcode::NotEqual { dst, lhs, rhs } => Op::Binary { op: BinaryOp::NotEqual, dst, lhs, rhs },
            Opcode::StrictEqual { dst, lhs, rhs } => Op::Binary { op: BinaryOp::StrictEqual, dst, lhs, rhs },
            Opcode::StrictNotEqual { dst, lhs, rhs } => Op::Binary {
                op: BinaryOp::StrictNotEqual,
                dst,
                lhs,
                rhs,
            },
            Opcode::Negate { dst, src } => Op::Unary { op: UnaryOp::Negate, dst, src },
            Opcode::Increment { dst, src } => Op::Unary { op: UnaryOp::Increment, dst, src },
            Opcode::Decrement { dst, src } => Op::Unary { op: UnaryOp::Decrement, dst, src },
            Opcode::Not { dst, src } => Op::Unary { op: UnaryOp::Not, dst, src },
            Opcode::TypeOf { dst, src } => Op::Unary { op: UnaryOp::TypeOf, dst, src },
            Opcode::ToNumber { dst, src } => Op::Unary { op: UnaryOp::ToNumber, dst, src },

            Opcode::Jump { target } => {
                pending_targets.push((ops.len(), target));
                Op::Jump { target: 0 }
            }
            Opcode::JumpIfTrue { cond, target } => {
                pending_targets.push((ops.len(), target));
                Op::Branch { cond, when: true, target: 0 }
            }
            Opcode::JumpIfFalse { cond, target } => {
                pending_targets.push((ops.len(), target));
                Op::Branch { cond, when: false, target: 0 }
            }
            Opcode::Loop { target } => {
                pending_targets.push((ops.len(), target));
                Op::Loop { target: 0 }
            }

            Opcode::NewObject { dst } => stub(StubId::NewObject, Some(dst), Vec::new()),
            Opcode::NewArray { dst, first, count } => stub(StubId::NewArray, Some(dst), registers(first, count)),
            Opcode::GetById { dst, base, name, cache } => stub(
                StubId::GetById,
                Some(dst),
                vec![Operand::Register(base), Operand::Atom(atom(name)?), Operand::Index(cache)],
            ),
            Opcode::PutById { base, name, value, cache } => stub(
                StubId::PutById,
                None,
                vec![
                    Operand::Register(base),
                    Operand::Atom(atom(name)?),
                    Operand::Register(value),
                    Operand::Index(cache),
                ],
            ),
            Opcode::GetByVal { dst, base, key } => stub(
                StubId::GetByVal,
                Some(dst),
                vec![Operand::Register(base), Operand::Register(key)],
            ),
            Opcode::PutByVal { base, key, value } => stub(
                StubId::PutByVal,
                None,
                vec![Operand::Register(base), Operand::Register(key), Operand::Register(value)],
            ),
            Opcode::DeleteById { dst, base, name } => stub(
                StubId::DeleteById,
                Some(dst),
                vec![Operand::Register(base), Operand::Atom(atom(name)?)],
            ),
            Opcode::In { dst, key, base } => stub(
                StubId::In,
                Some(dst),
                vec![Operand::Register(key), Operand::Register(base)],
            ),
            Opcode::InstanceOf { dst, value, constructor } => stub(
                StubId::InstanceOf,
                Some(dst),
                vec![Operand::Register(value), Operand::Register(constructor)],
            ),
            Opcode::GetGlobal { dst, name, cache } => stub(
                StubId::GetGlobal,
                Some(dst),
                vec![Operand::Atom(atom(name)?), Operand::Index(cache)],
            ),
            Opcode::PutGlobal { name, value, cache } => stub(
                StubId::PutGlobal,
                None,
                vec![Operand::Atom(atom(name)?), Operand::Register(value), Operand::Index(cache)],
            ),

            Opcode::PushScope { layout } => stub(StubId::PushScope, None, vec![Operand::Index(layout)]),
            Opcode::PopScope => stub(StubId::PopScope, None, Vec::new()),
            Opcode::GetScopedVar { dst, depth, index } => stub(
                StubId::GetScopedVar,
                Some(dst),
                vec![Operand::Index(depth), Operand::Index(index)],
            ),
            Opcode::PutScopedVar { depth, index, value } => stub(
                StubId::PutScopedVar,
                None,
                vec![Operand::Index(depth), Operand::Index(index), Operand::Register(value)],
            ),
            Opcode::ResolveName { dst, name } => stub(StubId::Resolve, Some(dst), vec![Operand::Atom(atom(name)?)]),
            Opcode::ArgumentsObject { dst } => stub(StubId::ArgumentsObject, Some(dst), Vec::new()),

            Opcode::NewFunction { dst, function } => stub(StubId::NewFunc, Some(dst), vec![Operand::Index(function)]),
            Opcode::Call {
                dst,
                callee,
                this,
                first_arg,
                argc,
                cache,
            } => {
                let mut args = vec![Operand::Register(callee), Operand::Register(this), Operand::Index(cache)];
                args.extend(registers(first_arg, argc));
                stub(StubId::Call, Some(dst), args)
            }
            Opcode::CallMethod {
                dst,
                base,
                name,
                first_arg,
                argc,
                property_cache,
                cache,
            } => Op::CallMethod {
                dst,
                base,
                name: atom(name)?,
                property_site: property_cache,
                call_site: cache,
                args: range(first_arg, argc),
            },
            Opcode::Construct {
                dst,
                callee,
                first_arg,
                argc,
                cache,
            } => {
                let mut args = vec![Operand::Register(callee), Operand::Index(cache)];
                args.extend(registers(first_arg, argc));
                stub(StubId::Construct, Some(dst), args)
            }
            Opcode::Return { src } => Op::Return { src },

            Opcode::Throw { src } => stub(StubId::Throw, None, vec![Operand::Register(src)]),
            Opcode::Catch { dst } => Op::Catch { dst },
            Opcode::Debug { line } => stub(StubId::DebugStatement, None, vec![Operand::Index(line)]),
        };
        ops.push(op);
        pc += 1;
    }

    for (index, target) in pending_targets {
        let resolved = pc_to_op.get(target as usize).copied().flatten().unwrap_or(ops.len());
        match &mut ops[index] {
            Op::Jump { target }
            | Op::Branch { target, .. }
            | Op::Loop { target }
            | Op::CompareAndBranch { target, .. } => *target = resolved,
            _ => {}
        }
    }

    Ok(Lowered { ops, op_pcs, pc_to_op })
}

fn stub(id: StubId, dst: Option<Register>, args: Vec<Operand>) -> Op {
    Op::Stub { id, dst, args }
}

/// The operator of a comparison that can be fused with a branch
fn comparison(opcode: &Opcode) -> Option<BinaryOp> {
    let op = match opcode {
        Opcode::Less { .. } => BinaryOp::Less,
        Opcode::LessEq { .. } => BinaryOp::LessEq,
        Opcode::Greater { .. } => BinaryOp::Greater,
        Opcode::GreaterEq { .. } => BinaryOp::GreaterEq,
        Opcode::Equal { .. } => BinaryOp::Equal,
        Opcode::NotEqual { .. } => BinaryOp::NotEqual,
        Opcode::StrictEqual { .. } => BinaryOp::StrictEqual,
        Opcode::StrictNotEqual { .. } => BinaryOp::StrictNotEqual,
        _ => return None,
    };
    Some(op)
}

fn compare_dst(opcode: &Opcode) -> Option<Register> {
    comparison(opcode).map(|_| operands3(opcode).0)
}

fn operands3(opcode: &Opcode) -> (Register, Register, Register) {
    match *opcode {
        Opcode::Less { dst, lhs, rhs }
        | Opcode::LessEq { dst, lhs, rhs }
        | Opcode::Greater { dst, lhs, rhs }
        | Opcode::GreaterEq { dst, lhs, rhs }
        | Opcode::Equal { dst, lhs, rhs }
        | Opcode::NotEqual { dst, lhs, rhs }
        | Opcode::StrictEqual { dst, lhs, rhs }
        | Opcode::StrictNotEqual { dst, lhs, rhs } => (dst, lhs, rhs),
        _ => (0, 0, 0),
    }
}
