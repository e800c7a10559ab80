//! Executable form of a lowered code block
//!
//! [`CompiledFunction`] runs its op list on the frame the interpreter pushed.
//! Everything that can allocate, call or throw goes through the runtime stub
//! table. A stub that returns the exception sentinel is resolved with
//! [`Vm::take_stub_unwind`]; a throw is offered to the frame's own handlers
//! before it leaves the function.

use crate::codegen::{Lowered, Op, Operand};
use bytecode_system::Register;
use core_types::Value;
use interpreter::{BinaryOp, CompiledCode, StubArg, StubId, UnaryOp, Unwind, Vm};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Where control goes after an op
enum Step {
    Next,
    Jump(usize),
    Return(Value),
}

/// One compiled function
#[derive(Debug)]
pub struct CompiledFunction {
    name: String,
    lowered: Lowered,
    stub_calls: Arc<AtomicU64>,
}

impl CompiledFunction {
    /// Wrap lowered ops; stub calls are counted into `stub_calls`
    pub fn new(name: impl Into<String>, lowered: Lowered, stub_calls: Arc<AtomicU64>) -> Self {
        Self {
            name: name.into(),
            lowered,
            stub_calls,
        }
    }

    /// Function name, empty for programs and anonymous functions
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The op list
    pub fn ops(&self) -> &[Op] {
        &self.lowered.ops
    }

    fn stub<I>(&self, vm: &mut Vm, pc: u32, id: StubId, args: I) -> Result<Value, Unwind>
    where
        I: IntoIterator<Item = StubArg>,
    {
        vm.set_pc(pc + 1);
        self.stub_calls.fetch_add(1, Ordering::Relaxed);
        let result = vm.call_stub_varargs(id, args);
        if result.is_exception() {
            return Err(vm.take_stub_unwind());
        }
        Ok(result.value)
    }

    fn binary(&self, vm: &mut Vm, pc: u32, op: BinaryOp, lhs: Register, rhs: Register) -> Result<Value, Unwind> {
        let (lhs, rhs) = (vm.register(lhs), vm.register(rhs));
        if let (Some(a), Some(b)) = (lhs.as_number(), rhs.as_number()) {
            if let Some(result) = number_fast_path(op, a, b) {
                return Ok(result);
            }
        }
        let args = [StubArg::from_value(lhs), StubArg::from_value(rhs)];
        self.stub(vm, pc, StubId::for_binary(op), args)
    }

    fn step(&self, vm: &mut Vm, op: &Op, pc: u32) -> Result<Step, Unwind> {
        match op {
            Op::LoadValue { dst, value } => vm.set_register(*dst, *value),
            Op::LoadConstant { dst, index } => {
                let code = vm.current_code();
                let value = code.map(|code| vm.constant(code, *index)).unwrap_or_default();
                vm.set_register(*dst, value);
            }
            Op::LoadThis { dst } => {
                let this = vm.this_value();
                vm.set_register(*dst, this);
            }
            Op::Move { dst, src } => {
                let value = vm.register(*src);
                vm.set_register(*dst, value);
            }
            Op::Binary { op, dst, lhs, rhs } => {
                let value = self.binary(vm, pc, *op, *lhs, *rhs)?;
                vm.set_register(*dst, value);
            }
            Op::Unary { op, dst, src } => {
                let operand = vm.register(*src);
                let value = match (op, operand.as_number()) {
                    (UnaryOp::Negate, Some(n)) => Value::number(-n),
                    (UnaryOp::Increment, Some(n)) => Value::number(n + 1.0),
                    (UnaryOp::Decrement, Some(n)) => Value::number(n - 1.0),
                    (UnaryOp::ToNumber, Some(_)) => operand,
                    _ => self.stub(vm, pc, StubId::for_unary(*op), [StubArg::from_value(operand)])?,
                };
                vm.set_register(*dst, value);
            }
            Op::CompareAndBranch {
                op,
                dst,
                lhs,
                rhs,
                when,
                target,
                ..
            } => {
                let value = self.binary(vm, pc, *op, *lhs, *rhs)?;
                vm.set_register(*dst, value);
                if value.is_truthy() == *when {
                    return Ok(Step::Jump(*target));
                }
            }
            Op::Jump { target } => return Ok(Step::Jump(*target)),
            Op::Branch { cond, when, target } => {
                if vm.to_boolean(vm.register(*cond)) == *when {
                    return Ok(Step::Jump(*target));
                }
            }
            Op::Loop { target } => {
                self.stub(vm, pc, StubId::TimeoutCheck, std::iter::empty())?;
                return Ok(Step::Jump(*target));
            }
            Op::Stub { id, dst, args } => {
                let words: Vec<StubArg> = args.iter().map(|arg| arg.word(&*vm)).collect();
                let value = self.stub(vm, pc, *id, words)?;
                if let Some(dst) = dst {
                    vm.set_register(*dst, value);
                }
            }
            Op::CallMethod {
                dst,
                base,
                name,
                property_site,
                call_site,
                args,
            } => {
                let receiver = vm.register(*base);
                let method = self.stub(
                    vm,
                    pc,
                    StubId::GetById,
                    [
                        StubArg::from_value(receiver),
                        StubArg::from_atom(*name),
                        StubArg::from_index(*property_site),
                    ],
                )?;
                let mut words = vec![
                    StubArg::from_value(method),
                    StubArg::from_value(receiver),
                    StubArg::from_index(*call_site),
                ];
                words.extend(args.iter().map(|arg| Operand::Register(*arg).word(&*vm)));
                let value = self.stub(vm, pc, StubId::Call, words)?;
                vm.set_register(*dst, value);
            }
            Op::Catch { dst } => {
                let exception = vm.take_exception();
                vm.set_register(*dst, exception);
            }
            Op::Return { src } => return Ok(Step::Return(vm.register(*src))),
        }
        Ok(Step::Next)
    }
}

impl CompiledCode for CompiledFunction {
    fn execute(&self, vm: &mut Vm) -> Result<Value, Unwind> {
        let mark = vm.temporaries_mark();
        let mut index = 0;
        while let Some(op) = self.lowered.ops.get(index) {
            vm.truncate_temporaries(mark);
            let pc = self.lowered.op_pcs[index];
            index = match self.step(vm, op, pc) {
                Ok(Step::Next) => index + 1,
                Ok(Step::Jump(target)) => target,
                Ok(Step::Return(value)) => return Ok(value),
                Err(Unwind::Throw(exception)) => {
                    let target = vm.enter_handler(exception).ok_or(Unwind::Throw(exception))?;
                    self.lowered
                        .pc_to_op
                        .get(target as usize)
                        .copied()
                        .flatten()
                        .unwrap_or(self.lowered.ops.len())
                }
                Err(fatal) => return Err(fatal),
            };
        }
        Ok(Value::undefined())
    }
}

/// Number-only results that need no runtime help
fn number_fast_path(op: BinaryOp, a: f64, b: f64) -> Option<Value> {
    let value = match op {
        BinaryOp::Add => Value::number(a + b),
        BinaryOp::Sub => Value::number(a - b),
        BinaryOp::Mul => Value::number(a * b),
        BinaryOp::Less => Value::boolean(a < b),
        BinaryOp::LessEq => Value::boolean(a <= b),
        BinaryOp::Greater => Value::boolean(a > b),
        BinaryOp::GreaterEq => Value::boolean(a >= b),
        BinaryOp::Equal | BinaryOp::StrictEqual => Value::boolean(a == b),
        BinaryOp::NotEqual | BinaryOp::StrictNotEqual => Value::boolean(a != b),
        _ => return None,
    };
    Some(value)
}
