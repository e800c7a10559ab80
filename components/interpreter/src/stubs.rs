//! Runtime stubs: the calling convention between compiled code and the runtime
//!
//! Compiled code never touches heap objects directly. Every operation that is
//! not a trivial register move goes through a stub:
//!
//! - arguments are boxed into [`StubArg`] words and laid out in a fixed
//!   [`StubFrame`] (six inline slots, the rest spilled)
//! - the stub runs with the [`Vm`] as its only parameter
//! - results come back on two channels in a [`StubReturn`]; the secondary
//!   channel carries auxiliary results or [`EXCEPTION_SENTINEL`]
//! - on the sentinel the exception (or fatal error) was parked in the stub
//!   frame and is retrieved with [`Vm::take_stub_unwind`]
//!
//! Stubs are looked up by [`StubId`], so the table can be indexed from
//! generated code.

use crate::property::PropertySite;
use crate::runtime::{BinaryOp, UnaryOp};
use crate::vm::{Unwind, Vm};
use core_types::{ErrorKind, Value, VmError};
use memory_manager::{Atom, CodeId};
use std::fmt;

/// Inline argument slots of a stub frame
pub const STUB_ARG_COUNT: usize = 6;

/// Secondary return word signalling that the stub raised
pub const EXCEPTION_SENTINEL: u64 = u64::MAX;

/// Site operand meaning "no inline cache"
pub const NO_SITE: u32 = u32::MAX;

/// One machine word passed to a stub
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct StubArg(u64);

impl StubArg {
    /// Box a value
    pub fn from_value(value: Value) -> Self {
        StubArg(value.to_bits())
    }

    /// Box a small integer as a number value
    pub fn from_int32(n: i32) -> Self {
        Self::from_value(Value::number(n as f64))
    }

    /// Box an interned identifier
    pub fn from_atom(atom: Atom) -> Self {
        Self::from_index(atom.index())
    }

    /// Box an index operand
    pub fn from_index(index: u32) -> Self {
        Self::from_int32(index as i32)
    }

    /// Raw word
    pub fn bits(self) -> u64 {
        self.0
    }

    /// Unbox as a value
    pub fn value(self) -> Value {
        Value::from_bits(self.0)
    }

    /// Unbox as an integer, 0 when not numeric
    pub fn int32(self) -> i32 {
        self.value().as_i32().unwrap_or(0)
    }

    /// Unbox as an index operand
    pub fn index(self) -> u32 {
        self.int32() as u32
    }

    /// Unbox as an identifier
    pub fn atom(self) -> Atom {
        Atom::from_index(self.index())
    }
}

impl Default for StubArg {
    fn default() -> Self {
        Self::from_value(Value::undefined())
    }
}

impl fmt::Debug for StubArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StubArg({:#018x})", self.0)
    }
}

/// Fixed frame every stub call runs on
#[derive(Debug, Clone, Default)]
#[repr(C)]
pub struct StubFrame {
    /// Inline argument words
    pub args: [StubArg; STUB_ARG_COUNT],
    /// Arguments past the inline slots
    pub spill: Vec<StubArg>,
    /// Total argument words
    pub argc: u32,
    /// Index of the script frame that made the call
    pub call_frame: Option<u32>,
    /// The global object
    pub globals: Value,
    /// Exception raised by the stub, empty when none
    pub exception: Value,
    /// Uncatchable failure raised by the stub
    pub fatal: Option<VmError>,
    /// Return address of the calling frame
    pub return_address: u32,
    /// Code of the calling frame
    pub code: Option<CodeId>,
}

impl StubFrame {
    /// Argument word `index`
    pub fn arg(&self, index: usize) -> StubArg {
        if index < STUB_ARG_COUNT {
            self.args[index]
        } else {
            self.spill.get(index - STUB_ARG_COUNT).copied().unwrap_or_default()
        }
    }

    /// Words the collector must treat as possible references
    pub fn words(&self) -> impl Iterator<Item = u64> + '_ {
        let inline = (self.argc as usize).min(STUB_ARG_COUNT);
        self.args[..inline]
            .iter()
            .chain(self.spill.iter())
            .map(|arg| arg.bits())
            .chain([self.globals.to_bits(), self.exception.to_bits()])
    }
}

/// Two-channel stub result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StubReturn {
    /// Primary result
    pub value: Value,
    /// Auxiliary word or [`EXCEPTION_SENTINEL`]
    pub secondary: u64,
}

impl StubReturn {
    /// A plain result
    pub fn value(value: Value) -> Self {
        Self { value, secondary: 0 }
    }

    /// A result with an auxiliary word
    pub fn with_secondary(value: Value, secondary: u64) -> Self {
        Self { value, secondary }
    }

    /// The exception signal
    pub fn exception() -> Self {
        Self {
            value: Value::empty(),
            secondary: EXCEPTION_SENTINEL,
        }
    }

    /// Whether the stub raised
    pub fn is_exception(&self) -> bool {
        self.secondary == EXCEPTION_SENTINEL
    }
}

/// Signature of every stub
pub type StubFunction = fn(&mut Vm) -> StubReturn;

/// Stub table index
///
/// Argument layouts are listed per stub; "site" is a cache site index of the
/// calling code block or [`NO_SITE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum StubId {
    /// (lhs, rhs)
    Add,
    /// (lhs, rhs)
    Sub,
    /// (lhs, rhs)
    Mul,
    /// (lhs, rhs)
    Div,
    /// (lhs, rhs)
    Mod,
    /// (lhs, rhs)
    BitAnd,
    /// (lhs, rhs)
    BitOr,
    /// (lhs, rhs)
    BitXor,
    /// (lhs, rhs)
    ShiftLeft,
    /// (lhs, rhs)
    ShiftRight,
    /// (lhs, rhs)
    UnsignedShiftRight,
    /// (lhs, rhs)
    Less,
    /// (lhs, rhs)
    LessEq,
    /// (lhs, rhs)
    Greater,
    /// (lhs, rhs)
    GreaterEq,
    /// (lhs, rhs)
    Equal,
    /// (lhs, rhs)
    NotEqual,
    /// (lhs, rhs)
    StrictEqual,
    /// (lhs, rhs)
    StrictNotEqual,
    /// (operand)
    Negate,
    /// (operand)
    Increment,
    /// (operand)
    Decrement,
    /// (operand)
    Not,
    /// (operand)
    TypeOf,
    /// (operand)
    ToNumber,
    /// (base, name, site)
    GetById,
    /// (base, name, value, site)
    PutById,
    /// (base, key)
    GetByVal,
    /// (base, key, value)
    PutByVal,
    /// (base, name)
    DeleteById,
    /// (key, base)
    In,
    /// (value, constructor)
    InstanceOf,
    /// (name, site)
    GetGlobal,
    /// (name, value, site)
    PutGlobal,
    /// ()
    NewObject,
    /// (elements...)
    NewArray,
    /// (template)
    NewFunc,
    /// (callee, this, site, args...)
    Call,
    /// (callee, site, args...)
    Construct,
    /// (callee, argc); secondary is the number of missing arguments
    CallArityCheck,
    /// ()
    TearOffActivation,
    /// (layout)
    PushScope,
    /// ()
    PopScope,
    /// (depth, index)
    GetScopedVar,
    /// (depth, index, value)
    PutScopedVar,
    /// (name)
    Resolve,
    /// ()
    ArgumentsObject,
    /// (value); always raises
    Throw,
    /// ()
    TimeoutCheck,
    /// (register count)
    RegisterFileCheck,
    /// (line)
    DebugStatement,
}

impl StubId {
    /// The stub for a binary operator
    pub fn for_binary(op: BinaryOp) -> StubId {
        match op {
            BinaryOp::Add => StubId::Add,
            BinaryOp::Sub => StubId::Sub,
            BinaryOp::Mul => StubId::Mul,
            BinaryOp::Div => StubId::Div,
            BinaryOp::Mod => StubId::Mod,
            BinaryOp::BitAnd => StubId::BitAnd,
            BinaryOp::BitOr => StubId::BitOr,
            BinaryOp::BitXor => StubId::BitXor,
            BinaryOp::ShiftLeft => StubId::ShiftLeft,
            BinaryOp::ShiftRight => StubId::ShiftRight,
            BinaryOp::UnsignedShiftRight => StubId::UnsignedShiftRight,
            BinaryOp::Less => StubId::Less,
            BinaryOp::LessEq => StubId::LessEq,
            BinaryOp::Greater => StubId::Greater,
            BinaryOp::GreaterEq => StubId::GreaterEq,
            BinaryOp::Equal => StubId::Equal,
            BinaryOp::NotEqual => StubId::NotEqual,
            BinaryOp::StrictEqual => StubId::StrictEqual,
            BinaryOp::StrictNotEqual => StubId::StrictNotEqual,
        }
    }

    /// The stub for a unary operator
    pub fn for_unary(op: UnaryOp) -> StubId {
        match op {
            UnaryOp::Negate => StubId::Negate,
            UnaryOp::Increment => StubId::Increment,
            UnaryOp::Decrement => StubId::Decrement,
            UnaryOp::Not => StubId::Not,
            UnaryOp::TypeOf => StubId::TypeOf,
            UnaryOp::ToNumber => StubId::ToNumber,
        }
    }

    /// Entry point of this stub
    pub fn function(self) -> StubFunction {
        match self {
            StubId::Add => |vm| binary(vm, BinaryOp::Add),
            StubId::Sub => |vm| binary(vm, BinaryOp::Sub),
            StubId::Mul => |vm| binary(vm, BinaryOp::Mul),
            StubId::Div => |vm| binary(vm, BinaryOp::Div),
            StubId::Mod => |vm| binary(vm, BinaryOp::Mod),
            StubId::BitAnd => |vm| binary(vm, BinaryOp::BitAnd),
            StubId::BitOr => |vm| binary(vm, BinaryOp::BitOr),
            StubId::BitXor => |vm| binary(vm, BinaryOp::BitXor),
            StubId::ShiftLeft => |vm| binary(vm, BinaryOp::ShiftLeft),
            StubId::ShiftRight => |vm| binary(vm, BinaryOp::ShiftRight),
            StubId::UnsignedShiftRight => |vm| binary(vm, BinaryOp::UnsignedShiftRight),
            StubId::Less => |vm| binary(vm, BinaryOp::Less),
            StubId::LessEq => |vm| binary(vm, BinaryOp::LessEq),
            StubId::Greater => |vm| binary(vm, BinaryOp::Greater),
            StubId::GreaterEq => |vm| binary(vm, BinaryOp::GreaterEq),
            StubId::Equal => |vm| binary(vm, BinaryOp::Equal),
            StubId::NotEqual => |vm| binary(vm, BinaryOp::NotEqual),
            StubId::StrictEqual => |vm| binary(vm, BinaryOp::StrictEqual),
            StubId::StrictNotEqual => |vm| binary(vm, BinaryOp::StrictNotEqual),
            StubId::Negate => |vm| unary(vm, UnaryOp::Negate),
            StubId::Increment => |vm| unary(vm, UnaryOp::Increment),
            StubId::Decrement => |vm| unary(vm, UnaryOp::Decrement),
            StubId::Not => |vm| unary(vm, UnaryOp::Not),
            StubId::TypeOf => |vm| unary(vm, UnaryOp::TypeOf),
            StubId::ToNumber => |vm| unary(vm, UnaryOp::ToNumber),
            StubId::GetById => stub_get_by_id,
            StubId::PutById => stub_put_by_id,
            StubId::GetByVal => stub_get_by_val,
            StubId::PutByVal => stub_put_by_val,
            StubId::DeleteById => stub_delete_by_id,
            StubId::In => stub_in,
            StubId::InstanceOf => stub_instance_of,
            StubId::GetGlobal => stub_get_global,
            StubId::PutGlobal => stub_put_global,
            StubId::NewObject => stub_new_object,
            StubId::NewArray => stub_new_array,
            StubId::NewFunc => stub_new_func,
            StubId::Call => stub_call,
            StubId::Construct => stub_construct,
            StubId::CallArityCheck => stub_call_arity_check,
            StubId::TearOffActivation => stub_tear_off_activation,
            StubId::PushScope => stub_push_scope,
            StubId::PopScope => stub_pop_scope,
            StubId::GetScopedVar => stub_get_scoped_var,
            StubId::PutScopedVar => stub_put_scoped_var,
            StubId::Resolve => stub_resolve,
            StubId::ArgumentsObject => stub_arguments_object,
            StubId::Throw => stub_throw,
            StubId::TimeoutCheck => stub_timeout_check,
            StubId::RegisterFileCheck => stub_register_file_check,
            StubId::DebugStatement => stub_debug_statement,
        }
    }
}

impl Vm {
    /// Call a stub with any number of argument words
    pub fn call_stub_varargs<I>(&mut self, id: StubId, args: I) -> StubReturn
    where
        I: IntoIterator<Item = StubArg>,
    {
        let frame = self.make_stub_frame(args);
        self.stub_frames.push(frame);
        let result = id.function()(self);
        let frame = self.stub_frames.pop();
        if result.is_exception() {
            self.stub_unwind = frame.map(|mut frame| match frame.fatal.take() {
                Some(error) => Unwind::Fatal(error),
                None => Unwind::Throw(frame.exception),
            });
        }
        result
    }

    /// What the last stub that returned [`EXCEPTION_SENTINEL`] raised
    pub fn take_stub_unwind(&mut self) -> Unwind {
        self.stub_unwind.take().unwrap_or_else(|| {
            Unwind::Fatal(VmError::InvalidBytecode(
                "exception sentinel without a pending exception".to_string(),
            ))
        })
    }

    pub(crate) fn make_stub_frame<I>(&self, args: I) -> StubFrame
    where
        I: IntoIterator<Item = StubArg>,
    {
        let mut frame = StubFrame {
            globals: self.global_object(),
            exception: Value::empty(),
            ..StubFrame::default()
        };
        for (index, arg) in args.into_iter().enumerate() {
            if index < STUB_ARG_COUNT {
                frame.args[index] = arg;
            } else {
                frame.spill.push(arg);
            }
            frame.argc += 1;
        }
        if let Some(top) = self.frames.last() {
            frame.call_frame = Some((self.frames.len() - 1) as u32);
            frame.return_address = top.pc;
            frame.code = Some(top.code);
        }
        frame
    }

    fn stub_arg(&self, index: usize) -> StubArg {
        self.stub_frames
            .last()
            .map(|frame| frame.arg(index))
            .unwrap_or_default()
    }

    fn stub_args_from(&self, start: usize) -> Vec<Value> {
        let Some(frame) = self.stub_frames.last() else {
            return Vec::new();
        };
        (start..frame.argc as usize).map(|index| frame.arg(index).value()).collect()
    }

    fn stub_site(&self, index: usize) -> PropertySite {
        let site = self.stub_arg(index).index();
        let code = self.stub_frames.last()?.code?;
        (site != NO_SITE).then_some((code, site))
    }

    /// Park `unwind` in the current stub frame and signal the caller
    fn stub_fail(&mut self, unwind: Unwind) -> StubReturn {
        if let Some(frame) = self.stub_frames.last_mut() {
            match unwind {
                Unwind::Throw(value) => frame.exception = value,
                Unwind::Fatal(error) => frame.fatal = Some(error),
            }
        }
        StubReturn::exception()
    }

    fn stub_finish(&mut self, result: Result<Value, Unwind>) -> StubReturn {
        match result {
            Ok(value) => StubReturn::value(value),
            Err(unwind) => self.stub_fail(unwind),
        }
    }
}

fn binary(vm: &mut Vm, op: BinaryOp) -> StubReturn {
    let (lhs, rhs) = (vm.stub_arg(0).value(), vm.stub_arg(1).value());
    let result = vm.binary_op(op, lhs, rhs);
    vm.stub_finish(result)
}

fn unary(vm: &mut Vm, op: UnaryOp) -> StubReturn {
    let operand = vm.stub_arg(0).value();
    let result = vm.unary_op(op, operand);
    vm.stub_finish(result)
}

fn stub_get_by_id(vm: &mut Vm) -> StubReturn {
    let (base, name, site) = (vm.stub_arg(0).value(), vm.stub_arg(1).atom(), vm.stub_site(2));
    let result = vm.get_by_id(base, name, site);
    vm.stub_finish(result)
}

fn stub_put_by_id(vm: &mut Vm) -> StubReturn {
    let (base, name, value, site) = (
        vm.stub_arg(0).value(),
        vm.stub_arg(1).atom(),
        vm.stub_arg(2).value(),
        vm.stub_site(3),
    );
    let result = vm.put_by_id(base, name, value, site).map(|()| value);
    vm.stub_finish(result)
}

fn stub_get_by_val(vm: &mut Vm) -> StubReturn {
    let (base, key) = (vm.stub_arg(0).value(), vm.stub_arg(1).value());
    let result = vm.get_by_val(base, key);
    vm.stub_finish(result)
}

fn stub_put_by_val(vm: &mut Vm) -> StubReturn {
    let (base, key, value) = (vm.stub_arg(0).value(), vm.stub_arg(1).value(), vm.stub_arg(2).value());
    let result = vm.put_by_val(base, key, value).map(|()| value);
    vm.stub_finish(result)
}

fn stub_delete_by_id(vm: &mut Vm) -> StubReturn {
    let (base, name) = (vm.stub_arg(0).value(), vm.stub_arg(1).atom());
    let result = vm.delete_by_id(base, name).map(Value::boolean);
    vm.stub_finish(result)
}

fn stub_in(vm: &mut Vm) -> StubReturn {
    let (key, base) = (vm.stub_arg(0).value(), vm.stub_arg(1).value());
    let result = vm.has_in(key, base).map(Value::boolean);
    vm.stub_finish(result)
}

fn stub_instance_of(vm: &mut Vm) -> StubReturn {
    let (value, constructor) = (vm.stub_arg(0).value(), vm.stub_arg(1).value());
    let result = vm.instance_of(value, constructor).map(Value::boolean);
    vm.stub_finish(result)
}

fn stub_get_global(vm: &mut Vm) -> StubReturn {
    let (name, site) = (vm.stub_arg(0).atom(), vm.stub_site(1));
    let result = vm.get_global_by_id(name, site);
    vm.stub_finish(result)
}

fn stub_put_global(vm: &mut Vm) -> StubReturn {
    let (name, value, site) = (vm.stub_arg(0).atom(), vm.stub_arg(1).value(), vm.stub_site(2));
    let result = vm.put_global_by_id(name, value, site).map(|()| value);
    vm.stub_finish(result)
}

fn stub_new_object(vm: &mut Vm) -> StubReturn {
    let result = vm.new_object_value();
    vm.stub_finish(result)
}

fn stub_new_array(vm: &mut Vm) -> StubReturn {
    let elements = vm.stub_args_from(0);
    let result = vm.new_array_value(elements);
    vm.stub_finish(result)
}

fn stub_new_func(vm: &mut Vm) -> StubReturn {
    let template = vm.stub_arg(0).index();
    let result = vm.new_closure(template);
    vm.stub_finish(result)
}

fn stub_call(vm: &mut Vm) -> StubReturn {
    let (callee, this, site) = (vm.stub_arg(0).value(), vm.stub_arg(1).value(), vm.stub_site(2));
    let args = vm.stub_args_from(3);
    let result = vm.call_value(callee, this, &args, false, site);
    vm.stub_finish(result)
}

fn stub_construct(vm: &mut Vm) -> StubReturn {
    let (callee, site) = (vm.stub_arg(0).value(), vm.stub_site(1));
    let args = vm.stub_args_from(2);
    let result = vm.call_value(callee, Value::undefined(), &args, true, site);
    vm.stub_finish(result)
}

fn stub_call_arity_check(vm: &mut Vm) -> StubReturn {
    let (callee, argc) = (vm.stub_arg(0).value(), vm.stub_arg(1).index());
    let arity = vm
        .heap
        .cell_of(callee)
        .and_then(|cell| cell.as_function())
        .map(|function| function.arity);
    match arity {
        Some(arity) => StubReturn::with_secondary(callee, u64::from(arity.saturating_sub(argc))),
        None => {
            let message = format!("{} is not a function", vm.to_display_string(callee));
            let unwind = vm.throw_error(ErrorKind::TypeError, &message);
            vm.stub_fail(unwind)
        }
    }
}

fn stub_tear_off_activation(vm: &mut Vm) -> StubReturn {
    let result = vm.tear_off_activation().map(Value::from_cell);
    vm.stub_finish(result)
}

fn stub_push_scope(vm: &mut Vm) -> StubReturn {
    let layout = vm.stub_arg(0).index();
    let result = vm.push_scope(layout).map(|()| Value::undefined());
    vm.stub_finish(result)
}

fn stub_pop_scope(vm: &mut Vm) -> StubReturn {
    vm.pop_scope();
    StubReturn::value(Value::undefined())
}

fn stub_get_scoped_var(vm: &mut Vm) -> StubReturn {
    let (depth, index) = (vm.stub_arg(0).index(), vm.stub_arg(1).index());
    StubReturn::value(vm.get_scoped_var(depth, index))
}

fn stub_put_scoped_var(vm: &mut Vm) -> StubReturn {
    let (depth, index, value) = (vm.stub_arg(0).index(), vm.stub_arg(1).index(), vm.stub_arg(2).value());
    vm.put_scoped_var(depth, index, value);
    StubReturn::value(value)
}

fn stub_resolve(vm: &mut Vm) -> StubReturn {
    let name = vm.stub_arg(0).atom();
    let result = vm.resolve_name(name);
    vm.stub_finish(result)
}

fn stub_arguments_object(vm: &mut Vm) -> StubReturn {
    let result = vm.arguments_object();
    vm.stub_finish(result)
}

fn stub_throw(vm: &mut Vm) -> StubReturn {
    let value = vm.stub_arg(0).value();
    let unwind = vm.raise(value);
    vm.stub_fail(unwind)
}

fn stub_timeout_check(vm: &mut Vm) -> StubReturn {
    let result = vm.check_interrupt().map(|()| Value::undefined());
    vm.stub_finish(result)
}

fn stub_register_file_check(vm: &mut Vm) -> StubReturn {
    let count = vm.stub_arg(0).index() as usize;
    let base = vm.frames.last().map(|frame| frame.base).unwrap_or(0);
    if base + count <= vm.registers.capacity() {
        return StubReturn::value(Value::undefined());
    }
    let unwind = vm.throw_error(ErrorKind::RangeError, "Maximum call stack size exceeded");
    vm.stub_fail(unwind)
}

fn stub_debug_statement(vm: &mut Vm) -> StubReturn {
    let line = vm.stub_arg(0).index();
    vm.notify_statement(line);
    StubReturn::value(Value::undefined())
}
