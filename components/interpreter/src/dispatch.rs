//! Bytecode dispatch loop and the frame protocol
//!
//! Script-to-script calls made by the interpreter push a frame and keep going
//! in the same loop; only host-initiated calls, host functions and compiled
//! code add Rust stack. A frame pushed by such a call is an entry boundary:
//! returning from it or unwinding past it leaves [`Vm::execute`].
//!
//! The program counter is advanced before an instruction runs, so while an
//! instruction executes (and while a callee runs) `pc - 1` names it. Handler
//! search relies on this for every frame on the stack.

use crate::call_frame::CallFrame;
use crate::debugger::DebugEventKind;
use crate::property::PropertySite;
use crate::runtime::{BinaryOp, UnaryOp};
use crate::tier::CompiledCode;
use crate::vm::{Unwind, Vm};
use bytecode_system::{Opcode, Register};
use core_types::{CellId, ErrorKind, Value, VmError};
use memory_manager::{CallTarget, CellData, CellKind, CodeId};
use std::sync::Arc;

/// What the loop does after an instruction
enum Flow {
    Continue,
    Return(Value),
}

impl Vm {
    /// Run the frame at `entry_depth` (and everything it calls) to completion
    pub(crate) fn execute(&mut self, entry_depth: usize) -> Result<Value, Unwind> {
        let mark = self.heap.temporaries_mark();
        loop {
            let Some(frame) = self.frames.last_mut() else {
                return Ok(Value::undefined());
            };
            let (code, pc) = (frame.code, frame.pc);
            let opcode = self.codes[code.0 as usize]
                .block
                .instructions
                .get(pc as usize)
                .map(|instruction| instruction.opcode);
            let flow = match opcode {
                Some(opcode) => {
                    frame.pc = pc + 1;
                    self.step(code, opcode)
                }
                None => Ok(Flow::Return(Value::undefined())),
            };

            match flow {
                Ok(Flow::Continue) => {}
                Ok(Flow::Return(value)) => {
                    let returning = self.frames.len() - 1;
                    let (value, register) = self.finish_return(value);
                    if returning <= entry_depth {
                        self.heap.truncate_temporaries(mark);
                        self.heap.push_temporary(value);
                        return Ok(value);
                    }
                    if let Some(register) = register {
                        self.set_register(register, value);
                    }
                }
                Err(unwind) => {
                    if let Err(unwind) = self.handle_unwind(unwind, entry_depth) {
                        self.heap.truncate_temporaries(mark);
                        if let Unwind::Throw(value) = unwind {
                            self.heap.push_temporary(value);
                        }
                        return Err(unwind);
                    }
                }
            }
            self.heap.truncate_temporaries(mark);
        }
    }

    fn step(&mut self, code: CodeId, opcode: Opcode) -> Result<Flow, Unwind> {
        match opcode {
            Opcode::LoadConst { dst, index } => {
                let value = self.constant(code, index);
                self.set_register(dst, value);
            }
            Opcode::LoadUndefined { dst } => self.set_register(dst, Value::undefined()),
            Opcode::LoadNull { dst } => self.set_register(dst, Value::null()),
            Opcode::LoadBool { dst, value } => self.set_register(dst, Value::boolean(value)),
            Opcode::LoadThis { dst } => {
                let this = self.current_frame()?.this;
                self.set_register(dst, this);
            }
            Opcode::Move { dst, src } => {
                let value = self.register(src);
                self.set_register(dst, value);
            }

            Opcode::Add { dst, lhs, rhs } => self.binary(BinaryOp::Add, dst, lhs, rhs)?,
            Opcode::Sub { dst, lhs, rhs } => self.binary(BinaryOp::Sub, dst, lhs, rhs)?,
            Opcode::Mul { dst, lhs, rhs } => self.binary(BinaryOp::Mul, dst, lhs, rhs)?,
            Opcode::Div { dst, lhs, rhs } => self.binary(BinaryOp::Div, dst, lhs, rhs)?,
            Opcode::Mod { dst, lhs, rhs } => self.binary(BinaryOp::Mod, dst, lhs, rhs)?,
            Opcode::BitAnd { dst, lhs, rhs } => self.binary(BinaryOp::BitAnd, dst, lhs, rhs)?,
            Opcode::BitOr { dst, lhs, rhs } => self.binary(BinaryOp::BitOr, dst, lhs, rhs)?,
            Opcode::BitXor { dst, lhs, rhs } => self.binary(BinaryOp::BitXor, dst, lhs, rhs)?,
            Opcode::ShiftLeft { dst, lhs, rhs } => self.binary(BinaryOp::ShiftLeft, dst, lhs, rhs)?,
            Opcode::ShiftRight { dst, lhs, rhs } => self.binary(BinaryOp::ShiftRight, dst, lhs, rhs)?,
            Opcode::UnsignedShiftRight { dst, lhs, rhs } => {
                self.binary(BinaryOp::UnsignedShiftRight, dst, lhs, rhs)?
            }
            Opcode::Negate { dst, src } => self.unary(UnaryOp::Negate, dst, src)?,
            Opcode::Increment { dst, src } => self.unary(UnaryOp::Increment, dst, src)?,
            Opcode::Decrement { dst, src } => self.unary(UnaryOp::Decrement, dst, src)?,
            Opcode::Not { dst, src } => self.unary(UnaryOp::Not, dst, src)?,
            Opcode::TypeOf { dst, src } => self.unary(UnaryOp::TypeOf, dst, src)?,
            Opcode::ToNumber { dst, src } => self.unary(UnaryOp::ToNumber, dst, src)?,

            Opcode::Less { dst, lhs, rhs } => self.binary(BinaryOp::Less, dst, lhs, rhs)?,
            Opcode::LessEq { dst, lhs, rhs } => self.binary(BinaryOp::LessEq, dst, lhs, rhs)?,
            Opcode::Greater { dst, lhs, rhs } => self.binary(BinaryOp::Greater, dst, lhs, rhs)?,
            Opcode::GreaterEq { dst, lhs, rhs } => self.binary(BinaryOp::GreaterEq, dst, lhs, rhs)?,
            Opcode::Equal { dst, lhs, rhs } => self.binary(BinaryOp::Equal, dst, lhs, rhs)?,
            Opcode::NotEqual { dst, lhs, rhs } => self.binary(BinaryOp::NotEqual, dst, lhs, rhs)?,
            Opcode::StrictEqual { dst, lhs, rhs } => self.binary(BinaryOp::StrictEqual, dst, lhs, rhs)?,
            Opcode::StrictNotEqual { dst, lhs, rhs } => {
                self.binary(BinaryOp::StrictNotEqual, dst, lhs, rhs)?
            }

            Opcode::Jump { target } => self.set_pc(target),
            Opcode::JumpIfTrue { cond, target } => {
                if self.to_boolean(self.register(cond)) {
                    self.set_pc(target);
                }
            }
            Opcode::JumpIfFalse { cond, target } => {
                if !self.to_boolean(self.register(cond)) {
                    self.set_pc(target);
                }
            }
            Opcode::Loop { target } => {
                self.check_interrupt()?;
                self.set_pc(target);
            }

            Opcode::NewObject { dst } => {
                let object = self.new_object_value()?;
                self.set_register(dst, object);
            }
            Opcode::NewArray { dst, first, count } => {
                let elements = self.register_range(first, count);
                let array = self.new_array_value(elements)?;
                self.set_register(dst, array);
            }
            Opcode::GetById { dst, base, name, cache } => {
                let base = self.register(base);
                let name = self.atom(code, name)?;
                let value = self.get_by_id(base, name, Some((code, cache)))?;
                self.set_register(dst, value);
            }
            Opcode::PutById { base, name, value, cache } => {
                let (base, value) = (self.register(base), self.register(value));
                let name = self.atom(code, name)?;
                self.put_by_id(base, name, value, Some((code, cache)))?;
            }
            Opcode::GetByVal { dst, base, key } => {
                let (base, key) = (self.register(base), self.register(key));
                let value = self.get_by_val(base, key)?;
                self.set_register(dst, value);
            }
            Opcode::PutByVal { base, key, value } => {
                let (base, key, value) = (self.register(base), self.register(key), self.register(value));
                self.put_by_val(base, key, value)?;
            }
            Opcode::DeleteById { dst, base, name } => {
                let base = self.register(base);
                let name = self.atom(code, name)?;
                let deleted = self.delete_by_id(base, name)?;
                self.set_register(dst, Value::boolean(deleted));
            }
            Opcode::In { dst, key, base } => {
                let (key, base) = (self.register(key), self.register(base));
                let found = self.has_in(key, base)?;
                self.set_register(dst, Value::boolean(found));
            }
            Opcode::InstanceOf { dst, value, constructor } => {
                let (value, constructor) = (self.register(value), self.register(constructor));
                let result = self.instance_of(value, constructor)?;
                self.set_register(dst, Value::boolean(result));
            }

            Opcode::GetGlobal { dst, name, cache } => {
                let name = self.atom(code, name)?;
                let value = self.get_global_by_id(name, Some((code, cache)))?;
                self.set_register(dst, value);
            }
            Opcode::PutGlobal { name, value, cache } => {
                let name = self.atom(code, name)?;
                let value = self.register(value);
                self.put_global_by_id(name, value, Some((code, cache)))?;
            }

            Opcode::PushScope { layout } => self.push_scope(layout)?,
            Opcode::PopScope => self.pop_scope(),
            Opcode::GetScopedVar { dst, depth, index } => {
                let value = self.get_scoped_var(depth, index);
                self.set_register(dst, value);
            }
            Opcode::PutScopedVar { depth, index, value } => {
                let value = self.register(value);
                self.put_scoped_var(depth, index, value);
            }
            Opcode::ResolveName { dst, name } => {
                let name = self.atom(code, name)?;
                let value = self.resolve_name(name)?;
                self.set_register(dst, value);
            }
            Opcode::ArgumentsObject { dst } => {
                let arguments = self.arguments_object()?;
                self.set_register(dst, arguments);
            }

            Opcode::NewFunction { dst, function } => {
                let closure = self.new_closure(function)?;
                self.set_register(dst, closure);
            }
            Opcode::Call {
                dst,
                callee,
                this,
                first_arg,
                argc,
                cache,
            } => {
                let (callee, this) = (self.register(callee), self.register(this));
                let args = self.register_range(first_arg, argc);
                self.call_from_interpreter(dst, callee, this, args, false, Some((code, cache)))?;
            }
            Opcode::CallMethod {
                dst,
                base,
                name,
                first_arg,
                argc,
                property_cache,
                cache,
            } => {
                let base = self.register(base);
                let name = self.atom(code, name)?;
                let method = self.get_by_id(base, name, Some((code, property_cache)))?;
                let args = self.register_range(first_arg, argc);
                self.call_from_interpreter(dst, method, base, args, false, Some((code, cache)))?;
            }
            Opcode::Construct {
                dst,
                callee,
                first_arg,
                argc,
                cache,
            } => {
                let callee = self.register(callee);
                let args = self.register_range(first_arg, argc);
                self.call_from_interpreter(dst, callee, Value::undefined(), args, true, Some((code, cache)))?;
            }
            Opcode::Return { src } => return Ok(Flow::Return(self.register(src))),

            Opcode::Throw { src } => {
                let value = self.register(src);
                return Err(self.raise(value));
            }
            Opcode::Catch { dst } => {
                let exception = self.take_exception();
                self.set_register(dst, exception);
            }
            Opcode::Debug { line } => self.notify_statement(line),
        }
        Ok(Flow::Continue)
    }

    fn binary(&mut self, op: BinaryOp, dst: Register, lhs: Register, rhs: Register) -> Result<(), Unwind> {
        let (lhs, rhs) = (self.register(lhs), self.register(rhs));
        let value = self.binary_op(op, lhs, rhs)?;
        self.set_register(dst, value);
        Ok(())
    }

    fn unary(&mut self, op: UnaryOp, dst: Register, src: Register) -> Result<(), Unwind> {
        let operand = self.register(src);
        let value = self.unary_op(op, operand)?;
        self.set_register(dst, value);
        Ok(())
    }

    fn register_range(&self, first: Register, count: u32) -> Vec<Value> {
        (first..first + count).map(|register| self.register(register)).collect()
    }

    fn atom(&self, code: CodeId, index: u32) -> Result<memory_manager::Atom, Unwind> {
        self.identifier(code, index).ok_or_else(|| {
            Unwind::Fatal(VmError::InvalidBytecode(format!("identifier {index} out of range")))
        })
    }

    // ------------------------------------------------------------------
    // Interruption
    // ------------------------------------------------------------------

    /// Poll the interrupt flag and the watchdog
    pub(crate) fn check_interrupt(&mut self) -> Result<(), Unwind> {
        if self.interrupt.take() || self.watchdog.tick() {
            tracing::info!(target: "interpreter", depth = self.frames.len(), "script interrupted");
            return Err(Unwind::Fatal(VmError::Interrupted));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Exceptions
    // ------------------------------------------------------------------

    /// Unwind frames until a handler takes `unwind`
    ///
    /// Frames are popped down to and including the entry boundary; a throw
    /// that finds no handler by then is returned to the caller.
    fn handle_unwind(&mut self, unwind: Unwind, entry_depth: usize) -> Result<(), Unwind> {
        match unwind {
            Unwind::Fatal(error) => {
                self.pop_frames_to(entry_depth);
                Err(Unwind::Fatal(error))
            }
            Unwind::Throw(value) => loop {
                if self.enter_handler(value).is_some() {
                    return Ok(());
                }
                let depth = self.frames.len().saturating_sub(1);
                self.pop_frame();
                if depth <= entry_depth {
                    return Err(Unwind::Throw(value));
                }
            },
        }
    }

    /// Handler of the current frame covering its return address
    ///
    /// Restores the handler's block-scope depth and jumps to it.
    pub(crate) fn find_handler(&mut self) -> Option<u32> {
        let frame = self.frames.last()?;
        let handler = *self.codes[frame.code.0 as usize]
            .block
            .handler_for(frame.pc.saturating_sub(1))?;
        while self.frames.last()?.scope_depth > handler.scope_depth {
            self.pop_scope();
        }
        self.set_pc(handler.target);
        Some(handler.target)
    }

    // ------------------------------------------------------------------
    // Frames
    // ------------------------------------------------------------------

    /// Push a frame for script function `function`
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn push_frame(
        &mut self,
        function: CellId,
        code: CodeId,
        this: Value,
        args: &[Value],
        return_register: Option<Register>,
        is_construct: bool,
        entry_boundary: bool,
    ) -> Result<(), Unwind> {
        let block = &self.codes[code.0 as usize].block;
        let (num_registers, num_vars, num_params) = (block.num_registers, block.num_vars, block.num_params);
        if self.frames.len() >= self.config.max_call_depth || !self.registers.has_room(num_registers as usize) {
            tracing::warn!(
                target: "interpreter",
                depth = self.frames.len(),
                registers = self.registers.len(),
                "call stack exhausted"
            );
            return Err(self.throw_error(ErrorKind::RangeError, "Maximum call stack size exceeded"));
        }

        let scope = self
            .heap
            .cell(function)
            .and_then(|cell| cell.as_function())
            .and_then(|data| data.scope);
        let base = self.registers.grow(num_registers as usize);
        for (index, arg) in args.iter().take(num_params as usize).enumerate() {
            self.registers.set(base + index, *arg);
        }
        let extra_args = args.get(num_params as usize..).map(<[Value]>::to_vec).unwrap_or_default();
        self.frames.push(CallFrame {
            code,
            pc: 0,
            base,
            num_registers,
            num_vars,
            return_register,
            argc: args.len() as u32,
            extra_args,
            callee: Value::from_cell(function),
            this,
            scope,
            activation: None,
            scope_depth: 0,
            is_construct,
            entry_boundary,
        });
        Ok(())
    }

    /// Hooks run once a frame is pushed; returns compiled code to run it with
    fn function_entry(&mut self) -> Result<Option<Arc<dyn CompiledCode>>, Unwind> {
        self.notify(DebugEventKind::Call, None);
        self.check_interrupt()?;
        Ok(self.tier_up())
    }

    fn pop_frame(&mut self) -> Option<CallFrame> {
        if self.frames.is_empty() {
            return None;
        }
        self.notify(DebugEventKind::Return, None);
        let frame = self.frames.pop()?;
        self.registers.truncate(frame.base);
        Some(frame)
    }

    fn pop_frames_to(&mut self, depth: usize) {
        while self.frames.len() > depth {
            self.pop_frame();
        }
    }

    /// Pop the returning frame, applying constructor result rules
    fn finish_return(&mut self, value: Value) -> (Value, Option<Register>) {
        self.heap.push_temporary(value);
        match self.pop_frame() {
            Some(frame) => {
                let value = if frame.is_construct && !self.is_object(value) {
                    frame.this
                } else {
                    value
                };
                (value, frame.return_register)
            }
            None => (value, None),
        }
    }

    /// Run the freshly pushed top frame on its own Rust activation
    fn run_frame(&mut self) -> Result<Value, Unwind> {
        let depth = self.frames.len() - 1;
        match self.function_entry() {
            Ok(Some(compiled)) => self.run_compiled(compiled),
            Ok(None) => self.execute(depth),
            Err(unwind) => {
                self.pop_frames_to(depth);
                Err(unwind)
            }
        }
    }

    fn run_compiled(&mut self, compiled: Arc<dyn CompiledCode>) -> Result<Value, Unwind> {
        let depth = self.frames.len() - 1;
        match compiled.execute(self) {
            Ok(value) => {
                self.pop_frames_to(depth + 1);
                Ok(self.finish_return(value).0)
            }
            Err(unwind) => {
                self.pop_frames_to(depth);
                Err(unwind)
            }
        }
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    fn resolve_callee(&mut self, callee: Value, site: PropertySite, construct: bool) -> Result<(CellId, CallTarget), Unwind> {
        let caching = self.config.inline_caching;
        if let (true, Some(id), Some((code, index))) = (caching, callee.as_cell(), site) {
            let cached = self.codes[code.0 as usize]
                .caches
                .calls
                .get(index as usize)
                .and_then(|cache| cache.lookup(id));
            if let Some(target) = cached {
                return Ok((id, target));
            }
        }

        let function = callee
            .as_cell()
            .and_then(|id| Some((id, self.heap.cell(id)?.as_function()?.target)));
        let Some((id, target)) = function else {
            let what = if construct { "a constructor" } else { "a function" };
            let message = format!("{} is not {what}", self.to_display_string(callee));
            return Err(self.throw_error(ErrorKind::TypeError, &message));
        };

        if let (true, Some((code, index))) = (caching, site) {
            if let Some(cache) = self.codes[code.0 as usize].caches.calls.get_mut(index as usize) {
                let before = cache.state();
                cache.update(id, target);
                let after = cache.state();
                if before != after {
                    tracing::trace!(target: "ic", code = code.0, site = index, ?before, ?after, "call cache transition");
                }
            }
        }
        Ok((id, target))
    }

    fn construct_receiver(&mut self, function: CellId) -> Result<Value, Unwind> {
        let prototype = self.heap.get_property(function, self.names.prototype);
        let structure = match self.object_cell(prototype) {
            Some(_) => self.heap.structures_mut().root(CellKind::Object, prototype),
            None => self.intrinsics.object_structure,
        };
        self.allocate(structure, CellData::Plain).map(Value::from_cell)
    }

    fn construct_result(&self, construct: bool, value: Value, this: Value) -> Value {
        if construct && !self.is_object(value) {
            this
        } else {
            value
        }
    }

    /// Call from the embedding API, the stubs or compiled code
    pub(crate) fn call_value(
        &mut self,
        callee: Value,
        this: Value,
        args: &[Value],
        construct: bool,
        site: PropertySite,
    ) -> Result<Value, Unwind> {
        let (function, target) = self.resolve_callee(callee, site, construct)?;
        let this = if construct { self.construct_receiver(function)? } else { this };
        match target {
            CallTarget::Host(host) => {
                let value = self.invoke_host(host, callee, this, args, construct)?;
                Ok(self.construct_result(construct, value, this))
            }
            CallTarget::Script(code) => {
                self.push_frame(function, code, this, args, None, construct, true)?;
                self.run_frame()
            }
        }
    }

    /// Call made by an interpreted frame; script callees continue in the loop
    fn call_from_interpreter(
        &mut self,
        dst: Register,
        callee: Value,
        this: Value,
        args: Vec<Value>,
        construct: bool,
        site: PropertySite,
    ) -> Result<(), Unwind> {
        let (function, target) = self.resolve_callee(callee, site, construct)?;
        let this = if construct { self.construct_receiver(function)? } else { this };
        match target {
            CallTarget::Host(host) => {
                let value = self.invoke_host(host, callee, this, &args, construct)?;
                let value = self.construct_result(construct, value, this);
                self.set_register(dst, value);
            }
            CallTarget::Script(code) => {
                self.push_frame(function, code, this, &args, Some(dst), construct, false)?;
                if let Some(compiled) = self.function_entry()? {
                    let value = self.run_compiled(compiled)?;
                    self.set_register(dst, value);
                }
            }
        }
        Ok(())
    }

    /// Create a closure for nested function `template` of the current code
    pub(crate) fn new_closure(&mut self, template: u32) -> Result<Value, Unwind> {
        let code = self.current_frame()?.code;
        if self.codes[code.0 as usize].block.needs_activation {
            self.tear_off_activation()?;
        }
        let scope = self.current_frame()?.scope;
        let Some(&nested) = self.codes[code.0 as usize].functions.get(template as usize) else {
            return Err(Unwind::Fatal(VmError::InvalidBytecode(format!(
                "function template {template} out of range"
            ))));
        };
        let block = &self.codes[nested.0 as usize].block;
        let (name, arity) = (block.name.clone(), block.num_params);
        let name = name.map(|name| self.heap.intern(&name));
        let function = self.new_function_cell(CallTarget::Script(nested), scope, name, arity)?;
        Ok(Value::from_cell(function))
    }
}
