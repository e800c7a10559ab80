//! Activations and the scope chain
//!
//! A frame keeps its parameters and variables in registers. Once a closure
//! can observe them (the first `NewFunction` or `PushScope` in a function
//! marked `needs_activation`) the registers are copied into a heap activation
//! and every later access to a variable register is redirected there, so the
//! frame and its closures share one copy.

use crate::vm::{Unwind, Vm};
use bytecode_system::Register;
use core_types::{CellId, ErrorKind, Value, VmError};
use memory_manager::{ActivationData, Atom, CellData};
use std::sync::Arc;

/// Where a name resolves from the current frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    /// A parameter or variable of the current frame
    Register(Register),
    /// A slot in a scope record `depth` links up the chain
    Scope {
        /// Links walked from the frame's scope head
        depth: u32,
        /// Slot index in that record
        index: u32,
    },
    /// A property of the global object
    Global,
}

impl Vm {
    /// Read a register of the current frame
    pub fn register(&self, register: Register) -> Value {
        let Some(frame) = self.frames.last() else {
            return Value::undefined();
        };
        if let Some(activation) = frame.redirects(register) {
            return self
                .heap
                .cell(activation)
                .and_then(|cell| cell.as_activation())
                .and_then(|record| record.slots.get(register as usize).copied())
                .unwrap_or_default();
        }
        self.registers.get(frame.base + register as usize)
    }

    /// Write a register of the current frame
    pub fn set_register(&mut self, register: Register, value: Value) {
        let Some(frame) = self.frames.last() else {
            return;
        };
        if let Some(activation) = frame.redirects(register) {
            if let Some(slot) = self
                .heap
                .cell_mut(activation)
                .and_then(|cell| cell.as_activation_mut())
                .and_then(|record| record.slots.get_mut(register as usize))
            {
                *slot = value;
            }
            return;
        }
        let index = frame.base + register as usize;
        self.registers.set(index, value);
    }

    /// Move the current frame's variables into a heap activation
    ///
    /// Idempotent; returns the activation.
    pub fn tear_off_activation(&mut self) -> Result<CellId, Unwind> {
        let frame = self.current_frame()?;
        if let Some(activation) = frame.activation {
            return Ok(activation);
        }
        debug_assert_eq!(frame.scope_depth, 0, "tear-off happens before block scopes");
        let (code, base, num_vars, parent) = (frame.code, frame.base, frame.num_vars, frame.scope);
        let slots = (0..num_vars as usize)
            .map(|index| self.registers.get(base + index))
            .collect();
        let names = self.codes[code.0 as usize].variables.clone();
        let structure = self.intrinsics.activation_structure;
        let activation = self.allocate(structure, CellData::Activation(ActivationData { slots, names, parent }))?;
        if let Some(frame) = self.frames.last_mut() {
            frame.activation = Some(activation);
            frame.scope = Some(activation);
        }
        tracing::trace!(target: "interpreter", code = code.0, "activation torn off");
        Ok(activation)
    }

    /// Enter a block scope whose variables are named by `layout`
    pub fn push_scope(&mut self, layout: u32) -> Result<(), Unwind> {
        let code = self.current_frame()?.code;
        if self.codes[code.0 as usize].block.needs_activation {
            self.tear_off_activation()?;
        }
        let names: Arc<[Atom]> = self.codes[code.0 as usize]
            .scope_layouts
            .get(layout as usize)
            .cloned()
            .unwrap_or_else(|| Arc::from(Vec::new()));
        let parent = self.current_frame()?.scope;
        let slots = vec![Value::undefined(); names.len()];
        let structure = self.intrinsics.activation_structure;
        let record = self.allocate(structure, CellData::Activation(ActivationData { slots, names, parent }))?;
        if let Some(frame) = self.frames.last_mut() {
            frame.scope = Some(record);
            frame.scope_depth += 1;
        }
        Ok(())
    }

    /// Leave the innermost block scope
    pub fn pop_scope(&mut self) {
        let Some(frame) = self.frames.last() else {
            return;
        };
        if frame.scope_depth == 0 {
            return;
        }
        let parent = frame
            .scope
            .and_then(|scope| self.heap.cell(scope))
            .and_then(|cell| cell.as_activation())
            .and_then(|record| record.parent);
        if let Some(frame) = self.frames.last_mut() {
            frame.scope = parent;
            frame.scope_depth -= 1;
        }
    }

    fn scope_at(&self, depth: u32) -> Option<CellId> {
        let mut scope = self.frames.last()?.scope;
        for _ in 0..depth {
            scope = self.heap.cell(scope?)?.as_activation()?.parent;
        }
        scope
    }

    /// Read slot `index` of the record `depth` links up the chain
    pub fn get_scoped_var(&self, depth: u32, index: u32) -> Value {
        self.scope_at(depth)
            .and_then(|scope| self.heap.cell(scope))
            .and_then(|cell| cell.as_activation())
            .and_then(|record| record.slots.get(index as usize).copied())
            .unwrap_or_default()
    }

    /// Write slot `index` of the record `depth` links up the chain
    pub fn put_scoped_var(&mut self, depth: u32, index: u32, value: Value) {
        let Some(scope) = self.scope_at(depth) else {
            return;
        };
        if let Some(slot) = self
            .heap
            .cell_mut(scope)
            .and_then(|cell| cell.as_activation_mut())
            .and_then(|record| record.slots.get_mut(index as usize))
        {
            *slot = value;
        }
    }

    /// Slot of `name` in a record, plus the record's parent
    fn record_slot(&self, scope: CellId, name: Atom) -> Option<(Option<u32>, Option<CellId>)> {
        let record = self.heap.cell(scope)?.as_activation()?;
        let index = record.names.iter().position(|candidate| *candidate == name);
        Some((index.map(|index| index as u32), record.parent))
    }

    /// Resolve `name` from the current frame
    ///
    /// Block scopes of the frame come first, then its own variables, then the
    /// captured chain, then the global object.
    pub fn resolve_location(&self, name: Atom) -> Option<Location> {
        let frame = self.frames.last()?;
        let mut scope = frame.scope;
        let mut depth = 0;
        for _ in 0..frame.scope_depth {
            let (index, parent) = self.record_slot(scope?, name)?;
            if let Some(index) = index {
                return Some(Location::Scope { depth, index });
            }
            scope = parent;
            depth += 1;
        }

        let variables = &self.codes[frame.code.0 as usize].variables;
        if let Some(register) = variables.iter().position(|candidate| *candidate == name) {
            return Some(Location::Register(register as Register));
        }

        if frame.activation.is_some() && scope == frame.activation {
            scope = scope
                .and_then(|id| self.heap.cell(id))
                .and_then(|cell| cell.as_activation())
                .and_then(|record| record.parent);
            depth += 1;
        }
        while let Some(id) = scope {
            let (index, parent) = self.record_slot(id, name)?;
            if let Some(index) = index {
                return Some(Location::Scope { depth, index });
            }
            scope = parent;
            depth += 1;
        }

        self.heap
            .has_property(self.intrinsics.global, name)
            .then_some(Location::Global)
    }

    /// Read the value `name` resolves to, or raise a ReferenceError
    pub fn resolve_name(&mut self, name: Atom) -> Result<Value, Unwind> {
        match self.resolve_location(name) {
            Some(Location::Register(register)) => Ok(self.register(register)),
            Some(Location::Scope { depth, index }) => Ok(self.get_scoped_var(depth, index)),
            Some(Location::Global) => Ok(self.heap.get_property(self.intrinsics.global, name)),
            None => {
                let message = format!("{} is not defined", self.heap.atoms().name(name));
                Err(self.throw_error(ErrorKind::ReferenceError, &message))
            }
        }
    }

    /// Array of the current frame's actual arguments
    pub fn arguments_object(&mut self) -> Result<Value, Unwind> {
        let frame = self.current_frame()?;
        let declared = self.codes[frame.code.0 as usize].block.num_params.min(frame.argc);
        let extra = frame.extra_args.clone();
        let mut values: Vec<Value> = (0..declared).map(|register| self.register(register)).collect();
        values.extend(extra);
        self.new_array_value(values)
    }

    pub(crate) fn current_frame(&self) -> Result<&crate::call_frame::CallFrame, Unwind> {
        self.frames
            .last()
            .ok_or_else(|| Unwind::Fatal(VmError::InvalidBytecode("no active frame".to_string())))
    }
}
