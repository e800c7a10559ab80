//! Call frames and the shared register file

use bytecode_system::Register;
use core_types::{CellId, Value};
use memory_manager::CodeId;

/// Call frame representing a script function invocation
///
/// The frame's registers live in the shared [`RegisterFile`] at
/// `base..base + num_registers`. The caller is the previous frame on the stack.
#[derive(Debug, Clone, PartialEq)]
pub struct CallFrame {
    /// Code being executed
    pub code: CodeId,
    /// Index of the next instruction; the return address while a callee runs
    pub pc: u32,
    /// First register of this frame in the register file
    pub base: usize,
    /// Registers reserved for this frame
    pub num_registers: u32,
    /// Parameter and variable registers, redirected after tear-off
    pub num_vars: u32,
    /// Caller register receiving the return value
    pub return_register: Option<Register>,
    /// Actual argument count
    pub argc: u32,
    /// Arguments beyond the declared parameters
    pub extra_args: Vec<Value>,
    /// Function being executed
    pub callee: Value,
    /// Receiver
    pub this: Value,
    /// Scope chain head
    pub scope: Option<CellId>,
    /// Heap activation once torn off
    pub activation: Option<CellId>,
    /// Block scopes pushed by this frame
    pub scope_depth: u32,
    /// Invoked through `new`
    pub is_construct: bool,
    /// Unwinding and returns stop at this frame
    pub entry_boundary: bool,
}

impl CallFrame {
    /// Whether `register` is a variable register redirected to the activation
    pub fn redirects(&self, register: Register) -> Option<CellId> {
        if register < self.num_vars {
            self.activation
        } else {
            None
        }
    }
}

/// Register storage shared by all frames
///
/// Capacity is a soft limit checked when frames are pushed.
#[derive(Debug, Clone)]
pub struct RegisterFile {
    registers: Vec<Value>,
    capacity: usize,
}

impl RegisterFile {
    /// Create an empty register file
    pub fn new(capacity: usize) -> Self {
        Self {
            registers: Vec::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    /// Registers in use
    pub fn len(&self) -> usize {
        self.registers.len()
    }

    /// Whether no frame holds registers
    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    /// Capacity limit
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether `count` more registers fit
    pub fn has_room(&self, count: usize) -> bool {
        self.registers.len() + count <= self.capacity
    }

    /// Reserve `count` registers initialized to undefined, returning the base
    pub fn grow(&mut self, count: usize) -> usize {
        let base = self.registers.len();
        self.registers.resize(base + count, Value::undefined());
        base
    }

    /// Release every register from `base` up
    pub fn truncate(&mut self, base: usize) {
        self.registers.truncate(base);
    }

    /// Read an absolute register
    pub fn get(&self, index: usize) -> Value {
        self.registers.get(index).copied().unwrap_or_default()
    }

    /// Write an absolute register
    pub fn set(&mut self, index: usize, value: Value) {
        if let Some(slot) = self.registers.get_mut(index) {
            *slot = value;
        }
    }

    /// Every register in use
    pub fn values(&self) -> &[Value] {
        &self.registers
    }
}
