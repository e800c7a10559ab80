//! Cell layout: kind tag, structure, property storage and kind-specific data.

use crate::atoms::Atom;
use crate::structure::StructureId;
use core_types::{CellId, Value};
use std::sync::Arc;

/// Number of property slots stored inline in every cell.
pub const INLINE_CAPACITY: usize = 6;

/// Capacity of the overflow vector the first time it is needed.
pub const OVERFLOW_BASE_CAPACITY: usize = 16;

/// Closed set of cell kinds.
///
/// Capabilities are queried on the tag instead of through a class hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellKind {
    /// Ordinary object (including error objects)
    Object,
    /// Dense array (also used for `arguments`)
    Array,
    /// Immutable string
    String,
    /// Script or host function
    Function,
    /// Heap-resident scope record
    Activation,
}

impl CellKind {
    /// Whether cells of this kind can be called.
    pub fn is_callable(self) -> bool {
        matches!(self, CellKind::Function)
    }

    /// Whether cells of this kind have a dense element vector.
    pub fn has_indexed_properties(self) -> bool {
        matches!(self, CellKind::Array)
    }

    /// Whether scripts see cells of this kind as objects.
    pub fn is_object(self) -> bool {
        !matches!(self, CellKind::String | CellKind::Activation)
    }
}

/// Index of a compiled code block in the execution context's code registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CodeId(pub u32);

/// Index of a host function in the execution context's native registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostFunctionId(pub u32);

/// What a function cell runs when called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallTarget {
    /// Bytecode
    Script(CodeId),
    /// Host function pointer
    Host(HostFunctionId),
}

/// Payload of a function cell.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionData {
    /// Code to run
    pub target: CallTarget,
    /// Scope chain head captured at creation (script functions only)
    pub scope: Option<CellId>,
    /// Function name for stack traces and debugger events
    pub name: Option<Atom>,
    /// Declared parameter count
    pub arity: u32,
}

/// Payload of an activation (scope record).
#[derive(Debug, Clone, PartialEq)]
pub struct ActivationData {
    /// Variable values
    pub slots: Vec<Value>,
    /// Variable names, parallel to `slots`
    pub names: Arc<[Atom]>,
    /// Enclosing scope, `None` at the global boundary
    pub parent: Option<CellId>,
}

/// Kind-specific payload of a cell.
#[derive(Debug, Clone, PartialEq)]
pub enum CellData {
    /// Ordinary object
    Plain,
    /// Dense elements; holes are [`Value::empty`]
    Array(Vec<Value>),
    /// String contents
    String(String),
    /// Function payload
    Function(FunctionData),
    /// Scope record payload
    Activation(ActivationData),
}

impl CellData {
    /// The kind tag implied by this payload.
    pub fn kind(&self) -> CellKind {
        match self {
            CellData::Plain => CellKind::Object,
            CellData::Array(_) => CellKind::Array,
            CellData::String(_) => CellKind::String,
            CellData::Function(_) => CellKind::Function,
            CellData::Activation(_) => CellKind::Activation,
        }
    }
}

/// A heap cell.
#[derive(Debug, Clone)]
pub struct Cell {
    pub(crate) structure: StructureId,
    inline: [Value; INLINE_CAPACITY],
    overflow: Vec<Value>,
    /// Kind-specific payload
    pub data: CellData,
}

impl Cell {
    /// Creates a cell with every property slot set to undefined.
    pub fn new(structure: StructureId, slot_count: u32, data: CellData) -> Self {
        let mut cell = Cell {
            structure,
            inline: [Value::undefined(); INLINE_CAPACITY],
            overflow: Vec::new(),
            data,
        };
        cell.ensure_capacity(slot_count);
        cell
    }

    /// The cell's kind tag.
    pub fn kind(&self) -> CellKind {
        self.data.kind()
    }

    /// The cell's current structure.
    pub fn structure(&self) -> StructureId {
        self.structure
    }

    /// Reads a property slot.
    pub fn slot(&self, offset: u32) -> Value {
        let offset = offset as usize;
        if offset < INLINE_CAPACITY {
            self.inline[offset]
        } else {
            self.overflow
                .get(offset - INLINE_CAPACITY)
                .copied()
                .unwrap_or_default()
        }
    }

    /// Writes a property slot, growing overflow storage when needed.
    pub fn set_slot(&mut self, offset: u32, value: Value) {
        self.ensure_capacity(offset + 1);
        let offset = offset as usize;
        if offset < INLINE_CAPACITY {
            self.inline[offset] = value;
        } else {
            self.overflow[offset - INLINE_CAPACITY] = value;
        }
    }

    /// Makes room for `slot_count` property slots.
    ///
    /// Overflow storage starts at [`OVERFLOW_BASE_CAPACITY`] and doubles.
    pub fn ensure_capacity(&mut self, slot_count: u32) {
        let needed = (slot_count as usize).saturating_sub(INLINE_CAPACITY);
        if needed <= self.overflow.len() {
            return;
        }
        if needed > self.overflow.capacity() {
            let mut capacity = self.overflow.capacity().max(OVERFLOW_BASE_CAPACITY);
            while capacity < needed {
                capacity *= 2;
            }
            self.overflow.reserve_exact(capacity - self.overflow.len());
        }
        self.overflow.resize(needed, Value::undefined());
    }

    /// Every value stored in property slots.
    pub fn slots(&self) -> impl Iterator<Item = Value> + '_ {
        self.inline.iter().chain(self.overflow.iter()).copied()
    }

    /// Cell handles referenced from the payload, excluding property slots.
    pub fn payload_references(&self) -> Vec<Value> {
        match &self.data {
            CellData::Plain | CellData::String(_) => Vec::new(),
            CellData::Array(elements) => elements.clone(),
            CellData::Function(function) => function.scope.map(Value::from_cell).into_iter().collect(),
            CellData::Activation(activation) => activation
                .slots
                .iter()
                .copied()
                .chain(activation.parent.map(Value::from_cell))
                .collect(),
        }
    }

    /// Bytes charged to the allocation budget for this cell.
    pub fn footprint(&self) -> usize {
        let payload = match &self.data {
            CellData::Plain | CellData::Function(_) => 0,
            CellData::Array(elements) => elements.capacity() * std::mem::size_of::<Value>(),
            CellData::String(text) => text.capacity(),
            CellData::Activation(activation) => activation.slots.capacity() * std::mem::size_of::<Value>(),
        };
        std::mem::size_of::<Cell>() + self.overflow.capacity() * std::mem::size_of::<Value>() + payload
    }

    /// The string contents of a string cell.
    pub fn as_str(&self) -> Option<&str> {
        match &self.data {
            CellData::String(text) => Some(text),
            _ => None,
        }
    }

    /// The function payload of a function cell.
    pub fn as_function(&self) -> Option<&FunctionData> {
        match &self.data {
            CellData::Function(function) => Some(function),
            _ => None,
        }
    }

    /// The activation payload of a scope record.
    pub fn as_activation(&self) -> Option<&ActivationData> {
        match &self.data {
            CellData::Activation(activation) => Some(activation),
            _ => None,
        }
    }

    /// Mutable activation payload.
    pub fn as_activation_mut(&mut self) -> Option<&mut ActivationData> {
        match &mut self.data {
            CellData::Activation(activation) => Some(activation),
            _ => None,
        }
    }

    /// Dense elements of an array cell.
    pub fn as_elements(&self) -> Option<&Vec<Value>> {
        match &self.data {
            CellData::Array(elements) => Some(elements),
            _ => None,
        }
    }

    /// Mutable dense elements.
    pub fn as_elements_mut(&mut self) -> Option<&mut Vec<Value>> {
        match &mut self.data {
            CellData::Array(elements) => Some(elements),
            _ => None,
        }
    }
}
