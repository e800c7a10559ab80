//! Memory Manager - cell heap, structures and garbage collection
//!
//! This component provides:
//! - Interned identifiers ([`AtomTable`])
//! - Structures (shapes) with an interned transition graph ([`StructureTable`])
//! - Cells with inline and overflow property storage ([`Cell`])
//! - An arena heap with generation-checked handles ([`Heap`])
//! - Stop-the-world mark and sweep with precise and conservative roots
//!
//! # Example
//!
//! ```
//! use memory_manager::{CellData, CellKind, Heap};
//! use core_types::Value;
//!
//! let mut heap = Heap::default();
//! let root = heap.structures_mut().root(CellKind::Object, Value::null());
//! let a = heap.allocate(root, CellData::Plain).unwrap();
//! let b = heap.allocate(root, CellData::Plain).unwrap();
//!
//! let x = heap.intern("x");
//! heap.set_property(a, x, Value::number(1.0)).unwrap();
//! heap.set_property(b, x, Value::number(2.0)).unwrap();
//! assert_eq!(heap.structure_of(a), heap.structure_of(b));
//!
//! heap.clear_temporaries();
//! heap.collect([Value::from_cell(a)], []);
//! assert!(heap.is_live(a));
//! assert!(!heap.is_live(b));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod atoms;
pub mod gc;
pub mod heap;
pub mod object;
pub mod property;
pub mod structure;

pub use atoms::{Atom, AtomTable};
pub use gc::{CollectionSummary, GcStats, MarkColor};
pub use heap::{Heap, HeapLimits, RootId};
pub use object::{
    ActivationData, CallTarget, Cell, CellData, CellKind, CodeId, FunctionData, HostFunctionId,
    INLINE_CAPACITY, OVERFLOW_BASE_CAPACITY,
};
pub use property::{PropertyError, PropertyLookup, PutOutcome, MAX_PROTOTYPE_CHAIN};
pub use structure::{
    PropertyAttributes, PropertySlot, Structure, StructureId, StructureTable, MAX_TRANSITION_LENGTH,
};
