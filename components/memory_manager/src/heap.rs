//! Cell arena with generation-checked handles.
//!
//! Cells live in a slot vector; freed slots go on a free list and have their
//! generation bumped so outstanding [`CellId`]s to them stop resolving. The
//! heap also owns the structure table and the identifier table, and tracks
//! the allocation budget that decides when the collector runs.

use crate::atoms::{Atom, AtomTable};
use crate::gc::{GcStats, MarkColor};
use crate::object::{Cell, CellData};
use crate::structure::{StructureId, StructureTable};
use core_types::{CellId, Value, VmError};

/// Allocation budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapLimits {
    /// Live bytes at which the next allocation requests a collection
    pub gc_threshold: usize,
    /// Hard ceiling; allocations beyond it fail with out-of-memory
    pub max_bytes: usize,
}

impl Default for HeapLimits {
    fn default() -> Self {
        HeapLimits {
            gc_threshold: 1024 * 1024,
            max_bytes: 256 * 1024 * 1024,
        }
    }
}

/// Handle to a persistent root registered with [`Heap::add_root`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RootId(u32);

#[derive(Debug)]
pub(crate) struct Slot {
    pub(crate) generation: u16,
    pub(crate) color: MarkColor,
    pub(crate) bytes: usize,
    pub(crate) cell: Option<Cell>,
}

/// The managed heap.
///
/// # Example
///
/// ```
/// use memory_manager::{CellData, CellKind, Heap, HeapLimits};
/// use core_types::Value;
///
/// let mut heap = Heap::new(HeapLimits::default());
/// let root = heap.structures_mut().root(CellKind::Object, Value::null());
/// let obj = heap.allocate(root, CellData::Plain).unwrap();
/// assert!(heap.is_live(obj));
/// assert_eq!(heap.live_cells(), 1);
/// ```
#[derive(Debug)]
pub struct Heap {
    pub(crate) slots: Vec<Slot>,
    pub(crate) free_list: Vec<u32>,
    pub(crate) structures: StructureTable,
    pub(crate) atoms: AtomTable,
    pub(crate) limits: HeapLimits,
    pub(crate) next_collection: usize,
    pub(crate) live_bytes: usize,
    pub(crate) live_cells: usize,
    pub(crate) roots: Vec<Option<Value>>,
    free_roots: Vec<u32>,
    pub(crate) temporaries: Vec<Value>,
    pub(crate) stats: GcStats,
}

impl Heap {
    /// Creates an empty heap with the given budget.
    pub fn new(limits: HeapLimits) -> Self {
        Heap {
            slots: Vec::new(),
            free_list: Vec::new(),
            structures: StructureTable::new(),
            atoms: AtomTable::new(),
            next_collection: limits.gc_threshold,
            limits,
            live_bytes: 0,
            live_cells: 0,
            roots: Vec::new(),
            free_roots: Vec::new(),
            temporaries: Vec::new(),
            stats: GcStats::default(),
        }
    }

    /// The configured budget.
    pub fn limits(&self) -> HeapLimits {
        self.limits
    }

    /// Structure table.
    pub fn structures(&self) -> &StructureTable {
        &self.structures
    }

    /// Mutable structure table.
    pub fn structures_mut(&mut self) -> &mut StructureTable {
        &mut self.structures
    }

    /// Identifier table.
    pub fn atoms(&self) -> &AtomTable {
        &self.atoms
    }

    /// Mutable identifier table.
    pub fn atoms_mut(&mut self) -> &mut AtomTable {
        &mut self.atoms
    }

    /// Interns a property name.
    pub fn intern(&mut self, name: &str) -> Atom {
        self.atoms.intern(name)
    }

    /// Allocates a cell with `structure` and `data`.
    ///
    /// Every property slot starts as undefined. The new cell is pushed onto the
    /// temporary root list so it survives collections until the caller stores
    /// it somewhere reachable and releases temporaries.
    ///
    /// # Errors
    ///
    /// [`VmError::OutOfMemory`] if the cell would take the heap past its hard
    /// limit. Callers are expected to have collected first when
    /// [`Heap::should_collect`] said so.
    pub fn allocate(&mut self, structure: StructureId, data: CellData) -> Result<CellId, VmError> {
        debug_assert_eq!(self.structures.get(structure).kind(), data.kind());
        let slot_count = self.structures.get(structure).slot_count();
        let cell = Cell::new(structure, slot_count, data);
        let bytes = cell.footprint();
        if self.live_bytes + bytes > self.limits.max_bytes {
            return Err(VmError::OutOfMemory {
                limit: self.limits.max_bytes,
            });
        }

        let index = match self.free_list.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.cell = Some(cell);
                slot.bytes = bytes;
                slot.color = MarkColor::White;
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    color: MarkColor::White,
                    bytes,
                    cell: Some(cell),
                });
                (self.slots.len() - 1) as u32
            }
        };
        self.live_bytes += bytes;
        self.live_cells += 1;
        self.stats.cells_allocated += 1;

        let id = CellId::new(index, self.slots[index as usize].generation);
        self.temporaries.push(Value::from_cell(id));
        Ok(id)
    }

    /// Whether live bytes have crossed the collection threshold.
    pub fn should_collect(&self) -> bool {
        self.live_bytes >= self.next_collection
    }

    /// Whether `id` still names a live cell.
    pub fn is_live(&self, id: CellId) -> bool {
        self.cell(id).is_some()
    }

    /// Borrows a live cell.
    pub fn cell(&self, id: CellId) -> Option<&Cell> {
        self.slots
            .get(id.index() as usize)
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.cell.as_ref())
    }

    /// Mutably borrows a live cell.
    ///
    /// Callers that change the cell's footprint must call
    /// [`Heap::refresh_footprint`] afterwards.
    pub fn cell_mut(&mut self, id: CellId) -> Option<&mut Cell> {
        self.slots
            .get_mut(id.index() as usize)
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.cell.as_mut())
    }

    /// Borrows the cell a value refers to.
    pub fn cell_of(&self, value: Value) -> Option<&Cell> {
        value.as_cell().and_then(|id| self.cell(id))
    }

    /// Re-measures a cell after its storage grew or shrank.
    pub fn refresh_footprint(&mut self, id: CellId) {
        let Some(slot) = self
            .slots
            .get_mut(id.index() as usize)
            .filter(|slot| slot.generation == id.generation())
        else {
            return;
        };
        if let Some(cell) = &slot.cell {
            let bytes = cell.footprint();
            self.live_bytes = self.live_bytes - slot.bytes + bytes;
            slot.bytes = bytes;
        }
    }

    /// Registers a persistent root.
    pub fn add_root(&mut self, value: Value) -> RootId {
        match self.free_roots.pop() {
            Some(index) => {
                self.roots[index as usize] = Some(value);
                RootId(index)
            }
            None => {
                self.roots.push(Some(value));
                RootId((self.roots.len() - 1) as u32)
            }
        }
    }

    /// Replaces the value held by a persistent root.
    pub fn set_root(&mut self, root: RootId, value: Value) {
        if let Some(slot) = self.roots.get_mut(root.0 as usize) {
            *slot = Some(value);
        }
    }

    /// Unregisters a persistent root.
    pub fn remove_root(&mut self, root: RootId) {
        if let Some(slot) = self.roots.get_mut(root.0 as usize) {
            if slot.take().is_some() {
                self.free_roots.push(root.0);
            }
        }
    }

    /// Number of registered persistent roots.
    pub fn root_count(&self) -> usize {
        self.roots.iter().filter(|root| root.is_some()).count()
    }

    /// Protects a value until temporaries are released.
    pub fn push_temporary(&mut self, value: Value) {
        if value.is_cell() {
            self.temporaries.push(value);
        }
    }

    /// Current depth of the temporary root list.
    pub fn temporaries_mark(&self) -> usize {
        self.temporaries.len()
    }

    /// Drops temporaries pushed after `mark`.
    pub fn truncate_temporaries(&mut self, mark: usize) {
        self.temporaries.truncate(mark);
    }

    /// Drops every temporary.
    pub fn clear_temporaries(&mut self) {
        self.temporaries.clear();
    }

    /// Number of live cells.
    pub fn live_cells(&self) -> usize {
        self.live_cells
    }

    /// Bytes charged to live cells.
    pub fn live_bytes(&self) -> usize {
        self.live_bytes
    }

    /// Collector statistics.
    pub fn stats(&self) -> &GcStats {
        &self.stats
    }

    /// Handles of every live cell.
    pub fn live_handles(&self) -> impl Iterator<Item = CellId> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.cell
                .as_ref()
                .map(|_| CellId::new(index as u32, slot.generation))
        })
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new(HeapLimits::default())
    }
}
