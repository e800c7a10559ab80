//! Stop-the-world mark and sweep.
//!
//! Marking is a tri-color worklist over cell handles. Precise roots come from
//! the caller (register file, frames, stub frames), from persistent roots and
//! from the temporary root list. Raw words handed in as conservative roots are
//! kept alive if they happen to decode to a live handle. Sweeping frees every
//! white cell, bumps its slot generation and returns the slot to the free list.

use crate::heap::Heap;
use core_types::{CellId, Value};
use std::time::{Duration, Instant};

/// Mark colors for tri-color marking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MarkColor {
    /// Unmarked (not yet visited)
    White = 0,
    /// Reachable, children not yet scanned
    Gray = 1,
    /// Reachable, all references scanned
    Black = 2,
}

/// Cumulative collector statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcStats {
    /// Collections run
    pub collections: u64,
    /// Cells allocated since creation
    pub cells_allocated: u64,
    /// Cells reclaimed since creation
    pub cells_freed: u64,
    /// Bytes reclaimed since creation
    pub bytes_freed: u64,
    /// Time spent in collections
    pub total_pause: Duration,
}

/// Outcome of one collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionSummary {
    /// Cells that survived
    pub live_cells: usize,
    /// Bytes charged to survivors
    pub live_bytes: usize,
    /// Cells reclaimed
    pub freed_cells: usize,
    /// Bytes reclaimed
    pub freed_bytes: usize,
    /// Structures reclaimed; their ids may be handed out again
    pub freed_structures: usize,
}

struct Tracer {
    worklist: Vec<CellId>,
}

impl Tracer {
    fn trace_value(&mut self, heap: &mut Heap, value: Value) {
        if let Some(id) = value.as_cell() {
            self.trace_cell(heap, id);
        }
    }

    fn trace_cell(&mut self, heap: &mut Heap, id: CellId) {
        let Some(slot) = heap.slots.get_mut(id.index() as usize) else {
            return;
        };
        if slot.generation != id.generation() || slot.cell.is_none() {
            return;
        }
        if slot.color == MarkColor::White {
            slot.color = MarkColor::Gray;
            self.worklist.push(id);
        }
    }

    fn drain(&mut self, heap: &mut Heap) {
        while let Some(id) = self.worklist.pop() {
            let mut children = Vec::new();
            if let Some(cell) = heap.cell(id) {
                children.push(heap.structures.get(cell.structure()).prototype());
                children.extend(cell.slots());
                children.extend(cell.payload_references());
            }
            heap.slots[id.index() as usize].color = MarkColor::Black;
            for child in children {
                self.trace_value(heap, child);
            }
        }
    }
}

impl Heap {
    /// Runs a full collection.
    ///
    /// `roots` are precise values held outside the heap. `conservative` are raw
    /// words that may or may not encode values; any that decode to a live cell
    /// keep it alive.
    pub fn collect<R, W>(&mut self, roots: R, conservative: W) -> CollectionSummary
    where
        R: IntoIterator<Item = Value>,
        W: IntoIterator<Item = u64>,
    {
        let start = Instant::now();
        tracing::debug!(
            target: "gc",
            live_cells = self.live_cells,
            live_bytes = self.live_bytes,
            "collection started"
        );

        let mut tracer = Tracer { worklist: Vec::new() };
        for value in roots {
            tracer.trace_value(self, value);
        }
        for word in conservative {
            tracer.trace_value(self, Value::from_bits(word));
        }
        let persistent: Vec<Value> = self.roots.iter().flatten().copied().collect();
        for value in persistent {
            tracer.trace_value(self, value);
        }
        let temporaries = self.temporaries.clone();
        for value in temporaries {
            tracer.trace_value(self, value);
        }
        tracer.drain(self);

        let summary = self.sweep();
        let pause = start.elapsed();
        self.stats.collections += 1;
        self.stats.cells_freed += summary.freed_cells as u64;
        self.stats.bytes_freed += summary.freed_bytes as u64;
        self.stats.total_pause += pause;
        self.next_collection = self.limits.gc_threshold.max(self.live_bytes * 2);

        tracing::debug!(
            target: "gc",
            freed_cells = summary.freed_cells,
            freed_bytes = summary.freed_bytes,
            freed_structures = summary.freed_structures,
            live_cells = summary.live_cells,
            pause_us = pause.as_micros() as u64,
            "collection finished"
        );
        summary
    }

    fn sweep(&mut self) -> CollectionSummary {
        let mut freed_cells = 0;
        let mut freed_bytes = 0;
        let mut in_use = Vec::with_capacity(self.live_cells);
        for index in 0..self.slots.len() {
            let slot = &mut self.slots[index];
            let Some(cell) = &slot.cell else {
                continue;
            };
            if slot.color != MarkColor::White {
                slot.color = MarkColor::White;
                in_use.push(cell.structure());
                continue;
            }
            slot.cell = None;
            freed_cells += 1;
            freed_bytes += slot.bytes;
            slot.bytes = 0;
            // A slot whose generation would wrap is retired instead of reused.
            if slot.generation < u16::MAX {
                slot.generation += 1;
                self.free_list.push(index as u32);
            }
        }
        self.live_cells -= freed_cells;
        self.live_bytes -= freed_bytes;

        let slots = &self.slots;
        let freed_structures = self.structures.sweep(in_use, |prototype| match prototype.as_cell() {
            Some(id) => slots
                .get(id.index() as usize)
                .is_some_and(|slot| slot.generation == id.generation() && slot.cell.is_some()),
            None => true,
        });
        CollectionSummary {
            live_cells: self.live_cells,
            live_bytes: self.live_bytes,
            freed_cells,
            freed_bytes,
            freed_structures,
        }
    }
}
