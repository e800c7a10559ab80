//! Generation-checked handles to heap cells.

use serde::{Deserialize, Serialize};

/// Handle to a cell in the managed heap.
///
/// A handle is an arena index plus the generation of the slot at the time the
/// cell was allocated. When the collector frees a slot it bumps the slot's
/// generation, so handles that outlive their cell are detected instead of
/// silently aliasing a newer allocation.
///
/// Handles pack into 48 bits so they fit inside a NaN-boxed [`Value`](crate::Value).
///
/// # Examples
///
/// ```
/// use core_types::CellId;
///
/// let id = CellId::new(7, 3);
/// assert_eq!(id.index(), 7);
/// assert_eq!(id.generation(), 3);
/// assert_eq!(CellId::from_payload(id.to_payload()), id);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellId {
    index: u32,
    generation: u16,
}

impl CellId {
    /// Creates a handle from an arena index and slot generation.
    pub const fn new(index: u32, generation: u16) -> Self {
        Self { index, generation }
    }

    /// Arena slot index.
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Generation of the slot when this handle was issued.
    pub const fn generation(self) -> u16 {
        self.generation
    }

    /// Packs the handle into the low 48 bits of a word.
    pub const fn to_payload(self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }

    /// Unpacks a handle from the low 48 bits of a word.
    pub const fn from_payload(payload: u64) -> Self {
        Self {
            index: payload as u32,
            generation: (payload >> 32) as u16,
        }
    }
}

impl std::fmt::Display for CellId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}
