//! Property access on heap cells.
//!
//! Named properties resolve through the cell's structure, then up the
//! prototype chain. Arrays keep a dense element vector for in-bounds indices
//! and fall back to named properties for anything else. `length` on arrays and
//! strings is synthesized rather than stored.
//!
//! An array index lives in exactly one place: a filled dense element, or a
//! named slot behind a hole or past the end. A write that lands in the dense
//! range moves a plain named slot for the same index into the elements; a
//! slot defined with attributes keeps receiving the writes.

use crate::atoms::Atom;
use crate::heap::Heap;
use crate::object::{CellData, CellKind};
use crate::structure::{PropertyAttributes, PropertySlot, StructureId};
use core_types::{CellId, Value};

/// Longest prototype chain accepted by [`Heap::set_prototype`].
pub const MAX_PROTOTYPE_CHAIN: usize = 10_000;

/// Where a property read was satisfied.
///
/// The structure and offset fields are exactly what an inline cache needs to
/// repeat the access without a lookup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PropertyLookup {
    /// Stored on the receiver itself
    Own {
        /// Receiver structure at the time of the lookup
        structure: StructureId,
        /// Slot offset
        offset: u32,
        /// Attribute flags
        attributes: PropertyAttributes,
        /// Current value
        value: Value,
    },
    /// Stored on an object up the prototype chain
    Prototype {
        /// Object that holds the property
        holder: CellId,
        /// Holder structure at the time of the lookup
        holder_structure: StructureId,
        /// Slot offset on the holder
        offset: u32,
        /// Number of prototype links walked (1 = direct prototype)
        depth: usize,
        /// Current value
        value: Value,
    },
    /// Computed or element value (array length, string length, dense element)
    Synthesized(Value),
    /// Not found anywhere on the chain
    Missing,
}

impl PropertyLookup {
    /// The value read, undefined when missing.
    pub fn value(&self) -> Value {
        match self {
            PropertyLookup::Own { value, .. } | PropertyLookup::Prototype { value, .. } => *value,
            PropertyLookup::Synthesized(value) => *value,
            PropertyLookup::Missing => Value::undefined(),
        }
    }
}

/// Result of a property write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// An existing own slot was overwritten
    Replaced {
        /// Structure of the receiver (unchanged)
        structure: StructureId,
        /// Slot offset written
        offset: u32,
    },
    /// A new property was added through a structure transition
    Added {
        /// Structure before the write
        from: StructureId,
        /// Structure after the write
        to: StructureId,
        /// Slot offset written
        offset: u32,
    },
    /// The write went to dense elements or a synthesized property
    Element,
    /// The target is read-only; nothing was written
    ReadOnly,
}

/// Failures of structural property operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PropertyError {
    /// The handle no longer names a live cell
    #[error("stale cell handle")]
    StaleHandle,
    /// Setting the prototype would make the chain cyclic
    #[error("cyclic prototype chain")]
    PrototypeCycle,
    /// Setting the prototype would exceed the chain limit
    #[error("prototype chain too long")]
    PrototypeChainTooLong,
    /// Prototypes must be objects or null
    #[error("prototype must be an object or null")]
    InvalidPrototype,
    /// Array length must be a valid array index
    #[error("invalid array length")]
    InvalidArrayLength,
    /// Growing element storage would pass the heap's hard limit
    #[error("out of memory")]
    OutOfMemory,
}

impl Heap {
    /// Resolves `name` on `id` and its prototype chain.
    pub fn lookup_property(&self, id: CellId, name: Atom) -> PropertyLookup {
        let Some(cell) = self.cell(id) else {
            return PropertyLookup::Missing;
        };
        if let Some(value) = self.synthesized_property(id, name) {
            return PropertyLookup::Synthesized(value);
        }
        let structure = cell.structure();
        if let Some(slot) = self.structures.lookup(structure, name) {
            return PropertyLookup::Own {
                structure,
                offset: slot.offset,
                attributes: slot.attributes,
                value: cell.slot(slot.offset),
            };
        }

        let mut current = self.structures.get(structure).prototype();
        let mut depth = 1;
        while let Some(holder) = current.as_cell() {
            let Some(holder_cell) = self.cell(holder) else {
                break;
            };
            if let Some(value) = self.synthesized_property(holder, name) {
                return PropertyLookup::Synthesized(value);
            }
            let holder_structure = holder_cell.structure();
            if let Some(slot) = self.structures.lookup(holder_structure, name) {
                return PropertyLookup::Prototype {
                    holder,
                    holder_structure,
                    offset: slot.offset,
                    depth,
                    value: holder_cell.slot(slot.offset),
                };
            }
            current = self.structures.get(holder_structure).prototype();
            depth += 1;
            debug_assert!(depth <= MAX_PROTOTYPE_CHAIN + 1, "prototype chain invariant broken");
        }
        PropertyLookup::Missing
    }

    /// Reads `name`, returning undefined when it is not found.
    pub fn get_property(&self, id: CellId, name: Atom) -> Value {
        self.lookup_property(id, name).value()
    }

    /// Whether `name` resolves on `id` or its prototype chain.
    pub fn has_property(&self, id: CellId, name: Atom) -> bool {
        !matches!(self.lookup_property(id, name), PropertyLookup::Missing)
    }

    /// Whether `name` is an own property of `id`.
    pub fn has_own_property(&self, id: CellId, name: Atom) -> bool {
        self.synthesized_property(id, name).is_some()
            || self
                .cell(id)
                .and_then(|cell| self.structures.lookup(cell.structure(), name))
                .is_some()
    }

    /// Writes `name`, adding it through a structure transition if absent.
    ///
    /// Only own attributes are consulted; an inherited read-only property does
    /// not block creating an own one.
    pub fn set_property(&mut self, id: CellId, name: Atom, value: Value) -> Result<PutOutcome, PropertyError> {
        let cell = self.cell(id).ok_or(PropertyError::StaleHandle)?;
        match cell.kind() {
            CellKind::Array => {
                if let Some(index) = self.atoms.array_index(name) {
                    return self.set_index(id, index, value);
                }
                if self.atoms.name(name) == "length" {
                    return self.set_array_length(id, value).map(|_| PutOutcome::Element);
                }
            }
            CellKind::String => {
                if self.synthesized_property(id, name).is_some() {
                    return Ok(PutOutcome::ReadOnly);
                }
            }
            _ => {}
        }
        self.put_named(id, name, value, PropertyAttributes::NONE)
    }

    fn put_named(
        &mut self,
        id: CellId,
        name: Atom,
        value: Value,
        attributes: PropertyAttributes,
    ) -> Result<PutOutcome, PropertyError> {
        let structure = self.cell(id).ok_or(PropertyError::StaleHandle)?.structure();
        if let Some(slot) = self.structures.lookup(structure, name) {
            if !slot.attributes.is_writable() {
                return Ok(PutOutcome::ReadOnly);
            }
            if let Some(cell) = self.cell_mut(id) {
                cell.set_slot(slot.offset, value);
            }
            return Ok(PutOutcome::Replaced {
                structure,
                offset: slot.offset,
            });
        }

        let (to, offset) = self.structures.add_property_transition(structure, name, attributes);
        if let Some(cell) = self.cell_mut(id) {
            cell.structure = to;
            cell.set_slot(offset, value);
        }
        self.refresh_footprint(id);
        Ok(PutOutcome::Added {
            from: structure,
            to,
            offset,
        })
    }

    /// Defines or redefines an own property with explicit attributes.
    ///
    /// Redefinition ignores the read-only flag; changing attributes of an
    /// existing property moves the object to a dictionary structure.
    pub fn define_property(
        &mut self,
        id: CellId,
        name: Atom,
        value: Value,
        attributes: PropertyAttributes,
    ) -> Result<(), PropertyError> {
        let structure = self.cell(id).ok_or(PropertyError::StaleHandle)?.structure();
        if let Some(index) = self.atoms.array_index(name) {
            if let Some(element) = self
                .cell_mut(id)
                .and_then(|cell| cell.as_elements_mut())
                .and_then(|elements| elements.get_mut(index as usize))
            {
                *element = Value::empty();
            }
        }
        match self.structures.lookup(structure, name) {
            Some(slot) => {
                let structure = if slot.attributes == attributes {
                    structure
                } else {
                    self.structures.attribute_change_transition(structure, name, attributes)
                };
                if let Some(cell) = self.cell_mut(id) {
                    cell.structure = structure;
                    cell.set_slot(slot.offset, value);
                }
            }
            None => {
                self.put_named(id, name, value, attributes)?;
            }
        }
        Ok(())
    }

    /// Deletes an own property. Returns false if it is not deletable.
    pub fn delete_property(&mut self, id: CellId, name: Atom) -> Result<bool, PropertyError> {
        let cell = self.cell(id).ok_or(PropertyError::StaleHandle)?;
        let structure = cell.structure();
        if let Some(index) = self.atoms.array_index(name) {
            if let Some(element) = self
                .cell_mut(id)
                .and_then(|cell| cell.as_elements_mut())
                .and_then(|elements| elements.get_mut(index as usize))
                .filter(|element| !element.is_empty())
            {
                *element = Value::empty();
                return Ok(true);
            }
        }
        if self.synthesized_property(id, name).is_some() {
            return Ok(false);
        }
        let Some(slot) = self.structures.lookup(structure, name) else {
            return Ok(true);
        };
        if !slot.attributes.is_deletable() {
            return Ok(false);
        }
        self.remove_own(id, structure, name);
        Ok(true)
    }

    fn remove_own(&mut self, id: CellId, structure: StructureId, name: Atom) {
        let (to, removed) = self.structures.remove_property_transition(structure, name);
        if let Some(cell) = self.cell_mut(id) {
            cell.structure = to;
            if let Some(removed) = removed {
                cell.set_slot(removed.offset, Value::undefined());
            }
        }
    }

    /// Enumerable own property names: dense indices first, then insertion order.
    pub fn own_keys(&mut self, id: CellId) -> Vec<Atom> {
        let Some(cell) = self.cell(id) else {
            return Vec::new();
        };
        let indices: Vec<u32> = match cell.as_elements() {
            Some(elements) => elements
                .iter()
                .enumerate()
                .filter(|(_, value)| !value.is_empty())
                .map(|(index, _)| index as u32)
                .collect(),
            None => Vec::new(),
        };
        let named: Vec<Atom> = self
            .structures
            .get(cell.structure())
            .properties()
            .filter(|(_, slot)| slot.attributes.is_enumerable())
            .map(|(name, _)| name)
            .collect();
        let mut keys: Vec<Atom> = indices
            .into_iter()
            .map(|index| self.atoms.intern_index(index))
            .collect();
        keys.extend(named);
        keys
    }

    /// The prototype of `id`, null when it has none.
    pub fn prototype_of(&self, id: CellId) -> Value {
        self.cell(id)
            .map(|cell| self.structures.get(cell.structure()).prototype())
            .unwrap_or(Value::null())
    }

    /// Replaces the prototype of `id`.
    ///
    /// # Errors
    ///
    /// Rejects non-object prototypes, chains that would loop back to `id`, and
    /// chains longer than [`MAX_PROTOTYPE_CHAIN`].
    pub fn set_prototype(&mut self, id: CellId, prototype: Value) -> Result<(), PropertyError> {
        let structure = self.cell(id).ok_or(PropertyError::StaleHandle)?.structure();
        if !prototype.is_null() {
            let proto_cell = self.cell_of(prototype).ok_or(PropertyError::InvalidPrototype)?;
            if !proto_cell.kind().is_object() {
                return Err(PropertyError::InvalidPrototype);
            }
        }

        let mut current = prototype;
        let mut length = 0;
        while let Some(link) = current.as_cell() {
            if link == id {
                return Err(PropertyError::PrototypeCycle);
            }
            length += 1;
            if length > MAX_PROTOTYPE_CHAIN {
                return Err(PropertyError::PrototypeChainTooLong);
            }
            current = self.prototype_of(link);
        }

        let to = self.structures.change_prototype_transition(structure, prototype);
        if let Some(cell) = self.cell_mut(id) {
            cell.structure = to;
        }
        Ok(())
    }

    /// Reads an element. In-bounds dense elements take the fast path.
    pub fn get_index(&mut self, id: CellId, index: u32) -> Value {
        if let Some(elements) = self.cell(id).and_then(|cell| cell.as_elements()) {
            if let Some(value) = elements.get(index as usize) {
                if !value.is_empty() {
                    return *value;
                }
            }
        }
        let name = self.atoms.intern_index(index);
        self.get_property(id, name)
    }

    /// Writes an element. Appends at `len`; other out-of-bounds indices are
    /// stored as named properties.
    ///
    /// # Errors
    ///
    /// [`PropertyError::OutOfMemory`] if appending would grow the element
    /// vector past the heap's hard limit. Nothing is written in that case.
    pub fn set_index(&mut self, id: CellId, index: u32, value: Value) -> Result<PutOutcome, PropertyError> {
        let cell = self.cell(id).ok_or(PropertyError::StaleHandle)?;
        let position = index as usize;
        let Some((length, capacity, filled)) = cell.as_elements().map(|elements| {
            let filled = elements.get(position).is_some_and(|element| !element.is_empty());
            (elements.len(), elements.capacity(), filled)
        }) else {
            if cell.kind() == CellKind::String {
                return Ok(PutOutcome::ReadOnly);
            }
            let name = self.atoms.intern_index(index);
            return self.put_named(id, name, value, PropertyAttributes::NONE);
        };
        if position > length {
            let name = self.atoms.intern_index(index);
            return self.put_named(id, name, value, PropertyAttributes::NONE);
        }

        let named = if filled { None } else { self.named_index(id, index) };
        if let Some((name, slot)) = named {
            if slot.attributes != PropertyAttributes::NONE {
                return self.put_named(id, name, value, PropertyAttributes::NONE);
            }
        }
        let grow_to = (position == length && length == capacity).then(|| (capacity * 2).max(4));
        if let Some(grown) = grow_to {
            self.reserve_bytes((grown - capacity) * std::mem::size_of::<Value>())?;
        }
        if let Some((name, _)) = named {
            let structure = self.cell(id).ok_or(PropertyError::StaleHandle)?.structure();
            self.remove_own(id, structure, name);
        }

        let elements = self
            .cell_mut(id)
            .and_then(|cell| cell.as_elements_mut())
            .ok_or(PropertyError::StaleHandle)?;
        if position < length {
            elements[position] = value;
            return Ok(PutOutcome::Element);
        }
        if let Some(grown) = grow_to {
            elements.reserve_exact(grown - length);
        }
        elements.push(value);
        self.refresh_footprint(id);
        Ok(PutOutcome::Element)
    }

    /// Length of a dense array.
    pub fn array_length(&self, id: CellId) -> Option<u32> {
        self.cell(id)
            .and_then(|cell| cell.as_elements())
            .map(|elements| elements.len() as u32)
    }

    fn set_array_length(&mut self, id: CellId, length: Value) -> Result<(), PropertyError> {
        let length = length.as_array_index().ok_or(PropertyError::InvalidArrayLength)? as usize;
        let Some((current, capacity)) = self
            .cell(id)
            .and_then(|cell| cell.as_elements())
            .map(|elements| (elements.len(), elements.capacity()))
        else {
            return Ok(());
        };
        if length > capacity {
            self.reserve_bytes((length - capacity).saturating_mul(std::mem::size_of::<Value>()))?;
        }
        if let Some(elements) = self.cell_mut(id).and_then(|cell| cell.as_elements_mut()) {
            if length > current {
                elements.reserve_exact(length - current);
            }
            elements.resize(length, Value::empty());
        }
        self.refresh_footprint(id);
        Ok(())
    }

    fn reserve_bytes(&self, additional: usize) -> Result<(), PropertyError> {
        match self.live_bytes.checked_add(additional) {
            Some(total) if total <= self.limits.max_bytes => Ok(()),
            _ => {
                tracing::debug!(
                    target: "gc",
                    additional,
                    live_bytes = self.live_bytes,
                    limit = self.limits.max_bytes,
                    "element storage over budget"
                );
                Err(PropertyError::OutOfMemory)
            }
        }
    }

    /// Named slot holding `index` on an array, if the index was stored
    /// outside the dense elements.
    fn named_index(&self, id: CellId, index: u32) -> Option<(Atom, PropertySlot)> {
        let name = self.atoms.get(&index.to_string())?;
        let structure = self.cell(id)?.structure();
        self.structures.lookup(structure, name).map(|slot| (name, slot))
    }

    /// Reads an own slot by offset; the inline-cache fast path.
    pub fn read_slot(&self, id: CellId, offset: u32) -> Value {
        self.cell(id).map(|cell| cell.slot(offset)).unwrap_or_default()
    }

    /// Writes an own slot by offset, optionally switching structure; the
    /// inline-cache fast path for replace and add-transition puts.
    pub fn write_slot(&mut self, id: CellId, structure: StructureId, offset: u32, value: Value) {
        let grew = match self.cell_mut(id) {
            Some(cell) => {
                let grew = cell.structure != structure;
                cell.structure = structure;
                cell.set_slot(offset, value);
                grew
            }
            None => false,
        };
        if grew {
            self.refresh_footprint(id);
        }
    }

    /// Structure of a live cell.
    pub fn structure_of(&self, id: CellId) -> Option<StructureId> {
        self.cell(id).map(|cell| cell.structure())
    }

    fn synthesized_property(&self, id: CellId, name: Atom) -> Option<Value> {
        let cell = self.cell(id)?;
        match &cell.data {
            CellData::Array(elements) => {
                if let Some(index) = self.atoms.array_index(name) {
                    return elements
                        .get(index as usize)
                        .filter(|value| !value.is_empty())
                        .copied();
                }
                (self.atoms.name(name) == "length").then(|| Value::number(elements.len() as f64))
            }
            CellData::String(text) => {
                (self.atoms.name(name) == "length").then(|| Value::number(text.encode_utf16().count() as f64))
            }
            _ => None,
        }
    }
}
