//! Property access through inline caches
//!
//! Every get/put site carries an index into its code block's property cache
//! table. A hit replays the cached structure/offset pair with a single slot
//! read or write; a miss does the generic lookup and records what it found
//! when the result is cacheable. Dictionary structures are never cached since
//! they change layout in place.

use crate::config::ReadOnlyPolicy;
use crate::inline_cache::PropertyEntry;
use crate::vm::{Unwind, Vm};
use core_types::{format_number, CellId, ErrorKind, Value};
use memory_manager::{Atom, CodeId, PropertyLookup, PutOutcome, StructureId};

/// A property cache site: owning code block and site index
pub type PropertySite = Option<(CodeId, u32)>;

impl Vm {
    fn cached_property(&self, site: PropertySite, structure: StructureId) -> Option<PropertyEntry> {
        if !self.config.inline_caching {
            return None;
        }
        let (code, index) = site?;
        self.codes[code.0 as usize]
            .caches
            .properties
            .get(index as usize)?
            .lookup(structure)
    }

    fn cache_property(&mut self, site: PropertySite, entry: PropertyEntry) {
        if !self.config.inline_caching {
            return;
        }
        let Some((code, index)) = site else {
            return;
        };
        if let Some(cache) = self.codes[code.0 as usize].caches.properties.get_mut(index as usize) {
            let before = cache.state();
            cache.update(entry.guard(), entry);
            let after = cache.state();
            if before != after {
                tracing::trace!(target: "ic", code = code.0, site = index, ?before, ?after, "property cache transition");
            }
        }
    }

    fn is_dictionary(&self, structure: StructureId) -> bool {
        self.heap.structures().get(structure).is_dictionary()
    }

    /// Index names on arrays resolve through the elements before the
    /// structure, so the structure alone cannot guard them
    fn element_backed(&self, id: CellId, name: Atom) -> bool {
        self.heap.atoms().array_index(name).is_some()
            && self
                .heap
                .cell(id)
                .is_some_and(|cell| cell.kind().has_indexed_properties())
    }

    /// Cached or generic named read on a cell
    fn read_cell(&mut self, id: CellId, name: Atom, site: PropertySite) -> PropertyLookup {
        if let Some(structure) = self.heap.structure_of(id) {
            match self.cached_property(site, structure) {
                Some(PropertyEntry::GetOwn { offset, .. }) => {
                    let value = self.heap.read_slot(id, offset);
                    return PropertyLookup::Synthesized(value);
                }
                Some(PropertyEntry::GetProto {
                    holder,
                    holder_structure,
                    offset,
                    ..
                }) if self.heap.structure_of(holder) == Some(holder_structure) => {
                    let value = self.heap.read_slot(holder, offset);
                    return PropertyLookup::Synthesized(value);
                }
                _ => {}
            }
        }

        let lookup = self.heap.lookup_property(id, name);
        if self.element_backed(id, name) {
            return lookup;
        }
        match lookup {
            PropertyLookup::Own { structure, offset, .. } if !self.is_dictionary(structure) => {
                self.cache_property(site, PropertyEntry::GetOwn { structure, offset });
            }
            PropertyLookup::Prototype {
                holder,
                holder_structure,
                offset,
                depth: 1,
                ..
            } => {
                if let Some(structure) = self.heap.structure_of(id) {
                    if !self.is_dictionary(structure) && !self.is_dictionary(holder_structure) {
                        self.cache_property(
                            site,
                            PropertyEntry::GetProto {
                                structure,
                                holder,
                                holder_structure,
                                offset,
                            },
                        );
                    }
                }
            }
            _ => {}
        }
        lookup
    }

    /// `base.name`
    pub fn get_by_id(&mut self, base: Value, name: Atom, site: PropertySite) -> Result<Value, Unwind> {
        let Some(id) = base.as_cell().filter(|id| self.heap.is_live(*id)) else {
            if base.is_nullish() {
                let message = format!(
                    "Cannot read property '{}' of {}",
                    self.heap.atoms().name(name),
                    self.to_display_string(base)
                );
                return Err(self.throw_error(ErrorKind::TypeError, &message));
            }
            return Ok(Value::undefined());
        };
        Ok(self.read_cell(id, name, site).value())
    }

    /// `base.name = value`
    pub fn put_by_id(&mut self, base: Value, name: Atom, value: Value, site: PropertySite) -> Result<(), Unwind> {
        let Some(id) = base.as_cell().filter(|id| self.heap.is_live(*id)) else {
            if base.is_nullish() {
                let message = format!(
                    "Cannot set property '{}' of {}",
                    self.heap.atoms().name(name),
                    self.to_display_string(base)
                );
                return Err(self.throw_error(ErrorKind::TypeError, &message));
            }
            return Ok(());
        };

        if let Some(structure) = self.heap.structure_of(id) {
            match self.cached_property(site, structure) {
                Some(PropertyEntry::Replace { structure, offset }) => {
                    self.heap.write_slot(id, structure, offset, value);
                    return Ok(());
                }
                Some(PropertyEntry::Transition { to, offset, .. }) => {
                    self.heap.write_slot(id, to, offset, value);
                    return Ok(());
                }
                _ => {}
            }
        }

        let outcome = self.heap_write(|heap| heap.set_property(id, name, value))?;
        if outcome == PutOutcome::ReadOnly {
            return self.read_only_write(name);
        }
        if self.element_backed(id, name) {
            return Ok(());
        }
        match outcome {
            PutOutcome::Replaced { structure, offset } if !self.is_dictionary(structure) => {
                self.cache_property(site, PropertyEntry::Replace { structure, offset });
            }
            PutOutcome::Added { from, to, offset } if !self.is_dictionary(from) && !self.is_dictionary(to) => {
                self.cache_property(site, PropertyEntry::Transition { from, to, offset });
            }
            _ => {}
        }
        Ok(())
    }

    fn read_only_write(&mut self, name: Atom) -> Result<(), Unwind> {
        match self.config.read_only_policy {
            ReadOnlyPolicy::Ignore => Ok(()),
            ReadOnlyPolicy::Throw => {
                let message = format!(
                    "Cannot assign to read only property '{}'",
                    self.heap.atoms().name(name)
                );
                Err(self.throw_error(ErrorKind::TypeError, &message))
            }
        }
    }

    /// Property key for a computed access
    pub(crate) fn key_to_atom(&mut self, key: Value) -> Atom {
        if let Some(n) = key.as_number() {
            return self.heap.intern(&format_number(n));
        }
        let text = self.to_display_string(key);
        self.heap.intern(&text)
    }

    /// `base[key]`
    pub fn get_by_val(&mut self, base: Value, key: Value) -> Result<Value, Unwind> {
        if let (Some(id), Some(index)) = (base.as_cell(), key.as_array_index()) {
            if let Some(text) = self.string_value(base) {
                let unit = text.encode_utf16().nth(index as usize);
                return match unit {
                    Some(unit) => self.allocate_string(&String::from_utf16_lossy(&[unit])),
                    None => Ok(Value::undefined()),
                };
            }
            if self.heap.is_live(id) {
                return Ok(self.heap.get_index(id, index));
            }
        }
        let name = self.key_to_atom(key);
        self.get_by_id(base, name, None)
    }

    /// `base[key] = value`
    pub fn put_by_val(&mut self, base: Value, key: Value, value: Value) -> Result<(), Unwind> {
        if let (Some(id), Some(index)) = (self.object_cell(base), key.as_array_index()) {
            let outcome = self.heap_write(|heap| heap.set_index(id, index, value))?;
            if outcome == PutOutcome::ReadOnly {
                let name = self.heap.atoms_mut().intern_index(index);
                return self.read_only_write(name);
            }
            return Ok(());
        }
        let name = self.key_to_atom(key);
        self.put_by_id(base, name, value, None)
    }

    /// `delete base.name`
    pub fn delete_by_id(&mut self, base: Value, name: Atom) -> Result<bool, Unwind> {
        let Some(id) = base.as_cell().filter(|id| self.heap.is_live(*id)) else {
            if base.is_nullish() {
                let message = format!("Cannot delete property of {}", self.to_display_string(base));
                return Err(self.throw_error(ErrorKind::TypeError, &message));
            }
            return Ok(true);
        };
        let deleted = self
            .heap
            .delete_property(id, name)
            .map_err(|error| self.property_error(error))?;
        if !deleted && self.config.read_only_policy == ReadOnlyPolicy::Throw {
            let message = format!("Cannot delete property '{}'", self.heap.atoms().name(name));
            return Err(self.throw_error(ErrorKind::TypeError, &message));
        }
        Ok(deleted)
    }

    /// `key in base`
    pub fn has_in(&mut self, key: Value, base: Value) -> Result<bool, Unwind> {
        let Some(id) = self.object_cell(base) else {
            let message = format!(
                "Cannot use 'in' operator to search for '{}' in {}",
                self.to_display_string(key),
                self.to_display_string(base)
            );
            return Err(self.throw_error(ErrorKind::TypeError, &message));
        };
        let name = self.key_to_atom(key);
        Ok(self.heap.has_property(id, name))
    }

    /// `value instanceof constructor`
    pub fn instance_of(&mut self, value: Value, constructor: Value) -> Result<bool, Unwind> {
        let callable = self
            .heap
            .cell_of(constructor)
            .map(|cell| cell.kind().is_callable())
            .unwrap_or(false);
        if !callable {
            return Err(self.throw_error(
                ErrorKind::TypeError,
                "Right-hand side of 'instanceof' is not callable",
            ));
        }
        let Some(object) = self.object_cell(value) else {
            return Ok(false);
        };
        let prototype = self.get_by_id(constructor, self.names.prototype, None)?;
        let Some(prototype) = self.object_cell(prototype) else {
            return Err(self.throw_error(
                ErrorKind::TypeError,
                "Function has non-object prototype in instanceof check",
            ));
        };
        let mut current = self.heap.prototype_of(object);
        while let Some(link) = current.as_cell() {
            if link == prototype {
                return Ok(true);
            }
            current = self.heap.prototype_of(link);
        }
        Ok(false)
    }

    /// Read a global variable; missing names are a ReferenceError
    pub fn get_global_by_id(&mut self, name: Atom, site: PropertySite) -> Result<Value, Unwind> {
        let global = self.intrinsics.global;
        match self.read_cell(global, name, site) {
            PropertyLookup::Missing => {
                let message = format!("{} is not defined", self.heap.atoms().name(name));
                Err(self.throw_error(ErrorKind::ReferenceError, &message))
            }
            found => Ok(found.value()),
        }
    }

    /// Write a global variable, creating it when missing
    pub fn put_global_by_id(&mut self, name: Atom, value: Value, site: PropertySite) -> Result<(), Unwind> {
        let global = self.global_object();
        self.put_by_id(global, name, value, site)
    }
}
