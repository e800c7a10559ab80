//! Structures (shapes) and the transition graph.
//!
//! A [`Structure`] maps property names to storage offsets. Objects that gained
//! the same properties, with the same attributes, in the same order, from the
//! same root share one structure, so an inline cache can compare structure ids
//! instead of looking names up.
//!
//! Shared structures are never mutated after they are published. Objects that
//! delete properties, change attributes, or accumulate too long a transition
//! chain move to a *dictionary* structure that belongs to that object alone
//! and is mutated in place; caches never record dictionary structures.
//!
//! The collector reclaims structures that no surviving cell uses, directly or
//! as an ancestor in its transition chain. Reclaimed ids are handed out again,
//! so anything holding a [`StructureId`] across a collection must check
//! [`StructureTable::is_live`] first.

use crate::atoms::Atom;
use crate::object::CellKind;
use core_types::Value;
use std::collections::HashMap;

/// Longest chain of shared add-property transitions before an object is
/// moved to dictionary mode.
pub const MAX_TRANSITION_LENGTH: u32 = 64;

/// Identifier of a structure in the [`StructureTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StructureId(u32);

impl StructureId {
    /// Raw table index.
    pub fn index(self) -> u32 {
        self.0
    }
}

/// Property attribute flags.
///
/// The default is a writable, enumerable, deletable data property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PropertyAttributes(u8);

impl PropertyAttributes {
    /// Writable, enumerable, deletable
    pub const NONE: PropertyAttributes = PropertyAttributes(0);
    /// Writes are rejected
    pub const READ_ONLY: PropertyAttributes = PropertyAttributes(1);
    /// Skipped by key enumeration
    pub const DONT_ENUM: PropertyAttributes = PropertyAttributes(2);
    /// Deletes are rejected
    pub const DONT_DELETE: PropertyAttributes = PropertyAttributes(4);

    /// Whether every flag in `other` is set.
    pub fn contains(self, other: PropertyAttributes) -> bool {
        self.0 & other.0 == other.0
    }

    /// Union of two flag sets.
    pub fn union(self, other: PropertyAttributes) -> PropertyAttributes {
        PropertyAttributes(self.0 | other.0)
    }

    /// True unless `READ_ONLY` is set.
    pub fn is_writable(self) -> bool {
        !self.contains(Self::READ_ONLY)
    }

    /// True unless `DONT_ENUM` is set.
    pub fn is_enumerable(self) -> bool {
        !self.contains(Self::DONT_ENUM)
    }

    /// True unless `DONT_DELETE` is set.
    pub fn is_deletable(self) -> bool {
        !self.contains(Self::DONT_DELETE)
    }
}

impl std::ops::BitOr for PropertyAttributes {
    type Output = PropertyAttributes;

    fn bitor(self, rhs: PropertyAttributes) -> PropertyAttributes {
        self.union(rhs)
    }
}

/// Where a property lives and how it may be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertySlot {
    /// Storage offset (inline slots first, then overflow)
    pub offset: u32,
    /// Attribute flags
    pub attributes: PropertyAttributes,
}

/// A shape descriptor.
#[derive(Debug, Clone)]
pub struct Structure {
    id: StructureId,
    kind: CellKind,
    prototype: Value,
    /// Properties in insertion order
    properties: Vec<(Atom, PropertySlot)>,
    index: HashMap<Atom, usize>,
    previous: Option<StructureId>,
    transition_count: u32,
    dictionary: bool,
    slot_count: u32,
    free_offsets: Vec<u32>,
    reclaimed: bool,
}

impl Structure {
    fn root(id: StructureId, kind: CellKind, prototype: Value) -> Self {
        Structure {
            id,
            kind,
            prototype,
            properties: Vec::new(),
            index: HashMap::new(),
            previous: None,
            transition_count: 0,
            dictionary: false,
            slot_count: 0,
            free_offsets: Vec::new(),
            reclaimed: false,
        }
    }

    /// This structure's id.
    pub fn id(&self) -> StructureId {
        self.id
    }

    /// Cell kind every object with this structure has.
    pub fn kind(&self) -> CellKind {
        self.kind
    }

    /// Prototype shared by every object with this structure.
    pub fn prototype(&self) -> Value {
        self.prototype
    }

    /// Structure this one was derived from by a transition.
    pub fn previous(&self) -> Option<StructureId> {
        self.previous
    }

    /// Whether this structure is an unshared dictionary.
    pub fn is_dictionary(&self) -> bool {
        self.dictionary
    }

    /// Number of add-property transitions from the root.
    pub fn transition_count(&self) -> u32 {
        self.transition_count
    }

    /// Number of storage slots objects with this structure need.
    pub fn slot_count(&self) -> u32 {
        self.slot_count
    }

    /// Number of properties.
    pub fn property_count(&self) -> usize {
        self.properties.len()
    }

    /// Resolves a property name to its slot.
    pub fn lookup(&self, name: Atom) -> Option<PropertySlot> {
        self.index.get(&name).map(|position| self.properties[*position].1)
    }

    /// Properties in insertion order.
    pub fn properties(&self) -> impl Iterator<Item = (Atom, PropertySlot)> + '_ {
        self.properties.iter().copied()
    }

    fn insert(&mut self, name: Atom, attributes: PropertyAttributes) -> u32 {
        let offset = match self.free_offsets.pop() {
            Some(offset) => offset,
            None => {
                let offset = self.slot_count;
                self.slot_count += 1;
                offset
            }
        };
        self.index.insert(name, self.properties.len());
        self.properties.push((name, PropertySlot { offset, attributes }));
        offset
    }

    fn reclaim(&mut self) {
        self.properties = Vec::new();
        self.index = HashMap::new();
        self.free_offsets = Vec::new();
        self.prototype = Value::undefined();
        self.previous = None;
        self.slot_count = 0;
        self.dictionary = false;
        self.reclaimed = true;
    }

    fn remove(&mut self, name: Atom) -> Option<PropertySlot> {
        let position = self.index.remove(&name)?;
        let (_, slot) = self.properties.remove(position);
        for (_, later) in self.index.iter_mut() {
            if *later > position {
                *later -= 1;
            }
        }
        self.free_offsets.push(slot.offset);
        Some(slot)
    }
}

/// Owner of every structure and of the transition edges between them.
///
/// # Example
///
/// ```
/// use memory_manager::{AtomTable, CellKind, PropertyAttributes, StructureTable};
/// use core_types::Value;
///
/// let mut atoms = AtomTable::new();
/// let mut table = StructureTable::new();
/// let x = atoms.intern("x");
///
/// let root = table.root(CellKind::Object, Value::null());
/// let (a, offset) = table.add_property_transition(root, x, PropertyAttributes::NONE);
/// let (b, _) = table.add_property_transition(root, x, PropertyAttributes::NONE);
/// assert_eq!(a, b);
/// assert_eq!(offset, 0);
/// ```
#[derive(Debug, Default)]
pub struct StructureTable {
    structures: Vec<Structure>,
    roots: HashMap<(CellKind, u64), StructureId>,
    add_transitions: HashMap<(StructureId, Atom, PropertyAttributes), StructureId>,
    prototype_transitions: HashMap<(StructureId, u64), StructureId>,
    free: Vec<StructureId>,
}

impl StructureTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Borrows a structure.
    ///
    /// # Panics
    ///
    /// Panics if `id` did not come from this table.
    pub fn get(&self, id: StructureId) -> &Structure {
        &self.structures[id.0 as usize]
    }

    /// Number of structure slots, including reclaimed ones awaiting reuse.
    pub fn len(&self) -> usize {
        self.structures.len()
    }

    /// Number of structures not reclaimed.
    pub fn live_count(&self) -> usize {
        self.structures.len() - self.free.len()
    }

    /// Whether `id` names a structure that has not been reclaimed.
    pub fn is_live(&self, id: StructureId) -> bool {
        self.structures
            .get(id.0 as usize)
            .is_some_and(|structure| !structure.reclaimed)
    }

    /// True when no structure exists.
    pub fn is_empty(&self) -> bool {
        self.structures.is_empty()
    }

    /// Resolves `name` on a structure.
    pub fn lookup(&self, id: StructureId, name: Atom) -> Option<PropertySlot> {
        self.get(id).lookup(name)
    }

    /// The interned empty structure for `(kind, prototype)`.
    pub fn root(&mut self, kind: CellKind, prototype: Value) -> StructureId {
        let key = (kind, prototype.to_bits());
        if let Some(id) = self.roots.get(&key) {
            return *id;
        }
        let id = self.push(|id| Structure::root(id, kind, prototype));
        self.roots.insert(key, id);
        id
    }

    /// Structure reached by adding `name` with `attributes`, plus the new slot offset.
    ///
    /// Shared structures intern the edge so repeated requests return the same
    /// target. Dictionaries are extended in place.
    pub fn add_property_transition(
        &mut self,
        from: StructureId,
        name: Atom,
        attributes: PropertyAttributes,
    ) -> (StructureId, u32) {
        debug_assert!(self.lookup(from, name).is_none(), "property already present");

        if self.get(from).dictionary {
            let offset = self.structures[from.0 as usize].insert(name, attributes);
            return (from, offset);
        }

        if let Some(target) = self.add_transitions.get(&(from, name, attributes)) {
            let offset = self.get(*target).lookup(name).map(|slot| slot.offset);
            debug_assert!(offset.is_some(), "transition target lost its property");
            return (*target, offset.unwrap_or(0));
        }

        if self.get(from).transition_count >= MAX_TRANSITION_LENGTH {
            let dictionary = self.to_dictionary(from);
            let offset = self.structures[dictionary.0 as usize].insert(name, attributes);
            return (dictionary, offset);
        }

        let mut next = self.get(from).clone();
        next.previous = Some(from);
        next.transition_count += 1;
        let offset = next.insert(name, attributes);
        let id = self.push(move |id| {
            next.id = id;
            next
        });
        self.add_transitions.insert((from, name, attributes), id);
        tracing::trace!(target: "structure", from = from.0, to = id.0, "add property transition");
        (id, offset)
    }

    /// Structure reached by deleting `name`; always a dictionary.
    ///
    /// Returns the freed slot alongside the structure so the caller can clear it.
    pub fn remove_property_transition(
        &mut self,
        from: StructureId,
        name: Atom,
    ) -> (StructureId, Option<PropertySlot>) {
        let id = if self.get(from).dictionary {
            from
        } else {
            self.to_dictionary(from)
        };
        let removed = self.structures[id.0 as usize].remove(name);
        (id, removed)
    }

    /// Structure with the same layout as `from` and a different prototype.
    pub fn change_prototype_transition(&mut self, from: StructureId, prototype: Value) -> StructureId {
        if self.get(from).dictionary {
            self.structures[from.0 as usize].prototype = prototype;
            return from;
        }
        let key = (from, prototype.to_bits());
        if let Some(target) = self.prototype_transitions.get(&key) {
            return *target;
        }
        let mut next = self.get(from).clone();
        next.previous = Some(from);
        next.prototype = prototype;
        let id = self.push(move |id| {
            next.id = id;
            next
        });
        self.prototype_transitions.insert(key, id);
        id
    }

    /// Structure in which `name` carries `attributes`; always a dictionary.
    pub fn attribute_change_transition(
        &mut self,
        from: StructureId,
        name: Atom,
        attributes: PropertyAttributes,
    ) -> StructureId {
        let id = if self.get(from).dictionary {
            from
        } else {
            self.to_dictionary(from)
        };
        let structure = &mut self.structures[id.0 as usize];
        if let Some(position) = structure.index.get(&name).copied() {
            structure.properties[position].1.attributes = attributes;
        }
        id
    }

    /// An unshared copy of `from` in dictionary mode.
    pub fn to_dictionary(&mut self, from: StructureId) -> StructureId {
        let mut copy = self.get(from).clone();
        copy.previous = Some(from);
        copy.dictionary = true;
        let id = self.push(move |id| {
            copy.id = id;
            copy
        });
        tracing::trace!(target: "structure", from = from.0, to = id.0, "dictionary transition");
        id
    }

    /// Reclaims every structure no surviving cell can reach.
    ///
    /// `in_use` are the structures of the cells that survived marking. Those
    /// are kept together with every structure they were derived from, and so
    /// is the root of each prototype `prototype_alive` accepts. Everything
    /// else returns to the free pool, and interned roots and transition edges
    /// that mention a reclaimed structure or a dead prototype are forgotten.
    ///
    /// Returns the number of structures reclaimed.
    pub fn sweep<I, F>(&mut self, in_use: I, prototype_alive: F) -> usize
    where
        I: IntoIterator<Item = StructureId>,
        F: Fn(Value) -> bool,
    {
        let mut keep = vec![false; self.structures.len()];
        for id in in_use {
            keep[id.0 as usize] = true;
        }
        for (&(_, prototype), id) in &self.roots {
            if prototype_alive(Value::from_bits(prototype)) {
                keep[id.0 as usize] = true;
            }
        }
        for index in 0..self.structures.len() {
            if !keep[index] {
                continue;
            }
            let mut previous = self.structures[index].previous;
            while let Some(id) = previous {
                if keep[id.0 as usize] {
                    break;
                }
                keep[id.0 as usize] = true;
                previous = self.structures[id.0 as usize].previous;
            }
        }

        let mut reclaimed = 0;
        for (index, structure) in self.structures.iter_mut().enumerate() {
            if keep[index] || structure.reclaimed {
                continue;
            }
            structure.reclaim();
            self.free.push(structure.id);
            reclaimed += 1;
        }

        self.roots
            .retain(|&(_, prototype), id| keep[id.0 as usize] && prototype_alive(Value::from_bits(prototype)));
        self.add_transitions
            .retain(|(from, _, _), to| keep[from.0 as usize] && keep[to.0 as usize]);
        self.prototype_transitions.retain(|&(from, prototype), to| {
            keep[from.0 as usize] && keep[to.0 as usize] && prototype_alive(Value::from_bits(prototype))
        });

        if reclaimed > 0 {
            tracing::debug!(target: "structure", reclaimed, live = self.live_count(), "structures reclaimed");
        }
        reclaimed
    }

    fn push(&mut self, build: impl FnOnce(StructureId) -> Structure) -> StructureId {
        match self.free.pop() {
            Some(id) => {
                self.structures[id.0 as usize] = build(id);
                id
            }
            None => {
                let id = StructureId(self.structures.len() as u32);
                self.structures.push(build(id));
                id
            }
        }
    }
}
