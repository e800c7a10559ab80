//! Inline caching system for property access and calls
//!
//! Provides mono/poly/megamorphic caching states per bytecode site. Entries are
//! keyed by structure identity, so an object whose structure changed simply
//! stops matching and takes the generic path.

use arrayvec::ArrayVec;
use core_types::CellId;
use memory_manager::{CallTarget, StructureId};

/// Entries a site holds before it gives up and goes megamorphic
pub const POLYMORPHIC_CACHE_SIZE: usize = 4;

/// What a property site remembers about one structure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyEntry {
    /// Own data property read
    GetOwn {
        /// Receiver structure
        structure: StructureId,
        /// Slot offset
        offset: u32,
    },
    /// Read satisfied by the receiver's direct prototype
    GetProto {
        /// Receiver structure
        structure: StructureId,
        /// Prototype holding the property
        holder: CellId,
        /// Holder structure at caching time
        holder_structure: StructureId,
        /// Slot offset on the holder
        offset: u32,
    },
    /// Overwrite of an existing writable slot
    Replace {
        /// Receiver structure
        structure: StructureId,
        /// Slot offset
        offset: u32,
    },
    /// Property addition through a structure transition
    Transition {
        /// Structure before the write
        from: StructureId,
        /// Structure after the write
        to: StructureId,
        /// Slot offset written
        offset: u32,
    },
}

impl PropertyEntry {
    /// The receiver structure this entry is guarded by
    pub fn guard(&self) -> StructureId {
        match *self {
            PropertyEntry::GetOwn { structure, .. }
            | PropertyEntry::GetProto { structure, .. }
            | PropertyEntry::Replace { structure, .. } => structure,
            PropertyEntry::Transition { from, .. } => from,
        }
    }

    /// Every structure the entry relies on
    pub fn structures(&self) -> ArrayVec<StructureId, 2> {
        let mut structures = ArrayVec::new();
        match *self {
            PropertyEntry::GetOwn { structure, .. } | PropertyEntry::Replace { structure, .. } => {
                structures.push(structure);
            }
            PropertyEntry::GetProto {
                structure,
                holder_structure,
                ..
            } => {
                structures.push(structure);
                structures.push(holder_structure);
            }
            PropertyEntry::Transition { from, to, .. } => {
                structures.push(from);
                structures.push(to);
            }
        }
        structures
    }
}

/// Observable state of a cache site
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// Never filled
    Uninitialized,
    /// One entry
    Monomorphic,
    /// Two to [`POLYMORPHIC_CACHE_SIZE`] entries
    Polymorphic(usize),
    /// Abandoned
    Megamorphic,
}

/// Per-site cache with the usual state progression.
///
/// Polymorphic entries are scanned in insertion order. The site goes
/// megamorphic on the first miss after it is full and never recovers.
#[derive(Debug, Clone, PartialEq)]
pub enum InlineCache<K: Copy + PartialEq, E: Copy> {
    /// No entry cached yet
    Uninitialized,
    /// Single entry (most common case)
    Monomorphic(K, E),
    /// Multiple entries
    Polymorphic(ArrayVec<(K, E), POLYMORPHIC_CACHE_SIZE>),
    /// Too many keys, fallback to the generic path
    Megamorphic,
}

impl<K: Copy + PartialEq, E: Copy> InlineCache<K, E> {
    /// Create a new uninitialized cache
    pub fn new() -> Self {
        InlineCache::Uninitialized
    }

    /// Entry cached for `key`
    pub fn lookup(&self, key: K) -> Option<E> {
        match self {
            InlineCache::Uninitialized | InlineCache::Megamorphic => None,
            InlineCache::Monomorphic(cached, entry) => (*cached == key).then_some(*entry),
            InlineCache::Polymorphic(entries) => entries
                .iter()
                .find(|(cached, _)| *cached == key)
                .map(|(_, entry)| *entry),
        }
    }

    /// Record `entry` for `key`
    ///
    /// Transitions cache state as needed:
    /// - Uninitialized → Monomorphic
    /// - Monomorphic → Polymorphic (if different key)
    /// - Polymorphic → Megamorphic (if more than [`POLYMORPHIC_CACHE_SIZE`] keys)
    pub fn update(&mut self, key: K, entry: E) {
        match self {
            InlineCache::Uninitialized => {
                *self = InlineCache::Monomorphic(key, entry);
            }
            InlineCache::Monomorphic(cached, cached_entry) => {
                if *cached == key {
                    *cached_entry = entry;
                } else {
                    let mut entries = ArrayVec::new();
                    entries.push((*cached, *cached_entry));
                    entries.push((key, entry));
                    *self = InlineCache::Polymorphic(entries);
                }
            }
            InlineCache::Polymorphic(entries) => {
                if let Some(existing) = entries.iter_mut().find(|(cached, _)| *cached == key) {
                    existing.1 = entry;
                } else if entries.try_push((key, entry)).is_err() {
                    *self = InlineCache::Megamorphic;
                }
            }
            InlineCache::Megamorphic => {}
        }
    }

    /// Drop entries `keep` rejects
    ///
    /// A site left with one entry becomes monomorphic again and an emptied
    /// site uninitialized. Megamorphic sites stay megamorphic.
    pub fn retain(&mut self, mut keep: impl FnMut(&K, &E) -> bool) {
        let emptied = match self {
            InlineCache::Monomorphic(key, entry) => !keep(key, entry),
            InlineCache::Polymorphic(entries) => {
                entries.retain(|pair| keep(&pair.0, &pair.1));
                entries.is_empty()
            }
            InlineCache::Uninitialized | InlineCache::Megamorphic => false,
        };
        if emptied {
            *self = InlineCache::Uninitialized;
        } else if let InlineCache::Polymorphic(entries) = self {
            if entries.len() == 1 {
                let (key, entry) = entries[0];
                *self = InlineCache::Monomorphic(key, entry);
            }
        }
    }

    /// Current state
    pub fn state(&self) -> CacheState {
        match self {
            InlineCache::Uninitialized => CacheState::Uninitialized,
            InlineCache::Monomorphic(..) => CacheState::Monomorphic,
            InlineCache::Polymorphic(entries) => CacheState::Polymorphic(entries.len()),
            InlineCache::Megamorphic => CacheState::Megamorphic,
        }
    }
}

impl<K: Copy + PartialEq, E: Copy> Default for InlineCache<K, E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Cache of a get/put site, keyed by receiver structure
pub type PropertyCache = InlineCache<StructureId, PropertyEntry>;

/// Cache of a call site, keyed by callee cell
pub type CallCache = InlineCache<CellId, CallTarget>;

/// Inline-cache side tables of one code block
#[derive(Debug, Clone, Default)]
pub struct CodeCaches {
    /// One per property site
    pub properties: Vec<PropertyCache>,
    /// One per call site
    pub calls: Vec<CallCache>,
}

impl CodeCaches {
    /// Allocate empty caches for the given site counts
    pub fn new(property_sites: u32, call_sites: u32) -> Self {
        Self {
            properties: vec![PropertyCache::new(); property_sites as usize],
            calls: vec![CallCache::new(); call_sites as usize],
        }
    }
}
