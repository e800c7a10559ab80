//! Interned identifier table.
//!
//! Property names are interned once and compared by index afterwards. The
//! table is owned by the execution context; there is no process-wide state.

use std::collections::HashMap;
use std::sync::Arc;

/// An interned property name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Atom(u32);

impl Atom {
    /// Raw table index.
    pub fn index(self) -> u32 {
        self.0
    }

    /// Rebuilds an atom from a raw index produced by [`Atom::index`].
    pub fn from_index(index: u32) -> Atom {
        Atom(index)
    }
}

#[derive(Debug)]
struct AtomEntry {
    name: Arc<str>,
    array_index: Option<u32>,
}

/// Identifier table mapping names to [`Atom`]s and back.
///
/// # Example
///
/// ```
/// use memory_manager::AtomTable;
///
/// let mut atoms = AtomTable::new();
/// let x = atoms.intern("x");
/// assert_eq!(atoms.intern("x"), x);
/// assert_eq!(atoms.name(x), "x");
/// let twelve = atoms.intern("12");
/// assert_eq!(atoms.array_index(twelve), Some(12));
/// ```
#[derive(Debug, Default)]
pub struct AtomTable {
    entries: Vec<AtomEntry>,
    lookup: HashMap<Arc<str>, Atom>,
}

impl AtomTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `name`, returning the existing atom if already present.
    pub fn intern(&mut self, name: &str) -> Atom {
        if let Some(atom) = self.lookup.get(name) {
            return *atom;
        }
        let atom = Atom(self.entries.len() as u32);
        let shared: Arc<str> = Arc::from(name);
        self.entries.push(AtomEntry {
            name: shared.clone(),
            array_index: parse_array_index(name),
        });
        self.lookup.insert(shared, atom);
        atom
    }

    /// Interns the canonical decimal name of an array index.
    pub fn intern_index(&mut self, index: u32) -> Atom {
        self.intern(&index.to_string())
    }

    /// Looks up `name` without interning it.
    pub fn get(&self, name: &str) -> Option<Atom> {
        self.lookup.get(name).copied()
    }

    /// The text of an atom.
    pub fn name(&self, atom: Atom) -> &str {
        self.entries
            .get(atom.0 as usize)
            .map(|entry| &*entry.name)
            .unwrap_or("")
    }

    /// The array index this atom names, if it is a canonical index string.
    pub fn array_index(&self, atom: Atom) -> Option<u32> {
        self.entries
            .get(atom.0 as usize)
            .and_then(|entry| entry.array_index)
    }

    /// Number of interned names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing has been interned.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_array_index(name: &str) -> Option<u32> {
    if name.is_empty() || (name.len() > 1 && name.starts_with('0')) {
        return None;
    }
    if !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    name.parse::<u32>().ok().filter(|index| *index != u32::MAX)
}
