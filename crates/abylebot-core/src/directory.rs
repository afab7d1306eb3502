//! Directory: bidirectional lookup of platform identities (ID ↔ name).
//!
//! Each backend decoder owns one directory per kind of identity it tracks
//! (users, channels, guilds). Entries are keyed by ID; names map back to IDs.
//!
//! A later entry always wins: re-adding an ID replaces its record and name,
//! re-using a name points it at the newest ID. Reverse lookups of an old name
//! are not invalidated when an ID is renamed.

use std::collections::HashMap;

/// Anything that can live in a [`Directory`].
pub trait DirectoryEntry {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
}

/// Minimal directory entry: an ID and a display name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub name: String,
}

impl Identity {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Identity {
            id: id.into(),
            name: name.into(),
        }
    }
}

impl DirectoryEntry for Identity {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ─────────────────────────────────────────────
// Directory
// ─────────────────────────────────────────────

/// ID-keyed store with a name → ID reverse index.
#[derive(Clone, Debug)]
pub struct Directory<T> {
    entries: HashMap<String, T>,
    name_to_id: HashMap<String, String>,
}

impl<T: DirectoryEntry> Directory<T> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            name_to_id: HashMap::new(),
        }
    }

    /// Add or replace an entry. Returns the previous entry for the same ID.
    pub fn insert(&mut self, entry: T) -> Option<T> {
        let id = entry.id().to_string();
        self.name_to_id.insert(entry.name().to_string(), id.clone());
        self.entries.insert(id, entry)
    }

    /// Look up an entry by ID.
    pub fn get(&self, id: &str) -> Option<&T> {
        self.entries.get(id)
    }

    /// Mutable access to an entry. Renames must go through [`insert`](Self::insert).
    pub fn get_mut(&mut self, id: &str) -> Option<&mut T> {
        self.entries.get_mut(id)
    }

    /// Look up an entry by its (most recently observed) name.
    pub fn get_by_name(&self, name: &str) -> Option<&T> {
        self.name_to_id
            .get(name)
            .and_then(|id| self.entries.get(id))
    }

    pub fn name_of(&self, id: &str) -> Option<&str> {
        self.entries.get(id).map(|e| e.name())
    }

    pub fn id_of(&self, name: &str) -> Option<&str> {
        self.name_to_id.get(name).map(String::as_str)
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.name_to_id.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.values()
    }
}

impl<T: DirectoryEntry> Default for Directory<T> {
    fn default() -> Self {
        Self::new()
    }
}
