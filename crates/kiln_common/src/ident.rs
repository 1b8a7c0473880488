//! Per-circuit table of port and node names.

use lasso::{Rodeo, Spur};

/// A name stored in a [`NameTable`]. Only meaningful together with the
/// table that produced it; comparing two names is a key comparison.
pub type Name = Spur;

/// Names of one circuit's ports and labelled nodes.
///
/// Each context owns its own table, so the table is single-threaded.
#[derive(Debug, Default)]
pub struct NameTable {
    rodeo: Rodeo,
}

impl NameTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `name`, returning the existing key when it is already present.
    pub fn intern(&mut self, name: &str) -> Name {
        self.rodeo.get_or_intern(name)
    }

    /// Looks up `name` without storing it.
    pub fn lookup(&self, name: &str) -> Option<Name> {
        self.rodeo.get(name)
    }

    /// Returns the string for a key produced by this table.
    pub fn resolve(&self, name: Name) -> &str {
        self.rodeo.resolve(&name)
    }
}
