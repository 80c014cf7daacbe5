//! GC root tracking
//!
//! Roots are starting points for GC traversal and include:
//! - Globals, core classes and the top-level `self`
//! - Call frames (receivers, arguments, blocks, environments)
//! - The pending exception
//! - The arena: values created by Rust code that are not yet reachable
//!   from anything else

use crate::vm::value::Value;

/// Saved arena position, see [`Arena::save`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ArenaIndex(pub(crate) usize);

/// Temporary roots for freshly created values.
///
/// Every allocation is pushed here so a value held only by a Rust local
/// survives collection. Code that creates many temporaries saves the arena
/// position first and restores it afterwards.
#[derive(Debug)]
pub struct Arena {
    values: Vec<Value>,
}

impl Arena {
    /// Create an arena with room for `capacity` values
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            values: Vec::with_capacity(capacity),
        }
    }

    /// Protect a value until the arena is restored below it
    pub fn protect(&mut self, value: Value) {
        if value.is_heap() {
            self.values.push(value);
        }
    }

    /// Current position
    pub fn save(&self) -> ArenaIndex {
        ArenaIndex(self.values.len())
    }

    /// Drop every value protected since `index` was saved
    pub fn restore(&mut self, index: ArenaIndex) {
        self.values.truncate(index.0);
    }

    /// Number of protected values
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over protected values
    pub fn iter(&self) -> impl Iterator<Item = Value> + '_ {
        self.values.iter().copied()
    }
}

/// Root set gathered at the start of a collection
#[derive(Debug, Default)]
pub struct RootSet {
    roots: Vec<Value>,
}

impl RootSet {
    /// Create an empty root set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a root; immediates are ignored
    pub fn add(&mut self, value: Value) {
        if value.is_heap() {
            self.roots.push(value);
        }
    }

    /// Add several roots
    pub fn extend(&mut self, values: impl IntoIterator<Item = Value>) {
        for value in values {
            self.add(value);
        }
    }

    /// Iterate over all roots
    pub fn iter(&self) -> impl Iterator<Item = Value> + '_ {
        self.roots.iter().copied()
    }

    /// Get total number of roots
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}
