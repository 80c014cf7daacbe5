//! Symbol interning
//!
//! Method names, variable names and `:symbol` literals are interned once
//! and referred to by small integer symbols. The raw value of a symbol is
//! also the payload of a `Symbol`-typed runtime value.

use rustc_hash::FxHashMap;
use std::num::NonZeroU32;

/// An interned string symbol (32-bit index).
///
/// Symbols are small (4 bytes) and can be copied cheaply.
/// Use `Interner::resolve()` to get the actual string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(NonZeroU32);

impl Symbol {
    #[inline]
    fn from_index(index: usize) -> Self {
        // Add 1 because NonZeroU32 cannot be 0
        Symbol(NonZeroU32::new(index as u32 + 1).expect("symbol index overflow"))
    }

    #[inline]
    fn index(self) -> usize {
        (self.0.get() - 1) as usize
    }

    /// Raw bits, as stored in a symbol value's payload
    #[inline]
    pub const fn to_bits(self) -> u32 {
        self.0.get()
    }

    /// Rebuild a symbol from raw bits; `None` for the reserved zero pattern
    #[inline]
    pub fn from_bits(bits: u32) -> Option<Self> {
        NonZeroU32::new(bits).map(Symbol)
    }
}

/// String interner that deduplicates strings.
#[derive(Clone, Default)]
pub struct Interner {
    /// Map from string to symbol
    map: FxHashMap<String, Symbol>,

    /// Interned strings, indexed by symbol
    strings: Vec<String>,
}

impl Interner {
    /// Create a new empty interner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new interner with preallocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            map: FxHashMap::with_capacity_and_hasher(capacity, Default::default()),
            strings: Vec::with_capacity(capacity),
        }
    }

    /// Intern a string, returning its symbol.
    pub fn intern(&mut self, s: &str) -> Symbol {
        if let Some(&sym) = self.map.get(s) {
            return sym;
        }

        let sym = Symbol::from_index(self.strings.len());
        self.strings.push(s.to_string());
        self.map.insert(s.to_string(), sym);
        sym
    }

    /// Look a string up without interning it
    pub fn get(&self, s: &str) -> Option<Symbol> {
        self.map.get(s).copied()
    }

    /// Resolve a symbol back to its string.
    ///
    /// Symbols not produced by this interner resolve to an empty string.
    #[inline]
    pub fn resolve(&self, sym: Symbol) -> &str {
        self.strings.get(sym.index()).map(String::as_str).unwrap_or("")
    }

    /// Get the number of interned strings.
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    /// Check if the interner is empty.
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_deduplicates() {
        let mut interner = Interner::new();
        let a = interner.intern("double");
        let b = interner.intern("double");
        let c = interner.intern("triple");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(interner.len(), 2);
        assert_eq!(interner.resolve(c), "triple");
    }

    #[test]
    fn test_symbol_bits_roundtrip() {
        let mut interner = Interner::with_capacity(4);
        let sym = interner.intern("@name");
        assert_eq!(Symbol::from_bits(sym.to_bits()), Some(sym));
        assert_eq!(Symbol::from_bits(0), None);
    }
}
