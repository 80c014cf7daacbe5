//! Tagged value representation
//!
//! A [`Value`] is a fixed-size, copyable record: a one-byte type tag plus a
//! 64-bit payload. Immediates (integers, floats, symbols, booleans, nil)
//! live entirely in the payload. Heap-backed values carry an [`ObjRef`]
//! handle into the collector's slot table.
//!
//! # Handle Encoding
//!
//! ```text
//! ObjRef:   gggggggggggggggggggggggggggggggg iiiiiiiiiiiiiiiiiiiiiiiiiiiiiiii
//!           (generation, 32 bits)            (slot index + 1, 32 bits)
//! ```
//!
//! A slot index of zero is the null handle. The generation changes every
//! time a slot is reused, so a handle to a collected object can be detected
//! without dereferencing anything.

use crate::parser::Symbol;
use std::fmt;

/// Runtime type tag.
///
/// Numbering follows the classic `mrb_vtype` layout so hosts that switch on
/// type tags see familiar values; `Nil` takes the otherwise unused slot 1.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueType {
    /// `false`
    False = 0,
    /// `nil`
    Nil = 1,
    /// `true`
    True = 2,
    /// Immediate integer
    Fixnum = 3,
    /// Interned symbol
    Symbol = 4,
    /// Internal "no value" marker
    Undef = 5,
    /// Immediate float
    Float = 6,
    /// Plain object instance
    Object = 8,
    /// Class
    Class = 9,
    /// Module
    Module = 10,
    /// Singleton class
    SClass = 12,
    /// Proc / block / compiled top-level code
    Proc = 13,
    /// Array
    Array = 14,
    /// Hash
    Hash = 15,
    /// String
    String = 16,
    /// Exception instance
    Exception = 18,
    /// Captured variable environment
    Env = 20,
}

impl ValueType {
    /// Whether values of this type live in the heap
    #[inline]
    pub const fn is_heap(self) -> bool {
        (self as u8) >= (ValueType::Object as u8)
    }
}

/// Handle to a heap object (slot index + generation).
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjRef(u64);

impl ObjRef {
    /// The null handle
    pub const NULL: ObjRef = ObjRef(0);

    #[inline]
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        ObjRef(((generation as u64) << 32) | (index as u64 + 1))
    }

    /// Slot index, or `None` for the null handle
    #[inline]
    pub const fn index(self) -> Option<usize> {
        let low = (self.0 & 0xFFFF_FFFF) as usize;
        if low == 0 {
            None
        } else {
            Some(low - 1)
        }
    }

    /// Slot generation this handle was issued for
    #[inline]
    pub const fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Check for the null handle
    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 & 0xFFFF_FFFF == 0
    }

    /// Raw bits
    #[inline]
    pub const fn to_bits(self) -> u64 {
        self.0
    }

    /// Rebuild a handle from raw bits
    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        ObjRef(bits)
    }
}

impl fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index() {
            Some(index) => write!(f, "ObjRef({}@{})", index, self.generation()),
            None => write!(f, "ObjRef(null)"),
        }
    }
}

/// A runtime value: type tag plus payload.
///
/// Values are plain data. Copying a heap-backed value copies the handle,
/// not the object; the object stays owned by the collector.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Value {
    tt: ValueType,
    payload: u64,
}

impl Value {
    /// `nil`
    pub const NIL: Value = Value::raw(ValueType::Nil, 0);
    /// `true`
    pub const TRUE: Value = Value::raw(ValueType::True, 1);
    /// `false`
    pub const FALSE: Value = Value::raw(ValueType::False, 0);
    /// Internal marker for "no value given"
    pub const UNDEF: Value = Value::raw(ValueType::Undef, 0);

    #[inline]
    const fn raw(tt: ValueType, payload: u64) -> Self {
        Value { tt, payload }
    }

    /// Create a boolean value
    #[inline]
    pub const fn bool(b: bool) -> Self {
        if b {
            Value::TRUE
        } else {
            Value::FALSE
        }
    }

    /// Create an integer value
    #[inline]
    pub const fn fixnum(i: i64) -> Self {
        Value::raw(ValueType::Fixnum, i as u64)
    }

    /// Create a float value
    #[inline]
    pub fn float(f: f64) -> Self {
        Value::raw(ValueType::Float, f.to_bits())
    }

    /// Create a symbol value
    #[inline]
    pub const fn symbol(sym: Symbol) -> Self {
        Value::raw(ValueType::Symbol, sym.to_bits() as u64)
    }

    /// Wrap a heap handle with its type tag
    #[inline]
    pub(crate) const fn object(tt: ValueType, obj: ObjRef) -> Self {
        Value::raw(tt, obj.to_bits())
    }

    /// Type tag
    #[inline]
    pub const fn type_tag(&self) -> ValueType {
        self.tt
    }

    /// Check for `nil`
    #[inline]
    pub const fn is_nil(&self) -> bool {
        matches!(self.tt, ValueType::Nil)
    }

    /// Check for the undef marker
    #[inline]
    pub const fn is_undef(&self) -> bool {
        matches!(self.tt, ValueType::Undef)
    }

    /// Everything except `nil` and `false` is truthy
    #[inline]
    pub const fn is_truthy(&self) -> bool {
        !matches!(self.tt, ValueType::Nil | ValueType::False | ValueType::Undef)
    }

    /// Whether the value is stored inline (never touches the heap)
    #[inline]
    pub const fn is_immediate(&self) -> bool {
        !self.tt.is_heap()
    }

    /// Whether the value refers to a heap object
    #[inline]
    pub const fn is_heap(&self) -> bool {
        self.tt.is_heap()
    }

    /// Integer payload. Meaningful only when `type_tag()` is `Fixnum`.
    #[inline]
    pub const fn as_integer(&self) -> i64 {
        self.payload as i64
    }

    /// Float payload. Meaningful only when `type_tag()` is `Float`.
    #[inline]
    pub fn as_float(&self) -> f64 {
        f64::from_bits(self.payload)
    }

    /// Heap handle. Meaningful only for heap-backed values; for immediates
    /// the result is a handle that never resolves to a live object.
    #[inline]
    pub const fn as_pointer(&self) -> ObjRef {
        if self.tt.is_heap() {
            ObjRef::from_bits(self.payload)
        } else {
            ObjRef::NULL
        }
    }

    /// Symbol payload, `None` unless this is a symbol
    #[inline]
    pub fn as_symbol(&self) -> Option<Symbol> {
        if matches!(self.tt, ValueType::Symbol) {
            Symbol::from_bits(self.payload as u32)
        } else {
            None
        }
    }

    /// Numeric payload as a float (integers are converted)
    #[inline]
    pub fn as_number(&self) -> Option<f64> {
        match self.tt {
            ValueType::Fixnum => Some(self.as_integer() as f64),
            ValueType::Float => Some(self.as_float()),
            _ => None,
        }
    }

    /// Raw payload bits
    #[inline]
    pub const fn payload(&self) -> u64 {
        self.payload
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::NIL
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.tt {
            ValueType::Nil => write!(f, "nil"),
            ValueType::True => write!(f, "true"),
            ValueType::False => write!(f, "false"),
            ValueType::Undef => write!(f, "undef"),
            ValueType::Fixnum => write!(f, "{}", self.as_integer()),
            ValueType::Float => write!(f, "{:?}", self.as_float()),
            ValueType::Symbol => write!(f, "Symbol({})", self.payload),
            tt => write!(f, "{:?}({:?})", tt, self.as_pointer()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_size() {
        assert_eq!(std::mem::size_of::<Value>(), 16);
    }

    #[test]
    fn test_immediates() {
        assert!(Value::NIL.is_nil());
        assert!(!Value::NIL.is_truthy());
        assert!(!Value::FALSE.is_truthy());
        assert!(Value::fixnum(0).is_truthy());
        assert!(Value::fixnum(7).is_immediate());

        assert_eq!(Value::fixnum(-42).as_integer(), -42);
        assert_eq!(Value::float(1.5).as_float(), 1.5);
        assert_eq!(Value::fixnum(3).as_number(), Some(3.0));
        assert_eq!(Value::bool(true), Value::TRUE);
    }

    #[test]
    fn test_immediates_have_no_pointer() {
        assert!(Value::fixnum(12345).as_pointer().is_null());
        assert!(Value::float(2.0).as_pointer().is_null());
        assert!(Value::TRUE.as_pointer().is_null());
    }

    #[test]
    fn test_objref_encoding() {
        let r = ObjRef::new(5, 3);
        assert_eq!(r.index(), Some(5));
        assert_eq!(r.generation(), 3);
        assert!(!r.is_null());
        assert_eq!(ObjRef::NULL.index(), None);
        assert_eq!(ObjRef::from_bits(r.to_bits()), r);

        let v = Value::object(ValueType::String, r);
        assert!(v.is_heap());
        assert_eq!(v.as_pointer(), r);
    }
}
