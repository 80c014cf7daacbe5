//! Object handle utilities
//!
//! Reading a value's payload is done with the accessors on [`Value`]
//! (`type_tag`, `as_integer`, `as_float`, `as_pointer`, `is_nil`). Each
//! payload accessor assumes the tag was checked first; on a mismatch the
//! result is meaningless but never unsafe.

use garnet_engine::{RBasic, Value, Vm};
use std::cell::Ref;

/// Borrowed view of a heap object's header.
///
/// `None` for immediates and for handles whose object was collected. The
/// view borrows the heap: holding it while the VM allocates or runs code
/// panics. Use [`basic_header`] to keep the header around.
pub fn as_basic_object<'vm>(vm: &'vm Vm, value: Value) -> Option<Ref<'vm, RBasic>> {
    vm.basic(value)
}

/// Copy of a heap object's header, detached from the heap
pub fn basic_header(vm: &Vm, value: Value) -> Option<RBasic> {
    as_basic_object(vm, value).map(|basic| *basic)
}

/// Conversion of host values into runtime values
pub trait IntoValue {
    /// Convert, allocating in `vm` if needed
    fn into_value(self, vm: &Vm) -> Value;
}

impl IntoValue for Value {
    fn into_value(self, _vm: &Vm) -> Value {
        self
    }
}

impl IntoValue for () {
    fn into_value(self, _vm: &Vm) -> Value {
        Value::NIL
    }
}

impl IntoValue for bool {
    fn into_value(self, _vm: &Vm) -> Value {
        Value::bool(self)
    }
}

impl IntoValue for i64 {
    fn into_value(self, _vm: &Vm) -> Value {
        Value::fixnum(self)
    }
}

impl IntoValue for i32 {
    fn into_value(self, _vm: &Vm) -> Value {
        Value::fixnum(i64::from(self))
    }
}

impl IntoValue for f64 {
    fn into_value(self, _vm: &Vm) -> Value {
        Value::float(self)
    }
}

impl IntoValue for &str {
    fn into_value(self, vm: &Vm) -> Value {
        vm.str_new(self)
    }
}

impl IntoValue for String {
    fn into_value(self, vm: &Vm) -> Value {
        vm.str_new(self)
    }
}

impl<T: IntoValue> IntoValue for Option<T> {
    fn into_value(self, vm: &Vm) -> Value {
        match self {
            Some(value) => value.into_value(vm),
            None => Value::NIL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use garnet_engine::ValueType;

    #[test]
    fn test_basic_object_view() {
        let vm = Vm::new();
        let s = vm.str_new("abc");
        {
            let basic = as_basic_object(&vm, s).unwrap();
            assert_eq!(basic.tt, ValueType::String);
            assert_eq!(basic.class, vm.core().string);
            assert!(!basic.frozen);
        }
        assert!(as_basic_object(&vm, Value::fixnum(3)).is_none());
    }

    #[test]
    fn test_header_copy_outlives_allocation() {
        let vm = Vm::new();
        let s = vm.str_new("abc");
        let header = basic_header(&vm, s).unwrap();
        let other = vm.str_new("def");
        assert_eq!(header.tt, ValueType::String);
        assert_eq!(basic_header(&vm, other), Some(header));
        assert!(basic_header(&vm, Value::NIL).is_none());
    }

    #[test]
    fn test_into_value() {
        let vm = Vm::new();
        assert_eq!(42i64.into_value(&vm).as_integer(), 42);
        assert_eq!(7i32.into_value(&vm).as_integer(), 7);
        assert_eq!(1.5f64.into_value(&vm).as_float(), 1.5);
        assert_eq!(true.into_value(&vm), Value::TRUE);
        assert_eq!(().into_value(&vm), Value::NIL);
        assert_eq!(None::<i64>.into_value(&vm), Value::NIL);
        let s = "hi".into_value(&vm);
        assert_eq!(vm.string_of(s).as_deref(), Some("hi"));
    }
}
