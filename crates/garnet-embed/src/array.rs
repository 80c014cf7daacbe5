//! Array access from the host

use crate::error::Result;
use crate::garnet::Garnet;
use garnet_engine::Value;

/// A runtime array
#[derive(Clone, Debug)]
pub struct Array {
    garnet: Garnet,
    value: Value,
}

impl Array {
    pub(crate) fn new(garnet: Garnet, value: Value) -> Self {
        Self { garnet, value }
    }

    /// The array as a runtime value
    pub fn value(&self) -> Value {
        self.value
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.garnet.vm().ary_len(self.value).unwrap_or(0)
    }

    /// Whether the array has no elements
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element at `index`; negative indexes count from the end. Nil when
    /// out of range.
    pub fn get(&self, index: i64) -> Value {
        self.garnet.vm().ary_ref(self.value, index)
    }

    /// Append an element. Fails on frozen arrays.
    pub fn push(&self, item: Value) -> Result<()> {
        let array = self.value;
        self.garnet.apply(|vm| {
            vm.ary_push(array, item);
            Value::NIL
        })?;
        Ok(())
    }
}
