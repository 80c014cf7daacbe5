//! Hash access from the host

use crate::error::Result;
use crate::garnet::Garnet;
use garnet_engine::Value;

/// A runtime hash.
///
/// Operations that can raise run under protection, so writing to a frozen
/// hash reports an error instead of unwinding.
#[derive(Clone, Debug)]
pub struct Hash {
    garnet: Garnet,
    value: Value,
}

impl Hash {
    pub(crate) fn new(garnet: Garnet, value: Value) -> Self {
        Self { garnet, value }
    }

    /// The hash as a runtime value
    pub fn value(&self) -> Value {
        self.value
    }

    /// Value stored under `key`, nil if absent
    pub fn get(&self, key: Value) -> Result<Value> {
        let hash = self.value;
        self.garnet
            .apply(|vm| vm.hash_get(hash, key).unwrap_or(Value::NIL))
    }

    /// Store `value` under `key`
    pub fn set(&self, key: Value, value: Value) -> Result<()> {
        let hash = self.value;
        self.garnet.apply(|vm| {
            vm.hash_set(hash, key, value);
            Value::NIL
        })?;
        Ok(())
    }

    /// Remove `key`, returning its value if it was present
    pub fn delete(&self, key: Value) -> Result<Option<Value>> {
        let hash = self.value;
        let mut removed = None;
        self.garnet.apply(|vm| {
            removed = vm.hash_delete(hash, key);
            removed.unwrap_or(Value::NIL)
        })?;
        Ok(removed)
    }

    /// Array of the keys, in insertion order
    pub fn keys(&self) -> Result<Value> {
        let hash = self.value;
        self.garnet.apply(|vm| vm.ary_new(vm.hash_keys(hash)))
    }

    /// Number of entries
    pub fn size(&self) -> usize {
        self.garnet.vm().hash_len(self.value)
    }
}
