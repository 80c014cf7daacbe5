//! Argument marshaling for host-defined methods

use garnet_engine::{Value, Vm};
use std::ops::Deref;

/// Arguments of one host method invocation: the positional arguments in
/// call order, followed by the block when one was passed.
///
/// A buffer lives for the duration of a single dispatch; values in it are
/// rooted by the call frame they came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgumentBuffer {
    values: Vec<Value>,
    has_block: bool,
}

impl ArgumentBuffer {
    /// Build a buffer from positional arguments and an optional block.
    /// A nil block counts as no block.
    pub fn new(args: Vec<Value>, block: Value) -> Self {
        let mut values = args;
        let has_block = !block.is_nil();
        if has_block {
            values.push(block);
        }
        Self { values, has_block }
    }

    /// Positional arguments only
    pub fn args(&self) -> &[Value] {
        if self.has_block {
            &self.values[..self.values.len() - 1]
        } else {
            &self.values
        }
    }

    /// The block, if one was passed
    pub fn block(&self) -> Option<Value> {
        if self.has_block {
            self.values.last().copied()
        } else {
            None
        }
    }

    /// Number of values, block included
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the call passed nothing at all
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Every value, block last
    pub fn as_slice(&self) -> &[Value] {
        &self.values
    }

    /// Every value, block last
    pub fn into_vec(self) -> Vec<Value> {
        self.values
    }
}

impl Deref for ArgumentBuffer {
    type Target = [Value];

    fn deref(&self) -> &[Value] {
        &self.values
    }
}

/// Collect the arguments of the native call currently executing.
///
/// Outside of a native call the buffer is empty.
pub fn collect_args(vm: &Vm) -> ArgumentBuffer {
    let (args, block) = vm.get_args_rest_block();
    ArgumentBuffer::new(args, block)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_is_appended_last() {
        let block = Value::fixnum(99);
        let buffer = ArgumentBuffer::new(vec![Value::fixnum(1), Value::fixnum(2)], block);
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.args(), &[Value::fixnum(1), Value::fixnum(2)]);
        assert_eq!(buffer.block(), Some(block));
        assert_eq!(buffer.as_slice().last(), Some(&block));
    }

    #[test]
    fn test_nil_block_is_absent() {
        let buffer = ArgumentBuffer::new(vec![Value::TRUE], Value::NIL);
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.block(), None);
        assert_eq!(buffer.args(), buffer.as_slice());
    }

    #[test]
    fn test_empty_outside_native_call() {
        let vm = Vm::new();
        let buffer = collect_args(&vm);
        assert!(buffer.is_empty());
        assert!(buffer.into_vec().is_empty());
    }
}
