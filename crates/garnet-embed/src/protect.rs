//! Protected call executor
//!
//! Every host entry into the runtime goes through [`run_protected`]. It
//! runs one operation under a fresh unwind target, so an exception raised
//! anywhere beneath it (script code, builtins, host methods) comes back as
//! a value/error pair instead of unwinding into host frames.
//!
//! Operations that report failure through the pending-exception slot
//! without jumping (loading and running top-level code) are folded into
//! the same pair.

use crate::context::CompileContext;
use garnet_engine::{CompileOptions, Value, Vm};
use tracing::trace;

/// A runtime operation to run under protection
pub enum Operation<'a> {
    /// Compile and run source text with the top-level `self`
    Load {
        /// Source text
        source: &'a str,
        /// Compile settings
        context: Option<&'a CompileContext>,
    },
    /// Call a method
    Call {
        /// Receiver
        recv: Value,
        /// Method name
        method: &'a str,
        /// Positional arguments
        args: &'a [Value],
        /// Block, if any
        block: Option<Value>,
    },
    /// Run a compiled top-level proc with `recv` as `self`
    Run {
        /// Proc from [`Garnet::parse`](crate::Garnet::parse)
        proc: Value,
        /// `self` for the run
        recv: Value,
    },
    /// Call a block with arguments
    Yield {
        /// Block or proc
        block: Value,
        /// Arguments
        args: &'a [Value],
    },
    /// Any other runtime routine
    Apply(Box<dyn FnOnce(&Vm) -> Value + 'a>),
}

impl Operation<'_> {
    fn name(&self) -> &'static str {
        match self {
            Operation::Load { .. } => "load",
            Operation::Call { .. } => "call",
            Operation::Run { .. } => "run",
            Operation::Yield { .. } => "yield",
            Operation::Apply(_) => "apply",
        }
    }

    fn perform(self, vm: &Vm) -> Value {
        match self {
            Operation::Load { source, context } => match context {
                Some(context) => vm.load_string_cxt(source, context.options()),
                None => vm.load_string_cxt(source, &CompileOptions::default()),
            },
            Operation::Call {
                recv,
                method,
                args,
                block,
            } => vm.funcall_with_block(recv, method, args, block.unwrap_or(Value::NIL)),
            Operation::Run { proc, recv } => vm.run(proc, recv),
            Operation::Yield { block, args } => vm.yield_argv(block, args),
            Operation::Apply(f) => f(vm),
        }
    }
}

/// Run `op` and return `(result, None)` on completion or
/// `(nil, Some(exception))` when it raised.
///
/// The unwind target in effect before the call is in effect again after
/// it, on both paths. The returned value (or exception) is protected in
/// the GC arena until the caller restores the arena below this point.
/// A `break` or `return` in a block whose owner lies outside `op` raises
/// `LocalJumpError` inside it, so it comes back as the error. Panics that
/// are not runtime exceptions are resumed.
pub fn run_protected(vm: &Vm, op: Operation<'_>) -> (Value, Option<Value>) {
    let name = op.name();
    let depth = vm.unwind_depth();
    trace!(op = name, depth, "protected call start");

    vm.set_exc(Value::NIL);
    let outcome = vm.protect(|vm| op.perform(vm));

    let (value, error) = match outcome {
        Ok(value) => {
            let pending = vm.take_exc();
            if pending.is_nil() {
                (value, None)
            } else {
                (Value::NIL, Some(pending))
            }
        }
        Err(exc) => (Value::NIL, Some(exc)),
    };

    match error {
        Some(exc) => {
            vm.gc_protect(exc);
            trace!(op = name, depth, exception = %vm.obj_classname(exc), "protected call raised");
        }
        None => {
            vm.gc_protect(value);
            trace!(op = name, depth, "protected call done");
        }
    }
    (value, error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_completion() {
        let vm = Vm::new();
        let (value, error) = run_protected(
            &vm,
            Operation::Load {
                source: "1 + 2",
                context: None,
            },
        );
        assert!(error.is_none());
        assert_eq!(value.as_integer(), 3);
        assert!(vm.exc().is_nil());
        assert_eq!(vm.unwind_depth(), 0);
    }

    #[test]
    fn test_raise_is_intercepted() {
        let vm = Vm::new();
        let (value, error) = run_protected(
            &vm,
            Operation::Call {
                recv: vm.top_self(),
                method: "raise",
                args: &[vm.str_new("boom")],
                block: None,
            },
        );
        assert!(value.is_nil());
        let exc = error.unwrap();
        assert_eq!(vm.exc_message(exc), "boom");
        assert_eq!(vm.obj_classname(exc), "RuntimeError");
        assert!(vm.exc().is_nil());
        assert_eq!(vm.unwind_depth(), 0);
        assert_eq!(vm.call_depth(), 0);
    }

    #[test]
    fn test_syntax_error_reported_without_jump() {
        let vm = Vm::new();
        let cxt = CompileContext::with_filename("broken.rb");
        let (value, error) = run_protected(
            &vm,
            Operation::Load {
                source: "def foo(",
                context: Some(&cxt),
            },
        );
        assert!(value.is_nil());
        let exc = error.unwrap();
        assert_eq!(vm.obj_classname(exc), "SyntaxError");
        assert!(vm.exc_message(exc).starts_with("broken.rb:"));
    }

    #[test]
    fn test_nested_targets_restore() {
        let vm = Vm::new();
        let (value, error) = run_protected(
            &vm,
            Operation::Apply(Box::new(|vm: &Vm| {
                let outer = vm.unwind_target();
                let (_, inner_error) = run_protected(
                    vm,
                    Operation::Load {
                        source: "raise 'inner'",
                        context: None,
                    },
                );
                assert!(inner_error.is_some());
                assert_eq!(vm.unwind_target(), outer);
                Value::fixnum(vm.unwind_depth() as i64)
            })),
        );
        assert!(error.is_none());
        assert_eq!(value.as_integer(), 1);
        assert_eq!(vm.unwind_depth(), 0);
    }

    #[test]
    fn test_yield_without_block_raises() {
        let vm = Vm::new();
        let (_, error) = run_protected(
            &vm,
            Operation::Yield {
                block: Value::NIL,
                args: &[],
            },
        );
        assert_eq!(vm.obj_classname(error.unwrap()), "LocalJumpError");
    }

    #[test]
    fn test_foreign_panic_is_resumed() {
        let vm = Vm::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            run_protected(&vm, Operation::Apply(Box::new(|_vm: &Vm| panic!("host bug"))))
        }));
        assert!(result.is_err());
        assert_eq!(vm.unwind_depth(), 0);
        assert!(vm.unwind_target().is_none());
    }
}
